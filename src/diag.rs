//! Progress/diagnostic sink, in place of a logging framework.
//!
//! The teacher carries no `log`/`tracing` dependency; its compiler reports
//! progress through `Diagnostic` values collected into a `Vec` and
//! rendered on demand. The executor and planner follow the same shape:
//! callers that want visibility pass a `&mut Diagnostics` and get back an
//! ordered trace of what ran where.

/// One recorded line of runtime progress (which step, device, or operation
/// produced it).
#[derive(Clone, Debug)]
pub struct DiagLine {
    pub message: String,
}

/// An ordered sink of diagnostic lines. Cheap to construct and to ignore —
/// passing `&mut Diagnostics::default()` costs nothing but a `Vec::new()`.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    lines: Vec<DiagLine>,
}

impl Diagnostics {
    pub fn record(&mut self, message: impl Into<String>) {
        self.lines.push(DiagLine {
            message: message.into(),
        });
    }

    pub fn lines(&self) -> &[DiagLine] {
        &self.lines
    }

    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
