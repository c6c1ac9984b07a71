//! Driver Registry & Capabilities (spec §4.D) and the external driver
//! interface (spec §6), grounded on the teacher's warrior-trait pattern
//! (`Runner`/`Prover`/`Verifier`/`Deployer`) and
//! `original_source/nn/runtime/VersionedIDevice.h` /
//! `original_source/nn/common/include/HalInterfaces.h` for what a driver
//! actually needs to expose (capabilities, per-op support, prepare,
//! asynchronous execute).

use crate::error::Result;
use crate::event::Completer;
use crate::model::Model;
use crate::operand::OpKind;
use crate::request::Request;

/// A device's current readiness (spec §4.D).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Available,
    Busy,
    Offline,
    Unknown,
}

/// A device's exec-time/power figures for one operand class (spec §4.D),
/// grounded on `original_source/nn/common/include/HalAbstraction.h`'s
/// `PerformanceInfo { execTime; powerUsage; }`. Lower is better; both
/// figures are compared only between devices, never against an absolute
/// scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerformanceInfo {
    pub exec_time: f32,
    pub power_usage: f32,
}

impl PerformanceInfo {
    pub fn new(exec_time: f32, power_usage: f32) -> Self {
        Self { exec_time, power_usage }
    }
}

/// A device's advertised performance, tracked independently per operand
/// class the way `Manager.h` keeps separate `Float32Performance` and
/// `Quantized8Performance` structs — extended here with a third `scalar`
/// class (plain `I32`/`U32`/`TensorI32` operands) rather than folding
/// scalars into the quant8 figure as the original's `getPerformanceInfo`
/// does, since exec time and power for an index/shape computation need
/// not track a quantized tensor op's.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Capabilities {
    pub float32: PerformanceInfo,
    pub quant8: PerformanceInfo,
    pub scalar: PerformanceInfo,
}

impl Capabilities {
    pub fn new(float32: PerformanceInfo, quant8: PerformanceInfo, scalar: PerformanceInfo) -> Self {
        Self { float32, quant8, scalar }
    }

    /// Same exec-time/power figures across all three classes, for drivers
    /// that don't differentiate performance by operand type.
    pub fn uniform(exec_time: f32, power_usage: f32) -> Self {
        let perf = PerformanceInfo::new(exec_time, power_usage);
        Self { float32: perf, quant8: perf, scalar: perf }
    }
}

/// A registered execution backend. A driver advertises what it supports
/// and, when asked, prepares a sub-model into a [`PreparedModel`] it can
/// run later (spec §4.D, §6).
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn status(&self) -> Status;

    /// Per-operation support (spec §4.D): `supported[i]` tells the
    /// planner whether operation `i` of `model` can run on this driver.
    fn supported_operations(&self, model: &Model) -> Vec<bool>;

    /// Compile `model` (already trimmed to the operations this driver
    /// claimed) into a runnable [`PreparedModel`].
    fn prepare_model(&self, model: &Model) -> Result<Box<dyn PreparedModel>>;
}

/// A compiled, runnable sub-model (spec §6). `execute` takes the request
/// and asynchronously signals `completer` on completion rather than
/// blocking and returning a `Result` directly — the caller observes the
/// outcome through the paired `Event` (`crate::event::event_pair`).
pub trait PreparedModel: Send + Sync {
    fn execute(&self, request: &mut Request, completer: Completer);
}

/// Whether a given `OpKind` is one this driver's `supported_operations`
/// would ever claim; a convenience default most drivers build on top of
/// by checking kind membership before deeper shape/type checks.
pub fn kind_is_in(kind: OpKind, set: &[OpKind]) -> bool {
    set.contains(&kind)
}
