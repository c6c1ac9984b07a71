//! Model graph construction & validation (spec §4.C) and the finalized
//! [`Model`] aggregate (spec §3).
//!
//! Grounded on `original_source/nn/runtime/ModelBuilder.{h,cpp}`: a single
//! append-only table of operands/operations that becomes immutable on
//! `finish()`, at which point it has also been sorted into run order.

mod builder;
mod toposort;

pub use builder::ModelBuilder;

use crate::config::MAX_OPERANDS;
use crate::error::{Error, Result};
use crate::operand::{Operand, Operation};
use crate::pool::PoolRegistry;

/// A finalized (or in-progress) model graph: operands, operations, the
/// constant blob, the pool registry, and the declared I/O index lists.
///
/// `Clone` is cheap (the pool registry only clones `Arc` handles) and
/// exists so the planner's per-step dispatch can hand a driver its own
/// sub-model carved out of the same operand table.
#[derive(Clone)]
pub struct Model {
    pub(crate) operands: Vec<Operand>,
    pub(crate) operations: Vec<Operation>,
    pub(crate) constants: Vec<u8>,
    pub(crate) pools: PoolRegistry,
    pub(crate) input_indices: Vec<u32>,
    pub(crate) output_indices: Vec<u32>,
    pub(crate) finalized: bool,
}

impl Model {
    pub(crate) fn empty() -> Self {
        Self {
            operands: Vec::new(),
            operations: Vec::new(),
            constants: Vec::new(),
            pools: PoolRegistry::new(),
            input_indices: Vec::new(),
            output_indices: Vec::new(),
            finalized: false,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn operand(&self, index: u32) -> Result<&Operand> {
        self.operands
            .get(index as usize)
            .ok_or_else(|| Error::bad_data(format!("operand index {index} out of range")))
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// Operations in declaration order before `finish()`, in run order
    /// after (spec §4.C: `sortIntoRunOrder` reorders in place).
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn operation(&self, index: usize) -> Result<&Operation> {
        self.operations
            .get(index)
            .ok_or_else(|| Error::bad_data(format!("operation index {index} out of range")))
    }

    pub fn constants(&self) -> &[u8] {
        &self.constants
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    pub fn pools_mut(&mut self) -> &mut PoolRegistry {
        &mut self.pools
    }

    pub fn input_indices(&self) -> &[u32] {
        &self.input_indices
    }

    pub fn output_indices(&self) -> &[u32] {
        &self.output_indices
    }

    pub fn input_operand(&self, position: usize) -> Result<&Operand> {
        let idx = *self
            .input_indices
            .get(position)
            .ok_or_else(|| Error::bad_data(format!("input position {position} out of range")))?;
        self.operand(idx)
    }

    pub fn output_operand(&self, position: usize) -> Result<&Operand> {
        let idx = *self
            .output_indices
            .get(position)
            .ok_or_else(|| Error::bad_data(format!("output position {position} out of range")))?;
        self.operand(idx)
    }

    /// A debug dump of the operand table and run order, grounded on the
    /// teacher's `cost::report`/`view` pretty-printers. Never load-bearing
    /// for execution — used by tests and the `demos/` binaries.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "model: {} operands, {} operations, finalized={}\n",
            self.operands.len(),
            self.operations.len(),
            self.finalized
        ));
        for (i, op) in self.operands.iter().enumerate() {
            out.push_str(&format!(
                "  operand[{i}]: {:?} {:?} lifetime={:?}\n",
                op.element_type, op.shape, op.lifetime
            ));
        }
        for (i, op) in self.operations.iter().enumerate() {
            out.push_str(&format!(
                "  op[{i}]: {:?} ins={:?} outs={:?}\n",
                op.kind, op.inputs, op.outputs
            ));
        }
        out
    }

    pub(crate) fn check_operand_budget(&self) -> Result<()> {
        if self.operands.len() >= MAX_OPERANDS {
            return Err(Error::bad_data("exceeded max operands"));
        }
        Ok(())
    }
}
