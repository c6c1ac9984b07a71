//! Append-only construction operations (spec §4.C), grounded on
//! `ModelBuilder::{addOperand, setOperandValue, addOperation,
//! setInputsAndOutputs, finishTheModel}`.

use super::toposort::sort_into_run_order;
use super::Model;
use crate::config::MAX_OPERATIONS;
use crate::error::{Error, Result};
use crate::operand::{DataLocation, Lifetime, Operand, Operation, OpKind};
use crate::pool::PoolIndex;
use crate::types::{align_bytes_needed, ElementType, Shape};

/// Staged, append-only construction of a [`Model`]. Every method fails
/// with `BadState` once the model has been finalized.
pub struct ModelBuilder {
    model: Model,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            model: Model::empty(),
        }
    }

    fn require_not_finalized(&self, op: &str) -> Result<()> {
        if self.model.finalized {
            return Err(Error::bad_state(format!(
                "cannot {op}: model already finalized"
            )));
        }
        Ok(())
    }

    /// Append an operand, returning its dense index (spec §4.C).
    pub fn add_operand(&mut self, element_type: ElementType, shape: Shape) -> Result<u32> {
        self.require_not_finalized("add_operand")?;
        self.model.check_operand_budget()?;
        if !element_type.is_tensor() && shape.rank() != 0 {
            return Err(Error::bad_data("scalar element type with non-empty shape"));
        }
        let idx = self.model.operands.len() as u32;
        self.model.operands.push(Operand::new(element_type, shape));
        Ok(idx)
    }

    /// Like `add_operand`, but also sets quantization parameters. Only
    /// meaningful for `TensorQuant8Asymm`.
    pub fn add_quant8_operand(
        &mut self,
        shape: Shape,
        scale: f32,
        zero_point: i32,
    ) -> Result<u32> {
        if !(0..=255).contains(&zero_point) {
            return Err(Error::bad_data("quant8 zero_point out of [0,255]"));
        }
        if scale <= 0.0 {
            return Err(Error::bad_data("quant8 scale must be positive"));
        }
        let idx = self.add_operand(ElementType::TensorQuant8Asymm, shape)?;
        self.model.operands[idx as usize].quant =
            Some(crate::types::QuantParams::new(scale, zero_point));
        Ok(idx)
    }

    /// Mark operand `index` as a `NoValue` optional input (spec §3).
    pub fn set_operand_no_value(&mut self, index: u32) -> Result<()> {
        self.require_not_finalized("set_operand_no_value")?;
        let operand = self.operand_mut(index)?;
        operand.lifetime = Lifetime::NoValue;
        Ok(())
    }

    /// Copy `bytes` into the model's constant blob and mark the operand
    /// `ConstantCopy` (spec §4.C).
    pub fn set_operand_value(&mut self, index: u32, bytes: &[u8]) -> Result<()> {
        self.require_not_finalized("set_operand_value")?;
        let needed = self.operand(index)?.byte_size();
        if needed != bytes.len() as u64 {
            return Err(Error::bad_data(format!(
                "set_operand_value: expected {needed} bytes, got {}",
                bytes.len()
            )));
        }
        let existing = self.model.constants.len() as u32;
        let extra = align_bytes_needed(existing, bytes.len() as u64);
        let offset = existing + extra;
        self.model
            .constants
            .resize((offset as usize) + bytes.len(), 0);
        self.model.constants[offset as usize..offset as usize + bytes.len()]
            .copy_from_slice(bytes);

        let operand = self.operand_mut(index)?;
        operand.lifetime = Lifetime::ConstantCopy;
        operand.location = DataLocation::Inline {
            offset,
            length: bytes.len() as u32,
        };
        Ok(())
    }

    /// Mark operand `index` as backed by a pool region (spec §4.C).
    pub fn set_operand_value_from_pool(
        &mut self,
        index: u32,
        pool_index: PoolIndex,
        offset: u32,
        length: u32,
    ) -> Result<()> {
        self.require_not_finalized("set_operand_value_from_pool")?;
        let needed = self.operand(index)?.byte_size();
        if needed != length as u64 {
            return Err(Error::bad_data(format!(
                "set_operand_value_from_pool: expected {needed} bytes, got {length}"
            )));
        }
        self.model.pools.slice(pool_index, offset, length)?;
        let operand = self.operand_mut(index)?;
        operand.lifetime = Lifetime::ConstantReference;
        operand.location = DataLocation::Pool {
            pool_index,
            offset,
            length,
        };
        Ok(())
    }

    /// Append an operation, incrementing each input's consumer count
    /// (spec §4.C).
    pub fn add_operation(&mut self, kind: OpKind, inputs: Vec<u32>, outputs: Vec<u32>) -> Result<u32> {
        self.require_not_finalized("add_operation")?;
        if self.model.operations.len() >= MAX_OPERATIONS {
            return Err(Error::bad_data("exceeded max operations"));
        }
        if !kind.arity().accepts(inputs.len(), outputs.len()) {
            return Err(Error::bad_data(format!(
                "{kind:?} got {} inputs and {} outputs, which doesn't match its arity {:?}",
                inputs.len(),
                outputs.len(),
                kind.arity()
            )));
        }
        for &i in inputs.iter().chain(outputs.iter()) {
            self.operand(i)?;
        }
        for &o in &outputs {
            let operand = self.operand_mut(o)?;
            if operand.lifetime != Lifetime::ModelOutput {
                operand.lifetime = Lifetime::TemporaryVariable;
            }
        }
        let idx = self.model.operations.len() as u32;
        self.model.operations.push(Operation::new(kind, inputs.clone(), outputs));
        for i in inputs {
            self.operand_mut(i)?.consumer_count += 1;
        }
        Ok(idx)
    }

    /// Set the model's input/output operand index lists (spec §4.C).
    pub fn identify_inputs_and_outputs(&mut self, inputs: Vec<u32>, outputs: Vec<u32>) -> Result<()> {
        self.require_not_finalized("identify_inputs_and_outputs")?;
        for &i in &inputs {
            self.operand_mut(i)?.lifetime = Lifetime::ModelInput;
        }
        for &o in &outputs {
            self.operand_mut(o)?.lifetime = Lifetime::ModelOutput;
        }
        self.model.input_indices = inputs;
        self.model.output_indices = outputs;
        Ok(())
    }

    /// Finalize: validate structure, sort into run order, and lock the
    /// model (spec §4.C, §4.3).
    pub fn finish(mut self) -> Result<Model> {
        self.require_not_finalized("finish")?;
        self.validate_before_sort()?;
        sort_into_run_order(&mut self.model)?;
        self.model.finalized = true;
        Ok(self.model)
    }

    fn validate_before_sort(&self) -> Result<()> {
        for operand in &self.model.operands {
            if (operand.lifetime == Lifetime::ConstantCopy
                || operand.lifetime == Lifetime::ConstantReference)
                && operand.shape.has_wildcard()
            {
                return Err(Error::bad_data("constant operand has unresolved wildcard"));
            }
        }
        for operation in &self.model.operations {
            for &o in &operation.outputs {
                let lifetime = self.operand(o)?.lifetime;
                if lifetime != Lifetime::TemporaryVariable && lifetime != Lifetime::ModelOutput {
                    return Err(Error::bad_data(
                        "operation output must be TemporaryVariable or ModelOutput",
                    ));
                }
            }
        }
        Ok(())
    }

    fn operand(&self, index: u32) -> Result<&Operand> {
        self.model.operand(index)
    }

    fn operand_mut(&mut self, index: u32) -> Result<&mut Operand> {
        self.model
            .operands
            .get_mut(index as usize)
            .ok_or_else(|| Error::bad_data(format!("operand index {index} out of range")))
    }
}
