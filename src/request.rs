//! Request/Execution State (spec §4.F), grounded on
//! `original_source/nn/runtime/ExecutionBuilder.cpp`: callers bind
//! concrete buffers to a finalized model's inputs/outputs, `start_compute`
//! validates and packs them, then dispatches to the planned steps.

use crate::config::MAX_POOL_BYTES;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::pool::{PoolHandle, PoolIndex, PoolRegistry};
use crate::types::{align_bytes_needed, byte_size, Shape};

/// How one bound argument's bytes are supplied (spec §9 design note: a
/// tagged variant, not a sentinel-index scheme).
#[derive(Clone, Debug)]
pub enum ArgumentInfo {
    /// Not yet bound. Valid only for inputs the model marks `NoValue`.
    Unspecified,
    /// A direct caller-owned buffer, optionally with caller-supplied
    /// dimensions overriding the model's (for operands with wildcards).
    Pointer { bytes: Vec<u8>, dimensions: Option<Shape> },
    /// A region of an already-registered pool.
    Pool {
        pool_index: PoolIndex,
        offset: u32,
        length: u32,
        dimensions: Option<Shape>,
    },
}

impl ArgumentInfo {
    fn dimensions(&self) -> Option<&Shape> {
        match self {
            ArgumentInfo::Unspecified => None,
            ArgumentInfo::Pointer { dimensions, .. } => dimensions.as_ref(),
            ArgumentInfo::Pool { dimensions, .. } => dimensions.as_ref(),
        }
    }

    fn byte_len(&self) -> Option<u64> {
        match self {
            ArgumentInfo::Unspecified => None,
            ArgumentInfo::Pointer { bytes, .. } => Some(bytes.len() as u64),
            ArgumentInfo::Pool { length, .. } => Some(*length as u64),
        }
    }
}

/// One bound, ready-to-run invocation of a finalized [`Model`] (spec
/// §4.F).
pub struct Request<'a> {
    model: &'a Model,
    inputs: Vec<ArgumentInfo>,
    outputs: Vec<ArgumentInfo>,
    /// Pool created by `start_compute` to hold packed `Pointer` arguments,
    /// mirroring `allocatePointerArgumentsToPool`.
    pub(crate) input_pool: Option<PoolIndex>,
    /// A second, separate pool for packed `Pointer` outputs (spec §4.F step
    /// 2: inputs and outputs never share a pool, so a driver can't read an
    /// output region it was never given as an input).
    pub(crate) output_pool: Option<PoolIndex>,
    /// Output positions that were bound as `Pointer` before `start_compute`
    /// packed them into `output_pool`, so the result can be handed back to
    /// the caller in the same form it arrived in (spec §4.F step 5).
    pointer_output_positions: Vec<usize>,
    pub(crate) request_pools: PoolRegistry,
    pub(crate) preference: crate::planner::Preference,
}

impl<'a> Request<'a> {
    pub fn new(model: &'a Model) -> Self {
        let inputs = vec![ArgumentInfo::Unspecified; model.input_indices().len()];
        let outputs = vec![ArgumentInfo::Unspecified; model.output_indices().len()];
        Self {
            model,
            inputs,
            outputs,
            input_pool: None,
            output_pool: None,
            pointer_output_positions: Vec::new(),
            request_pools: PoolRegistry::new(),
            preference: crate::planner::Preference::default(),
        }
    }

    pub fn set_preference(&mut self, preference: crate::planner::Preference) {
        self.preference = preference;
    }

    pub fn set_input(&mut self, position: usize, bytes: Vec<u8>) -> Result<()> {
        self.set_input_with_dimensions(position, bytes, None)
    }

    pub fn set_input_with_dimensions(
        &mut self,
        position: usize,
        bytes: Vec<u8>,
        dimensions: Option<Shape>,
    ) -> Result<()> {
        let slot = self
            .inputs
            .get_mut(position)
            .ok_or_else(|| Error::bad_data(format!("input position {position} out of range")))?;
        *slot = ArgumentInfo::Pointer { bytes, dimensions };
        Ok(())
    }

    pub fn set_input_from_pool(
        &mut self,
        position: usize,
        pool_index: PoolIndex,
        offset: u32,
        length: u32,
    ) -> Result<()> {
        let slot = self
            .inputs
            .get_mut(position)
            .ok_or_else(|| Error::bad_data(format!("input position {position} out of range")))?;
        *slot = ArgumentInfo::Pool {
            pool_index,
            offset,
            length,
            dimensions: None,
        };
        Ok(())
    }

    pub fn set_output(&mut self, position: usize, bytes: Vec<u8>) -> Result<()> {
        let slot = self
            .outputs
            .get_mut(position)
            .ok_or_else(|| Error::bad_data(format!("output position {position} out of range")))?;
        *slot = ArgumentInfo::Pointer {
            bytes,
            dimensions: None,
        };
        Ok(())
    }

    pub fn inputs(&self) -> &[ArgumentInfo] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ArgumentInfo] {
        &self.outputs
    }

    pub fn model(&self) -> &Model {
        self.model
    }

    pub fn pools_mut(&mut self) -> &mut PoolRegistry {
        &mut self.request_pools
    }

    /// Resolve input `position`'s bytes, wherever they currently live.
    pub fn input_bytes(&self, position: usize) -> Result<&[u8]> {
        match self
            .inputs
            .get(position)
            .ok_or_else(|| Error::bad_data(format!("input position {position} out of range")))?
        {
            ArgumentInfo::Unspecified => Ok(&[]),
            ArgumentInfo::Pointer { bytes, .. } => Ok(bytes),
            ArgumentInfo::Pool {
                pool_index,
                offset,
                length,
                ..
            } => self.request_pools.slice(*pool_index, *offset, *length),
        }
    }

    /// A mutable view of output `position`'s destination buffer.
    pub fn output_bytes_mut(&mut self, position: usize) -> Result<&mut [u8]> {
        let arg = self
            .outputs
            .get_mut(position)
            .ok_or_else(|| Error::bad_data(format!("output position {position} out of range")))?;
        match arg {
            ArgumentInfo::Unspecified => Err(Error::bad_data("output is unspecified")),
            ArgumentInfo::Pointer { bytes, .. } => Ok(bytes.as_mut_slice()),
            ArgumentInfo::Pool {
                pool_index,
                offset,
                length,
                ..
            } => {
                let (pool_index, offset, length) = (*pool_index, *offset, *length);
                let region = self.request_pools.view_mut(pool_index)?;
                region
                    .get_mut(offset as usize..(offset + length) as usize)
                    .ok_or_else(|| Error::bad_data("pool output region out of range"))
            }
        }
    }

    /// Validate bound arguments, pack direct buffers into two fresh,
    /// request-owned pools — one for inputs, one for outputs — and return
    /// a request ready for the planner/executor to dispatch (spec §4.F
    /// steps 1-2). Packing inputs and outputs into separate pools means a
    /// driver handed this request's pools never sees a raw process
    /// pointer, and never sees an output region through what looks like
    /// an input.
    ///
    /// Step 2 compares each bound argument's dimensions against the
    /// *model's* declared dimensions for that operand, not against
    /// itself — the original implementation this is grounded on compared
    /// a caller-supplied override against its own freshly-computed value,
    /// which could never fail.
    pub fn start_compute(&mut self) -> Result<()> {
        self.validate_bound_arguments()?;
        self.pack_pointer_inputs()?;
        self.pack_pointer_outputs()?;
        Ok(())
    }

    fn validate_bound_arguments(&self) -> Result<()> {
        for (position, &operand_idx) in self.model.input_indices().iter().enumerate() {
            let operand = self.model.operand(operand_idx)?;
            let arg = &self.inputs[position];
            match arg {
                ArgumentInfo::Unspecified => {
                    if operand.lifetime != crate::operand::Lifetime::NoValue {
                        return Err(Error::bad_data(format!(
                            "input {position} is required but unspecified"
                        )));
                    }
                }
                _ => self.check_dimensions(operand_idx, arg)?,
            }
        }
        for (position, &operand_idx) in self.model.output_indices().iter().enumerate() {
            let arg = &self.outputs[position];
            if matches!(arg, ArgumentInfo::Unspecified) {
                return Err(Error::bad_data(format!(
                    "output {position} is required but unspecified"
                )));
            }
            self.check_dimensions(operand_idx, arg)?;
        }
        Ok(())
    }

    fn check_dimensions(&self, operand_idx: u32, arg: &ArgumentInfo) -> Result<()> {
        let operand = self.model.operand(operand_idx)?;
        if let Some(caller_dims) = arg.dimensions() {
            if !operand.shape.has_wildcard() && !caller_dims.same_shape(&operand.shape) {
                return Err(Error::bad_data(format!(
                    "operand {operand_idx}: caller dimensions {:?} don't match model dimensions {:?}",
                    caller_dims.dims(),
                    operand.shape.dims()
                )));
            }
        } else if !operand.shape.has_wildcard() {
            if let Some(len) = arg.byte_len() {
                let expected = byte_size(operand.element_type, &operand.shape);
                if len != expected {
                    return Err(Error::bad_data(format!(
                        "operand {operand_idx}: expected {expected} bytes, bound {len}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// `allocatePointerArgumentsToPool`: concatenate every direct
    /// `Pointer` input into one newly-created pool, respecting the
    /// alignment rule from §4.B, and rewrite those arguments to reference
    /// it by pool offset.
    fn pack_pointer_inputs(&mut self) -> Result<()> {
        let mut total: u64 = 0;
        let mut layout: Vec<(usize, u32, u32)> = Vec::new();
        for (position, arg) in self.inputs.iter().enumerate() {
            if let ArgumentInfo::Pointer { bytes, .. } = arg {
                let extra = align_bytes_needed(total as u32, bytes.len() as u64) as u64;
                total += extra;
                let offset = total as u32;
                total += bytes.len() as u64;
                if total > MAX_POOL_BYTES {
                    return Err(Error::bad_data("packed pointer-argument pool exceeds 2^32-1 bytes"));
                }
                layout.push((position, offset, bytes.len() as u32));
            }
        }
        if layout.is_empty() {
            return Ok(());
        }

        let mut packed = vec![0u8; total as usize];
        for (position, offset, length) in &layout {
            if let ArgumentInfo::Pointer { bytes, .. } = &self.inputs[*position] {
                packed[*offset as usize..*offset as usize + *length as usize]
                    .copy_from_slice(bytes);
            }
        }
        let pool_index = self
            .request_pools
            .register(PoolHandle::Owned(std::sync::Arc::new(packed)));
        self.input_pool = Some(pool_index);

        for (position, offset, length) in layout {
            let dimensions = match &self.inputs[position] {
                ArgumentInfo::Pointer { dimensions, .. } => dimensions.clone(),
                _ => None,
            };
            self.inputs[position] = ArgumentInfo::Pool {
                pool_index,
                offset,
                length,
                dimensions,
            };
        }
        Ok(())
    }

    /// The output half of `pack_pointer_inputs`: pack direct `Pointer`
    /// outputs into a pool of their own (never `input_pool`), so a driver
    /// writing its result only ever sees the pool region it was told
    /// about. Unlike inputs, there is nothing to copy in yet — the packed
    /// region starts zeroed and is filled in by whatever runs the request.
    fn pack_pointer_outputs(&mut self) -> Result<()> {
        let mut total: u64 = 0;
        let mut layout: Vec<(usize, u32, u32)> = Vec::new();
        for (position, arg) in self.outputs.iter().enumerate() {
            if let ArgumentInfo::Pointer { bytes, .. } = arg {
                let extra = align_bytes_needed(total as u32, bytes.len() as u64) as u64;
                total += extra;
                let offset = total as u32;
                total += bytes.len() as u64;
                if total > MAX_POOL_BYTES {
                    return Err(Error::bad_data("packed pointer-argument pool exceeds 2^32-1 bytes"));
                }
                layout.push((position, offset, bytes.len() as u32));
            }
        }
        if layout.is_empty() {
            return Ok(());
        }

        let packed = vec![0u8; total as usize];
        let pool_index = self
            .request_pools
            .register(PoolHandle::Owned(std::sync::Arc::new(packed)));
        self.output_pool = Some(pool_index);

        for (position, offset, length) in layout {
            let dimensions = match &self.outputs[position] {
                ArgumentInfo::Pointer { dimensions, .. } => dimensions.clone(),
                _ => None,
            };
            self.outputs[position] = ArgumentInfo::Pool {
                pool_index,
                offset,
                length,
                dimensions,
            };
            self.pointer_output_positions.push(position);
        }
        Ok(())
    }

    /// `copy_pointer_outputs_back` (spec §4.F step 5): after a request has
    /// run, pull every output that arrived as a direct `Pointer` back out
    /// of `output_pool` and restore it to `Pointer` form, so the caller
    /// gets their result back in the same shape they bound it in.
    pub(crate) fn copy_pointer_outputs_back(&mut self) -> Result<()> {
        let positions = self.pointer_output_positions.clone();
        for position in positions {
            let bytes = self.output_bytes_mut(position)?.to_vec();
            let dimensions = match &self.outputs[position] {
                ArgumentInfo::Pool { dimensions, .. } => dimensions.clone(),
                _ => None,
            };
            self.outputs[position] = ArgumentInfo::Pointer { bytes, dimensions };
        }
        Ok(())
    }
}
