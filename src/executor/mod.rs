//! CPU Executor (spec §4.G), grounded on
//! `original_source/nn/common/CpuExecutor.cpp`: a sequential interpreter
//! over a finalized, run-ordered [`Model`] that tracks each operand's
//! remaining consumers and frees temporary buffers as soon as nothing
//! will read them again.

pub mod kernels;
pub mod shape;

use crate::diag::Diagnostics;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::operand::{DataLocation, Lifetime, OpKind, Operation};
use crate::request::Request;
use crate::types::{ElementType, QuantParams, Shape};
use kernels::Activation;

/// Per-operand scratch state while an executor walks a model. Kept
/// `pub(crate)` (with `buffer` exposed) so the plan dispatcher can carry
/// one of these tables across CPU and driver steps without losing
/// cross-step values between calls.
pub(crate) struct RunTimeOperandInfo {
    element_type: ElementType,
    shape: Shape,
    quant: Option<QuantParams>,
    lifetime: Lifetime,
    pub(crate) buffer: Option<Vec<u8>>,
    consumers_left: u32,
}

/// The built-in fallback backend: runs whatever operations a [`Model`]
/// assigns to it directly, without a driver.
pub struct CpuExecutor;

impl CpuExecutor {
    /// Run every operation in `model` in run order, binding `request`'s
    /// inputs/outputs (spec §4.G steps 1-5).
    pub fn run(model: &Model, request: &mut Request, diagnostics: &mut Diagnostics) -> Result<()> {
        Self::run_operations(model, model.operations(), request, diagnostics)
    }

    /// Run only the operations at `operation_indices`, as assigned to the
    /// CPU by a planner step (spec §4.E/§4.G): the other operands still
    /// come from the full model so cross-step constants resolve.
    pub fn run_subset(
        model: &Model,
        operation_indices: &[usize],
        request: &mut Request,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        let operations: Vec<Operation> = operation_indices
            .iter()
            .map(|&i| model.operation(i).cloned())
            .collect::<Result<_>>()?;
        Self::run_operations(model, &operations, request, diagnostics)
    }

    fn run_operations(
        model: &Model,
        operations: &[Operation],
        request: &mut Request,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        let mut infos = Self::initialize_runtime_info(model, request)?;
        for operation in operations {
            diagnostics.record(format!("cpu executor: running {:?}", operation.kind));
            Self::execute_operation(operation, &mut infos)?;
            Self::free_no_longer_used_operands(operation, &mut infos);
        }
        Self::write_back_outputs(model, request, &infos)?;
        request.copy_pointer_outputs_back()
    }

    pub(crate) fn initialize_runtime_info(model: &Model, request: &Request) -> Result<Vec<RunTimeOperandInfo>> {
        let mut infos: Vec<RunTimeOperandInfo> = model
            .operands()
            .iter()
            .map(|operand| RunTimeOperandInfo {
                element_type: operand.element_type,
                shape: operand.shape.clone(),
                quant: operand.quant,
                lifetime: operand.lifetime,
                buffer: None,
                consumers_left: operand.consumer_count,
            })
            .collect();

        for (idx, operand) in model.operands().iter().enumerate() {
            match operand.location {
                DataLocation::Inline { offset, length } => {
                    let bytes = model
                        .constants()
                        .get(offset as usize..(offset + length) as usize)
                        .ok_or_else(|| Error::bad_data("constant operand out of range"))?;
                    infos[idx].buffer = Some(bytes.to_vec());
                }
                DataLocation::Pool {
                    pool_index,
                    offset,
                    length,
                } => {
                    infos[idx].buffer = Some(model.pools().slice(pool_index, offset, length)?.to_vec());
                }
                DataLocation::RunTime => {}
            }
        }

        for (position, &operand_idx) in model.input_indices().iter().enumerate() {
            let bytes = request.input_bytes(position)?;
            if !bytes.is_empty() {
                infos[operand_idx as usize].buffer = Some(bytes.to_vec());
            }
        }
        Ok(infos)
    }

    pub(crate) fn write_back_outputs(model: &Model, request: &mut Request, infos: &[RunTimeOperandInfo]) -> Result<()> {
        for (position, &operand_idx) in model.output_indices().iter().enumerate() {
            let bytes = infos[operand_idx as usize]
                .buffer
                .as_ref()
                .ok_or_else(|| Error::op_failed("model output was never produced"))?;
            let dest = request.output_bytes_mut(position)?;
            if dest.len() != bytes.len() {
                return Err(Error::op_failed("produced output size doesn't match bound buffer"));
            }
            dest.copy_from_slice(bytes);
        }
        Ok(())
    }

    /// `freeNoLongerUsedOperands`: once every operation reading a
    /// `TemporaryVariable` has run, drop its buffer immediately rather
    /// than waiting for the whole request to finish.
    pub(crate) fn free_no_longer_used_operands(operation: &Operation, infos: &mut [RunTimeOperandInfo]) {
        for &input in &operation.inputs {
            let info = &mut infos[input as usize];
            if info.consumers_left > 0 {
                info.consumers_left -= 1;
            }
            if info.consumers_left == 0 && info.lifetime == Lifetime::TemporaryVariable {
                info.buffer = None;
            }
        }
    }

    pub(crate) fn execute_operation(operation: &Operation, infos: &mut [RunTimeOperandInfo]) -> Result<()> {
        match operation.kind {
            OpKind::Add => Self::binary_numeric(operation, infos, kernels::add_f32, kernels::add_quant8),
            OpKind::Mul => Self::binary_numeric(operation, infos, kernels::mul_f32, kernels::mul_quant8),
            OpKind::Relu => Self::activation(operation, infos, Activation::Relu),
            OpKind::Relu1 => Self::activation(operation, infos, Activation::Relu1),
            OpKind::Relu6 => Self::activation(operation, infos, Activation::Relu6),
            OpKind::Tanh => Self::activation(operation, infos, Activation::Tanh),
            OpKind::Logistic => Self::activation(operation, infos, Activation::Logistic),
            OpKind::Floor => Self::floor(operation, infos),
            OpKind::Reshape => Self::reshape(operation, infos),
            OpKind::Concatenation => Self::concatenation(operation, infos),
            OpKind::FullyConnected => Self::fully_connected(operation, infos),
            OpKind::EmbeddingLookup => Self::embedding_lookup(operation, infos),
            OpKind::HashtableLookup => Self::hashtable_lookup(operation, infos),
            other => Err(Error::op_failed(format!("kernel not implemented for {other:?}"))),
        }
    }

    fn buffer(infos: &[RunTimeOperandInfo], idx: u32) -> Result<&[u8]> {
        infos[idx as usize]
            .buffer
            .as_deref()
            .ok_or_else(|| Error::bad_data(format!("operand {idx} has no value at this point")))
    }

    fn binary_numeric(
        operation: &Operation,
        infos: &mut [RunTimeOperandInfo],
        float_kernel: impl Fn(&[u32], &[u8], &[u32], &[u8], &[u32]) -> Vec<u8>,
        quant_kernel: impl Fn(kernels::Quant8Operand, kernels::Quant8Operand, &[u32], &QuantParams) -> Vec<u8>,
    ) -> Result<()> {
        let [a, b] = operation.inputs[..] else {
            return Err(Error::bad_data("binary op expects exactly 2 inputs"));
        };
        let [out] = operation.outputs[..] else {
            return Err(Error::bad_data("binary op expects exactly 1 output"));
        };
        let a_dims = infos[a as usize].shape.dims().to_vec();
        let b_dims = infos[b as usize].shape.dims().to_vec();
        // ADD/MUL's prepare step (spec §4.G step 2): resolve the output
        // shape by broadcasting the operands, rather than trusting the
        // operand table's pre-declared shape, which may still carry a
        // wildcard dimension.
        let out_shape = shape::broadcast(&infos[a as usize].shape, &infos[b as usize].shape)?;
        let out_dims = out_shape.dims().to_vec();
        let a_bytes = Self::buffer(infos, a)?.to_vec();
        let b_bytes = Self::buffer(infos, b)?.to_vec();

        let result = if infos[out as usize].element_type == ElementType::TensorQuant8Asymm {
            let a_q = infos[a as usize].quant.ok_or_else(|| Error::bad_data("missing quant params"))?;
            let b_q = infos[b as usize].quant.ok_or_else(|| Error::bad_data("missing quant params"))?;
            let out_q = infos[out as usize].quant.ok_or_else(|| Error::bad_data("missing quant params"))?;
            quant_kernel(
                kernels::Quant8Operand { dims: &a_dims, bytes: &a_bytes, quant: &a_q },
                kernels::Quant8Operand { dims: &b_dims, bytes: &b_bytes, quant: &b_q },
                &out_dims,
                &out_q,
            )
        } else {
            float_kernel(&a_dims, &a_bytes, &b_dims, &b_bytes, &out_dims)
        };
        infos[out as usize].shape = out_shape;
        infos[out as usize].buffer = Some(result);
        Ok(())
    }

    fn activation(operation: &Operation, infos: &mut [RunTimeOperandInfo], kind: Activation) -> Result<()> {
        let [input] = operation.inputs[..] else {
            return Err(Error::bad_data("activation op expects exactly 1 input"));
        };
        let [out] = operation.outputs[..] else {
            return Err(Error::bad_data("activation op expects exactly 1 output"));
        };
        let bytes = Self::buffer(infos, input)?.to_vec();
        let result = if infos[out as usize].element_type == ElementType::TensorQuant8Asymm {
            let in_q = infos[input as usize].quant.ok_or_else(|| Error::bad_data("missing quant params"))?;
            let out_q = infos[out as usize].quant.ok_or_else(|| Error::bad_data("missing quant params"))?;
            kernels::activation_quant8(&bytes, &in_q, kind, &out_q)
        } else {
            kernels::activation_float(&bytes, kind)
        };
        infos[out as usize].shape = infos[input as usize].shape.clone();
        infos[out as usize].buffer = Some(result);
        Ok(())
    }

    fn floor(operation: &Operation, infos: &mut [RunTimeOperandInfo]) -> Result<()> {
        let [input] = operation.inputs[..] else {
            return Err(Error::bad_data("floor expects exactly 1 input"));
        };
        let [out] = operation.outputs[..] else {
            return Err(Error::bad_data("floor expects exactly 1 output"));
        };
        let bytes = Self::buffer(infos, input)?.to_vec();
        infos[out as usize].shape = infos[input as usize].shape.clone();
        infos[out as usize].buffer = Some(kernels::floor_f32(&bytes));
        Ok(())
    }

    fn reshape(operation: &Operation, infos: &mut [RunTimeOperandInfo]) -> Result<()> {
        let [input, dims_operand] = operation.inputs[..] else {
            return Err(Error::bad_data("reshape expects exactly 2 inputs"));
        };
        let [out] = operation.outputs[..] else {
            return Err(Error::bad_data("reshape expects exactly 1 output"));
        };
        let dims_bytes = Self::buffer(infos, dims_operand)?;
        let requested: &[i32] = bytemuck::cast_slice(dims_bytes);
        let new_shape = shape::reshape(&infos[input as usize].shape, requested)?;
        let bytes = Self::buffer(infos, input)?.to_vec();
        infos[out as usize].shape = new_shape;
        infos[out as usize].buffer = Some(kernels::reshape(&bytes));
        Ok(())
    }

    fn concatenation(operation: &Operation, infos: &mut [RunTimeOperandInfo]) -> Result<()> {
        let [out] = operation.outputs[..] else {
            return Err(Error::bad_data("concatenation expects exactly 1 output"));
        };
        let (&axis_operand, tensor_inputs) = operation
            .inputs
            .split_last()
            .ok_or_else(|| Error::bad_data("concatenation expects at least 1 tensor input"))?;
        let axis_value = {
            let bytes = Self::buffer(infos, axis_operand)?;
            bytemuck::cast_slice::<u8, i32>(bytes)[0] as usize
        };
        let shapes: Vec<Shape> = tensor_inputs.iter().map(|&i| infos[i as usize].shape.clone()).collect();
        let shape_refs: Vec<&Shape> = shapes.iter().collect();
        let new_shape = shape::concatenation(&shape_refs, axis_value)?;

        // Spec §4.G step 2: "For Quant8, all inputs must share scale and
        // zero_point" — the byte-copy kernel below has no way to rescale,
        // so a mismatch here would silently produce numerically wrong
        // output rather than fail.
        if infos[out as usize].element_type == ElementType::TensorQuant8Asymm {
            let out_quant = infos[out as usize].quant.ok_or_else(|| Error::bad_data("missing quant params"))?;
            for &i in tensor_inputs {
                let input_quant = infos[i as usize].quant.ok_or_else(|| Error::bad_data("missing quant params"))?;
                if input_quant.scale != out_quant.scale || input_quant.zero_point != out_quant.zero_point {
                    return Err(Error::bad_data(
                        "concatenation requires all quant8 inputs to share scale and zero_point",
                    ));
                }
            }
        }

        let bytes_per_element = infos[out as usize].element_type.bytes_per_element();
        let mut owned = Vec::with_capacity(tensor_inputs.len());
        for &i in tensor_inputs {
            owned.push((infos[i as usize].shape.dims().to_vec(), Self::buffer(infos, i)?.to_vec()));
        }
        let refs: Vec<(&[u32], &[u8])> = owned.iter().map(|(d, b)| (d.as_slice(), b.as_slice())).collect();
        let result = kernels::concatenation(&refs, axis_value, bytes_per_element)?;

        infos[out as usize].shape = new_shape;
        infos[out as usize].buffer = Some(result);
        Ok(())
    }

    fn fully_connected(operation: &Operation, infos: &mut [RunTimeOperandInfo]) -> Result<()> {
        let [input, weights, bias] = operation.inputs[..] else {
            return Err(Error::bad_data("fully_connected expects exactly 3 inputs"));
        };
        let [out] = operation.outputs[..] else {
            return Err(Error::bad_data("fully_connected expects exactly 1 output"));
        };
        let input_shape = infos[input as usize].shape.clone();
        let weights_shape = infos[weights as usize].shape.clone();
        let new_shape = shape::fully_connected(&input_shape, &weights_shape)?;
        let batch = *new_shape.dims().first().unwrap_or(&1) as usize;
        let num_units = *new_shape.dims().get(1).unwrap_or(&0) as usize;
        let input_size = *input_shape.dims().last().unwrap_or(&0) as usize;

        let input_bytes = Self::buffer(infos, input)?.to_vec();
        let weights_bytes = Self::buffer(infos, weights)?.to_vec();
        let bias_bytes = Self::buffer(infos, bias)?.to_vec();
        let result = kernels::fully_connected(&input_bytes, batch, input_size, &weights_bytes, num_units, &bias_bytes, None);

        infos[out as usize].shape = new_shape;
        infos[out as usize].buffer = Some(result);
        Ok(())
    }

    fn embedding_lookup(operation: &Operation, infos: &mut [RunTimeOperandInfo]) -> Result<()> {
        let [lookups, values] = operation.inputs[..] else {
            return Err(Error::bad_data("embedding_lookup expects exactly 2 inputs"));
        };
        let [out] = operation.outputs[..] else {
            return Err(Error::bad_data("embedding_lookup expects exactly 1 output"));
        };
        let values_shape = infos[values as usize].shape.clone();
        let num_rows = *values_shape.dims().first().ok_or_else(|| Error::bad_data("values must be at least rank 1"))? as usize;
        let row_elems: u32 = values_shape.dims()[1..].iter().product();
        let row_bytes = row_elems as usize * infos[values as usize].element_type.bytes_per_element() as usize;

        let lookups_bytes = Self::buffer(infos, lookups)?.to_vec();
        let lookups_i32: Vec<i32> = bytemuck::cast_slice(&lookups_bytes).to_vec();
        let values_bytes = Self::buffer(infos, values)?.to_vec();
        let result = kernels::embedding_lookup(&lookups_i32, &values_bytes, num_rows, row_bytes)?;

        let mut out_dims = vec![lookups_i32.len() as u32];
        out_dims.extend_from_slice(&values_shape.dims()[1..]);
        infos[out as usize].shape = Shape::new(out_dims);
        infos[out as usize].buffer = Some(result);
        Ok(())
    }

    fn hashtable_lookup(operation: &Operation, infos: &mut [RunTimeOperandInfo]) -> Result<()> {
        let [lookups, keys, values] = operation.inputs[..] else {
            return Err(Error::bad_data("hashtable_lookup expects exactly 3 inputs"));
        };
        let [out_values, out_hits] = operation.outputs[..] else {
            return Err(Error::bad_data("hashtable_lookup expects exactly 2 outputs"));
        };
        let values_shape = infos[values as usize].shape.clone();
        let row_elems: u32 = values_shape.dims()[1..].iter().product();
        let row_bytes = row_elems as usize * infos[values as usize].element_type.bytes_per_element() as usize;

        let lookups_bytes = Self::buffer(infos, lookups)?.to_vec();
        let lookups_i32: Vec<i32> = bytemuck::cast_slice(&lookups_bytes).to_vec();
        let keys_bytes = Self::buffer(infos, keys)?.to_vec();
        let keys_i32: Vec<i32> = bytemuck::cast_slice(&keys_bytes).to_vec();
        let values_bytes = Self::buffer(infos, values)?.to_vec();
        let (result, hits) = kernels::hashtable_lookup(&lookups_i32, &keys_i32, &values_bytes, row_bytes);

        let mut out_dims = vec![lookups_i32.len() as u32];
        out_dims.extend_from_slice(&values_shape.dims()[1..]);
        infos[out_values as usize].shape = Shape::new(out_dims);
        infos[out_values as usize].buffer = Some(result);
        infos[out_hits as usize].shape = Shape::new(vec![lookups_i32.len() as u32]);
        let hits_bytes_per_element = infos[out_hits as usize].element_type.bytes_per_element();
        infos[out_hits as usize].buffer = Some(widen_hits(&hits, hits_bytes_per_element));
        Ok(())
    }
}

/// Pack one-byte hit flags into the hits operand's declared element
/// width (spec: HASHTABLE_LOOKUP's second output is a tensor, not
/// necessarily byte-sized).
fn widen_hits(hits: &[u8], bytes_per_element: u32) -> Vec<u8> {
    if bytes_per_element == 1 {
        return hits.to_vec();
    }
    hits.iter().flat_map(|&h| (h as i32).to_ne_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;
    use crate::types::ElementType;

    #[test]
    fn add_two_tensors_end_to_end() {
        let mut b = ModelBuilder::new();
        let a = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let c = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let out = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        b.add_operation(OpKind::Add, vec![a, c], vec![out]).unwrap();
        b.identify_inputs_and_outputs(vec![a, c], vec![out]).unwrap();
        let model = b.finish().unwrap();

        let mut request = Request::new(&model);
        request.set_input(0, bytemuck::cast_slice(&[1.0f32, 2.0]).to_vec()).unwrap();
        request.set_input(1, bytemuck::cast_slice(&[10.0f32, 20.0]).to_vec()).unwrap();
        request.set_output(0, vec![0u8; 8]).unwrap();
        request.start_compute().unwrap();

        let mut diagnostics = Diagnostics::default();
        CpuExecutor::run(&model, &mut request, &mut diagnostics).unwrap();

        let result: &[f32] = bytemuck::cast_slice(request.output_bytes_mut(0).unwrap());
        assert_eq!(result, &[11.0, 22.0]);
        assert!(!diagnostics.lines().is_empty());
    }

    #[test]
    fn temporary_buffer_is_freed_after_last_consumer() {
        let mut b = ModelBuilder::new();
        let a = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let mid = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let out = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        b.add_operation(OpKind::Relu, vec![a], vec![mid]).unwrap();
        b.add_operation(OpKind::Tanh, vec![mid], vec![out]).unwrap();
        b.identify_inputs_and_outputs(vec![a], vec![out]).unwrap();
        let model = b.finish().unwrap();

        let mut request = Request::new(&model);
        request.set_input(0, bytemuck::cast_slice(&[-1.0f32, 2.0]).to_vec()).unwrap();
        request.set_output(0, vec![0u8; 8]).unwrap();
        request.start_compute().unwrap();

        let mut diagnostics = Diagnostics::default();
        let infos = CpuExecutor::initialize_runtime_info(&model, &request).unwrap();
        assert_eq!(infos[mid as usize].consumers_left, 1);
        CpuExecutor::run(&model, &mut request, &mut diagnostics).unwrap();
    }

    #[test]
    fn unimplemented_kernel_reports_op_failed() {
        let mut b = ModelBuilder::new();
        let a = b.add_operand(ElementType::TensorF32, Shape::new(vec![1, 2, 2, 1])).unwrap();
        let filter = b.add_operand(ElementType::TensorF32, Shape::new(vec![1, 2, 2, 1])).unwrap();
        b.set_operand_value(filter, bytemuck::cast_slice(&[0.0f32; 4])).unwrap();
        let bias = b.add_operand(ElementType::TensorF32, Shape::new(vec![1])).unwrap();
        b.set_operand_value(bias, bytemuck::cast_slice(&[0.0f32])).unwrap();
        let pad = b.add_operand(ElementType::I32, Shape::new(vec![])).unwrap();
        b.set_operand_value(pad, bytemuck::cast_slice(&[0i32])).unwrap();
        let stride_w = b.add_operand(ElementType::I32, Shape::new(vec![])).unwrap();
        b.set_operand_value(stride_w, bytemuck::cast_slice(&[1i32])).unwrap();
        let stride_h = b.add_operand(ElementType::I32, Shape::new(vec![])).unwrap();
        b.set_operand_value(stride_h, bytemuck::cast_slice(&[1i32])).unwrap();
        let activation = b.add_operand(ElementType::I32, Shape::new(vec![])).unwrap();
        b.set_operand_value(activation, bytemuck::cast_slice(&[0i32])).unwrap();
        let out = b.add_operand(ElementType::TensorF32, Shape::new(vec![1, 2, 2, 1])).unwrap();
        b.add_operation(
            OpKind::Conv2d,
            vec![a, filter, bias, pad, stride_w, stride_h, activation],
            vec![out],
        )
        .unwrap();
        b.identify_inputs_and_outputs(vec![a], vec![out]).unwrap();
        let model = b.finish().unwrap();

        let mut request = Request::new(&model);
        request.set_input(0, vec![0u8; 16]).unwrap();
        request.set_output(0, vec![0u8; 16]).unwrap();
        request.start_compute().unwrap();

        let mut diagnostics = Diagnostics::default();
        let err = CpuExecutor::run(&model, &mut request, &mut diagnostics).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::OpFailed);
    }
}
