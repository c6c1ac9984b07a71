//! Kernel bodies (spec §4.G step 4), grounded on
//! `original_source/nn/common/operations/{Add,Mul,Concatenation,
//! FullyConnected,Activation,SimpleMath,LSHProjection,EmbeddingLookup,
//! HashtableLookup}.cpp`. Each takes already-shape-checked byte buffers
//! and the relevant operand metadata, and returns the output bytes.

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::types::QuantParams;

fn f32_slice(bytes: &[u8]) -> &[f32] {
    bytemuck::cast_slice(bytes)
}

fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

fn pad_dims(dims: &[u32], rank: usize) -> Vec<u32> {
    let mut out = vec![1u32; rank - dims.len()];
    out.extend_from_slice(dims);
    out
}

fn broadcast_strides(dims: &[u32]) -> Vec<u64> {
    let mut strides = vec![0u64; dims.len()];
    let mut acc = 1u64;
    for i in (0..dims.len()).rev() {
        strides[i] = if dims[i] == 1 { 0 } else { acc };
        acc *= dims[i] as u64;
    }
    strides
}

/// Apply `op` element-wise over two operands broadcast to `out_dims`.
fn broadcast_binary_f32(
    a_dims: &[u32],
    a: &[f32],
    b_dims: &[u32],
    b: &[f32],
    out_dims: &[u32],
    op: impl Fn(f32, f32) -> f32 + Sync,
) -> Vec<f32> {
    let rank = out_dims.len();
    let a_strides = broadcast_strides(&pad_dims(a_dims, rank));
    let b_strides = broadcast_strides(&pad_dims(b_dims, rank));
    let total: u64 = out_dims.iter().map(|&d| d as u64).product();
    (0..total)
        .into_par_iter()
        .map(|flat| {
            let mut rem = flat;
            let mut idx = vec![0u32; rank];
            for i in 0..rank {
                let block: u64 = out_dims[i + 1..].iter().map(|&d| d as u64).product();
                let block = block.max(1);
                idx[i] = (rem / block) as u32;
                rem %= block;
            }
            let a_idx: u64 = idx.iter().zip(&a_strides).map(|(&i, &s)| i as u64 * s).sum();
            let b_idx: u64 = idx.iter().zip(&b_strides).map(|(&i, &s)| i as u64 * s).sum();
            op(a[a_idx as usize], b[b_idx as usize])
        })
        .collect()
}

pub fn add_f32(a_dims: &[u32], a: &[u8], b_dims: &[u32], b: &[u8], out_dims: &[u32]) -> Vec<u8> {
    f32_to_bytes(&broadcast_binary_f32(a_dims, f32_slice(a), b_dims, f32_slice(b), out_dims, |x, y| x + y))
}

pub fn mul_f32(a_dims: &[u32], a: &[u8], b_dims: &[u32], b: &[u8], out_dims: &[u32]) -> Vec<u8> {
    f32_to_bytes(&broadcast_binary_f32(a_dims, f32_slice(a), b_dims, f32_slice(b), out_dims, |x, y| x * y))
}

fn quant8_to_f32(bytes: &[u8], quant: &QuantParams) -> Vec<f32> {
    bytes.iter().map(|&b| quant.dequantize(b)).collect()
}

fn f32_to_quant8(values: &[f32], quant: &QuantParams) -> Vec<u8> {
    values.iter().map(|&v| quant.quantize(v)).collect()
}

/// A quant8 operand's shape, bytes, and quantization parameters, bundled
/// so the binary quant8 kernels don't need a seven-argument signature.
pub struct Quant8Operand<'a> {
    pub dims: &'a [u32],
    pub bytes: &'a [u8],
    pub quant: &'a QuantParams,
}

pub fn add_quant8(a: Quant8Operand, b: Quant8Operand, out_dims: &[u32], out_quant: &QuantParams) -> Vec<u8> {
    let af = quant8_to_f32(a.bytes, a.quant);
    let bf = quant8_to_f32(b.bytes, b.quant);
    let out = broadcast_binary_f32(a.dims, &af, b.dims, &bf, out_dims, |x, y| x + y);
    f32_to_quant8(&out, out_quant)
}

pub fn mul_quant8(a: Quant8Operand, b: Quant8Operand, out_dims: &[u32], out_quant: &QuantParams) -> Vec<u8> {
    let af = quant8_to_f32(a.bytes, a.quant);
    let bf = quant8_to_f32(b.bytes, b.quant);
    let out = broadcast_binary_f32(a.dims, &af, b.dims, &bf, out_dims, |x, y| x * y);
    f32_to_quant8(&out, out_quant)
}

/// Concatenate along `axis`, working on raw bytes since the layout is
/// identical regardless of element type (spec treats this as a byte
/// copy once shapes are validated).
pub fn concatenation(inputs: &[(&[u32], &[u8])], axis: usize, bytes_per_element: u32) -> Result<Vec<u8>> {
    let (first_dims, _) = inputs.first().ok_or_else(|| Error::bad_data("concatenation needs at least one input"))?;
    let rank = first_dims.len();
    let outer: u64 = first_dims[..axis].iter().map(|&d| d as u64).product();
    let inner: u64 = first_dims[axis + 1..].iter().map(|&d| d as u64).product();
    let element_size = bytes_per_element as u64;
    let mut out = Vec::new();
    for outer_idx in 0..outer {
        for (dims, bytes) in inputs {
            if dims.len() != rank {
                return Err(Error::bad_data("concatenation rank mismatch"));
            }
            let axis_len = dims[axis] as u64;
            let row_bytes = axis_len * inner * element_size;
            let start = outer_idx * row_bytes;
            out.extend_from_slice(&bytes[start as usize..(start + row_bytes) as usize]);
        }
    }
    Ok(out)
}

pub fn reshape(input: &[u8]) -> Vec<u8> {
    input.to_vec()
}

pub fn floor_f32(input: &[u8]) -> Vec<u8> {
    f32_to_bytes(&f32_slice(input).iter().map(|v| v.floor()).collect::<Vec<_>>())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Relu1,
    Relu6,
    Tanh,
    Logistic,
}

fn activation_f32(x: f32, activation: Activation) -> f32 {
    match activation {
        Activation::Relu => x.max(0.0),
        Activation::Relu1 => x.clamp(-1.0, 1.0),
        Activation::Relu6 => x.clamp(0.0, 6.0),
        Activation::Tanh => x.tanh(),
        Activation::Logistic => 1.0 / (1.0 + (-x).exp()),
    }
}

pub fn activation_float(input: &[u8], activation: Activation) -> Vec<u8> {
    f32_to_bytes(
        &f32_slice(input)
            .iter()
            .map(|&v| activation_f32(v, activation))
            .collect::<Vec<_>>(),
    )
}

pub fn activation_quant8(input: &[u8], in_quant: &QuantParams, activation: Activation, out_quant: &QuantParams) -> Vec<u8> {
    let values: Vec<f32> = quant8_to_f32(input, in_quant)
        .into_iter()
        .map(|v| activation_f32(v, activation))
        .collect();
    f32_to_quant8(&values, out_quant)
}

/// `out[b, u] = sum_k input[b, k] * weights[u, k] + bias[u]`, with an
/// optional fused activation applied in place (spec §4.G step 4).
pub fn fully_connected(
    input: &[u8],
    batch: usize,
    input_size: usize,
    weights: &[u8],
    num_units: usize,
    bias: &[u8],
    fused: Option<Activation>,
) -> Vec<u8> {
    let input = f32_slice(input);
    let weights = f32_slice(weights);
    let bias = f32_slice(bias);
    let mut out = vec![0f32; batch * num_units];
    for b in 0..batch {
        for u in 0..num_units {
            let mut acc = bias[u];
            for k in 0..input_size {
                acc += input[b * input_size + k] * weights[u * input_size + k];
            }
            out[b * num_units + u] = match fused {
                Some(act) => activation_f32(acc, act),
                None => acc,
            };
        }
    }
    f32_to_bytes(&out)
}

/// Gather rows of `values` (shape `[num_rows, row_len]`) by `lookups`
/// (i32 indices), producing `[num_lookups, row_len]`. Out-of-range
/// indices are reported as a `BadData` error (spec: the original treats
/// this as a logged failure; we surface it instead of writing zeros).
pub fn embedding_lookup(lookups: &[i32], values: &[u8], num_rows: usize, row_bytes: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(lookups.len() * row_bytes);
    for &idx in lookups {
        if idx < 0 || idx as usize >= num_rows {
            return Err(Error::bad_data(format!("embedding_lookup index {idx} out of range")));
        }
        let start = idx as usize * row_bytes;
        out.extend_from_slice(&values[start..start + row_bytes]);
    }
    Ok(out)
}

/// For each lookup key, find it in `keys` (linear scan, mirroring the
/// original's small-table assumption) and gather the matching row of
/// `values`; `hits[i]` is 1 if found, 0 otherwise (spec: a second output
/// reporting which lookups missed).
pub fn hashtable_lookup(
    lookups: &[i32],
    keys: &[i32],
    values: &[u8],
    row_bytes: usize,
) -> (Vec<u8>, Vec<u8>) {
    let mut out = vec![0u8; lookups.len() * row_bytes];
    let mut hits = vec![0u8; lookups.len()];
    for (i, &lookup) in lookups.iter().enumerate() {
        if let Some(row) = keys.iter().position(|&k| k == lookup) {
            let start = row * row_bytes;
            out[i * row_bytes..(i + 1) * row_bytes].copy_from_slice(&values[start..start + row_bytes]);
            hits[i] = 1;
        }
    }
    (out, hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_f32_broadcasts_bias_vector() {
        let a = f32_to_bytes(&[1.0, 2.0, 3.0, 4.0]);
        let b = f32_to_bytes(&[10.0, 20.0]);
        let out = add_f32(&[2, 2], &a, &[2], &b, &[2, 2]);
        assert_eq!(bytemuck::cast_slice::<u8, f32>(&out), &[11.0, 22.0, 13.0, 24.0]);
    }

    #[test]
    fn fully_connected_matmul_plus_bias() {
        let input = f32_to_bytes(&[1.0, 2.0]);
        let weights = f32_to_bytes(&[1.0, 0.0, 0.0, 1.0]);
        let bias = f32_to_bytes(&[0.5, 0.5]);
        let out = fully_connected(&input, 1, 2, &weights, 2, &bias, None);
        assert_eq!(bytemuck::cast_slice::<u8, f32>(&out), &[1.5, 2.5]);
    }

    #[test]
    fn embedding_lookup_gathers_rows() {
        let values = f32_to_bytes(&[0.0, 1.0, 10.0, 11.0, 20.0, 21.0]);
        let out = embedding_lookup(&[2, 0], &values, 3, 8).unwrap();
        assert_eq!(bytemuck::cast_slice::<u8, f32>(&out), &[20.0, 21.0, 0.0, 1.0]);
    }

    #[test]
    fn hashtable_lookup_reports_misses() {
        let values = f32_to_bytes(&[1.0, 2.0, 3.0]);
        let (out, hits) = hashtable_lookup(&[5, 7, 99], &[7, 9, 11], &values, 4);
        assert_eq!(hits, vec![0, 1, 0]);
        assert_eq!(bytemuck::cast_slice::<u8, f32>(&out[4..8]), &[1.0]);
    }

    #[test]
    fn relu_clamps_negative_values() {
        let input = f32_to_bytes(&[-1.0, 0.5, 3.0]);
        let out = activation_float(&input, Activation::Relu);
        assert_eq!(bytemuck::cast_slice::<u8, f32>(&out), &[0.0, 0.5, 3.0]);
    }
}
