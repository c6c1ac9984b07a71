//! Shape inference (spec §4.G step 2), grounded on
//! `original_source/nn/common/operations/*.cpp`'s per-op `*Prepare`
//! functions.

use crate::error::{Error, Result};
use crate::types::Shape;

/// NumPy-style broadcast of two shapes (spec §4.G: ADD/MUL element-wise
/// ops broadcast trailing dimensions).
pub fn broadcast(a: &Shape, b: &Shape) -> Result<Shape> {
    let rank = a.rank().max(b.rank());
    let mut out = vec![0u32; rank];
    for i in 0..rank {
        let da = dim_from_end(a, i);
        let db = dim_from_end(b, i);
        out[rank - 1 - i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return Err(Error::bad_data("shapes are not broadcast-compatible")),
        };
    }
    Ok(Shape::new(out))
}

/// Dimension size `i` positions in from the right, or `1` past the
/// shape's own rank (the implicit broadcast padding).
fn dim_from_end(shape: &Shape, i: usize) -> u32 {
    if i < shape.rank() {
        shape.dims()[shape.rank() - 1 - i]
    } else {
        1
    }
}

/// CONCATENATION output shape: all inputs must agree on every axis except
/// `axis`, whose sizes sum.
pub fn concatenation(inputs: &[&Shape], axis: usize) -> Result<Shape> {
    let first = inputs
        .first()
        .ok_or_else(|| Error::bad_data("concatenation needs at least one input"))?;
    if axis >= first.rank() {
        return Err(Error::bad_data("concatenation axis out of range"));
    }
    let mut dims = first.dims().to_vec();
    let mut axis_total = dims[axis];
    for shape in &inputs[1..] {
        if shape.rank() != first.rank() {
            return Err(Error::bad_data("concatenation inputs must share rank"));
        }
        for (i, (&d, &want)) in shape.dims().iter().zip(dims.iter()).enumerate() {
            if i == axis {
                continue;
            }
            if d != want {
                return Err(Error::bad_data("concatenation inputs must agree off-axis"));
            }
        }
        axis_total += shape.dims()[axis];
    }
    dims[axis] = axis_total;
    Ok(Shape::new(dims))
}

/// FULLY_CONNECTED output shape: `[batch, num_units]` from an
/// `[batch, input_size]` input and an `[num_units, input_size]` weights
/// tensor.
pub fn fully_connected(input: &Shape, weights: &Shape) -> Result<Shape> {
    if input.rank() < 1 || weights.rank() != 2 {
        return Err(Error::bad_data("fully_connected expects rank>=1 input, rank-2 weights"));
    }
    let input_size = *input.dims().last().unwrap();
    let batch: u32 = input.dims()[..input.rank() - 1].iter().product::<u32>().max(1);
    if weights.dims()[1] != input_size {
        return Err(Error::bad_data("fully_connected input_size mismatch"));
    }
    Ok(Shape::new(vec![batch, weights.dims()[0]]))
}

/// `Same`/`Valid` padding as used by CONV_2D, DEPTHWISE_CONV_2D and the
/// pooling family (spec §4.G: "Convolution output size").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingMode {
    Same,
    Valid,
}

/// Per-side padding for one spatial dimension: `(before, after)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub before: u32,
    pub after: u32,
}

/// Output size of one spatial dimension under `padding`, plus the
/// padding split itself. `Same` rounds the output up to `in/stride`;
/// `Valid` has no implicit padding so the filter must fully fit.
/// Total padding is `max(0, (out-1)*stride + filter - in)`, with the
/// extra odd pixel (if any) placed on the trailing side.
pub fn conv_output_size(input: u32, filter: u32, stride: u32, mode: PaddingMode) -> Result<(u32, Padding)> {
    if stride == 0 {
        return Err(Error::bad_data("stride must be positive"));
    }
    let out = match mode {
        PaddingMode::Same => input.div_ceil(stride),
        PaddingMode::Valid => {
            if filter > input {
                return Err(Error::bad_data("filter larger than input under Valid padding"));
            }
            (input - filter + 1).div_ceil(stride)
        }
    };
    let needed = ((out.saturating_sub(1)) * stride + filter).saturating_sub(input);
    let before = needed / 2;
    let after = needed - before;
    Ok((out, Padding { before, after }))
}

/// Pooling output size (spec §4.G: "Pooling output size"): identical to
/// `conv_output_size` with the pool's filter dimension playing the
/// convolution filter's role.
pub fn pooling_output_size(input: u32, filter: u32, stride: u32, mode: PaddingMode) -> Result<(u32, Padding)> {
    conv_output_size(input, filter, stride, mode)
}

/// CONV_2D/DEPTHWISE_CONV_2D output shape for an NHWC input and an
/// `[out_channels, filter_h, filter_w, in_channels]` filter (or, for
/// depthwise, `[1, filter_h, filter_w, in_channels*multiplier]`).
pub fn conv2d(input: &Shape, filter: &Shape, stride: (u32, u32), mode: PaddingMode) -> Result<Shape> {
    if input.rank() != 4 || filter.rank() != 4 {
        return Err(Error::bad_data("conv2d expects rank-4 input and filter"));
    }
    let dims = input.dims();
    let (batch, in_h, in_w) = (dims[0], dims[1], dims[2]);
    let (out_h, _) = conv_output_size(in_h, filter.dims()[1], stride.0, mode)?;
    let (out_w, _) = conv_output_size(in_w, filter.dims()[2], stride.1, mode)?;
    Ok(Shape::new(vec![batch, out_h, out_w, filter.dims()[0]]))
}

/// DEPTHWISE_CONV_2D output shape and depth-multiplier check (spec
/// §4.G: "output depth = input depth × multiplier; filter's channel dim
/// must equal input depth × multiplier").
pub fn depthwise_conv2d(input: &Shape, filter: &Shape, stride: (u32, u32), multiplier: u32, mode: PaddingMode) -> Result<Shape> {
    if input.rank() != 4 || filter.rank() != 4 {
        return Err(Error::bad_data("depthwise_conv2d expects rank-4 input and filter"));
    }
    let dims = input.dims();
    let (batch, in_h, in_w, in_depth) = (dims[0], dims[1], dims[2], dims[3]);
    let out_depth = in_depth * multiplier;
    if filter.dims()[3] != out_depth {
        return Err(Error::bad_data("depthwise filter channel dim must equal input depth * multiplier"));
    }
    let (out_h, _) = conv_output_size(in_h, filter.dims()[1], stride.0, mode)?;
    let (out_w, _) = conv_output_size(in_w, filter.dims()[2], stride.1, mode)?;
    Ok(Shape::new(vec![batch, out_h, out_w, out_depth]))
}

/// AVG/MAX/L2_POOL_2D output shape for an NHWC input.
pub fn pool2d(input: &Shape, filter: (u32, u32), stride: (u32, u32), mode: PaddingMode) -> Result<Shape> {
    if input.rank() != 4 {
        return Err(Error::bad_data("pool2d expects rank-4 input"));
    }
    let dims = input.dims();
    let (out_h, _) = pooling_output_size(dims[1], filter.0, stride.0, mode)?;
    let (out_w, _) = pooling_output_size(dims[2], filter.1, stride.1, mode)?;
    Ok(Shape::new(vec![dims[0], out_h, out_w, dims[3]]))
}

/// RESHAPE output shape: caller-requested dims, with at most one `-1`
/// wildcard resolved against the input's element count.
pub fn reshape(input: &Shape, requested: &[i32]) -> Result<Shape> {
    let total = input.element_count();
    let wildcard_count = requested.iter().filter(|&&d| d == -1).count();
    if wildcard_count > 1 {
        return Err(Error::bad_data("reshape allows at most one -1 dimension"));
    }
    let known_product: i64 = requested.iter().filter(|&&d| d != -1).map(|&d| d as i64).product();
    let mut dims = Vec::with_capacity(requested.len());
    for &d in requested {
        if d == -1 {
            if known_product == 0 || total as i64 % known_product != 0 {
                return Err(Error::bad_data("reshape -1 dimension doesn't divide evenly"));
            }
            dims.push((total as i64 / known_product) as u32);
        } else if d < 0 {
            return Err(Error::bad_data("reshape dimension must be >= -1"));
        } else {
            dims.push(d as u32);
        }
    }
    let out = Shape::new(dims);
    if out.element_count() != total {
        return Err(Error::bad_data("reshape changes element count"));
    }
    Ok(out)
}
