//! Operand Table & Type System (spec §4.B): the type algebra used
//! pervasively by the builder, planner, and executor.

use serde::{Deserialize, Serialize};

/// An operand's element type. Tensor variants carry a shape; scalar
/// variants do not (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    F32,
    I32,
    U32,
    TensorF32,
    TensorI32,
    TensorQuant8Asymm,
    /// OEM-defined element type, identified by vendor code.
    Oem(u32),
}

impl ElementType {
    /// True for types that carry a shape (as opposed to bare scalars).
    pub fn is_tensor(self) -> bool {
        matches!(
            self,
            ElementType::TensorF32 | ElementType::TensorI32 | ElementType::TensorQuant8Asymm
        )
    }

    /// Bytes per element (spec §4.B): 1 for quant8, 4 for everything else
    /// this runtime knows about. OEM types are assumed 4-byte until a
    /// driver's capability advertisement says otherwise.
    pub fn bytes_per_element(self) -> u32 {
        match self {
            ElementType::TensorQuant8Asymm => 1,
            _ => 4,
        }
    }
}

/// Quantization parameters for `TensorQuant8Asymm` operands (spec §3):
/// `real = (stored - zero_point) * scale`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantParams {
    pub fn new(scale: f32, zero_point: i32) -> Self {
        Self { scale, zero_point }
    }

    pub fn dequantize(&self, stored: u8) -> f32 {
        (stored as i32 - self.zero_point) as f32 * self.scale
    }

    pub fn quantize(&self, real: f32) -> u8 {
        let v = (real / self.scale).round() as i32 + self.zero_point;
        v.clamp(0, 255) as u8
    }
}

/// A tensor/scalar shape: an ordered sequence of dimension sizes. A zero
/// dimension is a wildcard permitted only before finalization (spec §3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Shape(pub Vec<u32>);

impl Shape {
    pub fn new(dims: impl Into<Vec<u32>>) -> Self {
        Self(dims.into())
    }

    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[u32] {
        &self.0
    }

    /// Product of dimensions; 1 for a rank-0 scalar (spec §4.B).
    pub fn element_count(&self) -> u64 {
        self.0.iter().map(|&d| d as u64).product()
    }

    /// True if any dimension is an unresolved wildcard.
    pub fn has_wildcard(&self) -> bool {
        self.0.contains(&0)
    }

    /// same-shape (spec §4.B): equal rank and pointwise-equal dimensions.
    /// Element type equality is checked by the caller, which has access
    /// to both operands' `ElementType`.
    pub fn same_shape(&self, other: &Shape) -> bool {
        self.0 == other.0
    }
}

/// `byte_size` (spec §4.B): `element_count * bytes_per_element(type)`.
pub fn byte_size(ty: ElementType, shape: &Shape) -> u64 {
    shape.element_count() * ty.bytes_per_element() as u64
}

/// Alignment helper (spec §4.B): pad bytes so a region of `length` starts
/// on a 1/2/4-byte boundary chosen by `length < 2 / < 4 / >= 4`, given the
/// current running `offset`.
pub fn align_bytes_needed(offset: u32, length: u64) -> u32 {
    let pattern: u32 = if length < 2 {
        0
    } else if length < 4 {
        1
    } else {
        3
    };
    (!(offset.wrapping_sub(1))) & pattern
}
