//! Data model (spec §3): operands and operations as they live in a
//! [`crate::model::Model`]'s tables.

use serde::{Deserialize, Serialize};

use crate::pool::PoolIndex;
use crate::types::{ElementType, QuantParams, Shape};

/// Where an operand's bytes live (spec §9: a tagged variant rather than
/// sentinel pool indices like `0xFFFFFFFE`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DataLocation {
    /// Produced at run time; no storage until the executor allocates it.
    RunTime,
    /// Bytes live inline in the model's constant blob.
    Inline { offset: u32, length: u32 },
    /// Bytes live in a pool region.
    Pool {
        pool_index: PoolIndex,
        offset: u32,
        length: u32,
    },
}

/// An operand's lifetime class (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifetime {
    TemporaryVariable,
    ModelInput,
    ModelOutput,
    ConstantCopy,
    ConstantReference,
    NoValue,
}

/// One tensor (or scalar) node in the graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Operand {
    pub element_type: ElementType,
    pub shape: Shape,
    pub quant: Option<QuantParams>,
    pub lifetime: Lifetime,
    pub location: DataLocation,
    /// Number of operations that read this operand; fixed at finalization.
    pub consumer_count: u32,
}

impl Operand {
    pub fn new(element_type: ElementType, shape: Shape) -> Self {
        Self {
            element_type,
            shape,
            quant: None,
            lifetime: Lifetime::TemporaryVariable,
            location: DataLocation::RunTime,
            consumer_count: 0,
        }
    }

    pub fn with_quant(mut self, quant: QuantParams) -> Self {
        self.quant = Some(quant);
        self
    }

    pub fn byte_size(&self) -> u64 {
        crate::types::byte_size(self.element_type, &self.shape)
    }
}

/// The fixed op-kind tag set (spec §3). OEM ops carry a vendor code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Add,
    Conv2d,
    DepthwiseConv2d,
    AvgPool2d,
    MaxPool2d,
    L2Pool2d,
    Relu,
    Relu1,
    Relu6,
    Logistic,
    Tanh,
    Softmax,
    L2Normalization,
    LocalResponseNormalization,
    Reshape,
    ResizeBilinear,
    DepthToSpace,
    SpaceToDepth,
    Concatenation,
    FullyConnected,
    EmbeddingLookup,
    HashtableLookup,
    LshProjection,
    Rnn,
    Lstm,
    Svdf,
    Dequantize,
    Floor,
    Mul,
    Oem(u32),
}

/// An op kind's required input/output counts (spec §4.C: `add_operation`
/// fails with `BadData` when "counts match op's arity (op-specific)").
/// Grounded on `original_source/nn/runtime/test/TestValidateOperations.cpp`'s
/// per-op `OperationTestBase` input/output lists and
/// `original_source/nn/runtime/include/NeuralNetworks.h`'s per-op doc
/// comments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    /// Exactly `inputs` inputs and `outputs` outputs.
    Exact { inputs: usize, outputs: usize },
    /// At least `inputs` inputs (variadic tensor lists, or ops whose full
    /// attribute-operand list this core doesn't yet interpret) and
    /// exactly `outputs` outputs.
    AtLeast { inputs: usize, outputs: usize },
}

impl Arity {
    pub fn accepts(self, inputs: usize, outputs: usize) -> bool {
        match self {
            Arity::Exact { inputs: i, outputs: o } => inputs == i && outputs == o,
            Arity::AtLeast { inputs: i, outputs: o } => inputs >= i && outputs == o,
        }
    }
}

impl OpKind {
    /// The input/output counts `add_operation` enforces for this kind.
    ///
    /// ADD/MUL/FULLY_CONNECTED here omit the trailing `FuseCode` operand
    /// the original NNAPI surface appends, matching how this crate's own
    /// kernels already take a fused activation as a Rust-level parameter
    /// rather than a model operand (spec §4.G step 4).
    pub fn arity(self) -> Arity {
        use Arity::{AtLeast, Exact};
        match self {
            OpKind::Add | OpKind::Mul => Exact { inputs: 2, outputs: 1 },
            OpKind::Relu
            | OpKind::Relu1
            | OpKind::Relu6
            | OpKind::Tanh
            | OpKind::Logistic
            | OpKind::Floor
            | OpKind::Dequantize
            | OpKind::L2Normalization => Exact { inputs: 1, outputs: 1 },
            OpKind::Reshape
            | OpKind::EmbeddingLookup
            | OpKind::DepthToSpace
            | OpKind::SpaceToDepth
            | OpKind::Softmax => Exact { inputs: 2, outputs: 1 },
            OpKind::ResizeBilinear => Exact { inputs: 3, outputs: 1 },
            OpKind::FullyConnected => Exact { inputs: 3, outputs: 1 },
            OpKind::HashtableLookup => Exact { inputs: 3, outputs: 2 },
            OpKind::LocalResponseNormalization => Exact { inputs: 5, outputs: 1 },
            OpKind::Rnn => Exact { inputs: 6, outputs: 1 },
            OpKind::Concatenation => AtLeast { inputs: 2, outputs: 1 },
            // Implicit-padding CONV_2D/DEPTHWISE_CONV_2D/pooling variants are the
            // shortest legal operand lists; explicit padding adds more scalars.
            OpKind::Conv2d => AtLeast { inputs: 7, outputs: 1 },
            OpKind::DepthwiseConv2d => AtLeast { inputs: 8, outputs: 1 },
            OpKind::AvgPool2d | OpKind::MaxPool2d | OpKind::L2Pool2d => AtLeast { inputs: 7, outputs: 1 },
            OpKind::LshProjection => AtLeast { inputs: 3, outputs: 1 },
            OpKind::Svdf => AtLeast { inputs: 5, outputs: 1 },
            OpKind::Lstm => AtLeast { inputs: 8, outputs: 1 },
            // Vendor-defined; the core can't know their arity.
            OpKind::Oem(_) => AtLeast { inputs: 0, outputs: 1 },
        }
    }
}

/// A fused activation applied element-wise to a kernel's numeric output
/// before it is written (spec §4.G step 4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FusedActivation {
    #[default]
    None,
    Relu,
    Relu1,
    Relu6,
}

impl FusedActivation {
    pub fn apply_f32(self, x: f32) -> f32 {
        match self {
            FusedActivation::None => x,
            FusedActivation::Relu => x.max(0.0),
            FusedActivation::Relu1 => x.clamp(-1.0, 1.0),
            FusedActivation::Relu6 => x.clamp(0.0, 6.0),
        }
    }
}

/// A typed graph node that reads input operands and writes output
/// operands (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OpKind,
    pub inputs: Vec<u32>,
    pub outputs: Vec<u32>,
}

impl Operation {
    pub fn new(kind: OpKind, inputs: Vec<u32>, outputs: Vec<u32>) -> Self {
        Self {
            kind,
            inputs,
            outputs,
        }
    }
}
