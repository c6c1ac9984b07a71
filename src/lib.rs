//! tensorplan: a driver-brokered neural-network execution runtime core.
//!
//! Applications build a [`model`] graph of typed tensor operands and
//! operations, finalize it, then bind concrete buffers through a
//! [`request`] and dispatch it. The [`planner`] splits the graph across
//! whatever [`driver`]s are registered, falling back to the built-in
//! [`executor`] (a sequential CPU interpreter) for anything no driver
//! supports.

pub mod config;
pub mod diag;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod event;
pub mod executor;
pub mod model;
pub mod operand;
pub mod planner;
pub mod pool;
pub mod request;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use model::{Model, ModelBuilder};
pub use operand::{Lifetime, Operand, Operation, OpKind};
pub use planner::Preference;
pub use request::{ArgumentInfo, Request};
pub use types::ElementType;
