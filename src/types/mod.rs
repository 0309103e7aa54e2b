//! Core types shared by every layer of the runtime.
//!
//! - [`id`]: fiber identifiers
//! - [`cause`]: structured failure causes and defects
//! - [`exit`]: exits and the severity lattice
//! - [`value`]: the value marker trait and erased representation

pub mod cause;
pub mod exit;
pub mod id;
pub mod value;

pub use cause::{Cause, Defect};
pub use exit::{Exit, ExitKind};
pub use id::FiberId;
pub use value::{Never, Value};

pub(crate) use value::{erase, unerase, unit, AnyCause, AnyExit, AnyValue};
