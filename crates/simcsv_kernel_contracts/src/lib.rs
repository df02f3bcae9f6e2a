#![forbid(unsafe_code)]

pub mod card;
pub mod common;
pub mod field;
pub mod identity;
pub mod outcome;

pub use common::{ContractViolation, ReasonCodeId, SchemaVersion, Validate};
