#![forbid(unsafe_code)]

pub mod diff;
pub mod error;
pub mod field_engine;
pub mod identity;
pub mod pin;
pub mod pin_vault;
pub mod registry;
pub mod resolver;
pub mod validator;
pub mod width;

#[cfg(test)]
mod test_card;

pub use error::{ContextError, CredentialError, FieldError, FieldFailure, Severity};
pub use field_engine::{FieldEngine, FieldEngineConfig, ProcessedField};
pub use registry::FieldRegistry;
