#![forbid(unsafe_code)]

pub mod card_wait;
pub mod credential;
pub mod driver;
pub mod filter;
pub mod provision;

pub use provision::{
    FieldErrorPolicy, PassInput, PassReport, PreparedPass, ProvisionConfig, ProvisionError,
    ProvisionRuntime,
};
