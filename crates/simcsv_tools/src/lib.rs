#![forbid(unsafe_code)]

pub mod logging;
pub mod program_cli;
pub mod vault_cli;
