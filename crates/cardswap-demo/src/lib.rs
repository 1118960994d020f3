//! cardswap demo - wires identity bootstrap, configuration and a loopback
//! exchange together behind a small CLI.

#![forbid(unsafe_code)]

pub mod cli;
pub mod file_store;
pub mod loopback;

pub use cli::{Cli, Commands};
pub use file_store::FileSecureStore;
