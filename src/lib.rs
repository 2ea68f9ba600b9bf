pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod http;
pub mod parse;
pub mod query;
pub mod search;
pub mod transfer;
pub mod util;

pub use error::{ExitStatus, TransferError};
