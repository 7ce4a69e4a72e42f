#![warn(missing_docs)]

//! vdisk management subsystem: configuration, CLI, JSON response envelope

pub mod cli;
pub mod config;
pub mod response;

pub use cli::{execute, open_engine, Cli, Command};
pub use config::VdiskConfig;
pub use response::{ApiResponse, ErrorBody};
