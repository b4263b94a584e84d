//! Code execution and test verification
//!
//! Runs untrusted submissions in a container sandbox or as local processes
//! and checks their output against expected results.

pub mod config;
pub mod error;
pub mod executor;
pub mod judger;
pub mod languages;
pub mod server;

pub use error::{Error, Result};
