//! Library for `brisk`.
//!
//! This library is not intended to be used directly and is unsupported in
//! that configuration. It's only a library to enable sharing code in `brisk`
//! with integration tests in the `brisk` repository.

pub mod command;
pub mod config;
pub mod depfile;
pub mod digest;
pub mod pipeline;
pub mod report;
pub mod rule;
pub mod run;
pub mod schedule;
pub mod store;
