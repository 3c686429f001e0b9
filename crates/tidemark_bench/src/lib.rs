//! Shared helpers for the tidemark benchmarks.

#![deny(unsafe_code)]

pub mod utils;
