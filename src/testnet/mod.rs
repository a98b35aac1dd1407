//! Helpers for tests that need a real chain on disk
//!
//! Every helper builds its chain inside a fresh temporary directory at low
//! difficulty so tests stay isolated and fast.

pub mod test_utils;

pub use test_utils::*;
