//! Configuration management
//!
//! Node settings: storage location, node identity, mining address and the
//! consensus constants (difficulty bits, subsidy, nonce bounds).

pub mod settings;

pub use settings::Config;
