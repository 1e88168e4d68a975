//! Common utilities for the siren emergency routing toolkit

pub mod error;

pub use error::{suggest_correction, Error, Result};
