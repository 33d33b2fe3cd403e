#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Small building blocks shared by the tokengate crates.

#[cfg(feature = "humantime-serde")]
pub mod duration_serde;
mod secret_string;

pub use secret_string::SecretString;
