//! Error plumbing and small utilities shared by the modsmith crates.

pub mod error;
pub mod hash;

pub use {
    error::FromMessage,
    hash::{digest_value, now_ms, sha256_hex},
};
