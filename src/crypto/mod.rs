//! Cryptographic helpers for the commit-reveal protocol.

mod hash;

pub use hash::*;
