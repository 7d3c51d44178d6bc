//! Protocol buffer definitions for the prover wire protocol.

#![allow(clippy::all)]

include!("aggregator.v1.rs");
