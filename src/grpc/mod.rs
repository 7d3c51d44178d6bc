//! gRPC facade for prover connections.

mod service;

pub use service::AggregatorGrpcService;
