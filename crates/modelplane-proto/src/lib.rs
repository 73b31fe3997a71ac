//! # modelplane-proto: generated gRPC stubs
//!
//! `tonic-build` + `prost` generate these modules at build time from the
//! `.proto` files under `proto/`.

pub mod scheduler {
    tonic::include_proto!("modelplane.scheduler.v1");
}

pub mod agent {
    tonic::include_proto!("modelplane.agent.v1");
}

pub mod inference {
    tonic::include_proto!("modelplane.inference.v1");
}
