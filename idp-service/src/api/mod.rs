//! # REST Transport Adapter
//!
//! Marshalling only: DTOs in, JSON out, client context extracted into
//! explicit values. All behavior lives in the service layer, shared
//! verbatim with the gRPC adapter.

pub mod client_info;
pub mod dto;
pub mod handlers;
pub mod routes;
