//! Common utilities and types shared across the repsync crates.
//!
//! This module provides the error type, the mutation kinds and payloads
//! recorded by the offline queue, and the request/response shapes passed
//! through the network layer.

pub mod error;
pub mod http;
pub mod types;

pub use error::{Error, Result};
pub use http::{HttpRequest, HttpResponse, Method, RequestMode};
pub use types::{
    Mutation, MutationId, MutationKind, SessionAction, SessionActionPayload, SetPayload,
    WeightLogPayload,
};
