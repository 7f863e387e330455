//! OData v4 client API
//!
//! Query compilation, batch encoding and the request policies (retry,
//! concurrency, paging, delta tracking, async operations) that run them
//! against a service.

pub mod async_ops;
pub mod client;
pub mod delta;
pub mod metadata;
pub mod operations;
pub mod query;
pub mod resilience;
pub mod transport;

pub use async_ops::{AsyncOperation, AsyncOutcome, PollStatus};
pub use client::{ODataClient, Tagged};
pub use delta::{DeltaResult, Removal};
pub use metadata::{EdmModel, EdmProvider, EdmType, EntityType};
pub use operations::{BatchFormat, BatchRequest, BatchResults, Operation};
pub use query::{Captures, Expr, Key, OrderBy, Query, QueryBuilder, ResponseEnvelope, field, lambda};
pub use resilience::{ResilienceConfig, RetryConfig};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport, TransportError};

/// A type that maps to an entity set
///
/// Implementing this lets [`QueryBuilder::for_entity`] classify property
/// paths structurally instead of guessing.
pub trait ODataEntity {
    const ENTITY_SET: &'static str;

    fn entity_type() -> EntityType;

    /// Model used for path classification; override to register related types
    fn edm_model() -> EdmModel {
        EdmModel::new().with_type(Self::entity_type())
    }
}
