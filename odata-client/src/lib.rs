//! Client library for OData v4 services

pub mod api;
pub mod cli;
pub mod config;
pub mod error;

pub use api::{ODataClient, Operation, Query, QueryBuilder};
pub use config::ClientConfig;
pub use error::{ODataError, Result};
