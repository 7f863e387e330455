//! OData operations module
//!
//! Single reads and writes that can be executed individually or grouped
//! into batches and changesets.

pub mod batch;
pub mod batch_parser;
pub mod operation;

pub use batch::{BatchEntry, BatchFormat, BatchItem, BatchRequest, BatchRequestBuilder, Changeset, EncodedBatch};
pub use batch_parser::{BatchResponseParser, BatchResult, BatchResults};
pub use operation::{Operation, ResultShape};
