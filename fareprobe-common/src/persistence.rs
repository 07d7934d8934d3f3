//! Seams to the document store.
//!
//! The pipeline only needs three capabilities from persistence: drawing a
//! random sample from the address corpus, appending route results, and
//! inserting direction payloads under a per-pair uniqueness constraint.
use crate::{AddressRecord, DirectionRecord, Result, RouteResult};
use async_trait::async_trait;

/// Read-only address corpus.
#[async_trait]
pub trait AddressCorpus: Send + Sync {
    /// Draw `size` distinct records uniformly at random.
    ///
    /// Implementations fail with [`crate::ProbeError::CorpusExhausted`] when
    /// the corpus holds fewer than `size` records.
    async fn sample(&self, size: usize) -> Result<Vec<AddressRecord>>;
}

/// Append-only sink for price results.
#[async_trait]
pub trait RouteSink: Send + Sync {
    async fn insert_route(&self, result: RouteResult) -> Result<()>;
}

/// Sink for direction payloads; at most one record per `(pickup, destination)`.
#[async_trait]
pub trait DirectionSink: Send + Sync {
    async fn insert_direction(&self, record: DirectionRecord) -> Result<()>;
}
