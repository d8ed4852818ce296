//! Store boundary for spatial queries.
//!
//! The [`SpatialStore`] trait defines the read-only interface the
//! [`QueryClient`](crate::QueryClient) drives. Implementations return raw rows;
//! decoding happens in the core so every backend shares the same rules.

use std::error::Error as StdError;

use thiserror::Error;

use crate::entity::EntityId;
use crate::extent::{ExtentE7, MercatorEnvelope};
use crate::query::QueryContext;

mod memory;
mod rows;

pub use memory::{InMemoryStore, InMemoryStoreBuilder};
pub use rows::{GroupRow, PathRow, PointRow, RawTags};

/// Boxed error type carried by backend failures.
pub type BoxedError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure raised by a store query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query context was cancelled.
    #[error("query cancelled")]
    Cancelled,
    /// The query context deadline passed.
    #[error("query deadline exceeded")]
    DeadlineExceeded,
    /// A column held a value the store could not interpret.
    #[error("malformed value in column `{column}`")]
    MalformedColumn {
        /// Name of the offending column.
        column: String,
        /// Underlying parse error.
        #[source]
        source: BoxedError,
    },
    /// The backend failed to execute the query.
    #[error("spatial store query failed")]
    Backend {
        /// Underlying backend error.
        #[source]
        source: BoxedError,
    },
}

impl QueryError {
    /// Wrap a backend error.
    pub fn backend(source: impl Into<BoxedError>) -> Self {
        Self::Backend {
            source: source.into(),
        }
    }

    /// Wrap a column parse error.
    pub fn malformed(column: impl Into<String>, source: impl Into<BoxedError>) -> Self {
        Self::MalformedColumn {
            column: column.into(),
            source: source.into(),
        }
    }

    /// Whether the failure came from the query context rather than the store.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Read-only access to points, paths and groups.
///
/// Geometry predicates are evaluated by the store: points are matched on
/// their E7 coordinates and paths/groups on a precomputed Web Mercator
/// envelope. All bounds are inclusive.
///
/// ID slices passed to batch methods are non-empty, sorted and free of
/// duplicates. Row order is not significant.
///
/// Implementations should check `ctx` during long-running work and return
/// [`QueryError::Cancelled`] or [`QueryError::DeadlineExceeded`] when it is
/// interrupted.
///
/// # Examples
///
/// ```
/// use tessera_core::{Extent, InMemoryStore, PointRow, QueryContext, RawTags, SpatialStore};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryStore::builder()
///     .point(PointRow { id: 1, lat_e7: 10, lon_e7: 20, tags: RawTags::default() })
///     .build();
/// let extent = Extent::new(0.0, 1.0, 0.0, 1.0)?;
///
/// let rows = store.points_in_extent(&extent.to_e7(), &QueryContext::default())?;
/// assert_eq!(rows.len(), 1);
/// # Ok(())
/// # }
/// ```
pub trait SpatialStore {
    /// Points whose coordinate lies inside the extent.
    fn points_in_extent(
        &self,
        extent: &ExtentE7,
        ctx: &QueryContext,
    ) -> Result<Vec<PointRow>, QueryError>;

    /// Paths whose stored envelope intersects `envelope`.
    fn paths_intersecting(
        &self,
        envelope: &MercatorEnvelope,
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError>;

    /// Groups whose stored envelope intersects `envelope`.
    fn groups_intersecting(
        &self,
        envelope: &MercatorEnvelope,
        ctx: &QueryContext,
    ) -> Result<Vec<GroupRow>, QueryError>;

    /// Points with the given IDs. Unknown IDs are skipped.
    fn points_by_id(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PointRow>, QueryError>;

    /// Paths with the given IDs. Unknown IDs are skipped.
    fn paths_by_id(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError>;

    /// Paths that reference at least one of the given point IDs.
    fn paths_referencing_points(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError>;

    /// Groups with at least one path member among the given IDs.
    fn groups_referencing_paths(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<GroupRow>, QueryError>;
}

impl<S: SpatialStore + ?Sized> SpatialStore for &S {
    fn points_in_extent(
        &self,
        extent: &ExtentE7,
        ctx: &QueryContext,
    ) -> Result<Vec<PointRow>, QueryError> {
        (**self).points_in_extent(extent, ctx)
    }

    fn paths_intersecting(
        &self,
        envelope: &MercatorEnvelope,
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError> {
        (**self).paths_intersecting(envelope, ctx)
    }

    fn groups_intersecting(
        &self,
        envelope: &MercatorEnvelope,
        ctx: &QueryContext,
    ) -> Result<Vec<GroupRow>, QueryError> {
        (**self).groups_intersecting(envelope, ctx)
    }

    fn points_by_id(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PointRow>, QueryError> {
        (**self).points_by_id(ids, ctx)
    }

    fn paths_by_id(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError> {
        (**self).paths_by_id(ids, ctx)
    }

    fn paths_referencing_points(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError> {
        (**self).paths_referencing_points(ids, ctx)
    }

    fn groups_referencing_paths(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<GroupRow>, QueryError> {
        (**self).groups_referencing_paths(ids, ctx)
    }
}

/// Acquires a store handle for a single extraction.
///
/// The handle is owned by the extraction and released when it is dropped.
pub trait StoreConnector {
    /// Store handle produced by [`connect`](Self::connect).
    type Store: SpatialStore;
    /// Failure raised while acquiring the handle.
    type Error: StdError + Send + Sync + 'static;

    /// Open a new store handle.
    fn connect(&self) -> Result<Self::Store, Self::Error>;
}
