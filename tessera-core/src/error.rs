//! Extraction failures.

use std::fmt;

use thiserror::Error;

use crate::decode::DecodeError;
use crate::entity::EntityKind;
use crate::extent::ExtentError;
use crate::store::{BoxedError, QueryError};

/// Step of the extraction that was running when a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Initial fetch of entities inside the extent.
    Seed,
    /// Fetch of points referenced by paths.
    PointCompletion,
    /// Fetch of paths referenced by groups.
    GroupPathCompletion,
    /// Fetch of points referenced by groups or newly added paths.
    GroupPointCompletion,
    /// Transitive search for groups referencing newly added paths.
    GroupDiscovery,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Seed => "seed",
            Self::PointCompletion => "point completion",
            Self::GroupPathCompletion => "group path completion",
            Self::GroupPointCompletion => "group point completion",
            Self::GroupDiscovery => "group discovery",
        })
    }
}

/// Errors returned by an extraction.
///
/// No partial result accompanies an error.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// A store query failed.
    #[error("{stage} stage failed to query {kind}s")]
    Query {
        /// Stage that issued the query.
        stage: Stage,
        /// Entity kind being fetched.
        kind: EntityKind,
        /// Underlying query failure.
        #[source]
        source: QueryError,
    },
    /// A fetched row could not be decoded.
    #[error("{stage} stage failed to decode a {kind}")]
    Decode {
        /// Stage that fetched the row.
        stage: Stage,
        /// Entity kind being decoded.
        kind: EntityKind,
        /// Underlying decode failure.
        #[source]
        source: DecodeError,
    },
    /// The margin could not be applied to the requested extent.
    #[error("invalid margin for the requested extent")]
    Margin {
        /// Rejected enlargement.
        #[source]
        source: ExtentError,
    },
    /// Acquiring a store handle failed.
    #[error("failed to connect to the spatial store")]
    Connect {
        /// Connector failure.
        #[source]
        source: BoxedError,
    },
}

impl ExtractError {
    /// Stage that failed, when the failure happened inside the engine.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Query { stage, .. } | Self::Decode { stage, .. } => Some(*stage),
            Self::Margin { .. } | Self::Connect { .. } => None,
        }
    }

    /// Whether the extraction stopped because its context was cancelled or
    /// expired.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Query { source, .. } if source.is_interruption())
    }
}
