//! Single-call extraction entry points.

use log::info;

use crate::area::AreaData;
use crate::closure::{ClosureDepth, ClosureEngine, ExtractionReport, SeedMode};
use crate::error::ExtractError;
use crate::extent::{Extent, ExtentError};
use crate::query::{QueryClient, QueryContext};
use crate::store::{SpatialStore, StoreConnector};

/// Tuning knobs for an extraction.
///
/// The default seeds by geometry, runs the bounded closure, applies no
/// margin and never times out.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// How paths and groups are seeded.
    pub seed_mode: SeedMode,
    /// How far reference discovery goes.
    pub depth: ClosureDepth,
    /// Relative enlargement applied to the extent before seeding.
    pub margin: Option<f64>,
    /// Deadline and cancellation applied to every store call.
    pub context: QueryContext,
}

impl ExtractOptions {
    /// Set the seed mode.
    #[must_use]
    pub fn with_seed_mode(mut self, seed_mode: SeedMode) -> Self {
        self.seed_mode = seed_mode;
        self
    }

    /// Set the closure depth.
    #[must_use]
    pub fn with_depth(mut self, depth: ClosureDepth) -> Self {
        self.depth = depth;
        self
    }

    /// Enlarge the extent by `factor` before seeding.
    #[must_use]
    pub fn with_margin(mut self, factor: f64) -> Self {
        self.margin = Some(factor);
        self
    }

    /// Set the query context.
    #[must_use]
    pub fn with_context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }

    /// Extent actually queried for `extent`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtentError::NonFiniteMargin`] when the margin is NaN or
    /// infinite.
    pub fn query_extent(&self, extent: &Extent) -> Result<Extent, ExtentError> {
        self.margin
            .map_or(Ok(*extent), |factor| extent.enlarged(factor))
    }
}

/// Closed area together with its run summary.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Extraction {
    /// The closed working set.
    pub area: AreaData,
    /// Counts and dangling references for the run.
    pub report: ExtractionReport,
}

/// Extract every entity intersecting `extent` together with everything they
/// reference.
///
/// Runs the seed, point completion and group completion stages with default
/// [`ExtractOptions`].
///
/// # Errors
///
/// Returns [`ExtractError`] when any store call or row decode fails. No
/// partial result is produced.
///
/// # Examples
///
/// ```
/// use tessera_core::{Extent, InMemoryStore, PathRow, PointRow, RawTags, data_from_extent};
/// use tessera_core::MercatorEnvelope;
/// use geo::Coord;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let inside = PointRow { id: 1, lat_e7: 5_000_000, lon_e7: 5_000_000, tags: RawTags::default() };
/// let outside = PointRow { id: 2, lat_e7: 20_000_000, lon_e7: 20_000_000, tags: RawTags::default() };
/// let path = PathRow { id: 10, point_ids: vec![1, 2], tags: RawTags::default(), geometry: None };
/// let envelope = MercatorEnvelope::around([Coord { x: 0.5, y: 0.5 }, Coord { x: 2.0, y: 2.0 }])
///     .ok_or("empty envelope")?;
/// let store = InMemoryStore::builder()
///     .point(inside)
///     .point(outside)
///     .path(path, envelope)
///     .build();
///
/// let area = data_from_extent(&store, &Extent::new(0.0, 1.0, 0.0, 1.0)?)?;
/// assert!(area.point(2).is_some());
/// assert!(area.is_closed());
/// # Ok(())
/// # }
/// ```
pub fn data_from_extent<S: SpatialStore>(
    store: S,
    extent: &Extent,
) -> Result<AreaData, ExtractError> {
    data_from_extent_with(store, extent, ExtractOptions::default()).map(|e| e.area)
}

/// Like [`data_from_extent`] with explicit options, also returning the run
/// report.
///
/// # Errors
///
/// Returns [`ExtractError`] when any store call or row decode fails, or when
/// the options' context is cancelled or expires. A non-finite margin is
/// [`ExtractError::Margin`] and no store call is made.
pub fn data_from_extent_with<S: SpatialStore>(
    store: S,
    extent: &Extent,
    options: ExtractOptions,
) -> Result<Extraction, ExtractError> {
    let query_extent = options
        .query_extent(extent)
        .map_err(|source| ExtractError::Margin { source })?;
    let client = QueryClient::new(store, options.context);
    let engine = ClosureEngine::new(&client, options.seed_mode, options.depth);
    let (area, report) = engine.run(&query_extent)?;
    info!(
        "extracted {} points, {} paths, {} groups ({} completed) in {} store calls",
        area.counts().points,
        area.counts().paths,
        area.counts().groups,
        report.completed.total(),
        report.store_calls
    );
    Ok(Extraction { area, report })
}

/// Acquire a store handle from `connector`, run the extraction and release the
/// handle.
///
/// The handle is dropped before this function returns, on success and on
/// every error path.
///
/// # Errors
///
/// Returns [`ExtractError::Connect`] when the handle cannot be acquired and
/// otherwise the errors of [`data_from_extent_with`].
pub fn extract_with_connector<C: StoreConnector>(
    connector: &C,
    extent: &Extent,
    options: ExtractOptions,
) -> Result<Extraction, ExtractError> {
    let store = connector.connect().map_err(|source| ExtractError::Connect {
        source: Box::new(source),
    })?;
    data_from_extent_with(store, extent, options)
}
