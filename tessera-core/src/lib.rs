//! Core domain types and the reference-closure engine for Tessera.
//!
//! An extraction takes a WGS84 [`Extent`], fetches the points, paths and
//! groups intersecting it from a [`SpatialStore`] and then fetches everything
//! those entities reference, so that a path leaving the box still has all of
//! its points. The result is a closed [`AreaData`].
//!
//! ```
//! use tessera_core::{Extent, InMemoryStore, PointRow, RawTags, data_from_extent};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryStore::builder()
//!     .point(PointRow { id: 1, lat_e7: 5_000_000, lon_e7: 5_000_000, tags: RawTags::default() })
//!     .build();
//! let area = data_from_extent(&store, &Extent::new(0.0, 1.0, 0.0, 1.0)?)?;
//! assert_eq!(area.counts().points, 1);
//! assert!(area.is_closed());
//! # Ok(())
//! # }
//! ```

pub mod area;
pub mod closure;
pub mod decode;
pub mod entity;
pub mod error;
pub mod extent;
pub mod extract;
pub mod query;
pub mod represent;
pub mod store;

#[doc(hidden)]
pub mod test_support;

pub use area::{AreaData, DanglingReferences, EntityCounts};
pub use closure::{ClosureDepth, ClosureEngine, ExtractionReport, ParseOptionError, SeedMode};
pub use decode::DecodeError;
pub use entity::{
    EntityId, EntityKind, GeometryPayload, Group, Member, MemberKind, Path, Point, Tags,
};
pub use error::{ExtractError, Stage};
pub use extent::{Extent, ExtentE7, ExtentError, MercatorEnvelope};
pub use extract::{
    ExtractOptions, Extraction, data_from_extent, data_from_extent_with, extract_with_connector,
};
pub use query::{QueryClient, QueryContext};
pub use represent::{DrawingValue, RenderGeometry, RenderItem, Scene, Style, represent};
pub use store::{
    BoxedError, GroupRow, InMemoryStore, InMemoryStoreBuilder, PathRow, PointRow, QueryError,
    RawTags, SpatialStore, StoreConnector,
};
