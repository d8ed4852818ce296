//! In-memory [`SpatialStore`] backed by R\*-trees.
//!
//! Points are indexed by their E7 coordinates and paths/groups by their Web
//! Mercator envelopes, mirroring the predicates a database-backed store
//! evaluates.

use std::collections::{BTreeMap, BTreeSet};

use rstar::{AABB, RTree, RTreeObject};

use super::{GroupRow, PathRow, PointRow, QueryError, SpatialStore};
use crate::entity::EntityId;
use crate::extent::{ExtentE7, MercatorEnvelope};
use crate::query::QueryContext;

#[derive(Debug, Clone, Copy, PartialEq)]
struct PointEntry {
    id: EntityId,
    // [lon_e7, lat_e7]
    position: [i64; 2],
}

impl RTreeObject for PointEntry {
    type Envelope = AABB<[i64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct EnvelopeEntry {
    id: EntityId,
    envelope: AABB<[f64; 2]>,
}

impl EnvelopeEntry {
    fn new(id: EntityId, envelope: &MercatorEnvelope) -> Self {
        Self {
            id,
            envelope: to_aabb(envelope),
        }
    }
}

impl RTreeObject for EnvelopeEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn to_aabb(envelope: &MercatorEnvelope) -> AABB<[f64; 2]> {
    AABB::from_corners(
        [envelope.min_x, envelope.min_y],
        [envelope.max_x, envelope.max_y],
    )
}

/// Spatial store holding every row in memory.
///
/// Build one with [`InMemoryStore::builder`]. Rows are immutable once the
/// store is built. When a row ID is added twice the first row is kept.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    points: BTreeMap<EntityId, PointRow>,
    paths: BTreeMap<EntityId, PathRow>,
    groups: BTreeMap<EntityId, GroupRow>,
    point_index: RTree<PointEntry>,
    path_index: RTree<EnvelopeEntry>,
    group_index: RTree<EnvelopeEntry>,
}

/// Builder for [`InMemoryStore`].
#[derive(Debug, Default)]
pub struct InMemoryStoreBuilder {
    points: BTreeMap<EntityId, PointRow>,
    paths: BTreeMap<EntityId, (PathRow, MercatorEnvelope)>,
    groups: BTreeMap<EntityId, (GroupRow, MercatorEnvelope)>,
}

impl InMemoryStoreBuilder {
    /// Add a point row.
    #[must_use]
    pub fn point(mut self, row: PointRow) -> Self {
        self.points.entry(row.id).or_insert(row);
        self
    }

    /// Add a path row with its precomputed envelope.
    #[must_use]
    pub fn path(mut self, row: PathRow, envelope: MercatorEnvelope) -> Self {
        self.paths.entry(row.id).or_insert((row, envelope));
        self
    }

    /// Add a group row with its precomputed envelope.
    #[must_use]
    pub fn group(mut self, row: GroupRow, envelope: MercatorEnvelope) -> Self {
        self.groups.entry(row.id).or_insert((row, envelope));
        self
    }

    /// Bulk-load the indices and return the store.
    pub fn build(self) -> InMemoryStore {
        let point_index = RTree::bulk_load(
            self.points
                .values()
                .map(|row| PointEntry {
                    id: row.id,
                    position: [row.lon_e7, row.lat_e7],
                })
                .collect(),
        );
        let path_index = RTree::bulk_load(
            self.paths
                .iter()
                .map(|(id, (_, envelope))| EnvelopeEntry::new(*id, envelope))
                .collect(),
        );
        let group_index = RTree::bulk_load(
            self.groups
                .iter()
                .map(|(id, (_, envelope))| EnvelopeEntry::new(*id, envelope))
                .collect(),
        );
        InMemoryStore {
            points: self.points,
            paths: self.paths.into_iter().map(|(id, (row, _))| (id, row)).collect(),
            groups: self.groups.into_iter().map(|(id, (row, _))| (id, row)).collect(),
            point_index,
            path_index,
            group_index,
        }
    }
}

impl InMemoryStore {
    /// Start building a store.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Number of rows held, as `(points, paths, groups)`.
    pub fn len(&self) -> (usize, usize, usize) {
        (self.points.len(), self.paths.len(), self.groups.len())
    }

    /// Whether the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.paths.is_empty() && self.groups.is_empty()
    }
}

fn rows_by_id<T: Clone>(rows: &BTreeMap<EntityId, T>, ids: &[EntityId]) -> Vec<T> {
    ids.iter().filter_map(|id| rows.get(id)).cloned().collect()
}

fn rows_in<'a, T: Clone + 'a>(
    rows: &BTreeMap<EntityId, T>,
    ids: impl Iterator<Item = &'a EntityId>,
) -> Vec<T> {
    // Sorting keeps output deterministic regardless of tree layout.
    let ids: BTreeSet<EntityId> = ids.copied().collect();
    ids.iter().filter_map(|id| rows.get(id)).cloned().collect()
}

impl SpatialStore for InMemoryStore {
    fn points_in_extent(
        &self,
        extent: &ExtentE7,
        ctx: &QueryContext,
    ) -> Result<Vec<PointRow>, QueryError> {
        ctx.check()?;
        let query = AABB::from_corners(
            [extent.lonmin, extent.latmin],
            [extent.lonmax, extent.latmax],
        );
        let hits = self.point_index.locate_in_envelope(&query).map(|e| &e.id);
        Ok(rows_in(&self.points, hits))
    }

    fn paths_intersecting(
        &self,
        envelope: &MercatorEnvelope,
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError> {
        ctx.check()?;
        let query = to_aabb(envelope);
        let hits = self
            .path_index
            .locate_in_envelope_intersecting(&query)
            .map(|e| &e.id);
        Ok(rows_in(&self.paths, hits))
    }

    fn groups_intersecting(
        &self,
        envelope: &MercatorEnvelope,
        ctx: &QueryContext,
    ) -> Result<Vec<GroupRow>, QueryError> {
        ctx.check()?;
        let query = to_aabb(envelope);
        let hits = self
            .group_index
            .locate_in_envelope_intersecting(&query)
            .map(|e| &e.id);
        Ok(rows_in(&self.groups, hits))
    }

    fn points_by_id(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PointRow>, QueryError> {
        ctx.check()?;
        Ok(rows_by_id(&self.points, ids))
    }

    fn paths_by_id(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError> {
        ctx.check()?;
        Ok(rows_by_id(&self.paths, ids))
    }

    fn paths_referencing_points(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError> {
        ctx.check()?;
        Ok(self
            .paths
            .values()
            .filter(|row| row.point_ids.iter().any(|id| ids.binary_search(id).is_ok()))
            .cloned()
            .collect())
    }

    fn groups_referencing_paths(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<GroupRow>, QueryError> {
        ctx.check()?;
        Ok(self
            .groups
            .values()
            .filter(|row| row.path_member_ids().any(|id| ids.binary_search(&id).is_ok()))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::Extent;
    use crate::store::RawTags;
    use geo::Coord;
    use rstest::{fixture, rstest};

    fn point(id: EntityId, lat_e7: i64, lon_e7: i64) -> PointRow {
        PointRow {
            id,
            lat_e7,
            lon_e7,
            tags: RawTags::default(),
        }
    }

    fn path(id: EntityId, point_ids: &[EntityId]) -> PathRow {
        PathRow {
            id,
            point_ids: point_ids.to_vec(),
            tags: RawTags::default(),
            geometry: None,
        }
    }

    fn envelope_of(coords: &[(f64, f64)]) -> MercatorEnvelope {
        MercatorEnvelope::around(coords.iter().map(|&(lon, lat)| Coord { x: lon, y: lat }))
            .expect("non-empty coordinates")
    }

    #[fixture]
    fn store() -> InMemoryStore {
        InMemoryStore::builder()
            .point(point(1, 5_000_000, 5_000_000))
            .point(point(2, 10_000_000, 10_000_000))
            .point(point(3, 20_000_000, 20_000_000))
            .path(path(10, &[1, 3]), envelope_of(&[(0.5, 0.5), (2.0, 2.0)]))
            .path(path(11, &[3]), envelope_of(&[(2.0, 2.0)]))
            .group(
                GroupRow {
                    id: 100,
                    members: vec!["w11".into(), "outer".into(), "n1".into(), String::new()],
                    tags: RawTags::default(),
                    geometry: None,
                },
                envelope_of(&[(2.0, 2.0)]),
            )
            .build()
    }

    fn ids<T>(rows: &[T], id: impl Fn(&T) -> EntityId) -> Vec<EntityId> {
        rows.iter().map(id).collect()
    }

    #[rstest]
    fn points_in_extent_include_boundary(store: InMemoryStore) {
        let extent = Extent::new(0.0, 1.0, 0.0, 1.0).expect("valid extent");
        let rows = store
            .points_in_extent(&extent.to_e7(), &QueryContext::default())
            .expect("query succeeds");
        assert_eq!(ids(&rows, |r| r.id), vec![1, 2]);
    }

    #[rstest]
    fn paths_intersect_by_envelope(store: InMemoryStore) {
        let extent = Extent::new(0.0, 1.0, 0.0, 1.0).expect("valid extent");
        let rows = store
            .paths_intersecting(&extent.to_web_mercator(), &QueryContext::default())
            .expect("query succeeds");
        assert_eq!(ids(&rows, |r| r.id), vec![10]);
    }

    #[rstest]
    fn groups_outside_envelope_are_skipped(store: InMemoryStore) {
        let extent = Extent::new(0.0, 1.0, 0.0, 1.0).expect("valid extent");
        let rows = store
            .groups_intersecting(&extent.to_web_mercator(), &QueryContext::default())
            .expect("query succeeds");
        assert!(rows.is_empty());
    }

    #[rstest]
    fn by_id_skips_unknown_ids(store: InMemoryStore) {
        let rows = store
            .points_by_id(&[2, 3, 99], &QueryContext::default())
            .expect("query succeeds");
        assert_eq!(ids(&rows, |r| r.id), vec![2, 3]);
    }

    #[rstest]
    fn reference_queries_follow_member_lists(store: InMemoryStore) {
        let ctx = QueryContext::default();
        let paths = store
            .paths_referencing_points(&[3], &ctx)
            .expect("query succeeds");
        assert_eq!(ids(&paths, |r| r.id), vec![10, 11]);

        let groups = store
            .groups_referencing_paths(&[11], &ctx)
            .expect("query succeeds");
        assert_eq!(ids(&groups, |r| r.id), vec![100]);
        assert!(
            store
                .groups_referencing_paths(&[10], &ctx)
                .expect("query succeeds")
                .is_empty()
        );
    }

    #[rstest]
    fn first_row_wins_on_duplicate_ids() {
        let store = InMemoryStore::builder()
            .point(point(1, 0, 0))
            .point(point(1, 7, 7))
            .build();
        let rows = store
            .points_by_id(&[1], &QueryContext::default())
            .expect("query succeeds");
        assert_eq!(rows, vec![point(1, 0, 0)]);
        assert_eq!(store.len(), (1, 0, 0));
    }

    #[rstest]
    fn cancelled_context_fails(store: InMemoryStore) {
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let ctx = QueryContext::default().with_cancellation(token);
        let err = store.points_by_id(&[1], &ctx).expect_err("cancelled");
        assert!(matches!(err, QueryError::Cancelled));
    }
}
