//! Store fixtures and a call-recording store used by unit and behaviour
//! tests.

use std::cell::RefCell;

use geo::Coord;
use thiserror::Error;

use crate::decode::decode_member;
use crate::entity::{EntityId, MemberKind};
use crate::extent::{ExtentE7, MercatorEnvelope, degrees_to_e7, e7_to_degrees, project};
use crate::query::QueryContext;
use crate::store::{
    GroupRow, InMemoryStore, PathRow, PointRow, QueryError, RawTags, SpatialStore,
};

/// Store method recorded by [`CountingStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// [`SpatialStore::points_in_extent`].
    PointsInExtent,
    /// [`SpatialStore::paths_intersecting`].
    PathsIntersecting,
    /// [`SpatialStore::groups_intersecting`].
    GroupsIntersecting,
    /// [`SpatialStore::points_by_id`].
    PointsById,
    /// [`SpatialStore::paths_by_id`].
    PathsById,
    /// [`SpatialStore::paths_referencing_points`].
    PathsReferencingPoints,
    /// [`SpatialStore::groups_referencing_paths`].
    GroupsReferencingPaths,
}

impl CallKind {
    /// Whether the call is a geometry predicate rather than an ID batch.
    pub const fn is_geometry(self) -> bool {
        matches!(
            self,
            Self::PointsInExtent | Self::PathsIntersecting | Self::GroupsIntersecting
        )
    }
}

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    /// Method invoked.
    pub kind: CallKind,
    /// ID batch passed, empty for geometry calls.
    pub ids: Vec<EntityId>,
}

/// Failure returned by [`CountingStore::failing_on`].
#[derive(Debug, Error)]
#[error("injected failure on {0:?}")]
pub struct InjectedFailure(pub CallKind);

/// [`InMemoryStore`] wrapper recording every call it receives.
#[derive(Debug, Default)]
pub struct CountingStore {
    inner: InMemoryStore,
    calls: RefCell<Vec<StoreCall>>,
    fail_on: Option<CallKind>,
}

impl CountingStore {
    /// Wrap `inner`.
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            calls: RefCell::new(Vec::new()),
            fail_on: None,
        }
    }

    /// Fail every call of `kind` with a backend error, after recording it.
    #[must_use]
    pub fn failing_on(mut self, kind: CallKind) -> Self {
        self.fail_on = Some(kind);
        self
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.borrow().clone()
    }

    fn record(&self, kind: CallKind, ids: &[EntityId]) -> Result<(), QueryError> {
        self.calls.borrow_mut().push(StoreCall {
            kind,
            ids: ids.to_vec(),
        });
        if self.fail_on == Some(kind) {
            return Err(QueryError::backend(InjectedFailure(kind)));
        }
        Ok(())
    }
}

impl SpatialStore for CountingStore {
    fn points_in_extent(
        &self,
        extent: &ExtentE7,
        ctx: &QueryContext,
    ) -> Result<Vec<PointRow>, QueryError> {
        self.record(CallKind::PointsInExtent, &[])?;
        self.inner.points_in_extent(extent, ctx)
    }

    fn paths_intersecting(
        &self,
        envelope: &MercatorEnvelope,
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError> {
        self.record(CallKind::PathsIntersecting, &[])?;
        self.inner.paths_intersecting(envelope, ctx)
    }

    fn groups_intersecting(
        &self,
        envelope: &MercatorEnvelope,
        ctx: &QueryContext,
    ) -> Result<Vec<GroupRow>, QueryError> {
        self.record(CallKind::GroupsIntersecting, &[])?;
        self.inner.groups_intersecting(envelope, ctx)
    }

    fn points_by_id(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PointRow>, QueryError> {
        self.record(CallKind::PointsById, ids)?;
        self.inner.points_by_id(ids, ctx)
    }

    fn paths_by_id(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError> {
        self.record(CallKind::PathsById, ids)?;
        self.inner.paths_by_id(ids, ctx)
    }

    fn paths_referencing_points(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError> {
        self.record(CallKind::PathsReferencingPoints, ids)?;
        self.inner.paths_referencing_points(ids, ctx)
    }

    fn groups_referencing_paths(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<GroupRow>, QueryError> {
        self.record(CallKind::GroupsReferencingPaths, ids)?;
        self.inner.groups_referencing_paths(ids, ctx)
    }
}

/// Declarative description of store contents.
///
/// Path and group envelopes are derived from the coordinates of the points
/// they reference, so fixtures only place points. Rows referencing no known
/// point are placed at the south-western corner of the projection.
#[derive(Debug, Clone, Default)]
pub struct StoreFixture {
    points: Vec<PointRow>,
    paths: Vec<PathRow>,
    groups: Vec<GroupRow>,
}

impl StoreFixture {
    /// Add an untagged point at `lat`/`lon` degrees.
    #[must_use]
    pub fn point(self, id: EntityId, lat: f64, lon: f64) -> Self {
        self.tagged_point(id, lat, lon, &[])
    }

    /// Add a point with column-per-tag values.
    #[must_use]
    pub fn tagged_point(mut self, id: EntityId, lat: f64, lon: f64, tags: &[(&str, &str)]) -> Self {
        self.points.push(PointRow {
            id,
            lat_e7: degrees_to_e7(lat),
            lon_e7: degrees_to_e7(lon),
            tags: RawTags::from_columns(tags.iter().map(|(k, v)| (*k, Some((*v).to_owned())))),
        });
        self
    }

    /// Add an untagged path through `point_ids`.
    #[must_use]
    pub fn path(mut self, id: EntityId, point_ids: &[EntityId]) -> Self {
        self.paths.push(PathRow {
            id,
            point_ids: point_ids.to_vec(),
            tags: RawTags::default(),
            geometry: None,
        });
        self
    }

    /// Add a fully specified path row.
    #[must_use]
    pub fn path_row(mut self, row: PathRow) -> Self {
        self.paths.push(row);
        self
    }

    /// Add an untagged group from an interleaved `[descriptor, role, ...]`
    /// member array.
    #[must_use]
    pub fn group(mut self, id: EntityId, members: &[&str]) -> Self {
        self.groups.push(GroupRow {
            id,
            members: members.iter().map(|m| (*m).to_owned()).collect(),
            tags: RawTags::default(),
            geometry: None,
        });
        self
    }

    /// Add a fully specified group row.
    #[must_use]
    pub fn group_row(mut self, row: GroupRow) -> Self {
        self.groups.push(row);
        self
    }

    /// Point rows in insertion order.
    pub fn points(&self) -> &[PointRow] {
        &self.points
    }

    /// Path rows in insertion order.
    pub fn paths(&self) -> &[PathRow] {
        &self.paths
    }

    /// Group rows in insertion order.
    pub fn groups(&self) -> &[GroupRow] {
        &self.groups
    }

    fn coord_of(&self, id: EntityId) -> Option<Coord<f64>> {
        self.points.iter().find(|p| p.id == id).map(|p| Coord {
            x: e7_to_degrees(p.lon_e7),
            y: e7_to_degrees(p.lat_e7),
        })
    }

    fn path_coords(&self, point_ids: &[EntityId]) -> Vec<Coord<f64>> {
        point_ids.iter().filter_map(|id| self.coord_of(*id)).collect()
    }

    /// Envelope of the points a path references.
    pub fn path_envelope(&self, row: &PathRow) -> MercatorEnvelope {
        envelope_or_corner(self.path_coords(&row.point_ids))
    }

    /// Envelope of the points and paths a group references.
    pub fn group_envelope(&self, row: &GroupRow) -> MercatorEnvelope {
        let mut coords = Vec::new();
        for pair in row.members.chunks(2) {
            let Some(descriptor) = pair.first() else {
                continue;
            };
            let Ok(member) = decode_member(row.id, descriptor, String::new()) else {
                continue;
            };
            match member.kind {
                MemberKind::Point => coords.extend(self.coord_of(member.id)),
                MemberKind::Path => {
                    if let Some(path) = self.paths.iter().find(|p| p.id == member.id) {
                        coords.extend(self.path_coords(&path.point_ids));
                    }
                }
            }
        }
        envelope_or_corner(coords)
    }

    /// Build an [`InMemoryStore`] holding the fixture.
    pub fn build(&self) -> InMemoryStore {
        let mut builder = InMemoryStore::builder();
        for row in &self.points {
            builder = builder.point(row.clone());
        }
        for row in &self.paths {
            builder = builder.path(row.clone(), self.path_envelope(row));
        }
        for row in &self.groups {
            builder = builder.group(row.clone(), self.group_envelope(row));
        }
        builder.build()
    }

    /// Build a [`CountingStore`] holding the fixture.
    pub fn counting_store(&self) -> CountingStore {
        CountingStore::new(self.build())
    }
}

fn envelope_or_corner(coords: Vec<Coord<f64>>) -> MercatorEnvelope {
    MercatorEnvelope::around(coords).unwrap_or_else(|| {
        let corner = project(Coord {
            x: -180.0,
            y: -90.0,
        });
        MercatorEnvelope {
            min_x: corner.x,
            min_y: corner.y,
            max_x: corner.x,
            max_y: corner.y,
        }
    })
}
