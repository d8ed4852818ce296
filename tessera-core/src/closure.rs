//! Reference-closure engine.
//!
//! Starting from the entities found inside an extent, the engine fetches every
//! point, path and group they reference so that paths and groups straddling
//! the boundary are complete. Work proceeds in fixed stages:
//!
//! 1. **Seed**: points inside the extent, then paths and groups either by
//!    their own geometry or by referencing what was already found.
//! 2. **Point completion**: one batch of points referenced by paths.
//! 3. **Group completion**: one batch of paths referenced by groups, then one
//!    batch of points referenced by groups or by the paths just added.
//!
//! With [`ClosureDepth::Transitive`] the engine additionally looks for groups
//! referencing paths it has not yet queried and closes them, until a round
//! adds nothing.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use log::{debug, warn};
use thiserror::Error;

use crate::area::{AreaData, DanglingReferences, EntityCounts};
use crate::decode::{decode_group, decode_path, decode_point};
use crate::entity::{EntityId, EntityKind};
use crate::error::{ExtractError, Stage};
use crate::extent::Extent;
use crate::query::QueryClient;
use crate::store::{GroupRow, PathRow, PointRow, QueryError, SpatialStore};

/// How paths and groups are found during the seed stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum SeedMode {
    /// Paths and groups are matched by their stored geometry.
    #[default]
    Geometry,
    /// Paths are those referencing seeded points and groups those
    /// referencing known paths.
    References,
}

/// How far reference discovery goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum ClosureDepth {
    /// One batch per stage.
    #[default]
    Bounded,
    /// Repeat group discovery until no new entity appears.
    Transitive,
}

/// Error returned when parsing [`SeedMode`] or [`ClosureDepth`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {option} `{value}`, expected one of: {expected}")]
pub struct ParseOptionError {
    option: &'static str,
    value: String,
    expected: &'static str,
}

impl FromStr for SeedMode {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "geometry" => Ok(Self::Geometry),
            "references" => Ok(Self::References),
            _ => Err(ParseOptionError {
                option: "seed mode",
                value: s.to_owned(),
                expected: "geometry, references",
            }),
        }
    }
}

impl fmt::Display for SeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Geometry => "geometry",
            Self::References => "references",
        })
    }
}

impl FromStr for ClosureDepth {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bounded" => Ok(Self::Bounded),
            "transitive" => Ok(Self::Transitive),
            _ => Err(ParseOptionError {
                option: "closure depth",
                value: s.to_owned(),
                expected: "bounded, transitive",
            }),
        }
    }
}

impl fmt::Display for ClosureDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bounded => "bounded",
            Self::Transitive => "transitive",
        })
    }
}

/// Summary of one extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtractionReport {
    /// Entities found by the seed stage.
    pub seeded: EntityCounts,
    /// Entities added by the completion stages.
    pub completed: EntityCounts,
    /// Store calls issued, empty batches excluded.
    pub store_calls: usize,
    /// Transitive discovery rounds that added entities.
    pub discovery_rounds: usize,
    /// References the store could not resolve.
    pub dangling: DanglingReferences,
}

/// Drives the closure stages against a [`QueryClient`].
#[derive(Debug)]
pub struct ClosureEngine<'c, S> {
    client: &'c QueryClient<S>,
    seed_mode: SeedMode,
    depth: ClosureDepth,
}

impl<'c, S: SpatialStore> ClosureEngine<'c, S> {
    /// Create an engine issuing its queries through `client`.
    pub fn new(client: &'c QueryClient<S>, seed_mode: SeedMode, depth: ClosureDepth) -> Self {
        Self {
            client,
            seed_mode,
            depth,
        }
    }

    /// Extract and close the entities around `extent`.
    ///
    /// # Errors
    ///
    /// Any query or decode failure aborts the run; no partial area is
    /// returned.
    pub fn run(&self, extent: &Extent) -> Result<(AreaData, ExtractionReport), ExtractError> {
        let calls_before = self.client.calls();
        let mut area = AreaData::default();
        let mut queried_paths = self.seed(extent, &mut area)?;
        let seeded = area.counts();
        debug!(
            "seed found {} points, {} paths, {} groups",
            seeded.points, seeded.paths, seeded.groups
        );

        self.complete_points(&mut area)?;
        let groups: Vec<EntityId> = area.groups().keys().copied().collect();
        self.complete_groups(&mut area, groups, Stage::GroupPathCompletion)?;

        let mut discovery_rounds = 0;
        if self.depth == ClosureDepth::Transitive {
            while self.discover(&mut area, &mut queried_paths)? {
                discovery_rounds += 1;
            }
        }

        let dangling = area.dangling_references();
        if !dangling.is_empty() {
            warn!(
                "{} points and {} paths are referenced but missing from the store",
                dangling.points.len(),
                dangling.paths.len()
            );
        }
        let total = area.counts();
        let report = ExtractionReport {
            seeded,
            completed: EntityCounts {
                points: total.points.saturating_sub(seeded.points),
                paths: total.paths.saturating_sub(seeded.paths),
                groups: total.groups.saturating_sub(seeded.groups),
            },
            store_calls: self.client.calls().saturating_sub(calls_before),
            discovery_rounds,
            dangling,
        };
        Ok((area, report))
    }

    /// Seed stage. Returns the path IDs already used for group lookup.
    fn seed(
        &self,
        extent: &Extent,
        area: &mut AreaData,
    ) -> Result<BTreeSet<EntityId>, ExtractError> {
        let stage = Stage::Seed;
        let points = self
            .client
            .fetch_points_in_extent(extent)
            .map_err(query_error(stage, EntityKind::Point))?;
        let seeded_points = merge_points(area, points, stage)?;

        match self.seed_mode {
            SeedMode::Geometry => {
                let paths = self
                    .client
                    .fetch_paths_intersecting(extent)
                    .map_err(query_error(stage, EntityKind::Path))?;
                merge_paths(area, paths, stage)?;
                let groups = self
                    .client
                    .fetch_groups_intersecting(extent)
                    .map_err(query_error(stage, EntityKind::Group))?;
                merge_groups(area, groups, stage)?;
                Ok(BTreeSet::new())
            }
            SeedMode::References => {
                let point_ids: BTreeSet<EntityId> = seeded_points.into_iter().collect();
                let paths = self
                    .client
                    .fetch_paths_referencing_points(&point_ids)
                    .map_err(query_error(stage, EntityKind::Path))?;
                merge_paths(area, paths, stage)?;
                let path_ids: BTreeSet<EntityId> = area.paths().keys().copied().collect();
                let groups = self
                    .client
                    .fetch_groups_referencing_paths(&path_ids)
                    .map_err(query_error(stage, EntityKind::Group))?;
                merge_groups(area, groups, stage)?;
                Ok(path_ids)
            }
        }
    }

    fn complete_points(&self, area: &mut AreaData) -> Result<(), ExtractError> {
        let stage = Stage::PointCompletion;
        let missing = area.missing_path_points();
        let rows = self
            .client
            .fetch_points_by_id(&missing)
            .map_err(query_error(stage, EntityKind::Point))?;
        let added = merge_points(area, rows, stage)?;
        debug!("{stage}: {} of {} missing points added", added.len(), missing.len());
        Ok(())
    }

    /// Close the members of `groups`: paths first, then the points referenced
    /// directly or by the paths added here. Returns the added path IDs.
    fn complete_groups(
        &self,
        area: &mut AreaData,
        groups: Vec<EntityId>,
        path_stage: Stage,
    ) -> Result<Vec<EntityId>, ExtractError> {
        let (missing_paths, mut missing_points) = area.missing_members_of(groups);

        let rows = self
            .client
            .fetch_paths_by_id(&missing_paths)
            .map_err(query_error(path_stage, EntityKind::Path))?;
        let added_paths = merge_paths(area, rows, path_stage)?;
        debug!(
            "{path_stage}: {} of {} missing paths added",
            added_paths.len(),
            missing_paths.len()
        );

        let point_stage = Stage::GroupPointCompletion;
        missing_points.extend(area.missing_points_of(added_paths.iter().copied()));
        let rows = self
            .client
            .fetch_points_by_id(&missing_points)
            .map_err(query_error(point_stage, EntityKind::Point))?;
        let added_points = merge_points(area, rows, point_stage)?;
        debug!(
            "{point_stage}: {} of {} missing points added",
            added_points.len(),
            missing_points.len()
        );
        Ok(added_paths)
    }

    /// One transitive round. Returns whether anything was added.
    fn discover(
        &self,
        area: &mut AreaData,
        queried_paths: &mut BTreeSet<EntityId>,
    ) -> Result<bool, ExtractError> {
        let stage = Stage::GroupDiscovery;
        let frontier: BTreeSet<EntityId> = area
            .paths()
            .keys()
            .filter(|id| !queried_paths.contains(id))
            .copied()
            .collect();
        if frontier.is_empty() {
            return Ok(false);
        }
        queried_paths.extend(frontier.iter().copied());

        let rows = self
            .client
            .fetch_groups_referencing_paths(&frontier)
            .map_err(query_error(stage, EntityKind::Group))?;
        let added_groups = merge_groups(area, rows, stage)?;
        debug!(
            "{stage}: {} new groups reference {} paths",
            added_groups.len(),
            frontier.len()
        );
        if added_groups.is_empty() {
            return Ok(false);
        }
        self.complete_groups(area, added_groups, stage)?;
        Ok(true)
    }
}

fn query_error(stage: Stage, kind: EntityKind) -> impl FnOnce(QueryError) -> ExtractError {
    move |source| ExtractError::Query {
        stage,
        kind,
        source,
    }
}

fn merge_points(
    area: &mut AreaData,
    rows: Vec<PointRow>,
    stage: Stage,
) -> Result<Vec<EntityId>, ExtractError> {
    let mut added = Vec::new();
    for row in rows {
        let point = decode_point(row).map_err(|source| ExtractError::Decode {
            stage,
            kind: EntityKind::Point,
            source,
        })?;
        let id = point.id;
        if area.insert_point(point) {
            added.push(id);
        }
    }
    Ok(added)
}

fn merge_paths(
    area: &mut AreaData,
    rows: Vec<PathRow>,
    stage: Stage,
) -> Result<Vec<EntityId>, ExtractError> {
    let mut added = Vec::new();
    for row in rows {
        let path = decode_path(row).map_err(|source| ExtractError::Decode {
            stage,
            kind: EntityKind::Path,
            source,
        })?;
        let id = path.id;
        if area.insert_path(path) {
            added.push(id);
        }
    }
    Ok(added)
}

fn merge_groups(
    area: &mut AreaData,
    rows: Vec<GroupRow>,
    stage: Stage,
) -> Result<Vec<EntityId>, ExtractError> {
    let mut added = Vec::new();
    for row in rows {
        let group = decode_group(row).map_err(|source| ExtractError::Decode {
            stage,
            kind: EntityKind::Group,
            source,
        })?;
        let id = group.id;
        if area.insert_group(group) {
            added.push(id);
        }
    }
    Ok(added)
}
