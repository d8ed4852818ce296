//! The closed working set returned by an extraction.

use std::collections::{BTreeMap, BTreeSet};

use crate::entity::{EntityId, Group, MemberKind, Path, Point};

/// Points, paths and groups keyed by ID.
///
/// Inserts never overwrite: the first entity stored under an ID wins. Entity
/// maps and tag maps are ordered, so serialised output is deterministic.
///
/// # Examples
///
/// ```
/// use geo::Coord;
/// use tessera_core::{AreaData, Path, Point};
///
/// let mut area = AreaData::default();
/// area.insert_path(Path {
///     id: 1,
///     point_ids: vec![10, 11],
///     tags: Default::default(),
///     geometry: None,
/// });
/// area.insert_point(Point::with_empty_tags(10, Coord { x: 0.0, y: 0.0 }));
///
/// assert_eq!(area.missing_path_points().into_iter().collect::<Vec<_>>(), vec![11]);
/// assert!(!area.is_closed());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AreaData {
    points: BTreeMap<EntityId, Point>,
    paths: BTreeMap<EntityId, Path>,
    groups: BTreeMap<EntityId, Group>,
}

/// Number of entities of each kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityCounts {
    /// Number of points.
    pub points: usize,
    /// Number of paths.
    pub paths: usize,
    /// Number of groups.
    pub groups: usize,
}

impl EntityCounts {
    /// Sum over all kinds.
    pub const fn total(&self) -> usize {
        self.points + self.paths + self.groups
    }
}

/// References that could not be resolved inside an [`AreaData`].
///
/// These are IDs the store itself does not hold; they are reported, never
/// treated as errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DanglingReferences {
    /// Point IDs referenced by a path or group but absent.
    pub points: BTreeSet<EntityId>,
    /// Path IDs referenced by a group but absent.
    pub paths: BTreeSet<EntityId>,
}

impl DanglingReferences {
    /// Whether every reference resolved.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.paths.is_empty()
    }

    /// Total number of unresolved IDs.
    pub fn len(&self) -> usize {
        self.points.len() + self.paths.len()
    }
}

impl AreaData {
    /// Points keyed by ID.
    pub fn points(&self) -> &BTreeMap<EntityId, Point> {
        &self.points
    }

    /// Paths keyed by ID.
    pub fn paths(&self) -> &BTreeMap<EntityId, Path> {
        &self.paths
    }

    /// Groups keyed by ID.
    pub fn groups(&self) -> &BTreeMap<EntityId, Group> {
        &self.groups
    }

    /// Look up a point.
    pub fn point(&self, id: EntityId) -> Option<&Point> {
        self.points.get(&id)
    }

    /// Look up a path.
    pub fn path(&self, id: EntityId) -> Option<&Path> {
        self.paths.get(&id)
    }

    /// Look up a group.
    pub fn group(&self, id: EntityId) -> Option<&Group> {
        self.groups.get(&id)
    }

    /// Insert a point unless its ID is already present.
    ///
    /// Returns `true` when the point was stored.
    pub fn insert_point(&mut self, point: Point) -> bool {
        insert_absent(&mut self.points, point.id, point)
    }

    /// Insert a path unless its ID is already present.
    ///
    /// Returns `true` when the path was stored.
    pub fn insert_path(&mut self, path: Path) -> bool {
        insert_absent(&mut self.paths, path.id, path)
    }

    /// Insert a group unless its ID is already present.
    ///
    /// Returns `true` when the group was stored.
    pub fn insert_group(&mut self, group: Group) -> bool {
        insert_absent(&mut self.groups, group.id, group)
    }

    /// Point IDs referenced by the given paths but not yet present.
    ///
    /// Path IDs that are not in the area are ignored.
    pub fn missing_points_of<I>(&self, path_ids: I) -> BTreeSet<EntityId>
    where
        I: IntoIterator<Item = EntityId>,
    {
        path_ids
            .into_iter()
            .filter_map(|id| self.paths.get(&id))
            .flat_map(|path| path.point_ids.iter().copied())
            .filter(|id| !self.points.contains_key(id))
            .collect()
    }

    /// Point IDs referenced by any path but not yet present.
    pub fn missing_path_points(&self) -> BTreeSet<EntityId> {
        self.missing_points_of(self.paths.keys().copied())
    }

    /// Path and point IDs referenced by the given groups but not yet present,
    /// returned as `(paths, points)`.
    ///
    /// Group IDs that are not in the area are ignored.
    pub fn missing_members_of<I>(&self, group_ids: I) -> (BTreeSet<EntityId>, BTreeSet<EntityId>)
    where
        I: IntoIterator<Item = EntityId>,
    {
        let mut paths = BTreeSet::new();
        let mut points = BTreeSet::new();
        for group in group_ids.into_iter().filter_map(|id| self.groups.get(&id)) {
            for member in &group.members {
                match member.kind {
                    MemberKind::Path if !self.paths.contains_key(&member.id) => {
                        paths.insert(member.id);
                    }
                    MemberKind::Point if !self.points.contains_key(&member.id) => {
                        points.insert(member.id);
                    }
                    _ => {}
                }
            }
        }
        (paths, points)
    }

    /// Path and point IDs referenced by any group but not yet present.
    pub fn missing_group_members(&self) -> (BTreeSet<EntityId>, BTreeSet<EntityId>) {
        self.missing_members_of(self.groups.keys().copied())
    }

    /// Every reference that does not resolve inside the area.
    pub fn dangling_references(&self) -> DanglingReferences {
        let (paths, mut points) = self.missing_group_members();
        points.extend(self.missing_path_points());
        DanglingReferences { points, paths }
    }

    /// Whether every path and group reference resolves.
    pub fn is_closed(&self) -> bool {
        self.dangling_references().is_empty()
    }

    /// Number of entities of each kind.
    pub fn counts(&self) -> EntityCounts {
        EntityCounts {
            points: self.points.len(),
            paths: self.paths.len(),
            groups: self.groups.len(),
        }
    }

    /// Whether the area holds no entity at all.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.paths.is_empty() && self.groups.is_empty()
    }
}

fn insert_absent<T>(map: &mut BTreeMap<EntityId, T>, id: EntityId, value: T) -> bool {
    use std::collections::btree_map::Entry;

    match map.entry(id) {
        Entry::Vacant(slot) => {
            slot.insert(value);
            true
        }
        Entry::Occupied(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Member, Tags};
    use geo::Coord;
    use rstest::{fixture, rstest};

    fn path(id: EntityId, point_ids: &[EntityId]) -> Path {
        Path {
            id,
            point_ids: point_ids.to_vec(),
            tags: Tags::new(),
            geometry: None,
        }
    }

    fn member(kind: MemberKind, id: EntityId) -> Member {
        Member {
            kind,
            id,
            role: String::new(),
        }
    }

    #[fixture]
    fn area() -> AreaData {
        let mut area = AreaData::default();
        area.insert_point(Point::with_empty_tags(1, Coord { x: 0.0, y: 0.0 }));
        area.insert_path(path(10, &[1, 2, 3]));
        area.insert_group(Group {
            id: 100,
            members: vec![
                member(MemberKind::Path, 10),
                member(MemberKind::Path, 11),
                member(MemberKind::Point, 1),
                member(MemberKind::Point, 4),
            ],
            tags: Tags::new(),
            geometry: None,
        });
        area
    }

    #[rstest]
    fn first_insert_wins(mut area: AreaData) {
        let mut replacement = Point::with_empty_tags(1, Coord { x: 5.0, y: 5.0 });
        replacement.tags.insert("name".into(), "late".into());
        assert!(!area.insert_point(replacement));
        let kept = area.point(1).expect("point present");
        assert!(kept.tags.is_empty());
        assert_eq!(kept.location, Coord { x: 0.0, y: 0.0 });
    }

    #[rstest]
    fn reports_missing_path_points(area: AreaData) {
        let missing: Vec<_> = area.missing_path_points().into_iter().collect();
        assert_eq!(missing, vec![2, 3]);
    }

    #[rstest]
    fn missing_points_of_ignores_unknown_paths(area: AreaData) {
        assert!(area.missing_points_of([999]).is_empty());
    }

    #[rstest]
    fn reports_missing_group_members(area: AreaData) {
        let (paths, points) = area.missing_group_members();
        assert_eq!(paths.into_iter().collect::<Vec<_>>(), vec![11]);
        assert_eq!(points.into_iter().collect::<Vec<_>>(), vec![4]);
    }

    #[rstest]
    fn dangling_references_combine_paths_and_groups(area: AreaData) {
        let dangling = area.dangling_references();
        assert_eq!(dangling.points.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(dangling.paths.iter().copied().collect::<Vec<_>>(), vec![11]);
        assert_eq!(dangling.len(), 4);
        assert!(!area.is_closed());
    }

    #[rstest]
    fn empty_area_is_closed() {
        let area = AreaData::default();
        assert!(area.is_closed());
        assert!(area.is_empty());
        assert_eq!(area.counts().total(), 0);
    }

    #[rstest]
    fn counts_each_kind(area: AreaData) {
        assert_eq!(
            area.counts(),
            EntityCounts {
                points: 1,
                paths: 1,
                groups: 1
            }
        );
    }
}
