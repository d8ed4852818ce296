//! Map entities produced by the decoder.
//!
//! Three kinds exist: [`Point`], [`Path`] (an ordered list of point
//! references) and [`Group`] (an ordered list of point or path members).
//! References are plain IDs resolved by lookup in an
//! [`AreaData`](crate::AreaData).

use std::collections::BTreeMap;
use std::fmt;

use geo::Coord;

use crate::extent::e7_to_degrees;

/// Identifier of an entity, unique per kind within one dataset.
pub type EntityId = i64;

/// Free-form key/value attributes attached to an entity, ordered by key.
pub type Tags = BTreeMap<String, String>;

/// The three entity kinds handled by the closure engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum EntityKind {
    /// A single located point.
    Point,
    /// An ordered sequence of points.
    Path,
    /// A collection of points and paths.
    Group,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Point => "point",
            Self::Path => "path",
            Self::Group => "group",
        })
    }
}

/// Opaque pre-rendered geometry produced by the store.
///
/// The bytes are carried through extraction and representation unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct GeometryPayload(Vec<u8>);

impl GeometryPayload {
    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the payload, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for GeometryPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// A located point with its tags.
///
/// # Examples
///
/// ```
/// use tessera_core::Point;
///
/// let point = Point::from_e7(7, 525_130_200, 134_087_500, Default::default());
/// assert!((point.lat() - 52.51302).abs() < 1e-9);
/// assert!((point.lon() - 13.40875).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point {
    /// Unique identifier.
    pub id: EntityId,
    /// WGS84 position with `x = longitude` and `y = latitude`.
    pub location: Coord<f64>,
    /// Attributes, empty when the store has none.
    pub tags: Tags,
}

impl Point {
    /// Construct a point from degrees.
    pub fn new(id: EntityId, location: Coord<f64>, tags: Tags) -> Self {
        Self { id, location, tags }
    }

    /// Construct a point without tags.
    pub fn with_empty_tags(id: EntityId, location: Coord<f64>) -> Self {
        Self::new(id, location, Tags::new())
    }

    /// Construct a point from E7 fixed-point coordinates.
    pub fn from_e7(id: EntityId, lat_e7: i64, lon_e7: i64, tags: Tags) -> Self {
        let location = Coord {
            x: e7_to_degrees(lon_e7),
            y: e7_to_degrees(lat_e7),
        };
        Self::new(id, location, tags)
    }

    /// Latitude in degrees.
    pub fn lat(&self) -> f64 {
        self.location.y
    }

    /// Longitude in degrees.
    pub fn lon(&self) -> f64 {
        self.location.x
    }
}

/// An ordered sequence of point references.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Path {
    /// Unique identifier.
    pub id: EntityId,
    /// Referenced point IDs in path order. IDs may repeat for closed paths.
    pub point_ids: Vec<EntityId>,
    /// Attributes.
    pub tags: Tags,
    /// Store-rendered geometry, if any.
    pub geometry: Option<GeometryPayload>,
}

/// Kind of entity a [`Member`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum MemberKind {
    /// The member is a [`Point`].
    Point,
    /// The member is a [`Path`].
    Path,
}

impl From<MemberKind> for EntityKind {
    fn from(kind: MemberKind) -> Self {
        match kind {
            MemberKind::Point => Self::Point,
            MemberKind::Path => Self::Path,
        }
    }
}

/// A typed reference from a group to one of its members.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Member {
    /// Kind of the referenced entity.
    pub kind: MemberKind,
    /// ID of the referenced entity.
    pub id: EntityId,
    /// Role of the member within the group, possibly empty.
    pub role: String,
}

/// A collection of point and path members.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Group {
    /// Unique identifier.
    pub id: EntityId,
    /// Members in store order.
    pub members: Vec<Member>,
    /// Attributes.
    pub tags: Tags,
    /// Store-rendered geometry, if any.
    pub geometry: Option<GeometryPayload>,
}

impl Group {
    /// IDs of members of the given kind, in member order.
    pub fn member_ids(&self, kind: MemberKind) -> impl Iterator<Item = EntityId> + '_ {
        self.members
            .iter()
            .filter(move |m| m.kind == kind)
            .map(|m| m.id)
    }
}
