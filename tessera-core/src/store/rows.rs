//! Raw rows returned by a [`SpatialStore`](super::SpatialStore).
//!
//! Rows mirror the store layout and are turned into entities by the
//! [`decode`](crate::decode) module.

use crate::decode::parse_member_id;
use crate::entity::EntityId;

/// Tag data as laid out by the store.
///
/// Stores either expose one column per tag key, where `None` means the tag
/// is unset, or a flat array alternating keys and values. A non-empty
/// interleaved array wins over the columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTags {
    /// Column-per-tag values as `(key, value)`.
    pub columns: Vec<(String, Option<String>)>,
    /// Interleaved `[key, value, key, value, ...]` array.
    pub interleaved: Option<Vec<String>>,
}

impl RawTags {
    /// Tags read from a column-per-tag layout.
    pub fn from_columns<I, K>(columns: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<String>)>,
        K: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            interleaved: None,
        }
    }

    /// Tags read from an interleaved key/value array.
    pub fn from_interleaved<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: Vec::new(),
            interleaved: Some(values.into_iter().map(Into::into).collect()),
        }
    }
}

/// A point as stored, with E7 fixed-point coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointRow {
    /// Point ID.
    pub id: EntityId,
    /// Latitude multiplied by 10^7.
    pub lat_e7: i64,
    /// Longitude multiplied by 10^7.
    pub lon_e7: i64,
    /// Tag data.
    pub tags: RawTags,
}

/// A path as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRow {
    /// Path ID.
    pub id: EntityId,
    /// Referenced point IDs in path order.
    pub point_ids: Vec<EntityId>,
    /// Tag data.
    pub tags: RawTags,
    /// Opaque store-rendered geometry.
    pub geometry: Option<Vec<u8>>,
}

/// A group as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRow {
    /// Group ID.
    pub id: EntityId,
    /// Interleaved `[descriptor, role, descriptor, role, ...]` array where a
    /// descriptor is a kind prefix followed by an ID, e.g. `w42`.
    pub members: Vec<String>,
    /// Tag data.
    pub tags: RawTags,
    /// Opaque store-rendered geometry.
    pub geometry: Option<Vec<u8>>,
}

impl GroupRow {
    /// Path IDs named by `w` descriptors, skipping anything else.
    ///
    /// Used by stores to answer membership queries without decoding. Only
    /// the canonical decimal spelling matches, so `w05` and `w+5` never name
    /// path 5.
    pub fn path_member_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.members
            .iter()
            .step_by(2)
            .filter_map(|descriptor| descriptor.strip_prefix('w'))
            .filter_map(|digits| {
                parse_member_id(digits).filter(|id| id.to_string() == digits)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn path_member_ids_reads_descriptors_only() {
        let row = GroupRow {
            id: 1,
            members: ["w10", "w20", "n5", "outer", "w30", ""]
                .into_iter()
                .map(String::from)
                .collect(),
            tags: RawTags::default(),
            geometry: None,
        };
        let ids: Vec<_> = row.path_member_ids().collect();
        assert_eq!(ids, vec![10, 30]);
    }

    #[rstest]
    fn path_member_ids_match_canonical_spelling_only() {
        let row = GroupRow {
            id: 1,
            members: ["w+5", "", "w05", "", "w 5", "", "w-7", "", "w5", ""]
                .into_iter()
                .map(String::from)
                .collect(),
            tags: RawTags::default(),
            geometry: None,
        };
        let ids: Vec<_> = row.path_member_ids().collect();
        assert_eq!(ids, vec![-7, 5]);
    }
}
