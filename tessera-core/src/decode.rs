//! Conversion of raw store rows into entities.
//!
//! Decoding is pure: the same row always yields the same entity or the same
//! error.

use thiserror::Error;

use crate::entity::{EntityId, Group, Member, MemberKind, Path, Point, Tags};
use crate::store::{GroupRow, PathRow, PointRow, RawTags};

/// Errors raised while decoding rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A member descriptor carries a kind prefix other than `n` or `w`.
    #[error("group {group} has unrecognised member descriptor `{descriptor}`")]
    UnrecognisedMember {
        /// Group owning the member.
        group: EntityId,
        /// Offending descriptor.
        descriptor: String,
    },
    /// A member descriptor's ID is not an integer.
    #[error("group {group} has member descriptor `{descriptor}` with an invalid ID")]
    InvalidMemberId {
        /// Group owning the member.
        group: EntityId,
        /// Offending descriptor.
        descriptor: String,
    },
    /// The member array holds a descriptor without a role.
    #[error("group {group} has an odd-length member array ({len} entries)")]
    UnpairedMember {
        /// Group owning the members.
        group: EntityId,
        /// Length of the member array.
        len: usize,
    },
    /// The interleaved tag array holds a key without a value.
    #[error("entity {entity} has an odd-length tag array ({len} entries)")]
    UnpairedTag {
        /// Entity owning the tags.
        entity: EntityId,
        /// Length of the tag array.
        len: usize,
    },
}

/// Rebuild a tag map from its store layout.
///
/// A non-empty interleaved array takes precedence; otherwise non-null
/// columns are used. Later duplicates of a key overwrite earlier ones.
///
/// # Examples
///
/// ```
/// use tessera_core::{RawTags, decode::decode_tags};
///
/// let raw = RawTags::from_columns([("name", Some("Spree".to_owned())), ("ref", None)]);
/// let tags = decode_tags(1, raw).expect("valid tags");
/// assert_eq!(tags.get("name").map(String::as_str), Some("Spree"));
/// assert!(!tags.contains_key("ref"));
/// ```
pub fn decode_tags(entity: EntityId, raw: RawTags) -> Result<Tags, DecodeError> {
    match raw.interleaved.filter(|values| !values.is_empty()) {
        Some(values) => {
            if values.len() % 2 != 0 {
                return Err(DecodeError::UnpairedTag {
                    entity,
                    len: values.len(),
                });
            }
            let mut iter = values.into_iter();
            let mut tags = Tags::new();
            while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                tags.insert(key, value);
            }
            Ok(tags)
        }
        None => Ok(raw
            .columns
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect()),
    }
}

/// Parse the ID part of a member descriptor: ASCII digits with an optional
/// leading `-`.
pub(crate) fn parse_member_id(digits: &str) -> Option<EntityId> {
    let unsigned = digits.strip_prefix('-').unwrap_or(digits);
    if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Decode one member descriptor such as `w42`, `n7` or `7`.
///
/// Any other alphabetic prefix, ASCII or not, is unrecognised.
pub fn decode_member(
    group: EntityId,
    descriptor: &str,
    role: String,
) -> Result<Member, DecodeError> {
    let (kind, digits) = if let Some(rest) = descriptor.strip_prefix('w') {
        (MemberKind::Path, rest)
    } else if let Some(rest) = descriptor.strip_prefix('n') {
        (MemberKind::Point, rest)
    } else if descriptor.starts_with(char::is_alphabetic) {
        return Err(DecodeError::UnrecognisedMember {
            group,
            descriptor: descriptor.to_owned(),
        });
    } else {
        (MemberKind::Point, descriptor)
    };
    let id = parse_member_id(digits).ok_or_else(|| DecodeError::InvalidMemberId {
        group,
        descriptor: descriptor.to_owned(),
    })?;
    Ok(Member { kind, id, role })
}

/// Decode an interleaved `[descriptor, role, ...]` member array.
pub fn decode_members(group: EntityId, values: Vec<String>) -> Result<Vec<Member>, DecodeError> {
    if values.len() % 2 != 0 {
        return Err(DecodeError::UnpairedMember {
            group,
            len: values.len(),
        });
    }
    let mut members = Vec::with_capacity(values.len() / 2);
    let mut iter = values.into_iter();
    while let (Some(descriptor), Some(role)) = (iter.next(), iter.next()) {
        members.push(decode_member(group, &descriptor, role)?);
    }
    Ok(members)
}

/// Decode a point row.
pub fn decode_point(row: PointRow) -> Result<Point, DecodeError> {
    let tags = decode_tags(row.id, row.tags)?;
    Ok(Point::from_e7(row.id, row.lat_e7, row.lon_e7, tags))
}

/// Decode a path row.
pub fn decode_path(row: PathRow) -> Result<Path, DecodeError> {
    let tags = decode_tags(row.id, row.tags)?;
    Ok(Path {
        id: row.id,
        point_ids: row.point_ids,
        tags,
        geometry: row.geometry.map(Into::into),
    })
}

/// Decode a group row.
pub fn decode_group(row: GroupRow) -> Result<Group, DecodeError> {
    let members = decode_members(row.id, row.members)?;
    let tags = decode_tags(row.id, row.tags)?;
    Ok(Group {
        id: row.id,
        members,
        tags,
        geometry: row.geometry.map(Into::into),
    })
}
