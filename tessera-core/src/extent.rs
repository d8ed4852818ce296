//! WGS84 bounding boxes and their query-boundary encodings.
//!
//! An [`Extent`] is always expressed in degrees. It is converted only when it
//! crosses into a store query: points are matched against the fixed-point
//! [`ExtentE7`] encoding and paths/groups against a Web Mercator
//! [`MercatorEnvelope`].

use std::f64::consts::{FRAC_PI_4, PI};

use geo::{Coord, Rect};
use thiserror::Error;

/// Scale between degrees and the fixed-point encoding used by the store.
pub const E7_SCALE: f64 = 10_000_000.0;

/// Semi-major axis of the WGS84 ellipsoid as used by EPSG:3857.
const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Latitude at which Web Mercator becomes square; inputs are clamped to it.
const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

/// Errors returned when constructing an [`Extent`].
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ExtentError {
    /// A bound was NaN or infinite.
    #[error("extent bound {axis} must be finite, found {value}")]
    NonFinite {
        /// Name of the offending bound.
        axis: &'static str,
        /// Rejected value.
        value: f64,
    },
    /// A bound lies outside the valid WGS84 range.
    #[error("extent bound {axis}={value} lies outside [{min}, {max}]")]
    OutOfRange {
        /// Name of the offending bound.
        axis: &'static str,
        /// Rejected value.
        value: f64,
        /// Lowest accepted value.
        min: f64,
        /// Highest accepted value.
        max: f64,
    },
    /// An enlargement factor was NaN or infinite.
    #[error("margin factor must be finite, found {factor}")]
    NonFiniteMargin {
        /// Rejected factor.
        factor: f64,
    },
    /// The minimum exceeds the maximum on one axis.
    #[error("extent {axis} minimum {min} exceeds maximum {max}")]
    Inverted {
        /// Axis name (`lat` or `lon`).
        axis: &'static str,
        /// Minimum bound.
        min: f64,
        /// Maximum bound.
        max: f64,
    },
}

/// Bounding box in WGS84 degrees (EPSG:4326).
///
/// Bounds are inclusive and satisfy `latmin <= latmax` and
/// `lonmin <= lonmax`. Antimeridian-crossing boxes are not modelled; callers
/// split them into two extents.
///
/// # Examples
///
/// ```
/// use tessera_core::Extent;
///
/// # fn main() -> Result<(), tessera_core::ExtentError> {
/// let extent = Extent::new(52.51302, 52.51605, 13.40875, 13.41547)?;
/// let wider = extent.enlarged(0.1)?;
/// assert!(wider.latmin() < extent.latmin());
/// assert!(wider.lonmax() > extent.lonmax());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Extent {
    latmin: f64,
    latmax: f64,
    lonmin: f64,
    lonmax: f64,
}

impl Extent {
    /// Validate and construct an extent from its four bounds.
    pub fn new(latmin: f64, latmax: f64, lonmin: f64, lonmax: f64) -> Result<Self, ExtentError> {
        check_bound("latmin", latmin, 90.0)?;
        check_bound("latmax", latmax, 90.0)?;
        check_bound("lonmin", lonmin, 180.0)?;
        check_bound("lonmax", lonmax, 180.0)?;
        if latmin > latmax {
            return Err(ExtentError::Inverted {
                axis: "lat",
                min: latmin,
                max: latmax,
            });
        }
        if lonmin > lonmax {
            return Err(ExtentError::Inverted {
                axis: "lon",
                min: lonmin,
                max: lonmax,
            });
        }
        Ok(Self {
            latmin,
            latmax,
            lonmin,
            lonmax,
        })
    }

    /// Southern bound in degrees.
    pub const fn latmin(&self) -> f64 {
        self.latmin
    }

    /// Northern bound in degrees.
    pub const fn latmax(&self) -> f64 {
        self.latmax
    }

    /// Western bound in degrees.
    pub const fn lonmin(&self) -> f64 {
        self.lonmin
    }

    /// Eastern bound in degrees.
    pub const fn lonmax(&self) -> f64 {
        self.lonmax
    }

    /// Return an extent enlarged symmetrically around its centre.
    ///
    /// The factor is relative: `0.0` keeps the size, `1.0` doubles it and
    /// `-0.5` halves it. Factors below `-1.0` mirror the box, which is
    /// normalised back to `min <= max`. The result is clamped to the valid
    /// WGS84 range.
    ///
    /// # Errors
    ///
    /// Returns [`ExtentError::NonFiniteMargin`] when `factor` is NaN or
    /// infinite.
    pub fn enlarged(&self, factor: f64) -> Result<Self, ExtentError> {
        if !factor.is_finite() {
            return Err(ExtentError::NonFiniteMargin { factor });
        }
        let (latmin, latmax) = scale_span(self.latmin, self.latmax, factor);
        let (lonmin, lonmax) = scale_span(self.lonmin, self.lonmax, factor);
        Ok(Self {
            latmin: latmin.max(-90.0),
            latmax: latmax.min(90.0),
            lonmin: lonmin.max(-180.0),
            lonmax: lonmax.min(180.0),
        })
    }

    /// Whether the coordinate (`x = longitude`, `y = latitude`) lies inside.
    ///
    /// Boundary coordinates are inside.
    pub fn contains(&self, coord: Coord<f64>) -> bool {
        (self.lonmin..=self.lonmax).contains(&coord.x)
            && (self.latmin..=self.latmax).contains(&coord.y)
    }

    /// Fixed-point encoding used for point predicates.
    pub fn to_e7(&self) -> ExtentE7 {
        ExtentE7 {
            latmin: degrees_to_e7(self.latmin),
            latmax: degrees_to_e7(self.latmax),
            lonmin: degrees_to_e7(self.lonmin),
            lonmax: degrees_to_e7(self.lonmax),
        }
    }

    /// Web Mercator envelope used for path and group geometry predicates.
    pub fn to_web_mercator(&self) -> MercatorEnvelope {
        let min = project(Coord {
            x: self.lonmin,
            y: self.latmin,
        });
        let max = project(Coord {
            x: self.lonmax,
            y: self.latmax,
        });
        MercatorEnvelope {
            min_x: min.x,
            min_y: min.y,
            max_x: max.x,
            max_y: max.y,
        }
    }

    /// The extent as a `geo` rectangle with `x = longitude`, `y = latitude`.
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.lonmin,
                y: self.latmin,
            },
            Coord {
                x: self.lonmax,
                y: self.latmax,
            },
        )
    }
}

impl TryFrom<Rect<f64>> for Extent {
    type Error = ExtentError;

    fn try_from(rect: Rect<f64>) -> Result<Self, Self::Error> {
        Self::new(rect.min().y, rect.max().y, rect.min().x, rect.max().x)
    }
}

fn check_bound(axis: &'static str, value: f64, limit: f64) -> Result<(), ExtentError> {
    if !value.is_finite() {
        return Err(ExtentError::NonFinite { axis, value });
    }
    if !(-limit..=limit).contains(&value) {
        return Err(ExtentError::OutOfRange {
            axis,
            value,
            min: -limit,
            max: limit,
        });
    }
    Ok(())
}

// Evaluation order matters: E7 values must match the ones produced by the
// ingestion tooling bit for bit.
fn scale_span(min: f64, max: f64, factor: f64) -> (f64, f64) {
    let mid = (max + min) / 2.0;
    let radius = (max - min).abs() / 2.0 * (1.0 + factor);
    let low = mid - radius;
    let high = mid + radius;
    (low.min(high), low.max(high))
}

/// Convert degrees to the E7 fixed-point encoding, truncating toward zero.
pub fn degrees_to_e7(degrees: f64) -> i64 {
    (degrees * E7_SCALE) as i64
}

/// Convert an E7 fixed-point value back to degrees.
pub fn e7_to_degrees(value: i64) -> f64 {
    value as f64 / E7_SCALE
}

/// Project a WGS84 coordinate (`x = longitude`, `y = latitude`) to Web
/// Mercator metres. Latitudes beyond the projection's limit are clamped.
pub fn project(coord: Coord<f64>) -> Coord<f64> {
    let latitude = coord
        .y
        .clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE)
        .to_radians();
    Coord {
        x: EARTH_RADIUS_M * coord.x.to_radians(),
        y: EARTH_RADIUS_M * (FRAC_PI_4 + latitude / 2.0).tan().ln(),
    }
}

/// Half the width of the Web Mercator world in metres.
pub const MERCATOR_HALF_WIDTH: f64 = EARTH_RADIUS_M * PI;

/// Extent in E7 fixed-point degrees, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtentE7 {
    /// Southern bound.
    pub latmin: i64,
    /// Northern bound.
    pub latmax: i64,
    /// Western bound.
    pub lonmin: i64,
    /// Eastern bound.
    pub lonmax: i64,
}

impl ExtentE7 {
    /// Whether an E7 coordinate lies inside, boundary included.
    pub fn contains(&self, lat_e7: i64, lon_e7: i64) -> bool {
        (self.latmin..=self.latmax).contains(&lat_e7)
            && (self.lonmin..=self.lonmax).contains(&lon_e7)
    }
}

/// Axis-aligned envelope in Web Mercator (EPSG:3857) metres.
///
/// Stores receive it as the ordered tuple `(xmin, ymin, xmax, ymax)`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MercatorEnvelope {
    /// Western edge.
    pub min_x: f64,
    /// Southern edge.
    pub min_y: f64,
    /// Eastern edge.
    pub max_x: f64,
    /// Northern edge.
    pub max_y: f64,
}

impl MercatorEnvelope {
    /// Envelope of the projected WGS84 coordinates, or `None` when empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use geo::Coord;
    /// use tessera_core::MercatorEnvelope;
    ///
    /// let envelope = MercatorEnvelope::around([
    ///     Coord { x: 0.0, y: 0.0 },
    ///     Coord { x: 1.0, y: 1.0 },
    /// ])
    /// .expect("non-empty input");
    /// assert_eq!(envelope.min_x, 0.0);
    /// assert!(envelope.max_y > 0.0);
    /// ```
    pub fn around<I>(coords: I) -> Option<Self>
    where
        I: IntoIterator<Item = Coord<f64>>,
    {
        coords.into_iter().map(project).fold(None, |acc, p| {
            Some(match acc {
                None => Self {
                    min_x: p.x,
                    min_y: p.y,
                    max_x: p.x,
                    max_y: p.y,
                },
                Some(env) => Self {
                    min_x: env.min_x.min(p.x),
                    min_y: env.min_y.min(p.y),
                    max_x: env.max_x.max(p.x),
                    max_y: env.max_y.max(p.y),
                },
            })
        })
    }

    /// Parameters in the `(xmin, ymin, xmax, ymax)` order stores expect.
    pub const fn as_params(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    /// Whether two envelopes overlap, touching edges included.
    pub fn intersects(&self, other: &Self) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }
}
