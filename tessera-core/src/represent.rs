//! Hand-off from a closed [`AreaData`] to a renderer.
//!
//! Rendering itself happens elsewhere. This module applies an injected styling
//! function to every entity and collects the styled items, borrowing geometry
//! payloads rather than copying them.

use geo::Coord;

use crate::area::AreaData;
use crate::entity::{EntityId, EntityKind, GeometryPayload, Tags};
use crate::extent::Extent;

/// Drawing attributes for one entity. Unset attributes use the renderer's
/// defaults.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Style {
    /// Fill colour.
    pub face_colour: Option<String>,
    /// Outline colour.
    pub edge_colour: Option<String>,
    /// Outline width in points.
    pub line_width: Option<f64>,
    /// Outline dash pattern, e.g. `--`.
    pub line_style: Option<String>,
    /// Colour applied to both fill and outline.
    pub colour: Option<String>,
    /// Opacity in `[0, 1]`.
    pub alpha: Option<f64>,
    /// Text drawn at the entity.
    pub label: Option<String>,
    /// Share of the scene area an entity must cover for its label to be
    /// drawn.
    pub min_label_area_ratio: Option<f64>,
}

/// Value of a drawing option.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawingValue {
    /// Textual value such as a colour.
    Text(String),
    /// Numeric value such as a width.
    Number(f64),
}

impl Style {
    /// Set the fill colour.
    #[must_use]
    pub fn with_face_colour(mut self, colour: impl Into<String>) -> Self {
        self.face_colour = Some(colour.into());
        self
    }

    /// Set the outline colour.
    #[must_use]
    pub fn with_edge_colour(mut self, colour: impl Into<String>) -> Self {
        self.edge_colour = Some(colour.into());
        self
    }

    /// Set the outline width.
    #[must_use]
    pub fn with_line_width(mut self, width: f64) -> Self {
        self.line_width = Some(width);
        self
    }

    /// Set the outline dash pattern.
    #[must_use]
    pub fn with_line_style(mut self, style: impl Into<String>) -> Self {
        self.line_style = Some(style.into());
        self
    }

    /// Set the shared colour.
    #[must_use]
    pub fn with_colour(mut self, colour: impl Into<String>) -> Self {
        self.colour = Some(colour.into());
        self
    }

    /// Set the opacity.
    #[must_use]
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = Some(alpha);
        self
    }

    /// Set the label and the minimum area ratio required to draw it.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>, min_area_ratio: Option<f64>) -> Self {
        self.label = Some(label.into());
        self.min_label_area_ratio = min_area_ratio;
        self
    }

    /// Set shape attributes as renderer keyword pairs.
    ///
    /// Label settings are not drawing options and are left out.
    ///
    /// # Examples
    ///
    /// ```
    /// use tessera_core::{DrawingValue, Style};
    ///
    /// let style = Style::default().with_edge_colour("black").with_line_width(0.5);
    /// assert_eq!(
    ///     style.drawing_options(),
    ///     vec![
    ///         ("edgecolor", DrawingValue::Text("black".into())),
    ///         ("linewidth", DrawingValue::Number(0.5)),
    ///     ]
    /// );
    /// ```
    pub fn drawing_options(&self) -> Vec<(&'static str, DrawingValue)> {
        let text = |key, value: &Option<String>| {
            value.as_ref().map(|v| (key, DrawingValue::Text(v.clone())))
        };
        let number = |key, value: Option<f64>| value.map(|v| (key, DrawingValue::Number(v)));
        [
            text("facecolor", &self.face_colour),
            text("edgecolor", &self.edge_colour),
            number("linewidth", self.line_width),
            text("linestyle", &self.line_style),
            text("color", &self.colour),
            number("alpha", self.alpha),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Geometry handed to the styler and renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderGeometry<'a> {
    /// Location of a point, `x = longitude`, `y = latitude`.
    Location(Coord<f64>),
    /// Store-rendered payload of a path or group.
    Payload(&'a GeometryPayload),
    /// The store provided no geometry.
    Missing,
}

impl<'a> RenderGeometry<'a> {
    fn of(payload: Option<&'a GeometryPayload>) -> Self {
        payload.map_or(Self::Missing, Self::Payload)
    }
}

/// One styled entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderItem<'a> {
    /// Entity kind.
    pub kind: EntityKind,
    /// Entity ID.
    pub id: EntityId,
    /// Geometry as stored.
    pub geometry: RenderGeometry<'a>,
    /// Style chosen by the styler.
    pub style: Style,
}

/// Styled entities ready for a renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene<'a> {
    /// The requested extent, unmodified.
    pub extent: Extent,
    /// Styled items: points, then paths, then groups, each in ID order.
    pub items: Vec<RenderItem<'a>>,
}

/// Apply `styler` to every entity of `area`.
///
/// Entities for which the styler returns `None` are left out of the scene.
///
/// # Examples
///
/// ```
/// use geo::Coord;
/// use tessera_core::{AreaData, EntityKind, Extent, Point, Style, represent};
///
/// # fn main() -> Result<(), tessera_core::ExtentError> {
/// let mut area = AreaData::default();
/// area.insert_point(Point::with_empty_tags(1, Coord { x: 0.5, y: 0.5 }));
/// let extent = Extent::new(0.0, 1.0, 0.0, 1.0)?;
///
/// let scene = represent(&area, extent, |kind, _, _, _| {
///     (kind == EntityKind::Point).then(|| Style::default().with_colour("red"))
/// });
/// assert_eq!(scene.items.len(), 1);
/// assert_eq!(scene.extent, extent);
/// # Ok(())
/// # }
/// ```
pub fn represent<'a, F>(area: &'a AreaData, extent: Extent, styler: F) -> Scene<'a>
where
    F: Fn(EntityKind, EntityId, RenderGeometry<'a>, &Tags) -> Option<Style>,
{
    let points = area.points().values().map(|p| {
        (
            EntityKind::Point,
            p.id,
            RenderGeometry::Location(p.location),
            &p.tags,
        )
    });
    let paths = area.paths().values().map(|p| {
        (
            EntityKind::Path,
            p.id,
            RenderGeometry::of(p.geometry.as_ref()),
            &p.tags,
        )
    });
    let groups = area.groups().values().map(|g| {
        (
            EntityKind::Group,
            g.id,
            RenderGeometry::of(g.geometry.as_ref()),
            &g.tags,
        )
    });

    let items = points
        .chain(paths)
        .chain(groups)
        .filter_map(|(kind, id, geometry, tags)| {
            styler(kind, id, geometry, tags).map(|style| RenderItem {
                kind,
                id,
                geometry,
                style,
            })
        })
        .collect();
    Scene { extent, items }
}
