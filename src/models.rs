//! Core data models for the mapify pipeline.
//!
//! This module contains the place records read from input, the enriched
//! places handed to grouping, the marker groups produced by grouping, and
//! the persisted row shapes of the relational store.

use chrono::NaiveTime;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Geography
// ============================================================================

/// A latitude/longitude pair in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// South-west and north-east corners enclosing a set of points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub south_west: GeoPoint,
    pub north_east: GeoPoint,
}

impl Bounds {
    /// `[[min_lat, min_lon], [max_lat, max_lon]]`, the shape Leaflet expects.
    pub fn as_corners(&self) -> [[f64; 2]; 2] {
        [
            [self.south_west.latitude, self.south_west.longitude],
            [self.north_east.latitude, self.north_east.longitude],
        ]
    }
}

// ============================================================================
// Marker Colour
// ============================================================================

/// Marker colours understood by the Leaflet awesome-markers plugin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerColour {
    Red,
    DarkRed,
    LightRed,
    Orange,
    Beige,
    Green,
    DarkGreen,
    LightGreen,
    Blue,
    DarkBlue,
    CadetBlue,
    Purple,
    DarkPurple,
    White,
    Pink,
    LightBlue,
    LightGray,
    Gray,
    Black,
}

impl MarkerColour {
    pub const ALL: [MarkerColour; 19] = [
        MarkerColour::Red,
        MarkerColour::DarkRed,
        MarkerColour::LightRed,
        MarkerColour::Orange,
        MarkerColour::Beige,
        MarkerColour::Green,
        MarkerColour::DarkGreen,
        MarkerColour::LightGreen,
        MarkerColour::Blue,
        MarkerColour::DarkBlue,
        MarkerColour::CadetBlue,
        MarkerColour::Purple,
        MarkerColour::DarkPurple,
        MarkerColour::White,
        MarkerColour::Pink,
        MarkerColour::LightBlue,
        MarkerColour::LightGray,
        MarkerColour::Gray,
        MarkerColour::Black,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MarkerColour::Red => "red",
            MarkerColour::DarkRed => "darkred",
            MarkerColour::LightRed => "lightred",
            MarkerColour::Orange => "orange",
            MarkerColour::Beige => "beige",
            MarkerColour::Green => "green",
            MarkerColour::DarkGreen => "darkgreen",
            MarkerColour::LightGreen => "lightgreen",
            MarkerColour::Blue => "blue",
            MarkerColour::DarkBlue => "darkblue",
            MarkerColour::CadetBlue => "cadetblue",
            MarkerColour::Purple => "purple",
            MarkerColour::DarkPurple => "darkpurple",
            MarkerColour::White => "white",
            MarkerColour::Pink => "pink",
            MarkerColour::LightBlue => "lightblue",
            MarkerColour::LightGray => "lightgray",
            MarkerColour::Gray => "gray",
            MarkerColour::Black => "black",
        }
    }
}

impl Default for MarkerColour {
    fn default() -> Self {
        MarkerColour::Blue
    }
}

impl fmt::Display for MarkerColour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarkerColour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        MarkerColour::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown marker colour '{}'", s.trim()))
    }
}

// ============================================================================
// Places
// ============================================================================

/// One input row, before enrichment. Coordinates, name and colour may still
/// be missing; enrichment fills them from the link.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaceRecord {
    pub link: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub name: String,
    pub open_time: Option<NaiveTime>,
    pub close_time: Option<NaiveTime>,
    pub marker_colour: Option<MarkerColour>,
}

impl PlaceRecord {
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            latitude: None,
            longitude: None,
            name: String::new(),
            open_time: None,
            close_time: None,
            marker_colour: None,
        }
    }

    pub fn location(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        }
    }
}

/// An enriched place: located, named and coloured.
#[derive(Clone, Debug, PartialEq)]
pub struct Place {
    pub link: String,
    pub location: GeoPoint,
    pub name: String,
    pub open_time: Option<NaiveTime>,
    pub close_time: Option<NaiveTime>,
    pub marker_colour: MarkerColour,
}

impl Place {
    /// Popup snippet for this place: bold name, followed by opening hours
    /// when both ends are known.
    pub fn label(&self) -> String {
        let name = escape_html(&self.name);
        match (self.open_time, self.close_time) {
            (Some(open), Some(close)) => format!(
                "<span><b>{}</b> {}–{}</span>",
                name,
                open.format("%H:%M"),
                close.format("%H:%M")
            ),
            _ => format!("<span><b>{}</b></span>", name),
        }
    }
}

/// Separator placed between member labels of a merged marker.
pub const LABEL_SEPARATOR: &str = "<br><br>";

/// Escape text for inclusion in HTML markup.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ============================================================================
// Marker Groups
// ============================================================================

/// Places merged into one visual marker by proximity grouping.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerGroup {
    pub id: usize,
    /// Mean latitude / mean longitude of all members.
    pub location: GeoPoint,
    /// Location of the seed place that opened the group.
    pub anchor: GeoPoint,
    /// Location of the last member in input order.
    pub last: GeoPoint,
    pub label: String,
    pub colour: MarkerColour,
    /// Links of member places, in input order.
    pub member_links: Vec<String>,
}

// ============================================================================
// Persisted Rows
// ============================================================================

/// A row of the `marker` table.
#[derive(Clone, Debug, PartialEq)]
pub struct Marker {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub icon_id: Option<i64>,
}

impl Marker {
    /// Stored centroid.
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// A row of the `marker_icon` lookup table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkerIcon {
    pub id: i64,
    pub colour: String,
    pub icon: String,
    pub prefix: String,
}

/// A row of the `schema_version` ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaVersion {
    pub version: u32,
    pub description: String,
    pub applied_at: String,
}
