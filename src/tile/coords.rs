//! Web-Mercator tile coordinate math.
//!
//! Converts a geographic bounding box into the rectangular set of slippy-map
//! tiles that cover it at a given zoom level.
//!
//! # Bounds
//!
//! ```text
//!   xMin = lon2x(west)    xMax = lon2x(east)
//!   yMin = lat2y(north)   yMax = lat2y(south)
//! ```
//!
//! Every bound is clamped to `[0, 2^zoom - 1]`. A box whose bounds end up
//! inverted (for example one straddling the antimeridian) yields an empty range.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Highest zoom level accepted for area prefetching.
pub const MAX_ZOOM: u8 = 22;

// =============================================================================
// Types
// =============================================================================

/// A geographic bounding box in degrees.
///
/// Serialized as `[west, south, east, north]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    /// Create a bounding box from its four edges.
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Whether all four edges are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.west.is_finite()
            && self.south.is_finite()
            && self.east.is_finite()
            && self.north.is_finite()
    }

    /// Whether `west < east` and `south < north`.
    pub fn is_well_formed(&self) -> bool {
        self.west < self.east && self.south < self.north
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(edges: [f64; 4]) -> Self {
        Self::new(edges[0], edges[1], edges[2], edges[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(bbox: BoundingBox) -> Self {
        [bbox.west, bbox.south, bbox.east, bbox.north]
    }
}

/// A slippy-map tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoordinate {
    /// Zoom level
    pub zoom: u8,

    /// Column, 0 at the antimeridian going east
    pub x: u32,

    /// Row, 0 at the north edge going south
    pub y: u32,
}

impl TileCoordinate {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }
}

impl std::fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Inclusive rectangle of tiles at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

impl TileRange {
    /// Number of tiles in the range (0 when inverted).
    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let cols = (self.x_max - self.x_min) as usize + 1;
        let rows = (self.y_max - self.y_min) as usize + 1;
        cols * rows
    }

    /// Whether the range contains no tiles.
    pub fn is_empty(&self) -> bool {
        self.x_min > self.x_max || self.y_min > self.y_max
    }

    /// Iterate all tiles, column by column.
    pub fn iter(&self) -> impl Iterator<Item = TileCoordinate> {
        let range = *self;
        let (y_min, y_max) = if range.is_empty() {
            (1, 0)
        } else {
            (range.y_min, range.y_max)
        };
        (range.x_min..=range.x_max)
            .flat_map(move |x| (y_min..=y_max).map(move |y| TileCoordinate::new(range.zoom, x, y)))
    }
}

// =============================================================================
// Projection
// =============================================================================

/// Number of tiles along one axis at `zoom`.
#[inline]
fn tiles_per_axis(zoom: u8) -> f64 {
    2.0_f64.powi(zoom as i32)
}

/// Clamp a fractional tile index to a valid column/row.
#[inline]
fn clamp_index(value: f64, zoom: u8) -> u32 {
    let max = tiles_per_axis(zoom) - 1.0;
    // NaN survives clamp() and saturates to 0 on the cast
    value.floor().clamp(0.0, max) as u32
}

/// Longitude to fractional tile column.
#[inline]
pub fn lon_to_tile_x(lon: f64, zoom: u8) -> f64 {
    (lon + 180.0) / 360.0 * tiles_per_axis(zoom)
}

/// Latitude to fractional tile row (Web-Mercator).
#[inline]
pub fn lat_to_tile_y(lat: f64, zoom: u8) -> f64 {
    let lat_rad = lat.to_radians();
    let merc = (lat_rad.tan() + 1.0 / lat_rad.cos()).ln();
    (1.0 - merc / PI) / 2.0 * tiles_per_axis(zoom)
}

/// Compute the clamped tile range covering `bbox` at `zoom`.
pub fn tile_range(bbox: &BoundingBox, zoom: u8) -> TileRange {
    TileRange {
        zoom,
        x_min: clamp_index(lon_to_tile_x(bbox.west, zoom), zoom),
        x_max: clamp_index(lon_to_tile_x(bbox.east, zoom), zoom),
        y_min: clamp_index(lat_to_tile_y(bbox.north, zoom), zoom),
        y_max: clamp_index(lat_to_tile_y(bbox.south, zoom), zoom),
    }
}

/// Enumerate every tile covering `bbox` at `zoom`.
pub fn tiles_in_bbox(bbox: &BoundingBox, zoom: u8) -> Vec<TileCoordinate> {
    tile_range(bbox, zoom).iter().collect()
}

// =============================================================================
// Tests
// =============================================================================
