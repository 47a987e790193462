//! Map tile addressing and style resolution.
//!
//! This module holds the pure, side-effect-free pieces the prefetch job builds
//! its work list from:
//!
//! ```text
//! ┌─────────────────────┐     ┌─────────────────────────┐
//! │ BoundingBox + zoom  │     │ style reference + token │
//! └──────────┬──────────┘     └────────────┬────────────┘
//!            │ coords                      │ style
//!            ▼                             ▼
//! ┌─────────────────────┐     ┌─────────────────────────┐
//! │  TileCoordinate*    │     │ descriptor URL, tile    │
//! │  (Web-Mercator)     │     │ templates, sprite URLs  │
//! └──────────┬──────────┘     └────────────┬────────────┘
//!            └──────────────┬──────────────┘
//!                           ▼
//!                concrete tile URLs
//! ```
//!
//! # Components
//!
//! - [`tile_range`] / [`tiles_in_bbox`]: bounding box to tile set
//! - [`StyleResolver`]: style reference to descriptor URL, template and sprite extraction
//! - [`expand_template`]: `{z}/{x}/{y}` substitution

mod coords;
mod style;

pub use coords::{
    lat_to_tile_y, lon_to_tile_x, tile_range, tiles_in_bbox, BoundingBox, TileCoordinate,
    TileRange, MAX_ZOOM,
};
pub use style::{
    expand_template, host_matches, StyleResolver, ACCESS_TOKEN_PARAM, DEFAULT_PROVIDER_API_BASE,
    DEFAULT_PROVIDER_HOST, DEFAULT_PROVIDER_SCHEME,
};
