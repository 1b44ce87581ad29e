//! Measurement-grid geometry
//!
//! - `hull` - Convex hull of unit direction vectors
//! - `gain_table` - Compressed VBAP gain table with 2-D/3-D detection

pub mod gain_table;
pub mod hull;

pub use gain_table::{is_flat_grid, GainTable};
pub use hull::convex_hull;
