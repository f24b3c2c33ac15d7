/// Foodshare geo helpers
///
/// Distances between a user and the listings/requests around them, and the
/// short labels shown on cards ("850m away", "2.4km away").
/// Coordinates come from the caller; device positioning is not handled here.

pub mod distance;
pub mod format;

pub use distance::{Coordinates, GeoError, distance_meters};
pub use format::{format_distance, format_kilometers};
