use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Equatorial radius (WGS84), in meters.
const EARTH_RADIUS_M: f64 = 6_378_137.0;

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("Invalid latitude {0}: must be between -90 and 90")]
    Latitude(f64),

    #[error("Invalid longitude {0}: must be between -180 and 180")]
    Longitude(f64),
}

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Result<Self, GeoError> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(GeoError::Latitude(lat));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(GeoError::Longitude(lng));
        }
        Ok(Self { lat, lng })
    }

    /// Builds a point from the nullable latitude/longitude columns of a row.
    /// Rows missing either half, or holding out-of-range values, have no
    /// position.
    pub fn from_row(lat: Option<f64>, lng: Option<f64>) -> Option<Self> {
        Self::new(lat?, lng?).ok()
    }
}

/// Great-circle distance between two points (haversine), rounded to whole
/// meters.
pub fn distance_meters(from: Coordinates, to: Coordinates) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lng = (to.lng - from.lng).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    (EARTH_RADIUS_M * c).round()
}
