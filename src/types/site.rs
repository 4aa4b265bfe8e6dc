//! Site types (physical stops a tour can visit)

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Finite and within the WGS84 latitude/longitude ranges
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Site entity. Reference data owned by site management, read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: Uuid,
    pub name: String,

    // Address
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub postal_code: String,

    // Coordinates (from geocoding)
    pub coordinates: Option<Coordinates>,
}

impl Site {
    pub fn new(name: impl Into<String>, coordinates: Option<Coordinates>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            street: String::new(),
            city: String::new(),
            postal_code: String::new(),
            coordinates,
        }
    }

    /// Coordinates only when they are usable for distance-based operations
    pub fn valid_coordinates(&self) -> Option<Coordinates> {
        self.coordinates.filter(Coordinates::is_valid)
    }
}
