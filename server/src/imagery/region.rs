//! Region of interest drawn by the user

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::types::ImageryError;

/// Polygon coordinates as sent by the map front-end.
///
/// The front-end sends the outer ring of a GeoJSON polygon, but a full ring
/// list is accepted too; only its outer ring is used.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PolygonCoords {
    Ring(Vec<[f64; 2]>),
    Rings(Vec<Vec<[f64; 2]>>),
}

impl PolygonCoords {
    fn into_outer_ring(self) -> Vec<[f64; 2]> {
        match self {
            Self::Ring(ring) => ring,
            Self::Rings(rings) => rings.into_iter().next().unwrap_or_default(),
        }
    }
}

/// A closed polygon of (longitude, latitude) vertices
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    ring: Vec<[f64; 2]>,
}

impl Region {
    /// Build a region from user coordinates, closing the ring if needed
    pub fn from_coords(coords: PolygonCoords) -> Result<Self, ImageryError> {
        let mut ring = coords.into_outer_ring();

        for &[lng, lat] in &ring {
            if !lng.is_finite() || !lat.is_finite() {
                return Err(ImageryError::InvalidRegion(
                    "coordinates must be finite numbers".to_string(),
                ));
            }
            if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
                return Err(ImageryError::InvalidRegion(format!(
                    "coordinate ({}, {}) is outside lon/lat bounds",
                    lng, lat
                )));
            }
        }

        if let Some(&first) = ring.first()
            && (ring.len() == 1 || ring.last() != Some(&first))
        {
            ring.push(first);
        }

        // The closing vertex repeats the first one
        let mut distinct: Vec<[f64; 2]> = Vec::with_capacity(ring.len());
        for vertex in &ring[..ring.len().saturating_sub(1)] {
            if !distinct.contains(vertex) {
                distinct.push(*vertex);
            }
        }
        if distinct.len() < 3 {
            return Err(ImageryError::InvalidRegion(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                distinct.len()
            )));
        }

        Ok(Self { ring })
    }

    /// Closed ring of (longitude, latitude) vertices
    pub fn ring(&self) -> &[[f64; 2]] {
        &self.ring
    }

    /// GeoJSON geometry for catalog queries
    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [self.ring],
        })
    }

    /// Bounding box as (min_lng, min_lat, max_lng, max_lat)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.ring.iter().fold(
            (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
            |(min_x, min_y, max_x, max_y), &[x, y]| {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            },
        )
    }
}
