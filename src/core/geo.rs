use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Axis-aligned box covering a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeoBounds {
    pub fn covering(points: &[LatLon]) -> Option<GeoBounds> {
        let first = points.first()?;
        let mut bounds = GeoBounds {
            south: first.lat,
            west: first.lon,
            north: first.lat,
            east: first.lon,
        };
        for point in &points[1..] {
            bounds.south = bounds.south.min(point.lat);
            bounds.north = bounds.north.max(point.lat);
            bounds.west = bounds.west.min(point.lon);
            bounds.east = bounds.east.max(point.lon);
        }
        Some(bounds)
    }

    #[cfg(test)]
    pub fn contains(&self, point: LatLon) -> bool {
        point.lat >= self.south
            && point.lat <= self.north
            && point.lon >= self.west
            && point.lon <= self.east
    }
}

/// The incident the operator currently has selected on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireLocation {
    pub lat: f64,
    pub lon: f64,
    pub address: String,
    pub name: String,
}

impl FireLocation {
    pub fn point(&self) -> LatLon {
        LatLon::new(self.lat, self.lon)
    }
}

pub fn parse_coordinate(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}
