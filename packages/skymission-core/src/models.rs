// This is the models module containing shared data structures
use serde::{Deserialize, Serialize};

use crate::error::{MissionError, Result};

/// Mission parameters to patch into the templates.
///
/// Every field is optional: `None` leaves the template value untouched,
/// whether the key was absent or explicitly null in the input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideSet {
    pub altitude: Option<f64>,
    pub shoot_height: Option<f64>,
    pub margin: Option<i64>,
    pub ortho_camera_overlap_h: Option<i64>,
    pub ortho_camera_overlap_w: Option<i64>,
    pub ortho_lidar_overlap_h: Option<i64>,
    pub ortho_lidar_overlap_w: Option<i64>,
    pub auto_flight_speed: Option<f64>,
    pub global_transitional_speed: Option<f64>,
    pub take_off_security_height: Option<f64>,
    pub drone_model: Option<String>,
    pub gimbal_pitch: Option<f64>,
}

impl OverrideSet {
    /// Shoot height falls back to altitude when it was not supplied.
    pub fn effective_shoot_height(&self) -> Option<f64> {
        self.shoot_height.or(self.altitude)
    }

    pub fn is_empty(&self) -> bool {
        *self == OverrideSet::default()
    }
}

/// Optional document-level updates applied during injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionFlags {
    pub set_times: bool,
    pub set_takeoff_ref_point: bool,
}

impl Default for InjectionFlags {
    fn default() -> Self {
        InjectionFlags { set_times: true, set_takeoff_ref_point: false }
    }
}

/// One vertex of a [`CoordinateRing`], kept as the text it is written with.
#[derive(Debug, Clone, PartialEq)]
pub struct RingVertex {
    pub lon: f64,
    pub lat: f64,
    lon_text: String,
    lat_text: String,
}

impl RingVertex {
    /// Vertex formatted with 9 fractional digits.
    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        RingVertex {
            lon,
            lat,
            lon_text: format!("{:.9}", lon),
            lat_text: format!("{:.9}", lat),
        }
    }

    /// Vertex that keeps the source tokens verbatim.
    pub fn from_tokens(lon: &str, lat: &str) -> Option<Self> {
        let lon_value = lon.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
        let lat_value = lat.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
        Some(RingVertex {
            lon: lon_value,
            lat: lat_value,
            lon_text: lon.trim().to_string(),
            lat_text: lat.trim().to_string(),
        })
    }

    pub fn lon_text(&self) -> &str {
        &self.lon_text
    }

    pub fn lat_text(&self) -> &str {
        &self.lat_text
    }

    fn same_text(&self, other: &RingVertex) -> bool {
        self.lon_text == other.lon_text && self.lat_text == other.lat_text
    }
}

/// Closed ring of longitude/latitude vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateRing {
    vertices: Vec<RingVertex>,
}

impl CoordinateRing {
    /// Builds a ring, appending the first vertex when the ring is open.
    pub fn new(mut vertices: Vec<RingVertex>, source_name: &str) -> Result<Self> {
        let first = match vertices.first() {
            Some(first) => first.clone(),
            None => return Err(MissionError::not_found(source_name, "coordinate block is empty")),
        };

        let mut distinct: Vec<&RingVertex> = Vec::new();
        for vertex in &vertices {
            if !distinct.iter().any(|seen| seen.same_text(vertex)) {
                distinct.push(vertex);
            }
        }
        if distinct.len() < 3 {
            return Err(MissionError::not_found(
                source_name,
                format!("ring has {} distinct vertices, at least 3 are required", distinct.len()),
            ));
        }

        let closed = vertices.last().map(|last| last.same_text(&first)).unwrap_or(false);
        if !closed {
            vertices.push(first);
        }
        Ok(CoordinateRing { vertices })
    }

    pub fn vertices(&self) -> &[RingVertex] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Plain mean of every vertex, closing vertex included.
    pub fn mean_center(&self) -> (f64, f64) {
        let n = self.vertices.len() as f64;
        let (lon_sum, lat_sum) = self
            .vertices
            .iter()
            .fold((0.0, 0.0), |(x, y), v| (x + v.lon, y + v.lat));
        (lon_sum / n, lat_sum / n)
    }

    /// Renders `lon,lat,0` triples joined by `separator`.
    pub fn render(&self, separator: &str) -> String {
        self.vertices
            .iter()
            .map(|v| format!("{},{},0", v.lon_text, v.lat_text))
            .collect::<Vec<_>>()
            .join(separator)
    }

    pub fn to_polygon(&self) -> geo_types::Polygon<f64> {
        let coords: Vec<geo_types::Coord<f64>> = self
            .vertices
            .iter()
            .map(|v| geo_types::Coord { x: v.lon, y: v.lat })
            .collect();
        geo_types::Polygon::new(geo_types::LineString::from(coords), vec![])
    }
}

/// Sensor and optics parameters of one drone camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraSpec {
    pub sensor_width_mm: f64,
    pub sensor_height_mm: f64,
    pub image_width_px: u32,
    pub image_height_px: u32,
    pub focal_length_mm: f64,
    pub shutter_speed_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Safe,
    Warning,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub gsd_cm_per_px: f64,
    pub motion_blur_cm: f64,
    pub shutter_speed: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub messages: Vec<String>,
    pub metrics: ValidationMetrics,
}
