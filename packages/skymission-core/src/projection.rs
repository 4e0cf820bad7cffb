use geo::MapCoordsInPlace;
use geo_types::Polygon;
use proj4rs::proj::Proj;

use crate::error::{MissionError, Result};

pub const WGS84_EPSG: i32 = 4326;

// Definitions for the codes mission inputs commonly arrive in.
const EPSG_DEFINITIONS: &[(i32, &str)] = &[
    (4326, "+proj=longlat +datum=WGS84 +no_defs"),
    (4258, "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs"),
    (4269, "+proj=longlat +datum=NAD83 +no_defs"),
    (4737, "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs"),
    (
        3857,
        "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +no_defs",
    ),
    (
        5179,
        "+proj=tmerc +lat_0=38 +lon_0=127.5 +k=0.9996 +x_0=1000000 +y_0=2000000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
    ),
    (
        5181,
        "+proj=tmerc +lat_0=38 +lon_0=127 +k=1 +x_0=200000 +y_0=500000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
    ),
    (
        5185,
        "+proj=tmerc +lat_0=38 +lon_0=125 +k=1 +x_0=200000 +y_0=600000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
    ),
    (
        5186,
        "+proj=tmerc +lat_0=38 +lon_0=127 +k=1 +x_0=200000 +y_0=600000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
    ),
    (
        5187,
        "+proj=tmerc +lat_0=38 +lon_0=129 +k=1 +x_0=200000 +y_0=600000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
    ),
    (
        5188,
        "+proj=tmerc +lat_0=38 +lon_0=131 +k=1 +x_0=200000 +y_0=600000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
    ),
    (
        2154,
        "+proj=lcc +lat_0=46.5 +lon_0=3 +lat_1=49 +lat_2=44 +x_0=700000 +y_0=6600000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
    ),
    (25832, "+proj=utm +zone=32 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"),
    (25833, "+proj=utm +zone=33 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"),
];

/// A coordinate reference system known by label and proj definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Crs {
    label: String,
    definition: String,
    epsg: Option<i32>,
}

impl Crs {
    pub fn wgs84() -> Self {
        Crs {
            label: "EPSG:4326".to_string(),
            definition: EPSG_DEFINITIONS[0].1.to_string(),
            epsg: Some(WGS84_EPSG),
        }
    }

    pub fn from_epsg(code: i32) -> Result<Self> {
        let definition = match code {
            32601..=32660 => format!("+proj=utm +zone={} +datum=WGS84 +units=m +no_defs", code - 32600),
            32701..=32760 => format!("+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs", code - 32700),
            _ => EPSG_DEFINITIONS
                .iter()
                .find(|(c, _)| *c == code)
                .map(|(_, def)| def.to_string())
                .ok_or_else(|| MissionError::projection(format!("EPSG:{}", code), "unsupported EPSG code"))?,
        };
        Ok(Crs { label: format!("EPSG:{}", code), definition, epsg: Some(code) })
    }

    /// Accepts `EPSG:<code>`, a bare code, or a `+proj=` string.
    pub fn from_user_string(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.starts_with('+') {
            // Validate eagerly so bad strings fail at configuration time.
            Proj::from_proj_string(value).map_err(|e| MissionError::projection(value, e))?;
            return Ok(Crs { label: value.to_string(), definition: value.to_string(), epsg: None });
        }
        let code = value
            .strip_prefix("EPSG:")
            .or_else(|| value.strip_prefix("epsg:"))
            .unwrap_or(value);
        let code: i32 = code
            .trim()
            .parse()
            .map_err(|_| MissionError::projection(value, "expected EPSG:<code> or a proj string"))?;
        Crs::from_epsg(code)
    }

    /// WGS84 UTM zone containing the given point.
    pub fn utm_for(lon: f64, lat: f64) -> Self {
        let zone = (((lon + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60);
        let code = if lat < 0.0 { 32700 + zone } else { 32600 + zone };
        let south = if lat < 0.0 { " +south" } else { "" };
        Crs {
            label: format!("EPSG:{}", code),
            definition: format!("+proj=utm +zone={}{} +datum=WGS84 +units=m +no_defs", zone, south),
            epsg: Some(code),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn epsg(&self) -> Option<i32> {
        self.epsg
    }

    pub fn is_geographic(&self) -> bool {
        self.definition.contains("+proj=longlat") || self.definition.contains("+proj=latlong")
    }

    fn proj(&self) -> Result<Proj> {
        Proj::from_proj_string(&self.definition).map_err(|e| MissionError::projection(&self.label, e))
    }
}

impl Default for Crs {
    fn default() -> Self {
        Crs::wgs84()
    }
}

/// Reproject a polygon between two systems. Geographic input and output
/// are in degrees.
pub fn reproject_polygon(polygon: &Polygon<f64>, from: &Crs, to: &Crs) -> Result<Polygon<f64>> {
    if from.definition == to.definition {
        return Ok(polygon.clone());
    }
    let source = from.proj()?;
    let target = to.proj()?;

    let mut working = polygon.clone();
    if source.is_latlong() {
        working.map_coords_in_place(|c| geo_types::Coord { x: c.x.to_radians(), y: c.y.to_radians() });
    }
    proj4rs::transform::transform(&source, &target, &mut working)
        .map_err(|e| MissionError::projection(format!("{} -> {}", from.label, to.label), e))?;
    if target.is_latlong() {
        working.map_coords_in_place(|c| geo_types::Coord { x: c.x.to_degrees(), y: c.y.to_degrees() });
    }
    Ok(working)
}
