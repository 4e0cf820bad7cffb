use std::collections::HashMap;
use std::path::Path;

use geo_types::Geometry;
use geozero::wkb::{GpkgWkb, Wkb};
use geozero::ToGeo;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{MissionError, Result};
use crate::projection::Crs;

/// One row of a feature layer: geometry plus its attribute values.
#[derive(Debug, Clone, Serialize)]
pub struct VectorFeature {
    /// Position of the row in the layer, before any filtering.
    pub index: usize,
    #[serde(skip)]
    pub geometry: Option<Geometry<f64>>,
    pub attributes: HashMap<String, serde_json::Value>,
}

impl VectorFeature {
    pub fn is_polygonal(&self) -> bool {
        matches!(self.geometry, Some(Geometry::Polygon(_)) | Some(Geometry::MultiPolygon(_)))
    }

    /// Attribute rendered as text; `None` for missing and null values.
    pub fn attribute_text(&self, field: &str) -> Option<String> {
        match self.attributes.get(field)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// A feature table read from a GeoPackage.
#[derive(Debug, Clone)]
pub struct FeatureLayer {
    pub name: String,
    pub crs: Crs,
    /// Attribute columns, excluding the geometry and primary key.
    pub fields: Vec<String>,
    pub features: Vec<VectorFeature>,
}

impl FeatureLayer {
    pub fn polygon_features(&self) -> impl Iterator<Item = &VectorFeature> {
        self.features.iter().filter(|f| f.is_polygonal())
    }
}

/// Strategy for turning a GeoPackage file into a [`FeatureLayer`].
pub trait LayerReader {
    fn name(&self) -> &'static str;
    fn read_layer(&self, path: &Path, layer: Option<&str>) -> Result<FeatureLayer>;
}

/// Decodes geometry blobs with geozero's GeoPackage reader and fails on
/// the first blob it cannot decode.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeozeroGpkgReader;

impl LayerReader for GeozeroGpkgReader {
    fn name(&self) -> &'static str {
        "geozero-gpkg"
    }

    fn read_layer(&self, path: &Path, layer: Option<&str>) -> Result<FeatureLayer> {
        read_feature_table(path, layer, |blob, _, _| {
            GpkgWkb(blob)
                .to_geo()
                .map(Some)
                .map_err(|e| MissionError::geometry(format!("undecodable geometry blob: {}", e)))
        })
    }
}

/// Strips the GeoPackage header itself and decodes the plain WKB payload.
/// Rows whose geometry cannot be decoded are kept without geometry.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawWkbGpkgReader;

impl LayerReader for RawWkbGpkgReader {
    fn name(&self) -> &'static str {
        "raw-wkb"
    }

    fn read_layer(&self, path: &Path, layer: Option<&str>) -> Result<FeatureLayer> {
        read_feature_table(path, layer, |blob, index, column_srs| {
            let header = match GpkgHeader::parse(blob) {
                Ok(header) => header,
                Err(reason) => {
                    warn!("row {}: skipping geometry ({})", index, reason);
                    return Ok(None);
                }
            };
            if header.empty {
                return Ok(None);
            }
            if header.srs_id != column_srs {
                debug!("row {}: blob srs {} differs from column srs {}", index, header.srs_id, column_srs);
            }
            match Wkb(&blob[header.wkb_offset..]).to_geo() {
                Ok(geometry) => Ok(Some(geometry)),
                Err(e) => {
                    warn!("row {}: skipping geometry ({})", index, e);
                    Ok(None)
                }
            }
        })
    }
}

/// The default reader chain: geozero first, raw WKB as fallback.
pub fn default_readers() -> Vec<Box<dyn LayerReader>> {
    vec![Box::new(GeozeroGpkgReader), Box::new(RawWkbGpkgReader)]
}

/// Try each reader in turn. When all fail, the error carries the first
/// reader's failure and the last fallback's failure.
pub fn read_layer_with_fallback(
    readers: &[Box<dyn LayerReader>],
    path: &Path,
    layer: Option<&str>,
) -> Result<FeatureLayer> {
    let mut primary: Option<String> = None;
    let mut secondary: Option<String> = None;

    for reader in readers {
        match reader.read_layer(path, layer) {
            Ok(layer) => {
                debug!("{} read {} features from {}", reader.name(), layer.features.len(), path.display());
                return Ok(layer);
            }
            // A missing layer is not a read failure; the next reader would say the same.
            Err(err @ MissionError::GeometryNotFound { .. }) => return Err(err),
            Err(err) => {
                warn!("{} failed on {}: {}", reader.name(), path.display(), err);
                if primary.is_none() {
                    primary = Some(err.to_string());
                } else {
                    secondary = Some(err.to_string());
                }
            }
        }
    }

    Err(MissionError::SourceRead {
        path: path.to_path_buf(),
        primary: primary.unwrap_or_else(|| "no layer reader configured".to_string()),
        secondary,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct GpkgHeader {
    srs_id: i32,
    empty: bool,
    wkb_offset: usize,
}

impl GpkgHeader {
    fn parse(blob: &[u8]) -> std::result::Result<Self, String> {
        if blob.len() < 8 || &blob[0..2] != b"GP" {
            return Err("missing GP header".to_string());
        }
        let flags = blob[3];
        let envelope_len = match (flags >> 1) & 0x07 {
            0 => 0,
            1 => 32,
            2 | 3 => 48,
            4 => 64,
            other => return Err(format!("invalid envelope indicator {}", other)),
        };
        let srs_bytes = [blob[4], blob[5], blob[6], blob[7]];
        let srs_id = if flags & 0x01 == 1 {
            i32::from_le_bytes(srs_bytes)
        } else {
            i32::from_be_bytes(srs_bytes)
        };
        let wkb_offset = 8 + envelope_len;
        if blob.len() < wkb_offset {
            return Err("geometry blob is truncated".to_string());
        }
        Ok(GpkgHeader { srs_id, empty: flags & 0x10 != 0, wkb_offset })
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn read_feature_table<F>(path: &Path, layer: Option<&str>, mut decode: F) -> Result<FeatureLayer>
where
    F: FnMut(&[u8], usize, i32) -> Result<Option<Geometry<f64>>>,
{
    let source_name = path.display().to_string();
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)?;

    let table: Option<String> = match layer {
        Some(name) => conn
            .query_row(
                "SELECT table_name FROM gpkg_contents WHERE data_type = 'features' AND table_name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT table_name FROM gpkg_contents WHERE data_type = 'features' ORDER BY rowid LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?,
    };
    let table = table.ok_or_else(|| match layer {
        Some(name) => MissionError::not_found(&source_name, format!("layer '{}' does not exist", name)),
        None => MissionError::not_found(&source_name, "no feature layer in GeoPackage"),
    })?;

    let (geometry_column, srs_id): (String, i32) = conn.query_row(
        "SELECT column_name, srs_id FROM gpkg_geometry_columns WHERE table_name = ?1",
        [&table],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let crs = crs_for_srs(&conn, srs_id)?;

    let mut primary_keys = Vec::new();
    {
        let mut info = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(&table)))?;
        let rows = info.query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(5)?)))?;
        for row in rows {
            let (name, pk) = row?;
            if pk > 0 {
                primary_keys.push(name);
            }
        }
    }

    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_ident(&table)))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let fields: Vec<String> = columns
        .iter()
        .filter(|c| **c != geometry_column && !primary_keys.contains(*c))
        .cloned()
        .collect();

    let mut features = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let index = features.len();
        let mut geometry = None;
        let mut attributes = HashMap::new();
        for (i, column) in columns.iter().enumerate() {
            let value = row.get_ref(i)?;
            if *column == geometry_column {
                if let ValueRef::Blob(blob) = value {
                    geometry = decode(blob, index, srs_id)?;
                }
                continue;
            }
            if primary_keys.contains(column) {
                continue;
            }
            attributes.insert(column.clone(), json_value(value));
        }
        features.push(VectorFeature { index, geometry, attributes });
    }

    Ok(FeatureLayer { name: table, crs, fields, features })
}

fn crs_for_srs(conn: &Connection, srs_id: i32) -> Result<Crs> {
    // 0 and -1 are the GeoPackage "undefined" systems.
    if srs_id == 0 || srs_id == -1 {
        return Ok(Crs::wgs84());
    }
    let entry: Option<(String, i32)> = conn
        .query_row(
            "SELECT organization, organization_coordsys_id FROM gpkg_spatial_ref_sys WHERE srs_id = ?1",
            [srs_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match entry {
        Some((org, code)) if org.eq_ignore_ascii_case("epsg") => Crs::from_epsg(code),
        _ => Crs::from_epsg(srs_id),
    }
}

fn json_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => serde_json::Value::Null,
    }
}
