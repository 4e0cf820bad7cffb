#![allow(dead_code)]

use std::path::{Path, PathBuf};

use geo_types::{polygon, Geometry};
use geozero::{CoordDimensions, ToWkb};
use rusqlite::{params, Connection};

pub const TEMPLATE_KML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2" xmlns:wpml="http://www.dji.com/wpmz/1.0.6">
  <Document>
    <wpml:createTime>1700000000000</wpml:createTime>
    <wpml:updateTime>1700000000000</wpml:updateTime>
    <wpml:missionConfig>
      <wpml:globalTransitionalSpeed>10</wpml:globalTransitionalSpeed>
      <wpml:takeOffRefPoint>0,0,0</wpml:takeOffRefPoint>
      <wpml:droneInfo>
        <wpml:droneEnumValue>77</wpml:droneEnumValue>
        <wpml:droneSubEnumValue>0</wpml:droneSubEnumValue>
      </wpml:droneInfo>
    </wpml:missionConfig>
    <Folder>
      <wpml:autoFlightSpeed>8</wpml:autoFlightSpeed>
      <Placemark>
        <Polygon>
          <outerBoundaryIs>
            <LinearRing>
              <coordinates>
                0,0,0
              </coordinates>
            </LinearRing>
          </outerBoundaryIs>
        </Polygon>
        <wpml:height>100</wpml:height>
        <wpml:ellipsoidHeight>100</wpml:ellipsoidHeight>
      </Placemark>
    </Folder>
  </Document>
</kml>"#;

pub const TEMPLATE_WPML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2" xmlns:wpml="http://www.dji.com/wpmz/1.0.6">
  <Document>
    <Folder>
      <wpml:autoFlightSpeed>8</wpml:autoFlightSpeed>
      <wpml:waylineCoordinateSysParam>
        <wpml:globalShootHeight>100</wpml:globalShootHeight>
      </wpml:waylineCoordinateSysParam>
      <Placemark>
        <wpml:executeHeight>100</wpml:executeHeight>
        <wpml:waypointSpeed>8</wpml:waypointSpeed>
      </Placemark>
    </Folder>
  </Document>
</kml>"#;

/// A scratch layout: `missions/` for inputs plus both templates.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("missions")).unwrap();
        std::fs::write(dir.path().join("template.kml"), TEMPLATE_KML).unwrap();
        std::fs::write(dir.path().join("waylines.wpml"), TEMPLATE_WPML).unwrap();
        Workspace { dir }
    }

    pub fn missions(&self) -> PathBuf {
        self.dir.path().join("missions")
    }

    pub fn template_kml(&self) -> PathBuf {
        self.dir.path().join("template.kml")
    }

    pub fn template_wpml(&self) -> PathBuf {
        self.dir.path().join("waylines.wpml")
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("output")
    }
}

pub fn square(x: f64, y: f64, size: f64) -> Geometry<f64> {
    Geometry::Polygon(polygon![
        (x: x, y: y),
        (x: x + size, y: y),
        (x: x + size, y: y + size),
        (x: x, y: y + size),
        (x: x, y: y),
    ])
}

pub fn parcel_kml(name: &str, lon: f64, lat: f64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Placemark>
    <ExtendedData><SchemaData><SimpleData name="DYNM">{name}</SimpleData></SchemaData></ExtendedData>
    <Polygon><outerBoundaryIs><LinearRing>
      <coordinates>{x0:.4},{y0:.4},0 {x1:.4},{y0:.4},0 {x1:.4},{y1:.4},0 {x0:.4},{y1:.4},0 {x0:.4},{y0:.4},0</coordinates>
    </LinearRing></outerBoundaryIs></Polygon>
  </Placemark>
</kml>"#,
        name = name,
        x0 = lon,
        y0 = lat,
        x1 = lon + 0.01,
        y1 = lat + 0.01,
    )
}

/// GeoPackage with table `parcels(fid, geom, DYNM)` in the given SRS.
pub fn write_gpkg(path: &Path, srs_id: i32, rows: &[(Geometry<f64>, Option<&str>)]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE gpkg_spatial_ref_sys (srs_name TEXT NOT NULL, srs_id INTEGER PRIMARY KEY, \
             organization TEXT NOT NULL, organization_coordsys_id INTEGER NOT NULL, definition TEXT NOT NULL);
         CREATE TABLE gpkg_contents (table_name TEXT PRIMARY KEY, data_type TEXT NOT NULL,
             identifier TEXT, srs_id INTEGER);
         CREATE TABLE gpkg_geometry_columns (table_name TEXT NOT NULL, column_name TEXT NOT NULL, \
             geometry_type_name TEXT NOT NULL, srs_id INTEGER NOT NULL, z TINYINT NOT NULL, m TINYINT NOT NULL);
         CREATE TABLE parcels (fid INTEGER PRIMARY KEY AUTOINCREMENT, geom BLOB, DYNM TEXT);",
    )
    .unwrap();
    conn.execute("INSERT INTO gpkg_spatial_ref_sys VALUES ('crs', ?1, 'EPSG', ?1, 'undefined')", params![srs_id])
        .unwrap();
    conn.execute("INSERT INTO gpkg_contents VALUES ('parcels', 'features', 'parcels', ?1)", params![srs_id])
        .unwrap();
    conn.execute(
        "INSERT INTO gpkg_geometry_columns VALUES ('parcels', 'geom', 'POLYGON', ?1, 0, 0)",
        params![srs_id],
    )
    .unwrap();
    for (geometry, name) in rows {
        let blob = geometry.to_gpkg_wkb(CoordDimensions::xy(), Some(srs_id), Vec::new()).unwrap();
        conn.execute("INSERT INTO parcels (geom, DYNM) VALUES (?1, ?2)", params![blob, name]).unwrap();
    }
}
