use std::path::Path;

use geo::{Area, Buffer, Centroid, Simplify};
use geo_types::{Geometry, MultiPolygon, Polygon};
use tracing::{debug, info};

use crate::error::{MissionError, Result};
use crate::gpkg_reader::{default_readers, read_layer_with_fallback, FeatureLayer, LayerReader, VectorFeature};
use crate::kml_source::KmlSource;
use crate::models::{CoordinateRing, RingVertex};
use crate::naming::{sanitize_filename, source_stem, usable_attribute, DEFAULT_NAMING_FIELD};
use crate::projection::{reproject_polygon, Crs};

// Metres per degree used to express a linear tolerance in degrees.
const METRES_PER_DEGREE: f64 = 111_111.0;

/// The vector formats accepted as mission outlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Kml,
    GeoPackage,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "kml" => Some(SourceKind::Kml),
            "gpkg" => Some(SourceKind::GeoPackage),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SourceKind::Kml => "kml",
            SourceKind::GeoPackage => "gpkg",
        }
    }
}

/// How an outline is selected and normalized.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// GeoPackage layer; the first feature layer when `None`.
    pub layer: Option<String>,
    pub target_crs: Crs,
    /// Metres; 0 disables simplification.
    pub simplify_tolerance: f64,
    /// Metres; positive grows, negative shrinks, 0 disables.
    pub buffer_distance: f64,
    pub naming_field: Option<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            layer: None,
            target_crs: Crs::wgs84(),
            simplify_tolerance: 0.0,
            buffer_distance: 0.0,
            naming_field: None,
        }
    }
}

impl ExtractOptions {
    fn transforms_geometry(&self) -> bool {
        self.simplify_tolerance > 0.0 || self.buffer_distance != 0.0 || self.target_crs != Crs::wgs84()
    }
}

/// A ring ready for injection together with the name its output should get.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub ring: CoordinateRing,
    pub naming_hint: String,
}

/// Reads a vector source and reduces it to one closed outline.
pub struct GeometryExtractor {
    readers: Vec<Box<dyn LayerReader>>,
}

impl Default for GeometryExtractor {
    fn default() -> Self {
        GeometryExtractor::new(default_readers())
    }
}

impl GeometryExtractor {
    pub fn new(readers: Vec<Box<dyn LayerReader>>) -> Self {
        GeometryExtractor { readers }
    }

    pub fn extract(&self, source: &Path, options: &ExtractOptions) -> Result<Extraction> {
        match SourceKind::from_path(source) {
            Some(SourceKind::Kml) => self.extract_kml(source, options),
            Some(SourceKind::GeoPackage) => {
                let layer = self.read_layer(source, options.layer.as_deref())?;
                self.extract_layer(&layer, source, options)
            }
            None => Err(MissionError::UnsupportedSource { path: source.to_path_buf() }),
        }
    }

    pub fn read_layer(&self, source: &Path, layer: Option<&str>) -> Result<FeatureLayer> {
        read_layer_with_fallback(&self.readers, source, layer)
    }

    pub fn extract_kml(&self, source: &Path, options: &ExtractOptions) -> Result<Extraction> {
        let kml = KmlSource::open(source)?;
        let ring = kml.coordinate_ring()?;
        let ring = if options.transforms_geometry() {
            normalize_polygon(ring.to_polygon(), &Crs::wgs84(), options, kml.source_name())?
        } else {
            ring
        };
        Ok(Extraction { ring, naming_hint: kml.naming_hint(options.naming_field.as_deref()) })
    }

    /// Union of every polygon feature in the layer, keeping only the
    /// largest resulting part.
    pub fn extract_layer(&self, layer: &FeatureLayer, source: &Path, options: &ExtractOptions) -> Result<Extraction> {
        let source_name = display_name(source);
        let features: Vec<&VectorFeature> = layer.polygon_features().collect();
        if features.is_empty() {
            return Err(MissionError::GeometrySourceEmpty { source_name, layer: layer.name.clone() });
        }
        info!("{}: merging {} polygon features from layer '{}'", source_name, features.len(), layer.name);

        let ring = ring_from_features(layer, &features, options, &source_name)?;
        let naming_hint = layer_naming_hint(layer, &features, options.naming_field.as_deref(), &source_stem(source));
        Ok(Extraction { ring, naming_hint })
    }
}

/// Outline of the given features: the polygon itself for a single simple
/// polygon, otherwise the largest part of their union.
pub fn ring_from_features(
    layer: &FeatureLayer,
    features: &[&VectorFeature],
    options: &ExtractOptions,
    source_name: &str,
) -> Result<CoordinateRing> {
    let mut parts: Vec<Polygon<f64>> = Vec::new();
    for feature in features {
        match &feature.geometry {
            Some(Geometry::Polygon(polygon)) => parts.push(polygon.clone()),
            Some(Geometry::MultiPolygon(multi)) => parts.extend(multi.0.iter().cloned()),
            _ => {}
        }
    }

    let polygon = match parts.len() {
        0 => {
            return Err(MissionError::GeometrySourceEmpty {
                source_name: source_name.to_string(),
                layer: layer.name.clone(),
            })
        }
        1 => parts.remove(0),
        n => {
            let merged = geo::unary_union(parts.iter());
            debug!("{}: union of {} parts produced {} polygons", source_name, n, merged.0.len());
            largest_polygon(merged).ok_or_else(|| MissionError::not_found(source_name, "union produced no polygon"))?
        }
    };

    normalize_polygon(polygon, &layer.crs, options, source_name)
}

/// Simplify, buffer and reproject `polygon`, then format it as a ring with
/// 9 fractional digits.
pub fn normalize_polygon(
    polygon: Polygon<f64>,
    source_crs: &Crs,
    options: &ExtractOptions,
    source_name: &str,
) -> Result<CoordinateRing> {
    let mut polygon = polygon;

    if options.simplify_tolerance > 0.0 {
        let tolerance = if source_crs.is_geographic() {
            options.simplify_tolerance / METRES_PER_DEGREE
        } else {
            options.simplify_tolerance
        };
        polygon = simplify_or_keep(polygon, tolerance, source_name);
    }

    if options.buffer_distance != 0.0 {
        polygon = buffer_metric(&polygon, source_crs, options.buffer_distance, source_name)?;
    }

    let polygon = reproject_polygon(&polygon, source_crs, &options.target_crs)?;
    let vertices = polygon
        .exterior()
        .coords()
        .map(|c| RingVertex::from_degrees(c.x, c.y))
        .collect();
    CoordinateRing::new(vertices, source_name)
}

// Ramer-Douglas-Peucker with a linear epsilon; a result that collapses
// below a triangle or to zero area keeps the input.
fn simplify_or_keep(polygon: Polygon<f64>, epsilon: f64, source_name: &str) -> Polygon<f64> {
    let simplified = polygon.simplify(epsilon);
    if simplified.exterior().0.len() < 4 || simplified.unsigned_area() <= 0.0 {
        debug!("{}: simplification degenerated, keeping {} vertices", source_name, polygon.exterior().0.len());
        return polygon;
    }
    simplified
}

// Buffers in the UTM zone of the polygon's centroid so `distance` is metres.
fn buffer_metric(polygon: &Polygon<f64>, crs: &Crs, distance: f64, source_name: &str) -> Result<Polygon<f64>> {
    let geographic = reproject_polygon(polygon, crs, &Crs::wgs84())?;
    let center = geographic
        .centroid()
        .ok_or_else(|| MissionError::not_found(source_name, "polygon has no centroid"))?;
    let utm = Crs::utm_for(center.x(), center.y());

    let projected = reproject_polygon(polygon, crs, &utm)?;
    let buffered = largest_polygon(projected.buffer(distance)).ok_or_else(|| {
        MissionError::geometry(format!("buffer of {} m left nothing of {}", distance, source_name))
    })?;
    debug!("{}: buffered by {} m in {}", source_name, distance, utm.label());
    reproject_polygon(&buffered, &utm, crs)
}

/// Largest polygon by area; ties keep the first one.
fn largest_polygon(multi: MultiPolygon<f64>) -> Option<Polygon<f64>> {
    let mut best: Option<(f64, Polygon<f64>)> = None;
    for polygon in multi.0 {
        let area = polygon.unsigned_area();
        match &best {
            Some((best_area, _)) if area <= *best_area => {}
            _ => best = Some((area, polygon)),
        }
    }
    best.map(|(_, polygon)| polygon)
}

// Requested field, then DYNM, then the file stem.
fn layer_naming_hint(layer: &FeatureLayer, features: &[&VectorFeature], field: Option<&str>, stem: &str) -> String {
    let candidates = field.into_iter().chain(std::iter::once(DEFAULT_NAMING_FIELD));
    for candidate in candidates {
        if !layer.fields.iter().any(|f| f == candidate) {
            continue;
        }
        let value = features.iter().find_map(|f| f.attribute_text(candidate));
        if let Some(name) = value.as_deref().and_then(usable_attribute).map(sanitize_filename) {
            if !name.is_empty() {
                return name;
            }
        }
    }
    stem.to_string()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpkg_reader::test_support::write_gpkg;
    use geo::BoundingRect;
    use geo_types::{line_string, polygon};

    fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ]
    }

    fn bounds(ring: &CoordinateRing) -> geo_types::Rect<f64> {
        ring.to_polygon().bounding_rect().unwrap()
    }

    #[test]
    fn positive_buffer_grows_every_side() {
        let options = ExtractOptions { buffer_distance: 111.0, ..Default::default() };
        let ring = normalize_polygon(square(127.0, 36.0, 0.01), &Crs::wgs84(), &options, "t").unwrap();
        let rect = bounds(&ring);
        assert!(rect.min().x < 127.0 && rect.min().y < 36.0);
        assert!(rect.max().x > 127.01 && rect.max().y > 36.01);
        // 111 m is about 0.001 degree of latitude
        assert!((36.0 - rect.min().y) > 0.0008 && (36.0 - rect.min().y) < 0.0012);
    }

    #[test]
    fn negative_buffer_shrinks_every_side() {
        let options = ExtractOptions { buffer_distance: -111.0, ..Default::default() };
        let ring = normalize_polygon(square(127.0, 36.0, 0.01), &Crs::wgs84(), &options, "t").unwrap();
        let rect = bounds(&ring);
        assert!(rect.min().x > 127.0 && rect.min().y > 36.0);
        assert!(rect.max().x < 127.01 && rect.max().y < 36.01);
    }

    #[test]
    fn zero_buffer_keeps_vertices() {
        let ring = normalize_polygon(square(127.0, 36.0, 0.01), &Crs::wgs84(), &ExtractOptions::default(), "t")
            .unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.vertices()[1].lon_text(), "127.010000000");
        assert_eq!(ring.vertices()[0], ring.vertices()[4]);
    }

    #[test]
    fn buffer_that_swallows_the_polygon_fails() {
        let options = ExtractOptions { buffer_distance: -5_000.0, ..Default::default() };
        assert!(normalize_polygon(square(127.0, 36.0, 0.01), &Crs::wgs84(), &options, "t").is_err());
    }

    #[test]
    fn simplification_drops_collinear_vertices() {
        let noisy = polygon![
            (x: 127.0, y: 36.0),
            (x: 127.005, y: 36.000000001),
            (x: 127.01, y: 36.0),
            (x: 127.01, y: 36.01),
            (x: 127.0, y: 36.01),
            (x: 127.0, y: 36.0),
        ];
        let options = ExtractOptions { simplify_tolerance: 1.0, ..Default::default() };
        let ring = normalize_polygon(noisy, &Crs::wgs84(), &options, "t").unwrap();
        assert_eq!(ring.len(), 5);
    }

    #[test]
    fn simplification_keeps_vertices_beyond_tolerance() {
        // 30 cm off a 100 m edge at 36N, above a 0.1 m tolerance.
        let bulge = 0.3 / METRES_PER_DEGREE;
        let edge = 100.0 / METRES_PER_DEGREE;
        let shape = polygon![
            (x: 127.0, y: 36.0),
            (x: 127.0 + edge / 2.0, y: 36.0 - bulge),
            (x: 127.0 + edge, y: 36.0),
            (x: 127.0 + edge, y: 36.0 + edge),
            (x: 127.0, y: 36.0 + edge),
            (x: 127.0, y: 36.0),
        ];
        let tight = ExtractOptions { simplify_tolerance: 0.1, ..Default::default() };
        assert_eq!(normalize_polygon(shape.clone(), &Crs::wgs84(), &tight, "t").unwrap().len(), 6);

        let loose = ExtractOptions { simplify_tolerance: 0.5, ..Default::default() };
        assert_eq!(normalize_polygon(shape, &Crs::wgs84(), &loose, "t").unwrap().len(), 5);
    }

    #[test]
    fn simplification_never_collapses_the_ring() {
        let sliver = square(127.0, 36.0, 0.00001);
        let options = ExtractOptions { simplify_tolerance: 50.0, ..Default::default() };
        assert_eq!(normalize_polygon(sliver, &Crs::wgs84(), &options, "t").unwrap().len(), 5);
    }

    #[test]
    fn projected_layer_is_returned_in_wgs84() {
        let tm = Crs::from_epsg(5186).unwrap();
        let projected = square(200_000.0, 550_000.0, 500.0);
        let ring = normalize_polygon(projected, &tm, &ExtractOptions::default(), "tm").unwrap();
        let rect = bounds(&ring);
        assert!(rect.min().x > 126.9 && rect.max().x < 127.1);
        assert!(rect.min().y > 37.4 && rect.max().y < 37.6);
    }

    #[test]
    fn union_keeps_the_largest_part() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fields.gpkg");
        let road = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)]);
        write_gpkg(
            &path,
            4326,
            &[
                (Some(Geometry::Polygon(square(127.0, 36.0, 0.001))), None),
                (Some(road), Some("road")),
                (Some(Geometry::Polygon(square(128.0, 36.0, 0.01))), Some("Big / field")),
            ],
        );

        let extraction = GeometryExtractor::default().extract(&path, &ExtractOptions::default()).unwrap();
        let rect = bounds(&extraction.ring);
        assert!(rect.min().x >= 127.999 && rect.max().x <= 128.011);
        assert_eq!(extraction.naming_hint, "Big _ field");
    }

    #[test]
    fn overlapping_features_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlap.gpkg");
        write_gpkg(
            &path,
            4326,
            &[
                (Some(Geometry::Polygon(square(127.0, 36.0, 0.01))), None),
                (Some(Geometry::Polygon(square(127.005, 36.0, 0.01))), None),
            ],
        );

        let extraction = GeometryExtractor::default().extract(&path, &ExtractOptions::default()).unwrap();
        let rect = bounds(&extraction.ring);
        assert!((rect.max().x - 127.015).abs() < 1e-9);
        assert!((rect.min().x - 127.0).abs() < 1e-9);
        assert_eq!(extraction.naming_hint, "overlap");
    }

    #[test]
    fn layer_without_polygons_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roads.gpkg");
        let road = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)]);
        write_gpkg(&path, 4326, &[(Some(road), Some("road"))]);

        let err = GeometryExtractor::default().extract(&path, &ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, MissionError::GeometrySourceEmpty { .. }));
    }

    #[test]
    fn kml_tokens_survive_without_transforms() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plot.kml");
        std::fs::write(
            &path,
            r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Placemark><Polygon><outerBoundaryIs><LinearRing>
            <coordinates>127.0,36.0,0 127.01,36.0,0 127.01,36.01,0</coordinates>
            </LinearRing></outerBoundaryIs></Polygon></Placemark></kml>"#,
        )
        .unwrap();

        let extraction = GeometryExtractor::default().extract(&path, &ExtractOptions::default()).unwrap();
        assert_eq!(extraction.ring.render(" "), "127.0,36.0,0 127.01,36.0,0 127.01,36.01,0 127.0,36.0,0");
        assert_eq!(extraction.naming_hint, "plot");

        let buffered = ExtractOptions { buffer_distance: 10.0, ..Default::default() };
        let extraction = GeometryExtractor::default().extract(&path, &buffered).unwrap();
        assert!(extraction.ring.vertices()[0].lon_text().contains('.'));
        assert_eq!(extraction.ring.vertices()[0].lon_text().split('.').nth(1).map(str::len), Some(9));
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = GeometryExtractor::default()
            .extract(Path::new("outline.shp"), &ExtractOptions::default())
            .unwrap_err();
        assert!(matches!(err, MissionError::UnsupportedSource { .. }));
    }

    #[test]
    fn largest_polygon_prefers_first_on_ties() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(5.0, 5.0, 1.0);
        let picked = largest_polygon(MultiPolygon(vec![a.clone(), b])).unwrap();
        assert_eq!(picked, a);
        assert!(largest_polygon(MultiPolygon(vec![])).is_none());
    }
}
