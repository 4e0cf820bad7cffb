//! Directory-level mission generation.
//!
//! Every KML file and every polygon row of a GeoPackage becomes one output.
//! A failing unit is recorded and logged; the run carries on with the next.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::enums::EnumResolver;
use crate::error::{MissionError, Result};
use crate::export_kmz::{pack_mission, KMZ_EXTENSION};
use crate::geometry_extractor::{ring_from_features, ExtractOptions, GeometryExtractor, SourceKind};
use crate::gpkg_reader::{default_readers, read_layer_with_fallback};
use crate::kml_source::KmlSource;
use crate::models::{CoordinateRing, InjectionFlags, OverrideSet};
use crate::naming::{row_fallback_name, sanitize_filename, source_stem, usable_attribute};
use crate::projection::Crs;
use crate::template_injector::TemplateInjector;

// How many files field discovery samples per format.
const GPKG_FIELD_SAMPLE: usize = 10;
const KML_FIELD_SAMPLE: usize = 5;

/// Which inputs a batch picks up from its directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    #[default]
    Auto,
    Kml,
    Gpkg,
}

impl InputFormat {
    pub fn accepts(self, kind: SourceKind) -> bool {
        match self {
            InputFormat::Auto => true,
            InputFormat::Kml => kind == SourceKind::Kml,
            InputFormat::Gpkg => kind == SourceKind::GeoPackage,
        }
    }
}

/// Everything one batch run needs.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub input_dir: PathBuf,
    pub template_kml: PathBuf,
    pub template_wpml: PathBuf,
    /// Defaults to `<input_dir>/../output`.
    pub output_dir: Option<PathBuf>,
    pub format: InputFormat,
    pub naming_field: Option<String>,
    pub layer: Option<String>,
    pub flags: InjectionFlags,
    /// Write `.kmz` archives; otherwise only the placemark document as `.kml`.
    pub pack_kmz: bool,
    pub overrides: OverrideSet,
    pub simplify_tolerance: f64,
    pub buffer_distance: f64,
    pub target_crs: Crs,
}

impl BatchRequest {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        template_kml: impl Into<PathBuf>,
        template_wpml: impl Into<PathBuf>,
    ) -> Self {
        BatchRequest {
            input_dir: input_dir.into(),
            template_kml: template_kml.into(),
            template_wpml: template_wpml.into(),
            output_dir: None,
            format: InputFormat::Auto,
            naming_field: None,
            layer: None,
            flags: InjectionFlags::default(),
            pack_kmz: true,
            overrides: OverrideSet::default(),
            simplify_tolerance: 0.0,
            buffer_distance: 0.0,
            target_crs: Crs::wgs84(),
        }
    }

    pub fn resolved_output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => self
                .input_dir
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("output"),
        }
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            layer: self.layer.clone(),
            target_crs: self.target_crs.clone(),
            simplify_tolerance: self.simplify_tolerance,
            buffer_distance: self.buffer_distance,
            naming_field: self.naming_field.clone(),
        }
    }
}

/// Progress notifications, one per processed unit plus start and end.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Started { inputs: usize, output_dir: PathBuf },
    Succeeded { source: String, output: String },
    Failed { source: String, message: String },
    Skipped { source: String, reason: String },
    Finished { succeeded: usize, failed: usize },
}

impl fmt::Display for BatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchEvent::Started { inputs, output_dir } => {
                write!(f, "processing {} input files into {}", inputs, output_dir.display())
            }
            BatchEvent::Succeeded { source, output } => write!(f, "done: {} -> {}", source, output),
            BatchEvent::Failed { source, message } => write!(f, "error: {}: {}", source, message),
            BatchEvent::Skipped { source, reason } => write!(f, "skipped ({}): {}", reason, source),
            BatchEvent::Finished { succeeded, failed } => {
                write!(f, "total: {} succeeded, {} failed", succeeded, failed)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub outputs: Vec<PathBuf>,
    pub failures: Vec<BatchFailure>,
}

impl BatchSummary {
    fn record_failure(&mut self, source: &str, message: String) {
        self.failed += 1;
        self.failures.push(BatchFailure { source: source.to_string(), message });
    }
}

// Template text shared by every unit of a run.
struct Templates {
    kml: String,
    wpml: String,
}

/// Runs extraction, injection and packaging over a directory of sources.
pub struct BatchProcessor<'a> {
    extractor: GeometryExtractor,
    injector: TemplateInjector<'a>,
    events: Option<Sender<BatchEvent>>,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(enums: &'a EnumResolver) -> Self {
        BatchProcessor { extractor: GeometryExtractor::default(), injector: TemplateInjector::new(enums), events: None }
    }

    pub fn with_extractor(mut self, extractor: GeometryExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_injector(mut self, injector: TemplateInjector<'a>) -> Self {
        self.injector = injector;
        self
    }

    /// Also deliver progress over `events`; a dropped receiver is ignored.
    pub fn with_events(mut self, events: Sender<BatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: BatchEvent) {
        match &event {
            BatchEvent::Failed { .. } => error!("{}", event),
            BatchEvent::Skipped { .. } => warn!("{}", event),
            _ => info!("{}", event),
        }
        if let Some(events) = &self.events {
            events.send(event).ok();
        }
    }

    /// Process every matching file in `request.input_dir`.
    ///
    /// Only directory-level problems (unreadable input directory or
    /// templates, uncreatable output directory) return an error.
    pub fn run(&self, request: &BatchRequest) -> Result<BatchSummary> {
        let output_dir = request.resolved_output_dir();
        std::fs::create_dir_all(&output_dir)
            .map_err(|e| MissionError::io(format!("creating {}", output_dir.display()), e))?;

        let templates = Templates {
            kml: read_text(&request.template_kml)?,
            wpml: read_text(&request.template_wpml)?,
        };
        let inputs = list_inputs(&request.input_dir, request.format)?;
        self.emit(BatchEvent::Started { inputs: inputs.len(), output_dir: output_dir.clone() });

        let mut summary = BatchSummary::default();
        for input in &inputs {
            match SourceKind::from_path(input) {
                Some(SourceKind::GeoPackage) => {
                    self.process_gpkg(input, request, &templates, &output_dir, &mut summary)
                }
                Some(SourceKind::Kml) => self.process_kml(input, request, &templates, &output_dir, &mut summary),
                None => {}
            }
        }

        self.emit(BatchEvent::Finished { succeeded: summary.succeeded, failed: summary.failed });
        Ok(summary)
    }

    fn process_kml(
        &self,
        input: &Path,
        request: &BatchRequest,
        templates: &Templates,
        output_dir: &Path,
        summary: &mut BatchSummary,
    ) {
        let source = display_name(input);
        let outcome = self
            .extractor
            .extract_kml(input, &request.extract_options())
            .and_then(|extraction| {
                self.save(&extraction.ring, &extraction.naming_hint, request, templates, output_dir)
            });
        self.settle(&source, outcome, summary);
    }

    fn process_gpkg(
        &self,
        input: &Path,
        request: &BatchRequest,
        templates: &Templates,
        output_dir: &Path,
        summary: &mut BatchSummary,
    ) {
        let source = display_name(input);
        let layer = match self.extractor.read_layer(input, request.layer.as_deref()) {
            Ok(layer) => layer,
            Err(e) => {
                self.settle(&source, Err(e), summary);
                return;
            }
        };

        let features: Vec<_> = layer.polygon_features().collect();
        if features.is_empty() {
            self.emit(BatchEvent::Skipped { source: source.clone(), reason: "no polygons".to_string() });
            summary.record_failure(
                &source,
                MissionError::GeometrySourceEmpty { source_name: source.clone(), layer: layer.name.clone() }
                    .to_string(),
            );
            return;
        }

        let stem = source_stem(input);
        let field = request.naming_field.as_deref().filter(|f| !f.trim().is_empty());
        let options = request.extract_options();
        for feature in features {
            let name = field
                .and_then(|field| feature.attribute_text(field))
                .as_deref()
                .and_then(usable_attribute)
                .map(sanitize_filename)
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| row_fallback_name(&stem, feature.index));
            let outcome = ring_from_features(&layer, &[feature], &options, &source)
                .and_then(|ring| self.save(&ring, &name, request, templates, output_dir));
            self.settle(&source, outcome, summary);
        }
    }

    fn save(
        &self,
        ring: &CoordinateRing,
        name: &str,
        request: &BatchRequest,
        templates: &Templates,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let documents = self
            .injector
            .inject(&templates.kml, &templates.wpml, ring, &request.overrides, request.flags)?;
        if request.pack_kmz {
            let output = output_dir.join(format!("{}.{}", name, KMZ_EXTENSION));
            pack_mission(&documents, &output)?;
            Ok(output)
        } else {
            let output = output_dir.join(format!("{}.kml", name));
            std::fs::write(&output, &documents.kml)
                .map_err(|e| MissionError::io(format!("writing {}", output.display()), e))?;
            Ok(output)
        }
    }

    fn settle(&self, source: &str, outcome: Result<PathBuf>, summary: &mut BatchSummary) {
        match outcome {
            Ok(output) => {
                summary.succeeded += 1;
                self.emit(BatchEvent::Succeeded { source: source.to_string(), output: display_name(&output) });
                summary.outputs.push(output);
            }
            Err(e) => {
                let message = e.to_string();
                self.emit(BatchEvent::Failed { source: source.to_string(), message: message.clone() });
                summary.record_failure(source, message);
            }
        }
    }
}

/// Input files of `dir` accepted by `format`, sorted by path.
pub fn list_inputs(dir: &Path, format: InputFormat) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
            MissionError::io(format!("listing {}", dir.display()), source)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let accepted = SourceKind::from_path(entry.path()).map(|kind| format.accepts(kind)).unwrap_or(false);
        if accepted {
            inputs.push(entry.into_path());
        }
    }
    inputs.sort();
    Ok(inputs)
}

/// Attribute names usable as a naming field for the inputs in `dir`.
///
/// GeoPackages contribute the columns shared by all sampled files, or every
/// column seen when they share none. KML files contribute their
/// `Data`/`SimpleData` names and `name` when placemarks are named.
pub fn discover_naming_fields(dir: &Path, format: InputFormat, layer: Option<&str>) -> Result<Vec<String>> {
    let format = match format {
        InputFormat::Auto => {
            if list_inputs(dir, InputFormat::Gpkg)?.is_empty() {
                InputFormat::Kml
            } else {
                InputFormat::Gpkg
            }
        }
        other => other,
    };

    let inputs = list_inputs(dir, format)?;
    let fields = match format {
        InputFormat::Gpkg => {
            let readers = default_readers();
            let mut shared: Option<BTreeSet<String>> = None;
            let mut seen = BTreeSet::new();
            for input in inputs.iter().take(GPKG_FIELD_SAMPLE) {
                match read_layer_with_fallback(&readers, input, layer) {
                    Ok(layer) => {
                        let fields: BTreeSet<String> = layer.fields.into_iter().collect();
                        seen.extend(fields.iter().cloned());
                        shared = Some(match shared {
                            Some(acc) => acc.intersection(&fields).cloned().collect(),
                            None => fields,
                        });
                    }
                    Err(e) => warn!("field discovery skipped {}: {}", input.display(), e),
                }
            }
            match shared {
                Some(common) if !common.is_empty() => common,
                _ => seen,
            }
        }
        _ => {
            let mut fields = BTreeSet::new();
            for input in inputs.iter().take(KML_FIELD_SAMPLE) {
                match KmlSource::open(input) {
                    Ok(kml) => fields.extend(kml.field_names()),
                    Err(e) => warn!("field discovery skipped {}: {}", input.display(), e),
                }
            }
            fields
        }
    };
    Ok(fields.into_iter().collect())
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| MissionError::io(format!("reading {}", path.display()), e))
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
    use geo_types::{line_string, polygon, Geometry};
    use std::sync::mpsc;

    const KML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2" xmlns:wpml="http://www.dji.com/wpmz/1.0.6">
  <Document>
    <Folder>
      <Placemark>
        <Polygon><outerBoundaryIs><LinearRing>
          <coordinates>
            0,0,0
          </coordinates>
        </LinearRing></outerBoundaryIs></Polygon>
        <wpml:height>100</wpml:height>
      </Placemark>
    </Folder>
  </Document>
</kml>"#;

    const WPML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2" xmlns:wpml="http://www.dji.com/wpmz/1.0.6">
  <Document><Folder><wpml:autoFlightSpeed>8</wpml:autoFlightSpeed></Folder></Document>
</kml>"#;

    fn source_kml(name: &str, lon: f64) -> String {
        format!(
            r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Placemark>
            <ExtendedData><SchemaData><SimpleData name="DYNM">{}</SimpleData></SchemaData></ExtendedData>
            <Polygon><outerBoundaryIs><LinearRing><coordinates>
            {lon},36,0 {lon}.01,36,0 {lon}.01,36.01,0 {lon},36.01,0 {lon},36,0
            </coordinates></LinearRing></outerBoundaryIs></Polygon></Placemark></kml>"#,
            name,
            lon = lon
        )
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        request: BatchRequest,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let missions = dir.path().join("missions");
        std::fs::create_dir(&missions).unwrap();
        std::fs::write(dir.path().join("template.kml"), KML).unwrap();
        std::fs::write(dir.path().join("waylines.wpml"), WPML).unwrap();
        let request = BatchRequest::new(&missions, dir.path().join("template.kml"), dir.path().join("waylines.wpml"));
        Fixture { _dir: dir, request }
    }

    #[test]
    fn default_output_dir_is_a_sibling() {
        let request = BatchRequest::new("/data/missions", "t.kml", "w.wpml");
        assert_eq!(request.resolved_output_dir(), PathBuf::from("/data/output"));
    }

    #[test]
    fn kml_files_become_archives_and_failures_are_isolated() {
        let fx = fixture();
        let missions = &fx.request.input_dir;
        std::fs::write(missions.join("a.kml"), source_kml("North", 127.0)).unwrap();
        std::fs::write(missions.join("b.kml"), "<kml><Placemark>").unwrap();
        std::fs::write(missions.join("c.kml"), source_kml("", 128.0)).unwrap();
        std::fs::write(missions.join("notes.txt"), "ignored").unwrap();

        let enums = EnumResolver::builtin();
        let (tx, rx) = mpsc::channel();
        let summary = BatchProcessor::new(&enums).with_events(tx).run(&fx.request).unwrap();

        assert_eq!((summary.succeeded, summary.failed), (2, 1));
        assert_eq!(summary.failures[0].source, "b.kml");
        let output_dir = fx.request.resolved_output_dir();
        assert!(output_dir.join("North.kmz").is_file());
        assert!(output_dir.join("c.kmz").is_file());

        let lines: Vec<String> = rx.try_iter().map(|e| e.to_string()).collect();
        assert!(lines.first().unwrap().starts_with("processing 3 input files"));
        assert!(lines.contains(&"done: a.kml -> North.kmz".to_string()));
        assert!(lines.iter().any(|l| l.starts_with("error: b.kml: ")));
        assert_eq!(lines.last().unwrap(), "total: 2 succeeded, 1 failed");
    }

    #[test]
    fn plain_kml_mode_writes_placemark_document() {
        let mut fx = fixture();
        fx.request.pack_kmz = false;
        fx.request.format = InputFormat::Kml;
        std::fs::write(fx.request.input_dir.join("a.kml"), source_kml("Field 1", 127.0)).unwrap();

        let enums = EnumResolver::builtin();
        let summary = BatchProcessor::new(&enums).run(&fx.request).unwrap();
        assert_eq!(summary.succeeded, 1);
        let written = std::fs::read_to_string(fx.request.resolved_output_dir().join("Field 1.kml")).unwrap();
        assert!(written.contains("<coordinates>\n            127,36,0\n            127.01,36,0\n"));
        assert!(written.contains("127,36.01,0\n            127,36,0\n          </coordinates>"));
    }

    fn write_plots(path: &Path) {
        let square = |x: f64| {
            Geometry::Polygon(polygon![
                (x: x, y: 36.0), (x: x + 0.01, y: 36.0), (x: x + 0.01, y: 36.01), (x: x, y: 36.01), (x: x, y: 36.0),
            ])
        };
        write_gpkg(
            path,
            4326,
            &[(Some(square(127.0)), Some("P-1")), (Some(square(127.1)), Some("none")), (Some(square(127.2)), None)],
        );
    }

    #[test]
    fn geopackage_rows_become_separate_outputs() {
        let mut fx = fixture();
        fx.request.naming_field = Some("DYNM".to_string());
        write_plots(&fx.request.input_dir.join("plots.gpkg"));

        let enums = EnumResolver::builtin();
        let summary = BatchProcessor::new(&enums).run(&fx.request).unwrap();
        assert_eq!((summary.succeeded, summary.failed), (3, 0));
        let names: Vec<String> = summary.outputs.iter().map(|p| display_name(p)).collect();
        assert_eq!(names, vec!["P-1.kmz", "plots_1.kmz", "plots_2.kmz"]);
    }

    #[test]
    fn geopackage_rows_without_naming_field_use_row_index() {
        let fx = fixture();
        assert!(fx.request.naming_field.is_none());
        write_plots(&fx.request.input_dir.join("plots.gpkg"));

        let enums = EnumResolver::builtin();
        let summary = BatchProcessor::new(&enums).run(&fx.request).unwrap();
        let names: Vec<String> = summary.outputs.iter().map(|p| display_name(p)).collect();
        assert_eq!(names, vec!["plots_0.kmz", "plots_1.kmz", "plots_2.kmz"]);
    }

    #[test]
    fn geopackage_without_polygons_counts_as_one_failure() {
        let fx = fixture();
        let road = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)]);
        write_gpkg(&fx.request.input_dir.join("roads.gpkg"), 4326, &[(Some(road), Some("r"))]);

        let enums = EnumResolver::builtin();
        let (tx, rx) = mpsc::channel();
        let summary = BatchProcessor::new(&enums).with_events(tx).run(&fx.request).unwrap();
        assert_eq!((summary.succeeded, summary.failed), (0, 1));
        assert!(rx.try_iter().any(|e| matches!(e, BatchEvent::Skipped { .. })));
    }

    #[test]
    fn missing_template_stops_the_run() {
        let mut fx = fixture();
        fx.request.template_wpml = fx.request.input_dir.join("missing.wpml");
        let enums = EnumResolver::builtin();
        assert!(matches!(BatchProcessor::new(&enums).run(&fx.request), Err(MissionError::Io { .. })));
    }

    #[test]
    fn format_filters_inputs() {
        let fx = fixture();
        let dir = &fx.request.input_dir;
        std::fs::write(dir.join("b.KML"), "x").unwrap();
        std::fs::write(dir.join("a.gpkg"), "x").unwrap();
        std::fs::create_dir(dir.join("nested.kml")).unwrap();

        let all: Vec<String> = list_inputs(dir, InputFormat::Auto).unwrap().iter().map(|p| display_name(p)).collect();
        assert_eq!(all, vec!["a.gpkg", "b.KML"]);
        assert_eq!(list_inputs(dir, InputFormat::Kml).unwrap().len(), 1);
        assert_eq!(list_inputs(dir, InputFormat::Gpkg).unwrap().len(), 1);
    }

    #[test]
    fn discovers_kml_fields() {
        let fx = fixture();
        std::fs::write(fx.request.input_dir.join("a.kml"), source_kml("North", 127.0)).unwrap();
        let fields = discover_naming_fields(&fx.request.input_dir, InputFormat::Auto, None).unwrap();
        assert_eq!(fields, vec!["DYNM"]);
    }

    #[test]
    fn discovers_shared_geopackage_columns() {
        let fx = fixture();
        let dir = &fx.request.input_dir;
        std::fs::write(dir.join("a.kml"), source_kml("North", 127.0)).unwrap();
        write_gpkg(&dir.join("one.gpkg"), 4326, &[]);
        write_gpkg(&dir.join("two.gpkg"), 4326, &[]);
        let fields = discover_naming_fields(dir, InputFormat::Auto, None).unwrap();
        assert_eq!(fields, vec!["DYNM", "area"]);
    }
}
