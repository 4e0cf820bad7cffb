use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::info;

use crate::batch::{BatchRequest, InputFormat};
use crate::console::LogFormat;
use crate::error::Result;
use crate::models::{InjectionFlags, OverrideSet};
use crate::projection::Crs;

pub const ENV_PREFIX: &str = "SKYMISSION";

/// A whole batch run as read from a settings file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub input_dir: PathBuf,
    pub template_kml: PathBuf,
    pub template_wpml: PathBuf,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub format: InputFormat,
    #[serde(default)]
    pub naming_field: Option<String>,
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default)]
    pub flags: InjectionFlags,
    #[serde(default = "default_pack_kmz")]
    pub pack_kmz: bool,
    #[serde(default)]
    pub simplify_tolerance: f64,
    #[serde(default)]
    pub buffer_distance: f64,
    /// `EPSG:<code>`, a bare code or a proj string.
    #[serde(default = "default_target_crs")]
    pub target_crs: String,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub overrides: OverrideSet,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings { level: default_log_level(), format: LogFormat::default() }
    }
}

fn default_pack_kmz() -> bool {
    true
}

fn default_target_crs() -> String {
    "EPSG:4326".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Validates the target system and builds the request.
    pub fn to_batch_request(&self) -> Result<BatchRequest> {
        let mut request = BatchRequest::new(&self.input_dir, &self.template_kml, &self.template_wpml);
        request.output_dir = self.output_dir.clone();
        request.format = self.format;
        request.naming_field = self.naming_field.clone();
        request.layer = self.layer.clone();
        request.flags = self.flags;
        request.pack_kmz = self.pack_kmz;
        request.overrides = self.overrides.clone();
        request.simplify_tolerance = self.simplify_tolerance;
        request.buffer_distance = self.buffer_distance;
        request.target_crs = Crs::from_user_string(&self.target_crs)?;
        Ok(request)
    }
}

/// Load settings from `path` (TOML, JSON or YAML by extension), with
/// `SKYMISSION__`-prefixed environment variables layered on top, e.g.
/// `SKYMISSION__OVERRIDES__ALTITUDE=120`.
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    info!("loading settings from {}", path.display());

    let settings = Config::builder()
        .add_source(File::from(path).required(true))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<Settings>()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MissionError;

    const TOML: &str = r#"
input_dir = "missions"
template_kml = "templates/template.kml"
template_wpml = "templates/waylines.wpml"
format = "gpkg"
naming_field = "PNU"
simplify_tolerance = 0.5
target_crs = "EPSG:4326"

[flags]
set_takeoff_ref_point = true

[logging]
level = "debug"
format = "pretty"

[overrides]
altitude = 120.0
margin = 10
drone_model = "m30t"
"#;

    #[test]
    fn reads_a_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, TOML).unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.format, InputFormat::Gpkg);
        assert!(settings.pack_kmz);
        assert!(settings.flags.set_times && settings.flags.set_takeoff_ref_point);
        assert_eq!(settings.logging.format, LogFormat::Pretty);
        assert_eq!(settings.overrides.altitude, Some(120.0));
        assert_eq!(settings.overrides.margin, Some(10));
        assert_eq!(settings.overrides.auto_flight_speed, None);

        let request = settings.to_batch_request().unwrap();
        assert_eq!(request.naming_field.as_deref(), Some("PNU"));
        assert_eq!(request.resolved_output_dir(), PathBuf::from("output"));
        assert_eq!(request.target_crs, Crs::wgs84());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_settings("/nonexistent/skymission.toml").unwrap_err();
        assert!(matches!(err, MissionError::Config(_)));
    }

    #[test]
    fn bad_target_crs_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{"input_dir": "in", "template_kml": "a.kml", "template_wpml": "b.wpml", "target_crs": "EPSG:1"}"#,
        )
        .unwrap();
        let settings = load_settings(&path).unwrap();
        assert!(matches!(settings.to_batch_request(), Err(MissionError::Projection { .. })));
    }
}
