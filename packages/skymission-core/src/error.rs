use std::path::PathBuf;

/// Errors raised by the mission pipeline.
///
/// Batch runs convert these into failure records per unit; direct calls
/// receive them unchanged.
#[derive(Debug, thiserror::Error)]
pub enum MissionError {
    /// No usable coordinate block or polygon could be located in a source.
    #[error("no polygon geometry found in {source_name}: {reason}")]
    GeometryNotFound { source_name: String, reason: String },

    /// The layer held no polygon-class features after filtering.
    #[error("layer '{layer}' of {source_name} has no polygon or multipolygon features")]
    GeometrySourceEmpty { source_name: String, layer: String },

    /// A template is missing an element the injector requires.
    #[error("template {template} is missing a required element: {reason}")]
    TemplateStructure { template: String, reason: String },

    /// Both layer readers failed on the same file.
    #[error("failed to read {}: {primary}{}", path.display(), fallback_suffix(secondary))]
    SourceRead {
        path: PathBuf,
        primary: String,
        secondary: Option<String>,
    },

    #[error("unsupported input source {}", path.display())]
    UnsupportedSource { path: PathBuf },

    #[error("malformed document {context}: {reason}")]
    MalformedDocument { context: String, reason: String },

    #[error("invalid element path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("projection error ({context}): {message}")]
    Projection { context: String, message: String },

    #[error("geometry error: {message}")]
    Geometry { message: String },

    #[error("malformed XML in {context}: {source}")]
    Xml {
        context: String,
        #[source]
        source: quick_xml::Error,
    },

    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("GeoPackage query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("logging setup failed: {message}")]
    Logging { message: String },
}

impl MissionError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        MissionError::Io { context: context.into(), source }
    }

    pub fn xml(context: impl Into<String>, source: impl Into<quick_xml::Error>) -> Self {
        MissionError::Xml { context: context.into(), source: source.into() }
    }

    pub fn projection(context: impl Into<String>, message: impl ToString) -> Self {
        MissionError::Projection { context: context.into(), message: message.to_string() }
    }

    pub fn geometry(message: impl Into<String>) -> Self {
        MissionError::Geometry { message: message.into() }
    }

    pub fn not_found(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        MissionError::GeometryNotFound { source_name: source_name.into(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, MissionError>;

fn fallback_suffix(secondary: &Option<String>) -> String {
    secondary.as_ref().map(|s| format!(" / fallback reader: {s}")).unwrap_or_default()
}
