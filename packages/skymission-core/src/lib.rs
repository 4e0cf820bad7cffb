//! Turns area-of-interest polygons into drone mission files.
//!
//! A KML or GeoPackage outline is reduced to one closed ring, injected
//! into a placemark template and a waylines template, and packed into a
//! `.kmz` the ground-control app can open. A separate validator scores
//! mission parameters for image quality and flight safety.

// Create a console module for logging
pub mod console;
// Import our error types
pub mod error;
// Import our models
pub mod models;
// Import our naming helpers
pub mod naming;
// Import our drone and payload code tables
pub mod enums;
// Import our camera sensor table
pub mod camera_specs;
// Import our namespace-aware document model
pub mod xml_document;
// Import our reference system handling
pub mod projection;
// Import our GeoPackage readers
pub mod gpkg_reader;
// Import our KML source parsing
pub mod kml_source;
// Import our outline extraction
pub mod geometry_extractor;
// Import our template patching
pub mod template_injector;
// Import KMZ export functionality
pub mod export_kmz;
// Import our batch pipeline
pub mod batch;
// Import our safety validation
pub mod validator;
// Import our run settings
pub mod settings;

pub use batch::{
    discover_naming_fields, BatchEvent, BatchFailure, BatchProcessor, BatchRequest, BatchSummary, InputFormat,
};
pub use camera_specs::CameraSpecTable;
pub use console::{init_console_logging, LogFormat};
pub use enums::EnumResolver;
pub use error::{MissionError, Result};
pub use export_kmz::{pack, pack_mission, KMZ_TEMPLATE_ENTRY, KMZ_WAYLINES_ENTRY};
pub use geometry_extractor::{normalize_polygon, ring_from_features, ExtractOptions, Extraction, GeometryExtractor};
pub use models::{
    CameraSpec, CoordinateRing, InjectionFlags, OverrideSet, RingVertex, ValidationMetrics, ValidationResult,
    ValidationStatus,
};
pub use projection::Crs;
pub use settings::{load_settings, Settings};
pub use template_injector::{MissionDocuments, TemplateInjector};
pub use validator::{calculate_gsd, calculate_motion_blur, estimate_mission_time, SafetyValidator};
