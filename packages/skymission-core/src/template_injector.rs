//! Patches a ring and mission parameters into the two mission templates.
//!
//! The placemark document (`template.kml`) and the waylines document
//! (`waylines.wpml`) describe the same flight under different element
//! paths. Both are parsed fresh for every call, patched through the
//! binding tables below and serialized again; elements an override does not
//! touch keep their original text.

use std::path::Path;

use tracing::debug;

use crate::enums::EnumResolver;
use crate::error::{MissionError, Result};
use crate::kml_source::COORDINATE_PATHS;
use crate::models::{CoordinateRing, InjectionFlags, OverrideSet};
use crate::xml_document::{Namespaces, XmlDocument, XmlPath};

pub const TEMPLATE_KML_NAME: &str = "template.kml";
pub const WAYLINES_WPML_NAME: &str = "waylines.wpml";

// Used when the template's coordinate block carries no indentation of its own.
const DEFAULT_RING_INDENT: &str = "\n                ";

const TEMPLATE_RING_PATH: &str =
    ".//kml:Folder/kml:Placemark/kml:Polygon/kml:outerBoundaryIs/kml:LinearRing/kml:coordinates";

const CREATE_TIME_PATH: &str = ".//wpml:createTime";
const UPDATE_TIME_PATH: &str = ".//wpml:updateTime";
const TAKEOFF_REF_PATH: &str = ".//wpml:takeOffRefPoint";

/// A mission parameter that maps onto template elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionParam {
    Altitude,
    /// Shoot height, falling back to altitude.
    ShootHeight,
    Margin,
    OrthoCameraOverlapH,
    OrthoCameraOverlapW,
    OrthoLidarOverlapH,
    OrthoLidarOverlapW,
    AutoFlightSpeed,
    GlobalTransitionalSpeed,
    TakeOffSecurityHeight,
    GimbalPitch,
}

impl MissionParam {
    /// Element text for this parameter, `None` when the override is unset.
    pub fn render(self, overrides: &OverrideSet) -> Option<String> {
        match self {
            MissionParam::Altitude => overrides.altitude.map(render_real),
            MissionParam::ShootHeight => overrides.effective_shoot_height().map(render_real),
            MissionParam::Margin => overrides.margin.map(|v| v.to_string()),
            MissionParam::OrthoCameraOverlapH => overrides.ortho_camera_overlap_h.map(|v| v.to_string()),
            MissionParam::OrthoCameraOverlapW => overrides.ortho_camera_overlap_w.map(|v| v.to_string()),
            MissionParam::OrthoLidarOverlapH => overrides.ortho_lidar_overlap_h.map(|v| v.to_string()),
            MissionParam::OrthoLidarOverlapW => overrides.ortho_lidar_overlap_w.map(|v| v.to_string()),
            MissionParam::AutoFlightSpeed => overrides.auto_flight_speed.map(render_real),
            MissionParam::GlobalTransitionalSpeed => overrides.global_transitional_speed.map(render_real),
            MissionParam::TakeOffSecurityHeight => overrides.take_off_security_height.map(render_real),
            MissionParam::GimbalPitch => overrides.gimbal_pitch.map(render_real),
        }
    }
}

/// Whether a binding patches the first match or every match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reach {
    First,
    All,
}

/// One row of a binding table.
#[derive(Debug, Clone, Copy)]
pub struct FieldBinding {
    pub param: MissionParam,
    pub path: &'static str,
    pub reach: Reach,
}

const fn first(param: MissionParam, path: &'static str) -> FieldBinding {
    FieldBinding { param, path, reach: Reach::First }
}

const fn all(param: MissionParam, path: &'static str) -> FieldBinding {
    FieldBinding { param, path, reach: Reach::All }
}

/// Placemark document bindings.
pub const KML_BINDINGS: &[FieldBinding] = &[
    first(MissionParam::Altitude, ".//kml:Folder/kml:Placemark/wpml:ellipsoidHeight"),
    first(MissionParam::Altitude, ".//kml:Folder/kml:Placemark/wpml:height"),
    first(MissionParam::ShootHeight, ".//kml:Folder/wpml:waylineCoordinateSysParam/wpml:globalShootHeight"),
    first(MissionParam::ShootHeight, ".//kml:Folder/wpml:waylineCoordinateSysParam/wpml:surfaceRelativeHeight"),
    first(MissionParam::Margin, ".//kml:Folder/kml:Placemark/wpml:margin"),
    first(MissionParam::OrthoCameraOverlapH, ".//kml:Folder/kml:Placemark/wpml:overlap/wpml:orthoCameraOverlapH"),
    first(MissionParam::OrthoCameraOverlapW, ".//kml:Folder/kml:Placemark/wpml:overlap/wpml:orthoCameraOverlapW"),
    first(MissionParam::OrthoLidarOverlapH, ".//kml:Folder/kml:Placemark/wpml:overlap/wpml:orthoLidarOverlapH"),
    first(MissionParam::OrthoLidarOverlapW, ".//kml:Folder/kml:Placemark/wpml:overlap/wpml:orthoLidarOverlapW"),
    first(MissionParam::AutoFlightSpeed, ".//kml:Folder/wpml:autoFlightSpeed"),
    first(MissionParam::GlobalTransitionalSpeed, ".//wpml:missionConfig/wpml:globalTransitionalSpeed"),
    first(MissionParam::TakeOffSecurityHeight, ".//wpml:missionConfig/wpml:takeOffSecurityHeight"),
    all(MissionParam::GimbalPitch, ".//kml:Placemark/wpml:smartObliqueGimbalPitch"),
];

/// Waylines document bindings.
pub const WPML_BINDINGS: &[FieldBinding] = &[
    first(MissionParam::AutoFlightSpeed, ".//kml:Folder/wpml:autoFlightSpeed"),
    first(MissionParam::GlobalTransitionalSpeed, ".//wpml:missionConfig/wpml:globalTransitionalSpeed"),
    first(MissionParam::TakeOffSecurityHeight, ".//wpml:missionConfig/wpml:takeOffSecurityHeight"),
    first(MissionParam::ShootHeight, ".//wpml:waylineCoordinateSysParam/wpml:globalShootHeight"),
    first(MissionParam::ShootHeight, ".//wpml:waylineCoordinateSysParam/wpml:surfaceRelativeHeight"),
    all(MissionParam::AutoFlightSpeed, ".//kml:Folder/kml:Placemark/wpml:waypointSpeed"),
    all(MissionParam::ShootHeight, ".//kml:Folder/kml:Placemark/wpml:executeHeight"),
];

const DRONE_ENUM_PATH: &str = ".//wpml:missionConfig/wpml:droneInfo/wpml:droneEnumValue";
const DRONE_SUB_ENUM_PATH: &str = ".//wpml:missionConfig/wpml:droneInfo/wpml:droneSubEnumValue";
const PAYLOAD_ENUM_PATH: &str = ".//wpml:missionConfig/wpml:payloadInfo/wpml:payloadEnumValue";
const PAYLOAD_POSITION_PATH: &str = ".//wpml:missionConfig/wpml:payloadInfo/wpml:payloadPositionIndex";

/// Whole numbers without a fraction, everything else shortest round-trip.
fn render_real(value: f64) -> String {
    format!("{}", value)
}

/// The serialized mission document pair.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionDocuments {
    pub kml: Vec<u8>,
    pub wpml: Vec<u8>,
}

/// Produces mission documents from template text.
pub struct TemplateInjector<'a> {
    enums: &'a EnumResolver,
    fixed_time_ms: Option<i64>,
}

impl<'a> TemplateInjector<'a> {
    pub fn new(enums: &'a EnumResolver) -> Self {
        TemplateInjector { enums, fixed_time_ms: None }
    }

    /// Stamp documents with `millis` instead of the current time.
    pub fn with_fixed_time(mut self, millis: i64) -> Self {
        self.fixed_time_ms = Some(millis);
        self
    }

    fn now_millis(&self) -> i64 {
        self.fixed_time_ms
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis())
    }

    pub fn inject(
        &self,
        template_kml: &str,
        template_wpml: &str,
        ring: &CoordinateRing,
        overrides: &OverrideSet,
        flags: InjectionFlags,
    ) -> Result<MissionDocuments> {
        let kml = XmlDocument::parse(template_kml, TEMPLATE_KML_NAME)?;
        let wpml = XmlDocument::parse(template_wpml, WAYLINES_WPML_NAME)?;
        let now = self.now_millis();

        let kml = replace_ring(kml, ring)?;
        let kml = apply_document_flags(kml, ring, flags, now)?;
        let kml = apply_kml_overrides(kml, overrides, self.enums)?;

        let wpml = apply_document_flags(wpml, ring, flags, now)?;
        let wpml = apply_wpml_overrides(wpml, overrides)?;

        Ok(MissionDocuments { kml: kml.to_bytes(), wpml: wpml.to_bytes() })
    }

    /// Same as [`inject`](Self::inject), reading both templates from disk.
    pub fn inject_files(
        &self,
        template_kml: &Path,
        template_wpml: &Path,
        ring: &CoordinateRing,
        overrides: &OverrideSet,
        flags: InjectionFlags,
    ) -> Result<MissionDocuments> {
        let kml = read_template(template_kml)?;
        let wpml = read_template(template_wpml)?;
        self.inject(&kml, &wpml, ring, overrides, flags)
    }
}

fn read_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| MissionError::io(format!("reading template {}", path.display()), e))
}

/// Put `ring` into the placemark polygon, keeping the template's layout.
pub fn replace_ring(mut doc: XmlDocument, ring: &CoordinateRing) -> Result<XmlDocument> {
    let namespaces = Namespaces::detect(&doc);
    let mut paths = vec![XmlPath::parse(TEMPLATE_RING_PATH, &namespaces)?];
    for expr in COORDINATE_PATHS {
        paths.push(XmlPath::parse(expr, &namespaces)?);
    }

    let (path, existing) = paths
        .iter()
        .find_map(|path| doc.find(path).map(|el| (path, el.text())))
        .ok_or_else(|| MissionError::TemplateStructure {
            template: TEMPLATE_KML_NAME.to_string(),
            reason: "no <coordinates> element in the placemark polygon".to_string(),
        })?;

    let (indent, trailing) = ring_layout(&existing);
    let text = format!("{}{}{}", indent, ring.render(&indent), trailing);
    debug!("writing {} ring vertices at {}", ring.len(), path.as_str());
    doc.set_text(path, &text);
    Ok(doc)
}

// Indentation before the first tuple and whitespace after the last.
fn ring_layout(existing: &str) -> (String, String) {
    let body = existing.trim();
    if body.is_empty() {
        let trailing = if existing.is_empty() { DEFAULT_RING_INDENT } else { existing };
        return (DEFAULT_RING_INDENT.to_string(), trailing.to_string());
    }
    let leading = &existing[..existing.len() - existing.trim_start().len()];
    let trailing = &existing[existing.trim_end().len()..];
    let indent = if leading.contains('\n') { leading } else { DEFAULT_RING_INDENT };
    let trailing = if trailing.is_empty() { indent } else { trailing };
    (indent.to_string(), trailing.to_string())
}

/// Timestamps and the takeoff reference point, as `flags` request.
pub fn apply_document_flags(
    mut doc: XmlDocument,
    ring: &CoordinateRing,
    flags: InjectionFlags,
    now_ms: i64,
) -> Result<XmlDocument> {
    let namespaces = Namespaces::detect(&doc);
    if flags.set_times {
        let stamp = now_ms.to_string();
        doc.set_text(&XmlPath::parse(CREATE_TIME_PATH, &namespaces)?, &stamp);
        doc.set_text(&XmlPath::parse(UPDATE_TIME_PATH, &namespaces)?, &stamp);
    }
    if flags.set_takeoff_ref_point {
        let (lon, lat) = ring.mean_center();
        let point = format!("{:.6},{:.6},0.000000", lat, lon);
        doc.set_text(&XmlPath::parse(TAKEOFF_REF_PATH, &namespaces)?, &point);
    }
    Ok(doc)
}

/// Patch the placemark document, including drone and payload codes.
pub fn apply_kml_overrides(doc: XmlDocument, overrides: &OverrideSet, enums: &EnumResolver) -> Result<XmlDocument> {
    let mut doc = apply_bindings(doc, KML_BINDINGS, overrides)?;

    if let Some(model) = overrides.drone_model.as_deref() {
        let namespaces = Namespaces::detect(&doc);
        let (drone, sub) = enums.drone_enum_values(model);
        let (payload, position) = enums.payload_enum_values(model);
        for (path, value) in [
            (DRONE_ENUM_PATH, drone),
            (DRONE_SUB_ENUM_PATH, sub),
            (PAYLOAD_ENUM_PATH, payload),
            (PAYLOAD_POSITION_PATH, position),
        ] {
            doc.set_text(&XmlPath::parse(path, &namespaces)?, &value.to_string());
        }
    }
    Ok(doc)
}

/// Patch the waylines document.
pub fn apply_wpml_overrides(doc: XmlDocument, overrides: &OverrideSet) -> Result<XmlDocument> {
    apply_bindings(doc, WPML_BINDINGS, overrides)
}

fn apply_bindings(mut doc: XmlDocument, bindings: &[FieldBinding], overrides: &OverrideSet) -> Result<XmlDocument> {
    let namespaces = Namespaces::detect(&doc);
    for binding in bindings {
        let Some(value) = binding.param.render(overrides) else { continue };
        let path = XmlPath::parse(binding.path, &namespaces)?;
        let changed = match binding.reach {
            Reach::First => usize::from(doc.set_text(&path, &value)),
            Reach::All => doc.set_text_all(&path, &value),
        };
        if changed == 0 {
            debug!("{:?}: nothing at {}", binding.param, binding.path);
        }
    }
    Ok(doc)
}
