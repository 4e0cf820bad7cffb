use std::collections::BTreeMap;

use crate::models::CameraSpec;

pub const DEFAULT_CAMERA_MODEL: &str = "mavic3e";

// 4/3 CMOS, mechanical shutter
const MAVIC3E: CameraSpec = CameraSpec {
    sensor_width_mm: 17.3,
    sensor_height_mm: 13.0,
    image_width_px: 5280,
    image_height_px: 3956,
    focal_length_mm: 12.3,
    shutter_speed_s: 1.0 / 2000.0,
};

/// Camera parameters per drone model, used by the validator.
#[derive(Debug, Clone)]
pub struct CameraSpecTable {
    specs: BTreeMap<String, CameraSpec>,
    default_spec: CameraSpec,
}

impl CameraSpecTable {
    pub fn builtin() -> Self {
        let mut specs = BTreeMap::new();
        specs.insert(DEFAULT_CAMERA_MODEL.to_string(), MAVIC3E);
        specs.insert(
            "mavic3t".to_string(),
            CameraSpec {
                sensor_width_mm: 6.4,
                sensor_height_mm: 4.8,
                image_width_px: 4000,
                image_height_px: 3000,
                focal_length_mm: 4.4,
                shutter_speed_s: 1.0 / 1000.0,
            },
        );
        specs.insert(
            "m30t".to_string(),
            CameraSpec {
                sensor_width_mm: 10.0,
                sensor_height_mm: 7.5,
                image_width_px: 4000,
                image_height_px: 3000,
                focal_length_mm: 4.5,
                shutter_speed_s: 1.0 / 1000.0,
            },
        );
        // 1" CMOS
        specs.insert(
            "p4r".to_string(),
            CameraSpec {
                sensor_width_mm: 13.2,
                sensor_height_mm: 8.8,
                image_width_px: 5472,
                image_height_px: 3648,
                focal_length_mm: 8.8,
                shutter_speed_s: 1.0 / 2000.0,
            },
        );

        CameraSpecTable { specs, default_spec: MAVIC3E }
    }

    /// Spec for a model, if the table knows it.
    pub fn get(&self, model: &str) -> Option<&CameraSpec> {
        self.specs.get(&model.trim().to_lowercase())
    }

    /// Spec for a model, falling back to the default camera.
    pub fn get_or_default(&self, model: &str) -> &CameraSpec {
        self.get(model).unwrap_or(&self.default_spec)
    }

    pub fn default_spec(&self) -> &CameraSpec {
        &self.default_spec
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }
}

impl Default for CameraSpecTable {
    fn default() -> Self {
        CameraSpecTable::builtin()
    }
}
