use tracing::debug;

use crate::camera_specs::{CameraSpecTable, DEFAULT_CAMERA_MODEL};
use crate::models::{CameraSpec, OverrideSet, ValidationMetrics, ValidationResult, ValidationStatus};

pub const DEFAULT_ALTITUDE_M: f64 = 50.0;
pub const DEFAULT_SPEED_MS: f64 = 5.0;

const MIN_SAFE_ALTITUDE_M: f64 = 10.0;
const ALTITUDE_CEILING_M: f64 = 150.0;
const MAX_CONTROLLABLE_SPEED_MS: f64 = 15.0;
// Acceleration and turns add roughly 15% to straight-line flight time.
const TIME_OVERHEAD_FACTOR: f64 = 1.15;

pub const TIME_ESTIMATE_UNAVAILABLE: &str = "N/A";

/// Ground sample distance in cm/px.
pub fn calculate_gsd(altitude_m: f64, spec: &CameraSpec) -> f64 {
    altitude_m * spec.sensor_width_mm / (spec.focal_length_mm * f64::from(spec.image_width_px)) * 100.0
}

/// Forward smear during one exposure, in cm.
pub fn calculate_motion_blur(velocity_ms: f64, shutter_speed_s: f64) -> f64 {
    velocity_ms * shutter_speed_s * 100.0
}

/// `MM:SS` flight time for `distance_m` at `velocity_ms`, or `N/A` when the
/// speed is not positive.
pub fn estimate_mission_time(distance_m: f64, velocity_ms: f64) -> String {
    if velocity_ms.is_nan() || velocity_ms <= 0.0 {
        return TIME_ESTIMATE_UNAVAILABLE.to_string();
    }
    let seconds = (distance_m / velocity_ms * TIME_OVERHEAD_FACTOR).max(0.0);
    let minutes = (seconds / 60.0).floor() as u64;
    let remain = (seconds % 60.0).floor() as u64;
    format!("{:02}:{:02}", minutes, remain)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn shutter_label(shutter_speed_s: f64) -> String {
    format!("1/{}", (1.0 / shutter_speed_s).round() as i64)
}

fn finite_or(value: Option<f64>, default: f64) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(default)
}

/// Classifies mission parameters as safe, warning or danger.
///
/// Holds no mutable state; one instance can serve any number of callers.
#[derive(Debug, Clone, Copy)]
pub struct SafetyValidator<'a> {
    specs: &'a CameraSpecTable,
}

impl<'a> SafetyValidator<'a> {
    pub fn new(specs: &'a CameraSpecTable) -> Self {
        SafetyValidator { specs }
    }

    pub fn validate(&self, config: &OverrideSet) -> ValidationResult {
        let model = config.drone_model.as_deref().unwrap_or(DEFAULT_CAMERA_MODEL);
        let altitude = finite_or(config.altitude, DEFAULT_ALTITUDE_M);
        let velocity = finite_or(config.auto_flight_speed, DEFAULT_SPEED_MS);
        let spec = self.specs.get_or_default(model);

        let gsd = calculate_gsd(altitude, spec);
        let blur = calculate_motion_blur(velocity, spec.shutter_speed_s);
        debug!("validating {} at {} m, {} m/s: gsd {:.3}, blur {:.3}", model, altitude, velocity, gsd, blur);

        let mut status = ValidationStatus::Safe;
        let mut messages = Vec::new();

        if blur > gsd {
            status = ValidationStatus::Danger;
            messages.push(format!(
                "Danger: motion blur ({:.2} cm) exceeds the GSD ({:.2} cm). Slow down or use a faster shutter.",
                blur, gsd
            ));
        } else if blur > gsd * 0.5 {
            status = status.max(ValidationStatus::Warning);
            messages.push(format!(
                "Warning: motion blur ({:.2} cm) exceeds half of the GSD; images may be soft.",
                blur
            ));
        }

        if altitude < MIN_SAFE_ALTITUDE_M {
            status = ValidationStatus::Danger;
            messages.push("Danger: altitude is below 10 m. Collision risk is very high.".to_string());
        } else if altitude > ALTITUDE_CEILING_M {
            status = status.max(ValidationStatus::Warning);
            messages.push(
                "Warning: altitude exceeds the 150 m legal ceiling. Check that the flight is approved.".to_string(),
            );
        }

        if velocity > MAX_CONTROLLABLE_SPEED_MS {
            status = ValidationStatus::Danger;
            messages.push("Danger: speed exceeds 15 m/s. The aircraft may be hard to control.".to_string());
        }

        if messages.is_empty() {
            messages.push("Mission settings are safe and good data quality is expected.".to_string());
        }

        ValidationResult {
            status,
            messages,
            metrics: ValidationMetrics {
                gsd_cm_per_px: round2(gsd),
                motion_blur_cm: round2(blur),
                shutter_speed: shutter_label(spec.shutter_speed_s),
            },
        }
    }
}
