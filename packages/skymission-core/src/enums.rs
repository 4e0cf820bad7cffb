use std::collections::BTreeMap;

/// Drone/payload identifier codes understood by the ground-control app.
///
/// Built once and passed by reference; never mutated after construction.
#[derive(Debug, Clone)]
pub struct EnumResolver {
    drones: BTreeMap<&'static str, (i32, i32)>,
    payloads: BTreeMap<&'static str, (i32, i32)>,
}

const UNKNOWN: (i32, i32) = (0, 0);

// (model, enum, sub-enum)
const DRONE_CODES: &[(&str, i32, i32)] = &[
    ("mavic3e", 77, 0),
    ("mavic3t", 77, 1),
    ("mavic3m", 77, 2),
    ("m30", 67, 0),
    ("m30t", 67, 1),
    ("m300", 60, 0),
    ("m350", 89, 0),
    ("m3d", 91, 0),
    ("m3td", 91, 1),
    ("mini3pro", 76, 0),
    ("mini3", 96, 0),
    ("air2s", 68, 0),
    ("mavic3", 73, 0),
    ("mavic3_cine", 74, 0),
    ("p4r", 28, 0),
    ("p4m", 44, 0),
    ("m210rtk_v2", 41, 0),
    ("m600pro", 13, 0),
    ("inspire2", 18, 0),
    ("flycart30", 103, 0),
    ("agras_t50", 101, 0),
    ("agras_t40", 91, 0),
    ("agras_t30", 69, 0),
    ("agras_t20p", 92, 0),
    ("agras_t10", 63, 0),
];

// (payload key, enum, position index)
const PAYLOAD_CODES: &[(&str, i32, i32)] = &[
    ("mavic3e", 65, 0),
    ("mavic3t", 66, 0),
    ("mavic3m", 89, 0),
    ("m30", 75, 0),
    ("m30t", 76, 0),
    ("m300_h20", 52, 0),
    ("m300_h20t", 53, 0),
    ("m300_p1", 61, 0),
    ("m300_l1", 62, 0),
    ("m350_h20", 52, 0),
    ("m350_h20t", 53, 0),
    ("m350_p1", 61, 0),
    ("m350_l1", 62, 0),
    ("m350_l2", 114, 0),
    ("m350_h30", 120, 0),
    ("m350_h30t", 121, 0),
    ("m3d", 91, 0),
    ("m3td", 92, 0),
    ("p4r", 39, 0),
    ("p4m", 50, 0),
    ("mini3pro", 73, 0),
    ("mini3", 88, 0),
    ("air2s", 64, 0),
    ("mavic3", 67, 0),
    ("flycart30", 95, 0),
];

// Airframes that carry interchangeable gimbals default to their H20 variant.
const PAYLOAD_FAMILY_DEFAULTS: &[(&str, &str)] = &[("m300", "m300_h20"), ("m350", "m350_h20")];

impl EnumResolver {
    pub fn builtin() -> Self {
        EnumResolver {
            drones: DRONE_CODES.iter().map(|&(m, e, s)| (m, (e, s))).collect(),
            payloads: PAYLOAD_CODES.iter().map(|&(m, e, p)| (m, (e, p))).collect(),
        }
    }

    /// `(droneEnumValue, droneSubEnumValue)` for a model, `(0, 0)` if unknown.
    pub fn drone_enum_values(&self, model: &str) -> (i32, i32) {
        let key = model.trim().to_lowercase();
        self.drones.get(key.as_str()).copied().unwrap_or(UNKNOWN)
    }

    /// `(payloadEnumValue, payloadPositionIndex)` for a model, `(0, 0)` if unknown.
    pub fn payload_enum_values(&self, model: &str) -> (i32, i32) {
        let key = model.trim().to_lowercase();
        let key = PAYLOAD_FAMILY_DEFAULTS
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix))
            .map(|(_, variant)| variant.to_string())
            .unwrap_or(key);
        self.payloads.get(key.as_str()).copied().unwrap_or(UNKNOWN)
    }

    /// Known drone models, sorted.
    pub fn supported_drone_models(&self) -> Vec<&'static str> {
        self.drones.keys().copied().collect()
    }
}

impl Default for EnumResolver {
    fn default() -> Self {
        EnumResolver::builtin()
    }
}
