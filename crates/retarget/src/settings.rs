//! User-tunable retarget settings.

use std::collections::BTreeMap;

use animforge_core::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MIN_SPEED: f32 = 0.1;
pub const MAX_SPEED: f32 = 3.0;
pub const MAX_ARM_SPACING: u16 = 200;

pub const DEFAULT_SPEED: f32 = 1.0;
pub const DEFAULT_ARM_SPACING: u16 = 50;
pub const DEFAULT_EXPORT_FORMAT: &str = "fbx";

const SPEED_KEYS: &[&str] = &["speed", "speedMultiplier", "speed_multiplier"];
const ARM_SPACING_KEYS: &[&str] = &["armSpacing", "arm_spacing"];

/// Settings supplied with a processing request.
///
/// Unknown keys are kept in `extensions` so newer clients can send fields
/// this version does not interpret yet. `BTreeMap` keeps the serialized form
/// stable, which matters for content hashing of outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetargetSettings {
    /// Playback speed multiplier; output timestamps are divided by it.
    #[serde(rename = "speed", alias = "speedMultiplier", alias = "speed_multiplier")]
    pub speed_multiplier: f32,

    /// Percent of the way from the clip's arm pose to the character's rest
    /// stance; values above 100 extrapolate.
    #[serde(rename = "armSpacing", alias = "arm_spacing")]
    pub arm_spacing: u16,

    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl Default for RetargetSettings {
    fn default() -> Self {
        Self {
            speed_multiplier: DEFAULT_SPEED,
            arm_spacing: DEFAULT_ARM_SPACING,
            extensions: BTreeMap::new(),
        }
    }
}

impl RetargetSettings {
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed_multiplier = speed;
        self
    }

    pub fn with_arm_spacing(mut self, percent: u16) -> Self {
        self.arm_spacing = percent;
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Decode settings sent by a client.
    ///
    /// Unlike the serde impl this never fails on shape alone: a wrong type or
    /// an out-of-range number is reported against the field that carried it.
    /// `null` means all defaults.
    pub fn from_json(value: Value) -> DomainResult<Self> {
        let mut object = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(object) => object,
            other => {
                return Err(DomainError::invalid_setting(
                    "settings",
                    format!("expected an object, got {other}"),
                ));
            }
        };

        let mut settings = Self::default();
        if let Some(raw) = take_field(&mut object, SPEED_KEYS) {
            let speed = raw.as_f64().ok_or_else(|| {
                DomainError::invalid_setting("speed", format!("expected a number, got {raw}"))
            })?;
            settings.speed_multiplier = speed as f32;
        }
        if let Some(raw) = take_field(&mut object, ARM_SPACING_KEYS) {
            settings.arm_spacing = raw
                .as_u64()
                .and_then(|percent| u16::try_from(percent).ok())
                .filter(|percent| *percent <= MAX_ARM_SPACING)
                .ok_or_else(|| {
                    DomainError::invalid_setting(
                        "armSpacing",
                        format!("expected a whole percent within [0, {MAX_ARM_SPACING}], got {raw}"),
                    )
                })?;
        }
        settings.extensions = object.into_iter().collect();

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> DomainResult<()> {
        let speed = self.speed_multiplier;
        if !speed.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(DomainError::invalid_setting(
                "speed",
                format!("must be within [{MIN_SPEED}, {MAX_SPEED}], got {speed}"),
            ));
        }
        if self.arm_spacing > MAX_ARM_SPACING {
            return Err(DomainError::invalid_setting(
                "armSpacing",
                format!("must be within [0, {MAX_ARM_SPACING}], got {}", self.arm_spacing),
            ));
        }
        if let Some(format) = self.extensions.get("export_format") {
            if !format.is_string() {
                return Err(DomainError::invalid_setting("export_format", "must be a string"));
            }
        }
        Ok(())
    }

    /// Arm spacing as a blend factor (`0.0..=2.0`).
    pub fn arm_blend(&self) -> f32 {
        f32::from(self.arm_spacing) / 100.0
    }

    /// Requested export format label; informational only.
    pub fn export_format(&self) -> &str {
        self.extensions
            .get("export_format")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_EXPORT_FORMAT)
    }
}

/// Remove every spelling of a field; the first one present wins.
fn take_field(object: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    let mut found = None;
    for key in keys {
        if let Some(value) = object.remove(*key) {
            found.get_or_insert(value);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_the_client() {
        let settings: RetargetSettings = serde_json::from_value(json!({})).unwrap();
        assert_eq!(settings.speed_multiplier, 1.0);
        assert_eq!(settings.arm_spacing, 50);
        assert_eq!(settings.export_format(), "fbx");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn accepts_wire_names_and_keeps_unknown_keys() {
        let settings: RetargetSettings = serde_json::from_value(json!({
            "speed": 1.5,
            "armSpacing": 120,
            "export_format": "glb",
            "loop": true
        }))
        .unwrap();
        assert_eq!(settings.speed_multiplier, 1.5);
        assert_eq!(settings.arm_spacing, 120);
        assert_eq!(settings.export_format(), "glb");
        assert_eq!(settings.extensions.get("loop"), Some(&json!(true)));

        let back = serde_json::to_value(&settings).unwrap();
        assert_eq!(back["speed"], json!(1.5));
        assert_eq!(back["armSpacing"], json!(120));
        assert_eq!(back["loop"], json!(true));
    }

    #[test]
    fn accepts_snake_case_aliases() {
        let settings: RetargetSettings =
            serde_json::from_value(json!({"speed_multiplier": 2.0, "arm_spacing": 0})).unwrap();
        assert_eq!(settings.speed_multiplier, 2.0);
        assert_eq!(settings.arm_spacing, 0);
        assert!(settings.extensions.is_empty());
    }

    #[test]
    fn boundaries_are_inclusive() {
        for speed in [MIN_SPEED, MAX_SPEED] {
            assert!(RetargetSettings::default().with_speed(speed).validate().is_ok());
        }
        for arm in [0, MAX_ARM_SPACING] {
            assert!(RetargetSettings::default().with_arm_spacing(arm).validate().is_ok());
        }
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(RetargetSettings::default().with_speed(0.05).validate().is_err());
        assert!(RetargetSettings::default().with_speed(3.01).validate().is_err());
        assert!(RetargetSettings::default().with_speed(f32::NAN).validate().is_err());
        assert!(RetargetSettings::default().with_arm_spacing(201).validate().is_err());
        assert!(
            RetargetSettings::default()
                .with_extension("export_format", json!(7))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn client_values_are_decoded_like_the_serde_form() {
        let wire = json!({"speed": 1.5, "armSpacing": 120, "export_format": "glb", "loop": true});
        let decoded = RetargetSettings::from_json(wire.clone()).unwrap();
        let derived: RetargetSettings = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded, derived);

        assert_eq!(RetargetSettings::from_json(Value::Null).unwrap(), RetargetSettings::default());
        let aliased = RetargetSettings::from_json(json!({"speed_multiplier": 2.0, "arm_spacing": 0})).unwrap();
        assert_eq!((aliased.speed_multiplier, aliased.arm_spacing), (2.0, 0));
        assert!(aliased.extensions.is_empty());
    }

    #[test]
    fn badly_typed_client_values_name_their_field() {
        let field = |wire: Value| {
            RetargetSettings::from_json(wire)
                .unwrap_err()
                .setting()
                .map(str::to_string)
        };
        assert_eq!(field(json!({"armSpacing": -1})).as_deref(), Some("armSpacing"));
        assert_eq!(field(json!({"armSpacing": 70000})).as_deref(), Some("armSpacing"));
        assert_eq!(field(json!({"armSpacing": 50.5})).as_deref(), Some("armSpacing"));
        assert_eq!(field(json!({"armSpacing": 201})).as_deref(), Some("armSpacing"));
        assert_eq!(field(json!({"speed": "fast"})).as_deref(), Some("speed"));
        assert_eq!(field(json!({"speedMultiplier": 9.0})).as_deref(), Some("speed"));
        assert_eq!(field(json!({"export_format": 3})).as_deref(), Some("export_format"));
        assert_eq!(field(json!([1, 2])).as_deref(), Some("settings"));
    }
}
