use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use super::RadarError;

#[derive(
    Eq,
    PartialEq,
    Hash,
    Copy,
    Clone,
    Debug,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(ascii_case_insensitive, serialize_all = "camelCase")]
pub enum ControlType {
    Power,
    Range,
    Gain,
    Sea,
    SeaState,
    Rain,
    NoiseRejection,
    TargetBoost,
    TargetExpansion,
    InterferenceRejection,
    TargetSeparation,
    LocalInterferenceRejection,
    ScanSpeed,
    SideLobeSuppression,
    AntennaHeight,
    BearingAlignment,
}

impl ControlType {
    /// Controls that the radar can adjust by itself.
    pub fn has_auto(&self) -> bool {
        matches!(
            self,
            ControlType::Gain | ControlType::Sea | ControlType::SideLobeSuppression
        )
    }

    /// Highest accepted value. Percentages go to 100, the rest are small enumerations.
    pub fn max_value(&self) -> f64 {
        match self {
            ControlType::Power => 1.,
            ControlType::Range => 64000.,
            ControlType::Gain
            | ControlType::Sea
            | ControlType::Rain
            | ControlType::SideLobeSuppression => 100.,
            ControlType::InterferenceRejection => 3.,
            ControlType::TargetBoost => 2.,
            ControlType::TargetExpansion => 1.,
            ControlType::LocalInterferenceRejection => 3.,
            ControlType::ScanSpeed => 1.,
            ControlType::NoiseRejection => 2.,
            ControlType::TargetSeparation => 3.,
            ControlType::SeaState => 2.,
            ControlType::AntennaHeight => 30.,
            ControlType::BearingAlignment => 180.,
        }
    }

    pub fn min_value(&self) -> f64 {
        match self {
            ControlType::BearingAlignment => -180.,
            _ => 0.,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlValue {
    pub control_type: ControlType,
    pub value: f64,
    #[serde(default)]
    pub auto: bool,
}

impl ControlValue {
    pub fn new(control_type: ControlType, value: f64) -> Self {
        ControlValue {
            control_type,
            value,
            auto: false,
        }
    }

    pub fn new_auto(control_type: ControlType, value: f64) -> Self {
        ControlValue {
            control_type,
            value,
            auto: true,
        }
    }

    /// Checks the value against the limits of the control.
    pub fn validate(&self) -> Result<(), RadarError> {
        if self.auto && !self.control_type.has_auto() {
            return Err(RadarError::CannotSetControlType(self.control_type));
        }
        if !self.value.is_finite()
            || self.value < self.control_type.min_value()
            || self.value > self.control_type.max_value()
        {
            return Err(RadarError::CannotSetControlTypeValue(
                self.control_type,
                self.value,
            ));
        }
        Ok(())
    }

    pub fn as_i32(&self) -> i32 {
        self.value.round() as i32
    }

    pub fn as_u8(&self) -> u8 {
        self.value.round().clamp(0., u8::MAX as f64) as u8
    }
}

/// What the radar last told us about itself.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarControls {
    values: HashMap<ControlType, ControlValue>,
    pub model_name: Option<String>,
    pub firmware_version: Option<String>,
    pub operating_hours: Option<f64>,
}

impl RadarControls {
    pub fn new() -> Self {
        RadarControls::default()
    }

    /// Store a reported value. Returns true if this is news.
    pub fn set(&mut self, value: ControlValue) -> bool {
        let changed = self.values.get(&value.control_type) != Some(&value);
        if changed {
            log::debug!(
                "Control '{}' = {}{}",
                value.control_type,
                value.value,
                if value.auto { " auto" } else { "" }
            );
            self.values.insert(value.control_type, value);
        }
        changed
    }

    pub fn set_value(&mut self, control_type: ControlType, value: f64) -> bool {
        self.set(ControlValue::new(control_type, value))
    }

    pub fn set_value_auto(&mut self, control_type: ControlType, value: f64, auto: bool) -> bool {
        self.set(ControlValue {
            control_type,
            value,
            auto,
        })
    }

    pub fn get(&self, control_type: ControlType) -> Option<ControlValue> {
        self.values.get(&control_type).copied()
    }

    pub fn set_model_name(&mut self, name: String) {
        if self.model_name.as_deref() != Some(&name) {
            log::info!("Radar model '{}'", name);
            self.model_name = Some(name);
        }
    }

    pub fn set_firmware_version(&mut self, version: String) {
        if self.firmware_version.as_deref() != Some(&version) {
            log::info!("Radar firmware '{}'", version);
            self.firmware_version = Some(version);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn control_type_names() {
        assert_eq!(ControlType::Gain.to_string(), "gain");
        assert_eq!(
            ControlType::from_str("InterferenceRejection").unwrap(),
            ControlType::InterferenceRejection
        );
        assert_eq!(
            serde_json::to_string(&ControlType::TargetBoost).unwrap(),
            "\"targetBoost\""
        );
    }

    #[test]
    fn validate_limits() {
        assert!(ControlValue::new(ControlType::Gain, 100.).validate().is_ok());
        assert!(ControlValue::new_auto(ControlType::Sea, 0.).validate().is_ok());
        assert!(matches!(
            ControlValue::new(ControlType::Gain, 101.).validate(),
            Err(RadarError::CannotSetControlTypeValue(ControlType::Gain, _))
        ));
        assert!(matches!(
            ControlValue::new_auto(ControlType::Rain, 10.).validate(),
            Err(RadarError::CannotSetControlType(ControlType::Rain))
        ));
        assert!(
            ControlValue::new(ControlType::BearingAlignment, -12.5)
                .validate()
                .is_ok()
        );
        assert!(
            ControlValue::new(ControlType::Gain, f64::NAN)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn set_reports_changes() {
        let mut controls = RadarControls::new();
        assert!(controls.set_value(ControlType::Rain, 30.));
        assert!(!controls.set_value(ControlType::Rain, 30.));
        assert!(controls.set_value_auto(ControlType::Rain, 30., true));
        assert_eq!(controls.get(ControlType::Rain).unwrap().value, 30.);
        assert!(controls.get(ControlType::Gain).is_none());
    }
}
