//! Named model properties

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::config::SoundplaneConfig;

/// Value of a property as set over OSC or from a state tree
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Float(f32),
    Text(String),
}

impl PropertyValue {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Non-zero numbers and "true"/"on" are true
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Float(v) => Some(*v != 0.0),
            PropertyValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "on" | "1" => Some(true),
                "false" | "off" | "0" => Some(false),
                _ => None,
            },
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            PropertyValue::Float(_) => None,
        }
    }

    /// Numbers, booleans and strings; anything else has no property value
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(|v| PropertyValue::Float(v as f32)),
            Value::Bool(b) => Some(PropertyValue::Float(if *b { 1.0 } else { 0.0 })),
            Value::String(s) => Some(PropertyValue::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            PropertyValue::Float(v) => serde_json::Number::from_f64(*v as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            PropertyValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl From<f32> for PropertyValue {
    fn from(v: f32) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Float(if v { 1.0 } else { 0.0 })
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

/// Properties the model acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    ZScale,
    ZCurve,
    Hysteresis,
    Lopass,
    Filter,
    DataRate,
    MidiActive,
    OscActive,
    TestTouches,
    ZonePreset,
    TouchPreset,
    /// Matrix output carries the raw grid instead of the smoothed one
    Raw,
    SendMatrix,
    KymaMode,
}

impl Property {
    pub const ALL: [Property; 14] = [
        Property::ZScale,
        Property::ZCurve,
        Property::Hysteresis,
        Property::Lopass,
        Property::Filter,
        Property::DataRate,
        Property::MidiActive,
        Property::OscActive,
        Property::TestTouches,
        Property::ZonePreset,
        Property::TouchPreset,
        Property::Raw,
        Property::SendMatrix,
        Property::KymaMode,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Property::ZScale => "z_scale",
            Property::ZCurve => "z_curve",
            Property::Hysteresis => "hysteresis",
            Property::Lopass => "lopass",
            Property::Filter => "filter",
            Property::DataRate => "data_rate",
            Property::MidiActive => "midi_active",
            Property::OscActive => "osc_active",
            Property::TestTouches => "test_touches",
            Property::ZonePreset => "zone_preset",
            Property::TouchPreset => "touch_preset",
            Property::Raw => "raw",
            Property::SendMatrix => "send_matrix",
            Property::KymaMode => "kyma_mode",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Check that `value` is usable for this property
    pub fn accepts(self, value: &PropertyValue) -> bool {
        match self {
            Property::ZonePreset | Property::TouchPreset => value.as_str().is_some(),
            Property::Filter
            | Property::MidiActive
            | Property::OscActive
            | Property::TestTouches
            | Property::Raw
            | Property::SendMatrix
            | Property::KymaMode => value.as_bool().is_some(),
            Property::DataRate => value.as_f32().is_some_and(|v| v.is_finite() && v > 0.0),
            Property::ZScale | Property::ZCurve | Property::Hysteresis | Property::Lopass => {
                value.as_f32().is_some_and(|v| v.is_finite() && v >= 0.0)
            }
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Current property values, readable by observers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySet {
    values: BTreeMap<String, PropertyValue>,
}

impl PropertySet {
    /// Initial values from the configuration
    pub fn from_config(config: &SoundplaneConfig) -> Self {
        let mut set = Self::default();
        set.set(Property::ZScale, config.touch.z_scale.into());
        set.set(Property::ZCurve, config.touch.z_curve.into());
        set.set(Property::Hysteresis, config.touch.hysteresis.into());
        set.set(Property::Lopass, config.signal.lopass.into());
        set.set(Property::Filter, config.signal.filter.into());
        set.set(Property::DataRate, config.output.data_rate.into());
        set.set(Property::TestTouches, config.touch.test_touches.into());
        set.set(Property::Raw, config.output.raw.into());
        set.set(Property::SendMatrix, config.output.send_matrix.into());
        set.set(Property::KymaMode, config.output.kyma_mode.into());
        set
    }

    pub fn set(&mut self, property: Property, value: PropertyValue) {
        self.values.insert(property.name().to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}
