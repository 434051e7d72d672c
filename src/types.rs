use serde_json::Value;

/// A single leaf in the flattened device data table: the current value plus
/// the write constraints the cloud advertises for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataPoint {
    pub value: Value,
    pub settable: bool,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub step_value: Option<Value>,
    pub max_length: Option<u64>,
    pub values: Option<Vec<Value>>,
    pub unit: Option<String>,
}

impl DataPoint {
    /// Build from a leaf of the device description. Leaf objects carry
    /// `value`/`settable`/constraint keys; anything else (bare scalars,
    /// arrays) wraps as a non-settable point. A leaf object without a
    /// `value` key keeps the whole object: the consumption table nests its
    /// bucket arrays directly beside `unit`.
    pub(crate) fn from_leaf(leaf: &Value) -> Self {
        let Some(obj) = leaf.as_object() else {
            return Self {
                value: leaf.clone(),
                ..Self::default()
            };
        };
        Self {
            value: obj.get("value").cloned().unwrap_or_else(|| leaf.clone()),
            settable: obj.get("settable").and_then(|v| v.as_bool()).unwrap_or(false),
            min_value: obj.get("minValue").and_then(|v| v.as_f64()),
            max_value: obj.get("maxValue").and_then(|v| v.as_f64()),
            step_value: obj.get("stepValue").cloned(),
            max_length: obj.get("maxLength").and_then(|v| v.as_u64()),
            values: obj
                .get("values")
                .and_then(|v| v.as_array())
                .map(|a| a.to_vec()),
            unit: obj
                .get("unit")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacMode {
    Off,
    Heating,
    Cooling,
    Auto,
    Dry,
    FanOnly,
}

impl HvacMode {
    pub fn as_daikin_str(&self) -> &'static str {
        match self {
            HvacMode::Off => "off",
            HvacMode::Heating => "heating",
            HvacMode::Cooling => "cooling",
            HvacMode::Auto => "auto",
            HvacMode::Dry => "dry",
            HvacMode::FanOnly => "fanOnly",
        }
    }

    pub fn from_daikin_str(s: &str) -> Option<Self> {
        match s {
            "off" => Some(HvacMode::Off),
            "heating" => Some(HvacMode::Heating),
            "cooling" => Some(HvacMode::Cooling),
            "auto" => Some(HvacMode::Auto),
            "dry" => Some(HvacMode::Dry),
            "fanOnly" => Some(HvacMode::FanOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanSpeed {
    Auto,
    Quiet,
    Fixed(i64),
}

impl FanSpeed {
    /// The `fanSpeed/currentMode` wire value for this speed.
    pub fn mode_str(&self) -> &'static str {
        match self {
            FanSpeed::Auto => "auto",
            FanSpeed::Quiet => "quiet",
            FanSpeed::Fixed(_) => "fixed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwingMode {
    Off,
    Vertical,
    Horizontal,
    Both,
}

impl SwingMode {
    pub(crate) fn horizontal_active(&self) -> bool {
        matches!(self, SwingMode::Horizontal | SwingMode::Both)
    }

    pub(crate) fn vertical_active(&self) -> bool {
        matches!(self, SwingMode::Vertical | SwingMode::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    HolidayMode,
    PowerfulMode,
    ComfortMode,
    EconoMode,
    StreamerMode,
}

impl Preset {
    /// Preset datapoint name under the climateControl management point.
    pub fn as_daikin_str(&self) -> &'static str {
        match self {
            Preset::HolidayMode => "holidayMode",
            Preset::PowerfulMode => "powerfulMode",
            Preset::ComfortMode => "comfortMode",
            Preset::EconoMode => "econoMode",
            Preset::StreamerMode => "streamerMode",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionMode {
    Heating,
    Cooling,
}

impl ConsumptionMode {
    pub fn as_daikin_str(&self) -> &'static str {
        match self {
            ConsumptionMode::Heating => "heating",
            ConsumptionMode::Cooling => "cooling",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl ConsumptionPeriod {
    pub fn as_daikin_str(&self) -> &'static str {
        match self {
            ConsumptionPeriod::Daily => "d",
            ConsumptionPeriod::Weekly => "w",
            ConsumptionPeriod::Monthly => "m",
        }
    }

    /// Index of the first bucket of the current window: the cloud returns
    /// two windows back to back (previous, current).
    pub(crate) fn bucket_offset(&self) -> usize {
        match self {
            ConsumptionPeriod::Weekly => 7,
            ConsumptionPeriod::Daily | ConsumptionPeriod::Monthly => 12,
        }
    }
}
