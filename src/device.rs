use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::types::*;

/// Logical attributes with a fixed (management point, data point, sub-path)
/// location in the device data. Sub-paths may contain `%operationMode%`,
/// substituted from the live operation mode at resolve time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attr {
    OnOff,
    OperationMode,
    TargetTemperature,
    FanCurrentMode,
    FanFixedSpeed,
    HorizontalSwing,
    VerticalSwing,
    RoomTemperature,
    OutdoorTemperature,
    RoomHumidity,
}

impl Attr {
    fn location(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Attr::OnOff => ("climateControl", "onOffMode", ""),
            Attr::OperationMode => ("climateControl", "operationMode", ""),
            Attr::TargetTemperature => (
                "climateControl",
                "temperatureControl",
                "/operationModes/%operationMode%/setpoints/roomTemperature",
            ),
            Attr::FanCurrentMode => (
                "climateControl",
                "fanControl",
                "/operationModes/%operationMode%/fanSpeed/currentMode",
            ),
            Attr::FanFixedSpeed => (
                "climateControl",
                "fanControl",
                "/operationModes/%operationMode%/fanSpeed/modes/fixed",
            ),
            Attr::HorizontalSwing => (
                "climateControl",
                "fanControl",
                "/operationModes/%operationMode%/fanDirection/horizontal/currentMode",
            ),
            Attr::VerticalSwing => (
                "climateControl",
                "fanControl",
                "/operationModes/%operationMode%/fanDirection/vertical/currentMode",
            ),
            Attr::RoomTemperature => ("climateControl", "sensoryData", "/roomTemperature"),
            Attr::OutdoorTemperature => ("climateControl", "sensoryData", "/outdoorTemperature"),
            Attr::RoomHumidity => ("climateControl", "sensoryData", "/roomHumidity"),
        }
    }
}

type PointTable = BTreeMap<String, BTreeMap<String, BTreeMap<String, DataPoint>>>;

/// One gateway device: the raw description snapshot plus the flat
/// path-keyed datapoint table derived from it. The table is rebuilt
/// wholesale on every snapshot; it is never patched except optimistically
/// after a successful write.
#[derive(Debug, Clone)]
pub struct Device {
    id: String,
    description: Value,
    last_update: Option<DateTime<Utc>>,
    points: PointTable,
}

impl Device {
    /// Build from a `/v1/gateway-devices` entry. None when the entry has no id.
    pub fn from_description(desc: &Value) -> Option<Self> {
        let id = desc.get("id")?.as_str()?.to_string();
        let mut device = Self {
            id,
            description: Value::Null,
            last_update: None,
            points: PointTable::new(),
        };
        device.set_description(desc);
        Some(device)
    }

    /// Replace the snapshot and rebuild the flat table from scratch.
    pub(crate) fn set_description(&mut self, desc: &Value) {
        self.description = desc.clone();
        self.last_update = desc
            .get("lastUpdateReceived")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        self.points = flatten(desc);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Device name as configured in the app.
    pub fn name(&self) -> Option<&str> {
        self.data("climateControl", "name", "").and_then(|d| d.as_str())
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// The raw vendor description this device was last built from.
    pub fn description(&self) -> &Value {
        &self.description
    }

    pub fn data(&self, management_point: &str, data_point: &str, path: &str) -> Option<&DataPoint> {
        self.points.get(management_point)?.get(data_point)?.get(path)
    }

    pub fn value(&self, management_point: &str, data_point: &str, path: &str) -> Option<&Value> {
        Some(&self.data(management_point, data_point, path)?.value)
    }

    pub fn valid_values(
        &self,
        management_point: &str,
        data_point: &str,
        path: &str,
    ) -> Option<&[Value]> {
        self.data(management_point, data_point, path)?
            .values
            .as_deref()
    }

    /// Patch the cached value after a successful write, no re-read.
    pub(crate) fn set_cached_value(
        &mut self,
        management_point: &str,
        data_point: &str,
        path: &str,
        value: Value,
    ) {
        if let Some(dp) = self
            .points
            .get_mut(management_point)
            .and_then(|dps| dps.get_mut(data_point))
            .and_then(|sub| sub.get_mut(path))
        {
            dp.value = value;
        }
    }

    pub(crate) fn resolve_location(&self, attr: Attr) -> Option<(&'static str, &'static str, String)> {
        let (mp, dp, path) = attr.location();
        let path = if path.contains("%operationMode%") {
            let mode = self.data("climateControl", "operationMode", "")?.as_str()?;
            path.replace("%operationMode%", mode)
        } else {
            path.to_string()
        };
        Some((mp, dp, path))
    }

    fn attr_data(&self, attr: Attr) -> Option<&DataPoint> {
        let (mp, dp, path) = self.resolve_location(attr)?;
        self.data(mp, dp, &path)
    }

    // -- Climate --

    pub fn hvac_mode(&self) -> HvacMode {
        if self.attr_data(Attr::OnOff).and_then(|d| d.as_str()) == Some("off") {
            return HvacMode::Off;
        }
        self.attr_data(Attr::OperationMode)
            .and_then(|d| d.as_str())
            .and_then(HvacMode::from_daikin_str)
            .unwrap_or(HvacMode::Auto)
    }

    pub fn hvac_modes(&self) -> Vec<HvacMode> {
        let mut modes = vec![HvacMode::Off];
        if let Some(dp) = self.attr_data(Attr::OperationMode)
            && let Some(values) = &dp.values
        {
            for mode in values
                .iter()
                .filter_map(|v| v.as_str())
                .filter_map(HvacMode::from_daikin_str)
            {
                if !modes.contains(&mode) {
                    modes.push(mode);
                }
            }
        }
        modes
    }

    /// Target temperature is only defined in auto/cooling/heating modes.
    pub(crate) fn temperature_mode_active(&self) -> bool {
        matches!(
            self.attr_data(Attr::OperationMode).and_then(|d| d.as_str()),
            Some("auto" | "cooling" | "heating")
        )
    }

    pub fn target_temperature(&self) -> Option<f64> {
        if !self.temperature_mode_active() {
            return None;
        }
        self.attr_data(Attr::TargetTemperature)?.as_f64()
    }

    pub fn min_temp(&self) -> Option<f64> {
        if !self.temperature_mode_active() {
            return None;
        }
        self.attr_data(Attr::TargetTemperature)?.min_value
    }

    pub fn max_temp(&self) -> Option<f64> {
        if !self.temperature_mode_active() {
            return None;
        }
        self.attr_data(Attr::TargetTemperature)?.max_value
    }

    pub fn temperature_step(&self) -> Option<f64> {
        if !self.temperature_mode_active() {
            return None;
        }
        self.attr_data(Attr::TargetTemperature)?
            .step_value
            .as_ref()?
            .as_f64()
    }

    // -- Fan --

    pub fn supports_fan_speed(&self) -> bool {
        self.attr_data(Attr::FanCurrentMode).is_some()
    }

    pub fn fan_speed(&self) -> Option<FanSpeed> {
        match self.attr_data(Attr::FanCurrentMode)?.as_str()? {
            "auto" => Some(FanSpeed::Auto),
            "quiet" => Some(FanSpeed::Quiet),
            _ => self
                .attr_data(Attr::FanFixedSpeed)?
                .as_f64()
                .map(|v| FanSpeed::Fixed(v as i64)),
        }
    }

    /// Available fan speeds for the current operation mode; the `fixed`
    /// entry expands into the numeric range the descriptor advertises.
    pub fn fan_speeds(&self) -> Vec<FanSpeed> {
        let mut out = Vec::new();
        if let Some(dp) = self.attr_data(Attr::FanCurrentMode)
            && let Some(values) = &dp.values
        {
            for mode in values.iter().filter_map(|v| v.as_str()) {
                match mode {
                    "auto" => out.push(FanSpeed::Auto),
                    "quiet" => out.push(FanSpeed::Quiet),
                    "fixed" => {
                        if let Some(fixed) = self.attr_data(Attr::FanFixedSpeed) {
                            let min = fixed.min_value.unwrap_or(1.0) as i64;
                            let max = fixed.max_value.unwrap_or(min as f64) as i64;
                            for n in min..=max {
                                out.push(FanSpeed::Fixed(n));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        out
    }

    // -- Swing --

    pub fn supports_swing(&self) -> bool {
        self.attr_data(Attr::VerticalSwing).is_some()
    }

    pub fn swing_mode(&self) -> SwingMode {
        let h = self
            .attr_data(Attr::HorizontalSwing)
            .and_then(|d| d.as_str())
            .is_some_and(|m| m != "stop");
        let v = self
            .attr_data(Attr::VerticalSwing)
            .and_then(|d| d.as_str())
            .is_some_and(|m| m != "stop");
        match (h, v) {
            (true, true) => SwingMode::Both,
            (true, false) => SwingMode::Horizontal,
            (false, true) => SwingMode::Vertical,
            (false, false) => SwingMode::Off,
        }
    }

    pub fn swing_modes(&self) -> Vec<SwingMode> {
        let mut modes = vec![SwingMode::Off];
        let h = self.attr_data(Attr::HorizontalSwing).is_some();
        let v = self.attr_data(Attr::VerticalSwing).is_some();
        if h {
            modes.push(SwingMode::Horizontal);
        }
        if v {
            modes.push(SwingMode::Vertical);
            if h {
                modes.push(SwingMode::Both);
            }
        }
        modes
    }

    // -- Presets --

    pub fn supports_preset(&self, preset: Preset) -> bool {
        self.data("climateControl", preset.as_daikin_str(), "")
            .is_some_and(|d| !d.value.is_null())
    }

    pub fn preset_active(&self, preset: Preset) -> bool {
        self.data("climateControl", preset.as_daikin_str(), "")
            .and_then(|d| d.as_str())
            == Some("on")
    }

    // -- Sensors --

    pub fn supports_room_temperature(&self) -> bool {
        self.attr_data(Attr::RoomTemperature).is_some()
    }

    pub fn room_temperature(&self) -> Option<f64> {
        self.attr_data(Attr::RoomTemperature)?.as_f64()
    }

    pub fn supports_outdoor_temperature(&self) -> bool {
        self.attr_data(Attr::OutdoorTemperature).is_some()
    }

    pub fn outdoor_temperature(&self) -> Option<f64> {
        self.attr_data(Attr::OutdoorTemperature)?.as_f64()
    }

    pub fn supports_room_humidity(&self) -> bool {
        self.attr_data(Attr::RoomHumidity).is_some()
    }

    pub fn room_humidity(&self) -> Option<f64> {
        self.attr_data(Attr::RoomHumidity)?.as_f64()
    }

    // -- Gateway --

    /// MAC address, colon-separated. The cloud reports raw hex.
    pub fn mac_address(&self) -> Option<String> {
        let raw = self.data("gateway", "macAddress", "")?.as_str()?;
        if raw.contains(':') {
            return Some(raw.to_string());
        }
        let pairs: Vec<String> = raw
            .as_bytes()
            .chunks(2)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();
        Some(pairs.join(":"))
    }

    pub fn model(&self) -> Option<&str> {
        self.data("gateway", "modelInfo", "")?.as_str()
    }

    /// Firmware version with the wire format's underscores as dots.
    pub fn firmware_version(&self) -> Option<String> {
        Some(
            self.data("gateway", "firmwareVersion", "")?
                .as_str()?
                .replace('_', "."),
        )
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.data("gateway", "serialNumber", "")?.as_str()
    }

    pub fn wifi_strength(&self) -> Option<f64> {
        self.data("gateway", "wifiConnectionStrength", "")?.as_f64()
    }

    pub fn wifi_ssid(&self) -> Option<&str> {
        self.data("gateway", "wifiConnectionSSID", "")?.as_str()
    }

    pub fn local_ssid(&self) -> Option<&str> {
        self.data("gateway", "ssid", "")?.as_str()
    }

    // -- Fault state --

    pub fn is_in_error_state(&self) -> bool {
        self.value("climateControl", "isInErrorState", "")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn error_code(&self) -> Option<&str> {
        self.data("climateControl", "errorCode", "")?.as_str()
    }

    // -- Energy --

    pub fn supports_energy_consumption(&self) -> bool {
        self.points
            .get("climateControl")
            .and_then(|dps| dps.get("consumptionData"))
            .is_some_and(|sub| sub.keys().any(|k| k.starts_with("/electrical")))
    }

    /// Sum of the current window's consumption buckets in kWh. The cloud
    /// sends previous and current window back to back; null buckets count
    /// as zero.
    ///
    /// The `electrical` table carries a `unit` key, so it flattens as a
    /// single leaf holding the whole mode/period map. Shapes without the
    /// unit key flatten one level per mode and period instead.
    pub fn energy_consumption(
        &self,
        mode: ConsumptionMode,
        period: ConsumptionPeriod,
    ) -> Option<f64> {
        let buckets = match self.data("climateControl", "consumptionData", "/electrical") {
            Some(dp) => dp
                .value
                .get(mode.as_daikin_str())?
                .get(period.as_daikin_str())?
                .as_array()?,
            None => {
                let path = format!(
                    "/electrical/{}/{}",
                    mode.as_daikin_str(),
                    period.as_daikin_str()
                );
                self.data("climateControl", "consumptionData", &path)?
                    .value
                    .as_array()?
            }
        };
        Some(
            buckets
                .iter()
                .skip(period.bucket_offset())
                .map(|v| v.as_f64().unwrap_or(0.0))
                .sum(),
        )
    }
}

/// Flatten a device description into the path-keyed table.
///
/// Per management point (keyed by `embeddedId`): non-object attribute slots
/// are skipped; an attribute whose `value` is not an object, or is exactly
/// the single-key `{enabled: ...}` object, is itself the leaf (empty
/// sub-path); otherwise its `value` subtree is traversed.
fn flatten(desc: &Value) -> PointTable {
    let mut points = PointTable::new();
    let Some(mps) = desc.get("managementPoints").and_then(|v| v.as_array()) else {
        return points;
    };
    for mp in mps {
        let Some(obj) = mp.as_object() else { continue };
        let Some(embedded_id) = obj.get("embeddedId").and_then(|v| v.as_str()) else {
            continue;
        };
        let mut data_points: BTreeMap<String, BTreeMap<String, DataPoint>> = BTreeMap::new();
        for (key, attr) in obj {
            if !attr.is_object() {
                continue;
            }
            let value = attr.get("value");
            let single_enabled = value
                .and_then(|v| v.as_object())
                .is_some_and(|o| o.len() == 1 && o.contains_key("enabled"));
            if let Some(subtree) = value.and_then(|v| v.as_object())
                && !single_enabled
            {
                let mut sub = BTreeMap::new();
                traverse(subtree, "", &mut sub);
                data_points.insert(key.clone(), sub);
            } else {
                let mut sub = BTreeMap::new();
                sub.insert(String::new(), DataPoint::from_leaf(attr));
                data_points.insert(key.clone(), sub);
            }
        }
        points.insert(embedded_id.to_string(), data_points);
    }
    points
}

/// A subtree is a leaf once it is a non-object, or an object exposing
/// `value`/`settable`/`unit`, or the key is `meta`; otherwise recursion
/// continues one level deeper under the slash-joined path.
fn traverse(obj: &Map<String, Value>, prefix: &str, out: &mut BTreeMap<String, DataPoint>) {
    for (key, val) in obj {
        let path = format!("{prefix}/{key}");
        match val.as_object() {
            None => {
                out.insert(path, DataPoint::from_leaf(val));
            }
            Some(sub) => {
                if key == "meta"
                    || sub.contains_key("value")
                    || sub.contains_key("settable")
                    || sub.contains_key("unit")
                {
                    out.insert(path, DataPoint::from_leaf(val));
                } else {
                    traverse(sub, &path, out);
                }
            }
        }
    }
}

/// Local write validation, applied before any network call. Checks run in
/// the same order the cloud documents them: descriptor has a value, settable,
/// type match against stepValue, enum membership, string length, numeric
/// bounds.
pub(crate) fn validate_write(
    name: &str,
    descr: &DataPoint,
    value: &Value,
) -> std::result::Result<(), String> {
    if descr.value.is_null() {
        return Err(format!("{name}: cannot be written without a sub-path"));
    }
    if !descr.settable {
        return Err(format!("{name}: data point is not writable"));
    }
    if let Some(step) = &descr.step_value {
        let type_match = (step.is_number() && value.is_number())
            || (step.is_string() && value.is_string())
            || (step.is_boolean() && value.is_boolean());
        if !type_match {
            return Err(format!(
                "{name}: value type does not match the expected step type"
            ));
        }
    }
    if let Some(allowed) = &descr.values
        && !allowed.contains(value)
    {
        let list = allowed
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("/");
        return Err(format!("{name}: {value} is not in the allowed values: {list}"));
    }
    if let Some(max_len) = descr.max_length
        && let Some(s) = value.as_str()
        && s.len() as u64 > max_len
    {
        return Err(format!(
            "{name}: length {} exceeds the allowed {max_len} characters",
            s.len()
        ));
    }
    if let Some(min) = descr.min_value
        && let Some(v) = value.as_f64()
        && v < min
    {
        return Err(format!("{name}: {v} must not be smaller than {min}"));
    }
    if let Some(max) = descr.max_value
        && let Some(v) = value.as_f64()
        && v > max
    {
        return Err(format!("{name}: {v} must not be bigger than {max}"));
    }
    Ok(())
}
