use std::time::{Duration, Instant};

use reqwest::Method;
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::auth::{Credentials, TokenSet};
use crate::device::{self, Attr, Device};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::login;
use crate::protocol::{
    AMZ_INITIATE_AUTH, AMZ_USER_AGENT, Endpoints, MOBILE_USER_AGENT, REST_API_KEY,
    parse_refresh_response, refresh_request_body,
};
use crate::types::*;
use crate::{Error, Result};

/// Consecutive full refreshes of the device list are collapsed below this
/// interval unless overridden, the cloud rate-limits aggressive pollers.
const DEFAULT_MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(15);

/// Tokens within this many seconds of expiry are refreshed proactively
/// instead of waiting for the 401.
const EXPIRY_MARGIN_SECS: i64 = 60;

type TokenCallback = Box<dyn Fn(&TokenSet) + Send + Sync>;
type DeviceCallback = Box<dyn Fn(&Device) + Send + Sync>;

pub struct DaikinClientBuilder {
    token_set: Option<TokenSet>,
    credentials: Option<Credentials>,
    endpoints: Endpoints,
    min_update_interval: Duration,
    token_callbacks: Vec<TokenCallback>,
    device_callbacks: Vec<DeviceCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl DaikinClientBuilder {
    pub fn new() -> Self {
        Self {
            token_set: None,
            credentials: None,
            endpoints: Endpoints::default(),
            min_update_interval: DEFAULT_MIN_UPDATE_INTERVAL,
            token_callbacks: Vec::new(),
            device_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    /// Start from a previously saved token set instead of a fresh login.
    pub fn token_set(mut self, tokens: TokenSet) -> Self {
        self.token_set = Some(tokens);
        self
    }

    /// Account credentials, used for the initial login and as fallback when
    /// a token refresh is rejected.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn min_update_interval(mut self, interval: Duration) -> Self {
        self.min_update_interval = interval;
        self
    }

    /// Called whenever the stored tokens change (login or refresh), so the
    /// caller can persist them.
    pub fn on_token_update(mut self, f: impl Fn(&TokenSet) + Send + Sync + 'static) -> Self {
        self.token_callbacks.push(Box::new(f));
        self
    }

    /// Called for every device whose description was replaced by an update.
    pub fn on_device_update(mut self, f: impl Fn(&Device) + Send + Sync + 'static) -> Self {
        self.device_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> DaikinClient {
        // Redirects carry the login choreography's state and cookies; every
        // Location header is handled by hand.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build HTTP client");

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => {
                Some(MessageLogger::new(mode, &path).expect("failed to open log file"))
            }
            _ => None,
        };

        DaikinClient {
            http,
            endpoints: self.endpoints,
            token_set: self.token_set,
            credentials: self.credentials,
            devices: Vec::new(),
            min_update_interval: self.min_update_interval,
            last_update: None,
            token_callbacks: self.token_callbacks,
            device_callbacks: self.device_callbacks,
            logger,
        }
    }
}

impl Default for DaikinClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DaikinClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    token_set: Option<TokenSet>,
    credentials: Option<Credentials>,
    devices: Vec<Device>,
    min_update_interval: Duration,
    last_update: Option<Instant>,
    token_callbacks: Vec<TokenCallback>,
    device_callbacks: Vec<DeviceCallback>,
    logger: Option<MessageLogger>,
}

impl DaikinClient {
    pub fn builder() -> DaikinClientBuilder {
        DaikinClientBuilder::new()
    }

    pub fn token_set(&self) -> Option<&TokenSet> {
        self.token_set.as_ref()
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id() == device_id)
    }

    /// Full browser-less login with the configured credentials.
    pub async fn login(&mut self) -> Result<()> {
        let tokens = match &self.credentials {
            Some(credentials) => {
                debug!("performing full cloud login");
                login::retrieve_access_token(&self.http, &self.endpoints, credentials).await?
            }
            None => return Err(Error::Unauthorized),
        };
        self.install_tokens(tokens);
        Ok(())
    }

    /// Cloud API version and deprecation status.
    pub async fn api_info(&mut self) -> Result<Value> {
        self.bearer_request(Method::GET, "/v1/info", None).await
    }

    /// Fetch the gateway device list and rebuild the local device set.
    /// Entries without a gateway model are dropped, the cloud reports
    /// half-provisioned units that way.
    pub async fn discover(&mut self) -> Result<usize> {
        let reply = self
            .bearer_request(Method::GET, "/v1/gateway-devices", None)
            .await?;
        self.last_update = Some(Instant::now());

        let mut devices = Vec::new();
        for entry in reply.as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
            let Some(device) = Device::from_description(entry) else {
                debug!("skipping gateway entry without an id");
                continue;
            };
            if device.model().is_none() {
                warn!(id = device.id(), "ignoring device without model information");
                continue;
            }
            if let Some(ref mut logger) = self.logger {
                logger.log_update(device.id(), entry);
            }
            devices.push(device);
        }
        debug!(count = devices.len(), "discovered devices");
        self.devices = devices;
        for device in &self.devices {
            for cb in &self.device_callbacks {
                cb(device);
            }
        }
        Ok(self.devices.len())
    }

    /// Refresh every known device. Returns false without touching the
    /// network when the minimum update interval has not elapsed yet.
    pub async fn update_all(&mut self) -> Result<bool> {
        if let Some(last) = self.last_update
            && last.elapsed() < self.min_update_interval
        {
            trace!("skipping update, minimum interval not reached");
            return Ok(false);
        }
        let reply = self
            .bearer_request(Method::GET, "/v1/gateway-devices", None)
            .await?;
        self.last_update = Some(Instant::now());
        self.apply_descriptions(reply.as_array().map(|a| a.as_slice()).unwrap_or(&[]));
        Ok(true)
    }

    /// Refresh a single device, bypassing the update interval.
    pub async fn update_device(&mut self, device_id: &str) -> Result<()> {
        if self.device(device_id).is_none() {
            return Err(Error::UnknownDevice(device_id.to_string()));
        }
        let path = format!("/v1/gateway-devices/{device_id}");
        let reply = self.bearer_request(Method::GET, &path, None).await?;
        self.apply_descriptions(std::slice::from_ref(&reply));
        Ok(())
    }

    fn apply_descriptions(&mut self, entries: &[Value]) {
        for entry in entries {
            let Some(id) = entry.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(idx) = self.devices.iter().position(|d| d.id() == id) else {
                continue;
            };
            self.devices[idx].set_description(entry);
            let device = &self.devices[idx];
            if device.is_in_error_state() {
                warn!(
                    id = device.id(),
                    code = device.error_code().unwrap_or("unknown"),
                    "device reports an error state"
                );
            }
            if let Some(ref mut logger) = self.logger {
                logger.log_update(id, entry);
            }
            for cb in &self.device_callbacks {
                cb(device);
            }
        }
    }

    /// Write a raw data point value. The write is validated against the
    /// cached descriptor before any network traffic; on success the cached
    /// value is patched in place, no re-read.
    pub async fn set_value(
        &mut self,
        device_id: &str,
        management_point: &str,
        data_point: &str,
        path: &str,
        value: Value,
    ) -> Result<()> {
        let device = self.find_device(device_id)?;
        let descr = device.data(management_point, data_point, path).ok_or_else(|| {
            Error::Validation(format!(
                "{management_point}/{data_point}{path}: no such data point"
            ))
        })?;
        if let Err(reason) = device::validate_write(data_point, descr, &value) {
            warn!(device = device_id, %reason, "rejecting write");
            return Err(Error::Validation(reason));
        }

        let url_path = format!(
            "/v1/gateway-devices/{device_id}/management-points/{management_point}/characteristics/{data_point}"
        );
        let mut body = json!({ "value": value.clone() });
        if !path.is_empty() {
            body["path"] = json!(path);
        }
        if let Some(ref mut logger) = self.logger {
            logger.log_command("set_value", device_id, &body);
        }
        self.bearer_request(Method::PATCH, &url_path, Some(&body))
            .await?;

        if let Some(device) = self.devices.iter_mut().find(|d| d.id() == device_id) {
            device.set_cached_value(management_point, data_point, path, value);
        }
        Ok(())
    }

    // -- Typed commands --

    /// Change the HVAC mode. Off maps to the power switch; any other mode
    /// powers the unit on first when needed, then selects the mode.
    pub async fn set_hvac_mode(&mut self, device_id: &str, mode: HvacMode) -> Result<()> {
        if mode == HvacMode::Off {
            let (mp, dp, path) = self.resolve(device_id, Attr::OnOff)?;
            return self.set_value(device_id, mp, dp, &path, json!("off")).await;
        }

        if self.find_device(device_id)?.hvac_mode() == HvacMode::Off {
            let (mp, dp, path) = self.resolve(device_id, Attr::OnOff)?;
            self.set_value(device_id, mp, dp, &path, json!("on")).await?;
        }
        let (mp, dp, path) = self.resolve(device_id, Attr::OperationMode)?;
        self.set_value(device_id, mp, dp, &path, json!(mode.as_daikin_str()))
            .await
    }

    /// Set the room setpoint of the current operation mode.
    pub async fn set_target_temperature(&mut self, device_id: &str, temperature: f64) -> Result<()> {
        if !self.find_device(device_id)?.temperature_mode_active() {
            return Err(Error::Validation(
                "target temperature can only be set in auto, cooling or heating mode".to_string(),
            ));
        }
        let (mp, dp, path) = self.resolve(device_id, Attr::TargetTemperature)?;
        self.set_value(device_id, mp, dp, &path, json!(temperature))
            .await
    }

    /// Select a fan speed; a fixed speed writes the mode first and the
    /// numeric level after.
    pub async fn set_fan_speed(&mut self, device_id: &str, speed: FanSpeed) -> Result<()> {
        let (mp, dp, path) = self.resolve(device_id, Attr::FanCurrentMode)?;
        self.set_value(device_id, mp, dp, &path, json!(speed.mode_str()))
            .await?;
        if let FanSpeed::Fixed(level) = speed {
            let (mp, dp, path) = self.resolve(device_id, Attr::FanFixedSpeed)?;
            self.set_value(device_id, mp, dp, &path, json!(level)).await?;
        }
        Ok(())
    }

    /// Set the swing mode, writing only the axes that actually change.
    pub async fn set_swing_mode(&mut self, device_id: &str, mode: SwingMode) -> Result<()> {
        let current = self.find_device(device_id)?.swing_mode();
        if mode.horizontal_active() != current.horizontal_active() {
            let (mp, dp, path) = self.resolve(device_id, Attr::HorizontalSwing)?;
            let value = if mode.horizontal_active() { "swing" } else { "stop" };
            self.set_value(device_id, mp, dp, &path, json!(value)).await?;
        }
        if mode.vertical_active() != current.vertical_active() {
            let (mp, dp, path) = self.resolve(device_id, Attr::VerticalSwing)?;
            let value = if mode.vertical_active() { "swing" } else { "stop" };
            self.set_value(device_id, mp, dp, &path, json!(value)).await?;
        }
        Ok(())
    }

    /// Toggle a preset such as powerful or econo mode.
    pub async fn set_preset(&mut self, device_id: &str, preset: Preset, active: bool) -> Result<()> {
        if !self.find_device(device_id)?.supports_preset(preset) {
            return Err(Error::Validation(format!(
                "{} is not supported by this device",
                preset.as_daikin_str()
            )));
        }
        let value = if active { "on" } else { "off" };
        self.set_value(device_id, "climateControl", preset.as_daikin_str(), "", json!(value))
            .await
    }

    // -- Token plumbing --

    fn install_tokens(&mut self, tokens: TokenSet) {
        for cb in &self.token_callbacks {
            cb(&tokens);
        }
        self.token_set = Some(tokens);
    }

    /// Exchange the refresh token for a new access token. A rejected
    /// refresh falls back to a full login when credentials are on hand.
    async fn refresh_access_token(&mut self) -> Result<()> {
        let Some(tokens) = &self.token_set else {
            return Err(Error::MissingTokens);
        };
        let body = refresh_request_body(&tokens.refresh_token);
        let resp = self
            .http
            .post(&self.endpoints.cognito_idp_base)
            .header(reqwest::header::USER_AGENT, AMZ_USER_AGENT)
            .header(reqwest::header::CONTENT_TYPE, "application/x-amz-json-1.1")
            .header("x-amz-target", AMZ_INITIATE_AUTH)
            .header("x-amz-user-agent", "aws-amplify/0.1.x js")
            .body(body.to_string())
            .send()
            .await?;

        if resp.status().is_success() {
            let reply: Value = resp.json().await?;
            if let Some(refreshed) = parse_refresh_response(&reply) {
                if let Some(tokens) = &mut self.token_set {
                    tokens.apply_refresh(refreshed);
                }
                if let Some(tokens) = &self.token_set {
                    for cb in &self.token_callbacks {
                        cb(tokens);
                    }
                }
                debug!("access token refreshed");
                return Ok(());
            }
            warn!("refresh reply is not a bearer token grant, attempting full login");
        } else {
            warn!(status = resp.status().as_u16(), "token refresh rejected, attempting full login");
        }

        if self.credentials.is_some() {
            self.login().await
        } else {
            Err(Error::Unauthorized)
        }
    }

    /// One authenticated cloud request. A stale token is refreshed up
    /// front; a 401 triggers exactly one refresh-and-retry before giving
    /// up with Unauthorized.
    async fn bearer_request(
        &mut self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let Some(tokens) = &self.token_set else {
            return Err(Error::MissingTokens);
        };
        if tokens.is_expired(EXPIRY_MARGIN_SECS) {
            debug!("access token stale, refreshing before request");
            self.refresh_access_token().await?;
        }

        if let Some(ref mut logger) = self.logger {
            logger.log_request(method.as_str(), path);
        }

        let resp = self.send_authorized(method.clone(), path, body).await?;
        if resp.status().as_u16() != 401 {
            return Self::into_json(resp).await;
        }

        debug!(path, "got 401 from cloud, refreshing access token");
        self.refresh_access_token().await?;
        let retry = self.send_authorized(method, path, body).await?;
        if retry.status().as_u16() == 401 {
            return Err(Error::Unauthorized);
        }
        Self::into_json(retry).await
    }

    async fn send_authorized(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let tokens = self.token_set.as_ref().ok_or(Error::MissingTokens)?;
        let url = format!("{}{}", self.endpoints.api_base, path);
        let mut req = self
            .http
            .request(method, &url)
            .header(reqwest::header::USER_AGENT, MOBILE_USER_AGENT)
            .header("x-api-key", REST_API_KEY)
            .bearer_auth(&tokens.access_token)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }
        Ok(req.send().await?)
    }

    async fn into_json(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        if status.as_u16() == 204 {
            return Ok(Value::Null);
        }
        if status.is_success() {
            let text = resp.text().await?;
            if text.is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&text)?);
        }
        let body = resp.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(256).collect();
        Err(Error::Api {
            status: status.as_u16(),
            body: snippet,
        })
    }

    fn find_device(&self, device_id: &str) -> Result<&Device> {
        self.device(device_id)
            .ok_or_else(|| Error::UnknownDevice(device_id.to_string()))
    }

    fn resolve(&self, device_id: &str, attr: Attr) -> Result<(&'static str, &'static str, String)> {
        self.find_device(device_id)?
            .resolve_location(attr)
            .ok_or_else(|| {
                Error::Validation("current operation mode is not available".to_string())
            })
    }
}
