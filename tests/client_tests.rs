use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use daikin_residential::{DaikinClient, Endpoints, Error, FanSpeed, HvacMode, TokenSet};
use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoints(server: &MockServer) -> Endpoints {
    Endpoints {
        api_base: server.uri(),
        cognito_auth_base: server.uri(),
        cognito_idp_base: server.uri(),
        gigya_cdn_base: server.uri(),
        cdc_base: server.uri(),
    }
}

fn tokens(access: &str, expires_at: i64) -> TokenSet {
    TokenSet {
        access_token: access.to_string(),
        refresh_token: "rt-1".to_string(),
        id_token: None,
        token_type: "Bearer".to_string(),
        expires_at,
    }
}

fn fresh_tokens() -> TokenSet {
    tokens("at-1", Utc::now().timestamp() + 3600)
}

fn device_description(id: &str) -> Value {
    json!({
        "id": id,
        "lastUpdateReceived": "2024-03-01T12:00:00Z",
        "managementPoints": [
            {
                "embeddedId": "gateway",
                "managementPointType": "gateway",
                "modelInfo": { "settable": false, "value": "BRP069C4x" },
                "macAddress": { "settable": false, "value": "0090cf000001" },
                "firmwareVersion": { "settable": false, "value": "1_2_3" },
                "serialNumber": { "settable": false, "value": "0000001" }
            },
            {
                "embeddedId": "climateControl",
                "managementPointType": "climateControl",
                "name": { "settable": true, "maxLength": 20, "value": "Living room" },
                "isInErrorState": { "settable": false, "value": false },
                "errorCode": { "settable": false, "value": "" },
                "onOffMode": { "settable": true, "values": ["on", "off"], "value": "on" },
                "operationMode": {
                    "settable": true,
                    "values": ["fanOnly", "heating", "cooling", "auto", "dry"],
                    "value": "cooling"
                },
                "temperatureControl": {
                    "ref": "#temperatureControl",
                    "settable": true,
                    "value": { "operationModes": { "cooling": { "setpoints": {
                        "roomTemperature": {
                            "settable": true, "value": 25.0,
                            "minValue": 18.0, "maxValue": 32.0, "stepValue": 0.5
                        }
                    } } } }
                },
                "fanControl": {
                    "ref": "#fanControl",
                    "settable": true,
                    "value": { "operationModes": { "cooling": {
                        "fanSpeed": {
                            "currentMode": {
                                "settable": true,
                                "values": ["auto", "quiet", "fixed"],
                                "value": "auto"
                            },
                            "modes": { "fixed": {
                                "settable": true, "value": 3,
                                "minValue": 1, "maxValue": 5, "stepValue": 1
                            } }
                        },
                        "fanDirection": {
                            "horizontal": { "currentMode": {
                                "settable": true, "values": ["stop", "swing"], "value": "stop"
                            } },
                            "vertical": { "currentMode": {
                                "settable": true, "values": ["stop", "swing"], "value": "swing"
                            } }
                        }
                    } } }
                },
                "sensoryData": {
                    "ref": "#sensoryData",
                    "value": {
                        "roomTemperature": { "settable": false, "value": 24.1 },
                        "outdoorTemperature": { "settable": false, "value": 18.5 },
                        "roomHumidity": { "settable": false, "value": 51 }
                    }
                },
                "powerfulMode": { "settable": true, "values": ["on", "off"], "value": "off" }
            }
        ]
    })
}

fn devices_mock(body: &Value) -> Mock {
    Mock::given(method("GET"))
        .and(path("/v1/gateway-devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
}

fn refresh_mock(new_access: &str) -> Mock {
    Mock::given(method("POST"))
        .and(header(
            "x-amz-target",
            "AWSCognitoIdentityProviderService.InitiateAuth",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "AuthenticationResult": {
                "AccessToken": new_access,
                "TokenType": "Bearer",
                "ExpiresIn": 3600
            }
        })))
}

async fn discovered_client(server: &MockServer) -> DaikinClient {
    devices_mock(&json!([device_description("dev-1")]))
        .mount(server)
        .await;
    let mut client = DaikinClient::builder()
        .endpoints(endpoints(server))
        .token_set(fresh_tokens())
        .min_update_interval(Duration::ZERO)
        .build();
    assert_eq!(client.discover().await.expect("discover should succeed"), 1);
    client
}

#[tokio::test]
async fn discover_filters_devices_without_model() {
    let server = MockServer::start().await;
    let no_model = json!({
        "id": "dev-2",
        "managementPoints": [{
            "embeddedId": "climateControl",
            "onOffMode": { "settable": true, "value": "off" }
        }]
    });
    devices_mock(&json!([device_description("dev-1"), no_model]))
        .mount(&server)
        .await;

    let mut client = DaikinClient::builder()
        .endpoints(endpoints(&server))
        .token_set(fresh_tokens())
        .build();
    assert_eq!(client.discover().await.unwrap(), 1);

    let device = client.device("dev-1").expect("dev-1 should exist");
    assert_eq!(device.name(), Some("Living room"));
    assert_eq!(device.model(), Some("BRP069C4x"));
    assert_eq!(device.firmware_version().as_deref(), Some("1.2.3"));
    assert_eq!(device.mac_address().as_deref(), Some("00:90:cf:00:00:01"));
    assert!(client.device("dev-2").is_none());
}

#[tokio::test]
async fn request_without_tokens_fails() {
    let server = MockServer::start().await;
    let mut client = DaikinClient::builder().endpoints(endpoints(&server)).build();
    let err = client.discover().await.unwrap_err();
    assert!(matches!(err, Error::MissingTokens), "got {err:?}");
}

#[tokio::test]
async fn stale_token_is_refreshed_before_request() {
    let server = MockServer::start().await;
    refresh_mock("at-new").expect(1).mount(&server).await;
    devices_mock(&json!([device_description("dev-1")]))
        .mount(&server)
        .await;

    let mut client = DaikinClient::builder()
        .endpoints(endpoints(&server))
        .token_set(tokens("at-old", Utc::now().timestamp() - 10))
        .build();
    client.discover().await.expect("discover should succeed");
    assert_eq!(client.token_set().unwrap().access_token, "at-new");
    // the refresh token is not rotated by this grant
    assert_eq!(client.token_set().unwrap().refresh_token, "rt-1");
}

#[tokio::test]
async fn single_401_triggers_one_refresh_and_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/gateway-devices"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    refresh_mock("at-new").expect(1).mount(&server).await;
    devices_mock(&json!([device_description("dev-1")]))
        .mount(&server)
        .await;

    let mut client = DaikinClient::builder()
        .endpoints(endpoints(&server))
        .token_set(fresh_tokens())
        .build();
    assert_eq!(client.discover().await.unwrap(), 1);
    assert_eq!(client.token_set().unwrap().access_token, "at-new");
}

#[tokio::test]
async fn persistent_401_is_unauthorized_after_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/gateway-devices"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    refresh_mock("at-new").expect(1).mount(&server).await;

    let mut client = DaikinClient::builder()
        .endpoints(endpoints(&server))
        .token_set(fresh_tokens())
        .build();
    let err = client.discover().await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized), "got {err:?}");
}

#[tokio::test]
async fn on_token_update_fires_after_refresh() {
    let server = MockServer::start().await;
    refresh_mock("at-new").mount(&server).await;
    devices_mock(&json!([device_description("dev-1")]))
        .mount(&server)
        .await;

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(vec![]));
    let seen_clone = seen.clone();
    let mut client = DaikinClient::builder()
        .endpoints(endpoints(&server))
        .token_set(tokens("at-old", Utc::now().timestamp() - 10))
        .on_token_update(move |t| {
            seen_clone.lock().unwrap().push(t.access_token.clone());
        })
        .build();
    client.discover().await.unwrap();
    assert_eq!(seen.lock().unwrap().as_slice(), ["at-new"]);
}

#[tokio::test]
async fn update_all_is_throttled() {
    let server = MockServer::start().await;
    devices_mock(&json!([device_description("dev-1")]))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = DaikinClient::builder()
        .endpoints(endpoints(&server))
        .token_set(fresh_tokens())
        .build();
    client.discover().await.unwrap();

    // within the default minimum interval: collapsed, no network traffic
    assert!(!client.update_all().await.unwrap());
}

#[tokio::test]
async fn update_all_refreshes_device_state() {
    let server = MockServer::start().await;
    let mut client = discovered_client(&server).await;

    server.reset().await;
    let mut updated = device_description("dev-1");
    updated["managementPoints"][1]["sensoryData"]["value"]["roomTemperature"]["value"] =
        json!(26.5);
    devices_mock(&json!([updated])).mount(&server).await;

    assert!(client.update_all().await.unwrap());
    let device = client.device("dev-1").unwrap();
    assert_eq!(device.room_temperature(), Some(26.5));
}

#[tokio::test]
async fn update_device_bypasses_throttle() {
    let server = MockServer::start().await;

    devices_mock(&json!([device_description("dev-1")]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/gateway-devices/dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_description("dev-1")))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = DaikinClient::builder()
        .endpoints(endpoints(&server))
        .token_set(fresh_tokens())
        .build();
    client.discover().await.unwrap();
    client.update_device("dev-1").await.expect("single-device update");

    let err = client.update_device("dev-9").await.unwrap_err();
    assert!(matches!(err, Error::UnknownDevice(id) if id == "dev-9"));
}

#[tokio::test]
async fn set_value_patches_and_updates_cache() {
    let server = MockServer::start().await;
    let mut client = discovered_client(&server).await;

    Mock::given(method("PATCH"))
        .and(path_regex(
            r"/v1/gateway-devices/dev-1/management-points/climateControl/characteristics/operationMode",
        ))
        .and(body_string_contains("heating"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client
        .set_value("dev-1", "climateControl", "operationMode", "", json!("heating"))
        .await
        .expect("write should succeed");

    // cache patched optimistically, no re-read
    let device = client.device("dev-1").unwrap();
    assert_eq!(
        device.value("climateControl", "operationMode", ""),
        Some(&json!("heating"))
    );
}

#[tokio::test]
async fn invalid_write_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    let mut client = discovered_client(&server).await;

    Mock::given(method("PATCH"))
        .and(path_regex(r"/v1/gateway-devices/.*"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    // not in the values enum
    let err = client
        .set_value("dev-1", "climateControl", "operationMode", "", json!("defrost"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");

    // above maxValue of the setpoint descriptor
    let err = client
        .set_value(
            "dev-1",
            "climateControl",
            "temperatureControl",
            "/operationModes/cooling/setpoints/roomTemperature",
            json!(40.0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");

    // read-only sensor
    let err = client
        .set_value(
            "dev-1",
            "climateControl",
            "sensoryData",
            "/roomTemperature",
            json!(20.0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
}

#[tokio::test]
async fn set_hvac_mode_off_writes_power_switch() {
    let server = MockServer::start().await;
    let mut client = discovered_client(&server).await;

    Mock::given(method("PATCH"))
        .and(path_regex(r"characteristics/onOffMode"))
        .and(body_string_contains("off"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client
        .set_hvac_mode("dev-1", HvacMode::Off)
        .await
        .expect("power off should succeed");
    assert_eq!(client.device("dev-1").unwrap().hvac_mode(), HvacMode::Off);
}

#[tokio::test]
async fn set_hvac_mode_powers_on_before_selecting_mode() {
    let server = MockServer::start().await;
    let mut off_device = device_description("dev-1");
    off_device["managementPoints"][1]["onOffMode"]["value"] = json!("off");
    devices_mock(&json!([off_device])).mount(&server).await;

    Mock::given(method("PATCH"))
        .and(path_regex(r"characteristics/onOffMode"))
        .and(body_string_contains("on"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path_regex(r"characteristics/operationMode"))
        .and(body_string_contains("heating"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = DaikinClient::builder()
        .endpoints(endpoints(&server))
        .token_set(fresh_tokens())
        .build();
    client.discover().await.unwrap();
    client
        .set_hvac_mode("dev-1", HvacMode::Heating)
        .await
        .expect("mode change should succeed");
    assert_eq!(
        client.device("dev-1").unwrap().hvac_mode(),
        HvacMode::Heating
    );
}

#[tokio::test]
async fn set_target_temperature_uses_current_mode_path() {
    let server = MockServer::start().await;
    let mut client = discovered_client(&server).await;

    Mock::given(method("PATCH"))
        .and(path_regex(r"characteristics/temperatureControl"))
        .and(body_string_contains("/operationModes/cooling/setpoints/roomTemperature"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client
        .set_target_temperature("dev-1", 23.5)
        .await
        .expect("setpoint write should succeed");
    assert_eq!(
        client.device("dev-1").unwrap().target_temperature(),
        Some(23.5)
    );
}

#[tokio::test]
async fn set_fan_speed_fixed_writes_mode_then_level() {
    let server = MockServer::start().await;
    let mut client = discovered_client(&server).await;

    Mock::given(method("PATCH"))
        .and(path_regex(r"characteristics/fanControl"))
        .and(body_string_contains("fanSpeed/currentMode"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path_regex(r"characteristics/fanControl"))
        .and(body_string_contains("fanSpeed/modes/fixed"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client
        .set_fan_speed("dev-1", FanSpeed::Fixed(5))
        .await
        .expect("fan speed write should succeed");
    assert_eq!(
        client.device("dev-1").unwrap().fan_speed(),
        Some(FanSpeed::Fixed(5))
    );
}
