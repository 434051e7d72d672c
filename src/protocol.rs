use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use regex::Regex;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// Cognito app client used by the official Daikin Residential Controller app.
pub const OPENID_CLIENT_ID: &str = "7rk39602f0ds8lk0h076vvijnb";

/// Gigya/CDC site keys baked into the vendor's login page.
pub const GIGYA_API_KEY: &str =
    "3_xRB3jaQ62bVjqXU1omaEsPDVYC0Twi1zfq1zHPu_5HFT0zWkDvZJS97Yw1loJnTm";
pub const GIGYA_API_KEY_2: &str =
    "3_QebFXhxEWDc8JhJdBWmvUd1e0AaWJCISbqe4QIHrk_KzNVJFJ4xsJ2UZbl8OIIFY";

pub const REST_API_KEY: &str = "xw6gvOtBHq5b1pyceadRp6rujSNSZdjx2AqT03iC";
pub const REDIRECT_URI: &str = "daikinunified://login";

pub const MOBILE_USER_AGENT: &str = "Daikin/1.6.1.4681 CFNetwork/1209 Darwin/20.2.0";
pub const AMZ_USER_AGENT: &str = "Daikin/1.6.1.4681 CFNetwork/1220.1 Darwin/20.3.0";
pub const AMZ_INITIATE_AUTH: &str = "AWSCognitoIdentityProviderService.InitiateAuth";

/// Base URLs for the production cloud stack. Overridable so tests can point
/// every hop at a mock server.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// REST API for device data (`/v1/...`).
    pub api_base: String,
    /// Cognito hosted-UI domain (authorize, token, idpresponse).
    pub cognito_auth_base: String,
    /// Cognito identity-provider service (token refresh).
    pub cognito_idp_base: String,
    /// Gigya CDN serving the web SDK.
    pub gigya_cdn_base: String,
    /// Daikin consumer-identity (CDC) host.
    pub cdc_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: "https://api.prod.unicloud.edc.dknadmin.be".to_string(),
            cognito_auth_base: "https://daikin-unicloud-prod.auth.eu-west-1.amazoncognito.com"
                .to_string(),
            cognito_idp_base: "https://cognito-idp.eu-west-1.amazonaws.com".to_string(),
            gigya_cdn_base: "https://cdns.gigya.com".to_string(),
            cdc_base: "https://cdc.daikin.eu".to_string(),
        }
    }
}

pub(crate) struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

pub(crate) fn new_pkce() -> Pkce {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(digest);
    Pkce { verifier, challenge }
}

pub(crate) fn random_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// -- Request builders --

pub(crate) fn authorize_query(state: &str, code_challenge: &str) -> Vec<(&'static str, String)> {
    vec![
        ("response_type", "code".to_string()),
        ("client_id", OPENID_CLIENT_ID.to_string()),
        ("scope", "email openid profile".to_string()),
        ("redirect_uri", REDIRECT_URI.to_string()),
        ("state", state.to_string()),
        ("code_challenge", code_challenge.to_string()),
        ("code_challenge_method", "S256".to_string()),
    ]
}

pub(crate) fn refresh_request_body(refresh_token: &str) -> Value {
    json!({
        "ClientId": OPENID_CLIENT_ID,
        "AuthFlow": "REFRESH_TOKEN_AUTH",
        "AuthParameters": { "REFRESH_TOKEN": refresh_token }
    })
}

pub(crate) fn gigya_login_form(
    email: &str,
    password: &str,
    saml_context: &str,
) -> Vec<(&'static str, String)> {
    vec![
        ("loginID", email.to_string()),
        ("password", password.to_string()),
        ("sessionExpiration", "31536000".to_string()),
        ("targetEnv", "jssdk".to_string()),
        ("include", "profile,".to_string()),
        ("loginMode", "standard".to_string()),
        ("riskContext", r#"{"b0":7527,"b2":4,"b5":1"#.to_string()),
        ("APIKey", GIGYA_API_KEY.to_string()),
        ("sdk", "js_latest".to_string()),
        ("authMode", "cookie".to_string()),
        (
            "pageURL",
            format!(
                "https://my.daikin.eu/content/daikinid-cdc-saml/en/login.html?samlContext={saml_context}"
            ),
        ),
        ("sdkBuild", "12208".to_string()),
        ("format", "json".to_string()),
    ]
}

pub(crate) fn token_exchange_form(code: &str, code_verifier: &str) -> Vec<(&'static str, String)> {
    vec![
        ("grant_type", "authorization_code".to_string()),
        ("client_id", OPENID_CLIENT_ID.to_string()),
        ("code", code.to_string()),
        ("redirect_uri", REDIRECT_URI.to_string()),
        ("code_verifier", code_verifier.to_string()),
    ]
}

/// Cookies the Gigya web SDK would have written alongside the bootstrap call.
pub(crate) fn bootstrap_cookie_suffix(sdk_version: &str) -> String {
    format!(
        "gig_bootstrap_{GIGYA_API_KEY}=cdc_ver4; \
         gig_canary_{GIGYA_API_KEY_2}=false; \
         gig_canary_ver_{GIGYA_API_KEY_2}={sdk_version}; \
         apiDomain_{GIGYA_API_KEY_2}=cdc.daikin.eu"
    )
}

/// Cookies the SDK writes after a successful `accounts.login`.
pub(crate) fn login_token_cookie_suffix(login_token: &str, expiry: i64) -> String {
    format!(
        "glt_{GIGYA_API_KEY}={login_token}; \
         gig_loginToken_{GIGYA_API_KEY_2}={login_token}; \
         gig_loginToken_{GIGYA_API_KEY_2}_exp={expiry}; \
         gig_loginToken_{GIGYA_API_KEY_2}_visited=%2C{GIGYA_API_KEY}"
    )
}

// -- Response pickers --

pub(crate) fn extract_saml_context(location: &str) -> Option<String> {
    let re = Regex::new(r"samlContext=([^&]+)").ok()?;
    Some(re.captures(location)?.get(1)?.as_str().to_string())
}

pub(crate) fn extract_gigya_version(body: &str) -> Option<String> {
    let re = Regex::new(r"(\d+-\d-\d+)").ok()?;
    Some(re.captures(body)?.get(1)?.as_str().to_string())
}

pub(crate) fn extract_hidden_field(html: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(r#"name="{name}" value="([^"]+)""#)).ok()?;
    Some(re.captures(html)?.get(1)?.as_str().to_string())
}

/// Pull the session login token out of an `accounts.login` reply.
/// `Err` carries the vendor's errorDetails string.
pub(crate) fn extract_login_token(reply: &Value) -> std::result::Result<String, String> {
    let error_code = reply.get("errorCode").and_then(|v| v.as_i64()).unwrap_or(-1);
    if error_code == 0
        && let Some(token) = reply
            .pointer("/sessionInfo/login_token")
            .and_then(|v| v.as_str())
    {
        return Ok(token.to_string());
    }
    let details = reply
        .get("errorDetails")
        .and_then(|v| v.as_str())
        .unwrap_or("no errorDetails in reply");
    Err(format!("login rejected (errorCode {error_code}): {details}"))
}

/// Parse `code` and `state` out of the `daikinunified://login?...` callback.
pub(crate) fn extract_callback_params(callback_url: &str) -> Option<(String, String)> {
    let url = reqwest::Url::parse(callback_url).ok()?;
    let mut code = None;
    let mut state = None;
    for (k, v) in url.query_pairs() {
        match k.as_ref() {
            "code" => code = Some(v.into_owned()),
            "state" => state = Some(v.into_owned()),
            _ => {}
        }
    }
    Some((code?, state?))
}

pub(crate) struct RefreshResult {
    pub access_token: String,
    pub id_token: Option<String>,
    pub expires_in: i64,
}

/// Pick the rotated tokens out of a Cognito `InitiateAuth` reply.
/// Returns None when the provider rejected the refresh token.
pub(crate) fn parse_refresh_response(reply: &Value) -> Option<RefreshResult> {
    let result = reply.get("AuthenticationResult")?;
    if result.get("TokenType").and_then(|v| v.as_str()) != Some("Bearer") {
        return None;
    }
    Some(RefreshResult {
        access_token: result.get("AccessToken")?.as_str()?.to_string(),
        id_token: result
            .get("IdToken")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        expires_in: result.get("ExpiresIn").and_then(|v| v.as_i64()).unwrap_or(3600),
    })
}
