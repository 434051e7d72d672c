//! The browser-less SAML/Gigya/Cognito login sequence that turns a
//! username and password into a fresh token set.
//!
//! Each step scrapes one or more artifacts (cookie, redirect Location,
//! regex-matched hidden field) that the next step needs. Any missing
//! artifact aborts the whole sequence; there is no partial-success state.
//! The sequence is interop glue against the vendor's current web flow and
//! will break if that flow changes.

use chrono::Utc;
use reqwest::header;
use serde_json::Value;
use tracing::{debug, info};

use crate::auth::{Credentials, TokenSet};
use crate::protocol::{self, Endpoints};
use crate::{Error, Result};

fn step_err(step: &'static str, reason: impl Into<String>) -> Error {
    Error::LoginFlow {
        step,
        reason: reason.into(),
    }
}

fn location_header(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// First `name=value` segment of every Set-Cookie header on the response.
fn cookie_pairs(resp: &reqwest::Response) -> Vec<String> {
    resp.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|s| s.split(';').next())
        .map(|s| s.trim().to_string())
        .collect()
}

/// Run the full login choreography. `http` must have redirects disabled:
/// several steps read the `Location` header of a 302 themselves.
pub(crate) async fn retrieve_access_token(
    http: &reqwest::Client,
    endpoints: &Endpoints,
    credentials: &Credentials,
) -> Result<TokenSet> {
    info!("retrieving new token set via SAML login");
    let pkce = protocol::new_pkce();
    let state = protocol::random_state();

    // 1. authorize: collect csrf-state cookies and the first redirect
    let resp = http
        .get(format!("{}/oauth2/authorize", endpoints.cognito_auth_base))
        .query(&protocol::authorize_query(&state, &pkce.challenge))
        .send()
        .await?;
    let csrf_cookie = cookie_pairs(&resp)
        .into_iter()
        .filter(|c| c.contains("csrf-state"))
        .collect::<Vec<_>>()
        .join("; ");
    if csrf_cookie.is_empty() {
        return Err(step_err("authorize", "no csrf-state cookies in response"));
    }
    let saml_hop = location_header(&resp)
        .ok_or_else(|| step_err("authorize", "missing Location header"))?;

    // 2. saml-context: one more redirect carries the samlContext parameter
    let resp = http.get(&saml_hop).send().await?;
    let next = location_header(&resp)
        .ok_or_else(|| step_err("saml-context", "missing Location header on SAML redirect"))?;
    let saml_context = protocol::extract_saml_context(&next)
        .ok_or_else(|| step_err("saml-context", format!("no samlContext in {next}")))?;
    debug!(%saml_context, "SAML context extracted");

    // 3. gigya-version: the web SDK build id, needed for cookie fabrication
    let body = http
        .get(format!("{}/js/gigya.js", endpoints.gigya_cdn_base))
        .query(&[("apiKey", protocol::GIGYA_API_KEY)])
        .send()
        .await?
        .text()
        .await?;
    let sdk_version = protocol::extract_gigya_version(&body)
        .ok_or_else(|| step_err("gigya-version", "no SDK version found in gigya.js"))?;
    debug!(%sdk_version, "Gigya SDK version extracted");

    // 4. sso-bootstrap: session cookies, plus the ones the SDK would have set
    let resp = http
        .get(format!("{}/accounts.webSdkBootstrap", endpoints.cdc_base))
        .query(&[
            ("apiKey", protocol::GIGYA_API_KEY),
            ("sdk", "js_latest"),
            ("format", "json"),
        ])
        .send()
        .await?;
    let mut sso_cookies = cookie_pairs(&resp);
    if sso_cookies.is_empty() {
        return Err(step_err("sso-bootstrap", "no session cookies in bootstrap response"));
    }
    sso_cookies.push(protocol::bootstrap_cookie_suffix(&sdk_version));
    let session_cookie = sso_cookies.join("; ");

    // 5. gigya-login: the actual credential check
    let body = http
        .post(format!("{}/accounts.login", endpoints.cdc_base))
        .header(header::COOKIE, &session_cookie)
        .form(&protocol::gigya_login_form(
            &credentials.email,
            &credentials.password,
            &saml_context,
        ))
        .send()
        .await?
        .text()
        .await?;
    let reply: Value = serde_json::from_str(&body)
        .map_err(|e| step_err("gigya-login", format!("reply is not JSON: {e}")))?;
    let login_token =
        protocol::extract_login_token(&reply).map_err(|reason| step_err("gigya-login", reason))?;

    // 6. saml-continue: trade the login token for a SAML assertion form
    let expiry = Utc::now().timestamp() + 3_600_000;
    let login_cookie = format!(
        "{session_cookie}; {}",
        protocol::login_token_cookie_suffix(&login_token, expiry)
    );
    let html = http
        .post(format!(
            "{}/saml/v2.0/{}/idp/sso/continue",
            endpoints.cdc_base,
            protocol::GIGYA_API_KEY
        ))
        .header(header::COOKIE, &login_cookie)
        .form(&[
            ("samlContext", saml_context.as_str()),
            ("loginToken", login_token.as_str()),
        ])
        .send()
        .await?
        .text()
        .await?;
    let saml_response = protocol::extract_hidden_field(&html, "SAMLResponse")
        .ok_or_else(|| step_err("saml-continue", "no SAMLResponse field in IdP form"))?;
    let relay_state = protocol::extract_hidden_field(&html, "RelayState")
        .ok_or_else(|| step_err("saml-continue", "no RelayState field in IdP form"))?;

    // 7. idp-response: post the assertion back to Cognito, expect the
    // daikinunified:// callback in the Location header
    let resp = http
        .post(format!("{}/saml2/idpresponse", endpoints.cognito_auth_base))
        .header(header::COOKIE, &csrf_cookie)
        .form(&[
            ("SAMLResponse", saml_response.as_str()),
            ("RelayState", relay_state.as_str()),
        ])
        .send()
        .await?;
    let callback = location_header(&resp)
        .ok_or_else(|| step_err("idp-response", "missing Location header"))?;
    if !callback.contains("daikinunified") {
        return Err(step_err(
            "idp-response",
            format!("unexpected redirect target {callback}"),
        ));
    }

    // 8. token-exchange: authorization code + PKCE verifier, no client secret
    let (code, returned_state) = protocol::extract_callback_params(&callback)
        .ok_or_else(|| step_err("token-exchange", "callback URL missing code/state"))?;
    if returned_state != state {
        return Err(step_err("token-exchange", "state mismatch in callback"));
    }
    let body = http
        .post(format!("{}/oauth2/token", endpoints.cognito_auth_base))
        .form(&protocol::token_exchange_form(&code, &pkce.verifier))
        .send()
        .await?
        .text()
        .await?;
    let reply: Value = serde_json::from_str(&body)
        .map_err(|e| step_err("token-exchange", format!("reply is not JSON: {e}")))?;
    let token_set = TokenSet::from_token_response(&reply)
        .ok_or_else(|| step_err("token-exchange", "reply is missing token fields"))?;

    info!("new token set retrieved");
    Ok(token_set)
}
