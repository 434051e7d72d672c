use std::fmt;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;
use crate::protocol::RefreshResult;

/// OAuth token bundle, wire-compatible with the `tokenset.json` file the
/// original tooling writes, so hosts can persist it verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub token_type: String,
    /// Unix timestamp. Zero means unknown, which forces a proactive refresh.
    #[serde(default)]
    pub expires_at: i64,
}

impl TokenSet {
    /// Build from an OAuth token-endpoint reply (authorization-code grant).
    pub(crate) fn from_token_response(reply: &Value) -> Option<Self> {
        let expires_in = reply.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(3600);
        Some(Self {
            access_token: reply.get("access_token")?.as_str()?.to_string(),
            refresh_token: reply.get("refresh_token")?.as_str()?.to_string(),
            id_token: reply
                .get("id_token")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            token_type: reply
                .get("token_type")
                .and_then(|v| v.as_str())
                .unwrap_or("Bearer")
                .to_string(),
            expires_at: Utc::now().timestamp() + expires_in,
        })
    }

    /// Rotate access/id token in place from a Cognito refresh reply.
    /// The refresh token itself is kept: REFRESH_TOKEN_AUTH does not rotate it.
    pub(crate) fn apply_refresh(&mut self, refreshed: RefreshResult) {
        self.access_token = refreshed.access_token;
        if refreshed.id_token.is_some() {
            self.id_token = refreshed.id_token;
        }
        self.expires_at = Utc::now().timestamp() + refreshed.expires_in;
    }

    /// True when the access token is stale, or will be within `margin_secs`.
    pub fn is_expired(&self, margin_secs: i64) -> bool {
        self.expires_at <= Utc::now().timestamp() + margin_secs
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = serde_json::to_string(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}
