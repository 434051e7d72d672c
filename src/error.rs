use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    Unauthorized,
    MissingTokens,
    LoginFlow { step: &'static str, reason: String },
    Validation(String),
    UnknownDevice(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api { status, body } => write!(f, "API error {status}: {body}"),
            Error::Unauthorized => write!(f, "unauthorized (token rejected after refresh)"),
            Error::MissingTokens => write!(f, "missing token set, authenticate first"),
            Error::LoginFlow { step, reason } => write!(f, "login flow failed at {step}: {reason}"),
            Error::Validation(msg) => write!(f, "validation failed: {msg}"),
            Error::UnknownDevice(id) => write!(f, "unknown device: {id}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
