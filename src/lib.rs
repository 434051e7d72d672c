mod auth;
mod client;
mod device;
mod diff;
mod error;
mod logger;
mod login;
mod protocol;
mod types;

pub use auth::{Credentials, TokenSet};
pub use client::{DaikinClient, DaikinClientBuilder};
pub use device::Device;
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use protocol::Endpoints;
pub use types::*;
