//! Client configuration.

use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080";

/// Base URLs for the websoc service.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL for REST calls.
    pub api_base: Url,
    /// Base URL for the room stream endpoint.
    pub ws_base: Url,
}

impl ClientConfig {
    pub fn new(api_base: &str, ws_base: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            api_base: Url::parse(api_base)?,
            ws_base: Url::parse(ws_base)?,
        })
    }

    /// Read `WEBSOC_API_URL` / `WEBSOC_WS_URL` from the environment, falling
    /// back to the local development defaults.
    pub fn from_env() -> Result<Self, url::ParseError> {
        let api = std::env::var("WEBSOC_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let ws = std::env::var("WEBSOC_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
        Self::new(&api, &ws)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL, DEFAULT_WS_URL).expect("default URLs are valid")
    }
}
