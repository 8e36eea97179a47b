//! HTTP API client for the websoc REST endpoints.
//!
//! Authentication is cookie based: the server sets a session cookie on
//! login/signup and the client carries it on every later call.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::models::{CreateRoomRequest, LoginCredentials, Room, SignupCredentials, User};

/// REST endpoint paths.
pub mod endpoints {
    pub const LOGIN: &str = "/api/users/login";
    pub const SIGNUP: &str = "/api/users/sign-up";
    pub const LOGOUT: &str = "/api/users/logout";
    pub const ME: &str = "/api/users/me";
    pub const GET_ROOMS: &str = "/api/websoc/get-rooms";
    pub const CREATE_ROOM: &str = "/api/websoc/create-room";
}

/// HTTP client for the websoc service.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client for the configured API base URL.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.api_base.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::read_json(resp).await
    }

    async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::read_json(resp).await
    }

    async fn read_json<TRes: DeserializeOwned>(resp: reqwest::Response) -> Result<TRes, ApiError> {
        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }

    /// Log in with email and password. The session cookie is retained for
    /// subsequent calls.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<User, ApiError> {
        self.post_json(endpoints::LOGIN, credentials).await
    }

    /// Register a new account and start a session.
    pub async fn signup(&self, credentials: &SignupCredentials) -> Result<User, ApiError> {
        self.post_json(endpoints::SIGNUP, credentials).await
    }

    /// End the current session.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let resp = self
            .client
            .post(self.url(endpoints::LOGOUT))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Http { status, body });
        }
        Ok(())
    }

    /// Fetch the logged-in user, or `None` when there is no usable session.
    pub async fn current_user(&self) -> Option<User> {
        self.get_json(endpoints::ME).await.ok()
    }

    /// List the rooms currently available to join.
    pub async fn get_rooms(&self) -> Result<Vec<Room>, ApiError> {
        self.get_json(endpoints::GET_ROOMS).await
    }

    /// Create a room, optionally with an expiry.
    pub async fn create_room(&self, request: &CreateRoomRequest) -> Result<Room, ApiError> {
        self.post_json(endpoints::CREATE_ROOM, request).await
    }
}
