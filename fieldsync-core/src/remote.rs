//! Boundary to the remote equipment API
//!
//! The engine only needs one thing from the remote service: replay a queued
//! action and report what came back. `Err(SyncError::Network)` means no
//! response was received at all; any HTTP status is an `Ok` response and is
//! classified by the coordinator.

use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};
use crate::queue::{HttpMethod, PendingAction};
use async_trait::async_trait;

/// What the remote service answered
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    /// JSON body, when the server sent one
    pub body: Option<serde_json::Value>,
}

impl RemoteResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Definitive rejection of this particular action
    pub fn is_rejection(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Short human-readable reason for `last_error`
    pub fn error_message(&self) -> String {
        let detail = self
            .body
            .as_ref()
            .and_then(|b| b.get("message").or_else(|| b.get("error")))
            .and_then(|m| m.as_str())
            .map(str::to_string);
        match detail {
            Some(detail) => format!("HTTP {}: {}", self.status, detail),
            None => format!("HTTP {}", self.status),
        }
    }
}

/// Remote API consumed by the sync coordinator
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Replay one action against the remote service
    async fn dispatch(&self, action: &PendingAction) -> SyncResult<RemoteResponse>;
}

/// `reqwest`-backed remote API client
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRemote {
    pub fn new(config: &RemoteConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn url_for(&self, action: &PendingAction) -> String {
        if action.url.starts_with("http://") || action.url.starts_with("https://") {
            action.url.clone()
        } else {
            format!("{}/{}", self.base_url, action.url.trim_start_matches('/'))
        }
    }
}

fn to_reqwest(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn dispatch(&self, action: &PendingAction) -> SyncResult<RemoteResponse> {
        let url = self.url_for(action);
        let mut req = self.client.request(to_reqwest(action.method), &url);

        if action.method != HttpMethod::Get {
            req = req.json(&action.payload);
        }
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        tracing::debug!(action_id = %action.id, method = %action.method, url = %url, "Dispatching action");

        let response = req.send().await.map_err(|e| SyncError::Network(e.to_string()))?;
        let status = response.status().as_u16();

        // A body that is missing or not JSON still counts as a response
        let body = match response.bytes().await {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes).ok(),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(action_id = %action.id, error = %e, "Failed to read response body");
                None
            }
        };

        Ok(RemoteResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_classification() {
        let ok = RemoteResponse { status: 204, body: None };
        assert!(ok.is_success());
        assert!(!ok.is_rejection());

        let rejected = RemoteResponse {
            status: 422,
            body: Some(json!({"message": "serialNumber already exists"})),
        };
        assert!(rejected.is_rejection());
        assert_eq!(rejected.error_message(), "HTTP 422: serialNumber already exists");

        let unavailable = RemoteResponse { status: 503, body: None };
        assert!(!unavailable.is_success());
        assert!(!unavailable.is_rejection());
        assert_eq!(unavailable.error_message(), "HTTP 503");
    }

    #[test]
    fn test_url_joining() {
        let remote = HttpRemote::new(&RemoteConfig {
            base_url: "https://inventory.example.com/api/".to_string(),
            ..RemoteConfig::default()
        })
        .unwrap();

        let action = PendingAction {
            id: uuid::Uuid::new_v4(),
            kind: crate::queue::ActionKind::EquipmentUpdate,
            target_id: "1".to_string(),
            payload: json!({}),
            method: HttpMethod::Put,
            url: "/equipment/1".to_string(),
            created_at: chrono::Utc::now(),
            attempts: 0,
            last_error: None,
            status: crate::queue::ActionStatus::Pending,
        };
        assert_eq!(remote.url_for(&action), "https://inventory.example.com/api/equipment/1");
    }
}
