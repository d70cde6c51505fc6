use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

/// A short-lived credential the browser uses to talk to the realtime API directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EphemeralKey {
    pub key: String,
    pub expires_at: i64,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("realtime api key not configured")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("realtime sessions request failed with status {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid response from realtime sessions api")]
    MissingClientSecret,
}

#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self) -> Result<EphemeralKey, CredentialError>;
}

/// Session parameters sent with each credential request.
#[derive(Debug, Clone)]
pub struct IssuerSettings {
    pub sessions_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub instructions: String,
    pub transcription_model: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(default)]
    client_secret: Option<ClientSecret>,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    expires_at: i64,
}

/// Issues credentials by creating a realtime session over HTTP.
#[derive(Clone)]
pub struct RealtimeSessionIssuer {
    settings: IssuerSettings,
    client: Client,
}

impl RealtimeSessionIssuer {
    pub fn new(settings: IssuerSettings) -> Self {
        Self {
            settings,
            client: Client::new(),
        }
    }

    fn request_body(&self) -> serde_json::Value {
        json!({
            "model": self.settings.model,
            "voice": self.settings.voice,
            "instructions": self.settings.instructions,
            "input_audio_transcription": { "model": self.settings.transcription_model },
        })
    }
}

#[async_trait]
impl CredentialIssuer for RealtimeSessionIssuer {
    async fn issue(&self) -> Result<EphemeralKey, CredentialError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or(CredentialError::MissingApiKey)?;

        let response = self
            .client
            .post(&self.settings.sessions_url)
            .bearer_auth(api_key)
            .json(&self.request_body())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "realtime sessions api rejected request");
            return Err(CredentialError::Status(status));
        }

        let body: SessionResponse = response.json().await?;
        let secret = body.client_secret.ok_or(CredentialError::MissingClientSecret)?;
        let key = secret
            .value
            .filter(|value| !value.is_empty())
            .ok_or(CredentialError::MissingClientSecret)?;
        debug!(expires_at = secret.expires_at, "issued ephemeral key");

        Ok(EphemeralKey {
            key,
            expires_at: secret.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::post, Json, Router};
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn settings(url: String, api_key: Option<&str>) -> IssuerSettings {
        IssuerSettings {
            sessions_url: url,
            api_key: api_key.map(str::to_string),
            model: "gpt-4o-realtime-preview-2024-12-17".into(),
            voice: "alloy".into(),
            instructions: "You are a helpful assistant".into(),
            transcription_model: "whisper-1".into(),
        }
    }

    async fn spawn_stub(reply: Value, seen: Arc<Mutex<Vec<(Option<String>, Value)>>>) -> String {
        let app = Router::new().route(
            "/v1/realtime/sessions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let reply = reply.clone();
                let seen = seen.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string);
                    seen.lock().await.push((auth, body));
                    Json(reply)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1/realtime/sessions")
    }

    #[test_timeout::tokio_timeout_test]
    async fn issues_key_from_client_secret() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = spawn_stub(
            json!({"client_secret": {"value": "abc", "expires_at": 999}}),
            seen.clone(),
        )
        .await;
        let issuer = RealtimeSessionIssuer::new(settings(url, Some("sk-test")));

        let key = issuer.issue().await.unwrap();
        assert_eq!(
            key,
            EphemeralKey {
                key: "abc".into(),
                expires_at: 999
            }
        );

        let seen = seen.lock().await;
        let (auth, body) = &seen[0];
        assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
        assert_eq!(body["voice"], "alloy");
        assert_eq!(body["input_audio_transcription"]["model"], "whisper-1");
    }

    #[test_timeout::tokio_timeout_test]
    async fn missing_client_secret_is_a_failure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = spawn_stub(json!({"error": {"message": "nope"}}), seen).await;
        let issuer = RealtimeSessionIssuer::new(settings(url, Some("sk-test")));

        let err = issuer.issue().await.unwrap_err();
        assert!(matches!(err, CredentialError::MissingClientSecret));
        assert!(!err.to_string().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn missing_api_key_fails_without_calling_out() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = spawn_stub(json!({}), seen.clone()).await;
        let issuer = RealtimeSessionIssuer::new(settings(url, None));

        assert!(matches!(
            issuer.issue().await,
            Err(CredentialError::MissingApiKey)
        ));
        assert!(seen.lock().await.is_empty());
    }
}
