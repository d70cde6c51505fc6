use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::credentials::IssuerSettings;
use crate::peer::IceSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_port", deserialize_with = "port_or_default")]
    pub port: u16,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_sessions_url")]
    pub realtime_sessions_url: String,
    #[serde(default = "default_model")]
    pub realtime_model: String,
    #[serde(default = "default_voice")]
    pub realtime_voice: String,
    #[serde(default = "default_instructions")]
    pub realtime_instructions: String,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(
        default = "default_auth_timeout_secs",
        deserialize_with = "auth_timeout_or_default"
    )]
    pub auth_timeout_secs: u64,
    #[serde(default = "default_stun_url")]
    pub stun_url: String,
    #[serde(
        default = "default_candidate_pool_size",
        deserialize_with = "pool_size_or_default"
    )]
    pub ice_candidate_pool_size: u8,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            port: default_port(),
            openai_api_key: None,
            realtime_sessions_url: default_sessions_url(),
            realtime_model: default_model(),
            realtime_voice: default_voice(),
            realtime_instructions: default_instructions(),
            transcription_model: default_transcription_model(),
            auth_timeout_secs: default_auth_timeout_secs(),
            stun_url: default_stun_url(),
            ice_candidate_pool_size: default_candidate_pool_size(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_environment(config::Environment::default().separator("__"))
    }

    /// Loads from the given environment source, falling back to defaults when
    /// it cannot be deserialized.
    pub fn from_environment(env: config::Environment) -> Self {
        config::Config::builder()
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize())
            .map(AppConfig::normalize)
            .unwrap_or_else(|err| {
                warn!(error = %err, "invalid configuration; using defaults");
                AppConfig::default()
            })
    }

    fn normalize(mut self) -> Self {
        self.openai_api_key = self.openai_api_key.take().and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        });
        if self.ice_candidate_pool_size == 0 {
            self.ice_candidate_pool_size = default_candidate_pool_size();
        }
        if self.auth_timeout_secs == 0 {
            self.auth_timeout_secs = default_auth_timeout_secs();
        }
        self
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn ice_settings(&self) -> IceSettings {
        IceSettings {
            stun_urls: vec![self.stun_url.clone()],
            candidate_pool_size: self.ice_candidate_pool_size,
        }
    }

    pub fn issuer_settings(&self) -> IssuerSettings {
        IssuerSettings {
            sessions_url: self.realtime_sessions_url.clone(),
            api_key: self.openai_api_key.clone(),
            model: self.realtime_model.clone(),
            voice: self.realtime_voice.clone(),
            instructions: self.realtime_instructions.clone(),
            transcription_model: self.transcription_model.clone(),
        }
    }
}

/// Parses a numeric setting, keeping the default for a blank or unparsable
/// value so one bad variable does not discard the rest of the environment.
fn scalar_or_default<'de, D, T>(
    deserializer: D,
    key: &'static str,
    fallback: fn() -> T,
) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Display,
    T::Err: Display,
{
    let raw = String::deserialize(deserializer)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(fallback());
    }
    Ok(trimmed.parse().unwrap_or_else(|err| {
        let fallback = fallback();
        warn!(key, value = %trimmed, error = %err, default = %fallback, "ignoring invalid setting");
        fallback
    }))
}

fn port_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    scalar_or_default(deserializer, "PORT", default_port)
}

fn auth_timeout_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    scalar_or_default(deserializer, "AUTH_TIMEOUT_SECS", default_auth_timeout_secs)
}

fn pool_size_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    scalar_or_default(deserializer, "ICE_CANDIDATE_POOL_SIZE", default_candidate_pool_size)
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_sessions_url() -> String {
    "https://api.openai.com/v1/realtime/sessions".to_string()
}

fn default_model() -> String {
    "gpt-4o-realtime-preview-2024-12-17".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_instructions() -> String {
    "You are a helpful assistant".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_auth_timeout_secs() -> u64 {
    15
}

fn default_stun_url() -> String {
    "stun:stun.l.google.com:19302".to_string()
}

fn default_candidate_pool_size() -> u8 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> config::Environment {
        let source: config::Map<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::default().source(Some(source))
    }

    #[test_timeout::timeout]
    fn empty_environment_uses_defaults() {
        let cfg = AppConfig::from_environment(env(&[]));
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8080");
        assert_eq!(cfg.auth_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.openai_api_key, None);
        assert_eq!(
            cfg.ice_settings(),
            IceSettings {
                stun_urls: vec!["stun:stun.l.google.com:19302".into()],
                candidate_pool_size: 10,
            }
        );
    }

    #[test_timeout::timeout]
    fn environment_overrides_and_blank_key_normalization() {
        let cfg = AppConfig::from_environment(env(&[
            ("PORT", "9000"),
            ("AUTH_TIMEOUT_SECS", "3"),
            ("OPENAI_API_KEY", "   "),
            ("REALTIME_VOICE", "verse"),
            ("ICE_CANDIDATE_POOL_SIZE", "0"),
        ]));
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.auth_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.openai_api_key, None);
        assert_eq!(cfg.issuer_settings().voice, "verse");
        assert_eq!(cfg.ice_settings().candidate_pool_size, 10);
    }

    #[test_timeout::timeout]
    fn bad_scalar_settings_keep_the_api_key() {
        let cfg = AppConfig::from_environment(env(&[
            ("OPENAI_API_KEY", "sk-live"),
            ("PORT", ""),
            ("AUTH_TIMEOUT_SECS", "soon"),
            ("ICE_CANDIDATE_POOL_SIZE", "999"),
            ("REALTIME_MODEL", "gpt-realtime"),
        ]));
        assert_eq!(cfg.openai_api_key.as_deref(), Some("sk-live"));
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.auth_timeout_secs, 15);
        assert_eq!(cfg.ice_candidate_pool_size, 10);
        assert_eq!(cfg.realtime_model, "gpt-realtime");
    }

    #[test_timeout::timeout]
    fn api_key_flows_into_issuer_settings() {
        let cfg = AppConfig::from_environment(env(&[("OPENAI_API_KEY", " sk-live ")]));
        let issuer = cfg.issuer_settings();
        assert_eq!(issuer.api_key.as_deref(), Some("sk-live"));
        assert_eq!(issuer.model, "gpt-4o-realtime-preview-2024-12-17");
        assert_eq!(issuer.transcription_model, "whisper-1");
    }
}
