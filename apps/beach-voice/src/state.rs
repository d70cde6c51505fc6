use std::sync::Arc;

use crate::config::AppConfig;
use crate::credentials::{CredentialIssuer, RealtimeSessionIssuer};
use crate::peer::{IceSettings, PeerConnector, WebRtcConnector};
use crate::registry::ConnectionRegistry;

/// Shared server state handed to every route and control channel.
#[derive(Clone)]
pub struct RelayState {
    pub registry: ConnectionRegistry,
    pub issuer: Arc<dyn CredentialIssuer>,
    pub connector: Arc<dyn PeerConnector>,
    pub ice: IceSettings,
}

impl RelayState {
    pub fn new(
        registry: ConnectionRegistry,
        issuer: Arc<dyn CredentialIssuer>,
        connector: Arc<dyn PeerConnector>,
        ice: IceSettings,
    ) -> Self {
        Self {
            registry,
            issuer,
            connector,
            ice,
        }
    }

    /// Wires the production collaborators from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            ConnectionRegistry::new(config.auth_timeout()),
            Arc::new(RealtimeSessionIssuer::new(config.issuer_settings())),
            Arc::new(WebRtcConnector),
            config.ice_settings(),
        )
    }
}
