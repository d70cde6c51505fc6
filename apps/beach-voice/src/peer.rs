use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::Error as WebRtcError;

use crate::protocol::{LocalCandidate, RemoteCandidate};

pub type CandidateSink = mpsc::UnboundedSender<LocalCandidate>;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("webrtc error: {0}")]
    WebRtc(#[from] WebRtcError),
    #[error("peer connection produced an empty answer")]
    EmptyAnswer,
    #[error("peer connection rejected request: {0}")]
    Rejected(String),
}

/// ICE configuration applied to every server-side peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceSettings {
    pub stun_urls: Vec<String>,
    pub candidate_pool_size: u8,
}

/// Builds one peer connection per negotiation. Locally discovered candidates
/// are pushed into `candidates` in discovery order.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn open(
        &self,
        ice: &IceSettings,
        candidates: CandidateSink,
    ) -> Result<Arc<dyn PeerLink>, PeerError>;
}

#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn set_remote_description(&self, offer_sdp: &str) -> Result<(), PeerError>;
    async fn create_answer(&self) -> Result<String, PeerError>;
    async fn set_local_description(&self, answer_sdp: &str) -> Result<(), PeerError>;
    async fn add_ice_candidate(&self, candidate: RemoteCandidate) -> Result<(), PeerError>;
    async fn close(&self) -> Result<(), PeerError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcConnector;

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn open(
        &self,
        ice: &IceSettings,
        candidates: CandidateSink,
    ) -> Result<Arc<dyn PeerLink>, PeerError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: ice.stun_urls.clone(),
                ..Default::default()
            }],
            ice_candidate_pool_size: ice.candidate_pool_size,
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await?);

        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = candidates.clone();
            Box::pin(async move {
                // None marks the end of gathering.
                let Some(candidate) = candidate else {
                    debug!("local ice gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = sink.send(LocalCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        });
                    }
                    Err(err) => warn!(error = %err, "failed to serialize local ice candidate"),
                }
            })
        }));

        Ok(Arc::new(WebRtcLink { pc }))
    }
}

struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn set_remote_description(&self, offer_sdp: &str) -> Result<(), PeerError> {
        let offer = RTCSessionDescription::offer(offer_sdp.to_string())?;
        self.pc.set_remote_description(offer).await?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<String, PeerError> {
        let answer = self.pc.create_answer(None).await?;
        if answer.sdp.is_empty() {
            return Err(PeerError::EmptyAnswer);
        }
        Ok(answer.sdp)
    }

    async fn set_local_description(&self, answer_sdp: &str) -> Result<(), PeerError> {
        let answer = RTCSessionDescription::answer(answer_sdp.to_string())?;
        self.pc.set_local_description(answer).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: RemoteCandidate) -> Result<(), PeerError> {
        let init = RTCIceCandidateInit {
            sdp_mid: Some(candidate.sdp_mid().to_string()),
            sdp_mline_index: Some(candidate.sdp_mline_index()),
            candidate: candidate.candidate,
            username_fragment: None,
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.pc.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> IceSettings {
        IceSettings {
            stun_urls: vec!["stun:stun.l.google.com:19302".into()],
            candidate_pool_size: 10,
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn garbage_offer_is_an_error_not_a_panic() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = WebRtcConnector.open(&settings(), tx).await.unwrap();
        assert!(link.set_remote_description("definitely not sdp").await.is_err());
        link.close().await.unwrap();
    }

    #[test_timeout::tokio_timeout_test]
    async fn candidate_before_remote_description_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = WebRtcConnector.open(&settings(), tx).await.unwrap();
        let result = link
            .add_ice_candidate(RemoteCandidate {
                candidate: "candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host".into(),
                sdp_mid: None,
                sdp_mline_index: None,
            })
            .await;
        assert!(result.is_err());
        link.close().await.unwrap();
    }
}
