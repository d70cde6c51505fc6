//! Per-connection state: authentication deadline and the negotiation that owns
//! the server-side peer connection.
//!
//! ```text
//! AwaitingAuth ──first recognized message──▶ Authenticated ──offer──▶ Negotiating
//!      │                                          ▲                      │
//!      │ deadline                                 └──── failure ─────────┤
//!      ▼                                                                 ▼ answer
//!  AuthFailed ──▶ Closed   (Closed is reachable from every phase)    Negotiated
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ChannelHandle, ConnectionId, AUTH_TIMEOUT_REASON, POLICY_VIOLATION};
use crate::peer::{IceSettings, PeerConnector, PeerError, PeerLink};
use crate::protocol::{RemoteCandidate, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingAuth,
    Authenticated,
    Negotiating,
    Negotiated,
    AuthFailed,
    Closed,
}

impl Phase {
    fn can_negotiate(self) -> bool {
        matches!(self, Phase::Authenticated | Phase::Negotiated)
    }
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("connection cannot negotiate while {0:?}")]
    NotReady(Phase),
    #[error(transparent)]
    Peer(#[from] PeerError),
}

/// Outcome of forwarding a remote candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Added,
    /// No peer connection, or its remote description is not set yet.
    Dropped,
}

struct Negotiation {
    link: Arc<dyn PeerLink>,
    forwarder: JoinHandle<()>,
    remote_description_set: bool,
}

impl Negotiation {
    async fn teardown(self) {
        self.forwarder.abort();
        if let Err(err) = self.link.close().await {
            debug!(error = %err, "peer connection close reported an error");
        }
    }
}

pub struct PeerState {
    channel: ChannelHandle,
    phase: Mutex<Phase>,
    auth_deadline: CancellationToken,
    closed: CancellationToken,
    negotiation: AsyncMutex<Option<Negotiation>>,
}

impl PeerState {
    /// Creates the state in `AwaitingAuth` and arms the authentication deadline.
    pub fn new(channel: ChannelHandle, auth_timeout: Duration) -> Arc<Self> {
        let state = Arc::new(Self {
            channel,
            phase: Mutex::new(Phase::AwaitingAuth),
            auth_deadline: CancellationToken::new(),
            closed: CancellationToken::new(),
            negotiation: AsyncMutex::new(None),
        });
        arm_auth_deadline(Arc::downgrade(&state), state.auth_deadline.clone(), auth_timeout);
        state
    }

    pub fn id(&self) -> ConnectionId {
        self.channel.id()
    }

    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub fn auth_ready(&self) -> bool {
        matches!(
            self.phase(),
            Phase::Authenticated | Phase::Negotiating | Phase::Negotiated
        )
    }

    pub fn auth_failed(&self) -> bool {
        self.phase() == Phase::AuthFailed
    }

    /// Resolves once the channel must stop reading: deadline expiry or teardown.
    pub fn closed(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Counts a recognized control message as proof of liveness. Returns true
    /// on the transition out of `AwaitingAuth`.
    pub fn mark_authenticated(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase != Phase::AwaitingAuth {
            return false;
        }
        *phase = Phase::Authenticated;
        self.auth_deadline.cancel();
        debug!(connection_id = %self.id(), "connection authenticated");
        true
    }

    fn expire_auth(&self) {
        {
            let mut phase = self.phase.lock();
            if *phase != Phase::AwaitingAuth {
                return;
            }
            *phase = Phase::AuthFailed;
        }
        warn!(connection_id = %self.id(), "authentication deadline exceeded; closing channel");
        self.channel.close(POLICY_VIOLATION, AUTH_TIMEOUT_REASON);
        self.closed.cancel();
    }

    /// Answers a remote offer, replacing any earlier negotiation on this
    /// connection. On failure the partial peer connection is torn down and the
    /// state returns to `Authenticated`.
    pub async fn negotiate(
        &self,
        connector: &dyn PeerConnector,
        ice: &IceSettings,
        offer_sdp: &str,
    ) -> Result<String, NegotiationError> {
        let mut slot = self.negotiation.lock().await;
        self.transition_to_negotiating()?;

        if let Some(previous) = slot.take() {
            info!(connection_id = %self.id(), "replacing existing negotiation");
            previous.teardown().await;
        }

        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();
        let link = match connector.open(ice, candidate_tx).await {
            Ok(link) => link,
            Err(err) => {
                self.settle(Phase::Authenticated);
                return Err(err.into());
            }
        };
        *slot = Some(Negotiation {
            link: link.clone(),
            forwarder: spawn_candidate_forwarder(self.channel.clone(), candidate_rx),
            remote_description_set: false,
        });

        match answer_offer(link.as_ref(), offer_sdp, slot.as_mut()).await {
            Ok(answer) => {
                self.settle(Phase::Negotiated);
                Ok(answer)
            }
            Err(err) => {
                if let Some(failed) = slot.take() {
                    failed.teardown().await;
                }
                self.settle(Phase::Authenticated);
                Err(err.into())
            }
        }
    }

    /// Forwards a remote candidate once the remote description is in place.
    pub async fn add_remote_candidate(
        &self,
        candidate: RemoteCandidate,
    ) -> Result<CandidateOutcome, PeerError> {
        let slot = self.negotiation.lock().await;
        match slot.as_ref() {
            Some(negotiation) if negotiation.remote_description_set => {
                negotiation.link.add_ice_candidate(candidate).await?;
                Ok(CandidateOutcome::Added)
            }
            _ => Ok(CandidateOutcome::Dropped),
        }
    }

    /// Releases everything the connection owns. Safe to call more than once.
    pub async fn shutdown(&self) {
        *self.phase.lock() = Phase::Closed;
        self.auth_deadline.cancel();
        self.closed.cancel();
        if let Some(negotiation) = self.negotiation.lock().await.take() {
            negotiation.teardown().await;
        }
    }

    fn transition_to_negotiating(&self) -> Result<(), NegotiationError> {
        let mut phase = self.phase.lock();
        if !phase.can_negotiate() {
            return Err(NegotiationError::NotReady(*phase));
        }
        *phase = Phase::Negotiating;
        Ok(())
    }

    fn settle(&self, next: Phase) {
        let mut phase = self.phase.lock();
        if *phase == Phase::Negotiating {
            *phase = next;
        }
    }
}

impl Drop for PeerState {
    fn drop(&mut self) {
        self.auth_deadline.cancel();
        self.closed.cancel();
        if let Some(negotiation) = self.negotiation.get_mut().take() {
            negotiation.forwarder.abort();
        }
    }
}

async fn answer_offer(
    link: &dyn PeerLink,
    offer_sdp: &str,
    negotiation: Option<&mut Negotiation>,
) -> Result<String, PeerError> {
    link.set_remote_description(offer_sdp).await?;
    if let Some(negotiation) = negotiation {
        negotiation.remote_description_set = true;
    }
    let answer = link.create_answer().await?;
    link.set_local_description(&answer).await?;
    Ok(answer)
}

fn arm_auth_deadline(state: Weak<PeerState>, token: CancellationToken, timeout: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                if let Some(state) = state.upgrade() {
                    state.expire_auth();
                }
            }
        }
    });
}

fn spawn_candidate_forwarder(
    channel: ChannelHandle,
    mut candidates: mpsc::UnboundedReceiver<crate::protocol::LocalCandidate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(candidate) = candidates.recv().await {
            if !channel.send(ServerMessage::IceCandidate { candidate }) {
                break;
            }
        }
    })
}
