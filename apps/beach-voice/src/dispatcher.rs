use tracing::{debug, info, warn};

use crate::channel::ChannelHandle;
use crate::peer_state::CandidateOutcome;
use crate::protocol::{ClientMessage, RemoteCandidate, ServerMessage, OFFER_FAILED_MESSAGE};
use crate::state::RelayState;

/// Handles one decoded control message. Failures are turned into replies or
/// log lines; nothing propagates to the socket loop.
pub async fn dispatch(state: &RelayState, channel: &ChannelHandle, message: ClientMessage) {
    match message {
        ClientMessage::RequestEphemeralKey => handle_key_request(state, channel).await,
        ClientMessage::Offer { sdp } => handle_offer(state, channel, &sdp).await,
        ClientMessage::IceCandidate(candidate) => {
            handle_ice_candidate(state, channel, candidate).await
        }
        ClientMessage::Unrecognized => {
            warn!(connection_id = %channel.id(), "ignoring unrecognized message type");
        }
    }
}

async fn handle_key_request(state: &RelayState, channel: &ChannelHandle) {
    match state.issuer.issue().await {
        Ok(key) => {
            channel.send(ServerMessage::EphemeralKey {
                key: key.key,
                expires_at: key.expires_at,
            });
        }
        Err(err) => {
            warn!(connection_id = %channel.id(), error = %err, "ephemeral key request failed");
            channel.send(ServerMessage::error(err.to_string()));
        }
    }
}

async fn handle_offer(state: &RelayState, channel: &ChannelHandle, sdp: &str) {
    let Some(peer) = state.registry.lookup(channel.id()).await else {
        warn!(connection_id = %channel.id(), "offer for unregistered channel");
        channel.send(ServerMessage::error(OFFER_FAILED_MESSAGE));
        return;
    };

    match peer.negotiate(state.connector.as_ref(), &state.ice, sdp).await {
        Ok(answer) => {
            info!(connection_id = %channel.id(), "negotiated answer");
            channel.send(ServerMessage::Answer { sdp: answer });
        }
        Err(err) => {
            warn!(connection_id = %channel.id(), error = %err, "failed to handle offer");
            channel.send(ServerMessage::error(OFFER_FAILED_MESSAGE));
        }
    }
}

async fn handle_ice_candidate(
    state: &RelayState,
    channel: &ChannelHandle,
    candidate: RemoteCandidate,
) {
    let Some(peer) = state.registry.lookup(channel.id()).await else {
        debug!(connection_id = %channel.id(), "candidate for unregistered channel dropped");
        return;
    };

    match peer.add_remote_candidate(candidate).await {
        Ok(CandidateOutcome::Added) => {}
        Ok(CandidateOutcome::Dropped) => {
            debug!(
                connection_id = %channel.id(),
                "dropping candidate received before remote description"
            );
        }
        Err(err) => {
            warn!(connection_id = %channel.id(), error = %err, "failed to add ice candidate");
        }
    }
}
