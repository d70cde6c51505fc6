use std::borrow::Cow;
use std::ops::ControlFlow;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelHandle, ConnectionId, Outbound};
use crate::dispatcher::dispatch;
use crate::peer_state::PeerState;
use crate::protocol::{self, ClientMessage};
use crate::state::RelayState;

/// WebSocket upgrade handler for the control channel.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drives one control channel until the client disconnects or the
/// authentication deadline closes it.
pub async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (channel, rx) = ChannelHandle::open();
    let connection_id = channel.id();
    let (sender, mut receiver) = socket.split();

    tokio::spawn(forward_outbound(sender, rx, connection_id));

    let peer = state.registry.register(channel.clone()).await;
    info!(%connection_id, "control channel opened");

    loop {
        let frame = tokio::select! {
            _ = peer.closed() => {
                debug!(%connection_id, "control channel closed by server");
                break;
            }
            frame = receiver.next() => frame,
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(err)) => {
                error!(%connection_id, error = %err, "websocket error");
                break;
            }
            None => break,
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    debug!(%connection_id, "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => {
                debug!(%connection_id, "received close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let message = match protocol::decode(&text) {
            Ok(message) => message,
            Err(err) => {
                warn!(%connection_id, error = %err, "dropping malformed control message");
                continue;
            }
        };
        debug!(%connection_id, kind = message.kind(), "control message received");

        if handle_message(&state, &peer, &channel, message).await.is_break() {
            break;
        }
    }

    // The writer keeps the sink half and flushes any queued close frame, then
    // exits once the last channel handle is dropped.
    state.registry.unregister(connection_id).await;
    info!(%connection_id, "control channel closed");
}

/// Authenticates and dispatches one decoded message. A frame that raced the
/// deadline close is dropped and the loop stops.
async fn handle_message(
    state: &RelayState,
    peer: &PeerState,
    channel: &ChannelHandle,
    message: ClientMessage,
) -> ControlFlow<()> {
    if !matches!(message, ClientMessage::Unrecognized) {
        peer.mark_authenticated();
    }
    if peer.is_closed() {
        debug!(connection_id = %channel.id(), kind = message.kind(), "dropping message after close");
        return ControlFlow::Break(());
    }
    dispatch(state, channel, message).await;
    ControlFlow::Continue(())
}

async fn forward_outbound<S>(
    mut sender: S,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    connection_id: ConnectionId,
) where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(outbound) = rx.recv().await {
        let frame = match outbound {
            Outbound::Message(message) => match protocol::encode(&message) {
                Ok(json) => Message::Text(json),
                Err(err) => {
                    error!(%connection_id, error = %err, "failed to encode reply");
                    continue;
                }
            },
            Outbound::Close { code, reason } => {
                let close = Message::Close(Some(CloseFrame {
                    code,
                    reason: Cow::Owned(reason),
                }));
                if let Err(err) = sender.send(close).await {
                    debug!(%connection_id, error = %err, "failed to send close frame");
                }
                break;
            }
        };
        if let Err(err) = sender.send(frame).await {
            debug!(%connection_id, error = %err, "websocket send failed");
            break;
        }
    }
    debug!(%connection_id, "message sender task ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{AUTH_TIMEOUT_REASON, POLICY_VIOLATION};
    use crate::protocol::ServerMessage;
    use crate::peer::IceSettings;
    use crate::registry::ConnectionRegistry;
    use crate::testing::{MockConnector, StaticIssuer};
    use std::sync::Arc;
    use std::time::Duration;

    fn relay(auth_timeout: Duration) -> RelayState {
        RelayState::new(
            ConnectionRegistry::new(auth_timeout),
            Arc::new(StaticIssuer::issuing("abc", 1)),
            Arc::new(MockConnector::new("v=0 answer")),
            IceSettings {
                stun_urls: vec!["stun:stun.example.org:3478".into()],
                candidate_pool_size: 10,
            },
        )
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn message_after_deadline_close_is_not_dispatched() {
        let state = relay(Duration::from_secs(1));
        let (channel, mut rx) = ChannelHandle::open();
        let peer = state.registry.register(channel.clone()).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let flow = handle_message(&state, &peer, &channel, ClientMessage::RequestEphemeralKey).await;

        assert!(flow.is_break());
        assert_eq!(
            rx.recv().await.unwrap(),
            Outbound::Close {
                code: POLICY_VIOLATION,
                reason: AUTH_TIMEOUT_REASON.into()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn message_before_deadline_is_dispatched() {
        let state = relay(Duration::from_secs(1));
        let (channel, mut rx) = ChannelHandle::open();
        let peer = state.registry.register(channel.clone()).await;

        let flow = handle_message(&state, &peer, &channel, ClientMessage::RequestEphemeralKey).await;

        assert!(flow.is_continue());
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Message(ServerMessage::EphemeralKey { .. }))
        ));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!peer.is_closed());
    }
}
