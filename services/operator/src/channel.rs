//! The operator's live websocket to the backend.
//!
//! One background task owns the socket. It connects, announces the operator
//! with a `get_machines` frame, forwards every inbound JSON object to the
//! single [`ChannelEvents`] consumer in arrival order, and reconnects after a
//! fixed delay whenever the connection ends, until [`SessionChannel::close`].

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use sticktator_core::command::Command;
use sticktator_core::error::Error;
use sticktator_core::identity::OperatorIdentity;
use sticktator_core::protocol::{OutboundFrame, parse_object};
use sticktator_core::services::CommandSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, instrument, warn};

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Connecting,
    Open,
    /// The connection ended; a reconnect is scheduled.
    Disconnected,
    /// `close()` was called. Terminal.
    Closed,
}

/// What the channel reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A connection was established. `get_machines` is written right after.
    Opened,
    /// An inbound frame that parsed as a JSON object.
    Frame(Value),
    /// The connection closed and a reconnect is pending.
    Lost,
    /// Connecting or reading failed with a transport error.
    Failed(String),
}

/// The single subscription to a channel's events.
pub struct ChannelEvents {
    rx: mpsc::Receiver<ChannelEvent>,
}

impl ChannelEvents {
    /// Next event, or `None` once the channel task has stopped.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }
}

/// Cloneable write half of a session channel.
///
/// Every clone feeds the same queue, drained in order by the channel task,
/// so the socket keeps a single writer.
#[derive(Clone)]
pub struct ChannelSender {
    outbound: mpsc::Sender<String>,
    state: Arc<watch::Sender<ChannelState>>,
}

impl ChannelSender {
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Writes a frame if the channel is open. Never errors; returns whether
    /// the frame was handed to the socket.
    pub fn send(&self, frame: &OutboundFrame) -> bool {
        let state = self.state();
        if state != ChannelState::Open {
            warn!(%state, "Channel not open, dropping outbound frame");
            return false;
        }
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Could not serialize outbound frame");
                return false;
            }
        };
        match self.outbound.try_send(text) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Outbound queue rejected frame");
                false
            }
        }
    }
}

/// Submits commands as `execute` frames on the session channel.
#[derive(Clone)]
pub struct ChannelCommandSink {
    sender: ChannelSender,
}

impl ChannelCommandSink {
    pub fn new(sender: ChannelSender) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl CommandSink for ChannelCommandSink {
    async fn submit(&self, _operator: &OperatorIdentity, command: &Command) -> Result<(), Error> {
        if self.sender.send(&command.execute_frame()) {
            Ok(())
        } else {
            Err(Error::Dispatch(format!(
                "session channel is {}",
                self.sender.state()
            )))
        }
    }
}

/// Handle to a running session channel.
pub struct SessionChannel {
    sender: ChannelSender,
    state: Arc<watch::Sender<ChannelState>>,
    shutdown: watch::Sender<bool>,
}

impl SessionChannel {
    /// Starts connecting to `url` in the background.
    ///
    /// Connection failures never surface here; they show up as
    /// [`ChannelState::Disconnected`] and [`ChannelEvent::Failed`].
    pub fn open(
        url: String,
        operator: &OperatorIdentity,
        reconnect_delay: Duration,
    ) -> (Self, ChannelEvents) {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(watch::Sender::new(ChannelState::Connecting));
        let hello = OutboundFrame::GetMachines {
            email: operator.display_email.clone(),
        };

        tokio::spawn(run_channel(
            url,
            hello,
            reconnect_delay,
            state.clone(),
            events_tx,
            outbound_rx,
            shutdown_rx,
        ));

        (
            Self {
                sender: ChannelSender {
                    outbound: outbound_tx,
                    state: state.clone(),
                },
                state,
                shutdown: shutdown_tx,
            },
            ChannelEvents { rx: events_rx },
        )
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Best-effort write; see [`ChannelSender::send`].
    pub fn send(&self, frame: &OutboundFrame) -> bool {
        self.sender.send(frame)
    }

    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Stops the channel and cancels any pending reconnect. Idempotent.
    pub fn close(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ChannelState::Closed {
                return false;
            }
            *state = ChannelState::Closed;
            true
        });
        if changed {
            self.shutdown.send_replace(true);
            info!("Session channel closed");
        }
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Disconnected => "disconnected",
            ChannelState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Moves to `next` unless the channel has been closed.
fn publish(state: &watch::Sender<ChannelState>, next: ChannelState) {
    state.send_if_modified(|current| {
        if *current == ChannelState::Closed || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

#[instrument(name = "session_channel", skip_all, fields(url = %url))]
async fn run_channel(
    url: String,
    hello: OutboundFrame,
    reconnect_delay: Duration,
    state: Arc<watch::Sender<ChannelState>>,
    events: mpsc::Sender<ChannelEvent>,
    mut outbound: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    'outer: loop {
        if *shutdown.borrow() {
            break;
        }
        publish(&state, ChannelState::Connecting);

        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown.changed() => break 'outer,
        };

        let lost = match connected {
            Ok((ws_stream, _)) => {
                let (mut socket_tx, mut socket_rx) = ws_stream.split();
                publish(&state, ChannelState::Open);
                info!("Session channel open");
                if events.send(ChannelEvent::Opened).await.is_err() {
                    break 'outer;
                }

                let hello_sent = match serde_json::to_string(&hello) {
                    Ok(text) => socket_tx.send(Message::Text(text.into())).await,
                    Err(e) => {
                        warn!(error = %e, "Could not serialize get_machines frame");
                        Ok(())
                    }
                };

                match hello_sent {
                    Err(e) => ChannelEvent::Failed(e.to_string()),
                    Ok(()) => loop {
                        tokio::select! {
                            biased;
                            _ = shutdown.changed() => {
                                let _ = socket_tx.send(Message::Close(None)).await;
                                break 'outer;
                            }
                            Some(text) = outbound.recv() => {
                                if let Err(e) = socket_tx.send(Message::Text(text.into())).await {
                                    break ChannelEvent::Failed(e.to_string());
                                }
                            }
                            msg = socket_rx.next() => match msg {
                                Some(Ok(Message::Text(text))) => match parse_object(&text) {
                                    Ok(frame) => {
                                        if events.send(ChannelEvent::Frame(frame)).await.is_err() {
                                            break 'outer;
                                        }
                                    }
                                    Err(e) => warn!(error = %e, "Dropping inbound frame"),
                                },
                                Some(Ok(Message::Close(frame))) => {
                                    debug!(?frame, "Server closed the channel");
                                    break ChannelEvent::Lost;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => break ChannelEvent::Failed(e.to_string()),
                                None => break ChannelEvent::Lost,
                            },
                        }
                    },
                }
            }
            Err(e) => ChannelEvent::Failed(e.to_string()),
        };

        publish(&state, ChannelState::Disconnected);
        match &lost {
            ChannelEvent::Failed(error) => warn!(%error, delay = ?reconnect_delay, "Channel error, reconnecting"),
            _ => info!(delay = ?reconnect_delay, "Channel lost, reconnecting"),
        }
        if events.send(lost).await.is_err() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    state.send_replace(ChannelState::Closed);
    debug!("Session channel task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn operator() -> OperatorIdentity {
        OperatorIdentity::from_email("ada@example.com").unwrap()
    }

    async fn next_event(events: &mut ChannelEvents) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for channel event")
            .expect("channel task stopped")
    }

    #[tokio::test]
    async fn test_announces_forwards_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut hellos = Vec::new();
            for round in 0..2 {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(stream).await.unwrap();
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    hellos.push(serde_json::from_str::<Value>(&text).unwrap());
                }
                let snapshot = json!({
                    "type": "machines_list",
                    "data": [{"name": format!("pi-{round}"), "status": "connected"}]
                });
                ws.send(Message::Text(snapshot.to_string().into())).await.unwrap();
                ws.send(Message::Text("not json".into())).await.unwrap();
                ws.send(Message::Text("[1, 2]".into())).await.unwrap();
                ws.send(Message::Text(r#"{"type":"command_output","command":"ls","output":"a"}"#.into()))
                    .await
                    .unwrap();
                if round == 0 {
                    ws.close(None).await.unwrap();
                } else {
                    // Hold the connection open until the client closes it.
                    while let Some(Ok(msg)) = ws.next().await {
                        if msg.is_close() {
                            break;
                        }
                    }
                }
            }
            hellos
        });

        let (channel, mut events) = SessionChannel::open(
            format!("ws://{addr}/ws/v1/frontend/ada"),
            &operator(),
            Duration::from_millis(50),
        );

        for round in 0..2 {
            assert_eq!(next_event(&mut events).await, ChannelEvent::Opened);
            match next_event(&mut events).await {
                ChannelEvent::Frame(frame) => {
                    assert_eq!(frame["type"], "machines_list");
                    assert_eq!(frame["data"][0]["name"], format!("pi-{round}"));
                }
                other => panic!("expected snapshot, got {other:?}"),
            }
            match next_event(&mut events).await {
                ChannelEvent::Frame(frame) => assert_eq!(frame["type"], "command_output"),
                other => panic!("expected command output, got {other:?}"),
            }
            if round == 0 {
                assert_eq!(next_event(&mut events).await, ChannelEvent::Lost);
            }
        }
        assert_eq!(channel.state(), ChannelState::Open);

        channel.close();
        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);

        let hellos = server.await.unwrap();
        assert_eq!(hellos.len(), 2);
        for hello in hellos {
            assert_eq!(hello, json!({"type": "get_machines", "email": "ada@example.com"}));
        }
    }

    #[tokio::test]
    async fn test_send_is_refused_when_not_open() {
        // Nothing listens on this port; the channel keeps failing.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (channel, mut events) = SessionChannel::open(
            format!("ws://{addr}/"),
            &operator(),
            Duration::from_secs(60),
        );
        assert!(matches!(next_event(&mut events).await, ChannelEvent::Failed(_)));
        assert_eq!(channel.state(), ChannelState::Disconnected);

        let frame = OutboundFrame::GetMachines {
            email: "ada@example.com".into(),
        };
        assert!(!channel.send(&frame));

        let sink = ChannelCommandSink::new(channel.sender());
        let command = Command::from_translation("uptime", "lab-pi", json!({})).unwrap();
        assert_eq!(
            sink.submit(&operator(), &command).await,
            Err(Error::Dispatch("session channel is disconnected".into()))
        );

        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(!channel.send(&frame));
        assert!(
            tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_reconnects_after_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            // Hang up before the websocket handshake completes.
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let hello = match ws.next().await {
                Some(Ok(Message::Text(text))) => serde_json::from_str::<Value>(&text).unwrap(),
                other => panic!("expected hello, got {other:?}"),
            };
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
            hello
        });

        let (channel, mut events) = SessionChannel::open(
            format!("ws://{addr}/ws/v1/frontend/ada"),
            &operator(),
            Duration::from_millis(50),
        );
        let mut states = channel.subscribe_state();

        assert!(matches!(next_event(&mut events).await, ChannelEvent::Failed(_)));
        assert_eq!(next_event(&mut events).await, ChannelEvent::Opened);
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|state| *state == ChannelState::Open),
        )
        .await
        .expect("timed out waiting for reopen")
        .unwrap();

        channel.close();
        let hello = server.await.unwrap();
        assert_eq!(hello, json!({"type": "get_machines", "email": "ada@example.com"}));
    }

    #[tokio::test]
    async fn test_send_reaches_server_while_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut received = Vec::new();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                received.push(serde_json::from_str::<Value>(&text).unwrap());
                if received.len() == 2 {
                    break;
                }
            }
            received
        });

        let (channel, mut events) = SessionChannel::open(
            format!("ws://{addr}/"),
            &operator(),
            Duration::from_secs(60),
        );
        assert_eq!(next_event(&mut events).await, ChannelEvent::Opened);

        let sink = ChannelCommandSink::new(channel.sender());
        let command = Command::from_translation("uptime", "lab-pi", json!({"cmd": "uptime"})).unwrap();
        sink.submit(&operator(), &command).await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received[0]["type"], "get_machines");
        assert_eq!(received[1], json!({"type": "execute", "cmd": "uptime"}));
        channel.close();
    }
}
