//! Room stream connection manager.
//!
//! Owns the lifecycle of one streaming connection per room session: it opens
//! the stream, watches it, and transparently recovers from unplanned loss
//! with a bounded linear backoff. After every transition it publishes a fresh
//! [`WsState`] snapshot on a watch channel.
//!
//! The manager runs as a background actor; [`ConnectionManager`] is a cheap
//! clonable handle whose operations never fail synchronously — every outcome,
//! including send-while-disconnected, is reported through the state channel.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::connection::{ConnectionState, ManagerConfig, SessionParams, WsState};
use super::transport::{Transport, TransportEvent, TransportLink};
use crate::models::Message;

const NOT_CONNECTED_ERROR: &str = "Cannot send message: not connected";

enum Command {
    Connect(SessionParams),
    Disconnect,
    Send(String),
}

/// Handle to the connection manager actor.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<WsState>,
}

impl ConnectionManager {
    /// Spawn a manager actor. Must be called within a tokio runtime.
    pub fn new(config: ManagerConfig, transport: Arc<dyn Transport>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(WsState::default());
        tokio::spawn(run(config, transport, command_rx, state_tx));
        Self { commands, state }
    }

    /// Join a room: records the session parameters, resets the retry counter,
    /// and starts opening the stream. Any previously open stream is
    /// superseded and closed; the message buffer starts empty.
    pub fn connect(
        &self,
        room_id: impl Into<String>,
        username: impl Into<String>,
        user_id: Option<String>,
    ) {
        let params = SessionParams {
            room_id: room_id.into(),
            username: username.into(),
            user_id,
        };
        let _ = self.commands.send(Command::Connect(params));
    }

    /// Leave the current session: cancels any pending reconnect, closes the
    /// stream, and resets the state to its initial shape.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Send raw message content on the open stream.
    ///
    /// There is no send queue: while the stream is not open this is a no-op
    /// recorded as a non-fatal error in the state snapshot.
    pub fn send(&self, content: impl Into<String>) {
        let _ = self.commands.send(Command::Send(content.into()));
    }

    /// Subscribe to state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<WsState> {
        self.state.clone()
    }

    /// The current state snapshot.
    pub fn state(&self) -> WsState {
        self.state.borrow().clone()
    }
}

struct ActiveLink {
    link: TransportLink,
    open: bool,
}

enum Wake {
    Command(Option<Command>),
    Event(Option<TransportEvent>),
    Retry,
}

async fn run(
    config: ManagerConfig,
    transport: Arc<dyn Transport>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<WsState>,
) {
    let max_attempts = config.reconnect.max_attempts;
    let mut session: Option<SessionParams> = None;
    let mut attempt: u32 = 0;
    let mut active: Option<ActiveLink> = None;
    let mut retry_at: Option<Instant> = None;
    let mut state = WsState::default();

    loop {
        let wake = tokio::select! {
            cmd = commands.recv() => Wake::Command(cmd),
            event = next_event(&mut active) => Wake::Event(event),
            _ = sleep_until_retry(retry_at) => Wake::Retry,
        };

        match wake {
            // All handles dropped; closing the link (if any) closes the socket.
            Wake::Command(None) => break,

            Wake::Command(Some(Command::Connect(params))) => {
                retry_at = None;
                // Dropping the old link closes its socket; the new connection
                // supersedes it without waiting for that close to finish.
                active = None;
                attempt = 0;
                if !matches!(state.connection_state, ConnectionState::Reconnecting { .. }) {
                    state.connection_state = ConnectionState::Connecting;
                }
                state.connected = false;
                state.messages.clear();
                state.error = None;
                publish(&state_tx, &state);

                let url = params.join_url(&config.ws_base);
                tracing::info!(room = %params.room_id, "joining room");
                active = Some(ActiveLink {
                    link: transport.open(url),
                    open: false,
                });
                session = Some(params);
            }

            Wake::Command(Some(Command::Disconnect)) => {
                retry_at = None;
                session = None;
                active = None;
                // Pin the retry counter so a close already in flight cannot
                // schedule another attempt.
                attempt = max_attempts;
                state = WsState::default();
                publish(&state_tx, &state);
            }

            Wake::Command(Some(Command::Send(content))) => {
                match active.as_ref().filter(|a| a.open) {
                    Some(a) => {
                        // A failure here means the stream just died; the close
                        // event behind it drives recovery.
                        let _ = a.link.outbound.send(content);
                    }
                    None => {
                        tracing::warn!("dropping outbound message: not connected");
                        state.error = Some(NOT_CONNECTED_ERROR.to_string());
                        publish(&state_tx, &state);
                    }
                }
            }

            Wake::Event(event) => {
                // A vanished pump counts as an unclean close.
                let event = event.unwrap_or(TransportEvent::Closed { clean: false });
                match event {
                    TransportEvent::Opened => {
                        attempt = 0;
                        if let Some(a) = active.as_mut() {
                            a.open = true;
                        }
                        state.connection_state = ConnectionState::Connected;
                        state.connected = true;
                        state.error = None;
                        publish(&state_tx, &state);
                    }

                    TransportEvent::Frame(payload) => {
                        match serde_json::from_str::<Message>(&payload) {
                            Ok(message) => {
                                state.messages.push(message);
                                publish(&state_tx, &state);
                            }
                            // One bad frame must not interrupt the session:
                            // log it and move on, no state change.
                            Err(e) => tracing::warn!("dropping malformed frame: {e}"),
                        }
                    }

                    TransportEvent::Error(message) => {
                        tracing::warn!("transport error: {message}");
                        state.connected = false;
                        state.error = Some(message);
                        publish(&state_tx, &state);
                    }

                    TransportEvent::Closed { clean } => {
                        active = None;
                        state.connected = false;
                        state.connection_state = ConnectionState::Disconnected;
                        if !clean && session.is_some() && attempt < max_attempts {
                            attempt += 1;
                            state.connection_state = ConnectionState::Reconnecting { attempt };
                            let delay = config.reconnect.delay_for_attempt(attempt);
                            tracing::info!(
                                "connection lost, reconnecting ({attempt}/{max_attempts}) in {delay:?}"
                            );
                            retry_at = Some(Instant::now() + delay);
                        } else if !clean && session.is_some() {
                            tracing::warn!("giving up after {max_attempts} reconnect attempts");
                        }
                        publish(&state_tx, &state);
                    }
                }
            }

            Wake::Retry => {
                retry_at = None;
                if let Some(params) = session.clone() {
                    state.connection_state = ConnectionState::Connecting;
                    publish(&state_tx, &state);
                    let url = params.join_url(&config.ws_base);
                    tracing::info!(room = %params.room_id, attempt, "reopening room stream");
                    active = Some(ActiveLink {
                        link: transport.open(url),
                        open: false,
                    });
                }
            }
        }
    }
}

async fn next_event(active: &mut Option<ActiveLink>) -> Option<TransportEvent> {
    match active.as_mut() {
        Some(a) => a.link.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_retry(retry_at: Option<Instant>) {
    match retry_at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn publish(state_tx: &watch::Sender<WsState>, state: &WsState) {
    let _ = state_tx.send(state.clone());
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::{mpsc, watch};
    use tokio::time::Instant;
    use url::Url;

    use super::*;
    use crate::ws::connection::ManagerConfig;
    use crate::ws::transport::{Transport, TransportEvent, TransportLink};

    /// One accepted open attempt, driven by the test.
    struct FakeConn {
        url: String,
        outbound: mpsc::UnboundedReceiver<String>,
        events: mpsc::UnboundedSender<TransportEvent>,
    }

    impl FakeConn {
        fn emit(&self, event: TransportEvent) {
            self.events.send(event).expect("manager dropped the link");
        }

        fn open(&self) {
            self.emit(TransportEvent::Opened);
        }

        fn is_dropped(&self) -> bool {
            self.events.is_closed()
        }
    }

    struct FakeTransport {
        opens: mpsc::UnboundedSender<FakeConn>,
    }

    impl FakeTransport {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeConn>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { opens: tx }), rx)
        }
    }

    impl Transport for FakeTransport {
        fn open(&self, url: String) -> TransportLink {
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            self.opens
                .send(FakeConn {
                    url,
                    outbound: outbound_rx,
                    events: event_tx,
                })
                .expect("test dropped the opens receiver");
            TransportLink {
                outbound: outbound_tx,
                events: event_rx,
            }
        }
    }

    fn test_config() -> ManagerConfig {
        ManagerConfig::new(Url::parse("ws://chat.test").unwrap())
    }

    async fn wait_for(
        rx: &mut watch::Receiver<WsState>,
        pred: impl Fn(&WsState) -> bool,
    ) -> WsState {
        loop {
            {
                let state = rx.borrow_and_update();
                if pred(&state) {
                    return state.clone();
                }
            }
            rx.changed().await.expect("manager actor stopped");
        }
    }

    /// Let the actor drain everything currently queued.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn frame(content: &str, username: &str) -> String {
        format!(
            r#"{{"content":"{content}","room_id":"room1","username":"{username}","system":false}}"#
        )
    }

    #[tokio::test]
    async fn connect_reports_connected_and_delivers_messages() {
        let (transport, mut opens) = FakeTransport::new();
        let manager = ConnectionManager::new(test_config(), transport);
        let mut state_rx = manager.subscribe();

        manager.connect("room1", "alice", None);
        let conn = opens.recv().await.unwrap();
        assert_eq!(conn.url, "ws://chat.test/join-room/room1?username=alice");

        let connecting = wait_for(&mut state_rx, |s| {
            s.connection_state == ConnectionState::Connecting
        })
        .await;
        assert!(!connecting.connected);

        conn.open();
        let connected = wait_for(&mut state_rx, |s| s.connected).await;
        assert_eq!(connected.connection_state, ConnectionState::Connected);
        assert_eq!(connected.error, None);

        conn.emit(TransportEvent::Frame(frame("hi", "bob")));
        let state = wait_for(&mut state_rx, |s| !s.messages.is_empty()).await;
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, "hi");
        assert_eq!(state.messages[0].username, "bob");
    }

    #[tokio::test]
    async fn new_connect_supersedes_the_open_stream() {
        let (transport, mut opens) = FakeTransport::new();
        let manager = ConnectionManager::new(test_config(), transport);
        let mut state_rx = manager.subscribe();

        manager.connect("room1", "alice", None);
        let conn1 = opens.recv().await.unwrap();
        conn1.open();
        conn1.emit(TransportEvent::Frame(frame("old", "bob")));
        wait_for(&mut state_rx, |s| !s.messages.is_empty()).await;

        manager.connect("room2", "alice", Some("u-1".into()));
        let conn2 = opens.recv().await.unwrap();
        assert_eq!(
            conn2.url,
            "ws://chat.test/join-room/room2?username=alice&client_id=u-1"
        );
        settle().await;
        assert!(conn1.is_dropped());

        conn2.open();
        let state = wait_for(&mut state_rx, |s| s.connected).await;
        // The buffer belongs to the new session.
        assert!(state.messages.is_empty());
    }

    #[tokio::test]
    async fn disconnect_resets_state_to_the_initial_shape() {
        let (transport, mut opens) = FakeTransport::new();
        let manager = ConnectionManager::new(test_config(), transport);
        let mut state_rx = manager.subscribe();

        manager.connect("room1", "alice", None);
        let conn = opens.recv().await.unwrap();
        conn.open();
        conn.emit(TransportEvent::Frame(frame("hi", "bob")));
        wait_for(&mut state_rx, |s| !s.messages.is_empty()).await;

        manager.disconnect();
        let state = wait_for(&mut state_rx, |s| {
            s.connection_state == ConnectionState::Disconnected
        })
        .await;
        assert_eq!(state, WsState::default());
        settle().await;
        assert!(conn.is_dropped());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_linear_backoff() {
        let (transport, mut opens) = FakeTransport::new();
        let config = test_config();
        let base = config.reconnect.base_delay;
        let manager = ConnectionManager::new(config, transport);
        let mut state_rx = manager.subscribe();

        manager.connect("room1", "alice", None);
        let conn1 = opens.recv().await.unwrap();
        conn1.open();
        wait_for(&mut state_rx, |s| s.connected).await;

        let lost_at = Instant::now();
        conn1.emit(TransportEvent::Closed { clean: false });
        let state = wait_for(&mut state_rx, |s| {
            s.connection_state == (ConnectionState::Reconnecting { attempt: 1 })
        })
        .await;
        assert!(!state.connected);
        assert_eq!(state.error, None);

        // First retry fires after exactly 1 x base_delay, reusing the stored
        // session parameters.
        let conn2 = opens.recv().await.unwrap();
        assert_eq!(lost_at.elapsed(), base);
        assert_eq!(conn2.url, conn1.url);

        // Second consecutive failure waits 2 x base_delay.
        let lost_again = Instant::now();
        conn2.emit(TransportEvent::Closed { clean: false });
        wait_for(&mut state_rx, |s| {
            s.connection_state == (ConnectionState::Reconnecting { attempt: 2 })
        })
        .await;
        let conn3 = opens.recv().await.unwrap();
        assert_eq!(lost_again.elapsed(), base * 2);
        drop(conn3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_until_explicitly_reconnected() {
        let (transport, mut opens) = FakeTransport::new();
        let config = test_config();
        let max = config.reconnect.max_attempts;
        let base = config.reconnect.base_delay;
        let manager = ConnectionManager::new(config, transport);
        let mut state_rx = manager.subscribe();

        manager.connect("room1", "alice", None);
        let conn = opens.recv().await.unwrap();
        conn.open();
        wait_for(&mut state_rx, |s| s.connected).await;
        conn.emit(TransportEvent::Closed { clean: false });

        // Every retry fails; each one burns an attempt.
        for _ in 0..max {
            let retry = opens.recv().await.unwrap();
            retry.emit(TransportEvent::Closed { clean: false });
        }
        settle().await;
        assert_eq!(
            manager.state().connection_state,
            ConnectionState::Disconnected
        );

        // No further attempt is scheduled, even after a long wait.
        tokio::time::sleep(base * 20).await;
        assert!(opens.try_recv().is_err());

        // An explicit connect() resumes service with a fresh retry counter.
        manager.connect("room1", "alice", None);
        let conn = opens.recv().await.unwrap();
        conn.open();
        wait_for(&mut state_rx, |s| s.connected).await;
    }

    #[tokio::test]
    async fn send_passes_the_raw_payload_only_while_open() {
        let (transport, mut opens) = FakeTransport::new();
        let manager = ConnectionManager::new(test_config(), transport);
        let mut state_rx = manager.subscribe();

        // Never connected: recorded as a non-fatal error, nothing queued.
        manager.send("early");
        let state = wait_for(&mut state_rx, |s| s.error.is_some()).await;
        assert_eq!(state.error.as_deref(), Some(NOT_CONNECTED_ERROR));

        manager.connect("room1", "alice", None);
        let mut conn = opens.recv().await.unwrap();

        // Still opening: the stream is not writable yet.
        manager.send("too soon");
        settle().await;
        assert!(conn.outbound.try_recv().is_err());

        conn.open();
        wait_for(&mut state_rx, |s| s.connected).await;
        manager.send("hello");
        assert_eq!(conn.outbound.recv().await.unwrap(), "hello");

        // A clean close ends the session without retrying; later sends fail
        // softly again.
        conn.emit(TransportEvent::Closed { clean: true });
        wait_for(&mut state_rx, |s| {
            s.connection_state == ConnectionState::Disconnected
        })
        .await;
        settle().await;
        assert!(opens.try_recv().is_err());

        manager.send("late");
        let state = wait_for(&mut state_rx, |s| s.error.is_some()).await;
        assert_eq!(state.error.as_deref(), Some(NOT_CONNECTED_ERROR));
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_without_touching_state() {
        let (transport, mut opens) = FakeTransport::new();
        let manager = ConnectionManager::new(test_config(), transport);
        let mut state_rx = manager.subscribe();

        manager.connect("room1", "alice", None);
        let conn = opens.recv().await.unwrap();
        conn.open();
        wait_for(&mut state_rx, |s| s.connected).await;

        conn.emit(TransportEvent::Frame("not json".into()));
        conn.emit(TransportEvent::Frame(r#"{"content":"missing fields"}"#.into()));
        conn.emit(TransportEvent::Frame(frame("real", "bob")));

        let state = wait_for(&mut state_rx, |s| !s.messages.is_empty()).await;
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, "real");
        assert_eq!(state.error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_a_pending_reconnect() {
        let (transport, mut opens) = FakeTransport::new();
        let config = test_config();
        let base = config.reconnect.base_delay;
        let manager = ConnectionManager::new(config, transport);
        let mut state_rx = manager.subscribe();

        manager.connect("room1", "alice", None);
        let conn = opens.recv().await.unwrap();
        conn.open();
        wait_for(&mut state_rx, |s| s.connected).await;

        conn.emit(TransportEvent::Closed { clean: false });
        wait_for(&mut state_rx, |s| {
            s.connection_state == (ConnectionState::Reconnecting { attempt: 1 })
        })
        .await;

        manager.disconnect();
        let state = wait_for(&mut state_rx, |s| {
            s.connection_state == ConnectionState::Disconnected
        })
        .await;
        assert_eq!(state, WsState::default());

        tokio::time::sleep(base * 10).await;
        assert!(opens.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_during_retry_supersedes_the_pending_attempt() {
        let (transport, mut opens) = FakeTransport::new();
        let config = test_config();
        let base = config.reconnect.base_delay;
        let manager = ConnectionManager::new(config, transport);
        let mut state_rx = manager.subscribe();

        manager.connect("room1", "alice", None);
        let conn = opens.recv().await.unwrap();
        conn.open();
        wait_for(&mut state_rx, |s| s.connected).await;
        conn.emit(TransportEvent::Closed { clean: false });
        wait_for(&mut state_rx, |s| {
            s.connection_state == (ConnectionState::Reconnecting { attempt: 1 })
        })
        .await;

        // The fresh connect opens immediately and cancels the stale timer.
        manager.connect("room2", "alice", None);
        let conn2 = opens.recv().await.unwrap();
        assert!(conn2.url.contains("/join-room/room2"));
        conn2.open();
        wait_for(&mut state_rx, |s| s.connected).await;

        tokio::time::sleep(base * 10).await;
        assert!(opens.try_recv().is_err());
    }

    #[tokio::test]
    async fn transport_error_clears_connected_but_defers_recovery_to_close() {
        let (transport, mut opens) = FakeTransport::new();
        let manager = ConnectionManager::new(test_config(), transport);
        let mut state_rx = manager.subscribe();

        manager.connect("room1", "alice", None);
        let conn = opens.recv().await.unwrap();
        conn.open();
        wait_for(&mut state_rx, |s| s.connected).await;

        conn.emit(TransportEvent::Error("io failure".into()));
        let state = wait_for(&mut state_rx, |s| s.error.is_some()).await;
        assert!(!state.connected);
        // The error alone does not end the session; the close event decides.
        assert_eq!(state.connection_state, ConnectionState::Connected);

        conn.emit(TransportEvent::Closed { clean: false });
        wait_for(&mut state_rx, |s| {
            matches!(s.connection_state, ConnectionState::Reconnecting { .. })
        })
        .await;
    }
}
