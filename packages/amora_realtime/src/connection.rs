//! The single realtime WebSocket per session.
//!
//! A [`ConnectionManager`] owns one background task that connects, keeps the
//! socket alive with `ping` frames, fans inbound frames out to subscribers and
//! drains the outbound queue. Unexpected closes are retried with capped
//! exponential backoff; an explicit [`ConnectionManager::disconnect`] stops
//! everything.

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::config::{RealtimeConfig, ServerEndpoint};
use crate::frame::{self, InboundFrame, OutboundFrame};
use crate::session_store::{Credentials, SessionStore};

/// Lifecycle of the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected
    Idle,
    Connecting,
    Open,
    /// Waiting out the backoff before reconnect attempt `attempt`
    Reconnecting { attempt: u32 },
    /// Disconnected on request, or reconnect attempts exhausted
    Closed,
}

/// Capped exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based): `min(base * 2^attempt, cap)`.
    /// `None` once `attempt` exceeds `max_attempts`.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(self.cap))
    }
}

/// Anything outbound frames can be written to.
pub trait FrameSink: Send + Sync {
    /// Returns `false` when the frame was not accepted for transmission.
    fn send_frame(&self, frame: OutboundFrame) -> bool;
}

struct Shared {
    endpoint: ServerEndpoint,
    config: RealtimeConfig,
    session: Arc<dyn SessionStore>,
    state_tx: watch::Sender<ConnectionState>,
    frames_tx: broadcast::Sender<InboundFrame>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<OutboundFrame>>,
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
    run: Mutex<Option<RunHandle>>,
}

impl ConnectionManager {
    pub fn new(
        endpoint: ServerEndpoint,
        config: RealtimeConfig,
        session: Arc<dyn SessionStore>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (frames_tx, _) = broadcast::channel(config.frame_broadcast_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                endpoint,
                config,
                session,
                state_tx,
                frames_tx,
                outbound_rx: Mutex::new(outbound_rx),
            }),
            outbound_tx,
            run: Mutex::new(None),
        }
    }

    /// Start connecting. No-op without session credentials, or when already
    /// open or connecting. While a reconnect is pending this skips the
    /// remaining backoff and connects immediately with a fresh attempt count.
    pub async fn connect(&self) {
        if self.shared.session.credentials().is_none() {
            debug!("no session credentials, not connecting");
            return;
        }

        let mut run = self.run.lock().await;
        let state = *self.shared.state_tx.borrow();
        if matches!(state, ConnectionState::Open | ConnectionState::Connecting) {
            trace!(?state, "connect ignored");
            return;
        }

        if let Some(prev) = run.take() {
            prev.cancel.cancel();
            let _ = prev.task.await;
        }

        let cancel = CancellationToken::new();
        self.shared.state_tx.send_replace(ConnectionState::Connecting);
        let task = tokio::spawn(run_connection(self.shared.clone(), cancel.clone()));
        *run = Some(RunHandle { cancel, task });
    }

    /// Close the connection and cancel keepalive and any pending reconnect.
    pub async fn disconnect(&self) {
        let prev = self.run.lock().await.take();
        if let Some(prev) = prev {
            prev.cancel.cancel();
            if let Err(e) = prev.task.await {
                warn!(error = %e, "connection task ended abnormally");
            }
        }
        self.shared.state_tx.send_replace(ConnectionState::Closed);
        info!("disconnected");
    }

    /// Queue a frame for transmission. Only accepted while `Open`.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        if *self.shared.state_tx.borrow() != ConnectionState::Open {
            debug!(kind = frame.kind(), "connection not open, dropping outbound frame");
            return false;
        }
        self.outbound_tx.send(frame).is_ok()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to decoded inbound frames. Malformed and unknown frames never
    /// reach subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundFrame> {
        self.shared.frames_tx.subscribe()
    }
}

impl FrameSink for ConnectionManager {
    fn send_frame(&self, frame: OutboundFrame) -> bool {
        self.send(frame)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().take() {
            run.cancel.cancel();
        }
    }
}

/// `ws(s)://<host>/ws/<user_id>?token=<token>`
pub(crate) fn ws_url(endpoint: &ServerEndpoint, creds: &Credentials) -> Option<Url> {
    let mut url = Url::parse(&format!("{}://{}", endpoint.ws_scheme(), endpoint.host)).ok()?;
    url.path_segments_mut()
        .ok()?
        .extend(["ws", creds.user_id.as_str()]);
    url.query_pairs_mut().append_pair("token", &creds.token);
    Some(url)
}

// =============================================================================
// Connection task
// =============================================================================

enum Outcome {
    /// Cancelled by disconnect or a restart
    Cancelled,
    /// Never reached Open
    ConnectFailed,
    /// Was Open, then the socket went away
    Lost,
}

async fn run_connection(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut attempt: u32 = 0;

    loop {
        let Some(creds) = shared.session.credentials() else {
            warn!("session credentials gone, not reconnecting");
            shared.state_tx.send_replace(ConnectionState::Closed);
            return;
        };

        let span = info_span!(
            "connection",
            connection_id = %uuid::Uuid::new_v4(),
            user_id = %creds.user_id,
        );
        match connect_and_drive(&shared, &creds, &cancel)
            .instrument(span)
            .await
        {
            Outcome::Cancelled => return,
            Outcome::ConnectFailed => {}
            Outcome::Lost => attempt = 0,
        }

        attempt += 1;
        let Some(delay) = shared.config.reconnect.delay_for(attempt) else {
            warn!(
                attempts = attempt - 1,
                "reconnect attempts exhausted, staying closed"
            );
            shared.state_tx.send_replace(ConnectionState::Closed);
            return;
        };

        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        shared
            .state_tx
            .send_replace(ConnectionState::Reconnecting { attempt });

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        shared.state_tx.send_replace(ConnectionState::Connecting);
    }
}

async fn connect_and_drive(
    shared: &Shared,
    creds: &Credentials,
    cancel: &CancellationToken,
) -> Outcome {
    let Some(url) = ws_url(&shared.endpoint, creds) else {
        warn!(host = %shared.endpoint.host, "invalid realtime url");
        return Outcome::ConnectFailed;
    };

    debug!(host = %shared.endpoint.host, "connecting");
    let ws = tokio::select! {
        _ = cancel.cancelled() => return Outcome::Cancelled,
        result = tokio_tungstenite::connect_async(url.as_str()) => match result {
            Ok((ws, _)) => ws,
            Err(e) => {
                warn!(error = %e, "connect failed");
                return Outcome::ConnectFailed;
            }
        },
    };

    let (mut ws_write, mut ws_read) = ws.split();
    let mut outbound = shared.outbound_rx.lock().await;
    // Frames queued for a previous socket are stale
    while outbound.try_recv().is_ok() {}

    shared.state_tx.send_replace(ConnectionState::Open);
    info!("connected");

    let period = shared.config.keepalive_interval;
    let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_heard = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                return Outcome::Cancelled;
            }

            _ = keepalive.tick() => {
                if let Some(timeout) = shared.config.pong_timeout {
                    if last_heard.elapsed() > timeout {
                        warn!(
                            silent_ms = last_heard.elapsed().as_millis() as u64,
                            "no traffic from server within pong timeout"
                        );
                        return Outcome::Lost;
                    }
                }
                if !write_frame(&mut ws_write, &OutboundFrame::Ping).await {
                    return Outcome::Lost;
                }
            }

            Some(frame) = outbound.recv() => {
                if !write_frame(&mut ws_write, &frame).await {
                    return Outcome::Lost;
                }
            }

            msg = ws_read.next() => match msg {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    last_heard = Instant::now();
                    dispatch(shared, text.as_str());
                }
                Some(Ok(tungstenite::Message::Close(close))) => {
                    info!(?close, "server closed connection");
                    return Outcome::Lost;
                }
                Some(Ok(_)) => {
                    last_heard = Instant::now();
                }
                Some(Err(e)) => {
                    warn!(error = %e, "read failed");
                    return Outcome::Lost;
                }
                None => {
                    info!("connection stream ended");
                    return Outcome::Lost;
                }
            },
        }
    }
}

async fn write_frame<S>(ws_write: &mut S, frame: &OutboundFrame) -> bool
where
    S: futures::Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let json = match frame::encode(frame) {
        Ok(json) => json,
        Err(e) => {
            warn!(kind = frame.kind(), error = %e, "failed to encode frame");
            return true;
        }
    };
    match ws_write.send(tungstenite::Message::Text(json.into())).await {
        Ok(()) => {
            trace!(kind = frame.kind(), "frame sent");
            true
        }
        Err(e) => {
            warn!(kind = frame.kind(), error = %e, "write failed");
            false
        }
    }
}

fn dispatch(shared: &Shared, text: &str) {
    match frame::decode(text) {
        Ok(InboundFrame::Unknown { kind }) => {
            debug!(kind, "discarding frame of unknown kind");
        }
        Ok(InboundFrame::Pong) => trace!("pong"),
        Ok(frame) => {
            trace!(kind = frame.kind(), "frame received");
            // No subscribers is fine
            let _ = shared.frames_tx.send(frame);
        }
        Err(e) => warn!(error = %e, "dropping malformed frame"),
    }
}
