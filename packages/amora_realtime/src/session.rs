//! Per-user session wiring.
//!
//! The orchestrator owns the connection, both trackers and the open
//! conversation. A dispatch task subscribed to the connection's frame stream
//! feeds presence and typing frames to the trackers unconditionally, and
//! hands `message`/`read_receipt` frames to the open conversation, if any.

use std::io;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::api::MessageApi;
use crate::config::{ConversationConfig, RealtimeConfig, ServerEndpoint};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::conversation::{ConversationHandle, ConversationSync};
use crate::error::SessionError;
use crate::frame::InboundFrame;
use crate::presence::PresenceTracker;
use crate::session_store::SessionStore;
use crate::typing::TypingTracker;

type ActiveConversation = Arc<RwLock<Option<ConversationSync>>>;

struct DispatchHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct SessionOrchestrator {
    connection: Arc<ConnectionManager>,
    presence: Arc<RwLock<PresenceTracker>>,
    typing: Arc<RwLock<TypingTracker>>,
    active: ActiveConversation,
    api: Arc<dyn MessageApi>,
    session: Arc<dyn SessionStore>,
    conversation_config: ConversationConfig,
    dispatch: Mutex<Option<DispatchHandle>>,
}

impl SessionOrchestrator {
    pub fn new(
        endpoint: ServerEndpoint,
        realtime_config: RealtimeConfig,
        conversation_config: ConversationConfig,
        session: Arc<dyn SessionStore>,
        api: Arc<dyn MessageApi>,
    ) -> Self {
        let connection = Arc::new(ConnectionManager::new(
            endpoint,
            realtime_config,
            session.clone(),
        ));
        Self {
            connection,
            presence: Arc::new(RwLock::new(PresenceTracker::new())),
            typing: Arc::new(RwLock::new(TypingTracker::new())),
            active: Arc::new(RwLock::new(None)),
            api,
            session,
            conversation_config,
            dispatch: Mutex::new(None),
        }
    }

    /// Start dispatching and connect. Safe to call repeatedly; a connection
    /// that gave up after exhausting its reconnect attempts is restarted.
    pub async fn start(&self) {
        {
            let mut dispatch = self.dispatch.lock().await;
            if dispatch.is_none() {
                let cancel = CancellationToken::new();
                let task = tokio::spawn(dispatch_loop(
                    self.connection.subscribe(),
                    self.presence.clone(),
                    self.typing.clone(),
                    self.active.clone(),
                    cancel.clone(),
                ));
                *dispatch = Some(DispatchHandle { cancel, task });
            }
        }
        self.connection.connect().await;
    }

    /// Open the conversation with `counterpart`, closing any other open one.
    ///
    /// The new conversation fetches its history over REST right away;
    /// messages pushed before it opened are not replayed.
    pub async fn open_conversation(
        &self,
        counterpart: &str,
    ) -> Result<ConversationHandle, SessionError> {
        let creds = self
            .session
            .credentials()
            .ok_or(SessionError::NoCredentials)?;
        let counterpart = counterpart.trim();
        if counterpart.is_empty() {
            return Err(SessionError::EmptyCounterpart);
        }
        if counterpart == creds.user_id {
            return Err(SessionError::SelfConversation);
        }

        self.start().await;

        // Dispatch reads `active` on every message frame; never hold it across a close
        let (handle, prev) = {
            let mut active = self.active.write().await;
            if let Some(open) = active.as_ref() {
                if open.counterpart() == counterpart {
                    return Ok(open.handle());
                }
            }
            let sync = ConversationSync::start(
                creds.user_id,
                counterpart,
                self.api.clone(),
                self.connection.clone(),
                self.conversation_config.clone(),
            );
            (sync.handle(), active.replace(sync))
        };

        if let Some(prev) = prev {
            debug!(counterpart = prev.counterpart(), "closing previous conversation");
            prev.close().await;
        }
        Ok(handle)
    }

    pub async fn close_conversation(&self) {
        let prev = self.active.write().await.take();
        if let Some(prev) = prev {
            prev.close().await;
        }
    }

    /// Tear down the connection, then dispatch, then the open conversation.
    pub async fn shutdown(&self) {
        self.connection.disconnect().await;

        let dispatch = self.dispatch.lock().await.take();
        if let Some(dispatch) = dispatch {
            dispatch.cancel.cancel();
            if let Err(e) = dispatch.task.await {
                warn!(error = %e, "dispatch task ended abnormally");
            }
        }

        self.close_conversation().await;
        info!("session shut down");
    }

    /// [`shutdown`](Self::shutdown), then forget the stored session.
    pub async fn logout(&self) -> io::Result<()> {
        self.shutdown().await;
        self.presence.write().await.clear();
        self.typing.write().await.clear();
        self.session.clear()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.presence.read().await.is_online(user_id)
    }

    pub async fn online_users(&self) -> Vec<String> {
        self.presence
            .read()
            .await
            .online_users()
            .map(str::to_string)
            .collect()
    }

    pub async fn is_typing(&self, user_id: &str) -> bool {
        self.typing.read().await.is_typing(user_id)
    }

    pub async fn active_counterpart(&self) -> Option<String> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|sync| sync.counterpart().to_string())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Raw inbound frames, for presentation layers that react to presence
    /// and typing changes.
    pub fn subscribe_frames(&self) -> broadcast::Receiver<InboundFrame> {
        self.connection.subscribe()
    }
}

async fn dispatch_loop(
    mut frames: broadcast::Receiver<InboundFrame>,
    presence: Arc<RwLock<PresenceTracker>>,
    typing: Arc<RwLock<TypingTracker>>,
    active: ActiveConversation,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = frames.recv() => match result {
                Ok(frame) => route_frame(&frame, &presence, &typing, &active).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "frame dispatch lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("dispatch stopped");
}

async fn route_frame(
    frame: &InboundFrame,
    presence: &RwLock<PresenceTracker>,
    typing: &RwLock<TypingTracker>,
    active: &RwLock<Option<ConversationSync>>,
) {
    match frame {
        InboundFrame::Presence { user_id, status } => {
            debug!(user_id, ?status, "presence");
            presence.write().await.apply(user_id, *status);
        }
        InboundFrame::Typing { user_id, is_typing } => {
            trace!(user_id, is_typing, "typing");
            typing.write().await.apply(user_id, *is_typing);
        }
        InboundFrame::Message(_) | InboundFrame::ReadReceipt { .. } => {
            match active.read().await.as_ref() {
                Some(sync) => sync.route(frame),
                None => trace!(kind = frame.kind(), "no open conversation"),
            }
        }
        InboundFrame::ConnectionAck { .. } => info!("connection acknowledged"),
        InboundFrame::Ping | InboundFrame::Pong | InboundFrame::Unknown { .. } => {}
    }
}
