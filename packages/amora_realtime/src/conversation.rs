//! One open conversation.
//!
//! [`ConversationSync`] runs a task that owns the conversation's [`Timeline`]
//! and its two timers: the history poll and the typing-idle debounce. Pushed
//! frames and user actions reach the task as commands, so the timeline has a
//! single writer. The merged timeline is published on a `watch` channel.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::api::MessageApi;
use crate::config::ConversationConfig;
use crate::connection::FrameSink;
use crate::error::SyncError;
use crate::frame::{InboundFrame, OutboundFrame};
use crate::message::{Message, NewMessage};
use crate::timeline::Timeline;

enum Command {
    Push(Message),
    ReadReceipt {
        message_ids: Vec<String>,
        read_at: Option<DateTime<Utc>>,
    },
    InputChanged,
    Send {
        content: String,
        reply: oneshot::Sender<Result<Message, SyncError>>,
    },
}

/// Cheap, cloneable access to an open conversation.
#[derive(Clone)]
pub struct ConversationHandle {
    counterpart: Arc<str>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    timeline_rx: watch::Receiver<Vec<Message>>,
}

impl std::fmt::Debug for ConversationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationHandle")
            .field("counterpart", &self.counterpart)
            .field("closed", &self.cmd_tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl ConversationHandle {
    pub fn counterpart(&self) -> &str {
        &self.counterpart
    }

    /// The local user edited the message input.
    pub fn input_changed(&self) {
        let _ = self.cmd_tx.send(Command::InputChanged);
    }

    /// Persist a message over REST and relay it over the socket.
    ///
    /// Blank content is rejected without contacting the server. On failure
    /// the timeline is left untouched.
    pub async fn send_message(&self, content: impl Into<String>) -> Result<Message, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send {
                content: content.into(),
                reply,
            })
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Snapshot of the merged timeline.
    pub fn messages(&self) -> Vec<Message> {
        self.timeline_rx.borrow().clone()
    }

    /// Receiver that is notified whenever the merged timeline changes.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.timeline_rx.clone()
    }
}

pub struct ConversationSync {
    handle: ConversationHandle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConversationSync {
    /// Open the conversation between `user_id` and `counterpart`. The first
    /// history fetch starts immediately.
    pub fn start(
        user_id: impl Into<String>,
        counterpart: impl Into<String>,
        api: Arc<dyn MessageApi>,
        sink: Arc<dyn FrameSink>,
        config: ConversationConfig,
    ) -> Self {
        let user_id = user_id.into();
        let counterpart: String = counterpart.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (timeline_tx, timeline_rx) = watch::channel(Vec::new());
        let cancel = CancellationToken::new();

        let span = info_span!("conversation", counterpart = %counterpart);
        let actor = SyncActor {
            timeline: Timeline::new(counterpart.clone()),
            user_id,
            counterpart: counterpart.clone(),
            api,
            sink,
            config,
            timeline_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(actor.run(cmd_rx).instrument(span));

        Self {
            handle: ConversationHandle {
                counterpart: counterpart.into(),
                cmd_tx,
                timeline_rx,
            },
            cancel,
            task: Some(task),
        }
    }

    pub fn handle(&self) -> ConversationHandle {
        self.handle.clone()
    }

    pub fn counterpart(&self) -> &str {
        self.handle.counterpart()
    }

    /// Hand an inbound frame to this conversation. Only `message` frames
    /// involving the counterpart and `read_receipt` frames are taken.
    pub fn route(&self, frame: &InboundFrame) {
        let cmd = match frame {
            InboundFrame::Message(msg) if msg.involves(self.counterpart()) => {
                Command::Push(msg.clone())
            }
            InboundFrame::ReadReceipt {
                message_ids,
                read_at,
            } => Command::ReadReceipt {
                message_ids: message_ids.clone(),
                read_at: *read_at,
            },
            _ => return,
        };
        let _ = self.handle.cmd_tx.send(cmd);
    }

    /// Stop polling and the typing timer. REST calls still in flight are
    /// abandoned, so nothing is acknowledged after this returns. A typing
    /// indicator still showing is cleared with one `is_typing: false`.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "conversation task ended abnormally");
            }
        }
    }
}

impl Drop for ConversationSync {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Actor
// =============================================================================

struct SyncActor {
    timeline: Timeline,
    user_id: String,
    counterpart: String,
    api: Arc<dyn MessageApi>,
    sink: Arc<dyn FrameSink>,
    config: ConversationConfig,
    timeline_tx: watch::Sender<Vec<Message>>,
    /// Shared with [`ConversationSync`]; every REST call races it
    cancel: CancellationToken,
}

impl SyncActor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        let cancel = self.cancel.clone();
        info!("conversation opened");
        self.poll().await;

        let period = self.config.poll_interval;
        let mut poll = tokio::time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let typing_idle = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(typing_idle);
        let mut typing_armed = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = poll.tick() => self.poll().await,

                Some(cmd) = cmd_rx.recv() => match cmd {
                    Command::Push(msg) => {
                        let fresh = self.timeline.ingest_push(msg);
                        self.publish();
                        self.acknowledge(fresh).await;
                    }
                    Command::ReadReceipt { message_ids, read_at } => {
                        let read_at = read_at.unwrap_or_else(Utc::now);
                        let changed = self.timeline.apply_read_receipt(&message_ids, read_at);
                        debug!(changed, "read receipt applied");
                        self.publish();
                    }
                    Command::InputChanged => {
                        if !typing_armed {
                            self.send_typing(true);
                        }
                        typing_idle
                            .as_mut()
                            .reset(Instant::now() + self.config.typing_idle);
                        typing_armed = true;
                    }
                    Command::Send { content, reply } => {
                        if !content.trim().is_empty() && typing_armed {
                            typing_armed = false;
                            self.send_typing(false);
                        }
                        let _ = reply.send(self.send(content).await);
                    }
                },

                () = &mut typing_idle, if typing_armed => {
                    typing_armed = false;
                    self.send_typing(false);
                }
            }
        }

        if typing_armed {
            self.send_typing(false);
        }
        info!("conversation closed");
    }

    async fn poll(&mut self) {
        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = self.api.fetch_messages(&self.user_id, &self.counterpart) => result,
        };
        match fetched {
            Ok(history) => {
                let fresh = self.timeline.replace_base(history);
                self.publish();
                self.acknowledge(fresh).await;
            }
            Err(e) => warn!(error = %e, "history poll failed"),
        }
    }

    /// Mark newly observed counterpart messages read, then tell the
    /// counterpart over the socket. On REST failure the ids are retried on
    /// the next poll.
    async fn acknowledge(&mut self, message_ids: Vec<String>) {
        if message_ids.is_empty() || self.cancel.is_cancelled() {
            return;
        }
        let marked = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(count = message_ids.len(), "closed before mark read finished");
                return;
            }
            result = self.api.mark_conversation_read(&self.user_id, &self.counterpart) => result,
        };
        match marked {
            Ok(()) => {
                debug!(count = message_ids.len(), "marked read");
                let frame = OutboundFrame::ReadReceipt {
                    receiver_id: self.counterpart.clone(),
                    message_ids,
                };
                if !self.sink.send_frame(frame) {
                    debug!("read receipt not relayed, connection not open");
                }
            }
            Err(e) => {
                warn!(error = %e, "mark read failed");
                self.timeline.forget_seen(&message_ids);
            }
        }
    }

    async fn send(&mut self, content: String) -> Result<Message, SyncError> {
        if content.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }

        let new = NewMessage {
            sender_id: self.user_id.clone(),
            receiver_id: self.counterpart.clone(),
            content,
        };
        let posted = tokio::select! {
            _ = self.cancel.cancelled() => return Err(SyncError::Closed),
            result = self.api.post_message(&new) => result,
        };
        let ack = match posted {
            Ok(ack) => ack,
            Err(e) => {
                warn!(error = %e, "send failed");
                return Err(SyncError::NotDelivered(e));
            }
        };

        let frame = OutboundFrame::Message {
            receiver_id: self.counterpart.clone(),
            content: new.content.clone(),
            message_id: ack.message_id.clone(),
        };
        if !self.sink.send_frame(frame) {
            debug!("message saved but not relayed, connection not open");
        }

        let message = Message {
            message_id: ack.message_id,
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            content: new.content,
            sent_at: ack.sent_at.unwrap_or_else(Utc::now),
            is_read: false,
            read_at: None,
        };
        self.timeline.ingest_push(message.clone());
        self.publish();
        Ok(message)
    }

    fn send_typing(&self, is_typing: bool) {
        let sent = self.sink.send_frame(OutboundFrame::Typing {
            receiver_id: self.counterpart.clone(),
            is_typing,
        });
        if !sent {
            debug!(is_typing, "typing signal not relayed, connection not open");
        }
    }

    fn publish(&self) {
        let messages = self.timeline.messages();
        self.timeline_tx.send_if_modified(|current| {
            if current.as_slice() == messages {
                false
            } else {
                *current = messages.to_vec();
                true
            }
        });
    }
}
