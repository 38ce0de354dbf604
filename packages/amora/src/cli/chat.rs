use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use amora_realtime::config::FileConfig;
use amora_realtime::timefmt::format_timestamp_local;
use amora_realtime::{
    AppDirs, ConnectionState, ConversationConfig, ConversationHandle, InboundFrame, Message,
    PresenceStatus, RealtimeConfig, SessionOrchestrator, SessionStore, SyncError,
};

use super::{api_failure, rest_client, signed_in_store};

enum InputOutcome {
    Continue,
    Quit,
    SignedOut,
}

/// Interactive chat: stdin lines are sent, timeline and presence changes
/// print to stdout until `/quit`, EOF or Ctrl-C.
pub async fn chat_command(dirs: &AppDirs, config: &FileConfig, counterpart: &str) -> Result<()> {
    let (store, creds) = signed_in_store(dirs)?;
    let (endpoint, client) = rest_client(config, store.clone())?;
    let client = Arc::new(client);

    let name = match client.fetch_user(counterpart).await {
        Ok(user) => {
            let name = user.display_name().to_string();
            match user.age {
                Some(age) => println!("── {name}, {age} ──"),
                None => println!("── {name} ──"),
            }
            if let Some(bio) = user.bio.as_deref().filter(|b| !b.is_empty()) {
                println!("{bio}");
            }
            name
        }
        Err(e) if e.is_unauthorized() => {
            return Err(api_failure(store.as_ref(), e, "load the profile"));
        }
        Err(e) => {
            warn!(error = %e, user_id = counterpart, "profile unavailable");
            counterpart.to_string()
        }
    };

    let orchestrator = SessionOrchestrator::new(
        endpoint,
        RealtimeConfig::from_file(&config.realtime),
        ConversationConfig::from_file(&config.conversation),
        store.clone(),
        client,
    );
    let chat = orchestrator
        .open_conversation(counterpart)
        .await
        .context("Failed to open conversation")?;
    println!("Enter sends. /typing shows a typing indicator, /quit leaves.");

    let mut timeline = chat.subscribe();
    let mut frames = orchestrator.subscribe_frames();
    let mut state = orchestrator.watch_connection_state();
    let mut printer = TimelinePrinter::new(&creds.user_id, &name);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            changed = timeline.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let messages = timeline.borrow_and_update().clone();
                for line in printer.render(&messages) {
                    println!("{line}");
                }
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = *state.borrow_and_update();
                println!("[{}]", describe_state(current));
            }
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    if let Some(line) = describe_frame(&frame, counterpart, &name) {
                        println!("{line}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "frame display lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => match handle_input(&chat, line.trim(), store.as_ref()).await {
                    InputOutcome::Continue => {}
                    InputOutcome::Quit => break Ok(()),
                    InputOutcome::SignedOut => {
                        break Err(anyhow::anyhow!("Session expired; sign in again"));
                    }
                },
                Ok(None) => break Ok(()),
                Err(e) => break Err(anyhow::Error::new(e).context("Failed to read stdin")),
            },
        }
    };

    orchestrator.shutdown().await;
    result
}

async fn handle_input(
    chat: &ConversationHandle,
    input: &str,
    store: &dyn SessionStore,
) -> InputOutcome {
    match input {
        "" => InputOutcome::Continue,
        "/quit" => InputOutcome::Quit,
        "/typing" => {
            chat.input_changed();
            InputOutcome::Continue
        }
        text => match chat.send_message(text).await {
            Ok(_) => InputOutcome::Continue,
            Err(SyncError::NotDelivered(e)) if e.is_unauthorized() => {
                if let Err(e) = store.clear() {
                    warn!(error = %e, "failed to clear rejected session");
                }
                InputOutcome::SignedOut
            }
            Err(SyncError::Closed) => InputOutcome::Quit,
            Err(e) => {
                eprintln!("! {e}");
                InputOutcome::Continue
            }
        },
    }
}

fn describe_state(state: ConnectionState) -> String {
    match state {
        ConnectionState::Idle => "offline".to_string(),
        ConnectionState::Connecting => "connecting…".to_string(),
        ConnectionState::Open => "connected".to_string(),
        ConnectionState::Reconnecting { attempt } => format!("reconnecting (attempt {attempt})"),
        ConnectionState::Closed => "disconnected".to_string(),
    }
}

/// Presence and typing lines about the counterpart; everything else is
/// shown through the timeline.
fn describe_frame(frame: &InboundFrame, counterpart: &str, name: &str) -> Option<String> {
    match frame {
        InboundFrame::Presence { user_id, status } if user_id == counterpart => Some(match status {
            PresenceStatus::Online => format!("● {name} is online"),
            PresenceStatus::Offline => format!("○ {name} went offline"),
        }),
        InboundFrame::Typing { user_id, is_typing: true } if user_id == counterpart => {
            Some(format!("… {name} is typing"))
        }
        _ => None,
    }
}

/// Tracks which timeline entries were already printed.
struct TimelinePrinter {
    me: String,
    name: String,
    shown: HashSet<String>,
    read: HashSet<String>,
}

impl TimelinePrinter {
    fn new(me: &str, name: &str) -> Self {
        Self {
            me: me.to_string(),
            name: name.to_string(),
            shown: HashSet::new(),
            read: HashSet::new(),
        }
    }

    fn render(&mut self, messages: &[Message]) -> Vec<String> {
        let mut out = Vec::new();
        for m in messages {
            let mine = m.sender_id == self.me;
            if self.shown.insert(m.message_id.clone()) {
                let who = if mine { "you" } else { self.name.as_str() };
                out.push(format!(
                    "{}  {}: {}",
                    format_timestamp_local(m.sent_at),
                    who,
                    m.content
                ));
            }
            if mine && m.is_read && self.read.insert(m.message_id.clone()) {
                out.push(format!("   ✓ read: {}", m.content));
            }
        }
        out
    }
}
