//! Amora realtime - client-side session layer for the Amora messaging server.
//!
//! One [`SessionOrchestrator`] per signed-in user owns:
//! - a [`ConnectionManager`] holding the single WebSocket to the server
//!   (keepalive pings, reconnect with capped exponential backoff)
//! - a [`PresenceTracker`] and a [`TypingTracker`] fed from every inbound frame
//! - at most one open [`ConversationSync`], which merges pushed messages with
//!   the periodically polled REST history into one deduplicated timeline
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use amora_realtime::{
//!     AppDirs, ConversationConfig, FileSessionStore, RealtimeConfig, RestClient,
//!     ServerEndpoint, SessionOrchestrator, config::FileConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dirs = AppDirs::new(None)?;
//!     let fc: FileConfig = amora_realtime::config::load_config(&dirs.data_dir, None).extract()?;
//!     let endpoint = ServerEndpoint::from_file(&fc.server);
//!     let session = Arc::new(FileSessionStore::new(dirs.session_path()));
//!     let api = Arc::new(RestClient::new(&endpoint, &fc.http, session.clone())?);
//!
//!     let orchestrator = SessionOrchestrator::new(
//!         endpoint,
//!         RealtimeConfig::from_file(&fc.realtime),
//!         ConversationConfig::from_file(&fc.conversation),
//!         session,
//!         api,
//!     );
//!     orchestrator.start().await;
//!
//!     let chat = orchestrator.open_conversation("user-42").await?;
//!     chat.input_changed();
//!     chat.send_message("hey!").await?;
//!
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod error;
pub mod frame;
pub mod message;
pub mod presence;
pub mod session;
pub mod session_store;
pub mod timefmt;
pub mod timeline;
pub mod typing;

pub use api::{MessageApi, RestClient};
pub use config::{AppDirs, ConversationConfig, RealtimeConfig, ServerEndpoint};
pub use connection::{ConnectionManager, ConnectionState, FrameSink, ReconnectPolicy};
pub use conversation::{ConversationHandle, ConversationSync};
pub use error::{ApiError, FrameError, SessionError, SyncError};
pub use frame::{InboundFrame, OutboundFrame, PresenceStatus};
pub use message::Message;
pub use presence::PresenceTracker;
pub use session::SessionOrchestrator;
pub use session_store::{Credentials, FileSessionStore, MemorySessionStore, SessionStore};
pub use timeline::Timeline;
pub use typing::TypingTracker;
