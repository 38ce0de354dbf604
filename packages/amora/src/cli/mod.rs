pub mod chat;
pub mod session;

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use amora_realtime::config::FileConfig;
use amora_realtime::message::ConversationSummary;
use amora_realtime::timefmt::format_relative;
use amora_realtime::{
    ApiError, AppDirs, Credentials, FileSessionStore, RestClient, ServerEndpoint, SessionStore,
};

/// The file-backed store plus the credentials it currently holds.
pub(crate) fn signed_in_store(dirs: &AppDirs) -> Result<(Arc<FileSessionStore>, Credentials)> {
    let store = Arc::new(FileSessionStore::new(dirs.session_path()));
    let creds = store
        .credentials()
        .context("Not signed in. Run `amora session set <user_id> <token>` first")?;
    Ok((store, creds))
}

pub(crate) fn rest_client(
    config: &FileConfig,
    store: Arc<FileSessionStore>,
) -> Result<(ServerEndpoint, RestClient)> {
    let endpoint = ServerEndpoint::from_file(&config.server);
    let client = RestClient::new(&endpoint, &config.http, store).context("Failed to build HTTP client")?;
    Ok((endpoint, client))
}

/// Turn a REST failure into a CLI error, signing out first when the server
/// rejected the token.
pub(crate) fn api_failure(store: &dyn SessionStore, err: ApiError, what: &str) -> anyhow::Error {
    if err.is_unauthorized() {
        if let Err(e) = store.clear() {
            warn!(error = %e, "failed to clear rejected session");
        }
        return anyhow::anyhow!("Session expired while trying to {what}; sign in again");
    }
    anyhow::Error::new(err).context(format!("Failed to {what}"))
}

pub async fn conversations_command(dirs: &AppDirs, config: &FileConfig) -> Result<()> {
    let (store, creds) = signed_in_store(dirs)?;
    let (_, client) = rest_client(config, store.clone())?;

    let conversations = client
        .fetch_conversations(&creds.user_id)
        .await
        .map_err(|e| api_failure(store.as_ref(), e, "list conversations"))?;

    if conversations.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }

    let now = Utc::now();
    for convo in &conversations {
        println!("{}", conversation_line(convo, now));
    }

    match client.fetch_unread_counts(&creds.user_id).await {
        Ok(counts) if counts.unread_count > 0 => println!("\n{} unread", counts.unread_count),
        Ok(_) => {}
        Err(e) if e.is_unauthorized() => {
            return Err(api_failure(store.as_ref(), e, "count unread messages"));
        }
        Err(e) => warn!(error = %e, "unread count unavailable"),
    }
    Ok(())
}

fn conversation_line(convo: &ConversationSummary, now: chrono::DateTime<Utc>) -> String {
    let name = convo
        .other_user_name
        .as_deref()
        .unwrap_or(&convo.other_user_id);
    let when = convo
        .last_message_time
        .map(|t| format_relative(t, now))
        .unwrap_or_default();
    let unread = if convo.unread_count > 0 {
        format!(" ({} new)", convo.unread_count)
    } else {
        String::new()
    };
    let preview = convo.last_message.as_deref().unwrap_or("");
    format!(
        "{:<20} {:<10} {}{}  [{}]",
        name, when, preview, unread, convo.other_user_id
    )
}
