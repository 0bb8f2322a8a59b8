use anyhow::Context;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use parley_sync::{
    HttpApi, SessionController, SessionHandle, SessionUpdate, SyncConfig, WsConnector,
};
use parley_types::UserId;

const HELP: &str = "\
commands:
  /users            refresh the user directory
  /open <user-id>   open the chat with a user
  /attach <url>     send an uploaded attachment
  /avatar <path>    upload a profile picture
  /typing           signal a keystroke without sending
  /connect          reconnect
  /disconnect       drop the connection
  /quit             exit
anything else is sent as a message to the open chat";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,parley_sync=debug".into()),
        )
        .init();

    // Config
    let config = SyncConfig::from_env()?;
    let token = std::env::var("PARLEY_TOKEN").context("PARLEY_TOKEN is not set")?;
    let local: UserId = std::env::var("PARLEY_USER_ID")
        .context("PARLEY_USER_ID is not set")?
        .into();

    info!(api = %config.api_url, gateway = %config.gateway_url, user_id = %local, "starting parley");

    let api = HttpApi::new(config.api_url.clone(), token);
    let connector = WsConnector::new(config.gateway_url.clone(), config.heartbeat);
    let (session, handle, updates) = SessionController::new(config, local, connector, api);

    let session_task = tokio::spawn(session.run());
    tokio::spawn(print_updates(updates));

    handle.connect();
    handle.refresh_users();
    println!("{HELP}");

    read_commands(&handle).await?;

    drop(handle);
    let _ = session_task.await;
    info!("bye");
    Ok(())
}

/// One parsed stdin line.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Skip,
    Quit,
    Help,
    Users,
    Connect,
    Disconnect,
    Typing,
    Open(&'a str),
    Attach(&'a str),
    Avatar(&'a str),
    Unknown,
    Send(&'a str),
}

fn parse_line(line: &str) -> Command<'_> {
    let line = line.trim();
    let (cmd, arg) = match line.split_once(' ') {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (line, ""),
    };

    match cmd {
        "" => Command::Skip,
        "/quit" => Command::Quit,
        "/help" => Command::Help,
        "/users" => Command::Users,
        "/connect" => Command::Connect,
        "/disconnect" => Command::Disconnect,
        "/typing" => Command::Typing,
        "/open" if !arg.is_empty() => Command::Open(arg),
        "/attach" if !arg.is_empty() => Command::Attach(arg),
        "/avatar" if !arg.is_empty() => Command::Avatar(arg),
        _ if cmd.starts_with('/') => Command::Unknown,
        _ => Command::Send(line),
    }
}

async fn read_commands(handle: &SessionHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Command::Skip => {}
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Users => {
                handle.refresh_users();
            }
            Command::Connect => {
                handle.connect();
            }
            Command::Disconnect => {
                handle.disconnect();
            }
            Command::Typing => {
                handle.input_changed();
            }
            Command::Open(user) => {
                handle.open_chat(UserId::from(user));
            }
            Command::Attach(reference) => {
                handle.send_attachment(reference);
            }
            Command::Avatar(path) => match tokio::fs::read(path).await {
                Ok(data) => {
                    let file_name = std::path::Path::new(path)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "avatar".into());
                    handle.upload_avatar(file_name, Bytes::from(data));
                }
                Err(e) => warn!("cannot read {}: {}", path, e),
            },
            Command::Unknown => println!("unknown command, try /help"),
            Command::Send(text) => {
                handle.send_text(text);
            }
        }
    }
    Ok(())
}

async fn print_updates(mut updates: mpsc::UnboundedReceiver<SessionUpdate>) {
    while let Some(update) = updates.recv().await {
        match update {
            SessionUpdate::State(state) => println!("* {:?}", state),
            SessionUpdate::Error(e) => println!("! {}", e),
            SessionUpdate::UsersLoaded(users) => {
                for user in users {
                    println!("  {} ({})", user.name, user.id);
                }
            }
            SessionUpdate::Presence(online) => {
                let names: Vec<&str> = online.iter().map(UserId::as_str).collect();
                println!("* online: {}", names.join(", "));
            }
            SessionUpdate::ChatOpened { chat, peer } => match peer {
                Some(peer) => println!("* chat {} with {}", chat.id, peer),
                None => println!("* chat {}", chat.id),
            },
            SessionUpdate::Messages { chat_id, messages } => {
                println!("--- {} ---", chat_id);
                for msg in messages {
                    let body = msg
                        .content
                        .as_deref()
                        .or(msg.attachment.as_deref())
                        .unwrap_or_default();
                    let tick = if msg.is_seen_by_other() { " ✓" } else { "" };
                    println!(
                        "[{}] {}: {}{}",
                        msg.created_at.format("%H:%M"),
                        msg.sender,
                        body,
                        tick
                    );
                }
            }
            SessionUpdate::RemoteTyping { typing: true, .. } => println!("* typing..."),
            SessionUpdate::RemoteTyping { typing: false, .. } => {}
            SessionUpdate::ProfileUpdated(user) => {
                println!("* avatar: {}", user.avatar.unwrap_or_default())
            }
        }
    }
}
