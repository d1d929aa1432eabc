use std::time::Duration;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use hush_client::{
    ChatConnection, ChatEvent, ClientConfig, CloseKind, ConnectionState, CredentialStore, Origin,
    RoomApi,
};

const USAGE: &str = "usage: hush-chat create | join <room-id> | <room-hash>";
const MISSING_CREDENTIALS: &str = "set HUSH_USERNAME and HUSH_PASSWORD";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // stderr, so logs don't interleave with the chat on stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hush_client=info".into()),
        )
        .init();

    let config = ClientConfig::from_env()?;
    let store = CredentialStore::from_env();
    let api = RoomApi::new(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let room_hash = match args.as_slice() {
        ["create"] => {
            let creds = store.load().context(MISSING_CREDENTIALS)?;
            let room = api.create_room(creds.username(), creds.password()).await?;
            println!("Room created. Share this code: {}", room.room_id);
            room.room_hash
        }
        ["join", room_id] => {
            let creds = store.load().context(MISSING_CREDENTIALS)?;
            api.join_room(room_id, creds.username(), creds.password())
                .await?
                .room_hash
        }
        [room_hash] => room_hash.to_string(),
        _ => bail!(USAGE),
    };

    let (chat, mut events) =
        ChatConnection::connect(&config, &room_hash, store.load().unwrap_or_default());
    let mut state = chat.watch_state();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = stdin.next_line(), if stdin_open => match line? {
                Some(line) if line.trim() == "/logout" => {
                    chat.logout();
                    store.clear();
                }
                Some(line) => {
                    // Refusals come back as a notice event
                    let _ = chat.send(&line);
                }
                None => {
                    stdin_open = false;
                    chat.logout();
                    store.clear();
                }
            },
            event = events.recv() => match event {
                Some(event) => print_event(event)?,
                None => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                match current {
                    ConnectionState::Authenticated => println!("* joined room {}", room_hash),
                    ConnectionState::Closed(kind) => {
                        if let CloseKind::Error(reason) = kind {
                            info!("Session ended: {}", reason);
                        }
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    drain(&mut events).await
}

fn print_event(event: ChatEvent) -> anyhow::Result<()> {
    match event {
        ChatEvent::Message(msg) => {
            let who = match msg.origin {
                Origin::Mine => "you",
                Origin::Other => msg.author.as_str(),
            };
            println!("[{}] {}: {}", msg.timestamp, who, msg.text);
        }
        ChatEvent::Notice(notice) => println!("* {}", notice),
        ChatEvent::Presence(users) => println!("* online: {}", users.join(", ")),
        ChatEvent::Redirect => bail!("no credentials for this session; {}", MISSING_CREDENTIALS),
    }
    Ok(())
}

/// Print what the connection emitted around its close.
async fn drain(events: &mut mpsc::UnboundedReceiver<ChatEvent>) -> anyhow::Result<()> {
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        print_event(event)?;
    }
    Ok(())
}
