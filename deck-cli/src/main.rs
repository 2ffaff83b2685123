//! Deck — terminal client for collaborative slide editing.
//!
//! `deck join <presentation-id>` connects to the configured hub and REST
//! API and reads editing commands from stdin. `deck demo` (the default)
//! runs two clients against an in-process hub and prints what each sees.
//!
//! The local identity comes from `DECK_USER` (`{"id": .., "nickname": ..}`);
//! everything else is configured through the `DECK_*` variables read by
//! [`ClientConfig::from_env`].

mod commands;
mod demo;

use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use uuid::Uuid;

use deck_collab::{ClientConfig, CollabClient, Command, LocalUser, RestClient, UiEvent, WsConnector};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn local_user() -> Result<LocalUser, BoxError> {
    match std::env::var("DECK_USER") {
        Ok(raw) => Ok(LocalUser::from_session_json(&raw)?),
        Err(_) => Ok(LocalUser::new(Uuid::new_v4().to_string(), "Guest")),
    }
}

fn print_event(event: &UiEvent) {
    match event {
        UiEvent::ElementCreated { slide_index, block, .. } => {
            println!("+ [{slide_index}] {} at ({}, {}): {:?}", block.id, block.x, block.y, block.content);
        }
        UiEvent::ElementUpdated { slide_index, block, .. } => {
            println!("~ [{slide_index}] {} at ({}, {}): {:?}", block.id, block.x, block.y, block.content);
        }
        UiEvent::ElementRemoved { slide_index, id, .. } => println!("- [{slide_index}] {id}"),
        UiEvent::ConflictMarked { user_id, .. } => println!("! {user_id} changed the block you are editing"),
        UiEvent::ConnectionStatusChanged(status) => println!("* connection: {status:?}"),
        UiEvent::Notification { message, kind } => println!("* {kind:?}: {message}"),
        UiEvent::RosterChanged { users } => {
            let names: Vec<String> = users.iter().map(|u| format!("{} ({})", u.nickname, u.role)).collect();
            println!("* participants: {}", names.join(", "));
        }
        UiEvent::PermissionsChanged(p) => {
            println!("* can edit: {}, can manage users: {}", p.can_edit, p.can_manage_users);
        }
        other => log::debug!("{other:?}"),
    }
}

async fn run_live(presentation_id: &str) -> Result<(), BoxError> {
    let config = ClientConfig::from_env();
    let user = local_user()?;
    info!("Joining {presentation_id} as {} via {}", user.id, config.hub_url);

    let rest = RestClient::new(config.api_base_url.clone(), config.auth_token.clone());
    let connector = WsConnector::new(config.auth_token.clone());
    let mut client = CollabClient::new(config, user, connector).with_rest(rest);
    let mut events = client.take_event_rx().ok_or("event channel already taken")?;

    client.join_presentation(presentation_id).await?;
    client.connect().await;

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    log::error!("stdin: {e}");
                    break;
                }
            };
            match commands::parse(&line) {
                Ok(Some(command)) => {
                    let quit = command == Command::Shutdown;
                    if tx.send(command).is_err() || quit {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => eprintln!("{e}\n{}", commands::USAGE),
            }
        }
    });

    client.run(rx).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("join") => {
            let id = args.get(1).ok_or("usage: deck join <presentation-id>")?;
            run_live(id).await
        }
        None | Some("demo") => {
            info!("Starting loopback demo...");
            demo::run().await;
            Ok(())
        }
        Some(other) => Err(format!("unknown mode {other:?}; expected `join` or `demo`").into()),
    }
}
