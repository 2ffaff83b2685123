//! Two clients editing one deck through an in-process hub.

use std::time::Duration;

use deck_collab::{ClientConfig, CollabClient, JoinedPresentation, LocalUser, LoopbackConnector, LoopbackHub};
use deck_core::{Presentation, Role, Slide, User};

const PRESENTATION: &str = "demo";

async fn open(hub: &LoopbackHub, id: &str, nickname: &str) -> CollabClient<LoopbackConnector> {
    let mut client = CollabClient::new(ClientConfig::default(), LocalUser::new(id, nickname), hub.connector());
    client
        .open_presentation(JoinedPresentation {
            presentation: Presentation {
                id: PRESENTATION.into(),
                name: "Demo deck".into(),
                creator_id: "ada".into(),
            },
            slides: hub.slides(PRESENTATION),
            users: hub.users(PRESENTATION),
        })
        .await;
    client.connect().await;
    client
}

fn step(title: &str) {
    println!("\n── {title}");
}

fn summary(name: &str, client: &CollabClient<LoopbackConnector>) {
    let session = client.session();
    let role = session.role().map_or("none", Role::as_str);
    println!(
        "   {name} ({role}, {:?}, {} queued):",
        client.connection_state(),
        client.offline_queue().len()
    );
    for slide in session.store().slides() {
        for block in &slide.content {
            println!(
                "     slide {} · {} at ({}, {}) {}×{} {:?}",
                slide.index, block.id, block.x, block.y, block.width, block.height, block.content
            );
        }
    }
}

pub async fn run() {
    let hub = LoopbackHub::new();
    hub.host_presentation(
        Presentation {
            id: PRESENTATION.into(),
            name: "Demo deck".into(),
            creator_id: "ada".into(),
        },
        vec![Slide::new("s1", 0)],
        vec![User::new("ada", "Ada", Role::Creator), User::new("bob", "Bob", Role::Viewer)],
    );

    let mut ada = open(&hub, "ada", "Ada").await;
    let mut bob = open(&hub, "bob", "Bob").await;
    ada.pump().await;

    step("Ada adds a text block and types into it");
    let Some(block) = ada.add_text_block().await else {
        log::error!("Ada could not add a block");
        return;
    };
    let id = block.id;
    ada.edit_text_content(&id, "Hello from Ada");
    tokio::time::sleep(ada.config().debounce_window + Duration::from_millis(50)).await;
    ada.pump().await;
    bob.pump().await;
    summary("Bob", &bob);

    step("Bob is a viewer, so his move is ignored");
    let moved = bob.move_text_block(&id, 400, 400).await;
    println!("   move accepted: {}", moved.is_some());

    step("Ada promotes Bob to editor");
    ada.change_user_role("bob", Role::Editor).await;
    bob.pump().await;
    bob.move_text_block(&id, 300, 200).await;
    ada.pump().await;
    summary("Ada", &ada);

    step("Ada moves the block while Bob is editing it");
    bob.begin_edit(&id);
    ada.move_text_block(&id, 50, 50).await;
    bob.pump().await;
    println!("   deferred on Bob's side: {}", bob.reconciler().deferred(&id).is_some());
    summary("Bob", &bob);
    bob.end_edit().await;
    println!("   Bob stops editing; the deferred move lands");
    summary("Bob", &bob);

    step("The hub goes down; Ada keeps working offline");
    hub.set_online(false);
    ada.pump().await;
    bob.pump().await;
    ada.resize_text_block(&id, 320, 90).await;
    ada.add_text_block().await;
    summary("Ada", &ada);

    step("The hub comes back; queued edits replay after rejoin");
    hub.set_online(true);
    tokio::time::sleep(ada.config().reconnect_base_delay + Duration::from_millis(100)).await;
    ada.pump().await;
    bob.pump().await;
    bob.pump().await;
    summary("Ada", &ada);
    summary("Bob", &bob);

    ada.shutdown().await;
    bob.shutdown().await;
}
