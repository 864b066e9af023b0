//! Real loopback clients against a running mock server.

use hook_system::{Callback, InjectionEngine, InstanceRegistry, DEFAULT_PRIORITY};
use mock_server::{ServerEvent, ServerManager, ServerRecord, ServerStore, SERVER_KIND};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

async fn connect(address: &str) -> (Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf) {
    let stream = TcpStream::connect(address).await.unwrap();
    let (reader, writer) = stream.into_split();
    (BufReader::new(reader).lines(), writer)
}

async fn send(writer: &mut OwnedWriteHalf, line: &str) {
    writer.write_all(format!("{line}\n").as_bytes()).await.unwrap();
}

async fn next(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> String {
    timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("timed out waiting for a line")
        .unwrap()
        .expect("connection closed")
}

async fn started(dir: &TempDir, name: &str) -> (ServerManager, String) {
    let manager = ServerManager::new(ServerStore::new(dir.path()), Arc::new(InstanceRegistry::new()));
    manager
        .create(ServerRecord::new(name, 0, "Welcome aboard"))
        .await
        .unwrap();
    let address = manager.start(name).await.unwrap();
    (manager, address)
}

#[tokio::test]
async fn test_join_chat_and_leave_over_tcp() {
    let dir = TempDir::new().unwrap();
    let (manager, address) = started(&dir, "wire").await;
    let mut events = manager.subscribe();

    let (mut lines, mut writer) = connect(&address).await;
    send(&mut writer, "ann").await;
    assert_eq!(next(&mut lines).await, "Welcome to wire! Welcome aboard");

    send(&mut writer, "hello there").await;
    assert_eq!(next(&mut lines).await, "<ann> hello there");

    let server = manager.get("wire").unwrap();
    assert_eq!(server.players(), vec!["ann"]);
    assert_eq!(server.history()[0].text, "hello there");

    drop(writer);
    drop(lines);
    let left = timeout(Duration::from_secs(5), async {
        loop {
            if let ServerEvent::PlayerLeft { player, .. } = events.recv().await.unwrap() {
                return player;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(left, "ann");

    manager.shutdown_all().await;
}

#[tokio::test]
async fn test_chat_from_clients_is_interceptable() {
    let dir = TempDir::new().unwrap();
    let (manager, address) = started(&dir, "filtered").await;
    let engine = InjectionEngine::new();
    let target = manager.registry().get_instance(SERVER_KIND, "filtered").unwrap();

    engine
        .inject(
            target.as_ref(),
            "chat",
            Callback::around(|ctx| {
                let mut args = ctx.args.clone();
                if let Some(Value::String(text)) = args.get_mut(1) {
                    *text = text.replace("darn", "****");
                }
                Ok(ctx.proceed_with(args)?)
            }),
            DEFAULT_PRIORITY,
        )
        .unwrap();

    let (mut lines, mut writer) = connect(&address).await;
    send(&mut writer, "bob").await;
    next(&mut lines).await;
    send(&mut writer, "darn it").await;
    assert_eq!(next(&mut lines).await, "<bob> **** it");

    engine.clear_all();
    let message = manager.chat("filtered", "console", "darn").await.unwrap();
    assert_eq!(message.text, "darn");
    assert_eq!(
        serde_json::to_value(&message).unwrap()["sender"],
        json!("console")
    );

    manager.shutdown_all().await;
}

#[tokio::test]
async fn test_second_name_is_rejected_while_online() {
    let dir = TempDir::new().unwrap();
    let (manager, address) = started(&dir, "names").await;

    let (mut first_lines, mut first) = connect(&address).await;
    send(&mut first, "cid").await;
    next(&mut first_lines).await;

    let (mut second_lines, mut second) = connect(&address).await;
    send(&mut second, "cid").await;
    assert!(next(&mut second_lines).await.starts_with("error:"));

    manager.shutdown_all().await;
}
