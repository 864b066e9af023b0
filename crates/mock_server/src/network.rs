//! Loopback listener and line-based client connections.
//!
//! The first line a client sends is its player name; every later line is a
//! chat message. Both go through the server's method table.

use crate::server::MockServer;
use hook_system::{Args, InjectableExt, MethodError};
use serde_json::{json, Value};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Weak;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Binds `127.0.0.1:port` with `SO_REUSEADDR`.
pub(crate) fn bind(port: u16) -> std::io::Result<TcpListener> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&address.into())?;
    socket.listen(128)?;
    TcpListener::from_std(socket.into())
}

pub(crate) async fn accept_loop(
    server: Weak<MockServer>,
    listener: TcpListener,
    shutdown: broadcast::Sender<()>,
) {
    let mut stop = shutdown.subscribe();
    loop {
        tokio::select! {
            _ = stop.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Connection from {}", peer);
                    tokio::spawn(handle_connection(server.clone(), stream, peer, shutdown.subscribe()));
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
        }
    }
}

async fn handle_connection(
    server: Weak<MockServer>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) {
    let Some(mut relay) = server.upgrade().map(|s| s.subscribe_relay()) else {
        return;
    };
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut player: Option<String> = None;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                let _ = write_line(&mut writer, "server closing").await;
                return;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Read from {} failed: {}", peer, e);
                        break;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let response = if let Some(name) = player.clone() {
                    match call(&server, "chat", vec![json!(name), json!(line)]).await {
                        Ok(_) => None,
                        Err(e) => Some(format!("error: {e}")),
                    }
                } else {
                    match call(&server, "join", vec![json!(line)]).await {
                        Ok(welcome) => {
                            player = Some(line.to_string());
                            Some(text_of(welcome))
                        }
                        Err(e) => Some(format!("error: {e}")),
                    }
                };
                if let Some(response) = response {
                    if write_line(&mut writer, &response).await.is_err() {
                        break;
                    }
                }
            }
            relayed = relay.recv() => match relayed {
                Ok(text) => {
                    if write_line(&mut writer, &text).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Client {} skipped {} relayed lines", peer, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    if let Some(name) = player {
        let _ = call(&server, "leave", vec![json!(name)]).await;
    }
    debug!("Connection from {} closed", peer);
}

async fn call(server: &Weak<MockServer>, method: &str, args: Args) -> Result<Value, MethodError> {
    let server = server
        .upgrade()
        .ok_or_else(|| MethodError::failed("server is gone"))?;
    let reply = server.invoke(method, args)?;
    reply.resolve().await
}

fn text_of(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n").await
}
