#![allow(missing_docs)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]

//! Host bridge for the simulated WDB target.
//!
//! TCP clients send one JSON [`Request`] per line and receive JSON
//! [`HostMessage`] lines: the reply to each request, plus a `"notify"` line
//! whenever the target pushes an event notification.

use anyhow::{Context as _, Result};
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use wdb_core::rpc::HostMessage;
use wdb_core::sim::HostEnd;
use wdb_core::{Reply, Request};

/// Default WDB agent port.
pub const DEFAULT_PORT: u16 = 0x4321;

/// How often an idle bridge checks the link for notifications.
const NOTIFY_POLL: Duration = Duration::from_millis(100);

struct BridgeCommand {
    request: Request,
    reply_tx: oneshot::Sender<Result<Reply>>,
}

/// Owns the host end of the link on a worker thread and serializes requests
/// from all clients onto it.
pub struct HostBridge {
    cmd_tx: Sender<BridgeCommand>,
    notify_tx: broadcast::Sender<()>,
}

impl HostBridge {
    pub fn spawn(host: HostEnd, reply_timeout: Duration) -> Result<Self> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<BridgeCommand>();
        let (notify_tx, _) = broadcast::channel(100);

        let worker_notify = notify_tx.clone();
        thread::Builder::new()
            .name("wdb-bridge".to_string())
            .spawn(move || loop {
                match cmd_rx.recv_timeout(NOTIFY_POLL) {
                    Ok(cmd) => {
                        let reply = host.call(cmd.request, reply_timeout);
                        // The client may have gone away.
                        let _ = cmd.reply_tx.send(reply);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                forward_notifies(&host, &worker_notify);
            })
            .context("Failed to start bridge thread")?;

        Ok(Self { cmd_tx, notify_tx })
    }

    /// Send one request to the target and wait for its reply.
    pub async fn call(&self, request: Request) -> Result<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(BridgeCommand { request, reply_tx })
            .context("Bridge thread has stopped")?;
        reply_rx.await.context("Bridge thread dropped the request")?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notify_tx.subscribe()
    }
}

fn forward_notifies(host: &HostEnd, notify_tx: &broadcast::Sender<()>) {
    while host.take_notify() {
        let _ = notify_tx.send(());
    }
    while let Some(message) = host.recv_timeout(Duration::ZERO) {
        match message {
            HostMessage::Notify => {
                let _ = notify_tx.send(());
            }
            HostMessage::Reply { seq, .. } => log::warn!("Discarding late reply {seq}"),
        }
    }
}

/// Bind `host:port` and serve clients until the process exits.
pub async fn run_server(bridge: Arc<HostBridge>, host: &str, port: u16) -> Result<()> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind {host}:{port}"))?;
    log::info!("WDB agent listening on {}", listener.local_addr()?);
    serve(listener, bridge).await
}

pub async fn serve(listener: TcpListener, bridge: Arc<HostBridge>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await.context("Accept failed")?;
        log::info!("Host tool connected from {peer}");
        let bridge = bridge.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(&bridge, stream).await {
                log::warn!("Connection {peer} closed: {e:#}");
            }
        });
    }
}

async fn handle_client(bridge: &HostBridge, stream: TcpStream) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut notifies = bridge.subscribe();
    let mut seq = 0u32;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                seq = seq.wrapping_add(1);
                let reply = match serde_json::from_str::<Request>(&line) {
                    Ok(request) => bridge.call(request).await.unwrap_or_else(|e| Reply::Error(format!("{e:#}"))),
                    Err(e) => Reply::Error(format!("malformed request: {e}")),
                };
                write_message(&mut writer, &HostMessage::Reply { seq, reply }).await?;
            }
            notify = notifies.recv() => match notify {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    write_message(&mut writer, &HostMessage::Notify).await?;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}

async fn write_message(writer: &mut OwnedWriteHalf, message: &HostMessage) -> Result<()> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Connect to an agent, send one request and return its reply. Notifications
/// arriving first are skipped.
pub async fn request(addr: &str, request: &Request) -> Result<Reply> {
    let stream = TcpStream::connect(addr).await.with_context(|| format!("Failed to connect to {addr}"))?;
    let (reader, mut writer) = stream.into_split();

    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str::<HostMessage>(&line)? {
            HostMessage::Reply { reply, .. } => return Ok(reply),
            HostMessage::Notify => log::debug!("Target has pending events"),
        }
    }
    anyhow::bail!("Agent closed the connection without replying")
}
