/*!
 * IPC Server for the harness daemon
 * JSON protocol over Unix socket
 */

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, Notify};
use uuid::Uuid;

use crate::protocol::{Request, RequestEnvelope, Response, ResponseEnvelope};
use crate::worker::Job;

/// Bind the daemon socket, replacing a stale socket file left by a previous run.
pub fn bind(socket_path: &str) -> Result<UnixListener> {
    let path = Path::new(socket_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("failed to remove stale socket {}", socket_path))?;
    }
    UnixListener::bind(path).with_context(|| format!("failed to bind {}", socket_path))
}

pub struct IpcServer {
    listener: UnixListener,
    jobs: mpsc::Sender<Job>,
    shutdown: Arc<Notify>,
}

impl IpcServer {
    pub fn new(listener: UnixListener, jobs: mpsc::Sender<Job>) -> Self {
        Self {
            listener,
            jobs,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Notified by a `Shutdown` request; also usable by the embedding binary.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Serve until a `Shutdown` request or Ctrl-C. Dropping the job sender on
    /// return lets the worker drain and stop.
    pub async fn run(self) -> Result<()> {
        tracing::info!("IPC server listening for connections...");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tracing::debug!("New client connected");
                        let jobs = self.jobs.clone();
                        let shutdown = self.shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, jobs, shutdown).await {
                                tracing::error!("Client error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                },
                _ = self.shutdown.notified() => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn dispatch(request: Request, jobs: &mpsc::Sender<Job>, shutdown: &Notify) -> Response {
    if let Request::Shutdown = request {
        shutdown.notify_one();
        return Response::Ack {
            message: "shutting down".to_string(),
        };
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    if jobs.send((request, reply_tx)).await.is_err() {
        return Response::error("worker is not running");
    }
    reply_rx
        .await
        .unwrap_or_else(|_| Response::error("worker dropped the request"))
}

async fn handle_client(stream: UnixStream, jobs: mpsc::Sender<Job>, shutdown: Arc<Notify>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let request = line.trim();
        if request.is_empty() {
            line.clear();
            continue;
        }
        tracing::debug!("Received request: {}", request);

        let envelope = match serde_json::from_str::<RequestEnvelope>(request) {
            Ok(envelope) => {
                let response = dispatch(envelope.request, &jobs, &shutdown).await;
                ResponseEnvelope::new(envelope.id, response)
            }
            Err(e) => ResponseEnvelope::new(Uuid::nil(), Response::error(format!("malformed request: {}", e))),
        };

        let response = serde_json::to_string(&envelope)?;
        tracing::debug!("Sending response: {}", response);
        write_half.write_all(response.as_bytes()).await?;
        write_half.write_all(b"\n").await?;

        line.clear();
    }

    Ok(())
}
