//! Daemon mode – line-delimited JSON over a Unix socket.
//!
//! Each line a client sends is a `Command`. Every engine event is streamed to
//! every connected client as one JSON line; a command the engine refuses to
//! dispatch is answered with a `DaemonResponse` line.

use anyhow::Context;
use engine::types::{DaemonResponse, ErrorInfo};
use engine::{Command, Engine, ErrorCode};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;

/// Lines queued per client before event forwarding waits on the socket.
const CLIENT_QUEUE: usize = 256;

pub async fn run_daemon(socket_path: PathBuf, engine: Engine) -> anyhow::Result<()> {
    // Remove stale socket if it exists
    let _ = std::fs::remove_file(&socket_path);

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("cannot bind socket {}", socket_path.display()))?;

    eprintln!("datawisectl daemon listening on {}", socket_path.display());
    tracing::info!(socket = %socket_path.display(), "daemon started");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let (reader, writer) = stream.into_split();
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_client(reader, writer, engine).await {
                            tracing::warn!(error = %e, "client connection ended with an error");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            _ = &mut shutdown => {
                tracing::info!(active = engine.active_tasks().len(), "shutting down");
                engine.cancel_all();
                break;
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Serve one client until it closes its side of the connection.
pub async fn serve_client<R, W>(reader: R, writer: W, engine: Engine) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE);

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(mut line) = rx.recv().await {
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
        let _ = writer.flush().await;
    });

    let mut events = engine.subscribe();
    let event_tx = tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot encode event");
                    continue;
                }
            };
            if event_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(response) = handle_line(&line, &engine) {
            if tx.send(serde_json::to_string(&response)?).await.is_err() {
                break;
            }
        }
    }

    forwarder.abort();
    drop(tx);
    let _ = writer_task.await;
    Ok(())
}

/// Dispatch one request line; `Some` only when it was refused.
fn handle_line(line: &str, engine: &Engine) -> Option<DaemonResponse> {
    let command: Command = match serde_json::from_str(line) {
        Ok(c) => c,
        Err(e) => {
            return Some(DaemonResponse {
                task_id: None,
                error: ErrorInfo {
                    code: ErrorCode::InvalidInput,
                    message: format!("invalid command: {}", e),
                },
            });
        }
    };

    let task_id = command.task_id;
    engine.handle(command).err().map(|e| {
        tracing::debug!(task_id, error = %e, "command refused");
        DaemonResponse {
            task_id: Some(task_id),
            error: ErrorInfo {
                code: e.error_code(),
                message: e.to_string(),
            },
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{EngineConfig, Event, EventKind};

    #[tokio::test]
    async fn test_handle_line_rejections() {
        let engine = Engine::new(EngineConfig::default()).unwrap();

        let resp = handle_line("not json", &engine).unwrap();
        assert_eq!(resp.task_id, None);
        assert_eq!(resp.error.code, ErrorCode::InvalidInput);

        let resp = handle_line(
            r#"{"task_id": 5, "payload": {"type": "execute_sql", "sql": ""}}"#,
            &engine,
        )
        .unwrap();
        assert_eq!(resp.task_id, Some(5));
        assert_eq!(resp.error.code, ErrorCode::InvalidInput);

        assert!(handle_line(
            r#"{"task_id": 6, "payload": {"type": "cancel", "task_id": 600}}"#,
            &engine
        )
        .is_none());
    }

    #[tokio::test]
    async fn test_client_receives_events_and_refusals() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let served = tokio::spawn(serve_client(server_read, server_write, engine));

        let (client_read, mut client_write) = tokio::io::split(client);
        client_write
            .write_all(b"{\"task_id\": 1, \"payload\": {\"type\": \"execute_sql\", \"sql\": \"SELECT 1 AS num\"}}\n{\"bogus\": true}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let mut saw_refusal = false;
        let mut saw_finished = false;
        while !(saw_refusal && saw_finished) {
            let line = lines.next_line().await.unwrap().expect("stream open");
            if let Ok(resp) = serde_json::from_str::<DaemonResponse>(&line) {
                assert_eq!(resp.error.code, ErrorCode::InvalidInput);
                saw_refusal = true;
                continue;
            }
            let event: Event = serde_json::from_str(&line).unwrap();
            assert_eq!(event.task_id, 1);
            if let EventKind::Finished { row_count, .. } = event.kind {
                assert_eq!(row_count, 1);
                saw_finished = true;
            }
        }

        // Closing both halves ends the server's read loop.
        drop(lines);
        drop(client_write);
        served.await.unwrap().unwrap();
    }
}
