pub mod config;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    device_manager::{command::Command, DeviceManager},
    protocol::{
        client_command::ClientCommand, parse_command, parse_maxage, serialize_response,
        server_response::ServerResponse,
    },
};
use config::SocketServerConfig;

pub struct SocketServer {
    config: SocketServerConfig,
    manager: Arc<DeviceManager>,
    shutdown_tx: Option<tokio::sync::broadcast::Sender<()>>,
}

impl SocketServer {
    pub fn new(config: SocketServerConfig, manager: Arc<DeviceManager>) -> Self {
        Self {
            config,
            manager,
            shutdown_tx: None,
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        if Path::new(&self.config.socket_path).exists() {
            tokio::fs::remove_file(&self.config.socket_path).await?;
        }

        let listener = UnixListener::bind(&self.config.socket_path)?;
        info!("Socket server listening on: {}", self.config.socket_path);

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let manager = self.manager.clone();
        let max_connections = self.config.max_connections;
        let max_line = self.config.buffer_size;

        tokio::spawn(async move {
            let active_connections = Arc::new(AtomicUsize::new(0));

            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, _addr)) => {
                                let current_connections = active_connections.load(Ordering::Relaxed);
                                if current_connections >= max_connections {
                                    warn!("Maximum connections reached ({}), rejecting new connection", current_connections);
                                    continue;
                                }

                                let new_count = active_connections.fetch_add(1, Ordering::Relaxed) + 1;
                                let client_id = Uuid::new_v4();
                                debug!("Client {} connected. Active connections: {}", client_id, new_count);

                                let manager_clone = manager.clone();
                                let mut shutdown_rx_clone = shutdown_rx.resubscribe();
                                let active_connections_clone = active_connections.clone();

                                tokio::spawn(async move {
                                    let result = Self::handle_client(stream, manager_clone, max_line, &mut shutdown_rx_clone).await;
                                    if let Err(e) = result {
                                        error!("Client handler error: {}", e);
                                    }

                                    let remaining = active_connections_clone.fetch_sub(1, Ordering::Relaxed) - 1;
                                    debug!("Client disconnected. Active connections: {}", remaining);
                                }.instrument(info_span!("client", id = %client_id)));
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Socket server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(());
        }

        if Path::new(&self.config.socket_path).exists() {
            tokio::fs::remove_file(&self.config.socket_path).await?;
        }

        info!("Socket server shutdown complete");
        Ok(())
    }

    async fn handle_client(
        stream: UnixStream,
        manager: Arc<DeviceManager>,
        max_line: usize,
        shutdown_rx: &mut tokio::sync::broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(max_line));

        loop {
            tokio::select! {
                line_result = framed.next() => {
                    match line_result {
                        Some(Ok(line)) => {
                            debug!("Received command: {}", line);

                            let response = Self::process_command(&line, &manager).await;
                            let response_json = serialize_response(&response)?;

                            if let Err(e) = framed.send(response_json).await {
                                error!("Failed to send response: {}", e);
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            error!("Error reading from client: {}", e);
                            break;
                        }
                        None => {
                            debug!("Client disconnected");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Shutdown signal received, closing client connection");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn process_command(line: &str, manager: &DeviceManager) -> ServerResponse {
        let command = match parse_command(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                return ServerResponse::error(None, format!("Failed to parse command: {}", e));
            }
        };

        let command_id = command.id().cloned();

        let result = Self::execute_command(command, manager).await;

        match result {
            Ok(data) => ServerResponse::success(command_id, data),
            Err(e) => ServerResponse::from_error(command_id, &e),
        }
    }

    async fn execute_command(
        command: ClientCommand,
        manager: &DeviceManager,
    ) -> Result<serde_json::Value> {
        match command {
            ClientCommand::Move {
                device,
                target,
                wait,
                ..
            } => {
                manager
                    .request(|resp| Command::Move {
                        device,
                        target,
                        wait,
                        resp,
                    })
                    .await
            }
            ClientCommand::Read { device, maxage, .. } => {
                let maxage = parse_maxage(maxage)?;
                manager
                    .request(|resp| Command::Read {
                        device,
                        maxage,
                        resp,
                    })
                    .await
            }
            ClientCommand::Status { device, maxage, .. } => {
                let maxage = parse_maxage(maxage)?;
                manager
                    .request(|resp| Command::Status {
                        device,
                        maxage,
                        resp,
                    })
                    .await
            }
            ClientCommand::IsAllowed { device, target, .. } => {
                manager
                    .request(|resp| Command::IsAllowed {
                        device,
                        target,
                        resp,
                    })
                    .await
            }
            ClientCommand::Stop { device, .. } => {
                manager.request(|resp| Command::Stop { device, resp }).await
            }
            ClientCommand::Reset { device, .. } => {
                manager.request(|resp| Command::Reset { device, resp }).await
            }
            ClientCommand::Wait { device, .. } => {
                manager.request(|resp| Command::Wait { device, resp }).await
            }
            ClientCommand::ListDevices { .. } => {
                manager.request(|resp| Command::ListDevices { resp }).await
            }
            ClientCommand::Ping { .. } => Ok(json!({
                "message": "pong",
                "timestamp": chrono::Utc::now().to_rfc3339()
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;
    use crate::{
        device::{testing::MockMoveable, value::RawValue, Attached},
        device_manager::config::ManagerConfig,
        switcher::{config::SwitcherConfig, Switcher},
    };

    async fn roundtrip(path: &Path, lines: &[&str]) -> Vec<serde_json::Value> {
        let stream = UnixStream::connect(path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader).lines();
        let mut responses = Vec::new();
        for line in lines {
            writer.write_all(line.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
            let response = reader.next_line().await.unwrap().unwrap();
            responses.push(serde_json::from_str(&response).unwrap());
        }
        responses
    }

    #[tokio::test]
    async fn test_switcher_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("devswitch.sock");

        let manager = Arc::new(DeviceManager::new(ManagerConfig::default()));
        let motor = Arc::new(MockMoveable::new("changer_m", 14.55));
        let mapping = [("up", 14.55), ("down", 51.3)]
            .iter()
            .map(|(k, v)| (k.to_string(), RawValue::Float(*v)))
            .collect();
        let changer = Switcher::new("changer", SwitcherConfig::new(mapping), motor.clone()).unwrap();
        manager
            .register_devices([
                Attached::Moveable(motor),
                Attached::Moveable(Arc::new(changer)),
            ])
            .await
            .unwrap();

        let mut server = SocketServer::new(
            SocketServerConfig {
                socket_path: socket_path.to_string_lossy().into_owned(),
                ..SocketServerConfig::default()
            },
            manager,
        );
        server.start().await.unwrap();

        let responses = roundtrip(
            &socket_path,
            &[
                r#"{"type": "read", "device": "changer", "id": "1"}"#,
                r#"{"type": "move", "device": "changer", "target": "down", "wait": true}"#,
                r#"{"type": "read", "device": "changer_m"}"#,
                r#"{"type": "move", "device": "changer", "target": "left", "id": "4"}"#,
                r#"{"type": "ping"}"#,
                r#"not json"#,
            ],
        )
        .await;

        assert_eq!(responses[0]["status"], "success");
        assert_eq!(responses[0]["id"], "1");
        assert_eq!(responses[0]["data"]["value"], "up");
        assert_eq!(responses[1]["data"]["value"], "down");
        assert_eq!(responses[2]["data"]["value"], 51.3);
        assert_eq!(responses[3]["status"], "error");
        assert_eq!(responses[3]["code"], "invalid_value");
        assert_eq!(responses[4]["data"]["message"], "pong");
        assert_eq!(responses[5]["status"], "error");

        server.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!socket_path.exists());
    }
}
