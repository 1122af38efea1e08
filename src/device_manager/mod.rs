pub mod command;
pub mod config;

use command::Command;
use config::ManagerConfig;

use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use moka::future::Cache;
use serde_json::{json, Value};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info};

use crate::{
    device::{value::RawValue, Attached, Moveable},
    error::DeviceError,
};

type Devices = Arc<RwLock<IndexMap<String, Attached>>>;

#[derive(Clone)]
struct Cached {
    at: Instant,
    response: Value,
}

/// Owns the named devices of an instrument and executes commands on them.
///
/// Commands arrive over a channel; every command gets its own task, so a
/// blocking move does not hold up reads of other devices.
pub struct DeviceManager {
    devices: Devices,
    cmd_sender: mpsc::Sender<Command>,
    cache: Cache<String, Cached>,
    config: ManagerConfig,
}

impl DeviceManager {
    pub fn new(config: ManagerConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.default_ttl())
            .build();

        let (tx, rx) = mpsc::channel::<Command>(config.command_buffer.max(1));

        let devices = Arc::new(RwLock::new(IndexMap::new()));

        tokio::spawn(Self::command_loop(devices.clone(), cache.clone(), rx));

        DeviceManager {
            devices,
            cmd_sender: tx,
            cache,
            config,
        }
    }

    pub async fn register_device(&self, device: Attached) -> Result<()> {
        let mut devices = self.devices.write().await;
        let name = device.name().to_string();
        if devices.contains_key(&name) {
            return Err(anyhow!("Device already registered: {}", name));
        }
        info!("Registered device {}", name);
        devices.insert(name, device);
        Ok(())
    }

    pub async fn register_devices(&self, devices: impl IntoIterator<Item = Attached>) -> Result<()> {
        for device in devices {
            self.register_device(device).await?;
        }
        Ok(())
    }

    pub async fn unregister_device(&self, name: &str) -> Result<()> {
        let mut devices = self.devices.write().await;
        if devices.shift_remove(name).is_some() {
            Self::invalidate(&self.cache, name).await;
            info!("Unregistered device {}", name);
        }
        Ok(())
    }

    pub async fn send_command(&self, cmd: Command) -> Result<()> {
        self.cmd_sender.send(cmd).await?;
        Ok(())
    }

    /// Send a command and wait for its result.
    pub async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<Value>>) -> Command,
    ) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.send_command(make(tx)).await?;
        rx.await?
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    async fn command_loop(
        devices: Devices,
        cache: Cache<String, Cached>,
        mut rx: mpsc::Receiver<Command>,
    ) {
        while let Some(cmd) = rx.recv().await {
            let devices = devices.clone();
            let cache = cache.clone();
            tokio::spawn(async move { Self::dispatch(&devices, &cache, cmd).await });
        }
        debug!("Command channel closed");
    }

    async fn dispatch(devices: &Devices, cache: &Cache<String, Cached>, cmd: Command) {
        match cmd {
            Command::Move {
                device,
                target,
                wait,
                resp,
            } => {
                let result = Self::handle_move(devices, cache, &device, target, wait).await;
                let _ = resp.send(result);
            }
            Command::Read {
                device,
                maxage,
                resp,
            } => {
                let result = Self::handle_read(devices, cache, &device, maxage).await;
                let _ = resp.send(result);
            }
            Command::Status {
                device,
                maxage,
                resp,
            } => {
                let result = Self::handle_status(devices, cache, &device, maxage).await;
                let _ = resp.send(result);
            }
            Command::IsAllowed {
                device,
                target,
                resp,
            } => {
                let result = Self::handle_is_allowed(devices, &device, target).await;
                let _ = resp.send(result);
            }
            Command::Stop { device, resp } => {
                let result = Self::handle_stop(devices, cache, &device).await;
                let _ = resp.send(result);
            }
            Command::Reset { device, resp } => {
                let result = Self::handle_reset(devices, cache, &device).await;
                let _ = resp.send(result);
            }
            Command::Wait { device, resp } => {
                let result = Self::handle_wait(devices, cache, &device).await;
                let _ = resp.send(result);
            }
            Command::ListDevices { resp } => {
                let result = Self::handle_list_devices(devices).await;
                let _ = resp.send(result);
            }
        }
    }

    async fn lookup(devices: &Devices, name: &str) -> Result<Attached> {
        devices
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("Device not found: {}", name))
    }

    async fn lookup_moveable(devices: &Devices, name: &str) -> Result<Arc<dyn Moveable>> {
        let device = Self::lookup(devices, name).await?;
        match device.as_moveable() {
            Some(dev) => Ok(dev.clone()),
            None => Err(DeviceError::invalid_value(name, "device is read-only").into()),
        }
    }

    fn value_key(device: &str) -> String {
        format!("{}::value", device)
    }

    fn status_key(device: &str) -> String {
        format!("{}::status", device)
    }

    /// A cached response no older than `maxage`. Zero never hits.
    async fn cached(cache: &Cache<String, Cached>, key: &str, maxage: Duration) -> Option<Value> {
        if maxage.is_zero() {
            return None;
        }
        let entry = cache.get(key).await?;
        (entry.at.elapsed() <= maxage).then_some(entry.response)
    }

    async fn remember(cache: &Cache<String, Cached>, key: String, response: &Value) {
        cache
            .insert(
                key,
                Cached {
                    at: Instant::now(),
                    response: response.clone(),
                },
            )
            .await;
    }

    async fn invalidate(cache: &Cache<String, Cached>, device: &str) {
        cache.invalidate(&Self::value_key(device)).await;
        cache.invalidate(&Self::status_key(device)).await;
    }

    async fn handle_move(
        devices: &Devices,
        cache: &Cache<String, Cached>,
        device: &str,
        target: RawValue,
        wait: bool,
    ) -> Result<Value> {
        let dev = Self::lookup_moveable(devices, device).await?;
        Self::invalidate(cache, device).await;
        dev.start(target.clone()).await?;

        let mut response = json!({"device": device, "action": "move", "target": target});
        if wait {
            let value = dev.wait().await?;
            Self::invalidate(cache, device).await;
            response["value"] = serde_json::to_value(&value)?;
        }
        Ok(response)
    }

    async fn handle_read(
        devices: &Devices,
        cache: &Cache<String, Cached>,
        device: &str,
        maxage: Duration,
    ) -> Result<Value> {
        let key = Self::value_key(device);
        if let Some(response) = Self::cached(cache, &key, maxage).await {
            return Ok(response);
        }

        let dev = Self::lookup(devices, device).await?;
        let value = dev.read(maxage).await?;
        let response = json!({
            "device": device,
            "value": value,
            "formatted": dev.format(&value),
        });
        Self::remember(cache, key, &response).await;
        Ok(response)
    }

    async fn handle_status(
        devices: &Devices,
        cache: &Cache<String, Cached>,
        device: &str,
        maxage: Duration,
    ) -> Result<Value> {
        let key = Self::status_key(device);
        if let Some(response) = Self::cached(cache, &key, maxage).await {
            return Ok(response);
        }

        let dev = Self::lookup(devices, device).await?;
        let status = dev.status(maxage).await?;
        let response = json!({"device": device, "status": status});
        Self::remember(cache, key, &response).await;
        Ok(response)
    }

    async fn handle_is_allowed(devices: &Devices, device: &str, target: RawValue) -> Result<Value> {
        let dev = Self::lookup(devices, device).await?;
        let verdict = match dev.as_moveable() {
            Some(dev) => dev.is_allowed(&target).await,
            None => Err("device is read-only".to_string()),
        };
        Ok(match verdict {
            Ok(()) => json!({"device": device, "target": target, "allowed": true}),
            Err(reason) => {
                json!({"device": device, "target": target, "allowed": false, "reason": reason})
            }
        })
    }

    async fn handle_stop(
        devices: &Devices,
        cache: &Cache<String, Cached>,
        device: &str,
    ) -> Result<Value> {
        let dev = Self::lookup_moveable(devices, device).await?;
        dev.stop().await?;
        Self::invalidate(cache, device).await;
        Ok(json!({"device": device, "action": "stop"}))
    }

    async fn handle_reset(
        devices: &Devices,
        cache: &Cache<String, Cached>,
        device: &str,
    ) -> Result<Value> {
        let dev = Self::lookup(devices, device).await?;
        dev.reset().await?;
        Self::invalidate(cache, device).await;
        Ok(json!({"device": device, "action": "reset"}))
    }

    async fn handle_wait(
        devices: &Devices,
        cache: &Cache<String, Cached>,
        device: &str,
    ) -> Result<Value> {
        let dev = Self::lookup_moveable(devices, device).await?;
        let value = dev.wait().await?;
        Self::invalidate(cache, device).await;
        Ok(json!({"device": device, "value": value}))
    }

    async fn handle_list_devices(devices: &Devices) -> Result<Value> {
        let devices = devices.read().await;
        let listing: Vec<Value> = devices
            .values()
            .map(|dev| {
                let kind = match dev {
                    Attached::Moveable(_) => "moveable",
                    Attached::Readable(_) => "readable",
                };
                json!({"name": dev.name(), "kind": kind})
            })
            .collect();
        Ok(json!({"devices": listing}))
    }
}
