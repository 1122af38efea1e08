use anyhow::Result;
use devswitch::{
    device::value::RawValue,
    device_manager::{command::Command, DeviceManager},
    logging,
    setup::Setup,
    socket_server::SocketServer,
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

type Reply = tokio::sync::oneshot::Sender<Result<serde_json::Value>>;

async fn report(manager: &DeviceManager, what: &str, command: impl FnOnce(Reply) -> Command) {
    match manager.request(command).await {
        Ok(value) => info!("{}: {}", what, value),
        Err(e) => error!("{} failed: {}", what, e),
    }
}

fn move_to(device: &str, target: &str) -> impl FnOnce(Reply) -> Command {
    let device = device.to_string();
    let target = RawValue::from(target);
    move |resp| Command::Move {
        device,
        target,
        wait: true,
        resp,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/instrument.toml".to_string());
    let setup = Setup::load(&path)?;
    logging::init(&setup.logging)?;

    info!("Starting virtual instrument from {}", path);

    let registry = setup.build().await?;
    let manager = Arc::new(DeviceManager::new(setup.manager.clone()));
    manager.register_devices(registry.into_devices()).await?;

    let mut socket_server = SocketServer::new(setup.server.clone(), manager.clone());
    socket_server.start().await?;

    info!("Socket server started at {}", setup.server.socket_path);
    info!("You can connect using tools like socat:");
    info!("  socat - UNIX-CONNECT:{}", setup.server.socket_path);

    report(&manager, "mono -> down", move_to("mono", "down")).await;
    report(&manager, "mono_locked -> up", move_to("mono_locked", "up")).await;
    report(&manager, "attenuator -> x100", move_to("attenuator", "x100")).await;
    report(&manager, "selector -> tilted", move_to("selector", "tilted")).await;
    report(&manager, "det_pos -> far", move_to("det_pos", "far")).await;
    report(&manager, "flipper -> switch", move_to("flipper", "switch")).await;
    report(&manager, "collimation -> slit", move_to("collimation", "slit")).await;
    report(&manager, "hv -> standby", move_to("hv", "standby")).await;
    report(&manager, "slit -> bogus (expected to fail)", move_to("slit", "bogus")).await;

    for device in ["mono", "attenuator", "det_pos", "flipper", "col_slit", "hv", "slit", "wavelength"] {
        report(&manager, device, |resp| Command::Status {
            device: device.to_string(),
            maxage: Duration::ZERO,
            resp,
        })
        .await;
    }

    info!(
        r#"  echo '{{"type": "read", "device": "mono"}}' | socat - UNIX-CONNECT:{}"#,
        setup.server.socket_path
    );
    info!("Server runs until Ctrl-C");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    socket_server.shutdown().await?;
    info!("Virtual instrument shutdown complete");

    Ok(())
}
