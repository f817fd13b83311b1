use std::path::Path;
use std::sync::Arc;

use color_eyre::Result;
use log::info;

use lifx_bridge::memory::MemoryRegistry;
use lifx_bridge::server::Server;
use lifx_bridge::settings::read_settings;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let path = std::env::args().nth(1).unwrap_or_else(|| "Settings".to_owned());
    let settings = read_settings(&path)?;
    init_logging(settings.log_level.as_deref());

    info!("starting LIFX bridge with {} configured devices", settings.devices.len());
    let state_file = settings
        .state_file
        .clone()
        .unwrap_or_else(|| Path::new(&path).with_file_name("lifx-bridge-state.json"));
    let registry = Arc::new(MemoryRegistry::open(&settings.devices, &state_file)?);
    let server = Server::new(&settings.bridge, registry)?;
    let shutdown = server.shutdown_handle();
    let mut worker = tokio::task::spawn_blocking(move || server.run());

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("shutting down LIFX bridge");
            shutdown.trigger();
            worker.await?;
        }
        res = &mut worker => res?,
    }

    Ok(())
}

/// RUST_LOG wins over the level in the settings file.
fn init_logging(level: Option<&str>) {
    let mut builder = pretty_env_logger::formatted_builder();
    match std::env::var("RUST_LOG") {
        Ok(filters) => builder.parse_filters(&filters),
        Err(_) => builder.parse_filters(level.unwrap_or("info")),
    };
    builder.init();
}
