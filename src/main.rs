use log::{error, info, warn};
use std::sync::Arc;

use pinwatch::{GpioConfig, GpioCore, PinCallback, PinEvent};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PINWATCH_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = Arc::new(GpioConfig::load_from_file(&config_path).map_err(std::io::Error::other)?);

    let core = GpioCore::new(config.clone());

    // the rest of the process keeps running without hardware features
    match core.init() {
        Ok(driver) => info!(
            "Using {:?} driver, {} pins configured",
            driver.kind(),
            config.pins.all().len()
        ),
        Err(e) => error!("GPIO disabled: {e}"),
    }

    let on_event: PinCallback = Arc::new(|event: &PinEvent| {
        info!(
            "pin {} -> {:?} ({:?})",
            event.pin, event.current.state, event.previous.state
        );
    });
    let handles = core.watch_configured_pins(on_event).await;
    if handles.is_empty() && core.is_allowed_to_execute() {
        warn!("No pins are being watched");
    }

    info!("Watching pins {:?}, press Ctrl-C to stop", core.watched_pins());
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    core.shutdown().await;

    Ok(())
}
