use ble_controller::domain::settings::SettingsService;
use ble_controller::infrastructure::bluetooth::btleplug_adapter::BtleplugAdapter;
use ble_controller::infrastructure::logging::init_logger;
use ble_controller::presentation::{ConsoleApp, ConsolePolicy};
use ble_controller::{ActivationOptions, ChannelDelegate, ControllerConfig, ControllerService};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!(
        "Starting BLE controller (settings: {})",
        settings_service.path().display()
    );

    let adapter = BtleplugAdapter::new(settings.adapter_index).await?;
    let (delegate, mut notifications) = ChannelDelegate::new();
    let handle = ControllerService::activate(
        Box::new(adapter),
        Box::new(delegate),
        ActivationOptions {
            runtime: None,
            config: ControllerConfig::from(&settings),
        },
    )?;

    let app = ConsoleApp::new(
        handle.clone(),
        ConsolePolicy::from(&settings),
        std::io::stdout(),
    );
    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    app.run_until(&mut notifications, stop).await?;

    info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}
