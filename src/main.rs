use solar_matrix::options::Options;
use solar_matrix::prelude::*;

#[tokio::main]
async fn main() {
    let options = Options::new();

    let config = ConfigWrapper::new(options.config_file.clone());
    let level = config.as_ref().map(|c| c.loglevel().to_string()).unwrap_or_else(|_| "info".to_string());
    solar_matrix::init_logging(&level);

    let config = config.unwrap_or_else(|err| {
        error!("Failed to load config: {:?}", err);
        std::process::exit(255);
    });

    let channels = Channels::new();

    let shutdown = channels.shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        let _ = shutdown.send(());
    });

    if let Err(e) = solar_matrix::app(options, config, channels).await {
        error!("Application error: {:?}", e);
        std::process::exit(1);
    }
}
