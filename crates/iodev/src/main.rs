pub mod config;
pub mod pipeline;
pub mod registry;

use config::AppConfig;
use config_rs::{Config, File};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "iodev=debug,iodev_core=info,iodev_stream=info,iodev_sims=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() != 2 {
        warn!("only one parameter, the config file, is expected.");
        warn!("got {}", args.join(","));
    } else if let Some(cfg_name) = args.get(1).map(|o| o.as_str()) {
        let config_res = Config::builder()
            .add_source(File::with_name(cfg_name))
            .build()
            .and_then(|config| config.try_deserialize::<AppConfig>());

        match config_res {
            Ok(config) => {
                info!("iodev starting up!");
                if let Some(ref name) = config.metadata.name {
                    info!("name: {name}")
                }
                if let Some(ref descrip) = config.metadata.description {
                    info!("description: {descrip}")
                }

                let cancel = CancellationToken::new();
                {
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        match tokio::signal::ctrl_c().await {
                            Ok(()) => info!("interrupt received, stopping devices"),
                            Err(err) => error!("unable to listen for interrupt: {err}"),
                        }
                        cancel.cancel();
                    });
                }

                match config.start(cancel).await {
                    Ok(registry) => info!("iodev shut down! devices: {:?}", registry.names()),
                    Err(err) => error!("iodev exited with an error: {:?}", err),
                }
            }
            Err(err) => {
                error!("Error starting iodev. Failed to parse config: {:?}", err);
            }
        }
    }
}
