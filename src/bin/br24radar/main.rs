extern crate tokio;

use br24radar::radar::RadarError;
use br24radar::{Cli, PACKAGE, VERSION, start_session};
use clap::Parser;
use env_logger::Env;
use log::info;
use miette::Result;
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let log_level = args.verbose.log_level_filter();
    env_logger::Builder::from_env(Env::default())
        .filter_level(log_level)
        .init();

    info!("{} {} loglevel {}", PACKAGE, VERSION, log_level);

    Toplevel::new(|s| async move {
        s.start(SubsystemBuilder::new(
            "Radar",
            |a: SubsystemHandle| async move {
                let _session = start_session(&a, args)?;
                a.on_shutdown_requested().await;
                Ok::<(), RadarError>(())
            },
        ));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_millis(5000))
    .await
    .map_err(Into::into)
}
