extern crate tokio;

use clap::Parser;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

pub mod brand;
pub mod config;
pub mod navdata;
pub mod network;
pub mod radar;
pub mod session;
pub mod ticker;
pub mod util;

pub use session::Session;

use config::Persistence;
use navdata::NmeaReceiver;
use radar::RadarError;
use ticker::Ticker;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PACKAGE: &str = env!("CARGO_PKG_NAME");

#[derive(Parser, Clone, Debug)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// IPv4 address of the interface that is connected to the radar
    #[arg(short, long)]
    pub interface: Option<Ipv4Addr>,

    /// Also listen to the second (B) radar of a 4G scanner
    #[arg(short, long, default_value_t = false)]
    pub dual_radar: bool,

    /// Listen for NMEA 0183 sentences on this UDP `ipv4-address:port`
    #[arg(short, long)]
    pub navigation_address: Option<SocketAddrV4>,

    /// Settings file, instead of the one in the user's config directory
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Milliseconds between watchdog and guard zone runs
    #[arg(long, default_value_t = 1000)]
    pub tick_interval: u64,
}

/// Load the settings and start every receiver, the navigation listener and
/// the ticker as subsystems of `subsys`.
pub fn start_session(subsys: &SubsystemHandle, args: Cli) -> Result<Session, RadarError> {
    let persistence = Persistence::new(args.config.clone())?;
    let tick_interval = Duration::from_millis(args.tick_interval.max(100));
    let navigation_address = args.navigation_address;

    let session = Session::new(args, persistence);
    let settings = session.settings();
    log::info!(
        "{} {}: {} radar, {} mode",
        PACKAGE,
        VERSION,
        if settings.dual_radar { "dual" } else { "single" },
        if settings.master_mode {
            "master"
        } else {
            "slave"
        }
    );

    brand::navico::start(subsys, &session);

    match navigation_address {
        Some(addr) => {
            let nmea = NmeaReceiver::new(session.system(), addr);
            subsys.start(SubsystemBuilder::new("NMEA0183", |s| nmea.run(s)));
        }
        None => {
            log::info!("No NMEA 0183 address, only the radar's own heading is used");
        }
    }

    let ticker = Ticker::new(session.clone(), tick_interval);
    subsys.start(SubsystemBuilder::new("Ticker", |s| ticker.run(s)));

    Ok(session)
}
