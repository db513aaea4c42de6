//! Furin CLI - rings a wind chime when it is windy outside
//!
//! Usage:
//!   furin                          # auto-discover location, poll forever
//!   furin -c furin.yaml            # explicit config
//!   furin --city Osaka --once     # single check; exit 0 windy, 1 calm, 2 failed
//!   furin --threshold 8 --silent  # log instead of playing audio

use std::path::PathBuf;

use argh::FromArgs;
use furin::chime::{ChimeNotifier, LogNotifier, Notifier};
use furin::config::Config;
use furin::location::resolve_location;
use furin::monitor::WindMonitor;
use furin::shutdown::shutdown_channel;
use furin::weather::WeatherClient;

#[derive(FromArgs)]
/// Rings a wind chime when the wind at your location crosses a threshold
struct Args {
    /// path to the configuration file (optional, uses defaults with auto-discovery)
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// city to watch, instead of IP auto-discovery
    #[argh(option)]
    city: Option<String>,

    /// latitude to watch (requires --longitude)
    #[argh(option)]
    latitude: Option<f64>,

    /// longitude to watch (requires --latitude)
    #[argh(option)]
    longitude: Option<f64>,

    /// wind threshold in m/s that rings the chime
    #[argh(option, short = 't')]
    threshold: Option<f64>,

    /// seconds between checks
    #[argh(option, short = 'i')]
    interval: Option<u64>,

    /// chime sound file (mp3 or wav)
    #[argh(option)]
    sound: Option<PathBuf>,

    /// check once and exit: 0 windy, 1 calm, 2 check failed
    #[argh(switch)]
    once: bool,

    /// log the ding instead of playing audio
    #[argh(switch)]
    silent: bool,

    /// show version information
    #[argh(switch, short = 'V')]
    version: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();
    if args.version {
        println!("furin {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration (or use defaults)
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config '{}': {}", path.display(), e))?,
        None => {
            log::info!("No config file specified, using defaults with auto-discovery");
            Config::default()
        }
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    let client = WeatherClient::new(config.api_key())?;

    // Resolve location once at startup
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;
    let location = resolve_location(&config.location, &http).await;
    log::info!("Using location: {}", location.label());

    let notifier: Box<dyn Notifier> = if args.silent {
        Box::new(LogNotifier)
    } else {
        Box::new(ChimeNotifier::from_config(&config.chime))
    };

    let mut monitor = WindMonitor::new(client, notifier, location, &config.poll);

    if args.once {
        let code = match monitor.check().await {
            Some(conditions) if monitor.is_windy(&conditions) => 0,
            Some(_) => 1,
            None => 2,
        };
        std::process::exit(code);
    }

    let shutdown_rx = shutdown_channel().map_err(|e| anyhow::anyhow!("signal handler: {}", e))?;
    monitor.run(shutdown_rx).await;

    log::info!("Furin shut down, exiting");
    Ok(())
}

/// CLI flags win over the config file.
fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(city) = &args.city {
        config.location.city = Some(city.clone());
    }
    if args.latitude.is_some() {
        config.location.latitude = args.latitude;
    }
    if args.longitude.is_some() {
        config.location.longitude = args.longitude;
    }
    if let Some(threshold) = args.threshold {
        config.poll.threshold_mps = threshold;
    }
    if let Some(interval) = args.interval {
        config.poll.interval_secs = interval;
    }
    if let Some(sound) = &args.sound {
        config.chime.sound = sound.clone();
    }
}
