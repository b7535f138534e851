//! Platoon Session Launcher
//!
//! Runs the session layer against the in-process demo simulation:
//!
//! ```text
//! platoon-session host [port]
//! platoon-session join [address[:port]]
//! ```
//!
//! Configuration is read from the JSON file named by `PLATOON_CONFIG`,
//! when set; every field has a sensible default.

use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use platoon::config::LaunchConfig;
use platoon::sim::{DelayedSceneProbe, DemoFactory, FixedIdentity};
use platoon::{
    SessionController, SessionRole, SpawnConfig, TransportConfig, TransportLayer, TICK_RATE,
    VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Platoon Session v{}", VERSION);

    let config_path = std::env::var_os("PLATOON_CONFIG");
    let config = LaunchConfig::load_or_default(config_path.as_deref().map(Path::new));

    let mut factory = DemoFactory::new();
    let probe = DelayedSceneProbe::new(Duration::from_millis(1500));
    let identity = FixedIdentity(config.nickname.clone());
    let spawn_config = SpawnConfig {
        default_loadout: config.default_loadout.clone(),
        ..Default::default()
    };
    let transport = TransportLayer::new(TransportConfig::default());
    let mut controller = SessionController::new(transport, spawn_config, &identity);

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("host") => {
            let port = match args.get(2) {
                Some(raw) => raw.parse().context("invalid port")?,
                None => config.port,
            };
            controller.host(port).await?;
            if let Some(loadout) = &config.loadout {
                controller.select_loadout(loadout);
            }
            controller.announce_map(&config.map);
            controller.begin_spawn(Instant::now());
        }
        Some("join") => {
            let addr = resolve_addr(args.get(2).map(String::as_str), &config)?;
            controller.join(addr).await?;
            if let Some(loadout) = &config.loadout {
                controller.select_loadout(loadout);
            }
        }
        _ => bail!("usage: platoon-session host [port] | join [address[:port]]"),
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(1000 / TICK_RATE as u64));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                controller.tick(Instant::now(), &mut factory, &probe);
                if controller.role() == SessionRole::Unset {
                    info!("session over");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                controller.reset(&mut factory);
                break;
            }
        }
    }

    info!("goodbye");
    Ok(())
}

/// Resolve the address to dial: an explicit `address[:port]` argument
/// wins, the configured host/port fills the gaps.
fn resolve_addr(arg: Option<&str>, config: &LaunchConfig) -> Result<SocketAddr> {
    let target = match arg {
        Some(raw) if raw.contains(':') => raw.to_string(),
        Some(raw) => format!("{}:{}", raw, config.port),
        None => format!("{}:{}", config.host_addr, config.port),
    };
    target
        .parse()
        .with_context(|| format!("invalid host address {target:?}"))
}
