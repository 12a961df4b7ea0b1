use clap::Parser;
use geofix::coordinator::{self, Collaborators, CoordinatorConfig, CoordinatorEvent};
use geofix::position::{FixOptions, LastFixCache, PositionError};
use geofix::sim::{SimLookup, SimPermissions, SimPositions};
use geofix::{Coordinate, GeocodingClient, HttpLookup, PermissionGate, DEFAULT_PICK_CENTER};
use std::sync::Arc;
use std::time::Duration;

/// Geofix — acquire one address-resolved location.
///
/// Runs a full acquisition against simulated device services and prints the
/// committed location as pretty-printed JSON on stdout. Permission answers,
/// the device fix, and the resolved address are scripted from the command
/// line; pass --api-key to resolve the address against the live geocoding
/// service instead of the offline stub.
///
/// Examples:
///   geofix
///   geofix --lat 48.8566 --lng 2.3522
///   geofix --pick 37.78825,-122.4324
///   geofix --permission blocked
///   geofix --pick 10.0,20.0 --degraded
///   geofix --lat 48.8566 --lng 2.3522 --api-key $GEOFIX_API_KEY
#[derive(Parser)]
#[command(name = "geofix", version, about, long_about = None)]
struct Cli {
    /// Simulated device latitude for the auto-locate flow.
    #[arg(long, allow_hyphen_values = true, default_value_t = 59.3293)]
    lat: f64,

    /// Simulated device longitude for the auto-locate flow.
    #[arg(long, allow_hyphen_values = true, default_value_t = 18.0686)]
    lng: f64,

    /// Pick this point on the map instead of locating the device.
    /// Format: LAT,LNG
    #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
    pick: Option<Coordinate>,

    /// Simulated permission scenario: granted, prompt, denied, or blocked.
    #[arg(long, default_value = "granted", value_parser = parse_permission)]
    permission: PermissionScenario,

    /// Address the offline geocoder answers with.
    #[arg(long, default_value = "Kungsgatan 1, Stockholm")]
    address: String,

    /// Simulate a geocoding outage; the commit falls back to the
    /// placeholder address.
    #[arg(long)]
    degraded: bool,

    /// Resolve the address via the live geocoding service with this key.
    #[arg(long)]
    api_key: Option<String>,

    /// Fail the simulated fix with a sensor error.
    #[arg(long)]
    no_fix: bool,

    /// Seconds to wait for the position fix.
    #[arg(long, value_name = "SECS", default_value_t = 15)]
    fix_timeout: u64,
}

#[derive(Clone, Copy)]
enum PermissionScenario {
    Granted,
    Prompt,
    Denied,
    Blocked,
}

fn parse_permission(s: &str) -> Result<PermissionScenario, String> {
    match s.to_lowercase().as_str() {
        "granted" => Ok(PermissionScenario::Granted),
        "prompt" => Ok(PermissionScenario::Prompt),
        "denied" => Ok(PermissionScenario::Denied),
        "blocked" => Ok(PermissionScenario::Blocked),
        _ => Err(format!(
            "Unknown permission '{}'. Use granted, prompt, denied, or blocked.",
            s
        )),
    }
}

fn parse_point(s: &str) -> Result<Coordinate, String> {
    let (lat, lng) = s
        .split_once(',')
        .ok_or_else(|| format!("Expected LAT,LNG, got '{}'.", s))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|e| format!("Invalid latitude '{}': {}", lat, e))?;
    let lng: f64 = lng
        .trim()
        .parse()
        .map_err(|e| format!("Invalid longitude '{}': {}", lng, e))?;
    Coordinate::new(lat, lng).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    // ── Wire up collaborators ───────────────────────────────────

    let permissions = match cli.permission {
        PermissionScenario::Granted => SimPermissions::granted(),
        PermissionScenario::Prompt => SimPermissions::prompt_grants(),
        PermissionScenario::Denied => SimPermissions::denied(),
        PermissionScenario::Blocked => SimPermissions::blocked(),
    };

    let device_fix = Coordinate::new(cli.lat, cli.lng).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });
    let script = if cli.no_fix {
        vec![Err(PositionError::Sensor("simulated sensor outage".into()))]
    } else {
        vec![Ok(device_fix)]
    };
    let positions = Arc::new(LastFixCache::new(Arc::new(SimPositions::new(script))));

    let geocoder = match &cli.api_key {
        Some(key) => GeocodingClient::new(Arc::new(HttpLookup::new(key.clone()))),
        None if cli.degraded => GeocodingClient::new(Arc::new(SimLookup::failing())),
        None => GeocodingClient::new(Arc::new(SimLookup::returning(cli.address.clone()))),
    };

    let collaborators = Collaborators {
        permissions: PermissionGate::new(Arc::new(permissions)),
        positions,
        geocoder,
    };
    let config = CoordinatorConfig {
        fix: FixOptions {
            timeout: Duration::from_secs(cli.fix_timeout),
            ..FixOptions::default()
        },
    };
    let (handle, mut events) = coordinator::spawn(collaborators, config);

    // ── Drive one acquisition ───────────────────────────────────

    match cli.pick {
        Some(point) => {
            eprintln!("  {} map opened at {}", "\u{1F5FA}", DEFAULT_PICK_CENTER);
            handle.start_map_pick();
            handle.tap(point);
            handle.confirm_tap();
        }
        None => {
            eprintln!("  {} locating device", "\u{1F4E1}");
            handle.start_auto_locate();
        }
    }

    // ── Report the outcome ──────────────────────────────────────

    while let Some(event) = events.recv().await {
        match event {
            CoordinatorEvent::StateChanged(state) => eprintln!("  state: {}", state),
            CoordinatorEvent::SelectionChanged(Some(point)) => {
                eprintln!("  marker at {}", point);
            }
            CoordinatorEvent::SelectionChanged(None) => {}
            CoordinatorEvent::Committed(location) => {
                eprintln!("  {} {}", "\u{1F4CD}", location.address());
                println!("{}", serde_json::to_string_pretty(&location).unwrap());
                return;
            }
            CoordinatorEvent::Failed(kind) => {
                eprintln!("Error: {}", kind);
                std::process::exit(1);
            }
        }
    }

    eprintln!("Error: coordinator stopped without an outcome.");
    std::process::exit(1);
}
