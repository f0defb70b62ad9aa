use crate::error::Error;
use chrono::NaiveTime;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Runtime configuration, loaded once from environment variables in main.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub bind_addr: SocketAddr,

    /// Signing secrets indexed by integer version. Sparse by design:
    /// retired versions are simply removed, and verification of a payload
    /// referencing one fails hard rather than falling back.
    pub signing_secrets: HashMap<u32, Vec<u8>>,

    /// Version used for newly signed payloads; must exist in the map.
    pub current_signature_version: u32,

    /// IANA timezone the venue schedule is expressed in
    pub venue_timezone: Tz,

    /// Local wall-clock time at which the redemption window opens
    pub open_time: NaiveTime,

    /// Local wall-clock time at which the redemption window closes
    pub close_time: NaiveTime,

    /// Boundary-detection tick interval in seconds
    pub scheduler_tick_secs: u64,

    /// Anti-replay window for attendance scans, in seconds
    pub replay_window_secs: i64,

    /// Maximum age of a signed identity payload before it is STALE
    pub max_scan_skew_secs: i64,

    /// Fixed-window request limit applied per caller
    pub rate_limit: u64,

    /// Fixed-window size in milliseconds
    pub rate_limit_window_ms: u64,

    /// Bearer token granting the staff role (bare-code scans)
    pub staff_token: String,

    /// Bearer token granting the admin role (availability override)
    pub admin_token: String,

    /// Default log filter when RUST_LOG is unset
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables, with development
    /// defaults for everything except production secrets.
    pub fn from_env() -> Result<Self, Error> {
        let signing_secrets = parse_secrets(&env_or("SIGNING_SECRETS", "1:dev-secret-change-me"))?;
        let current_signature_version: u32 = parse_env("CURRENT_SIGNATURE_VERSION", "1")?;

        if !signing_secrets.contains_key(&current_signature_version) {
            return Err(Error::Configuration(format!(
                "no signing secret registered for current version {}",
                current_signature_version
            )));
        }

        let open_time = parse_time("OPEN_TIME", "10:00")?;
        let close_time = parse_time("CLOSE_TIME", "22:00")?;
        if open_time >= close_time {
            return Err(Error::Configuration(
                "OPEN_TIME must be earlier than CLOSE_TIME".to_string(),
            ));
        }

        let venue_timezone: Tz = env_or("VENUE_TIMEZONE", "UTC")
            .parse()
            .map_err(|_| Error::Configuration("VENUE_TIMEZONE is not a known timezone".to_string()))?;

        Ok(Config {
            bind_addr: parse_env("BIND_ADDR", "127.0.0.1:3000")?,
            signing_secrets,
            current_signature_version,
            venue_timezone,
            open_time,
            close_time,
            scheduler_tick_secs: parse_env("SCHEDULER_TICK_SECS", "30")?,
            replay_window_secs: parse_env("REPLAY_WINDOW_SECS", "10")?,
            max_scan_skew_secs: parse_env("MAX_SCAN_SKEW_SECS", "300")?,
            rate_limit: parse_env("RATE_LIMIT", "30")?,
            rate_limit_window_ms: parse_env("RATE_LIMIT_WINDOW_MS", "60000")?,
            staff_token: env_or("STAFF_TOKEN", "staff-dev-token"),
            admin_token: env_or("ADMIN_TOKEN", "admin-dev-token"),
            log_level: env_or("LOG_LEVEL", "info"),
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, Error> {
    env_or(name, default)
        .parse()
        .map_err(|_| Error::Configuration(format!("invalid value for {}", name)))
}

fn parse_time(name: &str, default: &str) -> Result<NaiveTime, Error> {
    NaiveTime::parse_from_str(&env_or(name, default), "%H:%M")
        .map_err(|_| Error::Configuration(format!("{} must be HH:MM", name)))
}

/// Parse `version:secret` pairs separated by commas, e.g.
/// `1:oldsecret,2:newsecret`.
fn parse_secrets(raw: &str) -> Result<HashMap<u32, Vec<u8>>, Error> {
    let mut secrets = HashMap::new();

    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (version, secret) = pair.trim().split_once(':').ok_or_else(|| {
            Error::Configuration("SIGNING_SECRETS entries must be version:secret".to_string())
        })?;

        let version: u32 = version.trim().parse().map_err(|_| {
            Error::Configuration("SIGNING_SECRETS versions must be integers".to_string())
        })?;

        if secret.is_empty() {
            return Err(Error::Configuration(
                "SIGNING_SECRETS secrets cannot be empty".to_string(),
            ));
        }

        secrets.insert(version, secret.as_bytes().to_vec());
    }

    if secrets.is_empty() {
        return Err(Error::Configuration(
            "SIGNING_SECRETS must define at least one secret".to_string(),
        ));
    }

    Ok(secrets)
}
