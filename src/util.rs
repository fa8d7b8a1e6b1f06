use std::path::PathBuf;
use std::str::FromStr;

/// Read `name` from the environment, falling back to `default` when unset or unparsable
pub fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name).map(|res| res.trim().parse()) {
        Ok(Ok(value)) => value,
        _ => default,
    }
}

/// Non-empty string from the environment
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Lenient boolean parse shared by env vars and stored settings
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

pub fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|value| parse_bool(&value))
        .unwrap_or(default)
}

const DATA_DIR: &str = "DATA_DIR";

const DEFAULT_DATA_DIR: &str = "./data";

pub fn get_data_dir() -> PathBuf {
    env_string(DATA_DIR).map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from)
}

pub fn get_db_path() -> PathBuf {
    get_data_dir().join("linkwatch.db")
}

const CONNECT_TARGET: &str = "CONNECT_TARGET";

pub fn get_connect_target() -> String {
    env_string(CONNECT_TARGET).unwrap_or_else(|| "google.com".to_string())
}

pub fn get_connect_default_port() -> u16 {
    env_or("CONNECT_DEFAULT_PORT", 443)
}

pub fn get_connect_timeout_seconds() -> f64 {
    env_or("CONNECT_TIMEOUT_SECONDS", 1.0)
}

pub fn get_connect_interval_seconds() -> f64 {
    env_or("CONNECT_INTERVAL_SECONDS", 1.0)
}

pub fn get_buffer_seconds() -> f64 {
    env_or("CONNECTIVITY_CHECK_BUFFER_SECONDS", 30.0)
}

pub fn get_buffer_max() -> i64 {
    env_or("CONNECTIVITY_CHECK_BUFFER_MAX", 30)
}

pub fn get_speedtest_mode() -> String {
    env_string("SPEEDTEST_MODE").unwrap_or_else(|| "url".to_string())
}

pub fn get_speedtest_url() -> Option<String> {
    env_string("SPEEDTEST_URL")
}

pub fn get_speedtest_upload_url() -> Option<String> {
    env_string("SPEEDTEST_UPLOAD_URL")
}

pub fn get_speedtest_duration_seconds() -> f64 {
    env_or("SPEEDTEST_DURATION_SECONDS", 30.0)
}

pub fn get_speedtest_interval_seconds() -> f64 {
    env_or("SPEEDTEST_INTERVAL_SECONDS", 900.0)
}

pub fn get_speedtest_timeout_seconds() -> f64 {
    env_or("SPEEDTEST_TIMEOUT_SECONDS", 10.0)
}

pub fn get_speedtest_skip_if_offline() -> bool {
    env_bool("SPEEDTEST_SKIP_IF_OFFLINE", true)
}

const DEFAULT_SERVERS_URL: &str = "https://www.speedtest.net/api/js/servers?engine=js&limit=10";

pub fn get_speedtest_servers_url() -> String {
    env_string("SPEEDTEST_SERVERS_URL").unwrap_or_else(|| DEFAULT_SERVERS_URL.to_string())
}

pub fn get_notify_min_outage_seconds() -> f64 {
    env_or("NOTIFY_MIN_OUTAGE_SECONDS", 60.0)
}

/// Human-readable outage length: `45s`, `2m 5s`, `1h 3m`
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() {
        seconds.max(0.0) as u64
    } else {
        0
    };

    if total < 60 {
        return format!("{total}s");
    }
    if total < 3600 {
        let (minutes, secs) = (total / 60, total % 60);
        return if secs == 0 {
            format!("{minutes}m")
        } else {
            format!("{minutes}m {secs}s")
        };
    }
    let (hours, minutes) = (total / 3600, (total % 3600) / 60);
    if minutes == 0 {
        format!("{hours}h")
    } else {
        format!("{hours}h {minutes}m")
    }
}
