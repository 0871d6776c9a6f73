// src/config.rs
// Environment-driven configuration and startup validation

use log::{error, info, warn};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Runtime configuration for the calendar server. Values come from the
/// environment (and `.env` via dotenvy in main); command-line flags may
/// override the data path and listen address.
#[derive(Clone, Debug)]
pub struct Config {
    pub data_path: String,
    pub chain_rpc_url: String,
    pub chain_rpc_timeout: Duration,
    pub wait_confirmations: u64,
    pub min_broadcast_interval: Duration,
    pub flush_interval: Duration,
    pub batch_threshold: usize,
    pub stamper_tick: Duration,
    pub reorg_poll_limit: u32,
    pub listen_addr: SocketAddr,
    /// Variables that were set but failed to parse; reported as warnings
    /// by `validate_config` so a typo never falls back silently.
    pub parse_warnings: Vec<String>,
}

fn env_u64(key: &str, default: u64, issues: &mut Vec<String>) -> u64 {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                issues.push(format!(
                    "{} is set to '{}' which is not an integer - using default {}",
                    key, raw, default
                ));
                default
            }
        },
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut issues = Vec::new();

        let listen_addr = match env::var("STAMPD_LISTEN_ADDR") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                issues.push(format!(
                    "STAMPD_LISTEN_ADDR is set to '{}' which is not a socket address - using default 127.0.0.1:14788",
                    raw
                ));
                "127.0.0.1:14788".parse().expect("static addr parses")
            }),
            Err(_) => "127.0.0.1:14788".parse().expect("static addr parses"),
        };

        Self {
            data_path: env::var("STAMPD_DATA_PATH").unwrap_or_else(|_| "./calendar_data".into()),
            chain_rpc_url: env::var("STAMPD_CHAIN_RPC_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:18443".into()),
            chain_rpc_timeout: Duration::from_secs(env_u64(
                "STAMPD_CHAIN_RPC_TIMEOUT_SECS",
                15,
                &mut issues,
            )),
            wait_confirmations: env_u64("STAMPD_WAIT_CONFIRMATIONS", 6, &mut issues),
            min_broadcast_interval: Duration::from_secs(env_u64(
                "STAMPD_MIN_BROADCAST_INTERVAL_SECS",
                3600,
                &mut issues,
            )),
            flush_interval: Duration::from_secs(env_u64(
                "STAMPD_FLUSH_INTERVAL_SECS",
                60,
                &mut issues,
            )),
            batch_threshold: env_u64("STAMPD_BATCH_THRESHOLD", 10_000, &mut issues) as usize,
            stamper_tick: Duration::from_secs(env_u64("STAMPD_STAMPER_TICK_SECS", 30, &mut issues)),
            reorg_poll_limit: env_u64("STAMPD_REORG_POLL_LIMIT", 10, &mut issues) as u32,
            listen_addr,
            parse_warnings: issues,
        }
    }
}

/// Validation result for configuration checks
pub struct ConfigValidation {
    pub valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    fn new() -> Self {
        Self {
            valid: true,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn add_warning(&mut self, msg: String) {
        self.warnings.push(msg);
    }

    fn add_error(&mut self, msg: String) {
        self.errors.push(msg);
        self.valid = false;
    }

    pub fn print_summary(&self) {
        for w in &self.warnings {
            warn!("config: {}", w);
        }
        for e in &self.errors {
            error!("config: {}", e);
        }
        if self.valid && self.warnings.is_empty() {
            info!("configuration validation passed");
        }
    }
}

/// Validate critical configuration at startup. Errors abort startup;
/// warnings are informational.
pub fn validate_config(config: &Config) -> ConfigValidation {
    let mut validation = ConfigValidation::new();

    for w in &config.parse_warnings {
        validation.add_warning(w.clone());
    }

    let path = std::path::Path::new(&config.data_path);
    if !path.exists() {
        if let Err(e) = std::fs::create_dir_all(path) {
            validation.add_error(format!(
                "cannot create calendar directory '{}': {}",
                config.data_path, e
            ));
        } else {
            info!("created calendar directory: {}", config.data_path);
        }
    }

    if !config.chain_rpc_url.starts_with("http://") && !config.chain_rpc_url.starts_with("https://")
    {
        validation.add_error(format!(
            "STAMPD_CHAIN_RPC_URL must be an http(s) endpoint, got '{}'",
            config.chain_rpc_url
        ));
    }

    if config.wait_confirmations == 0 {
        validation.add_warning(
            "STAMPD_WAIT_CONFIRMATIONS is 0 - commitments finalize without any confirmation depth"
                .into(),
        );
    }

    if config.min_broadcast_interval.as_secs() < 60 {
        validation.add_warning(format!(
            "STAMPD_MIN_BROADCAST_INTERVAL_SECS is {}s - short intervals increase transaction fee spend",
            config.min_broadcast_interval.as_secs()
        ));
    }

    if config.batch_threshold == 0 {
        validation.add_error("STAMPD_BATCH_THRESHOLD must be at least 1".into());
    }

    if config.reorg_poll_limit == 0 {
        validation.add_error("STAMPD_REORG_POLL_LIMIT must be at least 1".into());
    }

    validation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::from_env();
        assert_eq!(config.wait_confirmations, 6);
        assert_eq!(config.min_broadcast_interval, Duration::from_secs(3600));
        assert!(config.batch_threshold > 0);
    }

    #[test]
    fn unparseable_env_value_warns_and_uses_default() {
        // a variable other tests never set, so parallel test threads
        // reading the environment stay unaffected
        env::set_var("STAMPD_REORG_POLL_LIMIT", "sixty");
        let config = Config::from_env();
        env::remove_var("STAMPD_REORG_POLL_LIMIT");

        assert_eq!(config.reorg_poll_limit, 10, "falls back to the default");
        assert!(
            config
                .parse_warnings
                .iter()
                .any(|w| w.contains("STAMPD_REORG_POLL_LIMIT")),
            "the bad value is reported, not swallowed"
        );

        let v = validate_config(&config);
        assert!(v.valid);
        assert!(v
            .warnings
            .iter()
            .any(|w| w.contains("STAMPD_REORG_POLL_LIMIT")));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let mut config = Config::from_env();
        config.batch_threshold = 0;
        let v = validate_config(&config);
        assert!(!v.valid);
    }

    #[test]
    fn non_http_rpc_url_is_rejected() {
        let mut config = Config::from_env();
        config.chain_rpc_url = "ftp://nowhere".into();
        let v = validate_config(&config);
        assert!(!v.valid);
    }
}
