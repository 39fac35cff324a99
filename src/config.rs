//! Runtime configuration and logger bootstrap.

use std::env;
use std::str::FromStr;

use log::{LevelFilter, warn};

use crate::api::characteristic::CharacteristicWriteType;
use crate::api::peripheral::AdvertiseSettings;
use crate::api::service::ServiceIdentity;

/// Capacity of the radio event channels.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

const EVENT_BUFFER_VAR: &str = "GATTLINK_EVENT_BUFFER";
const LOCAL_NAME_VAR: &str = "GATTLINK_LOCAL_NAME";
const LOG_VAR: &str = "GATTLINK_LOG";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub identity: ServiceIdentity,
    pub event_buffer: usize,
    pub advertise: AdvertiseSettings,
    pub write_type: CharacteristicWriteType,
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            identity: ServiceIdentity::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            advertise: AdvertiseSettings::default(),
            write_type: CharacteristicWriteType::WriteWithResponse,
            log_level: LevelFilter::Info,
        }
    }
}

impl Config {
    /// Defaults overlaid with `GATTLINK_*` environment variables. Values that
    /// do not parse are reported and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();

        if let Some(buffer) = parse_var::<usize>(&lookup, EVENT_BUFFER_VAR) {
            if buffer == 0 {
                warn!("{EVENT_BUFFER_VAR} must be positive; keeping {DEFAULT_EVENT_BUFFER}");
            } else {
                config.event_buffer = buffer;
            }
        }
        if let Some(name) = lookup(LOCAL_NAME_VAR).filter(|name| !name.is_empty()) {
            config.advertise.local_name = Some(name);
        }
        if let Some(level) = parse_var::<LevelFilter>(&lookup, LOG_VAR) {
            config.log_level = level;
        }
        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable {key}={raw:?}");
            None
        }
    }
}

/// Installs a `pretty_env_logger` at the configured level. Later calls are no-ops.
pub fn init_logger(config: &Config) {
    let _ = pretty_env_logger::formatted_builder()
        .filter_level(config.log_level)
        .try_init();
}
