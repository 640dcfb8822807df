//! Configuration management
//!
//! Layered with the `config` crate: serde defaults, then an optional file,
//! then `CEC_BRIDGE__<SECTION>__<KEY>` environment variables.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};

use crate::adapters::cec_client::CecClientSettings;
use crate::bridge::{BridgeSettings, MIN_REFRESH_PERIOD};
use crate::cec::LogicalAddress;

/// Searched when no file is given on the command line
const SYSTEM_CONFIG: &str = "/etc/cec-mqtt-bridge";
const LOCAL_CONFIG: &str = "config";

/// libcec log mask bit for bus traffic; without it no frames are seen
const TRAFFIC_LOG_BIT: u8 = 8;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub cec: CecConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_broker")]
    pub broker: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Client id announced to the broker
    #[serde(default = "default_client_name")]
    pub name: String,
    /// Prepended to every topic, e.g. `media/cec/audio/volume`
    #[serde(default = "default_prefix")]
    pub prefix: String,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub tls: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            port: default_mqtt_port(),
            name: default_client_name(),
            prefix: default_prefix(),
            user: None,
            password: None,
            tls: false,
        }
    }
}

fn default_broker() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_name() -> String {
    "CEC Bridge".to_string()
}

fn default_prefix() -> String {
    "media".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CecConfig {
    /// Adapter port passed to `cec-client`
    #[serde(default = "default_cec_port")]
    pub port: String,
    /// OSD name of the bridge on the bus
    #[serde(default = "default_cec_name")]
    pub name: String,
    #[serde(default = "default_devices", deserialize_with = "deserialize_devices")]
    pub devices: Vec<u8>,
    /// Seconds between refreshes, 0 disables
    #[serde(default = "default_refresh")]
    pub refresh: u64,
    #[serde(default = "default_volume_correction")]
    pub volume_correction: f64,
    #[serde(default = "default_client")]
    pub client: String,
    #[serde(default = "default_log_level")]
    pub log_level: u8,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl Default for CecConfig {
    fn default() -> Self {
        Self {
            port: default_cec_port(),
            name: default_cec_name(),
            devices: default_devices(),
            refresh: default_refresh(),
            volume_correction: default_volume_correction(),
            client: default_client(),
            log_level: default_log_level(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

fn default_cec_port() -> String {
    "RPI".to_string()
}

fn default_cec_name() -> String {
    "CEC Bridge".to_string()
}

fn default_devices() -> Vec<u8> {
    (0..15).collect()
}

fn default_refresh() -> u64 {
    10
}

fn default_volume_correction() -> f64 {
    1.0
}

fn default_client() -> String {
    "cec-client".to_string()
}

fn default_log_level() -> u8 {
    31
}

fn default_query_timeout_ms() -> u64 {
    1000
}

/// Device lists arrive as a list, a comma separated string (`"0,4,5"`, the
/// only form an environment variable can carry) or a single number
#[derive(Deserialize)]
#[serde(untagged)]
enum DeviceList {
    List(Vec<u8>),
    Single(u8),
    Text(String),
}

fn deserialize_devices<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    match DeviceList::deserialize(deserializer)? {
        DeviceList::List(devices) => Ok(devices),
        DeviceList::Single(device) => Ok(vec![device]),
        DeviceList::Text(text) => parse_device_list(&text).map_err(serde::de::Error::custom),
    }
}

fn parse_device_list(text: &str) -> std::result::Result<Vec<u8>, String> {
    text.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<u8>()
                .map_err(|_| format!("invalid device id '{}'", item))
        })
        .collect()
}

/// Refresh period for a configured delay in seconds. `None` disables the
/// timer; short delays are raised to the minimum period.
pub fn refresh_period(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds).max(MIN_REFRESH_PERIOD))
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        for device in &self.cec.devices {
            if LogicalAddress::new(*device).is_none() {
                bail!("cec.devices: {} is not a logical address (0-15)", device);
            }
        }
        if !self.cec.volume_correction.is_finite() || self.cec.volume_correction <= 0.0 {
            bail!(
                "cec.volume_correction must be a positive number, got {}",
                self.cec.volume_correction
            );
        }
        if self.cec.query_timeout_ms == 0 {
            bail!("cec.query_timeout_ms must be greater than 0");
        }
        if self.cec.log_level & TRAFFIC_LOG_BIT == 0 {
            tracing::warn!(
                "cec.log_level {} does not include traffic ({}); no bus frames will be seen",
                self.cec.log_level,
                TRAFFIC_LOG_BIT
            );
        }
        Ok(())
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            devices: self
                .cec
                .devices
                .iter()
                .filter_map(|d| LogicalAddress::new(*d))
                .collect(),
            volume_correction: self.cec.volume_correction,
        }
    }

    pub fn client_settings(&self) -> CecClientSettings {
        CecClientSettings {
            client: self.cec.client.clone(),
            port: self.cec.port.clone(),
            name: self.cec.name.clone(),
            log_level: self.cec.log_level,
            query_timeout: Duration::from_millis(self.cec.query_timeout_ms),
        }
    }
}

/// Load and validate the configuration. With `path` that file must exist;
/// without it the system and local locations are tried.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut builder = ::config::Config::builder();

    builder = match path {
        Some(path) => builder.add_source(::config::File::from(path).required(true)),
        None => builder
            .add_source(::config::File::with_name(SYSTEM_CONFIG).required(false))
            .add_source(::config::File::with_name(LOCAL_CONFIG).required(false)),
    };

    let config = builder
        // Override with environment variables (CEC_BRIDGE__MQTT__BROKER, CEC_BRIDGE__CEC__DEVICES, etc.)
        .add_source(
            ::config::Environment::with_prefix("CEC_BRIDGE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("reading configuration")?;

    let config: Config = config
        .try_deserialize()
        .context("parsing configuration")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn clear_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with("CEC_BRIDGE__") {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.mqtt.broker, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.prefix, "media");
        assert_eq!(config.cec.port, "RPI");
        assert_eq!(config.cec.devices, (0..15).collect::<Vec<u8>>());
        assert_eq!(config.cec.refresh, 10);
        assert_eq!(config.cec.volume_correction, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_file_overlay() {
        clear_env();
        let file = write_toml(
            r#"
            [mqtt]
            broker = "broker.lan"
            prefix = "livingroom"
            user = "bridge"

            [cec]
            devices = [0, 4, 5]
            volume_correction = 0.8
            refresh = 30
            "#,
        );

        let config = load_config(Some(file.path())).unwrap();

        assert_eq!(config.mqtt.broker, "broker.lan");
        assert_eq!(config.mqtt.prefix, "livingroom");
        assert_eq!(config.mqtt.user.as_deref(), Some("bridge"));
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.cec.devices, vec![0, 4, 5]);
        assert_eq!(config.cec.volume_correction, 0.8);
        assert_eq!(config.cec.refresh, 30);
        assert_eq!(config.cec.port, "RPI");
    }

    #[test]
    #[serial]
    fn test_comma_separated_devices() {
        clear_env();
        let file = write_toml("[cec]\ndevices = \"0, 4,5\"\n");

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.cec.devices, vec![0, 4, 5]);

        let settings = config.bridge_settings();
        assert_eq!(settings.devices.len(), 3);
        assert_eq!(settings.devices[2], LogicalAddress::AUDIO_SYSTEM);
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        clear_env();
        let file = write_toml("[mqtt]\nbroker = \"broker.lan\"\n");
        std::env::set_var("CEC_BRIDGE__MQTT__BROKER", "10.0.0.2");
        std::env::set_var("CEC_BRIDGE__CEC__DEVICES", "0,5");

        let result = load_config(Some(file.path()));
        clear_env();
        let config = result.unwrap();

        assert_eq!(config.mqtt.broker, "10.0.0.2");
        assert_eq!(config.cec.devices, vec![0, 5]);
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        clear_env();
        let bad_device = write_toml("[cec]\ndevices = [0, 16]\n");
        assert!(load_config(Some(bad_device.path())).is_err());

        let bad_list = write_toml("[cec]\ndevices = \"0,tv\"\n");
        assert!(load_config(Some(bad_list.path())).is_err());

        let bad_correction = write_toml("[cec]\nvolume_correction = 0.0\n");
        assert!(load_config(Some(bad_correction.path())).is_err());
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_an_error() {
        clear_env();
        assert!(load_config(Some(Path::new("/nonexistent/cec-bridge.toml"))).is_err());
    }

    #[test]
    fn test_refresh_period_floor() {
        assert_eq!(refresh_period(0), None);
        assert_eq!(refresh_period(1), Some(MIN_REFRESH_PERIOD));
        assert_eq!(refresh_period(9), Some(MIN_REFRESH_PERIOD));
        assert_eq!(refresh_period(10), Some(Duration::from_secs(10)));
        assert_eq!(refresh_period(60), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_client_settings() {
        let config = Config::default();
        let settings = config.client_settings();
        assert_eq!(settings.client, "cec-client");
        assert_eq!(settings.name, "CEC Bridge");
        assert_eq!(settings.query_timeout, Duration::from_millis(1000));
    }
}
