use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_REDIRECTS: u8 = 5;
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_MAX_VERSION_LEN: usize = 64;

/// Whether TLS peers are authenticated. `Insecure` exists because some
/// deployments serve firmware from hosts without a verifiable chain; it must
/// be chosen explicitly and is logged on every boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsVerification {
    #[default]
    Verify,
    Insecure,
}

impl TlsVerification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::Insecure => "insecure",
        }
    }

    pub fn is_insecure(self) -> bool {
        matches!(self, Self::Insecure)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateConfig {
    #[serde(rename = "currentVersion")]
    pub current_version: String,
    #[serde(rename = "versionUrl")]
    pub version_url: String,
    #[serde(rename = "firmwareUrl")]
    pub firmware_url: String,
    #[serde(default)]
    pub tls: TlsVerification,
    #[serde(rename = "maxRedirects", default = "default_max_redirects")]
    pub max_redirects: u8,
    #[serde(rename = "chunkSize", default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(rename = "maxVersionLen", default = "default_max_version_len")]
    pub max_version_len: usize,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            current_version: "0.0.0".to_string(),
            version_url: "https://example.com/firmware/version.txt".to_string(),
            firmware_url: "https://example.com/firmware/firmware.bin".to_string(),
            tls: TlsVerification::Verify,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_version_len: DEFAULT_MAX_VERSION_LEN,
        }
    }
}

impl UpdateConfig {
    pub fn sanitize(&mut self) {
        self.current_version = self.current_version.trim().to_string();
        self.version_url = self.version_url.trim().to_string();
        self.firmware_url = self.firmware_url.trim().to_string();
        self.max_redirects = self.max_redirects.min(10);
        self.chunk_size = self.chunk_size.clamp(256, 16 * 1024);
        self.max_version_len = self.max_version_len.clamp(8, 256);
    }
}

fn default_max_redirects() -> u8 {
    DEFAULT_MAX_REDIRECTS
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_version_len() -> usize {
    DEFAULT_MAX_VERSION_LEN
}

/// Poll policy for the blocking wait on WiFi association.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssociationPolicy {
    #[serde(rename = "pollIntervalMs")]
    pub poll_interval_ms: u64,
    /// `None` waits forever.
    #[serde(rename = "maxAttempts", default)]
    pub max_attempts: Option<u32>,
}

impl Default for AssociationPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    #[serde(default)]
    pub association: AssociationPolicy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            association: AssociationPolicy::default(),
        }
    }
}

impl NetworkConfig {
    pub fn has_station_credentials(&self) -> bool {
        !self.wifi_ssid.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LivenessConfig {
    pub gpio: i32,
    #[serde(rename = "halfPeriodMs")]
    pub half_period_ms: u64,
    #[serde(rename = "activeLow")]
    pub active_low: bool,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            gpio: 2,
            half_period_ms: 500,
            active_low: true,
        }
    }
}

impl LivenessConfig {
    pub fn sanitize(&mut self) {
        if self.gpio < 0 {
            self.gpio = 2;
        }
        self.half_period_ms = self.half_period_ms.clamp(50, 10_000);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    pub update: UpdateConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
}

impl DeviceConfig {
    pub fn sanitize(&mut self) {
        self.update.sanitize();
        self.liveness.sanitize();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_optional_sections_fall_back_to_defaults() {
        let raw = r#"{
            "update": {
                "currentVersion": "1.2.0",
                "versionUrl": "http://10.0.0.5/version",
                "firmwareUrl": "http://10.0.0.5/fw.bin"
            }
        }"#;

        let config: DeviceConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.update.tls, TlsVerification::Verify);
        assert_eq!(config.update.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert_eq!(config.update.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.network, NetworkConfig::default());
        assert_eq!(config.liveness, LivenessConfig::default());
        assert_eq!(config.network.association.max_attempts, None);
    }

    #[test]
    fn insecure_tls_must_be_spelled_out() {
        let raw = r#"{
            "currentVersion": "1",
            "versionUrl": "https://a/v",
            "firmwareUrl": "https://a/f",
            "tls": "insecure"
        }"#;

        let update: UpdateConfig = serde_json::from_str(raw).unwrap();
        assert!(update.tls.is_insecure());
        assert_eq!(update.tls.as_str(), "insecure");
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let mut config = DeviceConfig::default();
        config.update.current_version = "  1.0.0\n".to_string();
        config.update.max_redirects = 200;
        config.update.chunk_size = 1;
        config.liveness.gpio = -3;
        config.liveness.half_period_ms = 0;

        config.sanitize();

        assert_eq!(config.update.current_version, "1.0.0");
        assert_eq!(config.update.max_redirects, 10);
        assert_eq!(config.update.chunk_size, 256);
        assert_eq!(config.liveness.gpio, 2);
        assert_eq!(config.liveness.half_period_ms, 50);
    }
}
