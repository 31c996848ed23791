//! Session configuration: endpoint, UART settings and flow control.
//!
//! Values are validated when they are built or deserialized, so an
//! unsupported baud rate or word length never reaches the wire.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IsockError;

/// Baud rates supported by the device server.
pub const SUPPORTED_BAUD_RATES: [u32; 15] = [
    300, 600, 1200, 1800, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115200, 230400, 460800,
    921600,
];

/// URL scheme accepted by [`SessionConfig::from_url`].
pub const URL_SCHEME: &str = "intellisock://";

// ── UART parameters ──────────────────────────────────────────────

/// A baud rate from [`SUPPORTED_BAUD_RATES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct BaudRate(u32);

impl BaudRate {
    pub const B9600: BaudRate = BaudRate(9600);
    pub const B115200: BaudRate = BaudRate(115200);

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = IsockError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if SUPPORTED_BAUD_RATES.contains(&value) {
            Ok(BaudRate(value))
        } else {
            Err(IsockError::UnsupportedBaudRate(value))
        }
    }
}

impl From<BaudRate> for u32 {
    fn from(b: BaudRate) -> Self {
        b.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl Parity {
    /// `COMM_PARAM` encoding.
    pub fn wire_value(&self) -> u8 {
        match self {
            Parity::None => 0,
            Parity::Even => 1,
            Parity::Odd => 2,
        }
    }
}

/// Data bits per character, 5 through 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct WordLength(u8);

impl WordLength {
    pub const EIGHT: WordLength = WordLength(8);

    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for WordLength {
    type Error = IsockError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5..=8 => Ok(WordLength(value)),
            _ => Err(IsockError::InvalidWordLength(value)),
        }
    }
}

impl From<WordLength> for u8 {
    fn from(w: WordLength) -> Self {
        w.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl StopBits {
    /// `COMM_PARAM` encoding: 0 for one stop bit, 1 for two.
    pub fn wire_value(&self) -> u8 {
        match self {
            StopBits::One => 0,
            StopBits::Two => 1,
        }
    }
}

impl TryFrom<u8> for StopBits {
    type Error = IsockError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            _ => Err(IsockError::InvalidStopBits(value)),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(s: StopBits) -> Self {
        match s {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Flow control for the remote UART. Software and hardware flow
/// control are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum FlowControl {
    #[default]
    None,
    /// XON/XOFF. `strip` removes the flow characters from the data stream.
    Software {
        #[serde(default = "default_xon")]
        xon: u8,
        #[serde(default = "default_xoff")]
        xoff: u8,
        #[serde(default)]
        strip: bool,
    },
    RtsCts,
    DtrDsr,
}

fn default_xon() -> u8 {
    0x11
}

fn default_xoff() -> u8 {
    0x13
}

impl FlowControl {
    /// XON/XOFF with the usual DC1/DC3 characters, kept in the stream.
    pub fn software() -> Self {
        FlowControl::Software {
            xon: default_xon(),
            xoff: default_xoff(),
            strip: false,
        }
    }
}

/// UART settings applied during the open handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: BaudRate,
    pub parity: Parity,
    pub word_length: WordLength,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: BaudRate::B115200,
            parity: Parity::None,
            word_length: WordLength::EIGHT,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    pub fn validate(&self) -> Result<(), IsockError> {
        if let FlowControl::Software { xon, xoff, .. } = self.flow_control {
            if xon == xoff {
                return Err(IsockError::InvalidConfig(format!(
                    "xon and xoff must differ (both {xon:#04x})"
                )));
            }
        }
        Ok(())
    }
}

// ── Endpoint ─────────────────────────────────────────────────────

/// Where the device server listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    /// Connect and close timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5000,
            timeout_ms: 3000,
        }
    }
}

impl EndpointConfig {
    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TCP ports the device server maps to its UARTs, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRange {
    pub first: u16,
    pub last: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        // Eight-port device.
        Self {
            first: 5000,
            last: 5007,
        }
    }
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        (self.first..=self.last).contains(&port)
    }

    pub fn check(&self, port: u16) -> Result<(), IsockError> {
        if self.contains(port) {
            Ok(())
        } else {
            Err(IsockError::PortOutOfRange {
                port,
                first: self.first,
                last: self.last,
            })
        }
    }
}

// ── SessionConfig ────────────────────────────────────────────────

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub endpoint: EndpointConfig,
    pub port_range: PortRange,
    pub serial: SerialConfig,
    /// Outstanding packet count advertised until the device negotiates.
    pub max_outstanding: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            port_range: PortRange::default(),
            serial: SerialConfig::default(),
            max_outstanding: 16,
        }
    }
}

impl SessionConfig {
    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<(), IsockError> {
        if self.port_range.first > self.port_range.last {
            return Err(IsockError::InvalidConfig(format!(
                "empty port range {}..={}",
                self.port_range.first, self.port_range.last
            )));
        }
        self.port_range.check(self.endpoint.port)?;
        if self.max_outstanding == 0 {
            return Err(IsockError::InvalidConfig(
                "max_outstanding must be at least 1".into(),
            ));
        }
        self.serial.validate()
    }

    pub fn from_toml_str(text: &str) -> Result<Self, IsockError> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_toml_string(&self) -> Result<String, IsockError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, IsockError> {
        let text = std::fs::read_to_string(path)?;
        let cfg = Self::from_toml_str(&text)?;
        tracing::debug!("loaded session config from {}", path.display());
        Ok(cfg)
    }

    /// Parse `[intellisock://]<host>:<port>[/timeout=<secs>]` with
    /// default serial settings.
    pub fn from_url(url: &str) -> Result<Self, IsockError> {
        let invalid = |reason: String| IsockError::InvalidUrl {
            url: url.to_string(),
            reason,
        };

        let rest = match url.get(..URL_SCHEME.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(URL_SCHEME) => &url[URL_SCHEME.len()..],
            _ => url,
        };
        let (address, options) = match rest.split_once('/') {
            Some((address, options)) => (address, Some(options)),
            None => (rest, None),
        };

        let mut cfg = Self::default();
        for option in options.into_iter().flat_map(|o| o.split('/')) {
            if option.is_empty() {
                continue;
            }
            let (name, value) = match option.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (option, None),
            };
            match (name, value) {
                ("timeout", Some(value)) => {
                    let secs: f64 = value
                        .parse()
                        .map_err(|_| invalid(format!("bad timeout {value:?}")))?;
                    if !secs.is_finite() || secs <= 0.0 {
                        return Err(invalid(format!("bad timeout {value:?}")));
                    }
                    cfg.endpoint.timeout_ms = (secs * 1000.0).round() as u64;
                }
                _ => return Err(invalid(format!("unknown option: {option:?}"))),
            }
        }

        let (host, port) = address
            .split_once(':')
            .ok_or_else(|| invalid("missing port".into()))?;
        if host.is_empty() {
            return Err(invalid("missing host".into()));
        }
        cfg.endpoint.host = host.to_string();
        cfg.endpoint.port = port
            .parse()
            .map_err(|_| invalid(format!("bad port {port:?}")))?;

        cfg.validate()?;
        Ok(cfg)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = SessionConfig::default();
        let text = cfg.to_toml_string().unwrap();
        assert!(text.contains("baud_rate = 115200"));
        assert!(text.contains("first = 5000"));
    }

    #[test]
    fn roundtrip_config() {
        let mut cfg = SessionConfig::default();
        cfg.serial.flow_control = FlowControl::software();
        cfg.serial.parity = Parity::Even;
        let text = cfg.to_toml_string().unwrap();
        let parsed = SessionConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn parses_partial_toml() {
        let cfg = SessionConfig::from_toml_str(
            r#"
            [endpoint]
            host = "10.0.0.5"
            port = 5003

            [serial]
            baud_rate = 9600
            parity = "odd"
            word_length = 7
            stop_bits = 2
            flow_control = { mode = "rts-cts" }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.endpoint.port, 5003);
        assert_eq!(cfg.serial.baud_rate, BaudRate::B9600);
        assert_eq!(cfg.serial.parity, Parity::Odd);
        assert_eq!(cfg.serial.word_length.bits(), 7);
        assert_eq!(cfg.serial.stop_bits, StopBits::Two);
        assert_eq!(cfg.serial.flow_control, FlowControl::RtsCts);
        assert_eq!(cfg.endpoint.timeout_ms, 3000);
    }

    #[test]
    fn rejects_unsupported_baud_rate() {
        assert!(matches!(
            BaudRate::try_from(1898),
            Err(IsockError::UnsupportedBaudRate(1898))
        ));
        let err = SessionConfig::from_toml_str("[serial]\nbaud_rate = 1898\n").unwrap_err();
        assert!(err.to_string().contains("1898"));
    }

    #[test]
    fn rejects_bad_word_length_and_stop_bits() {
        assert!(WordLength::try_from(4).is_err());
        assert!(WordLength::try_from(9).is_err());
        assert!(StopBits::try_from(3).is_err());
        assert!(SessionConfig::from_toml_str("[serial]\nword_length = 9\n").is_err());
    }

    #[test]
    fn software_flow_defaults() {
        let cfg = SessionConfig::from_toml_str("[serial]\nflow_control = { mode = \"software\" }\n")
            .unwrap();
        assert_eq!(cfg.serial.flow_control, FlowControl::software());
    }

    #[test]
    fn port_range_check() {
        let range = PortRange::default();
        assert!(range.check(5000).is_ok());
        assert!(range.check(5007).is_ok());
        assert!(matches!(
            range.check(5008),
            Err(IsockError::PortOutOfRange { port: 5008, .. })
        ));
    }

    #[test]
    fn url_parsing() {
        let cfg = SessionConfig::from_url("intellisock://sds.local:5002/timeout=1.5").unwrap();
        assert_eq!(cfg.endpoint.host, "sds.local");
        assert_eq!(cfg.endpoint.port, 5002);
        assert_eq!(cfg.endpoint.network_timeout(), Duration::from_millis(1500));

        let cfg = SessionConfig::from_url("INTELLISOCK://10.1.1.1:5000").unwrap();
        assert_eq!(cfg.endpoint.address(), "10.1.1.1:5000");

        let cfg = SessionConfig::from_url("host:5001").unwrap();
        assert_eq!(cfg.endpoint.port, 5001);
    }

    #[test]
    fn url_errors() {
        assert!(matches!(
            SessionConfig::from_url("intellisock://host"),
            Err(IsockError::InvalidUrl { .. })
        ));
        assert!(matches!(
            SessionConfig::from_url("intellisock://host:5000/logging=debug"),
            Err(IsockError::InvalidUrl { .. })
        ));
        assert!(matches!(
            SessionConfig::from_url("intellisock://host:23"),
            Err(IsockError::PortOutOfRange { port: 23, .. })
        ));
    }

    #[test]
    fn identical_xon_xoff_rejected() {
        let mut cfg = SessionConfig::default();
        cfg.serial.flow_control = FlowControl::Software {
            xon: 0x11,
            xoff: 0x11,
            strip: false,
        };
        assert!(matches!(cfg.validate(), Err(IsockError::InvalidConfig(_))));
    }
}
