//! spiadapter-link - Host driver for the USB SPI adapter
//!
//! This crate implements the command/response protocol spoken by the SPI
//! adapter, a microcontroller that exposes an SPI bus and 8 auxiliary
//! digital pins through a virtual serial port.
//!
//! # Protocol Overview
//!
//! Commands are a one-byte ASCII opcode followed by fixed fields. Responses
//! start with a status byte, `K` for success or `E` followed by an error
//! code. A link is established by an echo handshake followed by an
//! identity query whose version byte selects the adapter limits.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "serial")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use spiadapter_link::{open_serial, LinkOptions, SpiMode, SpiTransfer};
//!
//! let mut link = open_serial("/dev/ttyACM0", &LinkOptions::default())?;
//!
//! // Write 3 bytes and clock in 2 more
//! let data = [0x11, 0x22, 0x33];
//! let xfer = SpiTransfer::new(&data)
//!     .extra_bytes(2)
//!     .mode(SpiMode::Mode1)
//!     .speed_hz(100_000);
//! let miso = link.send(&xfer)?;
//! assert_eq!(miso.len(), 5);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "serial"))]
//! # fn main() {}
//! ```

pub mod device;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-exports
pub use device::{AdapterLink, LinkOptions};
pub use error::{AdapterError, DeviceErrorCode, ErrorKind, Result};
pub use protocol::{
    byte_to_speed, speed_to_byte, AdapterInfo, AuxPinMode, ProtocolVersion, SpiConfig, SpiMode,
    SpiTransfer,
};
pub use transport::Transport;

#[cfg(feature = "serial")]
pub use transport::serial::SerialTransport;

use std::time::Duration;

/// Connection options for a serial adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConnection {
    /// Device path (e.g., "/dev/ttyACM0" or "COM18")
    pub device: String,
    /// Link options
    pub options: LinkOptions,
}

impl AdapterConnection {
    /// Parse a connection string
    ///
    /// Formats:
    /// - `/dev/ttyACM0` - bare port name, default options
    /// - `dev=/dev/ttyACM0` - same
    /// - `dev=/dev/ttyACM0,timeout=1.5,retries=5,cooldown=300`
    ///
    /// `timeout` is in seconds, `cooldown` in milliseconds.
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        Self::parse_with(s, LinkOptions::default())
    }

    /// Parse a connection string, options not given keep the values in `base`
    pub fn parse_with(s: &str, base: LinkOptions) -> std::result::Result<Self, String> {
        let mut device = None;
        let mut options = base;

        for opt in s.split(',').filter(|o| !o.is_empty()) {
            let Some((key, value)) = opt.split_once('=') else {
                if device.is_some() {
                    return Err(format!(
                        "Invalid parameter format: '{}' (expected key=value)",
                        opt
                    ));
                }
                device = Some(opt.to_string());
                continue;
            };

            match key {
                "dev" => device = Some(value.to_string()),
                "timeout" => {
                    let secs: f64 = value
                        .parse()
                        .map_err(|_| format!("Invalid timeout: {}", value))?;
                    options.timeout = Duration::try_from_secs_f64(secs)
                        .ok()
                        .filter(|t| !t.is_zero())
                        .ok_or_else(|| format!("Invalid timeout: {}", value))?;
                }
                "retries" => {
                    let n: u32 = value
                        .parse()
                        .map_err(|_| format!("Invalid retries value: {}", value))?;
                    if n == 0 {
                        return Err("retries must be at least 1".to_string());
                    }
                    options.handshake_attempts = n;
                }
                "cooldown" => {
                    let ms: u64 = value
                        .parse()
                        .map_err(|_| format!("Invalid cooldown value: {}", value))?;
                    options.handshake_cooldown = Duration::from_millis(ms);
                }
                _ => {
                    log::warn!("adapter: Unknown option: {}={}", key, value);
                }
            }
        }

        let device = device
            .filter(|d| !d.is_empty())
            .ok_or_else(|| "No device specified. Use dev=<port>".to_string())?;

        Ok(Self { device, options })
    }
}

/// Open an adapter link via serial port
#[cfg(feature = "serial")]
pub fn open_serial(device: &str, options: &LinkOptions) -> Result<AdapterLink<SerialTransport>> {
    let transport = SerialTransport::open(device, options.timeout)?;
    AdapterLink::open(transport, options)
}

/// Open an adapter link from a connection string
#[cfg(feature = "serial")]
pub fn open_connection(
    s: &str,
) -> std::result::Result<AdapterLink<SerialTransport>, Box<dyn std::error::Error>> {
    let conn = AdapterConnection::parse(s)?;
    Ok(open_serial(&conn.device, &conn.options)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_port() {
        let conn = AdapterConnection::parse("/dev/ttyACM0").unwrap();
        assert_eq!(conn.device, "/dev/ttyACM0");
        assert_eq!(conn.options, LinkOptions::default());
    }

    #[test]
    fn test_parse_options() {
        let conn =
            AdapterConnection::parse("dev=COM18,timeout=2.5,retries=5,cooldown=100").unwrap();
        assert_eq!(conn.device, "COM18");
        assert_eq!(conn.options.timeout, Duration::from_millis(2500));
        assert_eq!(conn.options.handshake_attempts, 5);
        assert_eq!(conn.options.handshake_cooldown, Duration::from_millis(100));
    }

    #[test]
    fn test_parse_with_base() {
        let base = LinkOptions {
            handshake_attempts: 7,
            ..Default::default()
        };
        let conn = AdapterConnection::parse_with("dev=COM3,timeout=0.5", base).unwrap();
        assert_eq!(conn.options.handshake_attempts, 7);
        assert_eq!(conn.options.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_parse_errors() {
        assert!(AdapterConnection::parse("").is_err());
        assert!(AdapterConnection::parse("timeout=1").is_err());
        assert!(AdapterConnection::parse("dev=COM1,timeout=abc").is_err());
        assert!(AdapterConnection::parse("dev=COM1,timeout=0").is_err());
        assert!(AdapterConnection::parse("dev=COM1,retries=0").is_err());
        assert!(AdapterConnection::parse("COM1,COM2").is_err());
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let conn = AdapterConnection::parse("dev=COM1,baud=9600").unwrap();
        assert_eq!(conn.device, "COM1");
    }
}
