//! Serial link to the PN532.
//!
//! The PN532 framing only needs a byte stream with a read timeout, so it is
//! written against [`Port`] and tested against an in-memory port. The
//! `native` feature provides the `serialport` implementation.

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Settings for opening a serial link.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout. Reads return `TimedOut` once it expires.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Create a configuration with a 50 ms read timeout.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(50),
        }
    }
}

/// A serial port found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor and product id, for USB serial adapters.
    pub usb_id: Option<(u16, u16)>,
}

impl PortInfo {
    /// Whether the port is a USB serial adapter.
    pub fn is_usb(&self) -> bool {
        self.usb_id
            .is_some()
    }
}

/// Byte stream to the reader.
pub trait Port: Read + Write + Send {
    /// Port name/path.
    fn name(&self) -> &str;

    /// Drop anything pending in the input and output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Write all bytes and flush.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.write_all(buf)?;
        self.flush()?;
        Ok(())
    }
}

/// Lists the serial ports of the host.
pub trait PortEnumerator {
    /// List serial ports, USB adapters first.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

/// Order ports so USB serial adapters come first, keeping the relative order
/// otherwise.
pub fn usb_first(ports: &mut [PortInfo]) {
    ports.sort_by_key(|port| !port.is_usb());
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, usb: bool) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            usb_id: usb.then_some((0x067B, 0x2303)),
        }
    }

    #[test]
    fn test_usb_first_is_stable() {
        let mut ports = vec![
            port("/dev/ttyS0", false),
            port("/dev/ttyUSB1", true),
            port("/dev/ttyS1", false),
            port("/dev/ttyUSB0", true),
        ];
        usb_first(&mut ports);

        let names: Vec<&str> = ports
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["/dev/ttyUSB1", "/dev/ttyUSB0", "/dev/ttyS0", "/dev/ttyS1"]
        );
    }

    #[test]
    fn test_serial_config() {
        let config = SerialConfig::new("COM3", 115200);
        assert_eq!(config.port_name, "COM3");
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.timeout, Duration::from_millis(50));
    }
}
