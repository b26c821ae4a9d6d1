//! `serialport` backed ports.

use {
    crate::{
        error::{Error, Result},
        port::{Port, PortEnumerator, PortInfo, SerialConfig, usb_first},
    },
    log::trace,
    serialport::{ClearBuffer, SerialPort, SerialPortType},
    std::io::{self, Read, Write},
};

/// An open serial port (8N1, no flow control).
pub struct NativePort {
    inner: Box<dyn SerialPort>,
    name: String,
}

impl NativePort {
    /// Open the port described by `config`.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        trace!(
            "Opening {} at {} baud",
            config.port_name, config.baud_rate
        );
        let inner = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        Ok(Self {
            inner,
            name: config
                .port_name
                .clone(),
        })
    }
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.inner
            .clear(ClearBuffer::All)?;
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner
            .read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .flush()
    }
}

/// Enumerates ports through `serialport`.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let mut ports: Vec<PortInfo> = serialport::available_ports()
            .map_err(Error::Serial)?
            .into_iter()
            .map(|p| {
                let usb_id = match p.port_type {
                    SerialPortType::UsbPort(info) => Some((info.vid, info.pid)),
                    _ => None,
                };
                PortInfo {
                    name: p.port_name,
                    usb_id,
                }
            })
            .collect();

        usb_first(&mut ports);
        Ok(ports)
    }
}
