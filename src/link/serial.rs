use std::{
    io::{self, Read, Write},
    time::Duration,
};

use log::{debug, info};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::{LinkError, LinkTransport, is_timeout};

/// Baud rate of every Velbus serial interface.
pub const DEFAULT_BAUD_RATE: u32 = 38_400;

/// A Velbus interface attached to a local serial port, 8N1 without flow control.
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    read_timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            read_timeout,
            port: None,
        }
    }
}

impl LinkTransport for SerialTransport {
    fn open(&mut self) -> Result<(), LinkError> {
        self.close();

        let port = serialport::new(&self.port_name, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| LinkError::OpenFailed {
                target: self.describe(),
                source: io::Error::from(e),
            })?;

        info!("opened {}", self.describe());
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("closed {}", self.describe());
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let port = self.port.as_mut().ok_or(LinkError::NotOpen)?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(LinkError::from_io(e)),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let port = self.port.as_mut().ok_or(LinkError::NotOpen)?;
        port.write_all(bytes).map_err(LinkError::from_io)?;
        port.flush().map_err(LinkError::from_io)
    }

    fn describe(&self) -> String {
        format!("serial port {} at {} baud", self.port_name, self.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_port_refuses_io() {
        let mut transport =
            SerialTransport::new("/dev/ttyVELBUS", DEFAULT_BAUD_RATE, Duration::from_millis(5));

        assert!(!transport.is_open());
        assert!(matches!(
            transport.write_all(&[0x0F]),
            Err(LinkError::NotOpen)
        ));
        assert!(matches!(
            transport.read_available(&mut [0; 4]),
            Err(LinkError::NotOpen)
        ));
    }

    #[test]
    fn missing_port_fails_to_open() {
        let mut transport = SerialTransport::new(
            "/dev/does-not-exist-velbus",
            DEFAULT_BAUD_RATE,
            Duration::from_millis(5),
        );

        let err = transport.open().unwrap_err();
        assert!(matches!(err, LinkError::OpenFailed { .. }));
        assert!(err.to_string().contains("/dev/does-not-exist-velbus"));
        assert!(!transport.is_open());
    }
}
