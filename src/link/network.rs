use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    time::Duration,
};

use log::{debug, info};

use super::{LinkError, LinkTransport, is_timeout};

/// A TCP connection to a Velbus network bridge.
pub struct NetworkTransport {
    host: String,
    port: u16,
    read_timeout: Duration,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

impl NetworkTransport {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        read_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            read_timeout,
            connect_timeout,
            stream: None,
        }
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let mut last_error = None;
        for address in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&address, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("connection to {address} failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no address")
        }))
    }
}

impl LinkTransport for NetworkTransport {
    fn open(&mut self) -> Result<(), LinkError> {
        self.close();

        let open_failed = |source| LinkError::OpenFailed {
            target: self.describe(),
            source,
        };
        let stream = self.connect().map_err(open_failed)?;
        // A zero timeout would make reads block forever.
        let timeout = Some(self.read_timeout.max(Duration::from_millis(1)));
        stream.set_read_timeout(timeout).map_err(open_failed)?;
        stream.set_nodelay(true).map_err(open_failed)?;

        info!("connected to {}", self.describe());
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!("closed {}", self.describe());
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotOpen)?;
        match stream.read(buf) {
            Ok(0) if !buf.is_empty() => Err(LinkError::Disconnected),
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(LinkError::from_io(e)),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotOpen)?;
        stream.write_all(bytes).map_err(LinkError::from_io)
    }

    fn describe(&self) -> String {
        format!("network bridge {}:{}", self.host, self.port)
    }
}
