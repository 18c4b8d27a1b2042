use crate::error::LinkError;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

const READ_CHUNK: usize = 256;

pub trait LoomReader: Send {
    /// `Ok(None)` if nothing arrived within `timeout`.
    fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError>;
}

pub trait LoomWriter: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError>;
    /// Close the line. A reader blocked on the same line returns an error.
    fn close(&mut self);
}

/// Something that can open a fresh line to the loom.
pub trait Transport: Send {
    fn open(&mut self) -> Result<(Box<dyn LoomReader>, Box<dyn LoomWriter>), LinkError>;

    fn describe(&self) -> String;

    fn is_mock(&self) -> bool {
        false
    }

    /// Simulated operator input. Only the mock loom understands these.
    fn send_oob(&mut self, command: &str) -> Result<(), LinkError> {
        Err(LinkError::Open {
            port: self.describe(),
            reason: format!("out-of-band command {command:?} needs the mock loom"),
        })
    }
}

/// A serial line exposed over TCP by a bridge such as ser2net.
pub struct TcpTransport {
    addr: String,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Transport for TcpTransport {
    fn open(&mut self) -> Result<(Box<dyn LoomReader>, Box<dyn LoomWriter>), LinkError> {
        let stream = TcpStream::connect(&self.addr).map_err(|e| LinkError::Open {
            port: self.addr.clone(),
            reason: e.to_string(),
        })?;
        let _ = stream.set_nodelay(true);
        stream.set_write_timeout(Some(Duration::from_millis(500)))?;
        let reader = stream.try_clone()?;
        Ok((
            Box::new(TcpReader { stream: reader }),
            Box::new(TcpWriter { stream }),
        ))
    }

    fn describe(&self) -> String {
        self.addr.clone()
    }
}

struct TcpReader {
    stream: TcpStream,
}

impl LoomReader for TcpReader {
    fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        // A zero timeout means "block forever" to the OS.
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; READ_CHUNK];
        match self.stream.read(&mut buf) {
            Ok(0) => Err(LinkError::Closed),
            Ok(n) => Ok(Some(buf[..n].to_vec())),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

struct TcpWriter {
    stream: TcpStream,
}

impl LoomWriter for TcpWriter {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
