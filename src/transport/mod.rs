//! Stream transports that carry the hub protocol.
//!
//! The codec never touches sockets directly. A [`Connector`] opens
//! [`HubStream`]s; the connection and the event stream each ask it for their
//! own stream.
//!
//! - [`TcpConnector`] - dials the hub over TCP
//! - [`memory::MemoryConnector`] - scripted in-process hub for tests

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

pub mod memory;

pub use memory::MemoryConnector;

/// A bidirectional byte stream to the hub.
pub trait HubStream: Read + Write + Send {
    /// Clone a handle to the same stream.
    ///
    /// Used to shut the stream down from another thread while a reader is
    /// blocked on it.
    fn try_clone_stream(&self) -> io::Result<Box<dyn HubStream>>;

    /// Shut down both directions, unblocking any pending read.
    fn shutdown(&self) -> io::Result<()>;

    /// Bound blocking reads and writes. `None` blocks indefinitely.
    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl HubStream for TcpStream {
    fn try_clone_stream(&self) -> io::Result<Box<dyn HubStream>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}

/// Opens streams to one hub.
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Open a new stream to the hub.
    fn connect(&self) -> io::Result<Box<dyn HubStream>>;

    /// Host name written in the `Host` header.
    fn host(&self) -> &str;

    /// Human-readable address for log and error messages.
    fn describe(&self) -> String {
        self.host().to_string()
    }
}

/// Dials the hub over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    /// Create a connector for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Port the connector dials.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> io::Result<Box<dyn HubStream>> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        // Requests are small and latency-bound
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
