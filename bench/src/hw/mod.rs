//! SCPI transports and the instrument drivers built on them.
//!
//! Both bench instruments speak line-oriented SCPI over a raw TCP socket.
//! Commands are terminated with a newline; queries read exactly one reply
//! line. Every round-trip blocks until the reply arrives or the I/O timeout
//! expires.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use cycler_core::scpi::{Identity, parse_identity};
use tracing::{debug, trace};

use crate::error::DriverError;

pub mod dp8xx;
pub mod sdl1030x;

pub use dp8xx::Dp8xx;
pub use sdl1030x::Sdl1030x;

/// Read and write timeout; some instruments take well over the usual ten seconds to answer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
/// Pause after each write for instruments that drop commands sent back to back.
pub const DEFAULT_WRITE_DELAY: Duration = Duration::from_millis(100);

/// Line-oriented command channel to one instrument.
pub trait ScpiTransport {
    /// Name of the far end for log lines and errors.
    fn peer(&self) -> &str;

    /// Sends a command that produces no reply.
    fn send(&mut self, command: &str) -> Result<(), DriverError>;

    /// Sends a query and returns the reply without its line terminator.
    fn query(&mut self, command: &str) -> Result<String, DriverError>;
}

impl<T> ScpiTransport for &mut T
where
    T: ScpiTransport + ?Sized,
{
    fn peer(&self) -> &str {
        (**self).peer()
    }

    fn send(&mut self, command: &str) -> Result<(), DriverError> {
        (**self).send(command)
    }

    fn query(&mut self, command: &str) -> Result<String, DriverError> {
        (**self).query(command)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransportOptions {
    pub timeout: Duration,
    pub write_delay: Option<Duration>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            write_delay: None,
        }
    }
}

/// SCPI framing over any byte stream.
pub struct ScpiStream<S> {
    peer: String,
    stream: BufReader<S>,
    write_delay: Option<Duration>,
}

/// Raw-socket SCPI connection.
pub type TcpTransport = ScpiStream<TcpStream>;

impl ScpiStream<TcpStream> {
    /// Connects to `address` (`host:port`) and applies the timeouts in `options`.
    pub fn connect(address: &str, options: TransportOptions) -> Result<Self, DriverError> {
        let io_error = |source| DriverError::Io {
            peer: address.to_string(),
            source,
        };
        let target = address
            .to_socket_addrs()
            .map_err(io_error)?
            .next()
            .ok_or_else(|| io_error(io::Error::new(io::ErrorKind::NotFound, "no address")))?;

        let stream = TcpStream::connect_timeout(&target, options.timeout).map_err(io_error)?;
        stream
            .set_read_timeout(Some(options.timeout))
            .map_err(io_error)?;
        stream
            .set_write_timeout(Some(options.timeout))
            .map_err(io_error)?;
        stream.set_nodelay(true).map_err(io_error)?;
        debug!(peer = address, %target, "connected");

        Ok(Self::new(address, stream, options.write_delay))
    }
}

impl<S> ScpiStream<S>
where
    S: Read + Write,
{
    #[must_use]
    pub fn new(peer: &str, stream: S, write_delay: Option<Duration>) -> Self {
        Self {
            peer: peer.to_string(),
            stream: BufReader::new(stream),
            write_delay,
        }
    }

    /// Returns the underlying stream.
    #[must_use]
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    fn io_error(&self, source: io::Error) -> DriverError {
        DriverError::Io {
            peer: self.peer.clone(),
            source,
        }
    }
}

impl<S> ScpiTransport for ScpiStream<S>
where
    S: Read + Write,
{
    fn peer(&self) -> &str {
        &self.peer
    }

    fn send(&mut self, command: &str) -> Result<(), DriverError> {
        trace!(peer = %self.peer, command, "send");
        let stream = self.stream.get_mut();
        let written = stream
            .write_all(command.as_bytes())
            .and_then(|()| stream.write_all(b"\n"))
            .and_then(|()| stream.flush());
        written.map_err(|source| self.io_error(source))?;

        if let Some(delay) = self.write_delay {
            thread::sleep(delay);
        }
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String, DriverError> {
        self.send(command)?;

        let mut reply = String::new();
        let read = self
            .stream
            .read_line(&mut reply)
            .map_err(|source| self.io_error(source))?;
        if read == 0 {
            return Err(DriverError::Closed {
                peer: self.peer.clone(),
            });
        }
        let reply = reply.trim_end_matches(['\r', '\n']).to_string();
        trace!(peer = %self.peer, command, reply, "reply");
        Ok(reply)
    }
}

/// Rejects setpoints the instruments would misread, before anything is sent.
pub(crate) fn non_negative(what: &'static str, value: f64) -> Result<f64, DriverError> {
    if value < 0.0 || value.is_nan() {
        return Err(DriverError::NegativeSetpoint { what, value });
    }
    Ok(value)
}

/// Asks the instrument for its identity and rejects models outside `known`.
pub fn identify<T>(
    transport: &mut T,
    role: &'static str,
    command: &str,
    known: &[&str],
) -> Result<Identity, DriverError>
where
    T: ScpiTransport + ?Sized,
{
    let reply = transport.query(command)?;
    let identity = parse_identity(&reply).map_err(|reason| DriverError::Reply {
        command: command.to_string(),
        reason,
    })?;
    debug!(
        peer = transport.peer(),
        vendor = identity.vendor(),
        model = %identity.model,
        serial = %identity.serial,
        firmware = %identity.firmware,
        "discovered {role}"
    );

    if !identity.is_known(known) {
        return Err(DriverError::Unsupported {
            role,
            model: identity.model,
        });
    }
    Ok(identity)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use super::ScpiTransport;
    use crate::error::DriverError;

    /// Transport that answers queries from a script and keeps every line it was sent.
    #[derive(Default)]
    pub struct ScriptedTransport {
        pub replies: VecDeque<String>,
        pub sent: Vec<String>,
    }

    impl ScriptedTransport {
        pub fn with_replies(replies: &[&str]) -> Self {
            Self {
                replies: replies.iter().map(ToString::to_string).collect(),
                sent: Vec::new(),
            }
        }

        pub fn reply(&mut self, reply: &str) {
            self.replies.push_back(reply.to_string());
        }
    }

    impl ScpiTransport for ScriptedTransport {
        fn peer(&self) -> &str {
            "scripted"
        }

        fn send(&mut self, command: &str) -> Result<(), DriverError> {
            self.sent.push(command.to_string());
            Ok(())
        }

        fn query(&mut self, command: &str) -> Result<String, DriverError> {
            self.send(command)?;
            self.replies.pop_front().ok_or_else(|| DriverError::Closed {
                peer: "scripted".to_string(),
            })
        }
    }
}
