//! Serial link to the laser rangefinder.
//!
//! The device speaks a line-oriented ASCII protocol at 9600 baud:
//!
//! | command   | meaning                      | reply                              |
//! |-----------|------------------------------|------------------------------------|
//! | `ID\r\n`  | identify                     | one or more identification lines   |
//! | `DM\n`    | single distance measurement  | decimal meters, or an `Exx` token  |
//! | `LF\r\n`  | laser off                    | `LF` or an `Exx` token             |
//! | `LO\r\n`  | laser on                     | `LO` or an `Exx` token             |
//!
//! [`LaserLinkDriver`] owns the connection and its [`LinkState`]. All I/O is blocking
//! with bounded timeouts, so a caller must never issue a second request before the
//! previous call has returned.

use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use serialport::{ClearBuffer, SerialPort};
use thiserror::Error;

use crate::laser_errors;
use crate::units::meters_to_inches;

pub const BAUD_RATE: u32 = 9600;
/// Read/write timeout applied to every serial operation.
pub const IO_TIMEOUT: Duration = Duration::from_secs(3);

/// Identification lines read after `ID` are capped so a chattering device cannot stall
/// the connect.
const MAX_ID_LINES: usize = 16;

/// Longest reply line kept; the rangefinder's replies are a few bytes.
pub const MAX_LINE_LEN: usize = 64;

pub mod commands {
    pub const IDENTIFY: &[u8] = b"ID\r\n";
    pub const MEASURE: &[u8] = b"DM\n";
    pub const LASER_OFF: &[u8] = b"LF\r\n";
    pub const LASER_ON: &[u8] = b"LO\r\n";
}

/// A byte stream to the device that can exchange whole lines.
pub trait LaserTransport {
    fn send(&mut self, command: &[u8]) -> io::Result<()>;

    /// Reads one line without its terminator. Returns `Ok(None)` when the read timed out
    /// before anything arrived.
    fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Drops any unread input so stale replies cannot leak into the next exchange.
    fn discard_input(&mut self) -> io::Result<()>;
}

/// Opens transports by port name.
pub trait Connector {
    type Transport: LaserTransport;

    fn open(&mut self, port_name: &str) -> Result<Self::Transport, serialport::Error>;
}

/// [`LaserTransport`] over a real serial port.
///
/// A line read stops once the port's timeout has elapsed since the read began, even
/// while bytes keep arriving, and never keeps more than [`MAX_LINE_LEN`] bytes.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl LaserTransport for SerialTransport {
    fn send(&mut self, command: &[u8]) -> io::Result<()> {
        self.port.write_all(command)?;
        self.port.flush()
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let deadline = Instant::now() + self.port.timeout();
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while line.len() < MAX_LINE_LEN && Instant::now() < deadline {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) if byte[0] == b'\n' => {
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
                Ok(_) => line.push(byte[0]),
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }

        if line.is_empty() {
            Ok(None)
        } else {
            // Partial line at the deadline or the length cap; hand back what arrived.
            warn!("Laser line cut short after {} bytes", line.len());
            Ok(Some(String::from_utf8_lossy(&line).into_owned()))
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Opens serial ports at the rangefinder's fixed settings.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self {
            baud_rate: BAUD_RATE,
            timeout: IO_TIMEOUT,
        }
    }
}

impl Connector for SerialConnector {
    type Transport = SerialTransport;

    fn open(&mut self, port_name: &str) -> Result<SerialTransport, serialport::Error> {
        let port = serialport::new(port_name, self.baud_rate)
            .timeout(self.timeout)
            .open()?;
        Ok(SerialTransport::new(port))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Faulted(String),
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

/// One successful distance reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub raw_meters: f64,
    pub inches: f64,
    pub captured_at: DateTime<Local>,
}

impl Measurement {
    pub fn from_meters(raw_meters: f64) -> Self {
        Self {
            raw_meters,
            inches: meters_to_inches(raw_meters),
            captured_at: Local::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Laser not found on {port} - check connection and configuration.")]
    PortUnavailable {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("Laser connection on {port} timed out.")]
    TimedOut { port: String },
    #[error("Laser connection on {port} failed: {source}")]
    Io {
        port: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Laser not connected.")]
    NotConnected,
    #[error("Laser offline.")]
    Timeout,
    /// The device answered with a status token instead of the expected value. The link
    /// itself is healthy.
    #[error("{description}")]
    DeviceStatus { token: String, description: String },
    #[error("Laser link error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Connect(#[from] ConnectError),
}

/// Delays the device needs between a command and its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    /// Wait after `ID` and `DM` before reading.
    pub settle: Duration,
    /// Wait between laser off and laser on during a reset.
    pub reset_pause: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            reset_pause: Duration::from_secs(1),
        }
    }
}

impl LinkTiming {
    /// No delays; for devices that answer synchronously.
    pub const fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            reset_pause: Duration::ZERO,
        }
    }
}

/// Drives the request/response session with the rangefinder.
pub struct LaserLinkDriver<C: Connector> {
    connector: C,
    timing: LinkTiming,
    port_name: String,
    transport: Option<C::Transport>,
    state: LinkState,
    status: String,
}

impl<C: Connector> LaserLinkDriver<C> {
    pub fn new(connector: C, port_name: impl Into<String>) -> Self {
        Self {
            connector,
            timing: LinkTiming::default(),
            port_name: port_name.into(),
            transport: None,
            state: LinkState::Disconnected,
            status: String::new(),
        }
    }

    pub fn with_timing(mut self, timing: LinkTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    /// Last diagnostic text for the operator.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Opens `port` and checks that the device answers `ID`.
    pub fn connect(&mut self, port: &str) -> Result<(), ConnectError> {
        self.port_name = port.to_string();
        self.transport = None;
        self.state = LinkState::Connecting;

        match self.open_and_identify() {
            Ok(transport) => {
                self.transport = Some(transport);
                self.state = LinkState::Connected;
                self.status = format!("Laser connected on {}", self.port_name);
                info!("Laser connected on {}", self.port_name);
                Ok(())
            }
            Err(e) => {
                match &e {
                    ConnectError::PortUnavailable { source, .. } => {
                        error!("Serial error on {}: {}", self.port_name, source)
                    }
                    ConnectError::TimedOut { .. } => {
                        error!("Laser read timed out on {}", self.port_name)
                    }
                    ConnectError::Io { source, .. } => {
                        error!("Serial I/O error on {}: {}", self.port_name, source)
                    }
                }
                self.status = e.to_string();
                self.state = LinkState::Faulted(e.to_string());
                Err(e)
            }
        }
    }

    fn open_and_identify(&mut self) -> Result<C::Transport, ConnectError> {
        let port = self.port_name.clone();
        let mut transport = self
            .connector
            .open(&port)
            .map_err(|source| ConnectError::PortUnavailable {
                port: port.clone(),
                source,
            })?;

        let io_failure = |source: io::Error| {
            if source.kind() == io::ErrorKind::TimedOut {
                ConnectError::TimedOut { port: port.clone() }
            } else {
                ConnectError::Io {
                    port: port.clone(),
                    source,
                }
            }
        };

        transport.send(commands::IDENTIFY).map_err(&io_failure)?;
        thread::sleep(self.timing.settle);

        let mut lines = Vec::new();
        while lines.len() < MAX_ID_LINES {
            match transport.read_line().map_err(&io_failure)? {
                Some(line) => lines.push(line),
                None => break,
            }
        }
        if lines.is_empty() {
            return Err(ConnectError::TimedOut { port: port.clone() });
        }
        debug!("Laser identification: {:?}", lines);
        Ok(transport)
    }

    /// Closes the port.
    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            info!("Laser on {} disconnected", self.port_name);
        }
        self.state = LinkState::Disconnected;
    }

    /// Cycles the laser off and on. When the link is not connected this reconnects
    /// instead.
    pub fn reset(&mut self) -> Result<(), DriverError> {
        if !self.state.is_connected() {
            warn!("Laser not connected. Attempting to reconnect...");
            let port = self.port_name.clone();
            return self.connect(&port).map_err(DriverError::from);
        }

        info!("Resetting Laser...");
        info!("Writing LF (laser off)");
        self.acknowledge(commands::LASER_OFF)?;
        thread::sleep(self.timing.reset_pause);
        info!("Writing LO (laser on)");
        self.acknowledge(commands::LASER_ON)?;
        self.discard_input();
        Ok(())
    }

    fn acknowledge(&mut self, command: &[u8]) -> Result<(), DriverError> {
        let reply = self.exchange(command, Duration::ZERO)?;
        let token = reply.trim();
        info!("Laser response: {}", token);
        self.status = status_text(token);
        Ok(())
    }

    /// Takes one distance reading.
    ///
    /// A status token in place of a number is returned as
    /// [`DriverError::DeviceStatus`] and leaves the link connected; a timeout faults it.
    pub fn measure(&mut self) -> Result<Measurement, DriverError> {
        if !self.state.is_connected() {
            self.status = DriverError::NotConnected.to_string();
            warn!("Laser not connected.");
            return Err(DriverError::NotConnected);
        }

        debug!("Getting laser length (DM)");
        let reply = self.exchange(commands::MEASURE, self.timing.settle)?;
        debug!("Laser response: {:?}", reply);
        let token = reply.trim();

        let result = match token.parse::<f64>() {
            Ok(meters) if meters.is_finite() => Ok(Measurement::from_meters(meters)),
            _ => {
                if laser_errors::is_error_token(token) {
                    error!("Laser reported error {}", token);
                } else {
                    error!("Non-numeric value received from laser: {:?}", token);
                }
                let description = status_text(token);
                self.status = description.clone();
                Err(DriverError::DeviceStatus {
                    token: token.to_string(),
                    description,
                })
            }
        };

        self.discard_input();
        result
    }

    /// Sends `command`, waits `settle`, and reads the reply line. Timeouts and transport
    /// failures fault the link.
    fn exchange(&mut self, command: &[u8], settle: Duration) -> Result<String, DriverError> {
        let transport = self.transport.as_mut().ok_or(DriverError::NotConnected)?;

        let outcome = transport.send(command).and_then(|()| {
            thread::sleep(settle);
            transport.read_line()
        });

        match outcome {
            Ok(Some(line)) => Ok(line),
            Ok(None) => {
                error!("Laser read timed out.");
                Err(self.fault(DriverError::Timeout))
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                error!("Laser write timed out: {}", e);
                Err(self.fault(DriverError::Timeout))
            }
            Err(e) => {
                error!("Laser I/O error: {}", e);
                Err(self.fault(DriverError::Io(e)))
            }
        }
    }

    fn fault(&mut self, e: DriverError) -> DriverError {
        self.transport = None;
        self.status = e.to_string();
        self.state = LinkState::Faulted(e.to_string());
        e
    }

    fn discard_input(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            debug!("Flushing buffer...");
            if let Err(e) = transport.discard_input() {
                warn!("Could not flush laser input buffer: {}", e);
            }
        }
    }
}

/// Status line text for a device token, naming unknown tokens explicitly.
fn status_text(token: &str) -> String {
    let description = laser_errors::describe(token);
    if description.is_empty() {
        warn!("Unrecognized laser response: {:?}", token);
        format!("{}: Unrecognized laser response", token)
    } else {
        description
    }
}
