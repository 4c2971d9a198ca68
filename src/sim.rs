//! # Simulated rangefinder
//!
//! An in-process stand-in for the laser distance sensor. It keeps the device state
//! (distance, laser on/off, whether it is plugged in or answering) and processes the
//! same line commands as the real hardware, replying with the same strings.
//!
//! [`Rangefinder`] is a cheap, cloneable handle: the station drives it through
//! [`SimConnector`]/[`SimTransport`] while a test or the `--simulate` mode of the
//! terminal changes its state from outside.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::laser::{Connector, LaserTransport};

const IDENTITY: &str = "AR1000 SIMULATOR";

// Error types for command processing.
#[derive(Debug, PartialEq)]
pub enum CommandError {
    /// The line is empty once the terminator is stripped.
    Empty,
    /// The command is not one the device understands.
    Unknown(String),
}

// The commands the rangefinder understands.
#[derive(Debug, PartialEq)]
enum Command {
    Identify,
    DistanceMeasure,
    LaserOff,
    LaserOn,
}

#[derive(Debug)]
struct DeviceState {
    distance_m: f64,
    laser_on: bool,
    plugged_in: bool,
    // Accepts commands but never answers.
    silent: bool,
    // Replaces the reply to the next DM.
    next_reading: Option<String>,
    // Replace the replies to the next LF/LO commands, in order.
    next_acks: VecDeque<String>,
    // Bytes received but not yet terminated by '\n'.
    rx: String,
    // Reply lines waiting to be read.
    tx: VecDeque<String>,
    commands: Vec<String>,
}

/// Handle to a simulated device.
#[derive(Debug, Clone)]
pub struct Rangefinder {
    inner: Arc<Mutex<DeviceState>>,
}

impl Rangefinder {
    /// Creates a plugged-in, answering device with the laser on.
    pub fn new(distance_m: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DeviceState {
                distance_m,
                laser_on: true,
                plugged_in: true,
                silent: false,
                next_reading: None,
                next_acks: VecDeque::new(),
                rx: String::new(),
                tx: VecDeque::new(),
                commands: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_distance(&self, distance_m: f64) {
        self.state().distance_m = distance_m;
    }

    pub fn distance(&self) -> f64 {
        self.state().distance_m
    }

    pub fn laser_on(&self) -> bool {
        self.state().laser_on
    }

    pub fn unplug(&self) {
        self.state().plugged_in = false;
    }

    pub fn plug_in(&self) {
        self.state().plugged_in = true;
    }

    pub fn is_plugged_in(&self) -> bool {
        self.state().plugged_in
    }

    pub fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    /// Makes the next `DM` answer `reply` verbatim instead of the distance.
    pub fn override_next_reading(&self, reply: &str) {
        self.state().next_reading = Some(reply.to_string());
    }

    /// Makes the next `LF` or `LO` answer `reply` instead of echoing the command. The
    /// laser state is left unchanged. Calls queue up, one reply per command.
    pub fn override_next_ack(&self, reply: &str) {
        self.state().next_acks.push_back(reply.to_string());
    }

    /// Puts a line in the output buffer as if the device had sent it unprompted.
    pub fn queue_unsolicited(&self, line: &str) {
        self.state().tx.push_back(line.to_string());
    }

    pub fn pending_output(&self) -> usize {
        self.state().tx.len()
    }

    pub fn last_command(&self) -> Option<String> {
        self.state().commands.last().cloned()
    }

    /// Every command received, in order, without terminators.
    pub fn command_log(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Processes one command line and returns the device's reply, if any.
    pub fn process_command(&self, command_str: &str) -> Result<Option<String>, CommandError> {
        self.state().process_command(command_str)
    }

    /// Feeds raw bytes from the host. Every complete line is processed and its reply
    /// queued for reading. Unknown commands answer `E61`.
    fn receive(&self, bytes: &[u8]) {
        let mut state = self.state();
        state.rx.push_str(&String::from_utf8_lossy(bytes));

        while let Some(end) = state.rx.find('\n') {
            let line: String = state.rx.drain(..=end).collect();
            let reply = match state.process_command(&line) {
                Ok(reply) => reply,
                Err(CommandError::Empty) => None,
                Err(CommandError::Unknown(_)) => Some(String::from("E61")),
            };
            if let Some(reply) = reply {
                if !state.silent {
                    state.tx.push_back(reply);
                }
            }
        }
    }
}

impl DeviceState {
    /// Parses the content of a command line into a `Command`.
    fn parse_command(&self, content: &str) -> Result<Command, CommandError> {
        match content {
            "" => Err(CommandError::Empty),
            "ID" => Ok(Command::Identify),
            "DM" => Ok(Command::DistanceMeasure),
            "LF" => Ok(Command::LaserOff),
            "LO" => Ok(Command::LaserOn),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }

    fn process_command(&mut self, command_str: &str) -> Result<Option<String>, CommandError> {
        let content = command_str.trim_end_matches(&['\r', '\n'][..]).trim();
        let command = self.parse_command(content)?;
        self.commands.push(content.to_string());
        Ok(Some(self.execute_command(command)))
    }

    /// Executes a parsed command and returns the response string.
    fn execute_command(&mut self, command: Command) -> String {
        match command {
            Command::Identify => String::from(IDENTITY),
            Command::DistanceMeasure => match self.next_reading.take() {
                Some(reply) => reply,
                // The real device switches the beam on for a measurement.
                None => {
                    self.laser_on = true;
                    format!("{:.3}", self.distance_m)
                }
            },
            Command::LaserOff => match self.next_acks.pop_front() {
                Some(reply) => reply,
                None => {
                    self.laser_on = false;
                    String::from("LF")
                }
            },
            Command::LaserOn => match self.next_acks.pop_front() {
                Some(reply) => reply,
                None => {
                    self.laser_on = true;
                    String::from("LO")
                }
            },
        }
    }
}

/// [`LaserTransport`] connected to a [`Rangefinder`].
#[derive(Debug, Clone)]
pub struct SimTransport {
    device: Rangefinder,
}

impl LaserTransport for SimTransport {
    fn send(&mut self, command: &[u8]) -> io::Result<()> {
        if !self.device.is_plugged_in() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        self.device.receive(command);
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.device.state().tx.pop_front())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.device.state().tx.clear();
        Ok(())
    }
}

/// Opens [`SimTransport`]s to one simulated device, whatever port name is asked for.
#[derive(Debug, Clone)]
pub struct SimConnector {
    device: Rangefinder,
}

impl SimConnector {
    pub fn new(device: Rangefinder) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Rangefinder {
        &self.device
    }
}

impl Connector for SimConnector {
    type Transport = SimTransport;

    fn open(&mut self, port_name: &str) -> Result<SimTransport, serialport::Error> {
        if !self.device.is_plugged_in() {
            return Err(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                format!("no simulated device on {}", port_name),
            ));
        }
        let mut state = self.device.state();
        state.rx.clear();
        state.tx.clear();
        drop(state);
        Ok(SimTransport {
            device: self.device.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_identify() {
        let device = Rangefinder::new(1.0);
        assert_eq!(device.process_command("ID\r\n").unwrap(), Some(String::from(IDENTITY)));
    }

    #[test]
    fn measures_distance_in_meters() {
        let device = Rangefinder::new(3.302);
        assert_eq!(device.process_command("DM\n").unwrap(), Some(String::from("3.302")));
        device.set_distance(12.5);
        assert_eq!(device.process_command("DM\n").unwrap(), Some(String::from("12.500")));
    }

    #[test]
    fn laser_off_and_on_echo_their_tokens() {
        let device = Rangefinder::new(1.0);
        assert_eq!(device.process_command("LF\r\n").unwrap(), Some(String::from("LF")));
        assert!(!device.laser_on());
        assert_eq!(device.process_command("LO\r\n").unwrap(), Some(String::from("LO")));
        assert!(device.laser_on());
    }

    #[test]
    fn override_replaces_one_reading() {
        let device = Rangefinder::new(1.0);
        device.override_next_reading("E17");
        assert_eq!(device.process_command("DM\n").unwrap(), Some(String::from("E17")));
        assert_eq!(device.process_command("DM\n").unwrap(), Some(String::from("1.000")));
    }

    #[test]
    fn ack_override_leaves_the_laser_alone() {
        let device = Rangefinder::new(1.0);
        device.override_next_ack("E61");
        assert_eq!(device.process_command("LF\r\n").unwrap(), Some(String::from("E61")));
        assert!(device.laser_on());
        assert_eq!(device.process_command("LF\r\n").unwrap(), Some(String::from("LF")));
        assert!(!device.laser_on());
    }

    #[test]
    fn reject_unknown_and_empty_commands() {
        let device = Rangefinder::new(1.0);
        assert_eq!(
            device.process_command("DT\r\n").unwrap_err(),
            CommandError::Unknown(String::from("DT"))
        );
        assert_eq!(device.process_command("\r\n").unwrap_err(), CommandError::Empty);
    }

    #[test]
    fn transport_answers_unknown_commands_with_e61() {
        let device = Rangefinder::new(1.0);
        let mut transport = SimConnector::new(device).open("SIM0").unwrap();
        transport.send(b"XX\r\n").unwrap();
        assert_eq!(transport.read_line().unwrap(), Some(String::from("E61")));
        assert_eq!(transport.read_line().unwrap(), None);
    }

    #[test]
    fn transport_buffers_partial_lines() {
        let device = Rangefinder::new(2.0);
        let mut transport = SimConnector::new(device.clone()).open("SIM0").unwrap();
        transport.send(b"D").unwrap();
        assert_eq!(transport.read_line().unwrap(), None);
        transport.send(b"M\n").unwrap();
        assert_eq!(transport.read_line().unwrap(), Some(String::from("2.000")));
        assert_eq!(device.command_log(), vec!["DM"]);
    }

    #[test]
    fn silent_device_logs_but_does_not_answer() {
        let device = Rangefinder::new(1.0);
        let mut transport = SimConnector::new(device.clone()).open("SIM0").unwrap();
        device.set_silent(true);
        transport.send(b"ID\r\n").unwrap();
        assert_eq!(transport.read_line().unwrap(), None);
        assert_eq!(device.last_command().as_deref(), Some("ID"));
    }

    #[test]
    fn unplugged_device_cannot_be_opened_or_written() {
        let device = Rangefinder::new(1.0);
        let mut connector = SimConnector::new(device.clone());
        let mut transport = connector.open("SIM0").unwrap();

        device.unplug();
        assert!(connector.open("SIM0").is_err());
        assert_eq!(
            transport.send(b"DM\n").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );

        device.plug_in();
        assert!(connector.open("SIM0").is_ok());
    }
}
