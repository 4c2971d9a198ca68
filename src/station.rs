//! The station controller.
//!
//! [`StationController`] owns the current scan, the last good measurement and the
//! verdict derived from them, plus the laser link. Every input arrives as a named event
//! (`on_scan`, `on_clear`, `on_tick`, `on_reset`, `on_print_request`), is handled to
//! completion, and leaves a consistent state behind. Renderers read a [`StationView`]
//! snapshot and never touch the state itself.

use log::{error, info, warn};

use crate::barcode::{self, ScanBuffer, ScanResult};
use crate::config::StationConfig;
use crate::label::{self, LabelPayload, LabelPrinter};
use crate::laser::{Connector, DriverError, LaserLinkDriver, LinkState, Measurement};
use crate::tolerance::{ToleranceSettings, ToleranceVerdict};

/// Result of a print request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintOutcome {
    Printed,
    /// The cut is not within tolerance; nothing was sent.
    Refused,
    Failed(String),
}

/// Immutable snapshot of everything the display shows.
#[derive(Debug, Clone, PartialEq)]
pub struct StationView {
    pub scan: ScanResult,
    /// Keystrokes received since the last line end.
    pub pending_scan: String,
    pub measurement: Option<Measurement>,
    /// Measured length plus the configured laser offset.
    pub table_length_inches: f64,
    pub verdict: ToleranceVerdict,
    pub link_state: LinkState,
    pub laser_status: String,
    pub print_status: Option<String>,
}

impl StationView {
    /// Work order for display; four blanks when the scan had none.
    pub fn order_display(&self) -> &str {
        self.scan.order_id.as_deref().unwrap_or("    ")
    }
}

pub struct StationController<C: Connector> {
    config: StationConfig,
    tolerance: ToleranceSettings,
    laser: LaserLinkDriver<C>,
    scan_buffer: ScanBuffer,
    scan: ScanResult,
    measurement: Option<Measurement>,
    verdict: ToleranceVerdict,
    print_status: Option<String>,
}

impl<C: Connector> StationController<C> {
    pub fn new(config: StationConfig, laser: LaserLinkDriver<C>) -> Self {
        let tolerance = config.tolerance();
        let verdict = tolerance.classify(0.0, 0.0);
        Self {
            config,
            tolerance,
            laser,
            scan_buffer: ScanBuffer::new(),
            scan: ScanResult::empty(),
            measurement: None,
            verdict,
            print_status: None,
        }
    }

    /// Opens the laser link on the configured port. A failure is left in the link state.
    pub fn start(&mut self) {
        let port = self.config.laser_port.clone();
        // The error is already recorded as the link's fault and status.
        let _ = self.laser.connect(&port);
        self.recompute();
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn link_state(&self) -> &LinkState {
        self.laser.state()
    }

    /// Feeds one scanner keystroke. Returns `false` if it is not part of a payload.
    pub fn on_scan_char(&mut self, c: char) -> bool {
        self.scan_buffer.push(c)
    }

    /// Line end from the scanner: the buffered keystrokes form one payload.
    pub fn on_scan_commit(&mut self) {
        let line = self.scan_buffer.commit();
        self.on_scan(&line);
    }

    /// A complete payload. Undecodable payloads are logged and fall back to zero length.
    pub fn on_scan(&mut self, raw: &str) {
        self.scan = barcode::parse_or_fallback(raw);
        self.print_status = None;
        self.recompute();
    }

    pub fn on_clear(&mut self) {
        info!("Clearing Barcodes...");
        self.scan_buffer.clear();
        self.scan = ScanResult::empty();
        self.print_status = None;
        self.recompute();
    }

    /// One measurement poll. A good reading replaces the held measurement; anything else
    /// keeps the last good one.
    pub fn on_tick(&mut self) -> Result<(), DriverError> {
        let result = self.laser.measure();
        match &result {
            Ok(measurement) => self.measurement = Some(measurement.clone()),
            Err(DriverError::DeviceStatus { token, .. }) => {
                warn!("Laser reported {:?}; keeping last measurement", token)
            }
            Err(e) => warn!("Measurement poll failed: {}", e),
        }
        self.recompute();
        result.map(|_| ())
    }

    /// Cycles the laser, or reconnects it when the link is down.
    pub fn on_reset(&mut self) -> Result<(), DriverError> {
        let result = self.laser.reset();
        if let Err(e) = &result {
            error!("Laser reset failed: {}", e);
        }
        self.recompute();
        result
    }

    /// Prints a label if, and only if, the current cut is within tolerance.
    pub fn on_print_request(&mut self, printer: &mut dyn LabelPrinter) -> PrintOutcome {
        if !self.verdict.print_allowed {
            info!("Print request ignored: {}", self.verdict);
            return PrintOutcome::Refused;
        }

        let payload = self.label_payload();
        let outcome = match label::send_label(printer, &payload) {
            Ok(()) => PrintOutcome::Printed,
            Err(e) => PrintOutcome::Failed(e.to_string()),
        };
        self.print_status = match &outcome {
            PrintOutcome::Printed => Some(String::from("Label printed.")),
            PrintOutcome::Failed(reason) => Some(format!("Print failed: {}", reason)),
            PrintOutcome::Refused => None,
        };
        outcome
    }

    /// The label for the current cut. "Produced" is the table length, offset included.
    pub fn label_payload(&self) -> LabelPayload {
        LabelPayload {
            order_id: self.scan.order_id.clone().unwrap_or_default(),
            order_length_inches: self.scan.target_length_inches,
            produced_length_inches: self.table_length(),
            tolerance_inches: self.tolerance.min_tolerance_inches,
            deviation_inches: self.verdict.deviation_inches,
        }
    }

    pub fn view(&self) -> StationView {
        StationView {
            scan: self.scan.clone(),
            pending_scan: self.scan_buffer.pending().to_string(),
            measurement: self.measurement.clone(),
            table_length_inches: self.table_length(),
            verdict: self.verdict,
            link_state: self.laser.state().clone(),
            laser_status: self.laser.status().to_string(),
            print_status: self.print_status.clone(),
        }
    }

    /// Closes the laser link.
    pub fn shutdown(&mut self) {
        self.laser.disconnect();
    }

    fn measured_inches(&self) -> f64 {
        self.measurement.as_ref().map_or(0.0, |m| m.inches)
    }

    fn table_length(&self) -> f64 {
        self.measured_inches() + self.tolerance.offset_inches
    }

    fn recompute(&mut self) {
        self.verdict = self
            .tolerance
            .classify(self.scan.target_length_inches, self.measured_inches());
        info!(
            "Order Length: {:.2}, Order Number: {}, Table Length: {:.2}, Off By: {:.2}, {}",
            self.scan.target_length_inches,
            self.scan.order_id.as_deref().unwrap_or("-"),
            self.table_length(),
            self.verdict.deviation_inches,
            self.verdict
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::PrintError;
    use crate::laser::LinkTiming;
    use crate::sim::{Rangefinder, SimConnector};
    use crate::tolerance::{Band, Direction};

    #[derive(Default)]
    struct RecordingPrinter {
        jobs: Vec<String>,
        fail: bool,
    }

    impl LabelPrinter for RecordingPrinter {
        fn print_raw(&mut self, data: &[u8]) -> Result<(), PrintError> {
            if self.fail {
                return Err(PrintError::SpoolerStart(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no spooler",
                )));
            }
            self.jobs.push(String::from_utf8_lossy(data).into_owned());
            Ok(())
        }
    }

    fn station(device: &Rangefinder) -> StationController<SimConnector> {
        station_with(device, StationConfig::default())
    }

    fn station_with(device: &Rangefinder, config: StationConfig) -> StationController<SimConnector> {
        let driver = LaserLinkDriver::new(SimConnector::new(device.clone()), config.laser_port.clone())
            .with_timing(LinkTiming::immediate());
        let mut station = StationController::new(config, driver);
        station.start();
        station
    }

    #[test]
    fn starts_with_nothing_scanned() {
        let device = Rangefinder::new(1.0);
        let station = station(&device);
        let view = station.view();
        assert_eq!(view.scan, ScanResult::empty());
        assert_eq!(view.order_display(), "    ");
        assert_eq!(view.measurement, None);
        assert_eq!(view.link_state, LinkState::Connected);
    }

    #[test]
    fn near_tolerance_cut_cannot_print() {
        let device = Rangefinder::new(3.302);
        let mut station = station(&device);
        let mut printer = RecordingPrinter::default();

        station.on_scan("1234128.50");
        station.on_tick().unwrap();

        let view = station.view();
        assert_eq!(view.scan.order_id.as_deref(), Some("1234"));
        assert_eq!(view.scan.target_length_inches, 128.5);
        assert!((view.table_length_inches - 130.0).abs() < 0.001);
        assert!((view.verdict.deviation_inches - 1.5).abs() < 0.001);
        assert_eq!(view.verdict.band, Band::Near);
        assert_eq!(view.verdict.direction, Direction::TooLong);
        assert!(!view.verdict.print_allowed);

        assert_eq!(station.on_print_request(&mut printer), PrintOutcome::Refused);
        assert!(printer.jobs.is_empty());
    }

    #[test]
    fn device_error_keeps_the_last_measurement() {
        let device = Rangefinder::new(3.302);
        let mut station = station(&device);
        station.on_tick().unwrap();
        let before = station.view().measurement;

        device.override_next_reading("E52");
        let err = station.on_tick().unwrap_err();
        assert!(matches!(err, DriverError::DeviceStatus { .. }));

        let view = station.view();
        assert_eq!(view.measurement, before);
        assert_eq!(view.laser_status, "E52: Faulty laser diode");
        assert_eq!(view.link_state, LinkState::Connected);
    }

    #[test]
    fn within_tolerance_cut_prints_a_label() {
        let device = Rangefinder::new(3.264);
        let mut station = station(&device);
        let mut printer = RecordingPrinter::default();

        station.on_scan("4321128.50");
        station.on_tick().unwrap();
        assert!(station.view().verdict.print_allowed);

        assert_eq!(station.on_print_request(&mut printer), PrintOutcome::Printed);
        assert_eq!(printer.jobs.len(), 1);
        assert!(printer.jobs[0].contains("^FDWO#4321:   10 FT 8.50 IN^FS"));
        assert_eq!(station.view().print_status.as_deref(), Some("Label printed."));
    }

    #[test]
    fn print_failure_leaves_station_state_alone() {
        let device = Rangefinder::new(3.264);
        let mut station = station(&device);
        let mut printer = RecordingPrinter {
            fail: true,
            ..Default::default()
        };
        station.on_scan("128.50");
        station.on_tick().unwrap();
        let before = station.view();

        assert!(matches!(station.on_print_request(&mut printer), PrintOutcome::Failed(_)));
        let after = station.view();
        assert_eq!(after.verdict, before.verdict);
        assert_eq!(after.scan, before.scan);
        assert!(after.print_status.unwrap().starts_with("Print failed"));
    }

    #[test]
    fn offset_shifts_the_table_length() {
        let device = Rangefinder::new(3.264);
        let config = StationConfig {
            laser_offset_inches: 1.5,
            ..StationConfig::default()
        };
        let mut station = station_with(&device, config);
        station.on_scan("130.00");
        station.on_tick().unwrap();

        let view = station.view();
        assert!((view.table_length_inches - 130.0).abs() < 0.01);
        assert_eq!(view.verdict.band, Band::Within);
        let payload = station.label_payload();
        assert_eq!(payload.order_id, "");
        assert_eq!(payload.produced_length_inches, view.table_length_inches);
        assert!(payload.produced_length_inches > view.measurement.unwrap().inches);
    }

    #[test]
    fn scanner_keystrokes_commit_on_line_end() {
        let device = Rangefinder::new(1.0);
        let mut station = station(&device);
        for c in "1234128.50".chars() {
            assert!(station.on_scan_char(c));
        }
        assert!(!station.on_scan_char('x'));
        assert_eq!(station.view().pending_scan, "1234128.50");
        assert_eq!(station.view().scan, ScanResult::empty());

        station.on_scan_commit();
        let view = station.view();
        assert_eq!(view.pending_scan, "");
        assert_eq!(view.order_display(), "1234");
    }

    #[test]
    fn bad_payload_falls_back_to_zero_length() {
        let device = Rangefinder::new(1.0);
        let mut station = station(&device);
        station.on_scan("96.5");
        station.on_scan("1234..5");

        let view = station.view();
        assert_eq!(view.scan.order_id.as_deref(), Some("1234"));
        assert_eq!(view.scan.target_length_inches, 0.0);
    }

    #[test]
    fn clear_keeps_the_measurement() {
        let device = Rangefinder::new(2.0);
        let mut station = station(&device);
        station.on_scan("1234128.50");
        station.on_tick().unwrap();
        station.on_clear();

        let view = station.view();
        assert_eq!(view.scan, ScanResult::empty());
        assert!(view.measurement.is_some());
        assert_eq!(view.verdict.band, Band::Outside);
    }

    #[test]
    fn timeout_faults_the_link_and_keeps_the_measurement() {
        let device = Rangefinder::new(2.0);
        let mut station = station(&device);
        station.on_tick().unwrap();

        device.set_silent(true);
        assert!(matches!(station.on_tick(), Err(DriverError::Timeout)));
        let view = station.view();
        assert_eq!(view.link_state, LinkState::Faulted(String::from("Laser offline.")));
        assert!(view.measurement.is_some());

        // Polling a dead link is a cheap no-op.
        assert!(matches!(station.on_tick(), Err(DriverError::NotConnected)));
        assert_eq!(station.view().laser_status, "Laser not connected.");
    }

    #[test]
    fn reset_recovers_a_faulted_link() {
        let device = Rangefinder::new(2.0);
        let mut station = station(&device);
        device.set_silent(true);
        assert!(station.on_tick().is_err());

        device.set_silent(false);
        station.on_reset().unwrap();
        assert_eq!(station.link_state(), &LinkState::Connected);
        assert!(station.on_tick().is_ok());
    }

    #[test]
    fn missing_laser_does_not_stop_the_station() {
        let device = Rangefinder::new(2.0);
        device.unplug();
        let mut station = station(&device);
        assert!(matches!(station.link_state(), LinkState::Faulted(_)));

        station.on_scan("96");
        assert_eq!(station.view().scan.target_length_inches, 96.0);
        assert!(station.on_reset().is_err());
    }

    #[test]
    fn shutdown_disconnects() {
        let device = Rangefinder::new(2.0);
        let mut station = station(&device);
        station.shutdown();
        assert_eq!(station.link_state(), &LinkState::Disconnected);
    }
}
