//! Production label output.
//!
//! A label is a short ZPL II program. The station only builds the bytes; a
//! [`LabelPrinter`] hands them to the printer untouched.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

use log::{error, info};
use thiserror::Error;

use crate::config::PrinterConfig;
use crate::units::format_length;

/// The values printed on one label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelPayload {
    /// Work order; blank when the scan carried none.
    pub order_id: String,
    pub order_length_inches: f64,
    /// Table length as displayed: measured length plus the laser offset.
    pub produced_length_inches: f64,
    pub tolerance_inches: f64,
    pub deviation_inches: f64,
}

impl LabelPayload {
    pub fn to_zpl(&self) -> String {
        let mut zpl = String::from("^XA");
        zpl.push_str("^CFA,20");
        zpl.push_str(&format!(
            "^FO0,90^FDWO#{}:   {}^FS",
            self.order_id,
            format_length(self.order_length_inches)
        ));
        zpl.push_str(&format!(
            "^FO0,110^FDProduced:  {}^FS",
            format_length(self.produced_length_inches)
        ));
        zpl.push_str(&format!(
            "^FO0,130^FDTolerance: {}^FS",
            format_length(self.tolerance_inches)
        ));
        zpl.push_str(&format!(
            "^FO0,150^FDOff by:    {}^FS",
            format_length(self.deviation_inches)
        ));
        zpl.push_str("^XZ");
        zpl
    }
}

#[derive(Debug, Error)]
pub enum PrintError {
    #[error("could not start the print spooler: {0}")]
    SpoolerStart(#[source] io::Error),
    #[error("could not send the job to the print spooler: {0}")]
    SpoolerWrite(#[source] io::Error),
    #[error("print spooler did not finish: {0}")]
    SpoolerWait(#[source] io::Error),
    #[error("print spooler rejected the job ({0})")]
    SpoolerExit(ExitStatus),
    #[error("could not write to printer {}: {source}", .path.display())]
    Device {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Sink for raw printer bytes.
pub trait LabelPrinter {
    fn print_raw(&mut self, data: &[u8]) -> Result<(), PrintError>;
}

pub const SPOOLER_PROGRAM: &str = "lp";

/// Submits raw jobs through the system spooler (`lp -o raw`).
#[derive(Debug, Clone)]
pub struct SpoolerPrinter {
    pub program: String,
    /// Destination queue; the spooler's default printer when `None`.
    pub queue: Option<String>,
}

impl Default for SpoolerPrinter {
    fn default() -> Self {
        Self {
            program: SPOOLER_PROGRAM.to_string(),
            queue: None,
        }
    }
}

impl LabelPrinter for SpoolerPrinter {
    fn print_raw(&mut self, data: &[u8]) -> Result<(), PrintError> {
        let mut command = Command::new(&self.program);
        command.args(["-o", "raw", "-t", "label"]);
        if let Some(queue) = &self.queue {
            command.args(["-d", queue.as_str()]);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(PrintError::SpoolerStart)?;

        // Dropping stdin closes the pipe so the spooler sees the end of the job.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(data),
            None => Ok(()),
        };
        // The child is reaped even when the job could not be written.
        let waited = child.wait();
        written.map_err(PrintError::SpoolerWrite)?;
        let status = waited.map_err(PrintError::SpoolerWait)?;
        if status.success() {
            Ok(())
        } else {
            Err(PrintError::SpoolerExit(status))
        }
    }
}

/// Writes raw jobs straight to a printer device, share or file.
#[derive(Debug, Clone)]
pub struct DevicePrinter {
    pub path: PathBuf,
}

impl LabelPrinter for DevicePrinter {
    fn print_raw(&mut self, data: &[u8]) -> Result<(), PrintError> {
        let device_error = |source: io::Error| PrintError::Device {
            path: self.path.clone(),
            source,
        };
        let mut device = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(device_error)?;
        device.write_all(data).map_err(device_error)?;
        device.flush().map_err(device_error)
    }
}

/// Builds the printer named by the configuration.
pub fn printer_from_config(config: &PrinterConfig) -> Box<dyn LabelPrinter> {
    match (&config.device, &config.queue) {
        (Some(path), _) => Box::new(DevicePrinter { path: path.clone() }),
        (None, queue) => Box::new(SpoolerPrinter {
            queue: queue.clone(),
            ..SpoolerPrinter::default()
        }),
    }
}

/// Renders and sends one label. Failures are logged and returned; nothing is retried.
pub fn send_label(printer: &mut dyn LabelPrinter, payload: &LabelPayload) -> Result<(), PrintError> {
    info!("Printing Label...");
    let zpl = payload.to_zpl();
    printer.print_raw(zpl.as_bytes()).map_err(|e| {
        error!("Error printing label: {}", e);
        e
    })
}
