//! HID device adapter (hidapi)
//!
//! The poll thread owns the device handle. Feedback writes are assembled
//! into full reports on the caller's side and queued to that thread, which
//! sends them between reads, so nothing on the async side touches hidapi.

use anyhow::{bail, Context, Result};
use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::CString;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

use super::DeviceOutput;
use crate::feedback::OutputDescriptor;
use crate::hid::ReportSource;
use crate::mapping::OutputReport;
use crate::midi::format_hex;

/// Output report length used when the mapping does not declare one
pub const DEFAULT_OUTPUT_REPORT_LENGTH: usize = 64;

/// Reports waiting for the poll thread before writes start failing
pub const OUTPUT_QUEUE_CAPACITY: usize = 64;

/// Open a device by its hidapi path
pub fn open_path(api: &HidApi, path: &str) -> Result<HidDevice> {
    let c_path = CString::new(path).context("HID path contains a NUL byte")?;
    api.open_path(&c_path)
        .with_context(|| format!("Failed to open HID device at {}", path))
}

impl ReportSource for HidDevice {
    fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        let len = self.read_timeout(buf, timeout_ms).context("HID read failed")?;
        Ok(len)
    }

    fn write_report(&mut self, report: &[u8]) -> Result<()> {
        self.write(report).context("HID write failed")?;
        Ok(())
    }
}

/// Output reports under construction, one buffer per report id
///
/// LEDs sharing a report keep their state between writes: setting one bit
/// rewrites the whole report with every other bit unchanged.
#[derive(Debug)]
pub struct OutputReports {
    length: usize,
    reports: HashMap<u8, Vec<u8>>,
}

impl OutputReports {
    pub fn new(layout: Option<OutputReport>) -> Self {
        let length = layout
            .map(|r| r.length)
            .unwrap_or(DEFAULT_OUTPUT_REPORT_LENGTH)
            .max(2);
        Self {
            length,
            reports: HashMap::new(),
        }
    }

    /// Apply one output and return the full report to send
    ///
    /// Byte offsets count from the report id at byte 0. Returns `None` for
    /// outputs that are not HID or fall outside the report.
    pub fn apply(&mut self, output: &OutputDescriptor) -> Option<&[u8]> {
        let OutputDescriptor::Hid {
            report_id,
            byte,
            bit,
            value,
        } = *output
        else {
            return None;
        };
        if byte == 0 || byte >= self.length {
            return None;
        }

        let length = self.length;
        let report = self.reports.entry(report_id).or_insert_with(|| {
            let mut buf = vec![0u8; length];
            buf[0] = report_id;
            buf
        });

        match bit {
            Some(bit) => {
                let mask = 1u8 << (bit & 7);
                if value != 0 {
                    report[byte] |= mask;
                } else {
                    report[byte] &= !mask;
                }
            }
            None => report[byte] = value,
        }
        Some(report.as_slice())
    }
}

/// Feedback writer for a HID device
///
/// Never blocks: a finished report is handed to the poll thread through a
/// bounded queue, and a full or closed queue is an error.
pub struct HidOutputWriter {
    device_id: String,
    reports: Mutex<OutputReports>,
    queue: mpsc::Sender<Vec<u8>>,
}

impl HidOutputWriter {
    /// Create a writer and the receiving end for the device's poll thread
    pub fn new(device_id: impl Into<String>, layout: Option<OutputReport>) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (queue, outgoing) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
        let writer = Self {
            device_id: device_id.into(),
            reports: Mutex::new(OutputReports::new(layout)),
            queue,
        };
        (writer, outgoing)
    }
}

impl DeviceOutput for HidOutputWriter {
    fn write(&self, output: &OutputDescriptor) -> Result<()> {
        let mut reports = self.reports.lock();
        let Some(report) = reports.apply(output) else {
            trace!("Output {:?} does not fit '{}' reports", output, self.device_id);
            return Ok(());
        };
        trace!("HID TX '{}': {}", self.device_id, format_hex(report));
        match self.queue.try_send(report.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => bail!("HID output queue for '{}' is full", self.device_id),
            Err(TrySendError::Closed(_)) => bail!("HID poll thread for '{}' has stopped", self.device_id),
        }
    }
}
