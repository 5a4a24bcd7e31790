use std::time::Duration;

use crate::models::error::CaptureError;
use crate::models::format::AudioFormat;
use crate::models::recording_result::RecordingSummary;
use crate::traits::capture_sink::CaptureSink;

/// The single open capture: a sink plus the layout it was opened with.
///
/// Data flow:
/// ```text
/// [unlock(region1, region2?)] → append → [CaptureSink] → close → RecordingSummary
/// ```
pub struct CaptureSession {
    sink: Box<dyn CaptureSink>,
    format: AudioFormat,
    throttle: Option<Duration>,
    bytes_captured: u64,
    writes: u64,
}

impl CaptureSession {
    /// Open `sink` for `format`. The sink is dropped if it refuses to open.
    pub fn open(
        mut sink: Box<dyn CaptureSink>,
        format: AudioFormat,
        throttle: Option<Duration>,
    ) -> Result<Self, CaptureError> {
        sink.open(&format)?;
        Ok(Self {
            sink,
            format,
            throttle,
            bytes_captured: 0,
            writes: 0,
        })
    }

    /// Append one committed lock: the primary region, then the wraparound
    /// region if the host's ring buffer wrapped.
    pub fn append(&mut self, primary: &[u8], wraparound: Option<&[u8]>) -> Result<(), CaptureError> {
        self.sink.write(primary)?;
        self.bytes_captured += primary.len() as u64;

        if let Some(second) = wraparound {
            self.sink.write(second)?;
            self.bytes_captured += second.len() as u64;
        }

        self.writes += 1;
        Ok(())
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Pause to apply after each append, if throttling is configured.
    pub fn throttle(&self) -> Option<Duration> {
        self.throttle
    }

    pub fn bytes_captured(&self) -> u64 {
        self.bytes_captured
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn close(mut self) -> Result<RecordingSummary, CaptureError> {
        self.sink.close()
    }
}
