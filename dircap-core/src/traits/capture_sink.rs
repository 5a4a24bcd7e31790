use crate::models::error::CaptureError;
use crate::models::format::AudioFormat;
use crate::models::recording_result::RecordingSummary;

/// Destination for captured sample bytes.
///
/// Called with the controller's lock held, from whichever host thread
/// happened to commit audio. Implementations should not block for long.
pub trait CaptureSink: Send {
    /// Prepare the sink for a stream of the given layout.
    fn open(&mut self, format: &AudioFormat) -> Result<(), CaptureError>;

    /// Append raw sample bytes exactly as the host submitted them.
    fn write(&mut self, data: &[u8]) -> Result<(), CaptureError>;

    /// Finalize the output and report what was captured.
    fn close(&mut self) -> Result<RecordingSummary, CaptureError>;
}
