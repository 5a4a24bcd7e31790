use std::path::PathBuf;

use super::format::AudioFormat;

/// Summary of a finished capture, produced when a sink is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    /// Where the container was written, if the sink is file-backed.
    pub file_path: Option<PathBuf>,
    pub format: AudioFormat,
    /// Raw sample bytes written after the header.
    pub data_bytes: u64,
    /// SHA-256 hex digest of the finished file, if the sink is file-backed.
    pub checksum: Option<String>,
}

impl RecordingSummary {
    /// Playback length implied by the captured byte count.
    pub fn duration_secs(&self) -> f64 {
        let byte_rate = self.format.byte_rate();
        if byte_rate == 0 {
            return 0.0;
        }
        self.data_bytes as f64 / byte_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_byte_rate() {
        let summary = RecordingSummary {
            file_path: None,
            format: AudioFormat::new(48000, 16, 2),
            data_bytes: 192_000,
            checksum: None,
        };
        assert!((summary.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_format_has_zero_duration() {
        let summary = RecordingSummary {
            file_path: None,
            format: AudioFormat::new(0, 16, 2),
            data_bytes: 100,
            checksum: None,
        };
        assert_eq!(summary.duration_secs(), 0.0);
    }
}
