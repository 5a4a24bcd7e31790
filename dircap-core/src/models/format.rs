/// PCM stream layout submitted through a buffer's format-set call.
///
/// Only the three fields the container needs are kept; everything else in
/// the host's format block (extension sizes, block align hints) is ignored
/// and recomputed from these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
        }
    }

    /// Bytes per frame: one sample for every channel, rounded up to whole bytes.
    pub fn frame_size(&self) -> u16 {
        let bits = self.channels as u32 * self.bits_per_sample as u32;
        bits.div_ceil(8) as u16
    }

    /// Bytes per second of audio at this layout.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate.saturating_mul(self.frame_size() as u32)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz / {}-bit / {} ch",
            self.sample_rate, self.bits_per_sample, self.channels
        )
    }
}
