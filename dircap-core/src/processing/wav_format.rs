//! Canonical PCM WAV container layout.
//!
//! Generates the 44-byte RIFF header and the helpers that patch its two size
//! fields once capture closes and the total length is known.

use crate::models::format::AudioFormat;

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Offset of the RIFF chunk size (file size - 8).
pub const RIFF_SIZE_OFFSET: u64 = 0x04;

/// Offset of the data chunk size.
pub const DATA_SIZE_OFFSET: u64 = 0x28;

/// Generate a 44-byte WAV RIFF header.
///
/// Format: PCM (format code 1), little-endian.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    file size - 8 (36 + data_size)
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (PCM format chunk size)
/// [20-21]  1 (PCM format code)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * frame_size
/// [32-33]  frame_size = ceil(channels * bit_depth / 8)
/// [34-35]  bit_depth
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: &AudioFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let chunk_size = riff_chunk_size(data_size as u64);

    let mut header = [0u8; WAV_HEADER_SIZE];

    // RIFF chunk descriptor
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    // fmt sub-chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&format.frame_size().to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    // data sub-chunk
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// RIFF chunk size for a body of `data_size` bytes, clamped to the 32-bit field.
pub fn riff_chunk_size(data_size: u64) -> u32 {
    clamp_u32(data_size + WAV_HEADER_SIZE as u64 - 8)
}

/// Data chunk size for a body of `data_size` bytes, clamped to the 32-bit field.
pub fn data_chunk_size(data_size: u64) -> u32 {
    clamp_u32(data_size)
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
