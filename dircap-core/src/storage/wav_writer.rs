use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::CaptureError;
use crate::models::format::AudioFormat;
use crate::models::recording_result::RecordingSummary;
use crate::processing::wav_format;
use crate::traits::capture_sink::CaptureSink;

/// Streaming WAV file writer.
///
/// ## File Format
///
/// ```text
/// [44-byte WAV header, size fields zero until close]
/// [raw PCM data exactly as submitted...]
/// ```
///
/// The total length is unknown while capturing, so `close` seeks back and
/// patches the RIFF and data sizes in place.
pub struct WavFileWriter {
    file_path: PathBuf,
    file: Option<BufWriter<File>>,
    format: Option<AudioFormat>,
    data_bytes: u64,
}

impl WavFileWriter {
    pub fn new(file_path: PathBuf) -> Self {
        Self {
            file_path,
            file: None,
            format: None,
            data_bytes: 0,
        }
    }

    /// Raw sample bytes written so far, excluding the header.
    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn patch_sizes(file: &mut BufWriter<File>, data_bytes: u64) -> Result<(), CaptureError> {
        file.seek(SeekFrom::Start(wav_format::RIFF_SIZE_OFFSET))
            .map_err(|e| CaptureError::StorageError(e.to_string()))?;
        file.write_all(&wav_format::riff_chunk_size(data_bytes).to_le_bytes())
            .map_err(|e| CaptureError::StorageError(e.to_string()))?;

        file.seek(SeekFrom::Start(wav_format::DATA_SIZE_OFFSET))
            .map_err(|e| CaptureError::StorageError(e.to_string()))?;
        file.write_all(&wav_format::data_chunk_size(data_bytes).to_le_bytes())
            .map_err(|e| CaptureError::StorageError(e.to_string()))?;

        file.flush().map_err(|e| CaptureError::StorageError(e.to_string()))
    }
}

impl CaptureSink for WavFileWriter {
    /// Create (or truncate) the file and write a header with zero sizes.
    fn open(&mut self, format: &AudioFormat) -> Result<(), CaptureError> {
        if self.file.is_some() {
            self.close()?;
        }

        if let Some(parent) = self.file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| CaptureError::StorageError(format!("failed to create directory: {}", e)))?;
        }

        let file = File::create(&self.file_path)
            .map_err(|e| CaptureError::StorageError(format!("failed to create file: {}", e)))?;
        let mut file = BufWriter::new(file);

        let header = wav_format::generate_wav_header(format, 0);
        file.write_all(&header)
            .map_err(|e| CaptureError::StorageError(format!("write failed: {}", e)))?;

        self.file = Some(file);
        self.format = Some(*format);
        self.data_bytes = 0;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        let file = self.file.as_mut().ok_or(CaptureError::NotOpen)?;
        file.write_all(data)
            .map_err(|e| CaptureError::StorageError(format!("write failed: {}", e)))?;
        self.data_bytes += data.len() as u64;
        Ok(())
    }

    /// Patch the header sizes, flush, and compute the SHA-256 checksum.
    fn close(&mut self) -> Result<RecordingSummary, CaptureError> {
        let mut file = self.file.take().ok_or(CaptureError::NotOpen)?;
        let format = self.format.take().ok_or(CaptureError::NotOpen)?;

        if self.data_bytes > u32::MAX as u64 {
            log::warn!(
                "Capture of {} bytes exceeds the 32-bit size fields, header sizes are clamped",
                self.data_bytes
            );
        }
        Self::patch_sizes(&mut file, self.data_bytes)?;
        drop(file);

        let checksum = sha256_file(&self.file_path)?;
        Ok(RecordingSummary {
            file_path: Some(self.file_path.clone()),
            format,
            data_bytes: self.data_bytes,
            checksum: Some(checksum),
        })
    }
}

impl Drop for WavFileWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(e) = self.close() {
                log::warn!("Failed to finalize {}: {}", self.file_path.display(), e);
            }
        }
    }
}

/// Compute SHA-256 hex digest of a file.
fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let data =
        fs::read(path).map_err(|e| CaptureError::StorageError(format!("failed to read file for checksum: {}", e)))?;
    let digest = Sha256::digest(&data);
    Ok(hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
