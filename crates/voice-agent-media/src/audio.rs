//! Raw PCM recordings and WAV encoding.

use std::path::Path;
use std::time::Duration;

/// A finished recording of 16-bit little-endian PCM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recording {
    pub pcm: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Recording {
    pub fn new(pcm: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            pcm,
            sample_rate,
            channels,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    pub fn duration(&self) -> Duration {
        let frames = self.pcm.len() as u64 / self.channels.max(1) as u64;
        Duration::from_millis(frames * 1000 / self.sample_rate.max(1) as u64)
    }

    pub fn to_wav(&self) -> Vec<u8> {
        pcm_to_wav(&self.pcm, self.sample_rate, self.channels, 16)
    }

    /// Write the recording as a WAV file, creating parent directories.
    pub fn save_wav(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_wav())
    }
}

/// Wrap raw 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let data_len = pcm.len() * 2;
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(44 + data_len);

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &sample in pcm {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

/// Decode little-endian 16-bit samples. A trailing odd byte is ignored.
pub fn samples_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}
