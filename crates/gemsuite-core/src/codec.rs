//! Conversions between local media and the API transport encodings
//!
//! Images go out as base64 inline parts; speech comes back as base64
//! little-endian 16-bit PCM and is turned into normalized `f32` channels.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use image::ImageFormat;

use crate::audio::AudioBuffer;
use crate::error::{Error, Result};
use crate::gemini::InlineData;

/// A user-selected image file. Only the path and its MIME type are known
/// until the file is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub path: PathBuf,
    pub name: String,
    pub mime_type: String,
}

impl ImageFile {
    /// Accept a path only if its extension names an image format.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ImageFormat::from_path(path)
            .map_err(|_| Error::UnsupportedImage(path.to_path_buf()))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            path: path.to_path_buf(),
            name,
            mime_type: format.to_mime_type().to_string(),
        })
    }

    pub async fn read_bytes(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|source| Error::ImageRead {
                path: self.path.clone(),
                source,
            })
    }
}

/// Read the image and encode it as an inline data part.
pub async fn encode_image(file: &ImageFile) -> Result<InlineData> {
    let bytes = file.read_bytes().await?;

    Ok(InlineData {
        mime_type: file.mime_type.clone(),
        data: general_purpose::STANDARD.encode(bytes),
    })
}

/// Decode base64 interleaved little-endian i16 PCM into per-channel samples
/// in `[-1.0, 1.0)`.
pub fn decode_audio(base64_pcm: &str, sample_rate: u32, num_channels: u16) -> Result<AudioBuffer> {
    let bytes = general_purpose::STANDARD.decode(base64_pcm.trim())?;
    Ok(decode_pcm16(&bytes, sample_rate, num_channels))
}

/// Deinterleave raw PCM. A trailing odd byte or incomplete frame is dropped.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, num_channels: u16) -> AudioBuffer {
    let num_channels = num_channels as usize;
    if num_channels == 0 {
        return AudioBuffer::new(sample_rate, Vec::new());
    }

    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let frame_count = samples.len() / num_channels;

    let channels = (0..num_channels)
        .map(|channel| {
            (0..frame_count)
                .map(|i| samples[i * num_channels + channel] as f32 / 32768.0)
                .collect()
        })
        .collect();

    AudioBuffer::new(sample_rate, channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_png(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        image::RgbImage::from_pixel(1, 1, image::Rgb([255, 0, 0]))
            .save(&path)
            .unwrap();
        path
    }

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[tokio::test]
    async fn test_encode_one_pixel_png() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "pixel.png");

        let file = ImageFile::from_path(&path).unwrap();
        assert_eq!(file.name, "pixel.png");

        let encoded = encode_image(&file).await.unwrap();
        assert_eq!(encoded.mime_type, "image/png");
        assert!(!encoded.data.is_empty());
        assert_eq!(encoded.data.len() % 4, 0);

        let raw = general_purpose::STANDARD.decode(&encoded.data).unwrap();
        assert_eq!(raw, std::fs::read(&path).unwrap());
    }

    #[test]
    fn test_mime_type_from_extension() {
        assert_eq!(ImageFile::from_path("photo.JPG").unwrap().mime_type, "image/jpeg");
        assert_eq!(ImageFile::from_path("anim.gif").unwrap().mime_type, "image/gif");
        assert!(matches!(
            ImageFile::from_path("notes.txt"),
            Err(Error::UnsupportedImage(_))
        ));
    }

    #[tokio::test]
    async fn test_encode_missing_file_propagates_read_error() {
        let dir = TempDir::new().unwrap();
        let file = ImageFile::from_path(dir.path().join("gone.png")).unwrap();
        assert!(matches!(encode_image(&file).await, Err(Error::ImageRead { .. })));
    }

    #[test]
    fn test_decode_mono_normalizes_by_32768() {
        let samples = [0i16, 16384, -16384, i16::MAX, i16::MIN];
        let buffer = decode_pcm16(&pcm_bytes(&samples), 24_000, 1);

        assert_eq!(buffer.sample_rate, 24_000);
        assert_eq!(buffer.num_channels(), 1);
        assert_eq!(buffer.frame_count(), 5);
        for (decoded, original) in buffer.channel(0).iter().zip(samples) {
            assert!((decoded - original as f32 / 32768.0).abs() < 1e-6);
        }
        assert_eq!(buffer.channel(0)[4], -1.0);
    }

    #[test]
    fn test_decode_stereo_deinterleaves() {
        // frames: (L, R) = (100, -100), (200, -200), (300, -300)
        let samples = [100i16, -100, 200, -200, 300, -300];
        let buffer = decode_pcm16(&pcm_bytes(&samples), 24_000, 2);

        assert_eq!(buffer.frame_count(), 3);
        for frame in 0..3 {
            let expected = (frame as f32 + 1.0) * 100.0 / 32768.0;
            assert!((buffer.channel(0)[frame] - expected).abs() < 1e-6);
            assert!((buffer.channel(1)[frame] + expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_decode_drops_partial_frame_and_odd_byte() {
        let mut bytes = pcm_bytes(&[1, 2, 3]);
        bytes.push(0x7f);
        let buffer = decode_pcm16(&bytes, 24_000, 2);
        assert_eq!(buffer.frame_count(), 1);
    }

    #[test]
    fn test_decode_audio_round_trips_known_waveform() {
        let waveform: Vec<i16> = (0..48)
            .map(|i| ((i as f32 / 48.0 * std::f32::consts::TAU).sin() * 12_000.0) as i16)
            .collect();
        let encoded = general_purpose::STANDARD.encode(pcm_bytes(&waveform));

        let buffer = decode_audio(&encoded, 24_000, 1).unwrap();
        let restored: Vec<i16> = buffer
            .channel(0)
            .iter()
            .map(|s| (s * 32768.0).round() as i16)
            .collect();
        assert_eq!(restored, waveform);
    }

    #[test]
    fn test_decode_audio_rejects_bad_base64() {
        assert!(matches!(decode_audio("not base64!", 24_000, 1), Err(Error::Base64(_))));
    }
}
