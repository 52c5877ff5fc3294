//! PCM16 signal primitives shared by the relay and the webhook audio path.
//!
//! All buffers are interleaved mono PCM16 little-endian at a nominal 24 kHz
//! unless a function takes explicit rates.

pub mod level;
pub mod vad;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Nominal sample rate of the audio pipeline.
pub const SAMPLE_RATE: u32 = 24_000;

/// RMS energy of a PCM16 buffer, normalized to [0, 1].
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let n = s as f64 / 32768.0;
            n * n
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

pub fn to_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn from_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(text)
}

/// Clamp to [-1, 1]; negatives scale by 32768, non-negatives by 32767.
pub fn float32_to_int16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0).round() as i16
            } else {
                (s * 32767.0).round() as i16
            }
        })
        .collect()
}

pub fn int16_to_float32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Reinterpret little-endian PCM16 bytes as samples. A trailing odd byte is
/// dropped.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Linear-interpolation resampler. Identity when the rates match; the last
/// source index is clamped.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) * to_rate as f64 / from_rate as f64).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src = i as f64 * ratio;
        let k = src.floor() as usize;
        let k1 = (k + 1).min(samples.len() - 1);
        let frac = src - k as f64;
        let s0 = samples[k] as f64;
        let s1 = samples[k1] as f64;
        out.push((s0 + frac * (s1 - s0)) as i16);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioQuality {
    Silent,
    Low,
    Good,
    Loud,
    Clipping,
}

#[derive(Debug, Clone, Copy)]
pub struct AudioLevel {
    pub rms: f32,
    pub peak: f32,
    pub dbfs: f32,
    pub quality: AudioQuality,
}

/// Measure a buffer for level telemetry. Quality bands are thresholds on the
/// normalized RMS.
pub fn measure(samples: &[i16]) -> AudioLevel {
    let rms = rms(samples);
    let peak = samples
        .iter()
        .map(|&s| (s as f32 / 32768.0).abs())
        .fold(0.0f32, f32::max);
    let dbfs = if rms > 0.0 {
        20.0 * rms.log10()
    } else {
        -100.0
    };
    let quality = if rms < 0.001 {
        AudioQuality::Silent
    } else if rms < 0.01 {
        AudioQuality::Low
    } else if rms < 0.5 {
        AudioQuality::Good
    } else if rms < 0.9 {
        AudioQuality::Loud
    } else {
        AudioQuality::Clipping
    };
    AudioLevel {
        rms,
        peak,
        dbfs,
        quality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[0i16; 480]), 0.0);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_constant_signal() {
        // Constant 0.5 full-scale → RMS 0.5.
        let half = vec![16384i16; 480];
        assert!((rms(&half) - 0.5).abs() < 0.001);
    }

    #[test]
    fn base64_round_trip() {
        let data: Vec<u8> = (0u8..=255).collect();
        assert_eq!(from_base64(&to_base64(&data)).unwrap(), data);
        assert_eq!(from_base64(&to_base64(&[])).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn float_int_round_trip_within_lsb() {
        let samples = vec![0.0f32, 0.25, -0.25, 0.9999, -0.9999, 1.5, -1.5];
        let ints = float32_to_int16(&samples);
        let back = int16_to_float32(&ints);
        for (orig, got) in samples.iter().zip(back.iter()) {
            let clamped = orig.clamp(-1.0, 1.0);
            assert!(
                (clamped - got).abs() <= 1.0 / 32767.0,
                "{clamped} vs {got}"
            );
        }
    }

    #[test]
    fn float_to_int_clamps() {
        assert_eq!(float32_to_int16(&[2.0])[0], i16::MAX);
        assert_eq!(float32_to_int16(&[-2.0])[0], i16::MIN);
    }

    #[test]
    fn resample_identity_when_rates_match() {
        let samples: Vec<i16> = (0..480).map(|i| (i * 3) as i16).collect();
        assert_eq!(resample(&samples, 24_000, 24_000), samples);
    }

    #[test]
    fn resample_doubles_length_on_2x_upsample() {
        let samples: Vec<i16> = (0..100).map(|i| i as i16).collect();
        let out = resample(&samples, 12_000, 24_000);
        assert_eq!(out.len(), 200);
        // Interpolated midpoints land between neighbors.
        assert_eq!(out[0], 0);
        assert_eq!(out[2], 1);
        assert!(out[1] == 0 || out[1] == 1);
    }

    #[test]
    fn resample_clamps_last_index() {
        let samples = vec![100i16, 200];
        let out = resample(&samples, 8_000, 24_000);
        assert_eq!(out.len(), 6);
        assert_eq!(*out.last().unwrap(), 200);
    }

    #[test]
    fn bytes_samples_round_trip() {
        let samples = vec![-32768i16, -1, 0, 1, 32767];
        assert_eq!(bytes_to_samples(&samples_to_bytes(&samples)), samples);
    }

    #[test]
    fn measure_quality_bands() {
        assert_eq!(measure(&[0i16; 480]).quality, AudioQuality::Silent);
        // ~0.005 full-scale
        assert_eq!(measure(&[164i16; 480]).quality, AudioQuality::Low);
        // ~0.05
        assert_eq!(measure(&[1638i16; 480]).quality, AudioQuality::Good);
        // ~0.7
        assert_eq!(measure(&[22937i16; 480]).quality, AudioQuality::Loud);
        // ~0.95
        assert_eq!(measure(&[31130i16; 480]).quality, AudioQuality::Clipping);
    }

    #[test]
    fn measure_dbfs() {
        let level = measure(&[16384i16; 480]);
        // RMS 0.5 → about -6 dBFS.
        assert!((level.dbfs + 6.02).abs() < 0.1);
        assert_eq!(measure(&[0i16; 10]).dbfs, -100.0);
    }
}
