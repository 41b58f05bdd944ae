//! PCM16 <-> f32 sample conversion and the base64 transport encoding.
//!
//! Outbound audio is 16 kHz mono, inbound audio is 24 kHz mono; both travel
//! as base64 text of 16-bit little-endian PCM.
//!
//! Scaling is symmetric: encode multiplies by 32768, decode divides by
//! `32768.0`. Encoding clamps to the i16 range so a full-scale `1.0` becomes
//! `32767` instead of wrapping.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{MentoraError, Result};

/// Sample rate of captured audio sent to the live model (Hz).
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of audio returned by the live model (Hz).
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// MIME type attached to every outbound frame.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

const PCM16_SCALE: f32 = 32768.0;

/// Convert one normalised sample to a signed 16-bit integer.
#[inline]
pub fn f32_to_pcm16(sample: f32) -> i16 {
    // `as` truncates toward zero and maps NaN to 0.
    (sample * PCM16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert one signed 16-bit sample back to floating point.
#[inline]
pub fn pcm16_to_f32(sample: i16) -> f32 {
    sample as f32 / PCM16_SCALE
}

/// Encode f32 samples as base64 of little-endian PCM16 bytes.
pub fn encode_pcm16_base64(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&f32_to_pcm16(s).to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decode base64 little-endian PCM16 into f32 samples.
///
/// # Errors
/// `MentoraError::Codec` on invalid base64 or an odd byte count.
pub fn decode_pcm16_base64(data: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| MentoraError::Codec(format!("invalid base64 audio: {e}")))?;
    if bytes.len() % 2 != 0 {
        return Err(MentoraError::Codec(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| pcm16_to_f32(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// One captured frame, serialised and ready for the session channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Base64 text of the PCM16 bytes.
    pub data: String,
    pub mime_type: String,
}

impl EncodedFrame {
    /// Encode a block of 16 kHz samples.
    pub fn from_samples(samples: &[f32]) -> Self {
        Self {
            data: encode_pcm16_base64(samples),
            mime_type: INPUT_MIME_TYPE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const QUANTUM: f32 = 1.0 / 32768.0;

    #[test]
    fn round_trip_stays_within_quantisation_error() {
        for i in 0..=2000 {
            let x = -1.0 + i as f32 * 0.001;
            let back = pcm16_to_f32(f32_to_pcm16(x));
            assert!(
                (back - x).abs() <= QUANTUM + 1e-6,
                "x={x} back={back}"
            );
        }
    }

    #[test]
    fn full_scale_clamps_instead_of_wrapping() {
        assert_eq!(f32_to_pcm16(1.0), i16::MAX);
        assert_eq!(f32_to_pcm16(-1.0), i16::MIN);
        assert_eq!(f32_to_pcm16(3.5), i16::MAX);
        assert_eq!(f32_to_pcm16(f32::NAN), 0);
    }

    #[test]
    fn decode_divides_by_32768() {
        assert_abs_diff_eq!(pcm16_to_f32(i16::MIN), -1.0);
        assert_abs_diff_eq!(pcm16_to_f32(16384), 0.5);
        assert_abs_diff_eq!(pcm16_to_f32(i16::MAX), 32767.0 / 32768.0);
    }

    #[test]
    fn encodes_little_endian_bytes() {
        // 0.5 -> 16384 -> [0x00, 0x40]
        let encoded = encode_pcm16_base64(&[0.5]);
        assert_eq!(STANDARD.decode(&encoded).unwrap(), vec![0x00, 0x40]);
    }

    #[test]
    fn decode_rejects_odd_length_payload() {
        let odd = STANDARD.encode([1u8, 2, 3]);
        assert!(matches!(
            decode_pcm16_base64(&odd),
            Err(MentoraError::Codec(_))
        ));
        assert!(decode_pcm16_base64("not base64 !!").is_err());
    }

    #[test]
    fn encoded_frame_carries_input_mime_type() {
        let frame = EncodedFrame::from_samples(&[0.0; 4]);
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
        assert_eq!(decode_pcm16_base64(&frame.data).unwrap(), vec![0.0; 4]);
    }
}
