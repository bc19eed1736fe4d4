//! μ-law (G.711) codec and optional 8kHz<->16kHz resampling (spec.md §4.1).
//!
//! The carrier sends/receives 8kHz mono μ-law frames; vendor ASR/TTS
//! contracts in this crate operate on 16-bit PCM. Decode/encode tables are
//! the standard ITU-T G.711 μ-law companding curve.

/// Decode a single μ-law byte to a 16-bit linear PCM sample.
pub fn ulaw_decode_sample(byte: u8) -> i16 {
    const BIAS: i16 = 0x84;
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;
    let mut sample = ((mantissa as i16) << 3) + BIAS;
    sample <<= exponent;
    sample -= BIAS;
    if sign != 0 {
        -sample
    } else {
        sample
    }
}

/// Encode a 16-bit linear PCM sample to a single μ-law byte.
pub fn ulaw_encode_sample(sample: i16) -> u8 {
    const BIAS: i16 = 0x84;
    const CLIP: i16 = 32635;

    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let mut magnitude = if sample < 0 {
        sample.saturating_neg()
    } else {
        sample
    };
    if magnitude > CLIP {
        magnitude = CLIP;
    }
    magnitude += BIAS;

    let exponent = (15 - magnitude.leading_zeros() as i16).clamp(0, 7);
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    let byte = sign | ((exponent as u8) << 4) | (mantissa as u8);
    !byte
}

/// Decode a buffer of μ-law bytes into 16-bit PCM samples.
pub fn decode(ulaw: &[u8]) -> Vec<i16> {
    ulaw.iter().map(|&b| ulaw_decode_sample(b)).collect()
}

/// Encode a buffer of 16-bit PCM samples into μ-law bytes.
pub fn encode(pcm: &[i16]) -> Vec<u8> {
    pcm.iter().map(|&s| ulaw_encode_sample(s)).collect()
}

/// Mean absolute amplitude of a PCM window, used by the volume VAD.
pub fn mean_abs_amplitude(pcm: &[i16]) -> f32 {
    if pcm.is_empty() {
        return 0.0;
    }
    let sum: f64 = pcm.iter().map(|&s| (s as f64).abs()).sum();
    (sum / pcm.len() as f64) as f32
}

#[cfg(feature = "resampling")]
pub mod resample {
    //! Optional 8kHz<->16kHz resampling for vendors that require 16kHz PCM.
    use anyhow::{Context, Result};
    use rubato::{FftFixedIn, Resampler};

    /// Resample mono PCM from `from_hz` to `to_hz`.
    pub fn resample_mono(pcm: &[i16], from_hz: usize, to_hz: usize) -> Result<Vec<i16>> {
        if from_hz == to_hz {
            return Ok(pcm.to_vec());
        }
        let input: Vec<f64> = pcm.iter().map(|&s| s as f64 / 32768.0).collect();
        let mut resampler = FftFixedIn::<f64>::new(from_hz, to_hz, input.len(), 2, 1)
            .context("constructing resampler")?;
        let output = resampler
            .process(&[input], None)
            .context("resampling audio")?;
        Ok(output[0]
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulaw_roundtrip_is_approximately_lossless() {
        let samples: Vec<i16> = vec![0, 100, -100, 1000, -1000, 32000, -32000];
        let encoded = encode(&samples);
        let decoded = decode(&encoded);
        for (orig, rt) in samples.iter().zip(decoded.iter()) {
            let diff = (*orig as i32 - *rt as i32).abs();
            assert!(diff < 300, "orig={orig} rt={rt} diff={diff}");
        }
    }

    #[test]
    fn ulaw_silence_roundtrips_to_near_zero() {
        let decoded = ulaw_decode_sample(ulaw_encode_sample(0));
        assert!(decoded.abs() < 10);
    }

    #[test]
    fn mean_abs_amplitude_of_silence_is_zero() {
        assert_eq!(mean_abs_amplitude(&[0, 0, 0]), 0.0);
    }

    #[test]
    fn mean_abs_amplitude_of_symmetric_signal() {
        assert_eq!(mean_abs_amplitude(&[100, -100, 100, -100]), 100.0);
    }
}
