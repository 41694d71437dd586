//! Inbound audio preprocessing: high-pass filter then soft noise gate.
//!
//! Applied to every inbound PCM16 chunk before it reaches STT. Order
//! matters: the high-pass filter runs first so the noise gate's amplitude
//! check sees filtered (not raw) samples.

use realfft::num_complex::Complex;
use realfft::RealFftPlanner;

const HIGH_PASS_CUTOFF_HZ: f32 = 200.0;
const SAMPLE_RATE_HZ: f32 = 16_000.0;
const NOISE_GATE_THRESHOLD: f32 = 0.008;
const NOISE_GATE_ATTENUATION: f32 = 0.2;
const PCM16_NORMALIZE: f32 = 32768.0;
const PCM16_SCALE: f32 = 32767.0;

/// Runs the high-pass filter then the noise gate over a raw PCM16LE chunk,
/// returning the processed PCM16LE bytes.
pub fn process_audio_chunk(chunk: &[u8]) -> Vec<u8> {
    let samples = bytes_to_i16(chunk);
    if samples.is_empty() {
        return chunk.to_vec();
    }

    let filtered = high_pass_filter(&samples, HIGH_PASS_CUTOFF_HZ, SAMPLE_RATE_HZ);
    let gated = apply_noise_gate(&filtered, NOISE_GATE_THRESHOLD);
    i16_to_bytes(&gated)
}

fn apply_noise_gate(samples: &[i16], threshold: f32) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let normalized = s as f32 / PCM16_NORMALIZE;
            let attenuated = if normalized.abs() < threshold {
                normalized * NOISE_GATE_ATTENUATION
            } else {
                normalized
            };
            (attenuated * PCM16_SCALE) as i16
        })
        .collect()
}

fn high_pass_filter(samples: &[i16], cutoff_hz: f32, sample_rate_hz: f32) -> Vec<i16> {
    let len = samples.len();
    if len < 2 {
        return samples.to_vec();
    }

    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(len);
    let mut input: Vec<f32> = samples.iter().map(|&s| s as f32).collect();
    let mut spectrum = fft.make_output_vec();
    if fft.process(&mut input, &mut spectrum).is_err() {
        return samples.to_vec();
    }

    let bin_hz = sample_rate_hz / len as f32;
    for (i, bin) in spectrum.iter_mut().enumerate() {
        let freq = i as f32 * bin_hz;
        if freq < cutoff_hz {
            *bin = Complex::new(0.0, 0.0);
        }
    }

    let ifft = planner.plan_fft_inverse(len);
    let mut output = ifft.make_output_vec();
    if ifft.process(&mut spectrum, &mut output).is_err() {
        return samples.to_vec();
    }

    let norm = 1.0 / len as f32;
    output
        .iter()
        .map(|v| (v * norm).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

fn bytes_to_i16(chunk: &[u8]) -> Vec<i16> {
    chunk
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_samples_are_attenuated() {
        let quiet = (0.004 * PCM16_NORMALIZE) as i16;
        let samples = vec![quiet; 64];
        let gated = apply_noise_gate(&samples, NOISE_GATE_THRESHOLD);
        assert!(gated[0].abs() < quiet.abs());
    }

    #[test]
    fn loud_samples_pass_through_gate() {
        let loud = (0.5 * PCM16_NORMALIZE) as i16;
        let samples = vec![loud; 64];
        let gated = apply_noise_gate(&samples, NOISE_GATE_THRESHOLD);
        assert_eq!(gated[0], loud);
    }

    #[test]
    fn process_audio_chunk_roundtrips_length() {
        let samples: Vec<i16> = (0..480).map(|i| (i % 100) as i16).collect();
        let bytes = i16_to_bytes(&samples);
        let processed = process_audio_chunk(&bytes);
        assert_eq!(processed.len(), bytes.len());
    }

    #[test]
    fn empty_chunk_returns_empty() {
        assert_eq!(process_audio_chunk(&[]), Vec::<u8>::new());
    }
}
