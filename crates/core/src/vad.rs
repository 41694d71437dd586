//! Voice activity gate.
//!
//! Classifies inbound audio frames as speech or silence. The result never
//! gates whether audio is forwarded to STT — it feeds timing metrics only
//! (time-to-first-speech, speech/silence frame counters).
//!
//! Uses `webrtc-vad` when a full 30ms/16kHz frame is available, falling
//! back to energy thresholding for partial frames or if the WebRTC detector
//! errors out.

use webrtc_vad::{SampleRate, Vad, VadMode};

const FRAME_DURATION_MS: u32 = 30;
const SAMPLE_RATE_HZ: u32 = 16_000;
const BYTES_PER_FRAME: usize = (SAMPLE_RATE_HZ as usize * FRAME_DURATION_MS as usize / 1000) * 2;
const ENERGY_THRESHOLD: f32 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Speech,
    Silence,
}

impl VadDecision {
    pub fn is_speech(&self) -> bool {
        matches!(self, VadDecision::Speech)
    }
}

/// Wraps a WebRTC VAD instance with an energy-based fallback.
///
/// Mirrors the "mode 1, 30ms frame, 960-byte chunk" configuration used by
/// the provider this was modeled on, plus its mean-square-energy fallback
/// for chunks shorter than a full frame.
pub struct VadGate {
    vad: Vad,
    speech_frames: u64,
    silence_frames: u64,
}

impl VadGate {
    pub fn new() -> Self {
        let vad = Vad::new_with_rate_and_mode(SampleRate::Rate16kHz, VadMode::LowBitrate);
        Self {
            vad,
            speech_frames: 0,
            silence_frames: 0,
        }
    }

    /// `chunk` is raw little-endian PCM16 mono bytes at 16kHz.
    pub fn classify(&mut self, chunk: &[u8]) -> VadDecision {
        let decision = if chunk.len() < BYTES_PER_FRAME {
            self.energy_is_speech(chunk)
        } else {
            self.webrtc_is_speech(chunk)
        };

        if decision {
            self.speech_frames += 1;
        } else {
            self.silence_frames += 1;
        }

        if decision {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }

    fn webrtc_is_speech(&mut self, chunk: &[u8]) -> bool {
        for frame in chunk.chunks_exact(BYTES_PER_FRAME) {
            let samples = bytes_to_i16(frame);
            match self.vad.is_voice_segment(&samples) {
                Ok(true) => return true,
                Ok(false) => continue,
                Err(_) => return self.energy_is_speech(frame),
            }
        }
        false
    }

    fn energy_is_speech(&self, chunk: &[u8]) -> bool {
        if chunk.len() < 2 {
            return true;
        }
        let samples = bytes_to_i16(chunk);
        if samples.is_empty() {
            return true;
        }
        let energy: f32 = samples
            .iter()
            .map(|s| (*s as f32) * (*s as f32))
            .sum::<f32>()
            / samples.len() as f32;
        energy > ENERGY_THRESHOLD
    }

    pub fn speech_frame_count(&self) -> u64 {
        self.speech_frames
    }

    pub fn silence_frame_count(&self) -> u64 {
        self.silence_frames
    }
}

impl Default for VadGate {
    fn default() -> Self {
        Self::new()
    }
}

fn bytes_to_i16(chunk: &[u8]) -> Vec<i16> {
    chunk
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence_chunk(len: usize) -> Vec<u8> {
        vec![0u8; len]
    }

    fn loud_chunk(len: usize) -> Vec<u8> {
        let mut v = Vec::with_capacity(len);
        for i in 0..len / 2 {
            let sample: i16 = if i % 2 == 0 { 20_000 } else { -20_000 };
            v.extend_from_slice(&sample.to_le_bytes());
        }
        v
    }

    #[test]
    fn short_silent_chunk_is_silence() {
        let gate = VadGate::new();
        assert!(!gate.energy_is_speech(&silence_chunk(100)));
    }

    #[test]
    fn short_loud_chunk_is_speech() {
        let gate = VadGate::new();
        assert!(gate.energy_is_speech(&loud_chunk(100)));
    }

    #[test]
    fn empty_chunk_defaults_to_speech() {
        let gate = VadGate::new();
        assert!(gate.energy_is_speech(&[]));
    }

    #[test]
    fn full_frame_classification_tracks_counts() {
        let mut gate = VadGate::new();
        let _ = gate.classify(&silence_chunk(BYTES_PER_FRAME));
        assert_eq!(gate.speech_frame_count() + gate.silence_frame_count(), 1);
    }
}
