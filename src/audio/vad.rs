//! Energy-based voice activity detection with hysteresis.
//!
//! A smoothed energy envelope is compared against a fixed threshold; separate
//! attack (`speech_frames`) and release (`silence_frames`) counts keep the
//! state from oscillating on a single noisy frame.

use super::rms;

#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Smoothed-energy threshold separating speech from silence.
    pub energy_threshold: f32,
    /// Consecutive sub-threshold frames required to release back to silence
    /// (~600 ms at 20 ms frames).
    pub silence_frames: u32,
    /// Consecutive super-threshold frames required to attack into speech
    /// (~60 ms).
    pub speech_frames: u32,
    /// Samples per frame (20 ms at 24 kHz).
    pub frame_size: usize,
    /// Envelope smoothing factor applied to the incoming energy.
    pub smoothing_factor: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.01,
            silence_frames: 30,
            speech_frames: 3,
            frame_size: 480,
            smoothing_factor: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Silence,
    Uncertain,
    Speech,
}

#[derive(Debug, Clone, Copy)]
pub struct VadResult {
    pub state: VadState,
    pub energy: f32,
    pub is_speech: bool,
}

#[derive(Debug)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    smoothed_energy: f32,
    silent_count: u32,
    speech_count: u32,
    state: VadState,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            smoothed_energy: 0.0,
            silent_count: 0,
            speech_count: 0,
            state: VadState::Silence,
        }
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Classify one PCM16 frame.
    pub fn process(&mut self, frame: &[i16]) -> VadResult {
        let energy = rms(frame);
        let alpha = self.config.smoothing_factor;
        self.smoothed_energy = alpha * energy + (1.0 - alpha) * self.smoothed_energy;

        if self.smoothed_energy > self.config.energy_threshold {
            self.speech_count += 1;
            self.silent_count = 0;
        } else {
            self.silent_count += 1;
            self.speech_count = 0;
        }

        self.state = match self.state {
            VadState::Silence | VadState::Uncertain => {
                if self.speech_count >= self.config.speech_frames {
                    VadState::Speech
                } else if self.speech_count > 0 {
                    VadState::Uncertain
                } else {
                    VadState::Silence
                }
            }
            VadState::Speech => {
                if self.silent_count >= self.config.silence_frames {
                    VadState::Silence
                } else {
                    VadState::Speech
                }
            }
        };

        VadResult {
            state: self.state,
            energy: self.smoothed_energy,
            is_speech: self.state == VadState::Speech,
        }
    }

    pub fn reset(&mut self) {
        self.smoothed_energy = 0.0;
        self.silent_count = 0;
        self.speech_count = 0;
        self.state = VadState::Silence;
    }
}
