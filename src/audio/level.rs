//! Display-level smoothing for UI telemetry.

const ATTACK: f32 = 0.8;
const RELEASE: f32 = 0.95;
const PEAK_DECAY: f32 = 0.95;

#[derive(Debug, Clone, Copy)]
pub struct LevelReading {
    pub smoothed_level: f32,
    pub peak_level: f32,
}

/// Attack/release smoother plus a decaying peak hold. Peak hold duration is
/// counted in frames (50 ≈ 1 s at 50 fps).
#[derive(Debug)]
pub struct LevelMeter {
    smoothed: f32,
    peak: f32,
    frames_since_peak: u32,
    peak_hold_frames: u32,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(50)
    }
}

impl LevelMeter {
    pub fn new(peak_hold_frames: u32) -> Self {
        Self {
            smoothed: 0.0,
            peak: 0.0,
            frames_since_peak: 0,
            peak_hold_frames,
        }
    }

    pub fn update(&mut self, rms: f32, peak: f32) -> LevelReading {
        self.smoothed = if rms > self.smoothed {
            ATTACK * rms + (1.0 - ATTACK) * self.smoothed
        } else {
            RELEASE * self.smoothed
        };

        if peak > self.peak {
            self.peak = peak;
            self.frames_since_peak = 0;
        } else {
            self.frames_since_peak += 1;
            if self.frames_since_peak > self.peak_hold_frames {
                self.peak *= PEAK_DECAY;
            }
        }

        LevelReading {
            smoothed_level: self.smoothed,
            peak_level: self.peak,
        }
    }

    pub fn reset(&mut self) {
        self.smoothed = 0.0;
        self.peak = 0.0;
        self.frames_since_peak = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attack_is_faster_than_release() {
        let mut meter = LevelMeter::default();
        let rising = meter.update(0.8, 0.8).smoothed_level;
        assert!((rising - 0.64).abs() < 1e-6);

        let falling = meter.update(0.0, 0.0).smoothed_level;
        assert!((falling - rising * RELEASE).abs() < 1e-6);
    }

    #[test]
    fn peak_holds_then_decays() {
        let mut meter = LevelMeter::new(3);
        assert_eq!(meter.update(0.5, 0.9).peak_level, 0.9);

        // Held for peak_hold_frames frames.
        for _ in 0..3 {
            assert_eq!(meter.update(0.1, 0.1).peak_level, 0.9);
        }
        // Then decays.
        let decayed = meter.update(0.1, 0.1).peak_level;
        assert!((decayed - 0.9 * PEAK_DECAY).abs() < 1e-6);
    }

    #[test]
    fn new_peak_resets_hold() {
        let mut meter = LevelMeter::new(2);
        meter.update(0.2, 0.5);
        meter.update(0.2, 0.2);
        meter.update(0.2, 0.2);
        // New louder peak replaces the held one immediately.
        assert_eq!(meter.update(0.2, 0.7).peak_level, 0.7);
    }
}
