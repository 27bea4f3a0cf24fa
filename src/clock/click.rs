// Click sound generation
// Pre-generated sine bursts with an exponential decay envelope; the accent
// click is higher and louder than the regular one

use std::f32::consts::PI;

/// Metronome click type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickType {
    /// First beat of a multi-beat measure
    Accent,
    /// Any other beat
    Regular,
}

/// Duration of one click in milliseconds
const CLICK_DURATION_MS: f32 = 10.0;

/// Pre-generated click sample buffers for one sample rate
#[derive(Debug, Clone)]
pub struct ClickBank {
    accent: Vec<f32>,
    regular: Vec<f32>,
}

impl ClickBank {
    pub fn new(sample_rate: f32) -> Self {
        let num_samples = ((CLICK_DURATION_MS / 1000.0) * sample_rate) as usize;
        Self {
            accent: generate_click(sample_rate, num_samples, 1200.0, 0.6),
            regular: generate_click(sample_rate, num_samples, 800.0, 0.4),
        }
    }

    pub fn samples(&self, click: ClickType) -> &[f32] {
        match click {
            ClickType::Accent => &self.accent,
            ClickType::Regular => &self.regular,
        }
    }

    pub fn click_len(&self) -> usize {
        self.accent.len()
    }
}

/// Sine burst shaped by a fast exponential decay
fn generate_click(sample_rate: f32, num_samples: usize, frequency: f32, amplitude: f32) -> Vec<f32> {
    let mut samples = Vec::with_capacity(num_samples);
    let phase_increment = 2.0 * PI * frequency / sample_rate;

    for i in 0..num_samples {
        let t = i as f32 / num_samples as f32;
        let envelope = (-t * 8.0).exp();
        let phase = i as f32 * phase_increment;
        samples.push(phase.sin() * envelope * amplitude);
    }

    samples
}

/// Playback cursor over the click bank, advanced by the audio callback
#[derive(Debug)]
pub struct ClickVoice {
    bank: ClickBank,
    active: Option<(ClickType, usize)>,
    volume: f32,
}

impl ClickVoice {
    pub fn new(bank: ClickBank) -> Self {
        Self {
            bank,
            active: None,
            volume: 0.5,
        }
    }

    /// Restarts playback with the given click
    pub fn trigger(&mut self, click: ClickType) {
        self.active = Some((click, 0));
    }

    /// Next mono output sample; 0.0 when no click is sounding
    pub fn next_sample(&mut self) -> f32 {
        if let Some((click, position)) = self.active.as_mut() {
            let samples = self.bank.samples(*click);
            if *position < samples.len() {
                let sample = samples[*position] * self.volume;
                *position += 1;
                return sample;
            }
            self.active = None;
        }
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_bank_generation() {
        let bank = ClickBank::new(48000.0);

        // 10ms at 48kHz
        assert_eq!(bank.click_len(), 480);
        assert_eq!(bank.samples(ClickType::Accent).len(), 480);
        assert_eq!(bank.samples(ClickType::Regular).len(), 480);

        // Accent peaks louder
        let peak = |s: &[f32]| s.iter().map(|v| v.abs()).fold(0.0f32, f32::max);
        assert!(peak(bank.samples(ClickType::Accent)) > peak(bank.samples(ClickType::Regular)));
    }

    #[test]
    fn test_click_voice_playback() {
        let mut voice = ClickVoice::new(ClickBank::new(48000.0));

        assert_eq!(voice.next_sample(), 0.0);

        voice.trigger(ClickType::Accent);
        let non_zero = (0..480).filter(|_| voice.next_sample().abs() > 0.0001).count();
        assert!(non_zero > 400);

        // Silent once the burst is exhausted
        assert_eq!(voice.next_sample(), 0.0);
    }

    #[test]
    fn test_click_voice_retrigger() {
        let mut voice = ClickVoice::new(ClickBank::new(48000.0));

        voice.trigger(ClickType::Regular);
        for _ in 0..100 {
            voice.next_sample();
        }
        // Retrigger rewinds to the start of the burst
        voice.trigger(ClickType::Regular);
        let first = voice.next_sample();
        let mut fresh = ClickVoice::new(ClickBank::new(48000.0));
        fresh.trigger(ClickType::Regular);
        assert_eq!(first, fresh.next_sample());
    }
}
