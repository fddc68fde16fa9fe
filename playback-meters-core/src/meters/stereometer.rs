use std::any::Any;

use crate::processing::stereo::{BandCorrelation, StereoCorrelation};
use crate::traits::meter::Meter;

/// Frames of L/R history kept for goniometer-style drawing.
pub const HISTORY_FRAMES: usize = 1024;

/// Phase correlation, balance and a short L/R history.
pub struct Stereometer {
    analysis: StereoCorrelation,
    left: Box<[f32]>,
    right: Box<[f32]>,
    write_pos: usize,
}

impl Stereometer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            analysis: StereoCorrelation::new(sample_rate),
            left: vec![0.0; HISTORY_FRAMES].into_boxed_slice(),
            right: vec![0.0; HISTORY_FRAMES].into_boxed_slice(),
            write_pos: 0,
        }
    }

    /// −1 (out of phase) to +1 (mono-compatible).
    pub fn correlation(&self) -> f32 {
        self.analysis.correlation()
    }

    /// −1 (left only) to +1 (right only).
    pub fn balance(&self) -> f32 {
        self.analysis.balance()
    }

    pub fn band_correlation(&self) -> BandCorrelation {
        self.analysis.band_correlation()
    }

    /// The last [`HISTORY_FRAMES`] (left, right) pairs, oldest first.
    pub fn history(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        (self.write_pos..HISTORY_FRAMES)
            .chain(0..self.write_pos)
            .map(move |i| (self.left[i], self.right[i]))
    }
}

impl Meter for Stereometer {
    fn name(&self) -> &str {
        "Stereometer"
    }

    fn update(&mut self, samples: &[f32], frames: usize, channels: u16) {
        let channels = usize::from(channels);
        if channels < 2 {
            return;
        }
        let len = (frames * channels).min(samples.len());
        let samples = &samples[..len];

        for frame in samples.chunks_exact(channels) {
            self.left[self.write_pos] = frame[0];
            self.right[self.write_pos] = frame[1];
            self.write_pos = (self.write_pos + 1) % HISTORY_FRAMES;
        }

        self.analysis.process(samples, channels);
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.analysis.set_sample_rate(sample_rate);
    }

    fn reset(&mut self) {
        self.analysis.reset();
        self.left.fill(0.0);
        self.right.fill(0.0);
        self.write_pos = 0;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
