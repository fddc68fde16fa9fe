//! Phase correlation and balance of a stereo stream, overall and split into
//! low / mid / high bands.

use std::f32::consts::PI;

/// Crossover between the low and mid bands.
pub const LOW_CROSSOVER_HZ: f32 = 250.0;
/// Crossover between the mid and high bands.
pub const HIGH_CROSSOVER_HZ: f32 = 4_000.0;

/// Weight of the previous value in every exponential average.
const EMA_RETAIN: f32 = 0.9;
const EPSILON: f32 = 1e-10;

/// Coefficient of a one-pole smoother with cutoff `cutoff_hz`.
pub fn one_pole_alpha(cutoff_hz: f32, sample_rate: u32) -> f32 {
    1.0 - (-2.0 * PI * cutoff_hz / sample_rate as f32).exp()
}

/// Per-band correlation readings, each in [-1, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandCorrelation {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct CrossSums {
    lr: f32,
    ll: f32,
    rr: f32,
}

impl CrossSums {
    fn add(&mut self, l: f32, r: f32) {
        self.lr += l * r;
        self.ll += l * l;
        self.rr += r * r;
    }

    fn correlation(&self) -> Option<f32> {
        let denom = (self.ll * self.rr).sqrt();
        (denom > EPSILON).then(|| self.lr / denom)
    }
}

fn blend(previous: f32, fresh: f32) -> f32 {
    previous * EMA_RETAIN + fresh * (1.0 - EMA_RETAIN)
}

/// Streaming stereo correlation analyzer.
///
/// Correlation is +1 for identical channels, −1 for inverted ones and near 0
/// for unrelated ones. Balance runs from −1 (left only) to +1 (right only).
/// Every reading is an exponential average across `process` calls; blocks in
/// which a band is silent leave that band's reading untouched.
#[derive(Debug, Clone)]
pub struct StereoCorrelation {
    low_alpha: f32,
    high_alpha: f32,

    low_state: [f32; 2],
    high_state: [f32; 2],

    correlation: f32,
    balance: f32,
    bands: BandCorrelation,
}

impl StereoCorrelation {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            low_alpha: one_pole_alpha(LOW_CROSSOVER_HZ, sample_rate),
            high_alpha: one_pole_alpha(HIGH_CROSSOVER_HZ, sample_rate),
            low_state: [0.0; 2],
            high_state: [0.0; 2],
            correlation: 0.0,
            balance: 0.0,
            bands: BandCorrelation::default(),
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.low_alpha = one_pole_alpha(LOW_CROSSOVER_HZ, sample_rate);
        self.high_alpha = one_pole_alpha(HIGH_CROSSOVER_HZ, sample_rate);
    }

    pub fn reset(&mut self) {
        self.low_state = [0.0; 2];
        self.high_state = [0.0; 2];
        self.correlation = 0.0;
        self.balance = 0.0;
        self.bands = BandCorrelation::default();
    }

    /// Analyzes interleaved frames; needs at least two channels and reads
    /// the first two.
    pub fn process(&mut self, samples: &[f32], channels: usize) {
        if channels < 2 {
            return;
        }

        let mut full = CrossSums::default();
        let mut low = CrossSums::default();
        let mut mid = CrossSums::default();
        let mut high = CrossSums::default();
        let mut level_l = 0.0f32;
        let mut level_r = 0.0f32;

        for frame in samples.chunks_exact(channels) {
            let (l, r) = (frame[0], frame[1]);

            full.add(l, r);
            level_l += l.abs();
            level_r += r.abs();

            self.low_state[0] += self.low_alpha * (l - self.low_state[0]);
            self.low_state[1] += self.low_alpha * (r - self.low_state[1]);
            let (low_l, low_r) = (self.low_state[0], self.low_state[1]);

            self.high_state[0] += self.high_alpha * (l - self.high_state[0]);
            self.high_state[1] += self.high_alpha * (r - self.high_state[1]);
            let (high_l, high_r) = (l - self.high_state[0], r - self.high_state[1]);

            low.add(low_l, low_r);
            high.add(high_l, high_r);
            mid.add(l - low_l - high_l, r - low_r - high_r);
        }

        if let Some(c) = full.correlation() {
            self.correlation = blend(self.correlation, c);
        }
        if let Some(c) = low.correlation() {
            self.bands.low = blend(self.bands.low, c);
        }
        if let Some(c) = mid.correlation() {
            self.bands.mid = blend(self.bands.mid, c);
        }
        if let Some(c) = high.correlation() {
            self.bands.high = blend(self.bands.high, c);
        }

        let total = level_l + level_r;
        if total > EPSILON {
            self.balance = blend(self.balance, (level_r - level_l) / total);
        }
    }

    pub fn correlation(&self) -> f32 {
        self.correlation
    }

    pub fn balance(&self) -> f32 {
        self.balance
    }

    pub fn band_correlation(&self) -> BandCorrelation {
        self.bands
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    const RATE: u32 = 48_000;

    fn interleave(frames: usize, f: impl Fn(f32) -> (f32, f32)) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let (l, r) = f(i as f32 / RATE as f32);
                [l, r]
            })
            .collect()
    }

    fn run(analyzer: &mut StereoCorrelation, block: &[f32], times: usize) {
        for _ in 0..times {
            analyzer.process(block, 2);
        }
    }

    #[test]
    fn alpha_matches_48k_reference_values() {
        assert_abs_diff_eq!(one_pole_alpha(250.0, RATE), 0.032, epsilon = 0.001);
        assert_abs_diff_eq!(one_pole_alpha(4_000.0, RATE), 0.4, epsilon = 0.01);
    }

    #[test]
    fn identical_channels_converge_to_plus_one() {
        let block = interleave(1024, |t| {
            let s = (2.0 * PI * 440.0 * t).sin();
            (s, s)
        });
        let mut analyzer = StereoCorrelation::new(RATE);
        run(&mut analyzer, &block, 100);

        assert_abs_diff_eq!(analyzer.correlation(), 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(analyzer.balance(), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn inverted_channels_converge_to_minus_one() {
        let block = interleave(1024, |t| {
            let s = (2.0 * PI * 440.0 * t).sin();
            (s, -s)
        });
        let mut analyzer = StereoCorrelation::new(RATE);
        run(&mut analyzer, &block, 100);

        assert_abs_diff_eq!(analyzer.correlation(), -1.0, epsilon = 1e-3);
        assert!(analyzer.band_correlation().low < -0.9);
    }

    #[test]
    fn left_only_signal_pans_left() {
        let block = interleave(1024, |t| ((2.0 * PI * 440.0 * t).sin(), 0.0));
        let mut analyzer = StereoCorrelation::new(RATE);
        run(&mut analyzer, &block, 100);

        assert_abs_diff_eq!(analyzer.balance(), -1.0, epsilon = 1e-3);
        // No right-channel energy: correlation is undefined and stays put.
        assert_eq!(analyzer.correlation(), 0.0);
    }

    #[test]
    fn mono_input_is_ignored() {
        let mut analyzer = StereoCorrelation::new(RATE);
        analyzer.process(&[0.5; 64], 1);
        assert_eq!(analyzer.correlation(), 0.0);
    }

    #[test]
    fn high_band_tracks_inverted_treble_only() {
        // Bass in phase, treble out of phase.
        let block = interleave(4096, |t| {
            let bass = (2.0 * PI * 60.0 * t).sin();
            let treble = 0.5 * (2.0 * PI * 10_000.0 * t).sin();
            (bass + treble, bass - treble)
        });
        let mut analyzer = StereoCorrelation::new(RATE);
        run(&mut analyzer, &block, 100);

        let bands = analyzer.band_correlation();
        assert!(bands.low > 0.9, "low band {}", bands.low);
        assert!(bands.high < -0.5, "high band {}", bands.high);
    }

    #[test]
    fn reset_clears_readings() {
        let block = interleave(1024, |t| {
            let s = (2.0 * PI * 440.0 * t).sin();
            (s, s)
        });
        let mut analyzer = StereoCorrelation::new(RATE);
        run(&mut analyzer, &block, 10);
        analyzer.reset();

        assert_eq!(analyzer.correlation(), 0.0);
        assert_eq!(analyzer.band_correlation(), BandCorrelation::default());
    }
}
