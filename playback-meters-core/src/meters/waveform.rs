use std::any::Any;

use crate::traits::meter::Meter;

/// Columns of history kept.
pub const WAVEFORM_COLUMNS: usize = 512;
/// Frames folded into one column at scroll speed 1.
pub const SAMPLES_PER_COLUMN: usize = 256;

/// Min/max envelope and RMS of one column's frames.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WaveformColumn {
    pub min_l: f32,
    pub max_l: f32,
    pub min_r: f32,
    pub max_r: f32,
    pub rms_l: f32,
    pub rms_r: f32,
}

impl WaveformColumn {
    /// Largest absolute excursion on either side.
    pub fn peak(&self) -> f32 {
        self.max_l
            .abs()
            .max(self.max_r.abs())
            .max(self.min_l.abs())
            .max(self.min_r.abs())
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    min_l: f32,
    max_l: f32,
    min_r: f32,
    max_r: f32,
    sum_l: f32,
    sum_r: f32,
    frames: usize,
}

impl Accumulator {
    fn add(&mut self, l: f32, r: f32) {
        self.min_l = self.min_l.min(l);
        self.max_l = self.max_l.max(l);
        self.min_r = self.min_r.min(r);
        self.max_r = self.max_r.max(r);
        self.sum_l += l * l;
        self.sum_r += r * r;
        self.frames += 1;
    }

    fn take(&mut self) -> WaveformColumn {
        let n = self.frames.max(1) as f32;
        let column = WaveformColumn {
            min_l: self.min_l,
            max_l: self.max_l,
            min_r: self.min_r,
            max_r: self.max_r,
            rms_l: (self.sum_l / n).sqrt(),
            rms_r: (self.sum_r / n).sqrt(),
        };
        *self = Self::default();
        column
    }
}

/// Scrolling min/max waveform with a per-column peak history.
pub struct WaveformMeter {
    columns: Vec<WaveformColumn>,
    peaks: Vec<f32>,
    write_pos: usize,
    scroll_speed: f32,
    acc: Accumulator,
}

impl WaveformMeter {
    pub fn new() -> Self {
        Self {
            columns: vec![WaveformColumn::default(); WAVEFORM_COLUMNS],
            peaks: vec![0.0; WAVEFORM_COLUMNS],
            write_pos: 0,
            scroll_speed: 1.0,
            acc: Accumulator::default(),
        }
    }

    /// Higher speeds fold fewer frames into each column.
    pub fn set_scroll_speed(&mut self, speed: f32) {
        if speed > 0.0 && speed.is_finite() {
            self.scroll_speed = speed;
        }
    }

    pub fn scroll_speed(&self) -> f32 {
        self.scroll_speed
    }

    pub fn frames_per_column(&self) -> usize {
        ((SAMPLES_PER_COLUMN as f32 / self.scroll_speed) as usize).max(1)
    }

    /// Columns oldest first.
    pub fn columns(&self) -> impl Iterator<Item = &WaveformColumn> + '_ {
        self.oldest_first().map(move |i| &self.columns[i])
    }

    /// Column peaks oldest first.
    pub fn peak_history(&self) -> impl Iterator<Item = f32> + '_ {
        self.oldest_first().map(move |i| self.peaks[i])
    }

    fn oldest_first(&self) -> impl Iterator<Item = usize> {
        (self.write_pos..WAVEFORM_COLUMNS).chain(0..self.write_pos)
    }
}

impl Default for WaveformMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl Meter for WaveformMeter {
    fn name(&self) -> &str {
        "Waveform"
    }

    fn update(&mut self, samples: &[f32], frames: usize, channels: u16) {
        let channels = usize::from(channels);
        if channels == 0 {
            return;
        }
        let threshold = self.frames_per_column();

        for frame in samples.chunks_exact(channels).take(frames) {
            let l = frame[0];
            let r = if channels >= 2 { frame[1] } else { l };
            self.acc.add(l, r);

            if self.acc.frames >= threshold {
                let column = self.acc.take();
                self.peaks[self.write_pos] = column.peak();
                self.columns[self.write_pos] = column;
                self.write_pos = (self.write_pos + 1) % WAVEFORM_COLUMNS;
            }
        }
    }

    fn reset(&mut self) {
        self.columns.fill(WaveformColumn::default());
        self.peaks.fill(0.0);
        self.write_pos = 0;
        self.acc = Accumulator::default();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
