use std::any::Any;

use crate::meters::slide_window;
use crate::meters::spectrum::{MAX_DISPLAY_HZ, MIN_DISPLAY_HZ};
use crate::processing::fft::{FftProcessor, MIN_DB};
use crate::traits::meter::Meter;

/// Columns of history kept (oldest dropped first).
pub const SPECTROGRAM_COLUMNS: usize = 256;
/// Logarithmic frequency rows per column.
pub const SPECTROGRAM_ROWS: usize = 128;
pub const SPECTROGRAM_FFT_SIZE: usize = 2048;

const DEFAULT_MIN_DB: f32 = -60.0;
const DEFAULT_MAX_DB: f32 = 0.0;

/// Lower edge of `row` on the 20 Hz–20 kHz log axis.
pub fn row_frequency(row: usize) -> f32 {
    let t = row as f32 / (SPECTROGRAM_ROWS - 1) as f32;
    MIN_DISPLAY_HZ * (MAX_DISPLAY_HZ / MIN_DISPLAY_HZ).powf(t)
}

/// Rolling time/frequency history of the mid signal.
///
/// Every `updates_per_column` ticks one column of [`SPECTROGRAM_ROWS`] band
/// levels (dB) is written; the history is a ring of [`SPECTROGRAM_COLUMNS`].
pub struct SpectrogramMeter {
    fft: FftProcessor,
    mono: Vec<f32>,
    history: Vec<f32>,
    write_pos: usize,
    min_db: f32,
    max_db: f32,
    updates_per_column: usize,
    update_counter: usize,
}

impl SpectrogramMeter {
    pub fn new(sample_rate: u32) -> Self {
        let mut fft = FftProcessor::new(SPECTROGRAM_FFT_SIZE);
        fft.set_sample_rate(sample_rate);
        Self {
            mono: vec![0.0; fft.fft_size()],
            fft,
            history: vec![MIN_DB; SPECTROGRAM_COLUMNS * SPECTROGRAM_ROWS],
            write_pos: 0,
            min_db: DEFAULT_MIN_DB,
            max_db: DEFAULT_MAX_DB,
            updates_per_column: 1,
            update_counter: 0,
        }
    }

    pub fn set_fft_size(&mut self, fft_size: usize) {
        self.fft.set_fft_size(fft_size);
        self.mono = vec![0.0; self.fft.fft_size()];
    }

    pub fn fft(&self) -> &FftProcessor {
        &self.fft
    }

    /// Display range used by [`normalized`](Self::normalized). Ignored
    /// unless `min_db < max_db`.
    pub fn set_db_range(&mut self, min_db: f32, max_db: f32) {
        if min_db < max_db {
            self.min_db = min_db;
            self.max_db = max_db;
        }
    }

    pub fn db_range(&self) -> (f32, f32) {
        (self.min_db, self.max_db)
    }

    pub fn set_updates_per_column(&mut self, updates: usize) {
        self.updates_per_column = updates.max(1);
    }

    /// Position of `db` within the display range, clamped to [0, 1].
    pub fn normalized(&self, db: f32) -> f32 {
        ((db - self.min_db) / (self.max_db - self.min_db)).clamp(0.0, 1.0)
    }

    /// Columns oldest first, each [`SPECTROGRAM_ROWS`] long with row 0 the
    /// lowest band.
    pub fn columns(&self) -> impl Iterator<Item = &[f32]> + '_ {
        (self.write_pos..SPECTROGRAM_COLUMNS)
            .chain(0..self.write_pos)
            .map(move |column| self.column_at(column))
    }

    /// The most recently written column.
    pub fn latest(&self) -> &[f32] {
        self.column_at((self.write_pos + SPECTROGRAM_COLUMNS - 1) % SPECTROGRAM_COLUMNS)
    }

    fn column_at(&self, column: usize) -> &[f32] {
        let start = column * SPECTROGRAM_ROWS;
        &self.history[start..start + SPECTROGRAM_ROWS]
    }

    fn write_column(&mut self) {
        let start = self.write_pos * SPECTROGRAM_ROWS;
        let fft = &self.fft;
        for (row, slot) in self.history[start..start + SPECTROGRAM_ROWS].iter_mut().enumerate() {
            *slot = fft.band_magnitude_db(row_frequency(row), row_frequency(row + 1));
        }
        self.write_pos = (self.write_pos + 1) % SPECTROGRAM_COLUMNS;
    }
}

impl Meter for SpectrogramMeter {
    fn name(&self) -> &str {
        "Spectrogram"
    }

    fn update(&mut self, samples: &[f32], frames: usize, channels: u16) {
        let channels = usize::from(channels);
        if channels == 0 {
            return;
        }
        let frames = frames.min(samples.len() / channels);
        if frames == 0 {
            return;
        }

        let incoming = samples.chunks_exact(channels).take(frames).map(|frame| {
            if channels >= 2 {
                (frame[0] + frame[1]) * 0.5
            } else {
                frame[0]
            }
        });
        slide_window(&mut self.mono, incoming);
        self.fft.process(&self.mono);

        self.update_counter += 1;
        if self.update_counter >= self.updates_per_column {
            self.update_counter = 0;
            self.write_column();
        }
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.fft.set_sample_rate(sample_rate);
    }

    fn reset(&mut self) {
        let size = self.fft.fft_size();
        self.fft.set_fft_size(size);
        self.mono.fill(0.0);
        self.history.fill(MIN_DB);
        self.write_pos = 0;
        self.update_counter = 0;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
