use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::meters::spectrum::SpectrumChannel;
use crate::traits::meter::Meter;

/// Frames of L/R signal kept for drawing.
pub const SCOPE_FRAMES: usize = 2048;

/// Which traces the scope shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    #[default]
    Both,
    Left,
    Right,
    Mid,
    Side,
}

impl ScopeMode {
    pub fn traces(self) -> &'static [SpectrumChannel] {
        match self {
            ScopeMode::Both => &[SpectrumChannel::Left, SpectrumChannel::Right],
            ScopeMode::Left => &[SpectrumChannel::Left],
            ScopeMode::Right => &[SpectrumChannel::Right],
            ScopeMode::Mid => &[SpectrumChannel::Mid],
            ScopeMode::Side => &[SpectrumChannel::Side],
        }
    }
}

/// Time-domain scope over the last [`SCOPE_FRAMES`] frames.
pub struct Oscilloscope {
    left: Box<[f32]>,
    right: Box<[f32]>,
    write_pos: usize,
    zoom: f32,
    mode: ScopeMode,
}

impl Oscilloscope {
    pub fn new() -> Self {
        Self {
            left: vec![0.0; SCOPE_FRAMES].into_boxed_slice(),
            right: vec![0.0; SCOPE_FRAMES].into_boxed_slice(),
            write_pos: 0,
            zoom: 1.0,
            mode: ScopeMode::default(),
        }
    }

    /// 1.0 shows the whole buffer; 4.0 the newest quarter.
    pub fn set_zoom(&mut self, zoom: f32) {
        if zoom > 0.0 && zoom.is_finite() {
            self.zoom = zoom;
        }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn mode(&self) -> ScopeMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ScopeMode) {
        self.mode = mode;
    }

    /// Frames visible at the current zoom, between 2 and [`SCOPE_FRAMES`].
    pub fn visible_frames(&self) -> usize {
        ((SCOPE_FRAMES as f32 / self.zoom) as usize).clamp(2, SCOPE_FRAMES)
    }

    /// The visible part of one signal, oldest first.
    pub fn trace(&self, channel: SpectrumChannel) -> impl Iterator<Item = f32> + '_ {
        let visible = self.visible_frames();
        let start = self.write_pos + SCOPE_FRAMES - visible;
        (start..start + visible).map(move |i| {
            let i = i % SCOPE_FRAMES;
            channel.select(self.left[i], self.right[i])
        })
    }
}

impl Default for Oscilloscope {
    fn default() -> Self {
        Self::new()
    }
}

impl Meter for Oscilloscope {
    fn name(&self) -> &str {
        "Oscilloscope"
    }

    fn update(&mut self, samples: &[f32], frames: usize, channels: u16) {
        let channels = usize::from(channels);
        if channels == 0 {
            return;
        }

        for frame in samples.chunks_exact(channels).take(frames) {
            let l = frame[0];
            self.left[self.write_pos] = l;
            self.right[self.write_pos] = if channels >= 2 { frame[1] } else { l };
            self.write_pos = (self.write_pos + 1) % SCOPE_FRAMES;
        }
    }

    fn reset(&mut self) {
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
