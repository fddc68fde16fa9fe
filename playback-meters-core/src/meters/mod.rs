//! Render-agnostic meters fed by the engine tick.

pub mod loudness;
pub mod oscilloscope;
pub mod spectrogram;
pub mod spectrum;
pub mod stereometer;
pub mod vu;
pub mod waveform;

/// Peak and mean square of one channel over a block.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct ChannelStats {
    pub peak: f32,
    pub mean_square: f32,
}

impl ChannelStats {
    pub fn rms(&self) -> f32 {
        self.mean_square.sqrt()
    }
}

/// Left/right stats over the first `frames` interleaved frames. A mono block
/// reports the same stats for both sides.
pub(crate) fn stereo_stats(samples: &[f32], frames: usize, channels: u16) -> Option<[ChannelStats; 2]> {
    let channels = usize::from(channels);
    if channels == 0 {
        return None;
    }
    let frames = frames.min(samples.len() / channels);
    if frames == 0 {
        return None;
    }

    let mut peak = [0.0f32; 2];
    let mut sum = [0.0f32; 2];
    for frame in samples[..frames * channels].chunks_exact(channels) {
        let l = frame[0];
        let r = if channels >= 2 { frame[1] } else { l };
        peak[0] = peak[0].max(l.abs());
        peak[1] = peak[1].max(r.abs());
        sum[0] += l * l;
        sum[1] += r * r;
    }

    let n = frames as f32;
    Some([
        ChannelStats {
            peak: peak[0],
            mean_square: sum[0] / n,
        },
        ChannelStats {
            peak: peak[1],
            mean_square: sum[1] / n,
        },
    ])
}

/// Shift `window` left and append the newest `window.len()` values of
/// `incoming`, so it always holds the most recent signal, oldest first.
pub(crate) fn slide_window(window: &mut [f32], incoming: impl ExactSizeIterator<Item = f32>) {
    let len = window.len();
    let total = incoming.len();
    let skip = total.saturating_sub(len);
    let fresh = total - skip;

    window.copy_within(fresh.., 0);
    for (dst, value) in window[len - fresh..].iter_mut().zip(incoming.skip(skip)) {
        *dst = value;
    }
}
