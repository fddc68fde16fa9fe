use std::any::Any;

/// A consumer of captured audio that keeps its own render-agnostic readings.
///
/// The engine calls [`update`](Meter::update) once per tick with the block it
/// pulled; whatever draws the meter reads the implementor's accessors, reached
/// through [`AudioEngine::meter`](crate::session::engine::AudioEngine::meter)
/// or by downcasting [`as_any`](Meter::as_any).
pub trait Meter: Send + 'static {
    fn name(&self) -> &str;

    /// `samples` is interleaved, `frames * channels` long.
    fn update(&mut self, samples: &[f32], frames: usize, channels: u16);

    /// Called when the stream format changes.
    fn set_sample_rate(&mut self, _sample_rate: u32) {}

    fn reset(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
