pub mod fft;
pub mod loudness;
pub mod notes;
pub mod ring_buffer;
pub mod stereo;
