pub mod audio_host;
pub mod capture_endpoint;
pub mod meter;
