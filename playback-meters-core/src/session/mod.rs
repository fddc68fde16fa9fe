pub mod capture;
pub mod devices;
pub mod engine;
