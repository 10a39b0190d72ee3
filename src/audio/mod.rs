pub mod buffer;
pub mod engine;
pub mod meter;
pub mod params;
pub mod recorder;
