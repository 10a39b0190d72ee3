pub mod biquad;
pub mod common;
pub mod tonestack;
pub mod waveshaper;
