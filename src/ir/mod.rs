pub mod convolver;
pub mod delay;
pub mod loader;
pub mod model;
pub mod processor;
