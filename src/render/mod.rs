pub mod abort;
pub mod blocking;
pub mod progress;
pub mod sequence;
