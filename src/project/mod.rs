pub mod curve;
pub mod model;
