pub mod context;
pub mod values;
