pub mod background;
pub mod endpoint;
pub mod foreground;
pub mod message;
pub mod queue;
