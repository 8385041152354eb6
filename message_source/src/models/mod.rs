pub mod initialization;
pub mod message;
pub mod progress;
pub mod range;
pub mod time;
