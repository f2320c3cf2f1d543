pub mod events;
pub mod log_helpers;
