//! Utilities module - query normalization, filename sanitizing and timestamp helpers

pub mod text_utils;
pub mod time_utils;

// Re-export commonly used utilities
pub use text_utils::TextUtils;
pub use time_utils::{expiry_cutoff, format_timestamp, parse_timestamp};
