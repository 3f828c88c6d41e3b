//! Foundational low-level utilities shared across Courier crates.
//!
//! Provides time helpers used by token expiry bookkeeping and the text
//! normalization primitives behind message rendering.

pub mod text_normalize;
pub mod time_utils;

pub use text_normalize::{decode_html_entities, repair_mojibake, substitute_placeholders};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, is_expired_unix};
