//! ID generation utilities for Crucible
//!
//! Provides functions for generating unique identifiers for loops,
//! disagreements, and learning events.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Generate a unique loop ID
///
/// Format: `loop-{timestamp_ms}-{random_hex}`
/// Example: `loop-1738300800123-a1b2`
pub fn generate_loop_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("loop-{}-{:04x}", timestamp, random)
}

/// Generate a disagreement ID
///
/// Format: `dis-{timestamp_ms}-{random_hex}`
pub fn generate_disagreement_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("dis-{}-{:04x}", timestamp, random)
}

/// Generate a learning event ID
///
/// Format: `lrn-{timestamp_ms}-{random_hex}`
pub fn generate_learning_event_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("lrn-{}-{:04x}", timestamp, random)
}

/// Generate an insight ID
///
/// Format: `ins-{timestamp_ms}-{random_hex}`
pub fn generate_insight_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("ins-{}-{:04x}", timestamp, random)
}
