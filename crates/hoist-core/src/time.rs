//! Epoch clock helpers shared by the index and the monitor.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as whole seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current time as milliseconds since the Unix epoch.
///
/// Expiry stamps are stored at this precision so short-TTL tests behave
/// deterministically.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_and_secs_agree() {
        let s = epoch_secs();
        let ms = epoch_millis();
        // Same clock, coarser unit.
        assert!(ms / 1000 >= s);
        assert!(ms / 1000 - s <= 1);
    }
}
