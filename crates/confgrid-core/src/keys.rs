//! Release key and branch name generation.
//!
//! Keys look like `20261016093000-1a2b3c4d5e6f7a8b`: a local timestamp to
//! the second, then eight hex-encoded bytes made of a two-byte digest of
//! the caller's arguments, a three-byte per-process machine id, and a
//! three-byte counter that starts at a random value.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

use sha2::{Digest, Sha256};

const COUNTER_MASK: u32 = 0x00ff_ffff;

fn machine_id() -> &'static [u8; 3] {
    static MACHINE_ID: OnceLock<[u8; 3]> = OnceLock::new();
    MACHINE_ID.get_or_init(rand::random::<[u8; 3]>)
}

fn counter() -> &'static AtomicU32 {
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
    COUNTER.get_or_init(|| AtomicU32::new(rand::random::<u32>() & COUNTER_MASK))
}

/// Local time as `yyyyMMddHHmmss`.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}

/// Generate a unique key scoped by `parts` (typically app, cluster and
/// namespace names).
pub fn generate(parts: &[&str]) -> String {
    let timestamp = timestamp();

    let digest = Sha256::digest(parts.join("+").as_bytes());
    let count = counter().fetch_add(1, Ordering::Relaxed) & COUNTER_MASK;
    let machine = machine_id();

    let bytes = [
        digest[0],
        digest[1],
        machine[0],
        machine[1],
        machine[2],
        (count >> 16) as u8,
        (count >> 8) as u8,
        count as u8,
    ];
    format!("{timestamp}-{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn key_layout() {
        let key = generate(&["app", "default", "application"]);
        let (timestamp, suffix) = key.split_once('-').unwrap();
        assert_eq!(timestamp.len(), 14);
        assert!(timestamp.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(suffix.len(), 16);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn keys_are_unique_within_a_process() {
        let keys: HashSet<String> = (0..1000)
            .map(|_| generate(&["app", "default", "application"]))
            .collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn digest_prefix_depends_on_arguments() {
        let a = generate(&["app-a", "default", "ns"]);
        let b = generate(&["app-b", "default", "ns"]);
        assert_ne!(&a[15..19], &b[15..19]);
    }
}
