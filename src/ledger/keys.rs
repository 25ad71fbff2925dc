/// Key layout and encoding utilities for the ledger keyspace
///
/// Partition structure:
/// - `entries`: entry:{partition}\0{item}\0{destination} -> LedgerEntry (JSON)
/// - `history`: hist:{partition}\0{item}\0{destination}\0{uuid_v7} -> HistoryRecord (JSON)
/// - `metadata`: dests:{partition} -> destination list (JSON)
///               cursor:{watcher} -> WatchCursor (JSON)
///               watch:{watcher} -> WatchState (JSON)
use uuid::Uuid;

use super::error::{LedgerError, Result};
use super::state::LedgerKey;

const SEP: char = '\0';

/// Reject components that would break the key layout
pub fn validate_component(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(LedgerError::InvalidKey(format!("{kind} must not be empty")));
    }
    if value.contains(SEP) {
        return Err(LedgerError::InvalidKey(format!(
            "{kind} contains a NUL byte: {value:?}"
        )));
    }
    Ok(())
}

pub fn validate_key(key: &LedgerKey) -> Result<()> {
    validate_component("partition", &key.partition)?;
    validate_component("item", &key.item)?;
    validate_component("destination", &key.destination)
}

/// Encode an entry key: entry:{partition}\0{item}\0{destination}
pub fn encode_entry_key(key: &LedgerKey) -> Vec<u8> {
    format!(
        "entry:{}{SEP}{}{SEP}{}",
        key.partition, key.item, key.destination
    )
    .into_bytes()
}

/// Encode the prefix covering every entry of one partition
pub fn encode_partition_prefix(partition: &str) -> Vec<u8> {
    format!("entry:{partition}{SEP}").into_bytes()
}

/// Encode a history prefix for one key: hist:{partition}\0{item}\0{destination}\0
pub fn encode_history_prefix(key: &LedgerKey) -> Vec<u8> {
    format!(
        "hist:{}{SEP}{}{SEP}{}{SEP}",
        key.partition, key.item, key.destination
    )
    .into_bytes()
}

/// Encode a fresh, time-ordered history record key
pub fn encode_history_key(key: &LedgerKey) -> Vec<u8> {
    let mut raw = encode_history_prefix(key);
    raw.extend_from_slice(Uuid::now_v7().simple().to_string().as_bytes());
    raw
}

pub fn encode_destinations_key(partition: &str) -> Vec<u8> {
    format!("dests:{partition}").into_bytes()
}

pub const DESTINATIONS_PREFIX: &[u8] = b"dests:";

pub fn decode_destinations_key(raw: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(raw).ok()?;
    key_str.strip_prefix("dests:").map(String::from)
}

pub fn encode_cursor_key(watcher: &str) -> Vec<u8> {
    format!("cursor:{watcher}").into_bytes()
}

pub fn encode_watch_state_key(watcher: &str) -> Vec<u8> {
    format!("watch:{watcher}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_key_encoding() {
        let key = LedgerKey::new("1999", "vid:42", "rumble");
        let raw = encode_entry_key(&key);
        assert_eq!(raw, b"entry:1999\0vid:42\0rumble");
    }

    #[test]
    fn test_partition_prefix_is_exact() {
        let prefix = encode_partition_prefix("2000");
        let same = encode_entry_key(&LedgerKey::new("2000", "a", "d"));
        let longer = encode_entry_key(&LedgerKey::new("20001", "a", "d"));

        assert!(same.starts_with(&prefix));
        assert!(!longer.starts_with(&prefix));
    }

    #[test]
    fn test_history_keys_are_ordered() {
        let key = LedgerKey::new("p", "i", "d");
        let first = encode_history_key(&key);
        let second = encode_history_key(&key);
        assert!(first < second);
        assert!(first.starts_with(&encode_history_prefix(&key)));
    }

    #[test]
    fn test_validate_rejects_nul_and_empty() {
        assert!(validate_component("item", "").is_err());
        assert!(validate_component("item", "a\0b").is_err());
        assert!(validate_component("item", "watch:inbox").is_ok());
    }

    #[test]
    fn test_destinations_key() {
        let raw = encode_destinations_key("watch:inbox");
        assert_eq!(decode_destinations_key(&raw).unwrap(), "watch:inbox");
        assert!(raw.starts_with(DESTINATIONS_PREFIX));
    }
}
