//! Identifier validation and deterministic naming.

use uuid::Uuid;

use crate::error::{MemoryError, MemoryResult};

/// Shared index holding one record per (user, chat) pair
pub const METADATA_INDEX: &str = "chatmem-metadata";

/// Message index used by the shared layout
pub const SHARED_MESSAGE_INDEX: &str = "chatmem-messages";

const MAX_ID_LEN: usize = 64;

/// Namespace for metadata record ids (UUIDv5)
const METADATA_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93d7_4b58_a0e1_5c3b_7d29_e814);

/// User and chat ids end up in index names and filters: non-empty, at most
/// 64 chars, ASCII alphanumerics plus `-` and `_`.
pub fn validate_id(kind: &str, id: &str) -> MemoryResult<()> {
    if id.is_empty() {
        return Err(MemoryError::InvalidIdentifier(format!("{} is empty", kind)));
    }
    if id.len() > MAX_ID_LEN {
        return Err(MemoryError::InvalidIdentifier(format!(
            "{} longer than {} characters",
            kind, MAX_ID_LEN
        )));
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(MemoryError::InvalidIdentifier(format!(
            "{} {:?} contains {:?}",
            kind, id, bad
        )));
    }
    Ok(())
}

/// Per-chat message index name
pub fn chat_index_name(chat_id: &str) -> String {
    format!("chat-{}", chat_id)
}

/// Deterministic metadata record id for a (user, chat) pair
pub fn metadata_id(user_id: &str, chat_id: &str) -> Uuid {
    Uuid::new_v5(
        &METADATA_NAMESPACE,
        format!("{}:{}", user_id, chat_id).as_bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("chat_id", "3f2b-11_aa").is_ok());
        assert!(validate_id("chat_id", "").is_err());
        assert!(validate_id("chat_id", "a/b").is_err());
        assert!(validate_id("chat_id", "has space").is_err());
        assert!(validate_id("chat_id", &"x".repeat(65)).is_err());
    }

    #[test]
    fn test_metadata_id_is_deterministic() {
        assert_eq!(metadata_id("u1", "c1"), metadata_id("u1", "c1"));
        assert_ne!(metadata_id("u1", "c1"), metadata_id("u2", "c1"));
        assert_ne!(metadata_id("u1", "c1"), metadata_id("u1", "c2"));
    }

    #[test]
    fn test_index_names_cannot_collide_with_reserved() {
        for chat in ["metadata", "messages", "chatmem-metadata"] {
            let name = chat_index_name(chat);
            assert_ne!(name, METADATA_INDEX);
            assert_ne!(name, SHARED_MESSAGE_INDEX);
        }
    }
}
