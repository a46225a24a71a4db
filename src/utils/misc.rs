use mongodb::bson::oid::ObjectId;
use mongodb::bson::Bson;
use serde::{Deserialize, Deserializer};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get EPOCH timestamp in seconds
pub fn get_epoch_ts() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(n) => n.as_secs(),
        Err(_) => panic!("SystemTime before UNIX EPOCH!"),
    }
}

/// Parse the given value as ObjectId
pub fn parse_object_id(id: &str) -> anyhow::Result<ObjectId> {
    let oid = ObjectId::parse_str(id)?;
    Ok(oid)
}

/// Deserialize helper for ObjectId field
pub fn deserialize_helper<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Option::<ObjectId>::deserialize(deserializer)?;
    match val {
        None => Ok(None),
        Some(val) => Ok(Some(val.to_hex())),
    }
}

/// Deserialize helper for the fcmTokens array. Stored documents are not
/// guaranteed to be well shaped, a missing field, a non-array value or
/// non-string elements must all be tolerated. Non-string elements are
/// dropped, order of the remaining tokens is preserved.
pub fn deserialize_token_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Option::<Bson>::deserialize(deserializer)?;
    let tokens = match val {
        Some(Bson::Array(items)) => {
            let tokens = items
                .into_iter()
                .filter_map(|item| match item {
                    Bson::String(token) => Some(token),
                    _ => None,
                })
                .collect();
            Some(tokens)
        }
        _ => None,
    };
    Ok(tokens)
}

/// Keep only the tokens which are usable as push targets,
/// empty and whitespace-only strings are dropped
pub fn filter_valid_tokens(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .filter(|token| !token.trim().is_empty())
        .cloned()
        .collect()
}
