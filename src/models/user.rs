use serde::{Deserialize, Serialize};

use crate::utils::deserialize_token_list;

/// Owner of queued notifications. The dispatcher only ever reads this
/// document and prunes dead entries from `fcmTokens`, lifecycle of the
/// record itself belongs to the user facing API.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(deserialize_with = "deserialize_token_list")]
    #[serde(default)]
    pub fcm_tokens: Option<Vec<String>>,
}
