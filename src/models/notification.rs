//! Notification models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::de;

/// A notification shown in the bell menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(deserialize_with = "de::string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
    #[serde(deserialize_with = "de::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    /// Server-side category (submission, voucher, chat, ...).
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}
