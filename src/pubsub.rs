//! Pub/Sub push envelope carrying Gmail change notifications.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::Deserialize;

use crate::error::PushError;
use crate::google::string_u64;
use crate::pipeline::types::ChangeCursor;

const DATA_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Body of a push request.
#[derive(Debug, Clone, Deserialize)]
pub struct PushRequest {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64 JSON from Gmail.
    pub data: String,
    #[serde(default, alias = "message_id")]
    pub message_id: String,
    #[serde(default)]
    pub publish_time: Option<String>,
}

/// Decoded Gmail notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailNotification {
    pub email_address: String,
    #[serde(with = "string_u64")]
    pub history_id: u64,
}

impl GmailNotification {
    pub fn cursor(&self) -> ChangeCursor {
        ChangeCursor(self.history_id)
    }
}

impl PushMessage {
    pub fn decode(&self) -> Result<GmailNotification, PushError> {
        let bytes = DATA_ENGINE
            .decode(self.data.trim())
            .map_err(|e| PushError::Base64(e.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
