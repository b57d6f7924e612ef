use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::AppResult;
use crate::core::types::{AppealId, UserId};

/// Body of every broker message. Serialized as a JSON object whose `type`
/// field selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerMessage {
    /// A finalized appeal waiting for a sender.
    Appeal {
        user_id: UserId,
        appeal_id: AppealId,
        #[serde(default)]
        payload: Value,
    },
    Cancel {
        user_id: UserId,
        appeal_id: AppealId,
    },
    /// The user's answer to a captcha.
    CaptchaText {
        user_id: UserId,
        appeal_id: AppealId,
        captcha_text: String,
    },
    /// A sender needs the user to solve a captcha.
    CaptchaUrl {
        user_id: UserId,
        appeal_id: AppealId,
        captcha_url: String,
        worker: String,
    },
    CaptchaAck {
        user_id: UserId,
        appeal_id: AppealId,
    },
    SendingStatus {
        user_id: UserId,
        appeal_id: AppealId,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    WorkerIdle {
        worker: String,
    },
    WorkerGone {
        worker: String,
    },
}

impl BrokerMessage {
    pub fn from_json(raw: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The `type` discriminator as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Appeal { .. } => "appeal",
            Self::Cancel { .. } => "cancel",
            Self::CaptchaText { .. } => "captcha_text",
            Self::CaptchaUrl { .. } => "captcha_url",
            Self::CaptchaAck { .. } => "captcha_ack",
            Self::SendingStatus { .. } => "sending_status",
            Self::WorkerIdle { .. } => "worker_idle",
            Self::WorkerGone { .. } => "worker_gone",
        }
    }

    /// The appeal the message is about, if any.
    pub fn appeal_key(&self) -> Option<(UserId, AppealId)> {
        match self {
            Self::Appeal { user_id, appeal_id, .. }
            | Self::Cancel { user_id, appeal_id }
            | Self::CaptchaText { user_id, appeal_id, .. }
            | Self::CaptchaUrl { user_id, appeal_id, .. }
            | Self::CaptchaAck { user_id, appeal_id }
            | Self::SendingStatus { user_id, appeal_id, .. } => Some((*user_id, *appeal_id)),
            Self::WorkerIdle { .. } | Self::WorkerGone { .. } => None,
        }
    }
}
