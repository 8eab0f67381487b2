use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ANONYMOUS_CHEERER: &str = "Anonymous";
pub const ANONYMOUS_GIFTER: &str = "Anonymous Gifter";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload decode failed: {0}")]
    Decode(String),
    #[error("payload missing field: {0}")]
    Missing(&'static str),
}

pub fn decode_payload<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, PayloadError> {
    serde_json::from_str(raw).map_err(|err| PayloadError::Decode(err.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BitsEvent {
    pub data: BitsData,
    #[serde(default)]
    pub message_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BitsData {
    pub bits_used: u64,
    #[serde(default)]
    pub chat_message: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub is_anonymous: bool,
}

impl BitsData {
    pub fn is_cheer(&self) -> bool {
        self.context == "cheer"
    }

    pub fn display_name(&self) -> &str {
        match self.user_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => ANONYMOUS_CHEERER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionEvent {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub recipient_display_name: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub sub_plan: String,
    #[serde(default)]
    pub months: Option<u32>,
    pub context: String,
    #[serde(default)]
    pub sub_message: SubMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubMessage {
    #[serde(default)]
    pub message: String,
}

/// Who gets credited for a subscription, and who received it when gifted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionParties {
    pub credited: String,
    pub recipient: Option<String>,
}

impl SubscriptionEvent {
    pub fn is_gift(&self) -> bool {
        matches!(self.context.as_str(), "subgift" | "anonsubgift")
    }

    pub fn parties(&self) -> Result<SubscriptionParties, PayloadError> {
        match self.context.as_str() {
            "anonsubgift" => Ok(SubscriptionParties {
                credited: ANONYMOUS_GIFTER.to_string(),
                recipient: Some(self.recipient()?),
            }),
            "subgift" => Ok(SubscriptionParties {
                credited: self
                    .display_name
                    .clone()
                    .ok_or(PayloadError::Missing("display_name"))?,
                recipient: Some(self.recipient()?),
            }),
            _ => Ok(SubscriptionParties {
                credited: self
                    .display_name
                    .clone()
                    .ok_or(PayloadError::Missing("display_name"))?,
                recipient: None,
            }),
        }
    }

    fn recipient(&self) -> Result<String, PayloadError> {
        self.recipient_display_name
            .clone()
            .ok_or(PayloadError::Missing("recipient_display_name"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PointsEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub data: PointsData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PointsData {
    #[serde(default)]
    pub timestamp: Option<String>,
    pub redemption: Redemption,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Redemption {
    pub user: RedemptionUser,
    pub reward: Reward,
    #[serde(default)]
    pub user_input: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedemptionUser {
    #[serde(default)]
    pub login: Option<String>,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reward {
    pub title: String,
    #[serde(default)]
    pub is_user_input_required: bool,
}

impl Redemption {
    pub fn input(&self) -> Option<&str> {
        if self.reward.is_user_input_required {
            self.user_input.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowEvent {
    pub username: String,
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Option<PollData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollData {
    pub poll: Poll,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Poll {
    pub title: String,
    #[serde(default)]
    pub choices: Vec<PollChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollChoice {
    pub title: String,
    pub votes: PollVotes,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollVotes {
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResults {
    pub max_votes: u64,
    pub winners: Vec<String>,
}

impl PollResults {
    pub fn is_tie(&self) -> bool {
        self.winners.len() > 1
    }
}

impl PollEvent {
    pub const COMPLETE: &'static str = "POLL_COMPLETE";

    pub fn is_complete(&self) -> bool {
        self.kind == Self::COMPLETE
    }

    pub fn poll(&self) -> Result<&Poll, PayloadError> {
        self.data
            .as_ref()
            .map(|data| &data.poll)
            .ok_or(PayloadError::Missing("data.poll"))
    }
}

impl Poll {
    /// Every choice holding the highest vote count wins.
    pub fn results(&self) -> PollResults {
        let max_votes = self
            .choices
            .iter()
            .map(|choice| choice.votes.total)
            .max()
            .unwrap_or(0);
        let winners = self
            .choices
            .iter()
            .filter(|choice| choice.votes.total == max_votes)
            .map(|choice| choice.title.clone())
            .collect();
        PollResults { max_votes, winners }
    }
}
