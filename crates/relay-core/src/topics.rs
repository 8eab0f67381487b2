use std::fmt;

/// Event categories published on the push stream. Each topic on the wire is
/// `<prefix><channel_id>`, so routing is by prefix and never by equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Bits,
    Subscription,
    ChannelPoints,
    Follow,
    HypeTrain,
    Raid,
    Poll,
    CommunityPoints,
}

impl TopicKind {
    /// Declared dispatch priority. The first kind whose prefix matches wins.
    pub const DISPATCH_ORDER: [TopicKind; 8] = [
        TopicKind::Bits,
        TopicKind::Subscription,
        TopicKind::ChannelPoints,
        TopicKind::Follow,
        TopicKind::HypeTrain,
        TopicKind::Raid,
        TopicKind::Poll,
        TopicKind::CommunityPoints,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            TopicKind::Bits => "channel-bits-events-v2.",
            TopicKind::Subscription => "channel-subscribe-events-v1.",
            TopicKind::ChannelPoints => "channel-points-channel-v1.",
            TopicKind::Follow => "following.",
            TopicKind::HypeTrain => "hype-train-events-v1.",
            TopicKind::Raid => "raid.",
            TopicKind::Poll => "polls.",
            TopicKind::CommunityPoints => "community-points-channel-v1.",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TopicKind::Bits => "bits",
            TopicKind::Subscription => "subscription",
            TopicKind::ChannelPoints => "channel_points",
            TopicKind::Follow => "follow",
            TopicKind::HypeTrain => "hype_train",
            TopicKind::Raid => "raid",
            TopicKind::Poll => "poll",
            TopicKind::CommunityPoints => "community_points",
        }
    }

    pub fn topic_for(self, channel_id: &str) -> String {
        format!("{}{}", self.prefix(), channel_id)
    }

    /// True when this kind's prefix is a proper prefix of `topic`.
    pub fn matches(self, topic: &str) -> bool {
        is_proper_prefix(self.prefix(), topic)
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_proper_prefix(prefix: &str, topic: &str) -> bool {
    topic.len() > prefix.len() && topic.starts_with(prefix)
}
