use std::fmt;

/// Where a message is posted. Ids are passed through to Graph unchecked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Channel { team_id: String, channel_id: String },
    Chat { chat_id: String },
}

impl Destination {
    pub fn channel(team_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Destination::Channel {
            team_id: team_id.into(),
            channel_id: channel_id.into(),
        }
    }

    pub fn chat(chat_id: impl Into<String>) -> Self {
        Destination::Chat {
            chat_id: chat_id.into(),
        }
    }

    pub fn url(&self, base_url: &str) -> String {
        match self {
            Destination::Channel {
                team_id,
                channel_id,
            } => channel_message_url(base_url, team_id, channel_id),
            Destination::Chat { chat_id } => chat_message_url(base_url, chat_id),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Channel {
                team_id,
                channel_id,
            } => write!(f, "channel {}/{}", team_id, channel_id),
            Destination::Chat { chat_id } => write!(f, "chat {}", chat_id),
        }
    }
}

fn base(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

pub fn channel_message_url(base_url: &str, team_id: &str, channel_id: &str) -> String {
    format!(
        "{}/teams/{}/channels/{}/messages",
        base(base_url),
        team_id,
        channel_id
    )
}

pub fn chat_message_url(base_url: &str, chat_id: &str) -> String {
    format!("{}/chats/{}/messages", base(base_url), chat_id)
}
