use serde::{Deserialize, Serialize};

/// One titled text field of a reply body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub title: String,
    pub value: String,
}

impl Field {
    pub fn new(title: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            value: value.into(),
        }
    }
}

/// Platform-agnostic formatted message: an optional lead line, an optional
/// accent color and an ordered list of fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// The outcome of handling one command, addressed to its origin channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Channel id the command came from
    pub channel: String,
    pub title: String,
    pub body: ReplyBody,
    /// Informational replies are dropped by the publisher instead of posted.
    /// Command replies always post, even with an empty body.
    pub skip: bool,
}

impl Reply {
    pub fn new(channel: impl Into<String>, title: impl Into<String>, body: ReplyBody) -> Self {
        Self {
            channel: channel.into(),
            title: title.into(),
            body,
            skip: false,
        }
    }

    /// A reply carrying only a title and an accent color.
    pub fn notice(channel: impl Into<String>, title: impl Into<String>, color: &str) -> Self {
        Self {
            channel: channel.into(),
            title: title.into(),
            body: ReplyBody {
                pretext: None,
                color: Some(color.to_string()),
                fields: Vec::new(),
            },
            skip: false,
        }
    }
}
