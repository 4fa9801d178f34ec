use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(RequestId);
id_newtype!(MessageId);

pub const MAX_NICKNAME_CHARS: usize = 25;
pub const MAX_MESSAGE_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NicknameError {
    #[error("nickname is empty")]
    Empty,
    #[error("nickname is longer than {max} characters")]
    TooLong { max: usize },
    #[error("nickname contains unsupported character {0:?}; only latin letters and digits are allowed")]
    InvalidCharacter(char),
}

/// Unique account handle.
///
/// Parsing trims surrounding whitespace; the remaining text must be 1 to
/// [`MAX_NICKNAME_CHARS`] ASCII letters or digits. Uniqueness is
/// case-insensitive, see [`Nickname::key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Nickname(String);

impl Nickname {
    pub fn parse(raw: &str) -> Result<Self, NicknameError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(NicknameError::Empty);
        }
        if let Some(bad) = trimmed.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(NicknameError::InvalidCharacter(bad));
        }
        if trimmed.len() > MAX_NICKNAME_CHARS {
            return Err(NicknameError::TooLong {
                max: MAX_NICKNAME_CHARS,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lookup key used for uniqueness checks.
    pub fn key(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    pub fn same_account(&self, other: &Nickname) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for Nickname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Nickname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Nickname {
    type Err = NicknameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Nickname {
    type Error = NicknameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Nickname> for String {
    fn from(value: Nickname) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageTextError {
    #[error("message text is empty")]
    Empty,
    #[error("message text is longer than {max} characters")]
    TooLong { max: usize },
}

pub fn validate_message_text(text: &str) -> Result<(), MessageTextError> {
    if text.trim().is_empty() {
        return Err(MessageTextError::Empty);
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(MessageTextError::TooLong {
            max: MAX_MESSAGE_CHARS,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub nickname: Nickname,
    pub auth_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub text: String,
    #[serde(default)]
    pub reply: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: Nickname,
    pub body: MessageBody,
    pub sent_at: DateTime<Utc>,
}
