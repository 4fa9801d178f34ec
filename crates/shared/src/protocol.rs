use serde::{Deserialize, Serialize};

use crate::domain::{Credentials, Message, MessageId, Nickname};

/// Closed set of commands the presentation layer may invoke.
///
/// Serialized as `{"command": "<snake_case id>", "args": {...}}`; commands
/// without arguments may omit `args`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum Command {
    Open {
        path: String,
    },
    HaveAccount,
    GetRandomNickname,
    NicknameIsTaken {
        nickname: String,
    },
    Registration {
        nickname: String,
    },
    GetVersionApp,
    GetCryptosForAccept,
    GetOrderAddingCrypto,
    GetOutgoingCryptos,
    SendCrypto {
        nickname: String,
    },
    AddCrypto {
        nickname: String,
    },
    DeleteCrypto {
        nickname: String,
    },
    GetAllUsers,
    GetNickname,
    SendMessage {
        nickname: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply: Option<MessageId>,
    },
    GetMessagesForUser {
        nickname: String,
    },
    RunCommand {
        line: String,
    },
    FuzzySearchCommand {
        query: String,
    },
}

impl Command {
    pub const IDS: &'static [&'static str] = &[
        "open",
        "have_account",
        "get_random_nickname",
        "nickname_is_taken",
        "registration",
        "get_version_app",
        "get_cryptos_for_accept",
        "get_order_adding_crypto",
        "get_outgoing_cryptos",
        "send_crypto",
        "add_crypto",
        "delete_crypto",
        "get_all_users",
        "get_nickname",
        "send_message",
        "get_messages_for_user",
        "run_command",
        "fuzzy_search_command",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::Open { .. } => "open",
            Command::HaveAccount => "have_account",
            Command::GetRandomNickname => "get_random_nickname",
            Command::NicknameIsTaken { .. } => "nickname_is_taken",
            Command::Registration { .. } => "registration",
            Command::GetVersionApp => "get_version_app",
            Command::GetCryptosForAccept => "get_cryptos_for_accept",
            Command::GetOrderAddingCrypto => "get_order_adding_crypto",
            Command::GetOutgoingCryptos => "get_outgoing_cryptos",
            Command::SendCrypto { .. } => "send_crypto",
            Command::AddCrypto { .. } => "add_crypto",
            Command::DeleteCrypto { .. } => "delete_crypto",
            Command::GetAllUsers => "get_all_users",
            Command::GetNickname => "get_nickname",
            Command::SendMessage { .. } => "send_message",
            Command::GetMessagesForUser { .. } => "get_messages_for_user",
            Command::RunCommand { .. } => "run_command",
            Command::FuzzySearchCommand { .. } => "fuzzy_search_command",
        }
    }
}

/// Resolved value of a command, serialized without a tag so the bridge sees
/// `null`, a boolean, a string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandResponse {
    Unit,
    Bool(bool),
    Text(String),
    Nicknames(Vec<Nickname>),
    Messages(Vec<Message>),
    Lines(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub nickname: Nickname,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NicknameStatusResponse {
    pub nickname: Nickname,
    pub taken: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedRequest {
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRequest {
    pub credentials: Credentials,
    pub peer: Nickname,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub credentials: Credentials,
    pub peer: Nickname,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    FriendRequestReceived {
        from: Nickname,
        to: Nickname,
    },
    FriendRequestAccepted {
        requester: Nickname,
        accepter: Nickname,
    },
    FriendRequestDeclined {
        requester: Nickname,
        decliner: Nickname,
    },
    MessageReceived {
        recipient: Nickname,
        message: Message,
    },
}

impl ServerEvent {
    /// Whether `nickname` is one of the two accounts this event is about.
    pub fn concerns(&self, nickname: &Nickname) -> bool {
        let (a, b) = match self {
            ServerEvent::FriendRequestReceived { from, to } => (from, to),
            ServerEvent::FriendRequestAccepted {
                requester,
                accepter,
            } => (requester, accepter),
            ServerEvent::FriendRequestDeclined {
                requester,
                decliner,
            } => (requester, decliner),
            ServerEvent::MessageReceived { recipient, message } => (recipient, &message.sender),
        };
        a.same_account(nickname) || b.same_account(nickname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_without_args_parse_without_args_field() {
        let cmd: Command = serde_json::from_str(r#"{"command":"have_account"}"#).expect("json");
        assert_eq!(cmd, Command::HaveAccount);
    }

    #[test]
    fn command_args_use_snake_case_ids() {
        let cmd: Command = serde_json::from_str(
            r#"{"command":"send_message","args":{"nickname":"bob","text":"hi"}}"#,
        )
        .expect("json");
        assert_eq!(
            cmd,
            Command::SendMessage {
                nickname: "bob".into(),
                text: "hi".into(),
                reply: None,
            }
        );
        assert_eq!(cmd.name(), "send_message");
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(serde_json::from_str::<Command>(r#"{"command":"drop_tables"}"#).is_err());
    }

    #[test]
    fn every_command_name_is_listed() {
        let samples = [
            Command::Open { path: "x".into() },
            Command::HaveAccount,
            Command::GetRandomNickname,
            Command::NicknameIsTaken { nickname: "a".into() },
            Command::Registration { nickname: "a".into() },
            Command::GetVersionApp,
            Command::GetCryptosForAccept,
            Command::GetOrderAddingCrypto,
            Command::GetOutgoingCryptos,
            Command::SendCrypto { nickname: "a".into() },
            Command::AddCrypto { nickname: "a".into() },
            Command::DeleteCrypto { nickname: "a".into() },
            Command::GetAllUsers,
            Command::GetNickname,
            Command::SendMessage {
                nickname: "a".into(),
                text: "t".into(),
                reply: None,
            },
            Command::GetMessagesForUser { nickname: "a".into() },
            Command::RunCommand { line: "l".into() },
            Command::FuzzySearchCommand { query: "q".into() },
        ];
        assert_eq!(samples.len(), Command::IDS.len());
        for cmd in samples {
            assert!(Command::IDS.contains(&cmd.name()), "{}", cmd.name());
            let json = serde_json::to_value(&cmd).expect("json");
            assert_eq!(json["command"], cmd.name());
        }
    }

    #[test]
    fn unit_response_serializes_as_null() {
        assert_eq!(
            serde_json::to_string(&CommandResponse::Unit).expect("json"),
            "null"
        );
        assert_eq!(
            serde_json::to_string(&CommandResponse::Bool(true)).expect("json"),
            "true"
        );
    }

    #[test]
    fn events_concern_both_parties_only() {
        let alice = Nickname::parse("alice").expect("nickname");
        let bob = Nickname::parse("Bob").expect("nickname");
        let carol = Nickname::parse("carol").expect("nickname");
        let event = ServerEvent::FriendRequestReceived {
            from: alice.clone(),
            to: bob,
        };
        assert!(event.concerns(&alice));
        assert!(event.concerns(&Nickname::parse("bob").expect("nickname")));
        assert!(!event.concerns(&carol));
    }
}
