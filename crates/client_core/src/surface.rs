use std::{future::Future, sync::Arc, time::Duration};

use rand::{seq::SliceRandom, Rng};
use shared::{
    domain::{validate_message_text, Message, MessageBody, MessageId, Nickname},
    protocol::{Command, CommandResponse},
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    backend::{ChatBackend, EventStream},
    conversation::ConversationSession,
    error::CommandError,
    launcher::{Launcher, SystemLauncher},
    profile::{Profile, ProfileStore},
    runner::{fuzzy_search, parse_command_line, DEFAULT_FUZZY_LIMIT},
    validation::NicknameChecker,
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RANDOM_NICKNAME_ATTEMPTS: usize = 8;

const FIRST_NAMES: &[&str] = &[
    "alex", "anna", "boris", "daria", "egor", "elena", "fedor", "galina", "igor", "irina", "kira",
    "lev", "maria", "mark", "nadia", "oleg", "olga", "pavel", "roman", "sofia", "timur", "vera",
    "yuri", "zoya",
];

#[derive(Debug, Clone)]
pub struct SurfaceConfig {
    pub app_version: String,
    pub request_timeout: Duration,
    pub random_nickname_attempts: usize,
    pub fuzzy_limit: usize,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            random_nickname_attempts: DEFAULT_RANDOM_NICKNAME_ATTEMPTS,
            fuzzy_limit: DEFAULT_FUZZY_LIMIT,
        }
    }
}

/// The command surface the presentation layer talks to.
///
/// Owns the cached local profile; everything durable lives in the backend.
pub struct CommandSurface {
    backend: Arc<dyn ChatBackend>,
    profiles: ProfileStore,
    profile: RwLock<Option<Profile>>,
    registration: Mutex<()>,
    launcher: Arc<dyn Launcher>,
    config: SurfaceConfig,
}

impl CommandSurface {
    pub async fn new(
        backend: Arc<dyn ChatBackend>,
        profiles: ProfileStore,
        config: SurfaceConfig,
    ) -> Result<Self, CommandError> {
        let profile = profiles.load().await?;
        if let Some(profile) = &profile {
            info!(nickname = %profile.nickname, "loaded local profile");
        }
        Ok(Self {
            backend,
            profiles,
            profile: RwLock::new(profile),
            registration: Mutex::new(()),
            launcher: Arc::new(SystemLauncher),
            config,
        })
    }

    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    pub fn nickname_checker(&self, debounce: Duration) -> NicknameChecker {
        NicknameChecker::new(self.backend.clone(), debounce, self.config.request_timeout)
    }

    /// Runs one typed command. `run_command` lines are parsed here and the
    /// resulting command is dispatched like any other.
    pub async fn execute(&self, command: Command) -> Result<CommandResponse, CommandError> {
        let name = command.name();
        debug!(command = name, "executing command");
        let result = match command {
            Command::RunCommand { line } => match parse_command_line(&line, self.config.fuzzy_limit) {
                Ok(parsed) => {
                    debug!(command = parsed.name(), "running parsed command line");
                    self.dispatch(parsed).await
                }
                Err(err) => Err(err),
            },
            other => self.dispatch(other).await,
        };
        if let Err(err) = &result {
            warn!(command = name, kind = err.kind(), error = %err, "command failed");
        }
        result
    }

    async fn dispatch(&self, command: Command) -> Result<CommandResponse, CommandError> {
        let response = match command {
            Command::Open { path } => {
                self.open(&path);
                CommandResponse::Unit
            }
            Command::HaveAccount => CommandResponse::Bool(self.have_account().await),
            Command::GetRandomNickname => CommandResponse::Text(self.get_random_nickname().await?),
            Command::NicknameIsTaken { nickname } => {
                CommandResponse::Bool(self.nickname_is_taken(&nickname).await?)
            }
            Command::Registration { nickname } => {
                self.registration(&nickname).await?;
                CommandResponse::Unit
            }
            Command::GetVersionApp => CommandResponse::Text(self.get_version_app()),
            Command::GetCryptosForAccept | Command::GetOrderAddingCrypto => {
                CommandResponse::Nicknames(self.get_cryptos_for_accept().await?)
            }
            Command::GetOutgoingCryptos => {
                CommandResponse::Nicknames(self.get_outgoing_cryptos().await?)
            }
            Command::SendCrypto { nickname } => {
                self.send_crypto(&nickname).await?;
                CommandResponse::Unit
            }
            Command::AddCrypto { nickname } => {
                self.add_crypto(&nickname).await?;
                CommandResponse::Unit
            }
            Command::DeleteCrypto { nickname } => {
                self.delete_crypto(&nickname).await?;
                CommandResponse::Unit
            }
            Command::GetAllUsers => CommandResponse::Nicknames(self.get_all_users().await?),
            Command::GetNickname => CommandResponse::Text(self.get_nickname().await?.to_string()),
            Command::SendMessage {
                nickname,
                text,
                reply,
            } => {
                self.send_message(&nickname, &text, reply).await?;
                CommandResponse::Unit
            }
            Command::GetMessagesForUser { nickname } => {
                CommandResponse::Messages(self.get_messages_for_user(&nickname).await?)
            }
            Command::RunCommand { .. } => {
                return Err(CommandError::Validation(
                    "run_command cannot be nested".into(),
                ))
            }
            Command::FuzzySearchCommand { query } => {
                CommandResponse::Lines(self.fuzzy_search_command(&query))
            }
        };
        Ok(response)
    }

    /// Hands `path` to the platform opener. Failures are logged only.
    pub fn open(&self, path: &str) {
        info!(%path, "opening with platform handler");
        if let Err(error) = self.launcher.launch(path) {
            warn!(%path, %error, "platform handler failed to open path");
        }
    }

    pub async fn have_account(&self) -> bool {
        self.profile.read().await.is_some()
    }

    /// Asks the backend whether the stored credentials are still accepted.
    /// Returns `false` when there is no local account.
    pub async fn verify_account(&self) -> Result<bool, CommandError> {
        let Some(profile) = self.profile.read().await.clone() else {
            return Ok(false);
        };
        let valid = self
            .bounded(self.backend.check_account(&profile.credentials()))
            .await?;
        if !valid {
            warn!(nickname = %profile.nickname, "backend no longer accepts the local account");
        }
        Ok(valid)
    }

    pub async fn get_random_nickname(&self) -> Result<String, CommandError> {
        for attempt in 1..=self.config.random_nickname_attempts {
            let candidate = random_candidate(&mut rand::thread_rng())?;
            if !self
                .bounded(self.backend.nickname_is_taken(&candidate))
                .await?
            {
                debug!(%candidate, attempt, "suggested free nickname");
                return Ok(candidate.to_string());
            }
        }
        Err(CommandError::Conflict(format!(
            "no free nickname found in {} attempts",
            self.config.random_nickname_attempts
        )))
    }

    pub async fn nickname_is_taken(&self, nickname: &str) -> Result<bool, CommandError> {
        let nickname = parse_nickname(nickname)?;
        self.bounded(self.backend.nickname_is_taken(&nickname)).await
    }

    /// Creates the account remotely, then persists it locally.
    pub async fn registration(&self, nickname: &str) -> Result<(), CommandError> {
        let nickname = parse_nickname(nickname)?;
        let _guard = self.registration.lock().await;
        if let Some(existing) = self.profile.read().await.as_ref() {
            return Err(CommandError::Conflict(format!(
                "this installation already has the account '{}'",
                existing.nickname
            )));
        }

        let credentials = self.bounded(self.backend.register(&nickname)).await?;
        let profile = Profile::from_credentials(credentials);
        if let Err(error) = self.profiles.save(&profile).await {
            // The backend already holds the account; without the saved key it
            // can only be recovered by an operator.
            warn!(nickname = %profile.nickname, %error, "registered account could not be saved locally");
            return Err(CommandError::Storage(format!(
                "account '{}' was registered but not saved locally: {error}",
                profile.nickname
            )));
        }
        info!(nickname = %profile.nickname, "registered local account");
        *self.profile.write().await = Some(profile);
        Ok(())
    }

    pub fn get_version_app(&self) -> String {
        self.config.app_version.clone()
    }

    pub async fn get_cryptos_for_accept(&self) -> Result<Vec<Nickname>, CommandError> {
        let credentials = self.credentials().await?;
        self.bounded(self.backend.incoming_requests(&credentials))
            .await
    }

    pub async fn get_order_adding_crypto(&self) -> Result<Vec<Nickname>, CommandError> {
        self.get_cryptos_for_accept().await
    }

    pub async fn get_outgoing_cryptos(&self) -> Result<Vec<Nickname>, CommandError> {
        let credentials = self.credentials().await?;
        self.bounded(self.backend.outgoing_requests(&credentials))
            .await
    }

    pub async fn send_crypto(&self, nickname: &str) -> Result<(), CommandError> {
        let credentials = self.credentials().await?;
        let peer = parse_nickname(nickname)?;
        if peer.same_account(&credentials.nickname) {
            return Err(CommandError::Validation(
                "cannot send a friend request to yourself".into(),
            ));
        }
        self.bounded(self.backend.send_friend_request(&credentials, &peer))
            .await?;
        info!(peer = %peer, "friend request sent");
        Ok(())
    }

    pub async fn add_crypto(&self, nickname: &str) -> Result<(), CommandError> {
        let credentials = self.credentials().await?;
        let peer = parse_nickname(nickname)?;
        self.bounded(self.backend.accept_friend_request(&credentials, &peer))
            .await
    }

    pub async fn delete_crypto(&self, nickname: &str) -> Result<(), CommandError> {
        let credentials = self.credentials().await?;
        let peer = parse_nickname(nickname)?;
        self.bounded(self.backend.decline_friend_request(&credentials, &peer))
            .await
    }

    pub async fn get_all_users(&self) -> Result<Vec<Nickname>, CommandError> {
        let credentials = self.credentials().await?;
        self.bounded(self.backend.friends(&credentials)).await
    }

    pub async fn get_nickname(&self) -> Result<Nickname, CommandError> {
        self.profile
            .read()
            .await
            .as_ref()
            .map(|p| p.nickname.clone())
            .ok_or(CommandError::NoAccount)
    }

    pub async fn send_message(
        &self,
        nickname: &str,
        text: &str,
        reply: Option<MessageId>,
    ) -> Result<(), CommandError> {
        self.deliver_message(nickname, text, reply).await?;
        Ok(())
    }

    /// Full history with `nickname`, newest first.
    pub async fn get_messages_for_user(&self, nickname: &str) -> Result<Vec<Message>, CommandError> {
        let mut history = self.conversation_history(nickname).await?;
        history.reverse();
        Ok(history)
    }

    pub fn fuzzy_search_command(&self, query: &str) -> Vec<String> {
        fuzzy_search(query, self.config.fuzzy_limit)
    }

    pub async fn run_command(&self, line: &str) -> Result<CommandResponse, CommandError> {
        self.execute(Command::RunCommand {
            line: line.to_string(),
        })
        .await
    }

    pub async fn open_conversation(&self, nickname: &str) -> Result<ConversationSession, CommandError> {
        let me = self.get_nickname().await?;
        let peer = parse_nickname(nickname)?;
        let history = self.conversation_history(peer.as_str()).await?;
        Ok(ConversationSession::new(me, peer, history))
    }

    /// Pushed events for the local account.
    pub async fn subscribe(&self) -> Result<EventStream, CommandError> {
        let credentials = self.credentials().await?;
        self.bounded(self.backend.subscribe(&credentials)).await
    }

    pub(crate) async fn deliver_message(
        &self,
        nickname: &str,
        text: &str,
        reply: Option<MessageId>,
    ) -> Result<Message, CommandError> {
        let credentials = self.credentials().await?;
        let peer = parse_nickname(nickname)?;
        validate_message_text(text).map_err(|e| CommandError::Validation(e.to_string()))?;
        let body = MessageBody {
            text: text.to_string(),
            reply,
        };
        let message = self
            .bounded(self.backend.send_message(&credentials, &peer, &body))
            .await?;
        debug!(peer = %peer, id = message.id.0, "message sent");
        Ok(message)
    }

    /// Chronological history with `nickname`.
    pub(crate) async fn conversation_history(&self, nickname: &str) -> Result<Vec<Message>, CommandError> {
        let credentials = self.credentials().await?;
        let peer = parse_nickname(nickname)?;
        let mut history = self
            .bounded(self.backend.messages(&credentials, &peer))
            .await?;
        history.sort_by_key(|m| m.id);
        Ok(history)
    }

    async fn credentials(&self) -> Result<shared::domain::Credentials, CommandError> {
        self.profile
            .read()
            .await
            .as_ref()
            .map(Profile::credentials)
            .ok_or(CommandError::NoAccount)
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CommandError>>,
    ) -> Result<T, CommandError> {
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CommandError::Timeout(self.config.request_timeout)),
        }
    }
}

fn parse_nickname(raw: &str) -> Result<Nickname, CommandError> {
    Nickname::parse(raw).map_err(|e| CommandError::Validation(e.to_string()))
}

fn random_candidate(rng: &mut impl Rng) -> Result<Nickname, CommandError> {
    let name = FIRST_NAMES.choose(rng).copied().unwrap_or("user");
    let number: u16 = rng.gen_range(1000..=9999);
    parse_nickname(&format!("{name}{number}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_candidates_are_valid_nicknames() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let candidate = random_candidate(&mut rng).expect("candidate");
            let digits: String = candidate
                .as_str()
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect();
            assert_eq!(digits.len(), 4);
            let number: u16 = digits.parse().expect("number");
            assert!((1000..=9999).contains(&number));
        }
    }
}
