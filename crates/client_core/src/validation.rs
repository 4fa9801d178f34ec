use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::Serialize;
use shared::domain::Nickname;
use tokio::sync::watch;
use tracing::debug;

use crate::{backend::ChatBackend, error::CommandError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum NicknameStatus {
    Empty,
    Invalid(String),
    Checking,
    IsTaken,
    IsFree,
    Unavailable(String),
}

impl NicknameStatus {
    /// Registration may only be submitted for a nickname confirmed free.
    pub fn can_submit(&self) -> bool {
        matches!(self, NicknameStatus::IsFree)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedStatus {
    pub seq: u64,
    pub status: NicknameStatus,
}

/// A started check; see [`NicknameChecker::begin`].
#[derive(Debug)]
pub struct CheckTicket {
    seq: u64,
    step: Step,
}

#[derive(Debug)]
enum Step {
    Settled(Option<NicknameStatus>),
    Lookup(Nickname),
}

impl CheckTicket {
    fn settled(seq: u64, status: Option<NicknameStatus>) -> Self {
        Self {
            seq,
            step: Step::Settled(status),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

struct Inner {
    backend: Arc<dyn ChatBackend>,
    debounce: Duration,
    request_timeout: Duration,
    latest: AtomicU64,
    status: watch::Sender<CheckedStatus>,
}

/// Live availability check for the registration form.
///
/// Every input gets a sequence number. After the debounce interval a check
/// that has been superseded skips the backend, and a response that arrives
/// after a newer input started is dropped, so the published status always
/// belongs to the latest input.
#[derive(Clone)]
pub struct NicknameChecker {
    inner: Arc<Inner>,
}

impl NicknameChecker {
    pub fn new(backend: Arc<dyn ChatBackend>, debounce: Duration, request_timeout: Duration) -> Self {
        let (status, _) = watch::channel(CheckedStatus {
            seq: 0,
            status: NicknameStatus::Empty,
        });
        Self {
            inner: Arc::new(Inner {
                backend,
                debounce,
                request_timeout,
                latest: AtomicU64::new(0),
                status,
            }),
        }
    }

    pub fn status(&self) -> NicknameStatus {
        self.inner.status.borrow().status.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CheckedStatus> {
        self.inner.status.subscribe()
    }

    /// Validates `raw` and returns the status it published, or `None` when a
    /// newer input superseded it.
    pub async fn check(&self, raw: &str) -> Option<NicknameStatus> {
        let ticket = self.begin(raw);
        self.finish(ticket).await
    }

    /// Takes the next sequence number for `raw` and publishes what can be
    /// decided locally. Inputs are ordered by the order of their `begin`
    /// calls, so callers that finish checks concurrently must begin them in
    /// arrival order.
    pub fn begin(&self, raw: &str) -> CheckTicket {
        let seq = self.inner.latest.fetch_add(1, Ordering::SeqCst) + 1;

        if raw.trim().is_empty() {
            return CheckTicket::settled(seq, self.publish(seq, NicknameStatus::Empty));
        }
        match Nickname::parse(raw) {
            Ok(nickname) => match self.publish(seq, NicknameStatus::Checking) {
                Some(_) => CheckTicket {
                    seq,
                    step: Step::Lookup(nickname),
                },
                None => CheckTicket::settled(seq, None),
            },
            Err(err) => {
                CheckTicket::settled(seq, self.publish(seq, NicknameStatus::Invalid(err.to_string())))
            }
        }
    }

    /// Debounces and asks the backend for a ticket that still needs it.
    pub async fn finish(&self, ticket: CheckTicket) -> Option<NicknameStatus> {
        let inner = &self.inner;
        let CheckTicket { seq, step } = ticket;
        let nickname = match step {
            Step::Settled(status) => return status,
            Step::Lookup(nickname) => nickname,
        };

        tokio::time::sleep(inner.debounce).await;
        if inner.latest.load(Ordering::SeqCst) != seq {
            debug!(seq, "nickname check superseded before request");
            return None;
        }

        let answer = tokio::time::timeout(
            inner.request_timeout,
            inner.backend.nickname_is_taken(&nickname),
        )
        .await
        .unwrap_or(Err(CommandError::Timeout(inner.request_timeout)));
        let status = match answer {
            Ok(true) => NicknameStatus::IsTaken,
            Ok(false) => NicknameStatus::IsFree,
            Err(err) => NicknameStatus::Unavailable(err.to_string()),
        };
        self.publish(seq, status)
    }

    fn publish(&self, seq: u64, status: NicknameStatus) -> Option<NicknameStatus> {
        let inner = &self.inner;
        let mut published = None;
        inner.status.send_if_modified(|current| {
            if inner.latest.load(Ordering::SeqCst) != seq {
                return false;
            }
            *current = CheckedStatus {
                seq,
                status: status.clone(),
            };
            published = Some(status.clone());
            true
        });
        if published.is_none() {
            debug!(seq, "discarding stale nickname status");
        }
        published
    }
}
