//! JSON-lines bridge between a presentation process and the command surface.
//!
//! Each input line is one request, `{"id": .., "command": "..", "args": {..}}`.
//! Each reply is one line, `{"id": .., "ok": true, "value": ..}` or
//! `{"id": .., "ok": false, "error": {"category": .., "kind": .., "message": ..}}`.
//! Pushed events are written as `{"event": {..}}` lines in between.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use client_core::{CheckTicket, CommandError, CommandSurface, ErrorReply, NicknameChecker};
use serde::Serialize;
use serde_json::{json, Value};
use shared::protocol::Command;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinSet,
};
use tracing::{debug, info, warn};

/// Bridge-only request that drives the debounced nickname check.
const CHECK_NICKNAME: &str = "check_nickname";

#[derive(Debug, Serialize)]
struct Reply {
    id: Value,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReply>,
}

impl Reply {
    fn ok(id: Value, value: Value) -> Self {
        Self {
            id,
            ok: true,
            value: Some(value),
            error: None,
        }
    }

    fn err(id: Value, error: &CommandError) -> Self {
        Self {
            id,
            ok: false,
            value: None,
            error: Some(error.reply()),
        }
    }
}

/// A parsed line, ready to run.
enum Request {
    Done(Reply),
    CheckNickname { id: Value, ticket: CheckTicket },
    Command { id: Value, command: Command },
}

pub struct Bridge {
    surface: Arc<CommandSurface>,
    checker: NicknameChecker,
    events_started: AtomicBool,
    out: mpsc::UnboundedSender<String>,
}

impl Bridge {
    /// Returns the bridge and the queue of lines it wants written out.
    pub fn new(
        surface: Arc<CommandSurface>,
        debounce: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (out, outgoing) = mpsc::unbounded_channel();
        let checker = surface.nickname_checker(debounce);
        let bridge = Arc::new(Self {
            surface,
            checker,
            events_started: AtomicBool::new(false),
            out,
        });
        (bridge, outgoing)
    }

    /// Starts forwarding pushed events once there is an account to
    /// subscribe with. Later calls are no-ops.
    pub async fn start_events(&self) {
        if !self.surface.have_account().await || self.events_started.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.surface.subscribe().await {
            Ok(mut events) => {
                let out = self.out.clone();
                tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        if out.send(json!({ "event": event }).to_string()).is_err() {
                            break;
                        }
                    }
                    debug!("event forwarding finished");
                });
                info!("forwarding pushed events");
            }
            Err(error) => {
                self.events_started.store(false, Ordering::SeqCst);
                warn!(%error, "could not subscribe to pushed events");
            }
        }
    }

    /// Handles one request line. Blank lines produce no reply.
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        let request = self.prepare(line)?;
        Some(self.complete(request).await)
    }

    /// Parses a line and starts any nickname check it carries, so checks are
    /// sequenced in the order lines arrive rather than the order their tasks
    /// get scheduled.
    fn prepare(&self, line: &str) -> Option<Request> {
        if line.trim().is_empty() {
            return None;
        }
        let mut request: Value = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(error) => {
                return Some(Request::Done(Reply::err(
                    Value::Null,
                    &CommandError::Validation(format!("malformed request: {error}")),
                )))
            }
        };
        let id = request
            .as_object_mut()
            .and_then(|fields| fields.remove("id"))
            .unwrap_or(Value::Null);

        if request.get("command").and_then(Value::as_str) == Some(CHECK_NICKNAME) {
            let Some(raw) = request
                .get("args")
                .and_then(|args| args.get("nickname"))
                .and_then(Value::as_str)
            else {
                return Some(Request::Done(Reply::err(
                    id,
                    &CommandError::Validation("usage: check_nickname {\"nickname\": ..}".into()),
                )));
            };
            let ticket = self.checker.begin(raw);
            return Some(Request::CheckNickname { id, ticket });
        }

        Some(match serde_json::from_value(request) {
            Ok(command) => Request::Command { id, command },
            Err(error) => Request::Done(Reply::err(
                id,
                &CommandError::Validation(format!("unknown command or bad arguments: {error}")),
            )),
        })
    }

    async fn complete(&self, request: Request) -> Value {
        let reply = match request {
            Request::Done(reply) => reply,
            Request::CheckNickname { id, ticket } => self.check_nickname(id, ticket).await,
            Request::Command { id, command } => self.execute(id, command).await,
        };
        serde_json::to_value(&reply).unwrap_or_else(|error| {
            json!({ "id": Value::Null, "ok": false, "error": { "category": "internal", "kind": "storage", "message": error.to_string() } })
        })
    }

    async fn execute(&self, id: Value, command: Command) -> Reply {
        let registering = matches!(command, Command::Registration { .. });

        match self.surface.execute(command).await {
            Ok(response) => {
                if registering {
                    self.start_events().await;
                }
                match serde_json::to_value(response) {
                    Ok(value) => Reply::ok(id, value),
                    Err(error) => Reply::err(id, &CommandError::Storage(error.to_string())),
                }
            }
            Err(error) => Reply::err(id, &error),
        }
    }

    /// Replies with the published status, or `null` when a newer check
    /// superseded this one.
    async fn check_nickname(&self, id: Value, ticket: CheckTicket) -> Reply {
        match self.checker.finish(ticket).await {
            Some(status) => match serde_json::to_value(status) {
                Ok(value) => Reply::ok(id, value),
                Err(error) => Reply::err(id, &CommandError::Storage(error.to_string())),
            },
            None => Reply::ok(id, Value::Null),
        }
    }

    /// Serves requests from `reader` until it closes. Requests run
    /// concurrently; replies and events are written as they complete.
    pub async fn run<R, W>(
        self: Arc<Self>,
        reader: R,
        mut writer: W,
        mut outgoing: mpsc::UnboundedReceiver<String>,
    ) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("failed to read request line")? else {
                        break;
                    };
                    if let Some(request) = self.prepare(&line) {
                        let bridge = self.clone();
                        in_flight.spawn(async move {
                            let reply = bridge.complete(request).await;
                            let _ = bridge.out.send(reply.to_string());
                        });
                    }
                }
                Some(line) = outgoing.recv() => write_line(&mut writer, &line).await?,
                Some(_) = in_flight.join_next() => {}
            }
        }

        while in_flight.join_next().await.is_some() {}
        while let Ok(line) = outgoing.try_recv() {
            write_line(&mut writer, &line).await?;
        }
        debug!("input closed; bridge stopped");
        Ok(())
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> anyhow::Result<()> {
    writer
        .write_all(line.as_bytes())
        .await
        .context("failed to write reply")?;
    writer.write_all(b"\n").await.context("failed to write reply")?;
    writer.flush().await.context("failed to flush reply")?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/bridge_tests.rs"]
mod tests;
