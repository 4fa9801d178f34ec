//! Vim-like command lines (`send_crypto bob`, `:get_all_users`) and fuzzy
//! lookup of command ids.

use ngrammatic::{CorpusBuilder, Pad};
use shared::protocol::Command;
use tracing::trace;

use crate::error::CommandError;

pub const DEFAULT_FUZZY_LIMIT: usize = 10;

const SIMILARITY_THRESHOLD: f32 = 0.1;

/// Parses one command line into a typed command.
///
/// The first word is the command id; arguments follow separated by
/// whitespace. `open`, `send_message` and `fuzzy_search_command` take the rest
/// of the line as their last argument. Unknown ids are rejected with the
/// closest known ids as suggestions.
pub fn parse_command_line(line: &str, fuzzy_limit: usize) -> Result<Command, CommandError> {
    let line = line.trim();
    let line = line.strip_prefix(':').unwrap_or(line).trim_start();
    let (id, rest) = split_word(line);
    if id.is_empty() {
        return Err(CommandError::Validation("empty command line".into()));
    }

    let command = match id {
        "open" => Command::Open {
            path: required_rest(id, rest, "path")?,
        },
        "have_account" => no_args(id, rest, Command::HaveAccount)?,
        "get_random_nickname" => no_args(id, rest, Command::GetRandomNickname)?,
        "get_version_app" => no_args(id, rest, Command::GetVersionApp)?,
        "get_cryptos_for_accept" => no_args(id, rest, Command::GetCryptosForAccept)?,
        "get_order_adding_crypto" => no_args(id, rest, Command::GetOrderAddingCrypto)?,
        "get_outgoing_cryptos" => no_args(id, rest, Command::GetOutgoingCryptos)?,
        "get_all_users" => no_args(id, rest, Command::GetAllUsers)?,
        "get_nickname" => no_args(id, rest, Command::GetNickname)?,
        "nickname_is_taken" => Command::NicknameIsTaken {
            nickname: single_arg(id, rest)?,
        },
        "registration" => Command::Registration {
            nickname: single_arg(id, rest)?,
        },
        "send_crypto" => Command::SendCrypto {
            nickname: single_arg(id, rest)?,
        },
        "add_crypto" => Command::AddCrypto {
            nickname: single_arg(id, rest)?,
        },
        "delete_crypto" => Command::DeleteCrypto {
            nickname: single_arg(id, rest)?,
        },
        "get_messages_for_user" => Command::GetMessagesForUser {
            nickname: single_arg(id, rest)?,
        },
        "send_message" => {
            let (nickname, text) = split_word(rest);
            if nickname.is_empty() {
                return Err(CommandError::Validation(
                    "usage: send_message <nickname> <text>".into(),
                ));
            }
            Command::SendMessage {
                nickname: nickname.to_string(),
                text: text.to_string(),
                reply: None,
            }
        }
        "fuzzy_search_command" => Command::FuzzySearchCommand {
            query: required_rest(id, rest, "query")?,
        },
        "run_command" => {
            return Err(CommandError::Validation(
                "run_command cannot be nested".into(),
            ))
        }
        unknown => {
            let suggestions = fuzzy_search(unknown, fuzzy_limit);
            let message = if suggestions.is_empty() {
                format!("unknown command '{unknown}'")
            } else {
                format!(
                    "unknown command '{unknown}'; did you mean: {}",
                    suggestions.join(", ")
                )
            };
            return Err(CommandError::Validation(message));
        }
    };
    Ok(command)
}

/// Known command ids ranked by n-gram similarity to the first word of
/// `query`, best first.
pub fn fuzzy_search(query: &str, limit: usize) -> Vec<String> {
    let Some(id) = query.split_whitespace().next() else {
        return Vec::new();
    };

    let mut corpus = CorpusBuilder::new().pad_full(Pad::Auto).finish();
    Command::IDS.iter().for_each(|candidate| corpus.add_text(candidate));

    let mut results = corpus.search(&id.to_ascii_lowercase(), SIMILARITY_THRESHOLD);
    // Ties come back in no fixed order; break them by name.
    results.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.text.cmp(&b.text))
    });
    trace!(query = id, ?results, "fuzzy command search");

    results
        .into_iter()
        .take(limit)
        .map(|result| result.text)
        .collect()
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(idx) => (&input[..idx], input[idx..].trim_start()),
        None => (input, ""),
    }
}

fn no_args(id: &str, rest: &str, command: Command) -> Result<Command, CommandError> {
    if rest.trim().is_empty() {
        Ok(command)
    } else {
        Err(CommandError::Validation(format!("{id} takes no arguments")))
    }
}

fn single_arg(id: &str, rest: &str) -> Result<String, CommandError> {
    let mut words = rest.split_whitespace();
    match (words.next(), words.next()) {
        (Some(arg), None) => Ok(arg.to_string()),
        _ => Err(CommandError::Validation(format!("usage: {id} <nickname>"))),
    }
}

fn required_rest(id: &str, rest: &str, name: &str) -> Result<String, CommandError> {
    let rest = rest.trim();
    if rest.is_empty() {
        Err(CommandError::Validation(format!("usage: {id} <{name}>")))
    } else {
        Ok(rest.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nickname_commands() {
        assert_eq!(
            parse_command_line("send_crypto bob", DEFAULT_FUZZY_LIMIT).expect("parse"),
            Command::SendCrypto {
                nickname: "bob".into()
            }
        );
        assert_eq!(
            parse_command_line(":add_crypto  carol ", DEFAULT_FUZZY_LIMIT).expect("parse"),
            Command::AddCrypto {
                nickname: "carol".into()
            }
        );
    }

    #[test]
    fn send_message_keeps_the_rest_of_the_line() {
        assert_eq!(
            parse_command_line("send_message bob hello  there", DEFAULT_FUZZY_LIMIT)
                .expect("parse"),
            Command::SendMessage {
                nickname: "bob".into(),
                text: "hello  there".into(),
                reply: None,
            }
        );
    }

    #[test]
    fn argument_count_is_checked() {
        assert!(parse_command_line("get_all_users now", DEFAULT_FUZZY_LIMIT).is_err());
        assert!(parse_command_line("send_crypto", DEFAULT_FUZZY_LIMIT).is_err());
        assert!(parse_command_line("send_crypto a b", DEFAULT_FUZZY_LIMIT).is_err());
        assert!(parse_command_line("   ", DEFAULT_FUZZY_LIMIT).is_err());
        assert!(parse_command_line("run_command get_all_users", DEFAULT_FUZZY_LIMIT).is_err());
    }

    #[test]
    fn unknown_command_suggests_close_ids() {
        let err = parse_command_line("sned_crypto bob", DEFAULT_FUZZY_LIMIT).expect_err("unknown");
        match err {
            CommandError::Validation(message) => {
                assert!(message.contains("did you mean: send_crypto"), "{message}")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn fuzzy_search_ranks_exact_id_first_and_respects_limit() {
        let results = fuzzy_search("add_crypto bob", 3);
        assert_eq!(results.first().map(String::as_str), Some("add_crypto"));
        assert!(results.len() <= 3);
        assert_eq!(fuzzy_search("add_crypto", 1).len(), 1);
    }

    #[test]
    fn fuzzy_search_without_match_is_empty() {
        assert!(fuzzy_search("", 10).is_empty());
        assert!(fuzzy_search("1", 10).is_empty());
    }
}
