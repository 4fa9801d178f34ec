use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use server_api::ApiContext;
use shared::domain::Nickname;
use storage::Storage;

/// Operator tooling that works directly on the server database.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/server.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Registers an account and prints its auth key.
    CreateUser { nickname: String },
    ListUsers,
    Friends { nickname: String },
    /// Prints the conversation between two accounts, oldest first.
    Conversation { a: String, b: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateUser { nickname } => {
            let ctx = ApiContext { storage };
            let credentials = server_api::register(&ctx, &parse(&nickname)?).await?;
            println!(
                "created {} auth_key={}",
                credentials.nickname, credentials.auth_key
            );
        }
        Command::ListUsers => {
            for user in storage.list_users().await? {
                println!(
                    "{}\t{}\t{}",
                    user.user_id.0,
                    user.nickname,
                    user.created_at.to_rfc3339()
                );
            }
        }
        Command::Friends { nickname } => {
            let user = lookup(&storage, &nickname).await?;
            for friend in storage.list_friends(user.user_id).await? {
                println!("{friend}");
            }
        }
        Command::Conversation { a, b } => {
            let a = lookup(&storage, &a).await?;
            let b = lookup(&storage, &b).await?;
            for message in storage.list_conversation(a.user_id, b.user_id).await? {
                let reply = message
                    .body
                    .reply
                    .map(|id| format!(" (reply to {})", id.0))
                    .unwrap_or_default();
                println!(
                    "#{} {} {}{reply}: {}",
                    message.id.0,
                    message.sent_at.to_rfc3339(),
                    message.sender,
                    message.body.text
                );
            }
        }
    }

    Ok(())
}

fn parse(raw: &str) -> Result<Nickname> {
    Nickname::parse(raw).with_context(|| format!("invalid nickname '{raw}'"))
}

async fn lookup(storage: &Storage, raw: &str) -> Result<storage::StoredUser> {
    let nickname = parse(raw)?;
    match storage.find_user(&nickname).await? {
        Some(user) => Ok(user),
        None => bail!("user '{nickname}' not found"),
    }
}
