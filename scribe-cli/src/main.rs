//! Terminal host for a document sync session.
//!
//! Prints every authoritative change to the bound document and turns
//! stdin lines into edits. Lines starting with `:` are commands:
//!
//! ```text
//! :undo  :redo  :save  :list  :status  :quit
//! :rename <title>   :open <document id>
//! :image <url>      :unimage <image id>
//! ```
//!
//! Anything else is appended to the document as a new line.

use std::error::Error;

use clap::{Parser, Subcommand};
use scribe_sync::{ClientConfig, DocumentApi, DocumentId, Image, Permission, Session, SyncStore};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "scribe")]
#[command(about = "Real-time document sync client")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// WebSocket base URL (overrides SCRIBE_WS_URL)
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// REST API base URL (overrides SCRIBE_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Edit your own documents
    Owner {
        /// Auth credential
        #[arg(long)]
        token: String,
    },

    /// Join a shared document
    Guest {
        /// Share token from a share link
        shared_id: String,
    },

    /// Issue a share token for one of your documents
    Share {
        #[arg(long)]
        token: String,

        #[arg(long)]
        document: String,

        /// Grant write access as well as read
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    if let Some(url) = cli.ws_url {
        config.connection.base_url = url;
    }
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }
    log::debug!(
        "Using WebSocket base {} and API base {}",
        config.connection.base_url,
        config.api_base_url
    );

    let session = match cli.command {
        Command::Share {
            token,
            document,
            write,
        } => return share(&config, &token, DocumentId::new(document), write).await,
        Command::Owner { token } => {
            let session = Session::new(config)?;
            match session.start_owner(&token).await? {
                Some(id) => println!("Editing document {id}"),
                None => {
                    println!("No documents available");
                    return Ok(());
                }
            }
            session
        }
        Command::Guest { shared_id } => {
            let session = Session::new(config)?;
            let access = session.join_as_guest(&shared_id).await?;
            let mode = if access.can_edit { "read-write" } else { "read-only" };
            println!("Joined document {} ({mode})", access.document_id);
            session
        }
    };

    let printer = tokio::spawn(print_changes(session.store().clone()));
    let result = run_commands(&session).await;
    printer.abort();
    session.end();
    result
}

async fn share(
    config: &ClientConfig,
    token: &str,
    document: DocumentId,
    write: bool,
) -> Result<(), Box<dyn Error>> {
    let api = DocumentApi::new(&config.api_base_url)?;
    let mut permissions = vec![Permission::Read];
    if write {
        permissions.push(Permission::Write);
    }
    let access_token = api.issue_share_token(token, &document, &permissions).await?;
    println!("{access_token}");
    Ok(())
}

async fn print_changes(store: SyncStore) {
    let mut changes = store.changes();
    let mut last = None;
    while changes.changed().await.is_ok() {
        let Some(doc) = store.current() else {
            continue;
        };
        let view = (doc.version, doc.title.clone(), doc.content.clone());
        if last.as_ref() == Some(&view) {
            continue;
        }
        println!("── v{} {} {}", doc.version, doc.title, if doc.saved { "" } else { "*" });
        println!("{}", doc.content);
        last = Some(view);
    }
}

async fn run_commands(session: &Session) -> Result<(), Box<dyn Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let (command, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        let applied = match command {
            ":quit" => break,
            ":undo" => session.undo()?,
            ":redo" => session.redo()?,
            ":save" => session.mark_saved(true)?,
            ":rename" => session.rename(arg)?,
            ":open" => session.select_document(&DocumentId::new(arg))?,
            ":image" => session.add_image(Image::new(arg, ""))?,
            ":unimage" => session.remove_image(arg)?,
            ":list" => {
                let bound = session.store().bound_id();
                for doc in session.store().documents() {
                    let marker = if Some(&doc.id) == bound.as_ref() { ">" } else { " " };
                    println!("{marker} {} {} (v{}, {})", doc.id, doc.title, doc.version, doc.last_update);
                }
                continue;
            }
            ":status" => {
                let state = session.connection().state();
                println!("{:?} attempt={} can_edit={}", state.status, state.reconnect_attempt, session.can_edit());
                continue;
            }
            _ => {
                let mut content = session
                    .store()
                    .current()
                    .map(|doc| doc.content)
                    .unwrap_or_default();
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(&line);
                session.update_content(content)?
            }
        };
        if !applied {
            eprintln!("(ignored)");
        }
    }
    Ok(())
}
