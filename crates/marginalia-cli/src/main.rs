//! marginalia: summarize note attachments and chat about a note from the
//! command line.
//!
//! Configuration comes from the environment (and a `.env` file if present):
//! `GEMINI_API_KEY` is required; `BRAVE_SEARCH_API_KEY` enables web search.

mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use marginalia_core::ConfirmationMode;
use tracing::info;

#[derive(Parser)]
#[command(name = "marginalia")]
#[command(author, version, about = "AI summaries and chat for notes and their attachments")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize PDF and image attachments
    Summarize {
        /// Files to summarize (pdf, png, jpg, gif, webp, bmp)
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Print the final statuses as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask for help with a note, optionally using its attachments
    Chat {
        /// HTML file holding the note content
        #[arg(short, long)]
        note: PathBuf,

        /// What to ask or change
        #[arg(short, long)]
        message: String,

        /// Attachment files (can specify multiple)
        #[arg(short, long = "attach")]
        attachments: Vec<PathBuf>,

        /// Text the user has selected in the note
        #[arg(short, long)]
        selected: Option<String>,

        /// When edits need confirmation: always, never, or think
        #[arg(long, default_value = "think")]
        mode: ConfirmationMode,

        /// Let the model search the web before answering
        #[arg(long)]
        web_search: bool,

        /// Write the updated note HTML here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let settings = logging::LogSettings::from_env();
    let _file_guard = logging::init(&settings);
    info!(
        log_format = settings.format_name(),
        log_file = settings.file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );

    match cli.command {
        Commands::Summarize { files, json } => commands::summarize(&files, json).await,
        Commands::Chat {
            note,
            message,
            attachments,
            selected,
            mode,
            web_search,
            output,
            json,
        } => {
            commands::chat(commands::ChatArgs {
                note,
                message,
                attachments,
                selected,
                mode,
                web_search,
                output,
                json,
            })
            .await
        }
    }
}
