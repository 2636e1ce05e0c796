//! QBank CLI - sign in and work with the question bank from a terminal.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use commands::Context;
use qbank_config::{init_logging, Config, Paths};
use tracing::debug;

/// QBank CLI - Sign in and browse the interview question bank.
#[derive(Parser)]
#[command(name = "qbank")]
#[command(about = "QBank CLI for authentication and question management")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with email and password
    Login,

    /// Request an account; a temporary password is emailed
    Signup {
        /// Email address
        email: String,
    },

    /// Logout and clear session
    Logout,

    /// Check authentication status
    Status,

    /// Browse and manage questions
    Questions {
        #[command(subcommand)]
        command: QuestionCommands,
    },

    /// Submit an answer for evaluation
    Answer {
        /// Question ID
        question_id: String,
        /// Your answer
        answer: String,
        /// Competency being assessed (e.g. technical, behavioral)
        #[arg(short, long)]
        competency: Option<String>,
    },
}

#[derive(Subcommand)]
enum QuestionCommands {
    /// List questions
    List,
    /// Show question details
    Show {
        /// Question ID
        id: String,
    },
    /// Create a question (admin only)
    Create {
        #[command(flatten)]
        fields: commands::QuestionFields,
    },
    /// Update fields of a question (admin only)
    Update {
        /// Question ID
        id: String,
        #[command(flatten)]
        fields: commands::QuestionFields,
    },
    /// Delete a question (admin only)
    Delete {
        /// Question ID
        id: String,
    },
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level, Some(paths.log_file().as_path()));
    debug!(base_dir = %paths.base_dir().display(), "Configuration loaded");

    let ctx = Context::load(&paths, &config).await?;
    let format = &cli.format;

    let result = match cli.command {
        Commands::Login => commands::login(&ctx, format).await,
        Commands::Signup { email } => commands::signup(&ctx, &email, format).await,
        Commands::Logout => commands::logout(&ctx, format).await,
        Commands::Status => commands::status(&ctx, format).await,
        Commands::Questions { command } => match command {
            QuestionCommands::List => commands::questions_list(&ctx, format).await,
            QuestionCommands::Show { id } => commands::questions_show(&ctx, &id, format).await,
            QuestionCommands::Create { fields } => {
                commands::questions_create(&ctx, fields, format).await
            }
            QuestionCommands::Update { id, fields } => {
                commands::questions_update(&ctx, &id, fields, format).await
            }
            QuestionCommands::Delete { id } => commands::questions_delete(&ctx, &id, format).await,
        },
        Commands::Answer {
            question_id,
            answer,
            competency,
        } => commands::answer(&ctx, &question_id, &answer, competency.as_deref(), format).await,
    };

    ctx.auth.shutdown();
    result
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.format;

    if let Err(e) = run(cli).await {
        output::print_error(&e.to_string(), &format);
        std::process::exit(1);
    }
}
