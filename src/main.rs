// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]
// Add other lints specific to this module that you want to allow but not auto-fix

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, info, warn};
use std::fs::File;
use std::io::BufReader;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use robaws_intake::app_config::{self, Config, LlmProvider};
use robaws_intake::{AppError, ContactHint, Controller, IntakeStatus, Worker};

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

fn level_filter(level: &app_config::LogLevel) -> LevelFilter {
    match level {
        app_config::LogLevel::Error => LevelFilter::Error,
        app_config::LogLevel::Warn => LevelFilter::Warn,
        app_config::LogLevel::Info => LevelFilter::Info,
        app_config::LogLevel::Debug => LevelFilter::Debug,
        app_config::LogLevel::Trace => LevelFilter::Trace,
    }
}

/// Settings shared by every subcommand
#[derive(Args, Debug)]
struct GlobalArgs {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "conf.json")]
    config: String,

    /// Set logging level
    #[arg(short, long, global = true, value_enum)]
    log_level: Option<CliLogLevel>,

    /// SQLite database path (overrides storage.database_path)
    #[arg(long, global = true, value_name = "PATH")]
    database: Option<PathBuf>,

    /// Robaws base URL
    #[arg(long, global = true, env = "ROBAWS_BASE_URL", hide_env_values = true)]
    robaws_url: Option<String>,

    /// Robaws API user
    #[arg(long, global = true, env = "ROBAWS_USERNAME", hide_env_values = true)]
    robaws_username: Option<String>,

    /// Robaws API password
    #[arg(long, global = true, env = "ROBAWS_PASSWORD", hide_env_values = true)]
    robaws_password: Option<String>,

    /// OpenAI API key
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Anthropic API key
    #[arg(long, global = true, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,

    /// Disable the LLM and extract with patterns only
    #[arg(long, global = true)]
    no_llm: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a file or directory as new intakes without processing
    Ingest {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Run the remaining stages of one intake
    Process {
        #[arg(value_name = "INTAKE_ID")]
        id: String,
    },

    /// Ingest a file or directory and process every new intake
    Run {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Export an extracted intake to Robaws
    Export {
        #[arg(value_name = "INTAKE_ID")]
        id: String,
    },

    /// Reset retry bookkeeping and put an intake back in the queue
    Retry {
        #[arg(value_name = "INTAKE_ID")]
        id: String,
    },

    /// List intakes, newest first
    List {
        /// Only intakes with this status (e.g. needs_contact, export_failed)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of rows
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Show one intake with its files, extraction and quotation
    Show {
        #[arg(value_name = "INTAKE_ID")]
        id: String,
    },

    /// Look up a Robaws client without touching any intake
    Resolve {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },

    /// Process the queue until ctrl-c
    Worker {
        /// Process one batch and exit
        #[arg(long)]
        once: bool,
    },

    /// Print database statistics
    Stats,

    /// Generate shell completions for robaws-intake
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// robaws-intake - freight inquiries to Robaws quotations
///
/// Reads emails, PDFs and photos, extracts shipment details, finds the
/// customer in Robaws and creates the offer with the source documents attached.
#[derive(Parser, Debug)]
#[command(name = "robaws-intake")]
#[command(version)]
#[command(about = "Freight inquiry intake for Robaws")]
#[command(long_about = "robaws-intake turns freight inquiries into Robaws quotations.

EXAMPLES:
    robaws-intake run inbox/                    # Ingest and process a folder of emails
    robaws-intake ingest inquiry.eml            # Store only, process later
    robaws-intake worker                        # Process the queue until ctrl-c
    robaws-intake list --status needs_contact   # Intakes waiting for a client
    robaws-intake retry <ID>                    # Queue a failed intake again
    robaws-intake resolve --email jan@acme.be   # Test client matching
    robaws-intake completions bash > robaws-intake.bash

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config. If the config file doesn't exist, a default one
    will be created automatically. Credentials can also come from ROBAWS_BASE_URL,
    ROBAWS_USERNAME, ROBAWS_PASSWORD, OPENAI_API_KEY and ANTHROPIC_API_KEY.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        // The logger itself accepts everything; set_max_level does the filtering
        let logger = Box::new(CustomLogger::new(LevelFilter::Trace));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: Emoji for log level
    fn get_emoji_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "❌",
            Level::Warn => "🚧",
            Level::Info => "📦",
            Level::Debug => "🔍",
            Level::Trace => "📋",
        }
    }

    // @returns: ANSI colour for log level
    fn get_colour_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let level = record.level();
            let _ = writeln!(
                std::io::stderr(),
                "{}{} {} {}\x1B[0m",
                Self::get_colour_for_level(level),
                now,
                Self::get_emoji_for_level(level),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger once with info level by default
    // We'll update the level after loading the config if needed
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(*shell, &mut cmd, "robaws-intake", &mut std::io::stdout());
        return Ok(());
    }

    if let Some(cmd_log_level) = &cli.global.log_level {
        log::set_max_level(level_filter(&cmd_log_level.clone().into()));
    }

    let config = load_config(&cli.global)?;
    let controller = Arc::new(Controller::with_config(config)?);
    run_command(cli.command, controller).await
}

/// Load or create the configuration, then apply CLI and environment overrides
fn load_config(options: &GlobalArgs) -> Result<Config, AppError> {
    let config_path = &options.config;
    let mut config = if Path::new(config_path).exists() {
        let file = File::open(config_path).context(format!("Failed to open config file: {}", config_path))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).context(format!("Failed to parse config file: {}", config_path))?
    } else {
        // Create default configuration if not exists
        warn!("Config file not found at '{}', creating default config.", config_path);
        let config = Config::default();
        let config_json =
            serde_json::to_string_pretty(&config).context("Failed to serialize default config to JSON")?;
        std::fs::write(config_path, config_json)?;
        config
    };

    apply_overrides(&mut config, options);
    config.validate().context("Configuration validation failed")?;

    // If log level was not set via command line, update it from config now
    if options.log_level.is_none() {
        log::set_max_level(level_filter(&config.log_level));
    }
    Ok(config)
}

fn apply_overrides(config: &mut Config, options: &GlobalArgs) {
    if let Some(log_level) = &options.log_level {
        config.log_level = log_level.clone().into();
    }
    if let Some(database) = &options.database {
        config.storage.database_path = Some(database.clone());
    }
    if let Some(url) = &options.robaws_url {
        config.robaws.base_url = url.clone();
    }
    if let Some(username) = &options.robaws_username {
        config.robaws.username = username.clone();
    }
    if let Some(password) = &options.robaws_password {
        config.robaws.password = password.clone();
    }
    if options.no_llm {
        config.extraction.use_llm = false;
    }

    // Only the active provider's key is taken from the environment
    let api_key = match config.extraction.provider {
        LlmProvider::OpenAI => &options.openai_api_key,
        LlmProvider::Anthropic => &options.anthropic_api_key,
    };
    if let Some(key) = api_key.as_ref().filter(|k| !k.is_empty()) {
        config.extraction.set_api_key(key.clone());
    }
}

async fn run_command(command: Commands, controller: Arc<Controller>) -> Result<()> {
    match command {
        Commands::Ingest { path } => {
            for intake in controller.ingest(&path).await? {
                println!("{}\t{}", intake.id, intake.subject.unwrap_or_default());
            }
        }
        Commands::Process { id } => {
            let status = controller.process_intake(&id).await?;
            println!("{}\t{}", id, status);
        }
        Commands::Run { path } => {
            let summary = controller.run_path(&path).await?;
            for (id, status) in &summary.intakes {
                println!("{}\t{}", id, status);
            }
        }
        Commands::Export { id } => {
            let status = controller.export(&id).await?;
            println!("{}\t{}", id, status);
        }
        Commands::Retry { id } => {
            let status = Worker::new(controller).retry(&id).await?;
            println!("{}\t{}", id, status);
        }
        Commands::List { status, limit } => {
            let status = status.map(|s| s.parse::<IntakeStatus>()).transpose()?;
            let intakes = controller.list(status, limit).await?;
            if intakes.is_empty() {
                info!("No intakes found");
            }
            for intake in intakes {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    intake.id,
                    intake.status,
                    intake.created_at,
                    intake.customer_name.unwrap_or_else(|| "-".to_string()),
                    intake.subject.unwrap_or_default()
                );
            }
        }
        Commands::Show { id } => print_details(&controller, &id).await?,
        Commands::Resolve { name, email, phone } => {
            let hint = ContactHint { company: name.clone(), name, email, phone };
            if hint.is_empty() {
                return Err(anyhow!("Give at least one of --name, --email or --phone"));
            }
            match controller.resolve_hint(&hint).await? {
                Some(r) => println!(
                    "client {} ({})\tcontact {}\tscore {:.2}\t{}",
                    r.client_id,
                    r.client_name,
                    r.contact_id.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
                    r.score,
                    r.reason
                ),
                None => println!("no match"),
            }
        }
        Commands::Worker { once } => {
            let worker = Worker::new(controller);
            if once {
                let report = worker.run_once().await?;
                for (id, status) in &report.processed {
                    println!("{}\t{}", id, status);
                }
                if report.errors > 0 {
                    warn!("{} intake(s) failed with errors", report.errors);
                }
            } else {
                worker.run().await?;
            }
        }
        Commands::Stats => {
            println!("{}", controller.stats().await?);
        }
        Commands::Completions { .. } => {}
    }
    Ok(())
}

async fn print_details(controller: &Controller, id: &str) -> Result<()> {
    let details = controller.show(id).await?;
    let intake = &details.intake;
    println!("Intake     {}", intake.id);
    println!("Status     {} (attempts {})", intake.status, intake.attempts);
    println!("Source     {}", intake.source);
    println!("Subject    {}", intake.subject.as_deref().unwrap_or("-"));
    println!(
        "Sender     {} <{}>",
        intake.sender_name.as_deref().unwrap_or("-"),
        intake.sender_email.as_deref().unwrap_or("-")
    );
    println!("Customer   {}", intake.customer_name.as_deref().unwrap_or("-"));
    if let Some(client) = intake.robaws_client_id {
        println!("Client     {} (contact {:?})", client, intake.robaws_contact_id);
    }
    if let Some(error) = &intake.last_error {
        println!("Last error {}", error);
    }
    if let Some(next) = &intake.next_attempt_at {
        println!("Next try   {}", next);
    }

    println!("\nFiles:");
    for file in &details.files {
        let indent = if file.parent_file_id.is_some() { "    " } else { "  " };
        println!("{}{} [{}] {} bytes {}", indent, file.filename, file.kind, file.size_bytes, &file.sha256[..12.min(file.sha256.len())]);
    }

    if let Some(extraction) = &details.extraction {
        println!(
            "\nExtraction ({}, confidence {:.2}):",
            extraction.method, extraction.confidence
        );
        let data: serde_json::Value =
            serde_json::from_str(&extraction.data).context("Stored extraction is unreadable")?;
        println!("{}", serde_json::to_string_pretty(&data)?);
    }

    if let Some(quotation) = &details.quotation {
        println!(
            "\nRobaws offer {} ({}): {}",
            quotation.robaws_offer_id, quotation.status, quotation.title
        );
    }
    Ok(())
}
