//! linkedin-mcp - command-line client for the LinkedIn MCP tools
//!
//! Connects to a tool server (spawned over stdio or reached over HTTP), runs
//! one tool and prints its payload as JSON on stdout. Logs go to stderr.

use std::fs::File;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

use linkedin_mcp_client::credentials::CredentialProvider;
use linkedin_mcp_client::{
    FileCredentialProvider, HttpConfig, JobSearch, KeywordSearch, LinkedInClient, ProcessConfig,
    TransportConfig,
};

/// Command-line client for the LinkedIn MCP tools.
#[derive(Parser, Debug)]
#[command(name = "linkedin-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// How to reach the tool server.
    #[arg(long, value_enum, default_value = "stdio", env = "LINKEDIN_MCP_TRANSPORT")]
    transport: TransportArg,

    /// MCP endpoint for the HTTP transport.
    #[arg(long, default_value = linkedin_mcp_client::transport::http::DEFAULT_HTTP_URL, env = "LINKEDIN_MCP_URL")]
    url: String,

    /// Per-request timeout in seconds (HTTP transport).
    #[arg(long, default_value_t = 30, env = "LINKEDIN_MCP_TIMEOUT")]
    timeout: u64,

    /// Server command for the stdio transport (default: uvx linkedin-mcp-server).
    #[arg(long, env = "LINKEDIN_MCP_COMMAND")]
    server_command: Option<String>,

    /// Argument passed to the server command. Repeatable.
    #[arg(long = "server-arg", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Seconds the server gets to exit before it is killed.
    #[arg(long, default_value_t = 5)]
    shutdown_grace: u64,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Log output file (default: stderr).
    #[arg(long)]
    log_file: Option<String>,

    /// Log line format.
    #[arg(long, value_enum, default_value = "text", env = "LINKEDIN_MCP_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TransportArg {
    Stdio,
    Http,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the tools offered by the server.
    ListTools,
    /// Check that the server answers.
    Ping,
    /// Fetch a member profile.
    Person {
        /// Profile URL or username.
        url: String,
    },
    /// Fetch a company page.
    Company {
        /// Company URL or slug.
        url: String,
    },
    /// Fetch recent company posts.
    Posts {
        /// Company URL or slug.
        url: String,
        /// Maximum number of posts.
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Search jobs, one keyword at a time.
    Search {
        /// Keywords to search. Each one is a separate search.
        #[arg(long, required = true, num_args = 1..)]
        keywords: Vec<String>,
        /// Location filter.
        #[arg(long)]
        location: Option<String>,
        /// Maximum results per keyword.
        #[arg(long)]
        limit: Option<u32>,
        /// Posting age window, sent only if the server supports it.
        #[arg(long)]
        time_posted: Option<String>,
    },
    /// Fetch one job posting.
    Job {
        /// Job URL or numeric id.
        job: String,
    },
    /// Close the server's browser session.
    Close,
    /// Store a `li_at` cookie for the worker to pick up.
    RegisterSession {
        /// Value of the `li_at` cookie.
        li_at: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("failed to set up logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Log to stderr (stdout carries command output)
    let (stderr_layer, file_layer) = match &args.log_file {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("cannot open log file {path}"))?;
            (None, Some(log_layer(args.log_format, Arc::new(file), false)))
        }
        None => (Some(log_layer(args.log_format, std::io::stderr, true)), None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn log_layer<S, W>(format: LogFormat, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let cookies = FileCredentialProvider::default();

    if let Command::RegisterSession { li_at } = &args.command {
        cookies.register_cookie(li_at).await?;
        print_json(&json!({
            "success": true,
            "path": cookies.cookie_path().display().to_string(),
        }))?;
        return Ok(());
    }

    let client = LinkedInClient::from_config(transport_config(&args, &cookies).await)?;
    client
        .connect()
        .await
        .context("failed to connect to the MCP server")?;

    let outcome = execute(&client, args.command).await;

    if let Err(e) = client.disconnect().await {
        tracing::warn!("disconnect failed: {}", e);
    }
    outcome
}

async fn transport_config(args: &Args, cookies: &FileCredentialProvider) -> TransportConfig {
    match args.transport {
        TransportArg::Http => TransportConfig::Http(
            HttpConfig::new(&args.url).with_timeout(Duration::from_secs(args.timeout)),
        ),
        TransportArg::Stdio => {
            let mut config = match &args.server_command {
                Some(command) => ProcessConfig::new(command, &args.server_args),
                None => ProcessConfig::default(),
            };
            config = config.with_shutdown_grace(Duration::from_secs(args.shutdown_grace));

            match cookies.ephemeral_cookie().await {
                Ok(Some(cookie)) => {
                    tracing::debug!("passing registered session cookie to server");
                    config = config.with_cookie(&cookie);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("could not read session cookie: {}", e),
            }
            TransportConfig::Stdio(config)
        }
    }
}

async fn execute(client: &LinkedInClient, command: Command) -> anyhow::Result<()> {
    let payload = match command {
        Command::ListTools => {
            let tools = client.list_tools().await?;
            serde_json::to_value(tools)?
        }
        Command::Ping => {
            client.ping().await?;
            let server = client.session().server_info().await;
            json!({"ok": true, "server": server.map(|s| s.server_info)})
        }
        Command::Person { url } => client.get_person_profile(&url).await?,
        Command::Company { url } => client.get_company_profile(&url).await?,
        Command::Posts { url, limit } => client.get_company_posts(&url, limit).await?,
        Command::Search {
            keywords,
            location,
            limit,
            time_posted,
        } => {
            let template = JobSearch {
                keywords: String::new(),
                location,
                limit,
                time_posted,
            };
            search_report(client.search_jobs_batch(keywords, &template).await)
        }
        Command::Job { job } => client.get_job_details(&job).await?,
        Command::Close => client.close_session().await?,
        Command::RegisterSession { .. } => {
            anyhow::bail!("register-session does not talk to the server")
        }
    };

    print_json(&payload)
}

/// One entry per keyword searched, in order. Repeated keywords keep their own entries.
fn search_report(searches: Vec<KeywordSearch>) -> Value {
    searches
        .into_iter()
        .map(|search| match search.outcome {
            Ok(result) => json!({"keyword": search.keyword, "result": result}),
            Err(e) => json!({"keyword": search.keyword, "error": e.to_string(), "code": e.code()}),
        })
        .collect()
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
