// volley CLI - batch remote command execution over SSH

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use volley::config::{self, ConnectionOverrides, Settings};
use volley::inventory::{self, ScriptResolver};
use volley::output::{OutputMultiplexer, Terminal, VolleyError};
use volley::runner::{BatchRunner, RunConfig};

#[derive(Parser)]
#[command(
    name = "volley",
    about = "Run one command across a fleet of hosts over SSH, in paced batches",
    version,
    disable_colored_help = true,
    term_width = 0,
)]
struct Cli {
    /// Inventory selection query, or a space-separated host list with --manual-list
    target: String,

    /// The command to run on every host
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    /// Seconds to wait between batches
    #[arg(short = 'W', long, default_value = "0.5")]
    wait: f64,

    /// Number of hosts to run per batch
    #[arg(short = 'B', long, default_value = "5")]
    batch_size: usize,

    /// Stop the whole run on the first non-zero remote exit status
    #[arg(short = 'S', long)]
    stop_on_failure: bool,

    /// Treat TARGET as a space-separated list of hosts instead of a query
    #[arg(short = 'm', long)]
    manual_list: bool,

    /// The SSH username
    #[arg(short = 'x', long)]
    ssh_user: Option<String>,

    /// The SSH password (insecure - prefer --ask-pass)
    #[arg(short = 'P', long)]
    ssh_password: Option<String>,

    /// Prompt for the SSH password
    #[arg(short = 'k', long)]
    ask_pass: bool,

    /// The SSH port
    #[arg(short = 'p', long)]
    ssh_port: Option<u16>,

    /// The SSH identity file used for authentication
    #[arg(short = 'i', long)]
    identity_file: Option<String>,

    /// Disable host key verification
    #[arg(long)]
    no_host_key_verify: bool,

    /// The inventory attribute to use as the connection address (default: fqdn)
    #[arg(short = 'a', long)]
    attribute: Option<String>,

    /// Inventory script that resolves queries to JSON records
    #[arg(long)]
    inventory_script: Option<PathBuf>,

    /// Settings file path (default: ~/.volley/config.yaml)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Cap on simultaneous connection attempts within a batch
    #[arg(long)]
    concurrency: Option<usize>,

    /// SSH connection timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Quiet mode - suppress banners and pacing notices
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!(version = volley::VERSION, "starting");

    match run(cli).await {
        Ok(aborted) => {
            if aborted {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(e.exit_code());
        }
    }
}

/// Returns whether stop-on-failure aborted the run
async fn run(cli: Cli) -> Result<bool, VolleyError> {
    let mut settings = load_settings(cli.config.as_deref())?;

    let password = if cli.ask_pass {
        Some(prompt_password("SSH password: ")?)
    } else {
        cli.ssh_password.clone()
    };

    let overrides = ConnectionOverrides {
        user: cli.ssh_user.clone(),
        password,
        port: cli.ssh_port,
        identity_file: cli.identity_file.clone(),
        no_host_key_verify: cli.no_host_key_verify,
        connect_timeout: Duration::from_secs(cli.timeout),
    };

    let opts = config::build_connection_options(&mut settings, &overrides);

    let hosts = if cli.manual_list {
        inventory::manual_list(&cli.target)
    } else {
        let script = cli
            .inventory_script
            .clone()
            .or_else(|| settings.inventory_script.clone())
            .ok_or_else(|| VolleyError::Inventory {
                message: "no inventory script configured".to_string(),
                suggestion: Some(
                    "Pass --inventory-script, set inventory_script in the settings file, \
                     or use --manual-list with a host list"
                        .to_string(),
                ),
            })?;

        let attribute = cli
            .attribute
            .clone()
            .or_else(|| settings.attribute.clone())
            .unwrap_or_else(|| "fqdn".to_string());

        let resolver = ScriptResolver::new(script);
        inventory::resolve_hosts(&resolver, &cli.target, &attribute).await?
    };

    let run_config = RunConfig {
        batch_size: cli.batch_size,
        wait: cli.wait,
        stop_on_failure: cli.stop_on_failure,
        concurrency: cli.concurrency,
    };

    let mux = Arc::new(OutputMultiplexer::stdout());
    let terminal = Arc::new(Terminal::new(cli.quiet));
    let runner = BatchRunner::new(opts, run_config, mux, terminal);

    let command = cli.command.join(" ");
    let result = runner.run(&hosts, &command).await?;

    tracing::debug!(
        batches = result.batches_completed,
        failed = result.failed_hosts.len(),
        aborted = result.aborted,
        "run finished"
    );

    Ok(result.aborted)
}

fn load_settings(path: Option<&std::path::Path>) -> Result<Settings, VolleyError> {
    let loaded = match path {
        Some(path) => Settings::load(path),
        None => Settings::load_default(),
    };

    loaded.map_err(|e| VolleyError::Config {
        message: e.to_string(),
        suggestion: Some("Fix or remove the settings file".to_string()),
    })
}

fn prompt_password(prompt: &str) -> Result<String, VolleyError> {
    // Print prompt to stderr so it appears even with redirected stdout
    eprint!("{}", prompt.cyan());
    io::stderr().flush().ok();

    // Read password with echo disabled
    let password = rpassword::read_password().map_err(|e| VolleyError::Config {
        message: format!("Failed to read password: {}", e),
        suggestion: Some("Try using --ssh-password instead of --ask-pass".to_string()),
    })?;

    let password = password.trim().to_string();

    // Print newline after password entry (since echo was disabled)
    eprintln!();

    if password.is_empty() {
        return Err(VolleyError::Config {
            message: "Password cannot be empty".to_string(),
            suggestion: Some("Enter a password when prompted".to_string()),
        });
    }

    Ok(password)
}
