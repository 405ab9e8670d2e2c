//! triplog CLI
//!
//! Fills the intranet trip-log form from the monthly spreadsheet.
//!
//! Usage:
//!   triplog                          # process the default workbook from row 9
//!   triplog --excel log.xlsx --start-row 12
//!   triplog --config triplog.yaml --headless
//!   triplog --reset-creds            # forget the stored account and exit

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing::{debug, warn, Level};
use tracing_subscriber::EnvFilter;

use triplog::auth::SERVICE_NAME;
use triplog::{
    reset_credentials, BrowserDriver, ChromeSession, Config, Credential, CredentialPrompt,
    CredentialResolver, CredentialVault, KeyringVault, PageOptions, RunReport, SubmissionOutcome,
    TriplogError, WorkbookSheet,
};

#[derive(Parser, Debug)]
#[command(name = "triplog")]
#[command(about = "Fill the intranet trip-log form from a spreadsheet")]
struct Args {
    /// Delete the stored ID/password and exit
    #[arg(long)]
    reset_creds: bool,

    /// YAML file overriding columns, selectors, signals and aliases
    #[arg(long, value_name = "YAML")]
    config: Option<PathBuf>,

    /// Trip-log workbook [default: 2025 8월 자동입력 차량일지양식.xlsx]
    #[arg(long, value_name = "PATH")]
    excel: Option<PathBuf>,

    /// Worksheet name (first sheet when omitted)
    #[arg(long)]
    sheet: Option<String>,

    /// First data row, 1-based [default: 9]
    #[arg(long)]
    start_row: Option<u32>,

    /// Trip-log form URL
    #[arg(long, env = "NKP_URL")]
    url: Option<String>,

    /// Browser profile directory; keeps the session between runs [default: chrome_profile]
    #[arg(long, value_name = "DIR")]
    profile_dir: Option<PathBuf>,

    /// Where row_<n>_error.png screenshots go [default: current directory]
    #[arg(long, value_name = "DIR")]
    snapshot_dir: Option<PathBuf>,

    /// Run the browser without a window
    #[arg(long)]
    headless: bool,

    /// Chrome/Chromium executable (searched on PATH when omitted)
    #[arg(long, env = "TRIPLOG_CHROME", value_name = "PATH")]
    chrome: Option<PathBuf>,

    /// Treat a login with no confirmation signal as failed
    #[arg(long)]
    strict_login: bool,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(excel) = self.excel {
            config.workbook = excel;
        }
        if let Some(sheet) = self.sheet {
            config.sheet = Some(sheet);
        }
        if let Some(row) = self.start_row {
            config.start_row = row;
        }
        if let Some(url) = self.url {
            config.url = url;
        }
        if let Some(dir) = self.profile_dir {
            config.profile_dir = dir;
        }
        if let Some(dir) = self.snapshot_dir {
            config.verify.snapshot_dir = dir;
        }
        if let Some(chrome) = self.chrome {
            config.chrome = Some(chrome);
        }
        config.headless |= self.headless;
        config.login.strict |= self.strict_login;

        config.validate()?;
        Ok(config)
    }
}

/// Asks on the terminal; the password is not echoed.
struct ConsolePrompt;

impl CredentialPrompt for ConsolePrompt {
    fn ask(&self) -> triplog::Result<(String, String)> {
        let prompt_error = |e: io::Error| TriplogError::Prompt(e.to_string());

        print!("{} ", "Intranet ID:".bold());
        io::stdout().flush().map_err(prompt_error)?;
        let mut identifier = String::new();
        io::stdin()
            .lock()
            .read_line(&mut identifier)
            .map_err(prompt_error)?;

        let secret = rpassword::prompt_password("Password: ").map_err(prompt_error)?;
        Ok((identifier, secret))
    }
}

fn init_logging() {
    let log_level = env::var("LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let mut filter = EnvFilter::from_default_env().add_directive(log_level.into());
    for noisy in ["tungstenite=warn", "tokio_tungstenite=warn", "hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = noisy.parse() {
            filter = filter.add_directive(directive);
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn env_credential() -> Option<Credential> {
    Credential::from_pair(env::var("NKP_ID").ok(), env::var("NKP_PW").ok())
}

fn reset(vault: &dyn CredentialVault) -> Result<()> {
    match reset_credentials(vault, SERVICE_NAME)? {
        Some(identifier) => println!(
            "{} Removed the stored account {}",
            "✔".green(),
            identifier.bold()
        ),
        None => println!("{} No stored account to remove", "ℹ".blue()),
    }
    Ok(())
}

async fn drive(
    config: &Config,
    session: &ChromeSession,
    sheet: &WorkbookSheet,
    vault: Arc<dyn CredentialVault>,
) -> Result<RunReport> {
    let page = session
        .new_page(PageOptions::default())
        .await
        .context("could not open a browser tab")?;
    let driver: Arc<dyn BrowserDriver> = Arc::new(page);

    driver
        .navigate(&config.url)
        .await
        .with_context(|| format!("could not open {}", config.url))?;

    let resolver = CredentialResolver::new(env_credential(), vault, Arc::new(ConsolePrompt));
    let mut runner = config.build_runner(driver, resolver)?;
    match runner.run(sheet).await {
        Ok(report) => Ok(report),
        Err(aborted) => {
            print_outcomes(&aborted.partial);
            println!(
                "{}",
                format!(
                    "Stopped at row {} after {} rows ({} succeeded)",
                    aborted.row,
                    aborted.partial.processed(),
                    aborted.partial.succeeded()
                )
                .red()
                .bold()
            );
            Err(aborted.into())
        }
    }
}

fn print_outcomes(report: &RunReport) {
    for outcome in report.outcomes() {
        match outcome {
            SubmissionOutcome::Success { row } => {
                println!("{} row {row}", "[ok]".green());
            }
            SubmissionOutcome::Failed {
                row,
                reason,
                snapshot,
            } => {
                let snapshot = snapshot
                    .as_ref()
                    .map(|p| format!(" (snapshot: {})", p.display()))
                    .unwrap_or_default();
                println!("{} row {row}: {reason}{snapshot}", "[warn]".yellow());
            }
        }
    }
}

fn print_report(report: &RunReport) {
    print_outcomes(report);

    let summary = format!(
        "All rows processed: {} submitted, {} succeeded, {} need checking",
        report.processed(),
        report.succeeded(),
        report.failed()
    );
    if report.failed() == 0 {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.yellow().bold());
    }
}

async fn run(args: Args) -> Result<()> {
    let vault: Arc<dyn CredentialVault> = Arc::new(KeyringVault);
    if args.reset_creds {
        return reset(vault.as_ref());
    }

    let config = args.into_config()?;
    debug!(?config, "Effective configuration");

    // Fail on a missing workbook before a browser window ever opens.
    let sheet = WorkbookSheet::open(&config.workbook, config.sheet.as_deref())?;
    println!(
        "{} {} [{}]",
        "Workbook".bold(),
        config.workbook.display(),
        sheet.name()
    );

    let session = ChromeSession::launch(&config.launch_options())
        .await
        .context("could not start the browser")?;

    let result = drive(&config, &session, &sheet, vault).await;

    if let Err(e) = session.close().await {
        warn!("Browser did not close cleanly: {e}");
    }

    let report = result?;
    print_report(&report);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_logging();

    if let Err(e) = run(args).await {
        eprintln!("{} {e:#}", "[error]".red().bold());
        std::process::exit(1);
    }
}
