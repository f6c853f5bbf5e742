//! gale-post - Post once to every configured account

use clap::Parser;
use libgalefling::aggregator::Summary;
use libgalefling::browser::BrowserSession;
use libgalefling::dispatcher::{ConnectionCheck, Dispatcher};
use libgalefling::logging::{LoggingConfig, LOG_LEVEL_ENV};
use libgalefling::platforms::DefaultClientFactory;
use libgalefling::{
    AccountConfig, AccountRegistry, Config, ErrorCode, GaleflingError, PlatformError, PostRequest,
    PostResult, Result, SpecTable,
};
use serde::Serialize;
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "gale-post")]
#[command(version)]
#[command(about = "Post once to every configured social account")]
#[command(long_about = "\
gale-post - Post once to every configured social account

DESCRIPTION:
    Posts the given text (and optional image) to the selected accounts.
    API platforms (Twitter/X, Bluesky, Instagram) are posted to directly.
    Browser platforms (FetLife, Snapchat, OnlyFans, Fansly) need a human
    click; gale-post prints their composer URLs and reports them as pending.

USAGE:
    gale-post \"Hello everyone\"
    echo \"Hello everyone\" | gale-post --account bluesky_1,twitter_1
    gale-post \"New set\" --image set.jpg --format json
    gale-post --test-connection

CONFIGURATION:
    Configuration file: ~/.config/galefling/config.toml (or $GALEFLING_CONFIG)
    Accounts file:      ~/.config/galefling/accounts.toml

EXIT CODES:
    0 - Every account posted or is waiting for browser confirmation
    1 - At least one account failed, or a runtime error
    2 - Authentication error
    3 - Invalid input
")]
struct Cli {
    /// Text to post (reads from stdin if not provided)
    text: Option<String>,

    /// Image to attach, adapted per platform
    #[arg(short, long, value_name = "PATH")]
    image: Option<PathBuf>,

    /// Account ids to post to (comma-separated, default: all enabled)
    #[arg(short, long, value_name = "IDS", value_delimiter = ',')]
    account: Vec<String>,

    /// Output format
    #[arg(short, long, default_value = "text", value_name = "FORMAT")]
    #[arg(value_parser = ["text", "json"])]
    format: String,

    /// Check credentials and reachability without posting
    #[arg(long)]
    test_connection: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env(cli.verbose);
    if !cli.verbose && std::env::var(LOG_LEVEL_ENV).is_err() {
        logging.level = "error".to_string();
    }
    logging.init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

struct App {
    specs: SpecTable,
    registry: AccountRegistry,
    dispatcher: Dispatcher,
}

fn load_app() -> Result<App> {
    let config = Config::load()?;
    let specs = config.spec_table()?;
    let registry = AccountRegistry::open(config.accounts_path(), specs.clone())?;
    let factory = DefaultClientFactory::new(
        config.credentials.provider(),
        config.network.timeout(),
        config.profiles_path(),
    )?;
    let dispatcher = Dispatcher::new(specs.clone(), Arc::new(factory));
    Ok(App {
        specs,
        registry,
        dispatcher,
    })
}

async fn run(cli: Cli) -> Result<i32> {
    let app = load_app()?;
    let account_ids = selected_ids(&cli, &app.registry)?;
    let json = cli.format == "json";

    if cli.test_connection {
        let accounts: Vec<AccountConfig> = app
            .registry
            .list()
            .into_iter()
            .filter(|a| account_ids.contains(&a.account_id))
            .collect();
        let checks = app.dispatcher.test_connections(&accounts).await;
        print_checks(&checks, &app.specs, json)?;
        return Ok(if checks.iter().all(ConnectionCheck::is_ok) { 0 } else { 1 });
    }

    let text = read_text(cli.text)?;
    let mut request = PostRequest::new(text).with_accounts(account_ids);
    if let Some(image) = cli.image {
        request = request.with_image(image);
    }

    let mut dispatch = app.dispatcher.dispatch(&request, &app.registry.list()).await?;
    // Drain the silent stream so every result the CLI can produce is in
    dispatch.silent_results().await;
    let sessions = dispatch.take_sessions();
    let results = dispatch.snapshot();
    let summary = dispatch.summary();

    if json {
        print_json(&Report {
            dispatch_id: dispatch.id().to_string(),
            complete: sessions.is_empty(),
            summary,
            results: &results,
            pending: sessions.iter().map(PendingSession::from).collect(),
        })?;
    } else {
        print_results(&results, &sessions, &app.specs);
    }

    Ok(if summary.failed > 0 { 1 } else { 0 })
}

/// Explicit `--account` ids, else every enabled account
fn selected_ids(cli: &Cli, registry: &AccountRegistry) -> Result<Vec<String>> {
    let ids: Vec<String> = cli
        .account
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    if !ids.is_empty() {
        return Ok(ids);
    }

    let enabled: Vec<String> = registry
        .enabled()
        .into_iter()
        .map(|a| a.account_id)
        .collect();
    if enabled.is_empty() {
        return Err(GaleflingError::InvalidInput(format!(
            "no enabled accounts configured in {}",
            registry.state_file().display()
        )));
    }
    Ok(enabled)
}

fn read_text(arg: Option<String>) -> Result<String> {
    let text = match arg {
        Some(text) => text,
        None => {
            let stdin = std::io::stdin();
            if stdin.is_terminal() {
                return Err(GaleflingError::InvalidInput(
                    "no text given; pass it as an argument or on stdin".to_string(),
                ));
            }
            let mut buffer = String::new();
            stdin
                .lock()
                .read_to_string(&mut buffer)
                .map_err(|e| GaleflingError::InvalidInput(format!("failed to read stdin: {}", e)))?;
            buffer
        }
    };

    let text = text.trim_end_matches(['\n', '\r']).to_string();
    if text.trim().is_empty() {
        return Err(GaleflingError::InvalidInput("post text is empty".to_string()));
    }
    Ok(text)
}

#[derive(Serialize)]
struct PendingSession {
    account_id: String,
    platform_id: String,
    composer_url: String,
}

impl From<&BrowserSession> for PendingSession {
    fn from(session: &BrowserSession) -> Self {
        Self {
            account_id: session.account().account_id.clone(),
            platform_id: session.account().platform_id.to_string(),
            composer_url: session.composer_url().to_string(),
        }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    dispatch_id: String,
    /// False while browser sessions still need the user
    complete: bool,
    summary: Summary,
    results: &'a [PostResult],
    pending: Vec<PendingSession>,
}

#[derive(Serialize)]
struct CheckLine {
    account_id: String,
    platform_id: String,
    ok: bool,
    error_code: Option<String>,
    error: Option<String>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| PlatformError::new(ErrorCode::SysUnknown, format!("failed to render JSON: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}

fn print_results(results: &[PostResult], sessions: &[BrowserSession], specs: &SpecTable) {
    for result in results {
        let label = format!("{} ({})", result.account_id, specs.get(result.platform_id).display_name);
        if result.success {
            match &result.post_url {
                Some(url) => println!("{}: {}", label, url),
                None => println!("{}: posted (link unavailable)", label),
            }
        } else {
            let error = result
                .display_error()
                .unwrap_or_else(|| "failed".to_string());
            eprintln!("{}: {}", label, error);
            tracing::debug!(
                "{}",
                libgalefling::types::format_error_details(result, specs.get(result.platform_id))
            );
        }
    }

    for session in sessions {
        println!(
            "{}: confirm in browser: {}",
            session.account().label(session.spec()),
            session.composer_url()
        );
    }
}

fn print_checks(checks: &[ConnectionCheck], specs: &SpecTable, json: bool) -> Result<()> {
    if json {
        let lines: Vec<CheckLine> = checks
            .iter()
            .map(|check| {
                let spec = specs.get(check.account.platform_id);
                CheckLine {
                    account_id: check.account.account_id.clone(),
                    platform_id: check.account.platform_id.to_string(),
                    ok: check.is_ok(),
                    error_code: check
                        .outcome
                        .as_ref()
                        .err()
                        .map(|e| e.code().qualified(spec.code_prefix.as_deref())),
                    error: check.outcome.as_ref().err().map(|e| e.detail().to_string()),
                }
            })
            .collect();
        return print_json(&lines);
    }

    for check in checks {
        let spec = specs.get(check.account.platform_id);
        match &check.outcome {
            Ok(()) => println!("{}: OK", check.account.label(spec)),
            Err(e) => println!(
                "{}: [{}] {}",
                check.account.label(spec),
                e.code().qualified(spec.code_prefix.as_deref()),
                e.code().user_message(&spec.display_name)
            ),
        }
    }
    Ok(())
}
