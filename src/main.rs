use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use mailrules::config::Config;
use mailrules::engine::{load_rule_sets, preview_at, Engine};
use mailrules::provider::{GmailClient, MailProvider};
use mailrules::store::{EmailStore, LibSqlBackend};
use mailrules::web::{self, ApiContext};

#[derive(Parser)]
#[command(author, version, about = "Rule-driven email classification and actions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch emails from Gmail and store them in the database
    Fetch {
        /// Maximum number of emails to fetch
        #[arg(short, long)]
        max_results: Option<usize>,
        /// Gmail search query (e.g. "is:unread")
        #[arg(short, long, default_value = "")]
        query: String,
    },
    /// Apply rules from a JSON document to stored emails
    Apply {
        /// Path to the rules file (defaults to MAILRULES_RULES_FILE)
        #[arg(short, long)]
        rules: Option<PathBuf>,
        /// Limit the number of emails to process
        #[arg(short, long)]
        limit: Option<usize>,
        /// Skip this many emails
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Preview matches without executing any action
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// List stored emails
    List {
        /// Number of emails to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Show database statistics
    Stats,
    /// Serve the read-only status API
    Serve {
        /// Port to bind (defaults to MAILRULES_WEB_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Delete all stored emails and application records
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    config.validate()?;

    // Keep the appender guard alive for the lifetime of the process.
    let _log_guard = init_tracing(config.log_file.as_deref());

    match cli.command {
        Command::Fetch { max_results, query } => cmd_fetch(&config, max_results, &query).await,
        Command::Apply {
            rules,
            limit,
            offset,
            dry_run,
        } => cmd_apply(&config, rules, limit, offset, dry_run).await,
        Command::List { limit } => cmd_list(&config, limit).await,
        Command::Stats => cmd_stats(&config).await,
        Command::Serve { port } => cmd_serve(&config, port).await,
        Command::Clear { yes } => cmd_clear(&config, yes).await,
    }
}

fn init_tracing(log_file: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file = path
                .file_name()
                .map(|f| f.to_os_string())
                .unwrap_or_else(|| "mailrules.log".into());
            let (writer, guard) = tracing_appender::non_blocking(
                tracing_appender::rolling::never(dir, file),
            );
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn EmailStore>> {
    Ok(Arc::new(LibSqlBackend::new_local(&config.db_path).await?))
}

async fn cmd_fetch(
    config: &Config,
    max_results: Option<usize>,
    query: &str,
) -> anyhow::Result<()> {
    let client = GmailClient::new(config.gmail_config()?);
    let store = open_store(config).await?;
    let max_results = max_results.unwrap_or(config.max_fetch);

    eprintln!("Fetching up to {max_results} emails (query: {query:?})...");
    let emails = client.fetch_messages(query, max_results).await?;
    if emails.is_empty() {
        eprintln!("No emails found to fetch.");
        return Ok(());
    }

    let mut saved = 0usize;
    let mut skipped = 0usize;
    for email in &emails {
        if store.save_email(email).await? {
            saved += 1;
        } else {
            skipped += 1;
        }
    }

    eprintln!("Fetch complete.");
    eprintln!("   New emails saved:   {saved}");
    eprintln!("   Already existed:    {skipped}");
    eprintln!("   Total in database:  {}", store.email_count().await?);
    Ok(())
}

async fn cmd_apply(
    config: &Config,
    rules: Option<PathBuf>,
    limit: Option<usize>,
    offset: usize,
    dry_run: bool,
) -> anyhow::Result<()> {
    let rules_path = rules.unwrap_or_else(|| config.rules_file.clone());
    // Load-time failures abort the whole run before anything is evaluated.
    let sets = load_rule_sets(&rules_path)?;

    let store = open_store(config).await?;
    let emails = store.get_emails(limit, offset).await?;
    if emails.is_empty() {
        eprintln!("No emails in database. Run `mailrules fetch` first.");
        return Ok(());
    }

    if dry_run {
        eprintln!(
            "Dry run: evaluating {} rule set(s) against {} email(s), no actions executed.",
            sets.len(),
            emails.len()
        );
        let now = chrono::Utc::now();
        let by_id: HashMap<&str, &mailrules::engine::EmailRecord> =
            emails.iter().map(|e| (e.id.as_str(), e)).collect();
        for set in &sets {
            let report = preview_at(set, &emails, now);
            eprintln!("\n[{}] would match {} email(s):", set.name, report.stats.matched);
            for id in &report.matched_ids {
                if let Some(email) = by_id.get(id.as_str()) {
                    eprintln!("   {} — {}", email.from, email.subject);
                }
            }
            if report.stats.failed > 0 {
                eprintln!("   ({} email(s) failed evaluation)", report.stats.failed);
            }
        }
        return Ok(());
    }

    let provider: Arc<dyn MailProvider> = Arc::new(GmailClient::new(config.gmail_config()?));
    let engine = Engine::new(provider, store);

    eprintln!(
        "Applying {} rule set(s) to {} email(s)...",
        sets.len(),
        emails.len()
    );
    for (set_id, report) in engine.run_all(&sets, &emails).await {
        eprintln!("\n[{set_id}]");
        eprintln!("   Processed:       {}", report.stats.processed);
        eprintln!("   Matched:         {}", report.stats.matched);
        eprintln!("   Actions applied: {}", report.stats.actions_applied);
        eprintln!("   Failed:          {}", report.stats.failed);
    }
    Ok(())
}

async fn cmd_list(config: &Config, limit: usize) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let emails = store.get_emails(Some(limit), 0).await?;
    if emails.is_empty() {
        eprintln!("No emails in database.");
        return Ok(());
    }

    eprintln!("Latest {} email(s):", emails.len());
    for email in &emails {
        let marker = if email.is_read { " " } else { "*" };
        eprintln!(
            "{marker} {} | {}",
            email.received_at.format("%Y-%m-%d %H:%M"),
            email.from
        );
        eprintln!("    Subject: {}", email.subject);
        let applied = store.applications_for_email(&email.id).await?;
        if !applied.is_empty() {
            let names: Vec<&str> = applied.iter().map(|r| r.rule_set_name.as_str()).collect();
            eprintln!("    Rules: {}", names.join(", "));
        }
    }
    eprintln!("\nTotal emails in database: {}", store.email_count().await?);
    Ok(())
}

async fn cmd_stats(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let total = store.email_count().await?;
    let unread = store.unread_count().await?;

    eprintln!("mailrules statistics");
    eprintln!("   Total emails:  {total}");
    eprintln!("   Read emails:   {}", total - unread);
    eprintln!("   Unread emails: {unread}");
    eprintln!("   Database:      {}", config.db_path.display());
    eprintln!("   Rules file:    {}", config.rules_file.display());
    Ok(())
}

async fn cmd_serve(config: &Config, port: Option<u16>) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let port = port.unwrap_or(config.web_port);
    let ctx = ApiContext {
        store,
        db_path: config.db_path.display().to_string(),
        rules_file: config.rules_file.display().to_string(),
    };
    eprintln!("Status API on http://0.0.0.0:{port}");
    web::serve(ctx, port).await?;
    Ok(())
}

async fn cmd_clear(config: &Config, yes: bool) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let total = store.email_count().await?;
    if total == 0 {
        eprintln!("Database is already empty.");
        return Ok(());
    }

    if !yes {
        eprint!("Delete {total} email(s) and all application records? [y/N] ");
        std::io::stderr().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            eprintln!("Operation cancelled.");
            return Ok(());
        }
    }

    let removed = store.clear().await?;
    eprintln!("Cleared {removed} email(s) from database.");
    Ok(())
}
