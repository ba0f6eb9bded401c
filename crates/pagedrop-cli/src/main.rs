//! `pagedrop` CLI: command-line client for the Pagedrop service.
//!
//! Deploys HTML documents and manages access keys over the REST API. Talks
//! to the server exclusively via HTTP.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod client;

use std::io::Read as _;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use crate::client::Client;

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

const BANNER_SMALL: &str = "◇ Pagedrop";

const MAX_EXPIRE_DAYS: u32 = 365;

// ── CLI structure ────────────────────────────────────────────────────

/// Pagedrop: deploy HTML, get a link.
#[derive(Parser)]
#[command(
    name = "pagedrop",
    version,
    about = "Pagedrop CLI: deploy HTML pages and manage access keys",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         PAGEDROP_URL          Server address (default: http://127.0.0.1:8787)\n  \
         PAGEDROP_ADMIN_KEY    Admin key for management commands\n  \
         PAGEDROP_ACCESS_KEY   Shared key for deploys (falls back to the admin key)\n  \
         PAGEDROP_EXPIRE_DAYS  Default page lifetime in days, 0 keeps forever (default: 30)\n  \
         PAGEDROP_MAX_HTML_KB  Local HTML size ceiling in KiB (default: 500)\n\n\
         {DIM}Examples:{RESET}\n  \
         pagedrop health\n  \
         pagedrop deploy report.html --title 'Q3 report' --description 'Numbers for Q3'\n  \
         cat page.html | pagedrop deploy - --title Demo --description Demo --quiet\n  \
         pagedrop keys create --name ci-bot --max-pages 20"
    ),
)]
struct Cli {
    /// Pagedrop server address.
    #[arg(long, env = "PAGEDROP_URL", default_value = "http://127.0.0.1:8787")]
    url: String,

    /// Admin key.
    #[arg(long, env = "PAGEDROP_ADMIN_KEY", hide_env_values = true)]
    admin_key: Option<String>,

    /// Shared access key used for deploys.
    #[arg(long, env = "PAGEDROP_ACCESS_KEY", hide_env_values = true)]
    access_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy an HTML file and print its public URL.
    Deploy {
        /// HTML file to deploy, or `-` to read standard input.
        file: String,
        /// Page title.
        #[arg(long)]
        title: String,
        /// What the page is for.
        #[arg(long)]
        description: String,
        /// Days until the page expires, 0 keeps it forever.
        #[arg(
            long,
            env = "PAGEDROP_EXPIRE_DAYS",
            default_value = "30",
            value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_EXPIRE_DAYS))
        )]
        expire_days: u32,
        /// Refuse HTML larger than this many KiB before contacting the server.
        #[arg(
            long,
            env = "PAGEDROP_MAX_HTML_KB",
            default_value = "500",
            value_parser = clap::value_parser!(u32).range(10..=2000)
        )]
        max_html_kb: u32,
        /// Print only the URL.
        #[arg(long, short)]
        quiet: bool,
    },
    /// Show server health.
    Health,
    /// Show usage counters (admin).
    Stats,
    /// Set the admin key on a fresh server (uses --admin-key).
    Init,
    /// Replace the admin key (admin).
    RotateAdmin {
        /// The new admin secret.
        #[arg(long)]
        new_key: String,
    },
    /// Access key management (admin).
    Keys {
        #[command(subcommand)]
        action: KeyCommands,
    },
    /// Page management.
    Pages {
        #[command(subcommand)]
        action: PageCommands,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Issue a shared key. The secret is shown once.
    Create {
        /// Human-readable key name.
        #[arg(long)]
        name: String,
        /// Comma-separated permissions: create, view, delete, admin.
        #[arg(long, value_delimiter = ',')]
        permissions: Vec<String>,
        /// Maximum live pages for this key (default on the server: 100).
        #[arg(long)]
        max_pages: Option<u32>,
        /// Days until the key expires, 0 or absent never expires.
        #[arg(long)]
        expire_days: Option<u32>,
    },
    /// List active shared keys.
    List,
    /// Revoke a shared key.
    Revoke {
        /// Key id (not the secret).
        key_id: String,
    },
}

#[derive(Subcommand)]
enum PageCommands {
    /// List live pages, newest first (admin).
    List {
        /// Maximum pages to show.
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Show page metadata.
    Info {
        /// Page id.
        page_id: String,
    },
    /// Delete a page (owner with delete, or admin).
    Delete {
        /// Page id.
        page_id: String,
    },
}

// ── Pretty output helpers ────────────────────────────────────────────

fn header(icon: &str, title: &str) {
    println!("{BOLD}{CYAN}{icon} {title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<16}{RESET} {WHITE}{value}{RESET}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

fn warning(msg: &str) {
    println!("{YELLOW}{BOLD}⚠{RESET} {YELLOW}{msg}{RESET}");
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("-")
}

fn num_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_u64)
        .map_or_else(|| "-".to_owned(), |n| n.to_string())
}

/// Render an epoch-seconds field, `never` when absent.
fn time_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map_or_else(
            || "never".to_owned(),
            |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
}

// ── Deployment checks ────────────────────────────────────────────────

/// Local checks mirroring the server's, so obvious mistakes fail fast.
fn validate_deployment(title: &str, description: &str, html: &str, max_html_kb: u32) -> Result<()> {
    if title.trim().is_empty() {
        bail!("page title must not be empty");
    }
    if description.trim().is_empty() {
        bail!("page description must not be empty");
    }
    if html.trim().is_empty() {
        bail!("HTML content must not be empty");
    }
    let limit = u64::from(max_html_kb) * 1024;
    let size = html.len() as u64;
    if size > limit {
        #[allow(clippy::cast_precision_loss)]
        let size_kb = size as f64 / 1024.0;
        bail!("HTML content too large ({size_kb:.1} KiB), limit is {max_html_kb} KiB");
    }
    Ok(())
}

fn read_html(file: &str) -> Result<String> {
    if file == "-" {
        let mut html = String::new();
        std::io::stdin()
            .read_to_string(&mut html)
            .context("failed to read HTML from standard input")?;
        Ok(html)
    } else {
        std::fs::read_to_string(Path::new(file))
            .with_context(|| format!("failed to read HTML file '{file}'"))
    }
}

// ── Command dispatch ─────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

struct Keys {
    admin: Option<String>,
    access: Option<String>,
}

impl Keys {
    fn admin(&self) -> Result<&str> {
        self.admin
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no admin key provided; set PAGEDROP_ADMIN_KEY or use --admin-key"))
    }

    /// The shared key when set, else the admin key.
    fn access(&self) -> Result<&str> {
        self.access.as_deref().or(self.admin.as_deref()).ok_or_else(|| {
            anyhow::anyhow!(
                "no access key provided; set PAGEDROP_ACCESS_KEY or PAGEDROP_ADMIN_KEY"
            )
        })
    }
}

async fn run(cli: Cli) -> Result<()> {
    let client = Client::new(&cli.url);
    let keys = Keys {
        admin: cli.admin_key.filter(|k| !k.trim().is_empty()),
        access: cli.access_key.filter(|k| !k.trim().is_empty()),
    };

    match cli.command {
        Commands::Deploy {
            file,
            title,
            description,
            expire_days,
            max_html_kb,
            quiet,
        } => {
            let html = read_html(&file)?;
            validate_deployment(&title, &description, &html, max_html_kb)?;
            let token = keys.access()?;
            cmd_deploy(&client, token, &title, &description, html, expire_days, quiet).await
        }
        Commands::Health => cmd_health(&client).await,
        Commands::Stats => cmd_stats(&client, keys.admin()?).await,
        Commands::Init => cmd_init(&client, keys.admin()?).await,
        Commands::RotateAdmin { new_key } => {
            client.rotate_admin(keys.admin()?, &new_key).await?;
            println!();
            success("Admin key rotated. Update PAGEDROP_ADMIN_KEY.");
            println!();
            Ok(())
        }
        Commands::Keys { action } => cmd_keys(&client, keys.admin()?, action).await,
        Commands::Pages { action } => cmd_pages(&client, &keys, action).await,
    }
}

async fn cmd_deploy(
    client: &Client,
    token: &str,
    title: &str,
    description: &str,
    html: String,
    expire_days: u32,
    quiet: bool,
) -> Result<()> {
    let body = json!({
        "title": title.trim(),
        "description": description.trim(),
        "html_content": html,
        "expires_in_days": expire_days,
    });
    let resp = client.deploy(token, &body).await?;
    let url = resp
        .get("url")
        .and_then(Value::as_str)
        .context("server response is missing the page URL")?;

    if quiet {
        println!("{url}");
        return Ok(());
    }

    println!();
    success("Page deployed");
    kv_line("URL", &format!("{BOLD}{url}{RESET}"));
    kv_line("Page ID", str_field(&resp, "page_id"));
    kv_line("Title", str_field(&resp, "title"));
    kv_line("Expires", &time_field(&resp, "expires_at"));
    println!();
    Ok(())
}

async fn cmd_health(client: &Client) -> Result<()> {
    println!();
    println!("  {BANNER_SMALL} {DIM}checking health...{RESET}");
    println!();
    let resp = client.health().await?;

    header("♥", "Server Health");
    let status = str_field(&resp, "status");
    let status = if status == "ok" {
        format!("{GREEN}{status}{RESET}")
    } else {
        format!("{RED}{status}{RESET}")
    };
    kv_line("Status", &status);
    let initialized = resp
        .get("initialized")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    kv_line(
        "Initialized",
        &if initialized {
            format!("{GREEN}yes{RESET}")
        } else {
            format!("{RED}no{RESET}")
        },
    );
    kv_line("Server time", &time_field(&resp, "timestamp"));
    println!();

    if !initialized {
        warning("No admin key yet. Run `pagedrop init` with PAGEDROP_ADMIN_KEY set.");
        println!();
    }
    Ok(())
}

async fn cmd_stats(client: &Client, token: &str) -> Result<()> {
    let resp = client.get(token, "/api/stats", "stats request").await?;
    println!();
    header("▤", "Usage");
    kv_line("Live pages", &num_field(&resp, "pages_count"));
    kv_line("Active keys", &num_field(&resp, "keys_count"));
    kv_line("Page views", &num_field(&resp, "total_access"));
    kv_line("Pages created", &num_field(&resp, "pages_created"));
    kv_line("Keys created", &num_field(&resp, "keys_created"));
    println!();
    Ok(())
}

async fn cmd_init(client: &Client, admin_key: &str) -> Result<()> {
    client.init(admin_key).await?;
    println!();
    success("Admin key set. Keep PAGEDROP_ADMIN_KEY somewhere safe.");
    println!();
    Ok(())
}

// ── Key commands ─────────────────────────────────────────────────────

async fn cmd_keys(client: &Client, token: &str, action: KeyCommands) -> Result<()> {
    match action {
        KeyCommands::Create {
            name,
            permissions,
            max_pages,
            expire_days,
        } => {
            let mut body = json!({ "key_name": name });
            if !permissions.is_empty() {
                body["permissions"] = json!(permissions);
            }
            if let Some(max_pages) = max_pages {
                body["max_pages"] = json!(max_pages);
            }
            if let Some(days) = expire_days {
                body["expires_in_days"] = json!(days);
            }

            let resp = client.post(token, "/api/keys", &body, "key creation").await?;
            println!();
            success("Access key created");
            kv_line("Key ID", str_field(&resp, "key_id"));
            kv_line("Name", str_field(&resp, "key_name"));
            kv_line("Permissions", &join_permissions(&resp));
            kv_line("Max pages", &num_field(&resp, "max_pages"));
            kv_line("Expires", &time_field(&resp, "expires_at"));
            println!();
            println!("  {DIM}Secret:{RESET}  {GREEN}{BOLD}{}{RESET}", str_field(&resp, "api_key"));
            println!();
            warning("The secret is shown only once. Store it now.");
            println!();
        }
        KeyCommands::List => {
            let resp = client.get(token, "/api/keys", "key listing").await?;
            println!();
            header("⚿", "Access Keys");
            let keys = resp
                .get("keys")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            if keys.is_empty() {
                println!("  {DIM}(no keys){RESET}");
            }
            for key in keys {
                println!(
                    "  {CYAN}├─{RESET} {BOLD}{}{RESET}  {}",
                    str_field(key, "key_id"),
                    str_field(key, "key_name")
                );
                println!(
                    "  {CYAN}│{RESET}  {DIM}{} · {} pages max · used {} · expires {}{RESET}",
                    join_permissions(key),
                    num_field(key, "max_pages"),
                    num_field(key, "usage_count"),
                    time_field(key, "expires_at"),
                );
            }
            println!();
        }
        KeyCommands::Revoke { key_id } => {
            client
                .delete(token, &format!("/api/keys/{key_id}"), "key revocation")
                .await?;
            println!();
            success(&format!("Key {key_id} revoked"));
            println!();
        }
    }
    Ok(())
}

fn join_permissions(v: &Value) -> String {
    v.get("permissions")
        .and_then(Value::as_array)
        .map(|perms| {
            perms
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default()
}

// ── Page commands ────────────────────────────────────────────────────

async fn cmd_pages(client: &Client, keys: &Keys, action: PageCommands) -> Result<()> {
    match action {
        PageCommands::List { limit } => {
            let resp = client
                .get(keys.admin()?, &format!("/api/pages?limit={limit}"), "page listing")
                .await?;
            println!();
            header("▦", "Pages");
            let pages = resp
                .get("pages")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            if pages.is_empty() {
                println!("  {DIM}(no pages){RESET}");
            }
            for page in pages {
                println!(
                    "  {CYAN}├─{RESET} {BOLD}{}{RESET}  {}",
                    str_field(page, "page_id"),
                    str_field(page, "title")
                );
                println!(
                    "  {CYAN}│{RESET}  {DIM}{} views · by {} · expires {}{RESET}",
                    num_field(page, "access_count"),
                    str_field(page, "created_by"),
                    time_field(page, "expires_at"),
                );
            }
            println!();
        }
        PageCommands::Info { page_id } => {
            let resp = client
                .get(keys.access()?, &format!("/api/pages/{page_id}"), "page lookup")
                .await?;
            println!();
            header("▦", str_field(&resp, "title"));
            kv_line("Page ID", str_field(&resp, "page_id"));
            kv_line("Description", str_field(&resp, "description"));
            kv_line("Created", &time_field(&resp, "created_at"));
            kv_line("Expires", &time_field(&resp, "expires_at"));
            kv_line("Views", &num_field(&resp, "access_count"));
            kv_line("Last viewed", &time_field(&resp, "last_accessed"));
            kv_line("Owner", str_field(&resp, "created_by"));
            kv_line("Size", &format!("{} bytes", num_field(&resp, "size_bytes")));
            println!();
        }
        PageCommands::Delete { page_id } => {
            client
                .delete(keys.access()?, &format!("/api/pages/{page_id}"), "page deletion")
                .await?;
            println!();
            success(&format!("Page {page_id} deleted"));
            println!();
        }
    }
    Ok(())
}
