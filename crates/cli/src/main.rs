use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use levy_api::{ApiConfig, HttpApi, LevyApi, PatronService};
use levy_monitor::{Command, MonitorConfig, MonitorEvent, PageView};
use levy_view::{FilterType, PageCursor, SortDirection, SortField, SortSpec, TimeBucket, ViewQuery};
use tokio::io::AsyncBufReadExt;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "levyctl", version, about = "Levy ticket monitor CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// API base URL
    #[arg(long = "base-url", env = "LEVY_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Static API key sent as X-API-Key
    #[arg(long = "api-key", env = "LEVY_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Live view: page, counters and connectivity; reads line commands from stdin
    Watch {
        /// Rows per page
        #[arg(long = "page-size", env = "LEVY_PAGE_SIZE")]
        page_size: Option<usize>,
    },
    /// One fetch, filtered and sorted locally
    List {
        /// Free-text search
        #[arg(long = "search", default_value = "")]
        search: String,
        /// all | alerted
        #[arg(long = "filter", default_value = "all")]
        filter: FilterType,
        /// Time bucket toggles: 12, 24, 48 (repeatable)
        #[arg(long = "bucket")]
        buckets: Vec<TimeBucket>,
        /// Sort column, e.g. playingTime or name
        #[arg(long = "sort")]
        sort: Option<SortField>,
        /// Sort descending
        #[arg(long = "desc", action = ArgAction::SetTrue)]
        desc: bool,
        /// One-based page; 0 prints every row
        #[arg(long = "page", default_value_t = 0)]
        page: usize,
        #[arg(long = "page-size", env = "LEVY_PAGE_SIZE", default_value_t = levy_view::DEFAULT_PAGE_SIZE)]
        page_size: usize,
        /// Print per-stage counts
        #[arg(long = "explain", action = ArgAction::SetTrue)]
        explain: bool,
    },
    /// Patron profile (file cache first)
    Patron {
        id: i64,
        /// Retention for cached profiles
        #[arg(long = "retention-days", env = "LEVY_FILE_RETENTION_DAYS", default_value_t = 1)]
        retention_days: u64,
    },
    /// Deployed application version
    Version,
}

fn init_tracing() {
    let env = std::env::var("LEVY_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("LEVY_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid LEVY_METRICS_ADDR; expected host:port");
        }
    }
}

/// Env config with flag overrides. Initialization errors end the process with status 1.
fn build_api(cli: &Cli) -> Arc<HttpApi> {
    let mut cfg = match ApiConfig::from_env() {
        Ok(c) => c,
        Err(e) if cli.base_url.is_some() && cli.api_key.is_some() => {
            info!(error = %e, "env config incomplete; using flags");
            ApiConfig::new(String::new(), String::new())
        }
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(u) = &cli.base_url {
        if cfg.deployment_base_url.is_empty() || cfg.deployment_base_url == cfg.base_url {
            cfg.deployment_base_url = u.clone();
        }
        cfg.base_url = u.clone();
    }
    if let Some(k) = &cli.api_key {
        cfg.api_key = k.clone();
    }
    match HttpApi::new(cfg) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            eprintln!("client error: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let api = build_api(&cli);

    match cli.command {
        Commands::Watch { page_size } => {
            let mut mcfg = MonitorConfig::from_env();
            if let Some(n) = page_size {
                mcfg.page_size = n.max(1);
            }
            mcfg.app_code = api.config().app_code.clone();
            mcfg.fallback_version = api.config().fallback_version.clone();
            mcfg.push_enabled = api.config().push_url.is_some();
            info!(page_size = mcfg.page_size, push = mcfg.push_enabled, "watch invoked");
            run_watch(api, mcfg, cli.output).await?;
        }
        Commands::List { search, filter, buckets, sort, desc, page, page_size, explain } => {
            let t0 = Instant::now();
            let fetched = api.fetch_tickets(1, 50_000, FilterType::All.as_wire()).await.context("fetch tickets")?;
            info!(items = fetched.items.len(), took_ms = %t0.elapsed().as_millis(), "list: fetched");
            let dir = if desc { SortDirection::Descending } else { SortDirection::Ascending };
            let query = ViewQuery {
                search,
                filter_type: filter,
                buckets: buckets.into_iter().collect(),
                sort: sort.map(|f| SortSpec::new(f, dir)),
            };
            let result = levy_view::compute(fetched.items, &query);
            let mut cursor = PageCursor::new(page_size);
            cursor.resize(result.total_count());
            let rows = if page == 0 {
                &result.rows[..]
            } else {
                cursor.page_index = levy_view::clamp_index(page, cursor.total_pages);
                cursor.slice(&result.rows)
            };
            match cli.output {
                Output::Human => {
                    print_rows(rows);
                    println!(
                        "{} tickets (slot {}, table {}){}",
                        result.total_count(),
                        result.total_slot,
                        result.total_table,
                        if page == 0 { String::new() } else { format!(" · page {}/{}", cursor.page_index, cursor.total_pages) }
                    );
                }
                Output::Json => {
                    if explain {
                        #[derive(serde::Serialize)]
                        struct Explain<'a, T> { rows: T, debug: &'a levy_view::FilterExplain }
                        println!("{}", serde_json::to_string_pretty(&Explain { rows, debug: &result.explain })?);
                    } else {
                        println!("{}", serde_json::to_string_pretty(rows)?);
                    }
                }
            }
            if explain && matches!(cli.output, Output::Human) {
                let e = &result.explain;
                eprintln!(
                    "debug: total={} after_search={} after_filter_type={} after_buckets={}",
                    e.total, e.after_search, e.after_filter_type, e.after_buckets
                );
            }
        }
        Commands::Patron { id, retention_days } => {
            info!(patron_id = id, "patron invoked");
            let svc = match PatronService::open(api.clone(), None, retention_days) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "patron cache unavailable; fetching directly");
                    PatronService::without_cache(api.clone())
                }
            };
            let rec = svc.lookup(id).await;
            match cli.output {
                Output::Human => {
                    println!("id:       {}", rec.patron_id);
                    println!("name:     {}", rec.full_name.as_deref().unwrap_or("-"));
                    println!("gender:   {}", rec.gender.as_deref().unwrap_or("-"));
                    println!("age:      {}", rec.age.as_deref().unwrap_or("-"));
                    println!("city:     {}", rec.city.as_deref().unwrap_or("-"));
                    println!("country:  {}", rec.country.as_deref().unwrap_or("-"));
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&rec)?),
            }
        }
        Commands::Version => {
            let code = api.config().app_code.clone();
            let text = match api.fetch_manifest(&code).await {
                Ok(Some(m)) if !m.version.trim().is_empty() => format!("Version: {}", m.version.trim()),
                Ok(_) => format!("Version: {}", api.config().fallback_version),
                Err(e) => {
                    error!(error = %e, "manifest fetch failed");
                    format!("Version: {}", api.config().fallback_version)
                }
            };
            match cli.output {
                Output::Human => println!("{}", text),
                Output::Json => println!("{}", serde_json::json!({ "appCode": code, "version": text })),
            }
        }
    }

    Ok(())
}

async fn run_watch(api: Arc<HttpApi>, cfg: MonitorConfig, output: Output) -> Result<()> {
    let (handle, task) = levy_monitor::spawn(api, cfg);
    let mut events = handle.subscribe();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut repaint = tokio::time::interval(Duration::from_secs(1));
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line.context("read stdin")? {
                    Some(l) => match parse_line(&l) {
                        Ok(Some(LineCmd::Quit)) => break,
                        Ok(Some(LineCmd::Help)) => eprintln!("{}", HELP),
                        Ok(Some(LineCmd::Run(cmd))) => {
                            metrics::counter!("watch_commands_total", 1u64);
                            handle.send(cmd);
                        }
                        Ok(None) => {}
                        Err(msg) => eprintln!("{}", msg),
                    },
                    None => stdin_open = false,
                }
            }
            ev = events.recv() => match ev {
                Ok(MonitorEvent::LoadFailed(msg)) => eprintln!("load failed: {}", msg),
                Ok(MonitorEvent::PageChanged | MonitorEvent::Redraw | MonitorEvent::StatusChanged) => render(&handle.page(), output)?,
                Ok(MonitorEvent::VersionResolved(v)) => eprintln!("{}", v),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "watch: events lagged"),
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = repaint.tick() => {
                if matches!(output, Output::Human) { render(&handle.page(), output)?; }
            }
            _ = signal::ctrl_c() => {
                info!("Ctrl-C received; shutting down watch loop");
                break;
            }
        }
    }
    handle.shutdown();
    let _ = task.await;
    Ok(())
}

const HELP: &str = "commands: n | p | /text | clear | f all|alerted | b 12|24|48 | s <column> [asc|desc] | r | retry | q";

#[derive(Debug, PartialEq)]
enum LineCmd {
    Run(Command),
    Help,
    Quit,
}

fn parse_line(line: &str) -> std::result::Result<Option<LineCmd>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(text) = line.strip_prefix('/') {
        return Ok(Some(LineCmd::Run(Command::SetSearch(text.to_string()))));
    }
    let mut parts = line.split_whitespace();
    let head = parts.next().unwrap_or_default();
    let arg = parts.next();
    let cmd = match (head, arg) {
        ("n" | "next", _) => Command::NextPage,
        ("p" | "prev", _) => Command::PrevPage,
        ("r" | "refresh", _) => Command::Refresh,
        ("retry", _) => Command::RetryConnection,
        ("clear", _) => Command::ClearSearch,
        ("f" | "filter", Some(a)) => Command::ApplyFilter(a.parse().map_err(|e| format!("{}", e))?),
        ("b" | "bucket", Some(a)) => Command::ToggleBucket(a.parse().map_err(|e| format!("{}", e))?),
        ("s" | "sort", Some(a)) => {
            let field: SortField = a.parse().map_err(|e| format!("{}", e))?;
            let dir = match parts.next() {
                Some(d) => Some(d.parse::<SortDirection>().map_err(|e| format!("{}", e))?),
                None => None,
            };
            Command::Sort(field, dir)
        }
        ("q" | "quit" | "exit", _) => return Ok(Some(LineCmd::Quit)),
        ("h" | "help" | "?", _) => return Ok(Some(LineCmd::Help)),
        (other, _) => return Err(format!("unknown command '{}'; {}", other, HELP)),
    };
    Ok(Some(LineCmd::Run(cmd)))
}

fn render(p: &PageView, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            print_rows(&p.rows);
            let flags = if p.is_reconnecting {
                " [reconnecting]"
            } else if p.is_network_disconnected {
                " [offline]"
            } else {
                ""
            };
            println!(
                "page {}/{} · {} tickets (slot {}, table {}) · {}{} · push {} · {}{}",
                p.page_index,
                p.total_pages,
                p.total_count,
                p.total_slot,
                p.total_table,
                p.network_message,
                flags,
                p.push_status,
                p.version_text,
                if p.is_loading { " · loading" } else { "" }
            );
        }
        Output::Json => println!("{}", serde_json::to_string(p)?),
    }
    Ok(())
}

fn print_rows(rows: &[levy_core::Ticket]) {
    println!("{:<14} {:<9} {:<22} {:<6} {:<12} {:<11} {:>16}", "TXN", "PLAYER", "NAME", "TYPE", "LOCATION", "STATUS", "PLAYING");
    for t in rows {
        println!(
            "{:<14} {:<9} {:<22} {:<6} {:<12} {:<11} {:>16}",
            t.transaction_no,
            t.player_id,
            t.full_name.as_deref().unwrap_or("-"),
            t.ticket_type.as_str(),
            t.location.as_deref().unwrap_or("-"),
            t.used_status.as_str(),
            t.formatted_playing_time()
        );
    }
}
