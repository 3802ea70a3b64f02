//! Robin×SMESH CLI
//!
//! Dark web search and scrape over Tor, with live progress.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use robin_core::{
    DedupOrder, EngineCatalog, ProgressEvent, ProgressSink, ProgressStatus, ProgressStream,
    DEFAULT_MAX_SCRAPE_CHARS, DEFAULT_SCRAPE_WORKERS, DEFAULT_SEARCH_WORKERS,
};
use robin_tor::{
    check_engines, probe_proxy, Gateway, OrchestratorError, ScrapeConfig, ScrapeOrchestrator,
    ScrapeRun, SearchConfig, SearchOrchestrator, SearchRun, TorConfig, TorGateway,
};

#[derive(Parser)]
#[command(name = "robin-smesh")]
#[command(author, version, about = "Robin×SMESH: Dark Web OSINT over Tor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3), RUST_LOG takes precedence
    #[arg(short, long, default_value = "1", global = true)]
    verbose: u8,

    #[command(flatten)]
    tor: TorArgs,
}

#[derive(Args)]
struct TorArgs {
    /// Tor SOCKS proxy host
    #[arg(long, env = "PROXY_HOST", default_value = "127.0.0.1", global = true)]
    proxy_host: String,

    /// Tor SOCKS proxy port
    #[arg(long, env = "PROXY_PORT", default_value_t = 9050, global = true)]
    proxy_port: u16,

    /// Connect attempts before the proxy is declared unreachable
    #[arg(long, env = "PROXY_PROBE_ATTEMPTS", default_value_t = 60, global = true)]
    probe_attempts: u32,
}

impl TorArgs {
    fn config(&self) -> TorConfig {
        TorConfig {
            probe_attempts: self.probe_attempts,
            ..TorConfig::new(self.proxy_host.clone(), self.proxy_port)
        }
    }

    fn gateway(&self) -> Result<Arc<dyn Gateway>, OrchestratorError> {
        let gateway = TorGateway::new(self.config()).map_err(OrchestratorError::Gateway)?;
        Ok(Arc::new(gateway))
    }
}

#[derive(Args)]
struct SearchArgs {
    /// Concurrent search workers
    #[arg(long, env = "MAX_SEARCH_WORKERS", default_value_t = DEFAULT_SEARCH_WORKERS)]
    search_workers: usize,

    /// Per-request search timeout in seconds
    #[arg(long, env = "SEARCH_TIMEOUT", default_value_t = 30)]
    search_timeout: u64,

    /// Skip an engine by name (repeatable)
    #[arg(long = "disable-engine", value_name = "NAME")]
    disable_engine: Vec<String>,

    /// Stop once this many unique results are found (0 = never)
    #[arg(long, default_value_t = 20)]
    early_exit: usize,

    /// Break duplicate ties by catalog order instead of completion order
    #[arg(long)]
    catalog_order: bool,

    /// Seed for retry jitter
    #[arg(long)]
    seed: Option<u64>,
}

impl SearchArgs {
    fn config(&self) -> SearchConfig {
        SearchConfig {
            max_workers: self.search_workers,
            request_timeout: Duration::from_secs(self.search_timeout),
            early_exit_results: Some(self.early_exit).filter(|n| *n > 0),
            dedup_order: if self.catalog_order {
                DedupOrder::Catalog
            } else {
                DedupOrder::Completion
            },
            rng_seed: self.seed,
            ..Default::default()
        }
    }

    fn catalog(&self) -> EngineCatalog {
        EngineCatalog::builtin().without(&self.disable_engine)
    }
}

#[derive(Args)]
struct ScrapeArgs {
    /// Concurrent scrape workers
    #[arg(long, env = "MAX_SCRAPE_WORKERS", default_value_t = DEFAULT_SCRAPE_WORKERS)]
    scrape_workers: usize,

    /// Per-request scrape timeout in seconds
    #[arg(long, env = "SCRAPE_TIMEOUT", default_value_t = 45)]
    scrape_timeout: u64,

    /// Characters kept per scraped page
    #[arg(long, env = "MAX_SCRAPE_CHARS", default_value_t = DEFAULT_MAX_SCRAPE_CHARS)]
    max_chars: usize,
}

impl ScrapeArgs {
    fn config(&self, seed: Option<u64>) -> ScrapeConfig {
        ScrapeConfig {
            max_workers: self.scrape_workers,
            request_timeout: Duration::from_secs(self.scrape_timeout),
            max_chars: self.max_chars,
            rng_seed: seed,
            ..Default::default()
        }
    }
}

#[derive(Args)]
struct OutputArgs {
    /// Stream progress events as JSON lines on stdout
    #[arg(long)]
    json_events: bool,

    /// Output file (default: results_<timestamp>.json)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Search every enabled engine
    Search {
        /// The search query
        #[arg(short, long)]
        query: String,

        #[command(flatten)]
        search: SearchArgs,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Fetch page content for the given URLs
    Scrape {
        /// URLs to scrape
        #[arg(required = true)]
        urls: Vec<String>,

        /// Seed for retry jitter
        #[arg(long)]
        seed: Option<u64>,

        #[command(flatten)]
        scrape: ScrapeArgs,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Search, then scrape the top results
    Run {
        /// The search query
        #[arg(short, long)]
        query: String,

        /// Number of results to scrape
        #[arg(long, default_value_t = 10)]
        top: usize,

        #[command(flatten)]
        search: SearchArgs,

        #[command(flatten)]
        scrape: ScrapeArgs,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Check Tor connection status
    Status,

    /// List search engines
    Engines {
        /// Ping every enabled engine through Tor
        #[arg(long)]
        ping: bool,

        /// Per-engine ping timeout in seconds
        #[arg(long, default_value_t = 20)]
        timeout: u64,

        /// Concurrent pings
        #[arg(long, default_value_t = DEFAULT_SEARCH_WORKERS)]
        concurrency: usize,

        /// Skip an engine by name (repeatable)
        #[arg(long = "disable-engine", value_name = "NAME")]
        disable_engine: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(log_level).into())
        .from_env_lossy();

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let result = match cli.command {
        Commands::Search { query, search, out } => run_search(&cli.tor, &query, &search, &out).await,
        Commands::Scrape {
            urls,
            seed,
            scrape,
            out,
        } => run_scrape(&cli.tor, &urls, &scrape, seed, &out).await,
        Commands::Run {
            query,
            top,
            search,
            scrape,
            out,
        } => run_investigation(&cli.tor, &query, top, &search, &scrape, &out).await,
        Commands::Status => check_status(&cli.tor).await,
        Commands::Engines {
            ping,
            timeout,
            concurrency,
            disable_engine,
        } => list_engines(&cli.tor, ping, timeout, concurrency, &disable_engine).await,
    };

    if let Err(e) = &result {
        if let Some(OrchestratorError::ProxyUnavailable(endpoint)) = e.downcast_ref::<OrchestratorError>() {
            print_tor_help(endpoint);
        }
    }
    result
}

async fn run_search(tor: &TorArgs, query: &str, args: &SearchArgs, out: &OutputArgs) -> Result<()> {
    let orchestrator = SearchOrchestrator::new(tor.gateway()?, args.catalog(), args.config())?;

    if !out.json_events {
        println!("🕵️ Robin×SMESH - Dark Web Search\n");
        println!("🔍 Query: {}", query);
        println!("🌐 Engines: {}\n", orchestrator.catalog().all().len());
    }

    let run = search_with_progress(&orchestrator, query, out.json_events).await?;
    if !out.json_events {
        print_search_summary(&run);
    }
    save_output(&out.output, &run)
}

async fn run_scrape(
    tor: &TorArgs,
    urls: &[String],
    args: &ScrapeArgs,
    seed: Option<u64>,
    out: &OutputArgs,
) -> Result<()> {
    let orchestrator = ScrapeOrchestrator::new(tor.gateway()?, args.config(seed))?;

    if !out.json_events {
        println!("🕵️ Robin×SMESH - Dark Web Scrape\n");
    }

    let run = scrape_with_progress(&orchestrator, urls, out.json_events).await?;
    if !out.json_events {
        print_scrape_summary(&run);
    }
    save_output(&out.output, &run)
}

/// Search results and scraped content, as handed to downstream analysis
#[derive(Serialize)]
struct Investigation<'a> {
    search: &'a SearchRun,
    scrape: &'a ScrapeRun,
}

async fn run_investigation(
    tor: &TorArgs,
    query: &str,
    top: usize,
    search_args: &SearchArgs,
    scrape_args: &ScrapeArgs,
    out: &OutputArgs,
) -> Result<()> {
    let gateway = tor.gateway()?;
    let searcher = SearchOrchestrator::new(Arc::clone(&gateway), search_args.catalog(), search_args.config())?;
    let scraper = ScrapeOrchestrator::new(gateway, scrape_args.config(search_args.seed))?;

    if !out.json_events {
        println!("🕵️ Robin×SMESH - Dark Web Investigation\n");
        println!("🔍 Query: {}", query);
        println!("📄 Scraping top {} results\n", top);
    }

    let search = search_with_progress(&searcher, query, out.json_events).await?;
    if !out.json_events {
        print_search_summary(&search);
    }

    let urls: Vec<String> = search.results.iter().take(top).map(|r| r.url.clone()).collect();
    let scrape = scrape_with_progress(&scraper, &urls, out.json_events).await?;
    if !out.json_events {
        print_scrape_summary(&scrape);
    }

    save_output(
        &out.output,
        &Investigation {
            search: &search,
            scrape: &scrape,
        },
    )
}

async fn search_with_progress(orchestrator: &SearchOrchestrator, query: &str, json: bool) -> Result<SearchRun> {
    let (sink, stream) = ProgressSink::channel();
    let printer = spawn_printer(stream, json);
    let run = orchestrator.search(query, &sink).await;
    drop(sink);
    printer.await?;
    Ok(run?)
}

async fn scrape_with_progress(orchestrator: &ScrapeOrchestrator, urls: &[String], json: bool) -> Result<ScrapeRun> {
    let (sink, stream) = ProgressSink::channel();
    let printer = spawn_printer(stream, json);
    let run = orchestrator.scrape(urls, &sink).await;
    drop(sink);
    printer.await?;
    Ok(run?)
}

fn spawn_printer(mut stream: ProgressStream, json: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            if json {
                println!("{}", event.to_json());
            } else {
                print_event(&event);
            }
        }
    })
}

fn print_event(event: &ProgressEvent) {
    let progress = format!("[{}/{}]", event.completed_engines, event.total_engines);
    match event.status {
        ProgressStatus::Starting => println!("🚀 {}", event.message),
        ProgressStatus::Searching => println!("🔄 {} {}: {}", progress, event.engine_name, event.message),
        ProgressStatus::Success => println!("✅ {} {}: {}", progress, event.engine_name, event.message),
        ProgressStatus::Failed => println!("❌ {} {}: {}", progress, event.engine_name, event.message),
        ProgressStatus::Timeout => println!("⏱️  {} {}: {}", progress, event.engine_name, event.message),
        ProgressStatus::EarlyExit => println!("🏁 {}", event.message),
        ProgressStatus::HighFailureRate => println!("⚠️  {}", event.message),
        ProgressStatus::Complete => println!("📊 {}\n", event.message),
    }
}

fn print_search_summary(run: &SearchRun) {
    println!(
        "✅ {} succeeded | ❌ {} failed | ⏭️  {} skipped | ⏱️  {:.1}s",
        run.succeeded(),
        run.failed(),
        run.skipped(),
        run.elapsed.as_secs_f64()
    );

    if run.results.is_empty() {
        println!("\n⚠️  No results found.");
        return;
    }

    println!("\n{}", "=".repeat(60));
    for (i, result) in run.results.iter().take(20).enumerate() {
        println!("{:>3}. {} [{}]", i + 1, result.title, result.engine);
        println!("     {}", result.url);
    }
    if run.results.len() > 20 {
        println!("...\n[{} more - see output file]", run.results.len() - 20);
    }
    println!();
}

fn print_scrape_summary(run: &ScrapeRun) {
    println!(
        "✅ {} scraped | ❌ {} failed | ⏱️  {:.1}s",
        run.succeeded(),
        run.failed(),
        run.elapsed.as_secs_f64()
    );

    for (url, outcome) in &run.outcomes {
        if outcome.is_ok() {
            let preview: String = outcome.content.chars().take(120).collect();
            println!("\n📄 {}\n   {}", url, preview);
        } else {
            println!("\n❌ {}\n   {}", url, outcome.error.as_deref().unwrap_or("unknown error"));
        }
    }
    println!();
}

fn save_output<T: Serialize>(output: &Option<PathBuf>, value: &T) -> Result<()> {
    let output_path = output.clone().unwrap_or_else(|| {
        let timestamp = chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S");
        PathBuf::from(format!("results_{}.json", timestamp))
    });

    fs::write(&output_path, serde_json::to_string_pretty(value)?)?;
    eprintln!("💾 Results saved to: {}", output_path.display());
    Ok(())
}

async fn check_status(tor: &TorArgs) -> Result<()> {
    println!("🔌 Checking Tor connection...\n");

    let config = tor.config();
    let report = probe_proxy(&config).await;

    if report.reachable {
        println!("✅ Tor is running and accessible");
        println!("   Proxy: {}", config.endpoint());
        if let Some(latency) = report.latency {
            println!("   Connect latency: {:.1}ms", latency.as_secs_f64() * 1000.0);
        }
        Ok(())
    } else {
        Err(OrchestratorError::ProxyUnavailable(config.endpoint()).into())
    }
}

async fn list_engines(
    tor: &TorArgs,
    ping: bool,
    timeout: u64,
    concurrency: usize,
    disabled: &[String],
) -> Result<()> {
    let catalog = EngineCatalog::builtin().without(disabled);

    if !ping {
        for name in catalog.names() {
            let status = match catalog.get(name) {
                Some(engine) if engine.enabled => engine.parser_kind(),
                _ => "disabled",
            };
            println!("  {:<14} {}", name, status);
        }
        println!("\n{} of {} engines enabled", catalog.all().len(), catalog.len());
        return Ok(());
    }

    println!("📡 Pinging {} engines through Tor...\n", catalog.all().len());
    let health = check_engines(tor.gateway()?, &catalog, concurrency, Duration::from_secs(timeout)).await?;

    for engine in &health {
        match (engine.up, engine.latency) {
            (true, Some(latency)) => println!("✅ {:<14} {:.1}s", engine.name, latency.as_secs_f64()),
            (true, None) => println!("✅ {:<14}", engine.name),
            (false, _) => println!(
                "❌ {:<14} {}",
                engine.name,
                engine.error.as_deref().unwrap_or("unreachable")
            ),
        }
    }
    let up = health.iter().filter(|h| h.up).count();
    println!("\n📊 {}/{} engines reachable", up, health.len());
    Ok(())
}

fn print_tor_help(endpoint: &str) {
    eprintln!("❌ Tor is not accessible");
    eprintln!("   Expected proxy at: {}", endpoint);
    eprintln!("\n   To install Tor:");
    eprintln!("   - Linux: sudo apt install tor");
    eprintln!("   - Mac: brew install tor");
    eprintln!("   - Then start: sudo systemctl start tor (or brew services start tor)");
}
