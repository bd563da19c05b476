use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use socks5_collector::{
    init_logger,
    proxy::{
        CandidateSet, CheckerConfig, CrawlerConfig, ProxyChecker, ProxyCrawler, ProxyParser,
        ResultSink, RunReport, DEFAULT_TEST_URL,
    },
    tui::ValidatorApp,
    Config,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of collected proxies shown after a collect-only run
const PREVIEW_LEN: usize = 10;

/// Collect SOCKS5 proxies from public lists and check which ones work
#[derive(Parser)]
#[command(name = "socks5-collector")]
#[command(about = "Collect SOCKS5 proxies from public lists and check which ones work")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect proxies from the source URLs without checking them
    Collect {
        #[command(flatten)]
        sources: SourceArgs,
        /// Output file for collected proxies [default: socks5.txt]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Collect proxies from the source URLs and check which ones work
    Check {
        #[command(flatten)]
        sources: SourceArgs,
        /// Output file for working proxies, truncated first [default: socks5work.txt]
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        check: CheckArgs,
    },
    /// Check the proxies of an existing ip:port list
    Validate {
        /// Input file containing proxies, one ip:port per line
        input: PathBuf,
        /// Output file for working proxies, truncated first [default: socks5work.txt]
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        check: CheckArgs,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// File containing source URLs, one per line [default: socks5list.txt]
    #[arg(short = 'f', long)]
    urls: Option<PathBuf>,
    /// Timeout in seconds for fetching each source
    #[arg(long, default_value_t = 10)]
    fetch_timeout: u64,
    /// Do not pause between sources
    #[arg(long)]
    no_delay: bool,
}

#[derive(Args)]
struct CheckArgs {
    /// Number of concurrent checks
    #[arg(short = 'n', long, default_value_t = 20)]
    concurrency: usize,
    /// Timeout in seconds for each check
    #[arg(long, default_value_t = 5)]
    timeout: u64,
    /// Stop the whole run after this many seconds
    #[arg(long)]
    run_timeout: Option<u64>,
    /// URL requested through each proxy
    #[arg(long, default_value = DEFAULT_TEST_URL)]
    test_url: String,
    /// Also write the full run report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,
    /// Show a live terminal UI
    #[arg(long)]
    tui: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::default();

    let tui = match &cli.command {
        Commands::Check { check, .. } | Commands::Validate { check, .. } => check.tui,
        Commands::Collect { .. } => false,
    };
    init_logger(if tui { "off" } else { "warn" });

    match cli.command {
        Commands::Collect { sources, output } => {
            let candidates = collect(&sources, &config).await?;
            if candidates.is_empty() {
                println!("No SOCKS5 proxies found");
                return Ok(());
            }

            let output = output.unwrap_or(config.collected_output);
            ProxyParser::save_to_file(&candidates, &output)?;
            println!("✓ All found proxies are saved in {}", output.display());

            println!("\nFirst {} found proxies:", PREVIEW_LEN.min(candidates.len()));
            for (i, candidate) in candidates.iter().take(PREVIEW_LEN).enumerate() {
                println!("  {:2}. {}", i + 1, candidate);
            }
            if candidates.len() > PREVIEW_LEN {
                println!("  ... and {} more proxies", candidates.len() - PREVIEW_LEN);
            }
        }
        Commands::Check {
            sources,
            output,
            check,
        } => {
            let candidates = collect(&sources, &config).await?;
            if candidates.is_empty() {
                println!("No SOCKS5 proxies found");
                return Ok(());
            }

            let output = output.unwrap_or(config.working_output);
            validate(&candidates, &output, &check).await?;
        }
        Commands::Validate {
            input,
            output,
            check,
        } => {
            let candidates = ProxyParser::parse_file(&input)
                .with_context(|| format!("cannot read proxy list {}", input.display()))?;
            println!("Loaded {} proxies from {}", candidates.len(), input.display());

            let output = output.unwrap_or(config.working_output);
            validate(&candidates, &output, &check).await?;
        }
    }

    Ok(())
}

/// Crawl every source URL and build the candidate set
async fn collect(args: &SourceArgs, config: &Config) -> Result<CandidateSet> {
    let url_list = args.urls.clone().unwrap_or_else(|| config.url_list.clone());
    println!("Reading URLs from {}...", url_list.display());

    let urls = ProxyCrawler::read_url_list(&url_list)
        .with_context(|| format!("cannot read URL list {}", url_list.display()))?;
    if urls.is_empty() {
        println!("No URLs found to process.");
        return Ok(CandidateSet::new());
    }
    println!("Found {} URLs to process.", urls.len());

    let mut crawler_config =
        CrawlerConfig::new().with_timeout(Duration::from_secs(args.fetch_timeout));
    if args.no_delay {
        crawler_config = crawler_config.without_delay();
    }
    let crawler = ProxyCrawler::with_config(crawler_config)?;

    let (candidates, results) = crawler.crawl_all(&urls).await;
    for (i, result) in results.iter().enumerate() {
        match &result.error {
            None => println!(
                "[{}/{}] {}: found {} proxies",
                i + 1,
                results.len(),
                result.source,
                result.tokens.len()
            ),
            Some(error) => eprintln!(
                "[{}/{}] {}: error: {}",
                i + 1,
                results.len(),
                result.source,
                error
            ),
        }
    }

    println!("\n{} unique proxies found", candidates.len());
    Ok(candidates)
}

/// Check the candidates and record working proxies in `output`
async fn validate(candidates: &CandidateSet, output: &Path, args: &CheckArgs) -> Result<()> {
    if candidates.is_empty() {
        println!("Nothing to check.");
    }

    let mut config = CheckerConfig::new()
        .with_concurrency(args.concurrency)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_test_url(args.test_url.clone());
    if let Some(secs) = args.run_timeout {
        config = config.with_run_timeout(Duration::from_secs(secs));
    }
    let checker = ProxyChecker::with_config(config)?;

    // Ctrl-C cancels the run; what is already saved stays saved.
    let cancel = checker.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let sink = ResultSink::create(output).await?;

    let report = if args.tui {
        ValidatorApp::new(&checker, candidates, &sink).run().await?
    } else {
        println!(
            "\nChecking {} proxies with {} concurrent checks, timeout: {}s",
            candidates.len(),
            checker.config().effective_concurrency(),
            args.timeout
        );
        println!("Test URL: {}", args.test_url);
        println!("Results will be saved in real time to {}\n", output.display());

        checker
            .check_and_record_with(candidates, &sink, |result| {
                if let Some(latency) = result.latency_ms() {
                    println!("✓ Working proxy: {} ({:.0}ms)", result.candidate(), latency);
                }
            })
            .await?
    };

    print_summary(&report, output);

    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("cannot write report {}", path.display()))?;
        println!("Report saved to {}", path.display());
    }

    Ok(())
}

fn print_summary(report: &RunReport, output: &Path) {
    println!("\n{report}");
    if !report.is_complete() {
        println!(
            "Run stopped early: {} of {} proxies were not checked",
            report.total - report.attempted(),
            report.total
        );
    }

    if report.working.is_empty() {
        println!("✗ No working SOCKS5 proxies found");
        return;
    }

    println!(
        "✓ Check complete! {} working SOCKS5 proxies found",
        report.working.len()
    );
    println!("All results saved to {}", output.display());
    println!("\nFinal list of working proxies:");
    for (i, candidate) in report.working.iter().enumerate() {
        println!("  {:2}. {}", i + 1, candidate);
    }
}
