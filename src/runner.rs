use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::{Cli, Commands, ScanOptions};
use webrecon::engine::{FileStore, Orchestrator, ProbeStageRunner};
use webrecon::output::{format_text_report, print_summary, write_csv, write_jsonl};
use webrecon::utils::{ensure_dir, normalize_domain};
use webrecon::ScanConfig;

fn print_banner() {
    println!(r#"
                 _
 __      _____  | |__  _ __ ___  ___ ___  _ __
 \ \ /\ / / _ \ | '_ \| '__/ _ \/ __/ _ \| '_ \
  \ V  V /  __/ | |_) | | |  __/ (_| (_) | | | |
   \_/\_/ \___| |_.__/|_|  \___|\___\___/|_| |_|

              Website Security Reconnaissance v{}
    "#, env!("CARGO_PKG_VERSION"));
}

pub async fn run_from_cli(cli: Cli) -> anyhow::Result<()> {
    // Our crate follows the global flags; resolver and HTTP internals stay quiet.
    use tracing_subscriber::EnvFilter;
    let crate_level = if cli.debug { "debug" } else if cli.verbose { "info" } else { "warn" };
    let filter_str = format!(
        "webrecon={crate},reqwest=info,hyper=info,h2=info,hickory_proto=warn,hickory_resolver=warn",
        crate = crate_level
    );
    let env_filter = EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new(crate_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(true)
        .with_target(false)
        .init();

    let store = Arc::new(FileStore::new(&cli.store));

    match cli.command {
        Commands::Scan { domain, out, options } => {
            let domain = normalize_domain(&domain)
                .with_context(|| format!("'{}' is not a valid domain", domain))?;
            let orchestrator = orchestrator(store, &options)?;
            let id = new_scan_id(&domain);
            orchestrator.create_scan(&id, &domain).await?;

            print_banner();
            println!("[>] Target: {}", domain);
            println!("[>] Scan: {}", id);
            println!("\n{}\n", "-".repeat(60));

            run_scan(&orchestrator, &id, &out).await?;
        }
        Commands::Create { domain, id } => {
            let domain = normalize_domain(&domain)
                .with_context(|| format!("'{}' is not a valid domain", domain))?;
            let id = id.unwrap_or_else(|| new_scan_id(&domain));
            let orchestrator = orchestrator(store, &ScanOptions::default())?;
            orchestrator.create_scan(&id, &domain).await?;
            println!("{}", id);
        }
        Commands::Advance { scan_id, options } => {
            let orchestrator = orchestrator(store, &options)?;
            let outcome = orchestrator.advance_scan(&scan_id).await?;
            println!("{}", serde_json::to_string(&outcome)?);
        }
        Commands::Findings { scan_id } => {
            let orchestrator = orchestrator(store, &ScanOptions::default())?;
            for finding in orchestrator.get_findings(&scan_id).await? {
                println!("{}", serde_json::to_string(&finding)?);
            }
        }
        Commands::Cancel { scan_id } => {
            let orchestrator = orchestrator(store, &ScanOptions::default())?;
            if orchestrator.cancel_scan(&scan_id).await? {
                println!("[·] Scan {} cancelled", scan_id);
            } else {
                println!("[·] Scan {} had already finished", scan_id);
            }
        }
    }
    Ok(())
}

fn load_config(options: &ScanOptions) -> anyhow::Result<ScanConfig> {
    let mut config = match &options.config {
        Some(path) => ScanConfig::from_file(path)?,
        None => ScanConfig::default(),
    };
    if let Some(max_pages) = options.max_pages {
        config.max_pages = max_pages;
    }
    if let Some(delay) = options.delay_ms {
        config.request_delay_ms = delay;
    }
    if let Some(concurrency) = options.concurrency {
        config.probe_concurrency = concurrency;
    }
    if let Some(timeout) = options.timeout {
        config.request_timeout_secs = timeout;
    }
    Ok(config.validate())
}

fn orchestrator(store: Arc<FileStore>, options: &ScanOptions) -> anyhow::Result<Orchestrator> {
    let config = Arc::new(load_config(options)?);
    tracing::debug!(?config, "scan configuration");
    Ok(Orchestrator::new(store, Arc::new(ProbeStageRunner::new(config))))
}

fn new_scan_id(domain: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!(
        "{}-{}-{}",
        domain.replace('.', "-"),
        chrono::Utc::now().format("%Y%m%d%H%M%S"),
        suffix
    )
}

async fn run_scan(orchestrator: &Orchestrator, id: &str, out: &Path) -> anyhow::Result<()> {
    let scan_start = std::time::Instant::now();
    let progress = ProgressBar::new(100);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("=>-"),
    );

    loop {
        let outcome = orchestrator.advance_scan(id).await?;
        progress.set_position(outcome.progress as u64);
        progress.set_message(outcome.stage.to_string());
        if outcome.completed {
            break;
        }
    }
    progress.finish_and_clear();

    let Some(state) = orchestrator.load_state(id).await? else {
        bail!("scan {} vanished from the store", id);
    };
    let findings = orchestrator.get_findings(id).await?;

    let out_dir: PathBuf = out.join(id);
    ensure_dir(&out_dir)?;
    write_jsonl(&out_dir.join("findings.jsonl"), &findings)?;
    write_csv(&out_dir.join("findings.csv"), &findings)?;
    std::fs::write(out_dir.join("report.txt"), format_text_report(&state, &findings))
        .with_context(|| format!("writing report to {}", out_dir.display()))?;

    print_summary(&state, &findings);
    println!("[✓] Scan finished in {:.1}s", scan_start.elapsed().as_secs_f64());
    println!("[·] Results: {}", out_dir.display());
    Ok(())
}
