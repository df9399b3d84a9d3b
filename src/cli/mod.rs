//! Command-line interface for stealthdl.
//!
//! Provides commands for downloading a channel, inspecting progress,
//! retrying failed items, pausing a running session, and showing the
//! resolved configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use crate::adapters::{FetchOptions, YtDlpCatalog, YtDlpFetcher};
use crate::config::{load_config, ResolvedConfig};
use crate::control::{cancel_on_ctrl_c, watch_pause_sentinel, write_pause_sentinel};
use crate::core::{
    CorruptionPolicy, DelayScheduler, Preset, ProfileOverrides, ProgressStore, SessionOptions,
    SessionOrchestrator, SessionReport, StealthProfile, EXIT_INTERRUPTED,
};
use crate::domain::{ItemFilter, SessionOutcome};

/// stealthdl - Slow, resumable, quota-aware channel audio downloader
#[derive(Parser, Debug)]
#[command(name = "stealthdl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output directory (progress file and downloads live here)
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download a channel or playlist
    Run {
        /// Channel or playlist URL
        url: String,

        #[command(flatten)]
        pacing: PacingArgs,

        /// Maximum number of listed items to consider
        #[arg(long)]
        limit: Option<usize>,

        /// Only items uploaded in the last N days
        #[arg(long)]
        days: Option<u32>,

        /// Oldest first
        #[arg(long)]
        reverse: bool,
    },

    /// Show download statistics
    Stats,

    /// Retry failed items that still have attempts left
    RetryFailed {
        #[command(flatten)]
        pacing: PacingArgs,
    },

    /// Ask a running session to stop after the current step
    Pause,

    /// Show resolved configuration (debug)
    Config,
}

/// Flags shared by the commands that download
#[derive(clap::Args, Debug, Default)]
pub struct PacingArgs {
    /// Stealth preset
    #[arg(long, value_enum)]
    pub stealth: Option<StealthLevel>,

    /// Minimum wait between downloads (seconds)
    #[arg(long)]
    pub min_wait: Option<u64>,

    /// Maximum wait between downloads (seconds)
    #[arg(long)]
    pub max_wait: Option<u64>,

    /// Successful downloads allowed per day
    #[arg(long)]
    pub daily_limit: Option<u32>,

    /// Attempts allowed per item across sessions
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Audio quality in kbps
    #[arg(short, long)]
    pub quality: Option<String>,

    /// Proxy URL for yt-dlp (e.g. socks5://127.0.0.1:9050)
    #[arg(long)]
    pub proxy: Option<String>,

    /// Move a corrupt progress file aside instead of aborting
    #[arg(long)]
    pub reset_corrupt_state: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StealthLevel {
    Low,
    Medium,
    High,
    Paranoid,
}

impl From<StealthLevel> for Preset {
    fn from(level: StealthLevel) -> Self {
        match level {
            StealthLevel::Low => Preset::Low,
            StealthLevel::Medium => Preset::Medium,
            StealthLevel::High => Preset::High,
            StealthLevel::Paranoid => Preset::Paranoid,
        }
    }
}

impl Cli {
    /// Execute the CLI command, returning the process exit status
    pub async fn execute(self) -> Result<u8> {
        let config = load_config()?;
        let output = self.output.unwrap_or_else(|| config.output_dir.clone());

        match self.command {
            Commands::Run {
                url,
                pacing,
                limit,
                days,
                reverse,
            } => {
                let filter = ItemFilter { days, reverse };
                run_channel(&config, &output, &url, &pacing, limit, filter).await
            }
            Commands::Stats => show_stats(&output),
            Commands::RetryFailed { pacing } => retry_failed(&config, &output, &pacing).await,
            Commands::Pause => pause(&output),
            Commands::Config => show_config(&config, &output),
        }
    }
}

/// Resolve the stealth profile: preset, then file overrides, then flags
fn build_profile(config: &ResolvedConfig, pacing: &PacingArgs) -> StealthProfile {
    let preset = pacing.stealth.map(Preset::from).unwrap_or(config.profile);
    let flags = ProfileOverrides {
        min_wait: pacing.min_wait,
        max_wait: pacing.max_wait,
        daily_limit: pacing.daily_limit,
    };
    StealthProfile::preset(preset).with_overrides(&config.overrides.merged(&flags))
}

fn build_orchestrator(
    config: &ResolvedConfig,
    output: &Path,
    pacing: &PacingArgs,
    limit: Option<usize>,
    filter: ItemFilter,
) -> Result<SessionOrchestrator> {
    let profile = build_profile(config, pacing);
    let scheduler = DelayScheduler::new(profile).context("Invalid stealth profile")?;

    let policy = if pacing.reset_corrupt_state {
        CorruptionPolicy::BackupAndReset
    } else {
        CorruptionPolicy::Abort
    };
    let store = ProgressStore::open(output, policy)
        .with_context(|| format!("Failed to open progress store in {}", output.display()))?;

    let options = SessionOptions {
        max_retries: pacing.max_retries.unwrap_or(config.max_retries),
        limit,
        filter,
        destination: output.to_path_buf(),
        fetch_options: FetchOptions {
            quality: pacing
                .quality
                .clone()
                .unwrap_or_else(|| config.ytdlp.quality.clone()),
        },
    };

    let mut ytdlp = config.ytdlp.clone();
    if let Some(proxy) = &pacing.proxy {
        ytdlp.proxy = Some(proxy.clone());
    }

    Ok(SessionOrchestrator::new(
        store,
        scheduler,
        Arc::new(YtDlpCatalog::new(ytdlp.clone())),
        Arc::new(YtDlpFetcher::new(ytdlp)),
        options,
    ))
}

fn print_profile(profile: &StealthProfile) {
    eprintln!("Stealth profile: {}", profile.name);
    eprintln!("  Wait:        {}-{}s", profile.min_wait, profile.max_wait);
    eprintln!("  Daily limit: {}", profile.daily_limit);
    if let Some(night) = profile.night_hours {
        eprintln!("  Night hours: {}", night);
    }
    if let Some(work) = profile.work_hours {
        eprintln!("  Work hours:  {}", work);
    }
}

fn print_report(report: &SessionReport) {
    eprintln!();
    eprintln!("{}", report.summary);
    match report.outcome() {
        SessionOutcome::Stopped => eprintln!("\nStopped. Run the same command again to resume."),
        SessionOutcome::QuotaExhausted => eprintln!("\nDaily limit reached. Resume tomorrow."),
        SessionOutcome::Completed => {}
    }
}

async fn run_channel(
    config: &ResolvedConfig,
    output: &Path,
    url: &str,
    pacing: &PacingArgs,
    limit: Option<usize>,
    filter: ItemFilter,
) -> Result<u8> {
    let mut orchestrator = build_orchestrator(config, output, pacing, limit, filter)?;
    print_profile(&build_profile(config, pacing));

    let token = CancellationToken::new();
    let signal = cancel_on_ctrl_c(token.clone());
    let _pause = watch_pause_sentinel(output, token.clone())
        .context("Failed to watch for pause requests")?;

    let result = orchestrator.run(url, &token).await;
    signal.abort();

    let report = result?;
    print_report(&report);
    Ok(report.exit_code())
}

async fn retry_failed(config: &ResolvedConfig, output: &Path, pacing: &PacingArgs) -> Result<u8> {
    let mut orchestrator = build_orchestrator(config, output, pacing, None, ItemFilter::default())?;

    let token = CancellationToken::new();
    let signal = cancel_on_ctrl_c(token.clone());
    let _pause = watch_pause_sentinel(output, token.clone())
        .context("Failed to watch for pause requests")?;

    let result = orchestrator.retry_failed(&token).await;
    signal.abort();

    let report = result?;
    print_report(&report);
    Ok(match report.outcome() {
        SessionOutcome::Stopped => EXIT_INTERRUPTED,
        _ => 0,
    })
}

fn show_stats(output: &Path) -> Result<u8> {
    let path = ProgressStore::path_in(output);
    if !path.exists() {
        println!("No progress found in {}", output.display());
        return Ok(0);
    }

    let state = ProgressStore::load(&path)?;
    let summary = state.summary();

    println!("Download statistics ({})", output.display());
    println!("{}", "-".repeat(40));
    println!("Downloaded:        {}", summary.downloaded);
    println!("Failed (retrying): {}", summary.failed_transient);
    println!("Failed (final):    {}", summary.failed_permanent);
    println!("Pending:           {}", summary.pending);
    println!("Channels:          {}", summary.channels);
    println!("Sessions:          {}", summary.total_sessions);

    if !summary.recent_days.is_empty() {
        println!("\nRecent days:");
        for (date, count) in &summary.recent_days {
            println!("  {}  {}", date, count);
        }
    }

    if !summary.recent_sessions.is_empty() {
        println!("\nRecent sessions:");
        println!(
            "  {:<10} {:<17} {:<16} {:>4} {:>4} {:>4}",
            "ID", "STARTED", "OUTCOME", "OK", "FAIL", "SKIP"
        );
        for session in &summary.recent_sessions {
            println!(
                "  {:<10} {:<17} {:<16} {:>4} {:>4} {:>4}",
                session.id,
                session.started_at.format("%Y-%m-%d %H:%M"),
                session.outcome.to_string(),
                session.downloaded,
                session.failed,
                session.skipped
            );
        }
    }

    Ok(0)
}

fn pause(output: &Path) -> Result<u8> {
    let path = write_pause_sentinel(output)
        .with_context(|| format!("Failed to write pause request in {}", output.display()))?;
    println!("Pause requested ({})", path.display());
    Ok(0)
}

fn show_config(config: &ResolvedConfig, output: &Path) -> Result<u8> {
    println!("stealthdl configuration");
    println!("{}", "-".repeat(40));
    match &config.config_file {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none, using defaults)"),
    }
    println!("Output:      {}", output.display());
    println!();

    let yaml = serde_yaml::to_string(config).context("Failed to render configuration")?;
    print!("{}", yaml);

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "stealthdl",
            "run",
            "https://www.youtube.com/@someone",
            "--stealth",
            "paranoid",
            "--limit",
            "5",
            "--min-wait",
            "60",
            "--proxy",
            "socks5://127.0.0.1:9050",
            "-o",
            "/tmp/out",
        ])
        .unwrap();

        assert_eq!(cli.output, Some(PathBuf::from("/tmp/out")));
        match cli.command {
            Commands::Run {
                url, pacing, limit, ..
            } => {
                assert_eq!(url, "https://www.youtube.com/@someone");
                assert_eq!(limit, Some(5));
                assert!(matches!(pacing.stealth, Some(StealthLevel::Paranoid)));
                assert_eq!(pacing.min_wait, Some(60));
                assert_eq!(pacing.proxy.as_deref(), Some("socks5://127.0.0.1:9050"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_flags_override_file_overrides() {
        let config = ResolvedConfig {
            overrides: ProfileOverrides {
                min_wait: Some(900),
                max_wait: Some(1000),
                daily_limit: None,
            },
            ..ResolvedConfig::default()
        };
        let pacing = PacingArgs {
            stealth: Some(StealthLevel::Low),
            max_wait: Some(5000),
            ..PacingArgs::default()
        };

        let profile = build_profile(&config, &pacing);
        assert_eq!(profile.name, "low");
        assert_eq!(profile.min_wait, 900);
        assert_eq!(profile.max_wait, 5000);
        assert_eq!(profile.daily_limit, 50);
    }
}
