//! yt-dlp adapters.
//!
//! Both adapters shell out to the `yt-dlp` binary. The catalog uses flat
//! playlist extraction (one JSON object per line, no per-item requests);
//! the fetcher extracts mp3 audio with throttling flags and a rotating
//! user agent, stepping down the audio quality when a conversion fails.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{
    Catalog, CatalogError, FetchError, FetchErrorKind, FetchOptions, FetchOutput, Fetcher,
};
use crate::core::{classify, strip_item_prefix, Disposition};
use crate::domain::{ItemFilter, MediaItem};

/// Browser user agents rotated per request
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
];

/// Length of a valid video id
const VIDEO_ID_LEN: usize = 11;

/// Qualities tried after the requested one fails
const FALLBACK_QUALITIES: &[&str] = &["192", "128", "96"];

/// Pause between quality fallbacks, seconds
const FALLBACK_PAUSE_SECS: (f64, f64) = (5.0, 15.0);

fn default_binary() -> String {
    "yt-dlp".to_string()
}

fn default_quality() -> String {
    "192".to_string()
}

/// yt-dlp invocation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YtDlpConfig {
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Audio quality in kbps
    #[serde(default = "default_quality")]
    pub quality: String,

    #[serde(default)]
    pub ffmpeg_location: Option<PathBuf>,

    /// Netscape-format cookies file
    #[serde(default)]
    pub cookies: Option<PathBuf>,

    /// Proxy URL handed to `--proxy`
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            quality: default_quality(),
            ffmpeg_location: None,
            cookies: None,
            proxy: None,
        }
    }
}

impl YtDlpConfig {
    fn common_args<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<String> {
        let mut args = vec![
            "--no-warnings".to_string(),
            "--user-agent".to_string(),
            random_user_agent(rng).to_string(),
        ];
        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.display().to_string());
        }
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        args
    }
}

/// Pick a user agent
pub fn random_user_agent<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    USER_AGENTS.choose(rng).copied().unwrap_or(USER_AGENTS[0])
}

/// Requested quality first, then the fallbacks, without repeats
pub fn quality_chain(requested: &str) -> Vec<String> {
    let mut chain = vec![requested.to_string()];
    for quality in FALLBACK_QUALITIES {
        if !chain.iter().any(|q| q == quality) {
            chain.push(quality.to_string());
        }
    }
    chain
}

/// Whether a failed fetch is worth repeating at a lower quality
fn worth_downgrading(err: &FetchError) -> bool {
    err.kind != FetchErrorKind::RateLimited && classify(err) == Disposition::Transient
}

/// Handle URLs list the uploads tab, not the channel home page
pub fn channel_videos_url(source: &str) -> String {
    if source.contains('@') && !source.contains("/videos") {
        format!("{}/videos", source.trim_end_matches('/'))
    } else {
        source.to_string()
    }
}

/// One line of `--flat-playlist --dump-json` output
#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    timestamp: Option<i64>,
}

fn is_video_id(id: &str) -> bool {
    id.chars().count() == VIDEO_ID_LEN && !id.starts_with("UC")
}

/// Parse flat playlist output into items, dropping malformed entries,
/// channel/playlist ids and (with `days`) entries uploaded before the cutoff
pub fn parse_flat_entries(output: &str, filter: &ItemFilter, now: DateTime<Utc>) -> Vec<MediaItem> {
    let cutoff = filter.days.map(|days| now - Duration::days(i64::from(days)));
    let mut items = Vec::new();
    let mut invalid = 0usize;
    let mut too_old = 0usize;

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let entry: FlatEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(_) => {
                invalid += 1;
                continue;
            }
        };

        let id = match entry.id {
            Some(id) if is_video_id(&id) => id,
            other => {
                debug!(id = ?other, "Skipping entry without a video id");
                invalid += 1;
                continue;
            }
        };

        let uploaded_at = entry
            .timestamp
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));

        if let (Some(cutoff), Some(uploaded)) = (cutoff, uploaded_at) {
            if uploaded < cutoff {
                too_old += 1;
                continue;
            }
        }

        let source = entry
            .url
            .filter(|u| u.starts_with("http"))
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", id));
        let title = entry.title.unwrap_or_else(|| id.clone());

        let mut item = MediaItem::new(id, title, source);
        if let Some(duration) = entry.duration.filter(|d| *d >= 0.0) {
            item = item.with_duration(duration as u64);
        }
        if let Some(uploaded) = uploaded_at {
            item = item.with_uploaded_at(uploaded);
        }
        items.push(item);
    }

    if invalid > 0 || too_old > 0 {
        debug!(invalid, too_old, kept = items.len(), "Filtered catalog entries");
    }

    if filter.reverse {
        items.reverse();
    }

    items
}

/// Lists channel uploads with `yt-dlp --flat-playlist`
pub struct YtDlpCatalog {
    config: YtDlpConfig,
}

impl YtDlpCatalog {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Catalog for YtDlpCatalog {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn list_items(
        &self,
        source: &str,
        filter: &ItemFilter,
    ) -> Result<Vec<MediaItem>, CatalogError> {
        let url = channel_videos_url(source);
        let mut args = vec!["--flat-playlist".to_string(), "--dump-json".to_string()];
        args.extend(self.config.common_args(&mut rand::thread_rng()));
        args.push(url.clone());

        debug!(%url, "Listing channel");
        let output = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stdout.trim().is_empty() {
                return Err(CatalogError::Tool(error_line(&stderr)));
            }
            warn!(error = %error_line(&stderr), "yt-dlp listing finished with errors");
        }

        Ok(parse_flat_entries(&stdout, filter, Utc::now()))
    }
}

/// Downloads one item as mp3 audio
pub struct YtDlpFetcher {
    config: YtDlpConfig,
}

impl YtDlpFetcher {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    /// Full argument list for one download
    pub fn fetch_args<R: Rng + ?Sized>(
        &self,
        item: &MediaItem,
        destination: &Path,
        options: &FetchOptions,
        rng: &mut R,
    ) -> Vec<String> {
        let template = destination.join("%(title)s.%(ext)s");
        let mut args: Vec<String> = [
            "-f",
            "bestaudio/best",
            "--extract-audio",
            "--audio-format",
            "mp3",
            "--audio-quality",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(format!("{}K", options.quality));
        args.extend(
            [
                "--restrict-filenames",
                "--retries",
                "3",
                "--fragment-retries",
                "3",
                "--skip-unavailable-fragments",
                "--throttled-rate",
                "50K",
                "--http-chunk-size",
                "10M",
                "--sleep-requests",
                "1",
                "--no-progress",
                "--print",
                "after_move:filepath",
                "--no-simulate",
                "-o",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(template.display().to_string());

        if let Some(ffmpeg) = &self.config.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.display().to_string());
        }
        args.extend(self.config.common_args(rng));
        args.push(item.source.clone());
        args
    }

    async fn fetch_once(
        &self,
        item: &MediaItem,
        destination: &Path,
        options: &FetchOptions,
    ) -> Result<FetchOutput, FetchError> {
        let args = self.fetch_args(item, destination, options, &mut rand::thread_rng());
        let output = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchError::unknown(format!("failed to run {}: {}", self.config.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(map_stderr(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .map(PathBuf::from);

        let bytes = match &path {
            Some(p) => tokio::fs::metadata(p).await.ok().map(|m| m.len()),
            None => None,
        };

        Ok(FetchOutput { path, bytes })
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn fetch(
        &self,
        item: &MediaItem,
        destination: &Path,
        options: &FetchOptions,
    ) -> Result<FetchOutput, FetchError> {
        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|e| FetchError::unknown(format!("cannot create {}: {}", destination.display(), e)))?;

        let chain = quality_chain(&options.quality);
        let mut last_error = None;

        for (idx, quality) in chain.iter().enumerate() {
            if idx > 0 {
                let pause = rand::thread_rng().gen_range(FALLBACK_PAUSE_SECS.0..=FALLBACK_PAUSE_SECS.1);
                warn!(id = %item.id, %quality, "Retrying with lower quality");
                tokio::time::sleep(StdDuration::from_secs_f64(pause)).await;
            }

            let mut attempt = options.clone();
            attempt.quality = quality.clone();
            match self.fetch_once(item, destination, &attempt).await {
                Ok(output) => return Ok(output),
                Err(e) if worth_downgrading(&e) => {
                    debug!(id = %item.id, %quality, error = %e, "Fetch failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::unknown("no quality to try")))
    }
}

/// Most relevant line of yt-dlp's stderr
fn error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .unwrap_or("yt-dlp failed without output")
        .trim()
        .to_string()
}

/// Map yt-dlp's stderr onto a fetch error kind
pub fn map_stderr(stderr: &str) -> FetchError {
    let message = error_line(stderr);
    let lower = strip_item_prefix(&message).to_lowercase();

    if lower.contains("http error 429")
        || lower.contains("too many requests")
        || lower.contains("try again later")
    {
        FetchError::rate_limited(message)
    } else if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("has been removed")
        || lower.contains("no longer available")
    {
        FetchError::unavailable(message)
    } else if lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("unable to download webpage")
        || lower.contains("network")
    {
        FetchError::network(message)
    } else {
        FetchError::unknown(message)
    }
}
