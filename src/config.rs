use serde::Deserialize;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::str::FromStr;

fn default_max_file_size() -> usize {
    // 10 MB in bytes
    10 * 1024 * 1024
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_insight_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_snapshot_db_path() -> String {
    "dataviz.sqlite3".to_string()
}

/// Per-chart truncation caps, one per chart type.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ChartLimits {
    pub bar: usize,
    pub line: usize,
    pub scatter: usize,
    pub histogram_bins: usize,
    pub recommended: usize,
}

impl Default for ChartLimits {
    fn default() -> Self {
        Self {
            bar: 15,
            line: 30,
            scatter: 100,
            histogram_bins: 10,
            recommended: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AnomalySettings {
    pub threshold: f64,
    pub high_severity: f64,
    pub limit: usize,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            high_severity: 4.0,
            limit: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub max_file_size: usize,
    pub openai_key: Option<String>,
    pub insight_model: String,
    pub snapshot_db_path: String,
    pub anomaly: AnomalySettings,
    pub charts: ChartLimits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_file_size: default_max_file_size(),
            openai_key: None,
            insight_model: default_insight_model(),
            snapshot_db_path: default_snapshot_db_path(),
            anomaly: AnomalySettings::default(),
            charts: ChartLimits::default(),
        }
    }
}

impl Config {
    pub fn new() -> Result<Self> {
        // Load .env file first
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let openai_key = lookup("OPENAI_API_KEY").filter(|key| !key.trim().is_empty());
        if openai_key.is_none() {
            tracing::warn!("OPENAI_API_KEY is not set; insight endpoints will be unavailable");
        }

        Ok(Config {
            bind_addr: parse_or(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            max_file_size: parse_or(&lookup, "MAX_FILE_SIZE", defaults.max_file_size)?,
            openai_key,
            insight_model: lookup("INSIGHT_MODEL").unwrap_or(defaults.insight_model),
            snapshot_db_path: lookup("SNAPSHOT_DB_PATH").unwrap_or(defaults.snapshot_db_path),
            anomaly: AnomalySettings {
                threshold: parse_or(&lookup, "ANOMALY_THRESHOLD", defaults.anomaly.threshold)?,
                ..defaults.anomaly
            },
            charts: ChartLimits {
                bar: parse_or(&lookup, "BAR_LIMIT", defaults.charts.bar)?,
                line: parse_or(&lookup, "LINE_LIMIT", defaults.charts.line)?,
                scatter: parse_or(&lookup, "SCATTER_LIMIT", defaults.charts.scatter)?,
                histogram_bins: parse_or(&lookup, "HISTOGRAM_BINS", defaults.charts.histogram_bins)?,
                ..defaults.charts
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Failed to parse {}={}", key, raw)),
        None => Ok(default),
    }
}
