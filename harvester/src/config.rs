use crate::cli::Cli;
use crate::errors::ConfigError;
use crate::models::RecordKind;
use crate::services::filter::FilterCriteria;
use crate::utils::normalize_cron;
use chrono::{NaiveDate, Utc};
use env_logger::Builder;
use lazy_static::lazy_static;
use log::{info, LevelFilter};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

lazy_static! {
    pub static ref COLLECTOR_URL: String =
        env::var("HARVESTER_COLLECTOR_URL").unwrap_or_else(|_| "http://127.0.0.1:9222".to_string());
    pub static ref LEDGER_PATH: String =
        env::var("HARVESTER_LEDGER_PATH").unwrap_or_else(|_| "./data/crawled.db".to_string());
    pub static ref SHEETS_ACCESS_TOKEN: Option<String> = env::var("GOOGLE_SHEETS_ACCESS_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty());
}

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

pub fn init_logger(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    Builder::new().filter_level(level).parse_default_env().init();
    info!("Starting note harvester...");
}

pub fn load_environment() {
    dotenv::dotenv().ok();
}

/// Search ordering requested from upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[serde(alias = "general")]
    #[value(alias = "general")]
    Relevance,
    #[default]
    Popularity,
    #[serde(alias = "time")]
    #[value(alias = "time")]
    Recency,
}

impl SortMode {
    /// The value the site expects in its search URL.
    pub fn upstream_value(&self) -> &'static str {
        match self {
            SortMode::Relevance => "general",
            SortMode::Popularity => "popularity_descending",
            SortMode::Recency => "time_descending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputFormat {
    #[serde(alias = "csv")]
    Tabular,
    #[serde(alias = "json")]
    Document,
    #[serde(alias = "google_sheets")]
    RemoteSheet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchConfig {
    pub keywords: Vec<String>,
    pub max_records: usize,
    pub paging_effort: u32,
    pub sort_by: SortMode,
    pub base_url: String,
    pub max_consecutive_failures: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keywords: vec!["Python".to_string()],
            max_records: 100,
            paging_effort: 20,
            sort_by: SortMode::Popularity,
            base_url: "https://www.xiaohongshu.com".to_string(),
            max_consecutive_failures: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WindowConfig {
    pub recent_days: Option<u32>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl WindowConfig {
    pub fn is_configured(&self) -> bool {
        self.recent_days.is_some() || self.start.is_some() || self.end.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterConfig {
    pub kind: Option<RecordKind>,
    pub min_likes: u64,
    pub window: WindowConfig,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            kind: Some(RecordKind::Plain),
            min_likes: 10,
            window: WindowConfig {
                recent_days: Some(180),
                ..WindowConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutputConfig {
    pub formats: Vec<OutputFormat>,
    pub output_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            formats: vec![OutputFormat::Tabular, OutputFormat::Document],
            output_dir: PathBuf::from("./data/exports"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteSheetConfig {
    pub destination_id: Option<String>,
    pub display_name: String,
    pub share_with: Vec<String>,
    pub access_token: Option<String>,
    pub sheets_api_base: String,
    pub drive_api_base: String,
}

impl Default for RemoteSheetConfig {
    fn default() -> Self {
        Self {
            destination_id: None,
            display_name: "Note Harvester Data".to_string(),
            share_with: Vec::new(),
            access_token: None,
            sheets_api_base: "https://sheets.googleapis.com".to_string(),
            drive_api_base: "https://www.googleapis.com".to_string(),
        }
    }
}

impl RemoteSheetConfig {
    pub fn resolved_access_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .or_else(|| SHEETS_ACCESS_TOKEN.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: "0 8 * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CollectorConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub login_wait_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: COLLECTOR_URL.clone(),
            timeout_secs: 60,
            login_wait_secs: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    pub ledger_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from(&*LEDGER_PATH),
        }
    }
}

/// Everything a run needs, merged from defaults, the YAML file and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub search: SearchConfig,
    pub filter: FilterConfig,
    pub output: OutputConfig,
    pub remote_sheet: RemoteSheetConfig,
    pub schedule: ScheduleConfig,
    pub collector: CollectorConfig,
    pub storage: StorageConfig,
}

impl Settings {
    /// Built-in defaults overlaid with the YAML file, if any.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
        };

        match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_yaml(&fs::read_to_string(&path)?)
            }
            None => {
                info!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// CLI flags win over anything loaded from file.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(keyword) = &cli.keyword {
            self.search.keywords = vec![keyword.clone()];
        }
        if let Some(max_records) = cli.max_records {
            self.search.max_records = max_records;
        }
        if let Some(scroll_times) = cli.scroll_times {
            self.search.paging_effort = scroll_times;
        }
        if let Some(sort) = cli.sort {
            self.search.sort_by = sort;
        }
        if let Some(min_likes) = cli.min_likes {
            self.filter.min_likes = min_likes;
        }
        if cli.schedule {
            self.schedule.enabled = true;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let keywords: Vec<_> = self
            .search
            .keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(ConfigError::Invalid("search.keywords must not be empty".to_string()));
        }

        let window = &self.filter.window;
        if window.recent_days.is_some() && (window.start.is_some() || window.end.is_some()) {
            return Err(ConfigError::Invalid(
                "filter.window.recentDays cannot be combined with start/end".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (window.start, window.end) {
            if start > end {
                return Err(ConfigError::Invalid(format!(
                    "filter.window.start ({start}) is after end ({end})"
                )));
            }
        }

        FilterCriteria::resolve(&self.filter, Utc::now())?;

        url::Url::parse(&self.search.base_url)
            .map_err(|e| ConfigError::Invalid(format!("search.baseUrl: {e}")))?;

        if self.schedule.enabled && normalize_cron(&self.schedule.cron).is_none() {
            return Err(ConfigError::Invalid(format!(
                "schedule.cron '{}' must have 5 or 6 fields",
                self.schedule.cron
            )));
        }
        Ok(())
    }
}
