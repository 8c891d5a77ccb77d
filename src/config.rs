//! Application configuration loaded from the environment

use crate::error::PipelineError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_SEC_DELAY_MS: u64 = 100;
pub const DEFAULT_TOP_K: usize = 6;
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    /// Identifying `User-Agent` sent with every SEC request.
    pub sec_user_agent: String,
    pub sec_request_delay: Duration,
    /// Parent directory of the transient evidence folders.
    pub work_dir: PathBuf,
    /// Where per-session retrieval indexes are persisted.
    pub index_dir: PathBuf,
    pub retrieval_top_k: usize,
    pub database_url: Option<String>,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let gemini_api_key = env::var("GEMINI_API_KEY")
            .map_err(|_| PipelineError::ConfigError("GEMINI_API_KEY not set".to_string()))?;

        let gemini_model =
            env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string());

        let sec_user_agent = env::var("SEC_USER_AGENT")
            .or_else(|_| env::var("EMAIL"))
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::ConfigError(
                    "SEC_USER_AGENT (or EMAIL) must identify the requester for SEC EDGAR".to_string(),
                )
            })?;

        let sec_request_delay = Duration::from_millis(parse_var(
            "SEC_REQUEST_DELAY_MS",
            DEFAULT_SEC_DELAY_MS,
        )?);

        let work_dir = env::var("FDQA_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("fdqa").join("work"));

        let index_dir = env::var("FDQA_INDEX_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("index_storage"));

        let retrieval_top_k = parse_var("RETRIEVAL_TOP_K", DEFAULT_TOP_K)?.max(1);

        let database_url = env::var("POSTGRES_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok();

        let port = env::var("PORT")
            .or_else(|_| env::var("API_PORT"))
            .ok()
            .map(|p| {
                p.parse::<u16>()
                    .map_err(|e| PipelineError::ConfigError(format!("Invalid PORT '{}': {}", p, e)))
            })
            .transpose()?
            .unwrap_or(DEFAULT_PORT);

        Ok(Self {
            gemini_api_key,
            gemini_model,
            sec_user_agent,
            sec_request_delay,
            work_dir,
            index_dir,
            retrieval_top_k,
            database_url,
            port,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| PipelineError::ConfigError(format!("Invalid {} '{}': {}", name, value, e))),
        Err(_) => Ok(default),
    }
}
