//! Endpoint and credential settings read from `LEVY_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::{LevyError, LevyResult};

pub const DEFAULT_TICKETS_ENDPOINT: &str = "api/LevyAccess/getLevyTicketsPaged";
pub const DEFAULT_PATRON_ENDPOINT: &str = "api/PatronProfile/patron-transaction/patron-profile";
pub const MANIFEST_ENDPOINT: &str = "api/ApplicationManagement/manifest/latest";
pub const DEFAULT_APP_CODE: &str = "PatronGamingMonitor";
pub const DEFAULT_APP_VERSION: &str = "1.1.0";
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
/// Buffered push messages between the hub reader and the subscriber.
pub const PUSH_QUEUE_CAP: usize = 1024;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub deployment_base_url: String,
    pub api_key: String,
    pub push_url: Option<String>,
    pub tickets_endpoint: String,
    pub patron_endpoint: String,
    /// When set, tickets are served from this JSON file instead of HTTP.
    pub test_data: Option<PathBuf>,
    pub timeout: Duration,
    pub app_code: String,
    pub fallback_version: String,
}

impl ApiConfig {
    /// Minimal config for a base URL and key; every other field takes its default.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            deployment_base_url: base_url.clone(),
            base_url,
            api_key: api_key.into(),
            push_url: None,
            tickets_endpoint: DEFAULT_TICKETS_ENDPOINT.to_string(),
            patron_endpoint: DEFAULT_PATRON_ENDPOINT.to_string(),
            test_data: None,
            timeout: FETCH_TIMEOUT,
            app_code: DEFAULT_APP_CODE.to_string(),
            fallback_version: DEFAULT_APP_VERSION.to_string(),
        }
    }

    /// Base URL and key are required unless `LEVY_TEST_DATA` points at a file.
    pub fn from_env() -> LevyResult<Self> {
        let test_data = std::env::var_os("LEVY_TEST_DATA").map(PathBuf::from);
        let base_url = non_empty("LEVY_BASE_URL");
        let api_key = non_empty("LEVY_API_KEY");
        let (base_url, api_key) = match (base_url, api_key, test_data.is_some()) {
            (Some(b), Some(k), _) => (b, k),
            (b, k, true) => (b.unwrap_or_else(|| "http://127.0.0.1".to_string()), k.unwrap_or_default()),
            (None, _, false) => return Err(LevyError::Config("LEVY_BASE_URL is not set".into())),
            (_, None, false) => return Err(LevyError::Config("LEVY_API_KEY is not set".into())),
        };
        let mut cfg = Self::new(base_url, api_key);
        if let Some(d) = non_empty("LEVY_DEPLOYMENT_BASE_URL") {
            cfg.deployment_base_url = d;
        }
        cfg.push_url = non_empty("LEVY_PUSH_URL");
        if let Some(e) = non_empty("LEVY_TICKETS_ENDPOINT") {
            cfg.tickets_endpoint = e;
        }
        if let Some(e) = non_empty("LEVY_PATRON_ENDPOINT") {
            cfg.patron_endpoint = e;
        }
        if let Some(c) = non_empty("LEVY_APP_CODE") {
            cfg.app_code = c;
        }
        if let Some(v) = non_empty("LEVY_APP_VERSION") {
            cfg.fallback_version = v;
        }
        cfg.test_data = test_data;
        Ok(cfg)
    }

    pub fn tickets_url(&self) -> String { join_url(&self.base_url, &self.tickets_endpoint) }

    pub fn patron_url(&self, patron_id: i64) -> String {
        format!("{}/{}", join_url(&self.base_url, &self.patron_endpoint), patron_id)
    }

    pub fn manifest_url(&self, app_code: &str) -> String {
        format!("{}/{}", join_url(&self.deployment_base_url, MANIFEST_ENDPOINT), app_code)
    }

    /// `host:port` of the base URL, for the reachability probe.
    pub fn probe_addr(&self) -> Option<String> {
        let rest = self.base_url.split_once("://").map(|(_, r)| r).unwrap_or(&self.base_url);
        let authority = rest.split('/').next().filter(|a| !a.is_empty())?;
        let authority = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
        let has_port = match authority.rfind(']') {
            Some(end) => authority[end..].contains(':'),
            None => authority.contains(':'),
        };
        if has_port {
            Some(authority.to_string())
        } else {
            let port = if self.base_url.starts_with("https") { 443 } else { 80 };
            Some(format!("{}:{}", authority, port))
        }
    }
}

fn non_empty(var: &str) -> Option<String> {
    std::env::var(var).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
