//! HTTP implementation of `LevyApi` over reqwest.

use std::time::Instant;

use levy_core::{ApiEnvelope, AppManifest, PatronRecord, PushMessage, Ticket, TicketPage};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{PROBE_TIMEOUT, PUSH_QUEUE_CAP};
use crate::{ApiConfig, CancelHandle, LevyApi, LevyError, LevyResult, StreamHandle};

/// Shape of the local test data file.
#[derive(Deserialize)]
struct TestData {
    #[serde(alias = "Tickets", default)]
    tickets: Option<Vec<Ticket>>,
    #[serde(alias = "TotalCount", alias = "totalCount", default)]
    total_count: i64,
}

pub struct HttpApi {
    cfg: ApiConfig,
    client: reqwest::Client,
}

impl HttpApi {
    pub fn new(cfg: ApiConfig) -> LevyResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if !cfg.api_key.is_empty() {
            let key = HeaderValue::from_str(&cfg.api_key).map_err(|e| LevyError::Config(format!("api key: {}", e)))?;
            headers.insert("X-API-Key", key);
        }
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| LevyError::Config(e.to_string()))?;
        Ok(Self { cfg, client })
    }

    pub fn config(&self) -> &ApiConfig { &self.cfg }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> LevyResult<serde_json::Value> {
        let resp = self.client.get(url).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LevyError::Status { code: status.as_u16(), body });
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn tickets_from_file(&self, page_size: i64) -> LevyResult<TicketPage> {
        let path = self.cfg.test_data.as_ref().ok_or_else(|| LevyError::Internal("no test data path".into()))?;
        info!(path = %path.display(), "api: reading test data");
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| LevyError::NotFound(format!("{}: {}", path.display(), e)))?;
        let data: TestData = serde_json::from_slice(&raw)?;
        let items = data.tickets.unwrap_or_default();
        let total_pages = if page_size > 0 { (data.total_count + page_size - 1) / page_size } else { 0 };
        // the whole file is returned; filtering happens client side
        Ok(TicketPage {
            items,
            total_count: data.total_count,
            total_pages,
            page_index: 1,
            page_size,
            success: true,
            ..Default::default()
        })
    }
}

#[async_trait::async_trait]
impl LevyApi for HttpApi {
    async fn fetch_tickets(&self, page_index: i64, page_size: i64, filter_type: &str) -> LevyResult<TicketPage> {
        let t0 = Instant::now();
        info!(page_index, page_size, filter = %filter_type, "api: fetch_tickets start");
        let res = if self.cfg.test_data.is_some() {
            self.tickets_from_file(page_size).await
        } else {
            let query = [
                ("pageIndex", page_index.to_string()),
                ("pageSize", page_size.to_string()),
                ("filterType", filter_type.to_string()),
            ];
            match self.get_json(&self.cfg.tickets_url(), &query).await {
                Ok(v) => serde_json::from_value::<TicketPage>(v).map_err(LevyError::from),
                Err(e) => Err(e),
            }
        };
        metrics::histogram!("api_fetch_ms", t0.elapsed().as_secs_f64() * 1_000.0);
        match &res {
            Ok(p) => info!(items = p.items.len(), total_pages = p.total_pages, took_ms = %t0.elapsed().as_millis(), "api: fetch_tickets ok"),
            Err(e) => {
                metrics::counter!("api_fetch_errors_total", 1u64);
                warn!(error = %e, took_ms = %t0.elapsed().as_millis(), "api: fetch_tickets failed");
            }
        }
        res
    }

    async fn fetch_patron(&self, patron_id: i64) -> LevyResult<Option<PatronRecord>> {
        let t0 = Instant::now();
        let v = self.get_json(&self.cfg.patron_url(patron_id), &[]).await?;
        // bare record or {status, data, success}
        let rec = if v.get("success").is_some() && v.get("data").is_some() {
            serde_json::from_value::<ApiEnvelope<PatronRecord>>(v)?.into_data()
        } else {
            Some(serde_json::from_value::<PatronRecord>(v)?)
        };
        info!(patron_id, found = rec.is_some(), took_ms = %t0.elapsed().as_millis(), "api: fetch_patron done");
        Ok(rec)
    }

    async fn fetch_manifest(&self, app_code: &str) -> LevyResult<Option<AppManifest>> {
        let t0 = Instant::now();
        let v = self.get_json(&self.cfg.manifest_url(app_code), &[]).await?;
        let m = serde_json::from_value::<ApiEnvelope<AppManifest>>(v)?.into_data();
        info!(app_code, found = m.is_some(), took_ms = %t0.elapsed().as_millis(), "api: fetch_manifest done");
        Ok(m)
    }

    async fn probe_network(&self) -> bool {
        if self.cfg.test_data.is_some() {
            return true;
        }
        let Some(addr) = self.cfg.probe_addr() else { return false };
        match tokio::time::timeout(PROBE_TIMEOUT, tokio::net::TcpStream::connect(addr.as_str())).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(addr = %addr, error = %e, "api: probe refused");
                false
            }
            Err(_) => {
                tracing::debug!(addr = %addr, "api: probe timed out");
                false
            }
        }
    }

    /// Resolves only after the hub accepted the connection, so an unreachable hub
    /// surfaces here as `Transport` instead of as an immediately closed stream.
    async fn subscribe_push(&self) -> LevyResult<StreamHandle<PushMessage>> {
        let url = self.cfg.push_url.clone().ok_or_else(|| LevyError::Capability("push channel not configured".into()))?;
        let mut target = levy_push::PushTarget::new(url);
        if !self.cfg.api_key.is_empty() {
            target.api_key = Some(self.cfg.api_key.clone());
        }
        let t0 = Instant::now();
        let conn = levy_push::connect_push(&target)
            .await
            .map_err(|e| LevyError::Transport(format!("{:#}", e)))?;
        info!(url = %target.url, took_ms = %t0.elapsed().as_millis(), "api: push subscribed");
        let (tx, rx) = mpsc::channel::<PushMessage>(PUSH_QUEUE_CAP);
        let token = CancellationToken::new();
        let child = token.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = levy_push::run_push_stream(conn, tx, child).await {
                warn!(error = %e, "api: push stream ended with error");
            }
        });
        Ok(StreamHandle { rx, cancel: CancelHandle::new(Some(task), Some(token)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(body: &str) -> std::path::PathBuf {
        let n = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        let p = std::env::temp_dir().join(format!("levy-test-data-{}.json", n));
        std::fs::write(&p, body).unwrap();
        p
    }

    #[tokio::test]
    async fn serves_tickets_from_test_file() {
        let path = temp_file(r#"{"Tickets":[{"transactionNo":"A"},{"transactionNo":"B"}],"TotalCount":2,"TotalPages":1}"#);
        let mut cfg = ApiConfig::new("http://127.0.0.1", "");
        cfg.test_data = Some(path);
        let api = HttpApi::new(cfg).unwrap();
        let page = api.fetch_tickets(1, 50_000, "All").await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total_pages, 1);
        assert!(api.probe_network().await);
    }

    #[tokio::test]
    async fn missing_test_file_is_not_found() {
        let mut cfg = ApiConfig::new("http://127.0.0.1", "");
        cfg.test_data = Some(std::env::temp_dir().join("levy-definitely-missing.json"));
        let api = HttpApi::new(cfg).unwrap();
        let err = api.fetch_tickets(1, 15, "All").await.unwrap_err();
        assert!(matches!(err, LevyError::NotFound(_)));
    }

    #[tokio::test]
    async fn push_without_endpoint_is_capability_error() {
        let api = HttpApi::new(ApiConfig::new("http://127.0.0.1", "k")).unwrap();
        match api.subscribe_push().await {
            Err(LevyError::Capability(_)) => {}
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("push should be unavailable"),
        }
    }

    #[tokio::test]
    async fn unreachable_push_hub_fails_subscribe() {
        let mut cfg = ApiConfig::new("http://127.0.0.1", "k");
        cfg.push_url = Some("http://127.0.0.1:9/hub".into());
        let api = HttpApi::new(cfg).unwrap();
        match api.subscribe_push().await {
            Err(LevyError::Transport(msg)) => assert!(msg.contains("127.0.0.1:9")),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("subscribe should fail"),
        }
    }
}
