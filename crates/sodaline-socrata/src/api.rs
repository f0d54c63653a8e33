//! Socrata Open Data API (SODA) client

use std::time::Duration;

use serde_json::Value;
use sodaline_core::{HttpError, SHARED_RUNTIME, http_client};

use crate::source::RecordSource;

/// Connection settings, passed through to every request unchanged
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Portal host (`www.datos.gov.co`) or full base URL
    pub host: String,
    /// Optional app token, sent as `X-App-Token`
    pub app_token: Option<String>,
    /// Optional basic-auth credentials
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// `$order` clause for paged fetches; `None` leaves paging order to the server
    pub order: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "www.datos.gov.co".to_string(),
            app_token: None,
            username: None,
            password: None,
            timeout: Duration::from_secs(60),
            order: Some(":id".to_string()),
        }
    }
}

/// Blocking SODA client over the shared async runtime
pub struct SocrataClient {
    client: reqwest::Client,
    base_url: String,
    config: ClientConfig,
}

impl SocrataClient {
    pub fn new(config: ClientConfig) -> Result<Self, HttpError> {
        let client = http_client(config.timeout)?;
        let base_url = base_url(&config.host);
        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// Resource endpoint for a dataset id, e.g. `.../resource/jbjy-vk9h.json`
    pub fn resource_url(&self, dataset: &str) -> String {
        format!("{}/resource/{dataset}.json", self.base_url)
    }

    fn query(&self, dataset: &str, params: &[(&str, String)]) -> Result<Vec<Value>, HttpError> {
        let url = self.resource_url(dataset);
        SHARED_RUNTIME.handle().block_on(async {
            let mut request = self.client.get(&url).query(params);
            if let Some(token) = &self.config.app_token {
                request = request.header("X-App-Token", token);
            }
            if let Some(user) = &self.config.username {
                request = request.basic_auth(user, self.config.password.as_ref());
            }

            let response = request
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| {
                    let e = HttpError::from_reqwest(e);
                    if !e.is_retryable() {
                        log::warn!("{url}: {e}; retrying is unlikely to help");
                    }
                    e
                })?;
            response
                .json::<Vec<Value>>()
                .await
                .map_err(HttpError::from_reqwest)
        })
    }
}

impl RecordSource for SocrataClient {
    type Error = HttpError;

    fn count(&self, dataset: &str) -> Result<u64, HttpError> {
        let rows = self.query(dataset, &[("$select", "count(*)".to_string())])?;
        parse_count(&rows)
    }

    fn fetch(&self, dataset: &str, limit: u64, offset: u64) -> Result<Vec<Value>, HttpError> {
        let mut params = vec![("$limit", limit.to_string()), ("$offset", offset.to_string())];
        if let Some(order) = &self.config.order {
            params.push(("$order", order.clone()));
        }
        self.query(dataset, &params)
    }
}

/// Normalize a host setting into a base URL without trailing slash
fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// Extract the total from a `$select=count(*)` response.
///
/// SODA answers `[{"count": "123"}]`; the number arrives as a string, older
/// endpoints send a bare number.
pub fn parse_count(rows: &[Value]) -> Result<u64, HttpError> {
    let value = rows
        .first()
        .and_then(|row| row.get("count"))
        .ok_or_else(|| HttpError::Decode("count response has no `count` field".to_string()))?;

    match value {
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| HttpError::Decode(format!("count is not an integer: {s:?}"))),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| HttpError::Decode(format!("count is not an integer: {n}"))),
        other => Err(HttpError::Decode(format!("unexpected count value: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_count_string() {
        assert_eq!(parse_count(&[json!({"count": "125000"})]).unwrap(), 125_000);
    }

    #[test]
    fn parse_count_number() {
        assert_eq!(parse_count(&[json!({"count": 3})]).unwrap(), 3);
    }

    #[test]
    fn parse_count_zero() {
        assert_eq!(parse_count(&[json!({"count": "0"})]).unwrap(), 0);
    }

    #[test]
    fn parse_count_missing() {
        assert!(matches!(parse_count(&[]), Err(HttpError::Decode(_))));
        assert!(matches!(
            parse_count(&[json!({"total": "1"})]),
            Err(HttpError::Decode(_))
        ));
    }

    #[test]
    fn parse_count_garbage() {
        assert!(parse_count(&[json!({"count": "many"})]).is_err());
        assert!(parse_count(&[json!({"count": -1})]).is_err());
        assert!(parse_count(&[json!({"count": null})]).is_err());
    }

    #[test]
    fn base_url_from_host() {
        assert_eq!(base_url("www.datos.gov.co"), "https://www.datos.gov.co");
        assert_eq!(base_url("www.datos.gov.co/"), "https://www.datos.gov.co");
        assert_eq!(base_url("http://localhost:8080/"), "http://localhost:8080");
    }

    #[test]
    fn resource_url_format() {
        let client = SocrataClient::new(ClientConfig::default()).unwrap();
        assert_eq!(
            client.resource_url("jbjy-vk9h"),
            "https://www.datos.gov.co/resource/jbjy-vk9h.json"
        );
    }

    #[test]
    fn default_config_orders_by_row_id() {
        let config = ClientConfig::default();
        assert_eq!(config.order.as_deref(), Some(":id"));
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.app_token.is_none());
    }
}
