//! Fallback adapter for sources that publish tariff lines as JSON

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tariff_common::types::fields;
use tariff_common::{Result, TariffError};
use tracing::{debug, info};

use super::{extract_records, AcquisitionResult, AdapterContext, SourceAdapter};

/// Fetches the catalog's source URL and expects a JSON document: either an
/// array of lines or an object with a `tariffs` (or `records`) array.
#[derive(Debug)]
pub struct GenericAdapter {
    ctx: AdapterContext,
}

impl GenericAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }

    pub fn boxed(ctx: AdapterContext) -> Box<dyn SourceAdapter> {
        Box::new(Self::new(ctx))
    }
}

#[async_trait]
impl SourceAdapter for GenericAdapter {
    fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    fn kind(&self) -> &'static str {
        "generic"
    }

    async fn acquire(&self) -> Result<AcquisitionResult> {
        let url = self.ctx.require_source_url()?.to_string();
        info!(source_id = self.ctx.source_id(), %url, "Fetching JSON source");

        let fetched = match self.ctx.http().get(self.ctx.executor(), &url).await {
            Ok(fetched) => fetched,
            Err(e) => return Ok(AcquisitionResult::failed(e.into(), self.ctx.metrics())),
        };

        if !fetched.is_json() {
            return Ok(AcquisitionResult::failed(
                TariffError::EmptyPayload(format!(
                    "{} returned {} instead of JSON",
                    fetched.url,
                    fetched.content_type.as_deref().unwrap_or("unknown content")
                )),
                self.ctx.metrics(),
            ));
        }

        let document: Value = serde_json::from_str(&fetched.body)
            .map_err(|e| TariffError::Parse(format!("invalid JSON from {}: {}", fetched.url, e)))?;

        let source = self.ctx.source_id().to_string();
        let tariffs: Vec<Value> = extract_records(&document)
            .into_iter()
            .map(|mut record| {
                if !record.is_present(fields::SOURCE) {
                    record.insert(fields::SOURCE, source.clone());
                }
                record.into_value()
            })
            .collect();
        debug!(records = tariffs.len(), "JSON source parsed");

        let payload = json!({
            "source": source,
            "url": fetched.url,
            "fetched_at": Utc::now().to_rfc3339(),
            "tariffs": tariffs,
        });
        Ok(AcquisitionResult::ok(payload, self.ctx.metrics()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::adapter::{run_adapter, RunOptions};
    use crate::catalog::StaticCatalog;
    use tariff_common::types::SourceConfig;
    use tariff_common::ErrorKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_for(url: Option<String>) -> GenericAdapter {
        let mut country = crate::catalog::tests::country("SN", "west_africa", &["ECOWAS"], 1);
        country.source_url = url.map(|u| u.parse().unwrap());
        let catalog = StaticCatalog::new(vec![country]);
        let mut config = SourceConfig::new("SN");
        config.retry_base_delay_seconds = 0.01;
        GenericAdapter::new(AdapterContext::new(&catalog, config).unwrap())
    }

    #[tokio::test]
    async fn test_acquires_json_lines() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tarif.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tariffs": [
                    {"code": "0101.21", "rate": 5},
                    {"code": "0201.10", "rate": "20%", "source": "customs"},
                ]
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(Some(format!("{}/tarif.json", server.uri())));
        let acquisition = adapter.acquire().await.unwrap();
        assert!(acquisition.success);

        let records = adapter.records(acquisition.payload.as_ref().unwrap());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text(fields::SOURCE).as_deref(), Some("SN"));
        assert_eq!(records[1].text(fields::SOURCE).as_deref(), Some("customs"));
        assert_eq!(acquisition.metrics.requests_made, 1);
    }

    #[tokio::test]
    async fn test_html_response_is_empty_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html></html>"),
            )
            .mount(&server)
            .await;

        let adapter = adapter_for(Some(server.uri()));
        let result = run_adapter(&adapter, RunOptions::default()).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::EmptyPayload));
        assert!(!adapter.context().http().is_open());
    }

    #[tokio::test]
    async fn test_missing_source_url_is_configuration_error() {
        let adapter = adapter_for(None);
        let result = run_adapter(&adapter, RunOptions::default()).await;
        assert_eq!(result.error_kind, Some(ErrorKind::Configuration));
    }
}
