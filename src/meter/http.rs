use super::PowerMeter;
use crate::config::MeterConfig;
use crate::domain::PowerSample;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Polls a meter endpoint for the house totals.
///
/// The wire reports production as a positive magnitude, the way meters
/// expose it; ingest negates it into the signed house convention where
/// negative watts are production.
pub struct HttpMeter {
    url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RawSample {
    produced_w: f64,
    consumed_w: f64,
    #[serde(default)]
    net_w: Option<f64>,
}

impl HttpMeter {
    pub fn new(cfg: &MeterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_seconds))
            .build()?;
        Ok(Self {
            url: cfg.url.clone(),
            client,
        })
    }
}

#[async_trait]
impl PowerMeter for HttpMeter {
    async fn sample(&self) -> Result<PowerSample> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("meter GET failed")?;
        let status = resp.status();
        let body = resp.text().await.context("meter read failed")?;
        if !status.is_success() {
            anyhow::bail!("meter error: HTTP {status}: {body}");
        }

        let raw: RawSample = serde_json::from_str(&body).context("meter JSON parse failed")?;
        let sample = PowerSample::new(-raw.produced_w, raw.consumed_w);
        Ok(match raw.net_w {
            Some(net_w) => sample.with_reported_net(net_w),
            None => sample,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cfg_for(server: &MockServer) -> MeterConfig {
        MeterConfig {
            kind: "http".into(),
            url: format!("{}/production.json", server.uri()),
            http_timeout_seconds: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn production_is_negated_on_ingest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/production.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "produced_w": 1200.0,
                "consumed_w": 450.0,
                "net_w": -748.5,
                "manufacturer": "Enphase",
            })))
            .mount(&server)
            .await;

        let sample = HttpMeter::new(&cfg_for(&server)).unwrap().sample().await.unwrap();
        assert_eq!(sample.produced_w, -1200.0);
        assert_eq!(sample.consumed_w, 450.0);
        assert_eq!(sample.reported_net_w, Some(-748.5));
        assert_eq!(sample.net_w(), -750.0);
    }

    #[tokio::test]
    async fn net_field_is_optional() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "produced_w": 0.0,
                "consumed_w": 80.0,
            })))
            .mount(&server)
            .await;

        let sample = HttpMeter::new(&cfg_for(&server)).unwrap().sample().await.unwrap();
        assert_eq!(sample.reported_net_w, None);
        assert_eq!(sample.net_w(), 80.0);
    }

    #[tokio::test]
    async fn http_and_parse_failures_surface_as_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        assert!(HttpMeter::new(&cfg_for(&server)).unwrap().sample().await.is_err());

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;
        assert!(HttpMeter::new(&cfg_for(&server)).unwrap().sample().await.is_err());
    }
}
