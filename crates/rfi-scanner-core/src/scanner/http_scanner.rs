use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use tracing::{debug, instrument, warn};

use super::{combine_url, response_preview, ScanOptions, ScanResult, Scanner};
use crate::detection::Detector;
use crate::payload::Payload;

/// Scanner backed by a shared reqwest client with bounded in-flight requests.
#[derive(Debug, Clone)]
pub struct HttpScanner {
    http: Client,
    detector: Arc<Detector>,
    options: ScanOptions,
}

impl HttpScanner {
    pub fn new(options: ScanOptions, detector: Detector) -> Result<Self> {
        options.validate()?;
        let http = Client::builder()
            .user_agent(options.user_agent.clone())
            .timeout(options.timeout)
            .build()
            .context("failed to build scanner HTTP client")?;
        Ok(Self {
            http,
            detector: Arc::new(detector),
            options,
        })
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    async fn fetch(&self, url: &str) -> Result<(u16, String)> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read response body from {url}"))?;
        Ok((status, body))
    }
}

#[async_trait::async_trait]
impl Scanner for HttpScanner {
    async fn probe(&self, target: &str, payload: &Payload) -> ScanResult {
        let url = combine_url(target, &payload.value);
        let started = Instant::now();

        match self.fetch(&url).await {
            Ok((status, body)) => {
                let scan_time = started.elapsed().as_secs_f64();
                let classification = self.detector.classify(&body, status);
                debug!(%url, status, vulnerable = classification.vulnerable, "probe completed");
                ScanResult {
                    response_size: body.chars().count(),
                    response_preview: response_preview(&body),
                    url,
                    vulnerable: classification.vulnerable,
                    response_code: status,
                    payload_used: payload.value.clone(),
                    scan_time,
                    matched_indicators: classification.matched_indicators,
                }
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(%url, error = %message, "probe failed");
                ScanResult::failed(url, payload, &message, started.elapsed().as_secs_f64())
            }
        }
    }

    #[instrument(
        name = "scan_targets",
        skip_all,
        fields(targets = targets.len(), payloads = payloads.len(), concurrency = self.options.max_concurrent)
    )]
    async fn scan_targets(&self, targets: &[String], payloads: &[Payload]) -> Vec<ScanResult> {
        let combinations: Vec<(&str, &Payload)> = targets
            .iter()
            .flat_map(|target| payloads.iter().map(move |payload| (target.as_str(), payload)))
            .collect();
        debug!(requests = combinations.len(), "starting scan");

        // Closures over borrowed `(target, payload)` tuples are not `Send` here; index instead.
        let results: Vec<ScanResult> = stream::iter(0..combinations.len())
            .map(|idx| {
                let (target, payload) = combinations[idx];
                self.probe(target, payload)
            })
            .buffered(self.options.max_concurrent)
            .inspect(|result| {
                if result.vulnerable {
                    warn!(url = %result.url, "VULNERABLE");
                }
            })
            .collect()
            .await;

        debug!(
            results = results.len(),
            vulnerable = results.iter().filter(|r| r.vulnerable).count(),
            "scan completed"
        );
        results
    }
}
