//! The HTTP transport: pulls rulesets and ID lists, ships event batches, and reports SDK
//! exceptions.
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::blocking::RequestBuilder;
use reqwest::{StatusCode, Url};
use serde_json::json;

use crate::events::batcher::BatchedEvents;
use crate::events::logger::LogEventSink;
use crate::id_lists::IdListChunkFetcher;
use crate::spec_types::IdListMetadata;
use crate::{Error, Result};

pub const DEFAULT_API_URL: &str = "https://statsigapi.net/v1";
pub const DEFAULT_CONFIG_SPECS_URL: &str = "https://api.statsigcdn.com/v1";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// sdk_flag that turns off request-body compression on `log_event`.
pub const STOP_GZIP_FLAG: &str = "stop_log_event_compression";

const SDK_TYPE: &str = "statsig-server-core-rust";
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Endpoint and identity configuration for [`StatsigHttpClient`].
pub struct NetworkConfig {
    pub sdk_key: String,
    /// Base for `get_id_lists`, `log_event` and `sdk_exception`.
    pub api_url: String,
    /// Base for `download_config_specs` (a CDN by default).
    pub config_specs_url: String,
    pub log_event_url: Option<String>,
    pub id_lists_url: Option<String>,
    pub timeout: Duration,
    /// Suppresses all network I/O.
    pub local_mode: bool,
}

impl NetworkConfig {
    pub fn new(sdk_key: impl Into<String>) -> NetworkConfig {
        NetworkConfig {
            sdk_key: sdk_key.into(),
            api_url: DEFAULT_API_URL.to_owned(),
            config_specs_url: DEFAULT_CONFIG_SPECS_URL.to_owned(),
            log_event_url: None,
            id_lists_url: None,
            timeout: DEFAULT_TIMEOUT,
            local_mode: false,
        }
    }
}

/// Blocking HTTP client for all Statsig endpoints.
pub struct StatsigHttpClient {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    config: NetworkConfig,
    /// Session ID stamped on every request for server-side correlation.
    session_id: String,
    /// If we receive a 401 Unauthorized error during a request, it means the SDK key is not
    /// valid. We cache this error so we don't issue additional requests to the server.
    unauthorized: AtomicBool,
    /// Set from the ruleset's [`STOP_GZIP_FLAG`] after every accepted update.
    gzip_disabled: AtomicBool,
}

impl StatsigHttpClient {
    pub fn new(config: NetworkConfig) -> Result<StatsigHttpClient> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(StatsigHttpClient {
            client,
            config,
            session_id: uuid::Uuid::new_v4().to_string(),
            unauthorized: AtomicBool::new(false),
            gzip_disabled: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[cfg(test)]
    pub(crate) fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn set_gzip_disabled(&self, disabled: bool) {
        self.gzip_disabled.store(disabled, Ordering::Relaxed);
    }

    pub fn gzip_disabled(&self) -> bool {
        self.gzip_disabled.load(Ordering::Relaxed)
    }

    /// Fetch the ruleset document as raw JSON, from the configured base or, for the
    /// StatsigNetwork fallback source, from the default Statsig API.
    pub fn fetch_config_specs(
        &self,
        since_time: u64,
        timeout_override: Option<Duration>,
        use_statsig_fallback: bool,
    ) -> Result<String> {
        self.check_usable()?;

        let base = if use_statsig_fallback {
            DEFAULT_API_URL
        } else {
            &self.config.config_specs_url
        };
        let url = Url::parse_with_params(
            &format!(
                "{}/download_config_specs/{}.json",
                base, self.config.sdk_key
            ),
            &[("sinceTime", since_time.to_string())],
        )
        .map_err(Error::InvalidUrl)?;

        log::debug!(target: "statsig", "fetching config specs with sinceTime={since_time}");
        let mut request = self.with_statsig_headers(self.client.get(url));
        if let Some(timeout) = timeout_override {
            request = request.timeout(timeout);
        }
        let response = self.check_status(request.send()?)?;

        let body = response.text()?;
        log::debug!(target: "statsig", "successfully fetched config specs ({} bytes)", body.len());
        Ok(body)
    }

    /// Fetch the ID-list directory.
    pub fn get_id_lists(&self) -> Result<HashMap<String, IdListMetadata>> {
        self.check_usable()?;

        let url = self.endpoint_url(self.config.id_lists_url.as_deref(), "get_id_lists")?;
        let request = self.with_statsig_headers(self.client.post(url)).json(&json!({}));
        let response = self.check_status(request.send()?)?;
        Ok(response.json()?)
    }

    /// Fire-and-forget report of an internal error to the diagnostics sink.
    pub fn post_sdk_exception(&self, exception: &str, info: &str) {
        if self.config.local_mode || self.unauthorized.load(Ordering::Relaxed) {
            return;
        }
        let Ok(url) = self.endpoint_url(None, "sdk_exception") else {
            return;
        };
        let body = json!({
            "exception": exception,
            "info": info,
            "statsigMetadata": self.statsig_metadata(),
        });
        let result = self
            .with_statsig_headers(self.client.post(url))
            .json(&body)
            .send();
        if let Err(err) = result {
            log::debug!(target: "statsig", "failed to report sdk exception: {err}");
        }
    }

    fn endpoint_url(&self, override_url: Option<&str>, endpoint: &str) -> Result<Url> {
        let url = match override_url {
            Some(base) => format!("{base}/{endpoint}"),
            None => format!("{}/{endpoint}", self.config.api_url),
        };
        Url::parse(&url).map_err(Error::InvalidUrl)
    }

    fn statsig_metadata(&self) -> serde_json::Value {
        json!({
            "sdkType": SDK_TYPE,
            "sdkVersion": SDK_VERSION,
            "sessionID": self.session_id,
        })
    }

    fn with_statsig_headers(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("STATSIG-API-KEY", &self.config.sdk_key)
            .header(
                "STATSIG-CLIENT-TIME",
                Utc::now().timestamp_millis().to_string(),
            )
            .header("STATSIG-SERVER-SESSION-ID", &self.session_id)
            .header("STATSIG-SDK-TYPE", SDK_TYPE)
            .header("STATSIG-SDK-VERSION", SDK_VERSION)
    }

    fn check_usable(&self) -> Result<()> {
        if self.config.local_mode {
            return Err(Error::LocalMode);
        }
        if self.unauthorized.load(Ordering::Relaxed) {
            return Err(Error::Unauthorized);
        }
        Ok(())
    }

    fn check_status(
        &self,
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            log::warn!(target: "statsig", "client is not authorized. Check your SDK key");
            self.unauthorized.store(true, Ordering::Relaxed);
            return Err(Error::Unauthorized);
        }
        log::warn!(
            target: "statsig",
            "received non-2xx response ({}) from {}",
            status.as_u16(),
            response.url().path(),
        );
        Err(Error::RequestFailed(status.as_u16()))
    }
}

impl IdListChunkFetcher for StatsigHttpClient {
    fn fetch_chunk(&self, url: &str, range_start: u64) -> Result<String> {
        self.check_usable()?;
        let response = self
            .client
            .get(url)
            .header("Range", format!("bytes={range_start}-"))
            .send()?;
        let response = self.check_status(response)?;
        Ok(response.text()?)
    }
}

impl LogEventSink for StatsigHttpClient {
    fn send_events(&self, batch: &BatchedEvents) -> Result<()> {
        self.check_usable()?;

        let url = self.endpoint_url(self.config.log_event_url.as_deref(), "log_event")?;
        let body = json!({
            "events": batch.events,
            "statsigMetadata": self.statsig_metadata(),
        });

        let payload = serde_json::to_vec(&body)?;
        let request = self
            .with_statsig_headers(self.client.post(url))
            .header("Content-Type", "application/json")
            .header("STATSIG-EVENT-COUNT", batch.event_count.to_string())
            .header("STATSIG-RETRY", batch.retries.to_string());

        let request = if self.gzip_disabled() {
            request.body(payload)
        } else {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&payload)?;
            request
                .header("Content-Encoding", "gzip")
                .body(encoder.finish()?)
        };

        log::debug!(
            target: "statsig",
            "posting {} events (retry {}, gzip {})",
            batch.event_count,
            batch.retries,
            !self.gzip_disabled(),
        );

        let response = request.send()?;
        self.check_status(response)?;
        Ok(())
    }
}
