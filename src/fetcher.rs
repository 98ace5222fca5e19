use std::{sync::Arc, time::Duration};

use crate::{configuration::Settings, document::OverrideDocument, error::FetchError};

/// One GET per call, no retries.
pub trait DocumentClient: Send + Sync {
    fn get(&self, url: &str) -> Result<String, FetchError>;
}

pub struct HttpDocumentClient {
    client: reqwest::blocking::Client,
}

impl HttpDocumentClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|error| FetchError::Network(format!("Failed to build client: {error}")))?;
        Ok(Self { client })
    }
}

fn classify(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = error.status() {
        FetchError::Status(status.as_u16())
    } else {
        FetchError::Network(error.to_string())
    }
}

impl DocumentClient for HttpDocumentClient {
    fn get(&self, url: &str) -> Result<String, FetchError> {
        log::debug!("[fetch] GET {url}");
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(classify)?;
        let body = response.bytes().map_err(classify)?;
        log::debug!("[fetch] {url} → {} bytes", body.len());
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

pub fn cache_busted(url: &str, timestamp: i64) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}t={timestamp}")
}

/// Text strictly between `open` and the next `close` after it, trimmed.
pub fn extract_block<'a>(raw: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = raw.find(open)? + open.len();
    let rest = &raw[start..];
    let end = rest.find(close)?;
    let block = rest[..end].trim();
    (!block.is_empty()).then_some(block)
}

pub struct ContentFetcher {
    client: Arc<dyn DocumentClient>,
    primary_url: String,
    secondary_url: String,
    open_marker: String,
    close_marker: String,
}

impl ContentFetcher {
    pub fn new(client: Arc<dyn DocumentClient>, settings: &Settings) -> Self {
        Self {
            client,
            primary_url: settings.primary_url.clone(),
            secondary_url: settings.secondary_url.clone(),
            open_marker: settings.block_open_marker.clone(),
            close_marker: settings.block_close_marker.clone(),
        }
    }

    pub fn fetch(&self) -> Result<OverrideDocument, FetchError> {
        let now = chrono::Utc::now().timestamp();
        let primary = self
            .client
            .get(&cache_busted(&self.primary_url, now))
            .inspect_err(|error| log::warn!("[fetch] primary document failed: {error}"))?;

        let mut document = OverrideDocument::new(primary);
        log::info!(
            "[fetch] primary document: {} mappings",
            document.mapping_count()
        );

        if let Some(block) = self.secondary_block(now) {
            document.append_block(&block);
            log::info!(
                "[fetch] merged secondary block, {} mappings total",
                document.mapping_count()
            );
        }

        Ok(document)
    }

    /// Every failure here is swallowed.
    fn secondary_block(&self, timestamp: i64) -> Option<String> {
        let raw = match self
            .client
            .get(&cache_busted(&self.secondary_url, timestamp))
        {
            Ok(raw) => raw,
            Err(error) => {
                log::info!("[fetch] secondary document unavailable: {error}");
                return None;
            }
        };

        let block = extract_block(&raw, &self.open_marker, &self.close_marker);
        if block.is_none() {
            log::info!("[fetch] secondary document has no usable block");
        }
        block.map(str::to_owned)
    }
}
