use std::thread;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::{PageRequest, SearchCursor};
use crate::error::HarvestError;
use crate::url_param::set_param;

pub const DEFAULT_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
pub const TOOL_NAME: &str = "kira-snp";

/// Runs an esearch with the history server enabled and returns the cursor.
pub trait CursorResolver: Send + Sync {
    fn search(&self, database: &str, term: &str) -> Result<SearchCursor, HarvestError>;
}

/// Retrieves one page of an executed search as raw text.
///
/// Implementations must bound the call in time and return
/// [`HarvestError::BatchTimeout`] when the bound is exceeded, and
/// [`HarvestError::BatchTransport`] for any other transport failure.
pub trait PageFetcher {
    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<String, HarvestError>;
}

impl<T: PageFetcher + ?Sized> PageFetcher for &T {
    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<String, HarvestError> {
        (**self).fetch_page(request)
    }
}

#[derive(Debug, Clone)]
pub struct EutilsSettings {
    pub base_url: String,
    pub email: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct EutilsHttpClient {
    client: Client,
    settings: EutilsSettings,
}

impl EutilsHttpClient {
    pub fn new(settings: EutilsSettings) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("{TOOL_NAME}/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::EutilsHttp(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(settings.timeout)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| HarvestError::EutilsHttp(err.to_string()))?;

        Ok(Self { client, settings })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{name}", self.settings.base_url.trim_end_matches('/'))
    }

    fn identity_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("tool", TOOL_NAME.to_string())];
        if let Some(email) = &self.settings.email {
            params.push(("email", email.clone()));
        }
        if let Some(api_key) = &self.settings.api_key {
            params.push(("api_key", api_key.clone()));
        }
        params
    }

    /// Builds the efetch URL for a cursor with `retstart=0`; the offset is
    /// rewritten per page.
    pub fn efetch_url(
        &self,
        database: &str,
        cursor: &SearchCursor,
        page_size: u64,
    ) -> Result<String, HarvestError> {
        let mut params = vec![
            ("db", database.to_string()),
            ("retstart", "0".to_string()),
            ("retmax", page_size.to_string()),
            ("rettype", "txt".to_string()),
            ("retmode", "text".to_string()),
            ("query_key", cursor.key.clone()),
            ("WebEnv", cursor.env.clone()),
        ];
        params.extend(self.identity_params());
        let url = Url::parse_with_params(&self.endpoint("efetch.fcgi"), &params)
            .map_err(|err| HarvestError::EutilsHttp(err.to_string()))?;
        Ok(url.to_string())
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, HarvestError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        warn!(status, delay_ms = delay, "esearch retry");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        warn!(error = %err, delay_ms = delay, "esearch retry");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(HarvestError::EutilsHttp(err.to_string()));
                }
            }
        }
    }
}

impl CursorResolver for EutilsHttpClient {
    fn search(&self, database: &str, term: &str) -> Result<SearchCursor, HarvestError> {
        let url = self.endpoint("esearch.fcgi");
        let mut params = vec![
            ("db", database.to_string()),
            ("term", term.to_string()),
            ("usehistory", "y".to_string()),
            ("retmode", "json".to_string()),
            ("retmax", "0".to_string()),
        ];
        params.extend(self.identity_params());

        let response = self.send_with_retries(|| self.client.get(&url).query(&params))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "esearch request failed".to_string());
            return Err(HarvestError::EutilsStatus { status, message });
        }
        let body = response
            .text()
            .map_err(|err| HarvestError::EutilsHttp(err.to_string()))?;
        parse_search_response(&body)
    }
}

impl PageFetcher for EutilsHttpClient {
    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<String, HarvestError> {
        let template = self.efetch_url(request.database, request.cursor, request.page_size)?;
        let url = set_param(&template, "retstart", request.offset)?;
        debug!(%url, "efetch");

        let offset = request.offset;
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| self.page_error(offset, err))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "efetch request failed".to_string());
            return Err(HarvestError::BatchTransport {
                offset,
                status: Some(status),
                message,
            });
        }
        response.text().map_err(|err| self.page_error(offset, err))
    }
}

impl EutilsHttpClient {
    fn page_error(&self, offset: u64, err: reqwest::Error) -> HarvestError {
        if err.is_timeout() {
            HarvestError::BatchTimeout {
                offset,
                timeout: self.settings.timeout,
            }
        } else {
            HarvestError::BatchTransport {
                offset,
                status: err.status().map(|status| status.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    esearchresult: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    count: Option<String>,
    querykey: Option<String>,
    webenv: Option<String>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

/// Extracts the cursor from an esearch JSON (`retmode=json`) body.
pub fn parse_search_response(body: &str) -> Result<SearchCursor, HarvestError> {
    let envelope: SearchEnvelope = serde_json::from_str(body)
        .map_err(|err| HarvestError::SearchResponse(err.to_string()))?;
    let result = envelope.esearchresult;
    if let Some(error) = result.error {
        return Err(HarvestError::SearchResponse(error));
    }
    let count = result
        .count
        .ok_or_else(|| HarvestError::SearchResponse("missing count".to_string()))?
        .trim()
        .parse::<u64>()
        .map_err(|err| HarvestError::SearchResponse(format!("count: {err}")))?;
    let key = result
        .querykey
        .ok_or_else(|| HarvestError::SearchResponse("missing querykey".to_string()))?;
    let env = result
        .webenv
        .ok_or_else(|| HarvestError::SearchResponse("missing webenv".to_string()))?;
    Ok(SearchCursor { count, key, env })
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
