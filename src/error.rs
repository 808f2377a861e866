use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("query parameter `{param}` not found in url: {url}")]
    #[diagnostic(help("the efetch url template is malformed; this is a bug"))]
    ParamNotFound { param: String, url: String },

    #[error("batch at offset {offset} timed out after {timeout:?}")]
    BatchTimeout { offset: u64, timeout: Duration },

    #[error("batch at offset {offset} failed{}: {message}", status_suffix(.status))]
    BatchTransport {
        offset: u64,
        status: Option<u16>,
        message: String,
    },

    #[error("cannot access output file {path}: {message}")]
    FileAccess { path: PathBuf, message: String },

    #[error("E-utilities request failed: {0}")]
    EutilsHttp(String),

    #[error("E-utilities returned status {status}: {message}")]
    EutilsStatus { status: u16, message: String },

    #[error("unexpected esearch response: {0}")]
    SearchResponse(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid allele: {0}")]
    InvalidAllele(String),

    #[error("no raw datasets found for {0}")]
    NoDatasets(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|status| format!(" with status {status}"))
        .unwrap_or_default()
}
