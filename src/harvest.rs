use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{PageRequest, SearchCursor};
use crate::error::HarvestError;
use crate::eutils::PageFetcher;

/// Capped exponential delay between attempts at a timed-out page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Delay after the `attempt`-th consecutive timeout (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Resumption point derived from the lines already persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadState {
    pub output_path: PathBuf,
    pub lines_already_present: u64,
    pub page_size: u64,
    pub batch_index: u64,
    pub residue: u64,
}

impl DownloadState {
    pub fn resume(output_path: PathBuf, lines_already_present: u64, page_size: u64) -> Self {
        Self {
            output_path,
            lines_already_present,
            page_size,
            batch_index: lines_already_present / page_size,
            residue: lines_already_present % page_size,
        }
    }

    pub fn offset(&self) -> u64 {
        self.batch_index * self.page_size + self.residue
    }

    /// True once the next page would start at or past `total`.
    pub fn is_complete(&self, total: u64) -> bool {
        self.offset() >= total
    }

    fn advance(&mut self) {
        self.batch_index += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HarvestOutcome {
    /// Every page up to the expected count was appended.
    Complete,
    /// The server refused a page; the file holds everything before `offset`.
    Partial { offset: u64, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub output_path: String,
    pub expected: u64,
    pub lines_before: u64,
    pub pages_fetched: u64,
    pub timeouts: u64,
    pub believed_downloaded: u64,
    pub outcome: HarvestOutcome,
}

impl HarvestReport {
    pub fn is_complete(&self) -> bool {
        self.outcome == HarvestOutcome::Complete
    }
}

/// Drives a [`PageFetcher`] over one search cursor, appending pages to a
/// single output file in offset order.
pub struct Harvester<F: PageFetcher> {
    fetcher: F,
    database: String,
    page_size: u64,
    backoff: BackoffPolicy,
}

impl<F: PageFetcher> Harvester<F> {
    pub fn new(fetcher: F, database: impl Into<String>, page_size: u64) -> Self {
        Self {
            fetcher,
            database: database.into(),
            page_size: page_size.max(1),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn run(
        &self,
        cursor: &SearchCursor,
        output: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<HarvestReport, HarvestError> {
        let mut file = open_append(output)?;
        let dropped = truncate_partial_line(output)?;
        if dropped > 0 {
            warn!(
                path = %output.display(),
                bytes = dropped,
                "dropped unterminated last line left by an interrupted session"
            );
        }
        let lines_before = count_nonblank_lines(output)?;
        let mut state = DownloadState::resume(output.to_path_buf(), lines_before, self.page_size);
        info!(
            path = %output.display(),
            lines = lines_before,
            batch_index = state.batch_index,
            residue = state.residue,
            expected = cursor.count,
            "resuming download"
        );
        sink.event(ProgressEvent {
            message: format!(
                "phase=Resume; {lines_before} records present, next offset {}",
                state.offset()
            ),
            elapsed: None,
        });

        let mut pages_fetched = 0u64;
        let mut timeouts = 0u64;
        let mut consecutive_timeouts = 0u32;

        let outcome = loop {
            if state.is_complete(cursor.count) {
                break HarvestOutcome::Complete;
            }

            let offset = state.offset();
            let request = PageRequest {
                database: &self.database,
                cursor,
                page_size: self.page_size,
                offset,
            };
            let started = Instant::now();
            match self.fetcher.fetch_page(&request) {
                Ok(text) => {
                    append_page(&mut file, output, &text)?;
                    state.advance();
                    pages_fetched += 1;
                    consecutive_timeouts = 0;
                    let elapsed = started.elapsed();
                    let end = (offset + self.page_size).min(cursor.count);
                    info!(
                        batch = state.batch_index,
                        offset,
                        end,
                        expected = cursor.count,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "batch appended"
                    );
                    sink.event(ProgressEvent {
                        message: format!(
                            "batch #{}: records {offset}..{end} of {}",
                            state.batch_index, cursor.count
                        ),
                        elapsed: Some(elapsed),
                    });
                }
                Err(HarvestError::BatchTimeout { timeout, .. }) => {
                    timeouts += 1;
                    consecutive_timeouts = consecutive_timeouts.saturating_add(1);
                    let delay = self.backoff.delay(consecutive_timeouts);
                    warn!(
                        offset,
                        timeout_ms = timeout.as_millis() as u64,
                        attempt = consecutive_timeouts,
                        delay_ms = delay.as_millis() as u64,
                        "batch timed out, retrying same offset"
                    );
                    sink.event(ProgressEvent {
                        message: format!(
                            "batch at offset {offset} timed out; retrying (page size {})",
                            self.page_size
                        ),
                        elapsed: Some(started.elapsed()),
                    });
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
                Err(HarvestError::BatchTransport {
                    offset, message, ..
                }) => {
                    warn!(offset, %message, "batch refused, stopping");
                    break HarvestOutcome::Partial { offset, message };
                }
                Err(err) => return Err(err),
            }
        };

        let believed_downloaded = state.offset().min(cursor.count);
        match &outcome {
            HarvestOutcome::Complete => sink.event(ProgressEvent {
                message: format!(
                    "phase=Done; dataset may be complete, check {}",
                    output.display()
                ),
                elapsed: None,
            }),
            HarvestOutcome::Partial { .. } => sink.event(ProgressEvent {
                message: format!(
                    "phase=Done; about {believed_downloaded} of {} records downloaded, rerun to resume {}",
                    cursor.count,
                    output.display()
                ),
                elapsed: None,
            }),
        }

        Ok(HarvestReport {
            output_path: output.display().to_string(),
            expected: cursor.count,
            lines_before,
            pages_fetched,
            timeouts,
            believed_downloaded,
            outcome,
        })
    }
}

fn file_access(path: &Path, err: impl ToString) -> HarvestError {
    HarvestError::FileAccess {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Opens (creating if needed) the output file for appending.
pub fn open_append(path: &Path) -> Result<File, HarvestError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| file_access(path, err))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| file_access(path, err))
}

fn append_page(file: &mut File, path: &Path, text: &str) -> Result<(), HarvestError> {
    file.write_all(text.as_bytes())
        .map_err(|err| file_access(path, err))?;
    if !text.is_empty() && !text.ends_with('\n') {
        file.write_all(b"\n").map_err(|err| file_access(path, err))?;
    }
    file.flush().map_err(|err| file_access(path, err))?;
    file.sync_data().map_err(|err| file_access(path, err))
}

/// Cuts the file back to its last `\n` when it ends mid-line, returning the
/// number of bytes removed. Only used before a session starts appending.
pub fn truncate_partial_line(path: &Path) -> Result<u64, HarvestError> {
    const CHUNK: u64 = 8 * 1024;

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| file_access(path, err))?;
    let len = file.metadata().map_err(|err| file_access(path, err))?.len();

    let mut end = len;
    let mut buf = vec![0u8; CHUNK as usize];
    let keep = loop {
        if end == 0 {
            break 0;
        }
        let start = end.saturating_sub(CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))
            .map_err(|err| file_access(path, err))?;
        file.read_exact(chunk)
            .map_err(|err| file_access(path, err))?;
        if let Some(pos) = chunk.iter().rposition(|&byte| byte == b'\n') {
            break start + pos as u64 + 1;
        }
        end = start;
    };

    if keep < len {
        file.set_len(keep).map_err(|err| file_access(path, err))?;
        file.sync_data().map_err(|err| file_access(path, err))?;
    }
    Ok(len - keep)
}

/// Counts lines holding anything other than whitespace.
pub fn count_nonblank_lines(path: &Path) -> Result<u64, HarvestError> {
    let file = File::open(path).map_err(|err| file_access(path, err))?;
    let mut count = 0u64;
    for line in BufReader::new(file).split(b'\n') {
        let line = line.map_err(|err| file_access(path, err))?;
        if !line.iter().all(u8::is_ascii_whitespace) {
            count += 1;
        }
    }
    Ok(count)
}
