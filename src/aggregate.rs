use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::Allele;
use crate::error::HarvestError;
use crate::frequency::{FrequencyTable, count_file};

pub const DEFAULT_WORKERS: usize = 4;

/// Sums per-key counts across tables.
pub fn aggregate_tables<'a, I>(tables: I) -> FrequencyTable
where
    I: IntoIterator<Item = &'a FrequencyTable>,
{
    tables
        .into_iter()
        .fold(FrequencyTable::new(), |acc, table| acc.merged(table))
}

/// Matches `dataset_raw_<LABEL>_<ALLELE>.txt` for one label.
pub fn dataset_name_pattern(label: &str) -> Result<Regex, HarvestError> {
    let pattern = format!(r"^dataset_raw_{}_([A-Za-z]+)\.txt$", regex::escape(label));
    Regex::new(&pattern).map_err(|err| HarvestError::InvalidConfig(format!("label {label}: {err}")))
}

/// Extracts the allele from a file name accepted by [`dataset_name_pattern`].
pub fn classify_file_name(file_name: &str, pattern: &Regex) -> Option<Allele> {
    let captures = pattern.captures(file_name)?;
    captures.get(1)?.as_str().parse().ok()
}

#[derive(Debug, Clone, Serialize)]
pub struct FileCount {
    pub path: String,
    pub allele: String,
    pub table: FrequencyTable,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub label: String,
    pub files: Vec<FileCount>,
    pub skipped: Vec<String>,
    pub total: FrequencyTable,
}

/// Counts every classifiable raw dataset in `dir` on up to `workers` threads
/// and merges the results once all of them have finished.
pub fn aggregate_dir(
    dir: &Path,
    label: &str,
    workers: usize,
) -> Result<AggregateReport, HarvestError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| HarvestError::Filesystem(format!("read dir {}: {err}", dir.display())))?;

    let pattern = dataset_name_pattern(label)?;
    let mut jobs: Vec<(PathBuf, Allele)> = Vec::new();
    let mut skipped = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        match classify_file_name(&name, &pattern).filter(|_| path.is_file()) {
            Some(allele) => jobs.push((path, allele)),
            None => {
                debug!(file = %name, "not a raw dataset, skipping");
                skipped.push(name);
            }
        }
    }
    jobs.sort_by(|a, b| a.0.cmp(&b.0));

    let (files, failed) = count_jobs(&jobs, workers, &count_file);
    skipped.extend(failed);
    skipped.sort();

    let total = aggregate_tables(files.iter().map(|file| &file.table));
    Ok(AggregateReport {
        label: label.to_string(),
        files,
        skipped,
        total,
    })
}

type CountFn = dyn Fn(&Path, &str) -> Result<FrequencyTable, HarvestError> + Sync;

fn count_jobs(
    jobs: &[(PathBuf, Allele)],
    workers: usize,
    count: &CountFn,
) -> (Vec<FileCount>, Vec<String>) {
    let workers = workers.clamp(1, jobs.len().max(1));
    let next = AtomicUsize::new(0);

    let results: Vec<Vec<(usize, Result<FrequencyTable, HarvestError>)>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut local = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some((path, allele)) = jobs.get(index) else {
                            break;
                        };
                        local.push((index, count(path, &allele.token())));
                    }
                    local
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    warn!("counting worker panicked; its datasets are reported as skipped");
                    Vec::new()
                })
            })
            .collect()
    });

    let mut ordered: Vec<_> = results.into_iter().flatten().collect();
    ordered.sort_by_key(|(index, _)| *index);
    // Jobs claimed by a panicked worker have no result.
    let mut lost = Vec::new();
    let mut seen = ordered.iter().map(|(index, _)| *index).peekable();
    for index in 0..jobs.len() {
        if seen.next_if_eq(&index).is_none() {
            lost.push(index);
        }
    }

    let mut files = Vec::new();
    let mut failed = Vec::new();
    for (index, result) in ordered {
        let (path, allele) = &jobs[index];
        match result {
            Ok(table) => files.push(FileCount {
                path: path.display().to_string(),
                allele: allele.to_string(),
                table,
            }),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable dataset");
                failed.push(display_name(path));
            }
        }
    }
    for index in lost {
        let (path, _) = &jobs[index];
        warn!(path = %path.display(), "dataset was not counted");
        failed.push(display_name(path));
    }
    (files, failed)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
