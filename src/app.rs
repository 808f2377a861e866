use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::aggregate::{FileCount, aggregate_dir};
use crate::config::ResolvedConfig;
use crate::domain::{Dataset, SearchCursor};
use crate::error::HarvestError;
use crate::eutils::{CursorResolver, PageFetcher};
use crate::frequency::{FrequencyTable, count_file};
use crate::harvest::{HarvestReport, Harvester, count_nonblank_lines, open_append};
use crate::report::write_report;
use crate::store::Store;

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Discard an existing raw file instead of resuming it.
    pub fresh: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub label: String,
    pub allele: String,
    pub database: String,
    pub term: String,
    pub cursor: SearchCursor,
    pub report: HarvestReport,
    pub lines_after: u64,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountResult {
    pub label: String,
    pub allele: String,
    pub token: String,
    pub dataset_path: String,
    pub report_path: String,
    pub json_path: String,
    pub table: FrequencyTable,
}

#[derive(Debug, Clone, Serialize)]
pub struct TotalResult {
    pub label: String,
    pub report_path: String,
    pub json_path: String,
    pub files: Vec<FileCount>,
    pub skipped: Vec<String>,
    pub total: FrequencyTable,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<R: CursorResolver, F: PageFetcher> {
    store: Store,
    resolver: R,
    fetcher: F,
}

impl<R: CursorResolver, F: PageFetcher> App<R, F> {
    pub fn new(store: Store, resolver: R, fetcher: F) -> Self {
        Self {
            store,
            resolver,
            fetcher,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Resolves the search cursor and downloads (or resumes) the raw dataset.
    pub fn download(
        &self,
        config: &ResolvedConfig,
        options: DownloadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, HarvestError> {
        let dataset = &config.dataset;
        let output = self.store.dataset_path(dataset);

        self.store.ensure_root()?;
        if options.fresh && self.store.discard_dataset(dataset)? {
            sink.event(ProgressEvent {
                message: format!("phase=Prepare; removed {output}"),
                elapsed: None,
            });
        }
        // Surface an unwritable destination before talking to the server.
        drop(open_append(output.as_std_path())?);

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; esearch db={} term={}", dataset.database, config.term),
            elapsed: None,
        });
        let start = Instant::now();
        let cursor = self.resolver.search(&dataset.database, &config.term)?;
        info!(
            count = cursor.count,
            query_key = %cursor.key,
            web_env = %cursor.env,
            "search resolved"
        );
        sink.event(ProgressEvent {
            message: format!(
                "esearch: {} records, QueryKey {}, WebEnv {}",
                cursor.count, cursor.key, cursor.env
            ),
            elapsed: Some(start.elapsed()),
        });

        let report = Harvester::new(&self.fetcher, dataset.database.clone(), config.page_size)
            .with_backoff(config.backoff)
            .run(&cursor, output.as_std_path(), sink)?;
        let lines_after = count_nonblank_lines(output.as_std_path())?;
        sink.event(ProgressEvent {
            message: format!("phase=Store; {lines_after} entries in {output}"),
            elapsed: None,
        });

        Ok(DownloadResult {
            label: dataset.label(),
            allele: dataset.allele.to_string(),
            database: dataset.database.clone(),
            term: config.term.clone(),
            cursor,
            report,
            lines_after,
            finished_at: iso_timestamp(),
        })
    }

    /// Counts dinucleotide transitions of one raw dataset and writes its CSV.
    pub fn count(
        &self,
        dataset: &Dataset,
        sink: &dyn ProgressSink,
    ) -> Result<CountResult, HarvestError> {
        let dataset_path = self.store.dataset_path(dataset);
        if !dataset_path.as_std_path().is_file() {
            return Err(HarvestError::NoDatasets(dataset_path.to_string()));
        }
        let token = dataset.allele.token();
        sink.event(ProgressEvent {
            message: format!("phase=Count; {dataset_path} (token {token:?})"),
            elapsed: None,
        });

        let start = Instant::now();
        let table = count_file(dataset_path.as_std_path(), &token)?;
        let report_path = self.store.allele_report_path(dataset);
        let json_path = write_report(&report_path, &table)?;
        sink.event(ProgressEvent {
            message: format!("phase=Store; {} lines counted, wrote {report_path}", table.total()),
            elapsed: Some(start.elapsed()),
        });

        Ok(CountResult {
            label: dataset.label(),
            allele: dataset.allele.to_string(),
            token,
            dataset_path: dataset_path.to_string(),
            report_path: report_path.to_string(),
            json_path: json_path.to_string(),
            table,
        })
    }

    /// Counts every raw dataset of `label` and writes the merged total CSV.
    pub fn total(
        &self,
        label: &str,
        workers: usize,
        sink: &dyn ProgressSink,
    ) -> Result<TotalResult, HarvestError> {
        sink.event(ProgressEvent {
            message: format!(
                "phase=Count; scanning {} with {workers} workers",
                self.store.root()
            ),
            elapsed: None,
        });
        let start = Instant::now();
        let aggregate = aggregate_dir(self.store.root().as_std_path(), label, workers)?;
        if aggregate.files.is_empty() {
            return Err(HarvestError::NoDatasets(format!(
                "{label} in {}",
                self.store.root()
            )));
        }

        let report_path = self.store.total_report_path(label);
        let json_path = write_report(&report_path, &aggregate.total)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; {} datasets merged, wrote {report_path}",
                aggregate.files.len()
            ),
            elapsed: Some(start.elapsed()),
        });

        Ok(TotalResult {
            label: aggregate.label,
            report_path: report_path.to_string(),
            json_path: json_path.to_string(),
            files: aggregate.files,
            skipped: aggregate.skipped,
            total: aggregate.total,
        })
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;
    use crate::config::{Config, ConfigLoader};
    use crate::domain::PageRequest;
    use crate::harvest::{BackoffPolicy, HarvestOutcome};
    use crate::output::JsonOutput;

    struct MockEutils {
        count: u64,
    }

    impl CursorResolver for MockEutils {
        fn search(&self, _database: &str, _term: &str) -> Result<SearchCursor, HarvestError> {
            Ok(SearchCursor {
                count: self.count,
                key: "1".to_string(),
                env: "MCID_mock".to_string(),
            })
        }
    }

    impl PageFetcher for MockEutils {
        fn fetch_page(&self, request: &PageRequest<'_>) -> Result<String, HarvestError> {
            let end = (request.offset + request.page_size).min(self.count);
            Ok((request.offset..end)
                .map(|i| format!("rs{i}\tac\tc/t\tgg\n"))
                .collect())
        }
    }

    fn setup(count: u64) -> (tempfile::TempDir, App<MockEutils, MockEutils>, ResolvedConfig) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("resources")).unwrap();
        let mut config = ConfigLoader::resolve_config(Config {
            page_size: Some(4),
            output_dir: Some(root.to_string()),
            ..Config::default()
        })
        .unwrap();
        config.backoff = BackoffPolicy::none();
        let app = App::new(
            Store::new(root),
            MockEutils { count },
            MockEutils { count },
        );
        (temp, app, config)
    }

    #[test]
    fn download_then_count_writes_report() {
        let (_temp, app, config) = setup(10);

        let download = app
            .download(&config, DownloadOptions::default(), &JsonOutput)
            .unwrap();
        assert_eq!(download.report.outcome, HarvestOutcome::Complete);
        assert_eq!(download.lines_after, 10);
        assert_eq!(download.label, "SNP");

        let counted = app.count(&config.dataset, &JsonOutput).unwrap();
        assert_eq!(counted.token, "c/t");
        assert_eq!(counted.table.total(), 10);
        assert_eq!(counted.table.get("ac_b"), 10);
        assert_eq!(counted.table.get("gg_a"), 10);
        assert!(counted.report_path.ends_with("SNP_Y.csv"));
        assert!(std::path::Path::new(&counted.report_path).exists());
    }

    #[test]
    fn fresh_download_discards_previous_file() {
        let (_temp, app, config) = setup(3);
        app.download(&config, DownloadOptions::default(), &JsonOutput)
            .unwrap();

        let resumed = app
            .download(&config, DownloadOptions::default(), &JsonOutput)
            .unwrap();
        assert_eq!(resumed.report.pages_fetched, 0);
        assert_eq!(resumed.lines_after, 3);

        let fresh = app
            .download(&config, DownloadOptions { fresh: true }, &JsonOutput)
            .unwrap();
        assert_eq!(fresh.report.lines_before, 0);
        assert_eq!(fresh.report.pages_fetched, 1);
        assert_eq!(fresh.lines_after, 3);
    }

    #[test]
    fn total_requires_datasets() {
        let (_temp, app, _config) = setup(3);
        app.store().ensure_root().unwrap();
        let err = app.total("SNP", 4, &JsonOutput).unwrap_err();
        assert_matches!(err, HarvestError::NoDatasets(_));
    }

    #[test]
    fn total_merges_downloaded_datasets() {
        let (_temp, app, mut config) = setup(5);
        app.download(&config, DownloadOptions::default(), &JsonOutput)
            .unwrap();
        config.dataset.allele = "R".parse().unwrap();
        app.download(&config, DownloadOptions::default(), &JsonOutput)
            .unwrap();

        let total = app.total("SNP", 2, &JsonOutput).unwrap();
        assert_eq!(total.files.len(), 2);
        assert_eq!(total.total.total(), 10);
        // R expands to a/g, which never occurs in the mock records.
        assert_eq!(total.total.get("ac_b"), 5);
        assert!(total.report_path.ends_with("SNP_TOTAL.csv"));
        assert!(total.json_path.ends_with("SNP_TOTAL.json"));
        assert!(std::path::Path::new(&total.json_path).exists());
    }
}
