use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::Dataset;
use crate::error::HarvestError;

pub const TOTAL_LABEL: &str = "TOTAL";

/// Layout of raw datasets and reports under one output directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn dataset_path(&self, dataset: &Dataset) -> Utf8PathBuf {
        self.root.join(format!(
            "dataset_raw_{}_{}.txt",
            dataset.label(),
            dataset.allele
        ))
    }

    pub fn allele_report_path(&self, dataset: &Dataset) -> Utf8PathBuf {
        self.report_path(&dataset.label(), dataset.allele.as_str())
    }

    pub fn total_report_path(&self, label: &str) -> Utf8PathBuf {
        self.report_path(label, TOTAL_LABEL)
    }

    fn report_path(&self, label: &str, suffix: &str) -> Utf8PathBuf {
        self.root.join(format!("{label}_{suffix}.csv"))
    }

    pub fn ensure_root(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.root.as_std_path()).map_err(|err| HarvestError::FileAccess {
            path: self.root.clone().into_std_path_buf(),
            message: err.to_string(),
        })
    }

    /// Removes a raw dataset so the next session starts from offset 0.
    pub fn discard_dataset(&self, dataset: &Dataset) -> Result<bool, HarvestError> {
        let path = self.dataset_path(dataset);
        if !path.as_std_path().exists() {
            return Ok(false);
        }
        fs::remove_file(path.as_std_path()).map_err(|err| HarvestError::FileAccess {
            path: path.into_std_path_buf(),
            message: err.to_string(),
        })?;
        Ok(true)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("kira-snp-report")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Allele;

    #[test]
    fn layout_paths() {
        let store = Store::new(Utf8PathBuf::from("resources"));
        let allele: Allele = "Y".parse().unwrap();
        let snp = Dataset::new("snp", false, allele.clone());
        let omim = Dataset::new("snp", true, allele);

        assert_eq!(store.dataset_path(&snp).as_str(), "resources/dataset_raw_SNP_Y.txt");
        assert_eq!(store.dataset_path(&omim).as_str(), "resources/dataset_raw_OMIM_Y.txt");
        assert_eq!(store.allele_report_path(&snp).as_str(), "resources/SNP_Y.csv");
        assert_eq!(store.total_report_path("SNP").as_str(), "resources/SNP_TOTAL.csv");
    }

    #[test]
    fn atomic_write_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = root.join("nested").join("SNP_Y.csv");
        Store::write_bytes_atomic(&path, b"first").unwrap();
        Store::write_bytes_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(path.as_std_path()).unwrap(), b"second");
    }
}
