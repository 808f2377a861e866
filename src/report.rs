use camino::{Utf8Path, Utf8PathBuf};

use crate::error::HarvestError;
use crate::frequency::FrequencyTable;
use crate::store::Store;

/// Renders a table as a two-row CSV: the key header, then the counts.
pub fn to_csv(table: &FrequencyTable) -> String {
    let (header, values): (Vec<&str>, Vec<String>) = table
        .rows()
        .map(|(key, value)| (key, value.to_string()))
        .unzip();
    format!("{}\n{}\n", header.join(","), values.join(","))
}

pub fn write_csv(path: &Utf8Path, table: &FrequencyTable) -> Result<(), HarvestError> {
    Store::write_bytes_atomic(path, to_csv(table).as_bytes())
}

/// `SNP_Y.csv` -> `SNP_Y.json`.
pub fn json_sidecar_path(csv_path: &Utf8Path) -> Utf8PathBuf {
    csv_path.with_extension("json")
}

/// Pretty JSON object with every key in column order.
pub fn to_json(table: &FrequencyTable) -> Result<String, HarvestError> {
    let mut json = serde_json::to_string_pretty(table)
        .map_err(|err| HarvestError::Filesystem(format!("encode report: {err}")))?;
    json.push('\n');
    Ok(json)
}

/// Writes the CSV report and its JSON sidecar, returning the sidecar path.
pub fn write_report(
    csv_path: &Utf8Path,
    table: &FrequencyTable,
) -> Result<Utf8PathBuf, HarvestError> {
    write_csv(csv_path, table)?;
    let json_path = json_sidecar_path(csv_path);
    Store::write_bytes_atomic(&json_path, to_json(table)?.as_bytes())?;
    Ok(json_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::count_lines;

    #[test]
    fn csv_has_one_header_and_one_row() {
        let table = count_lines(["gt\taa", "cc\tgt"], "gt");
        let csv = to_csv(&table);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("total,aa_b,ac_b,"));
        assert!(lines[0].ends_with(",tg_a,tt_a"));
        assert_eq!(lines[0].split(',').count(), 33);
        assert!(lines[1].starts_with("2,0,0,"));
        assert_eq!(lines[1].split(',').map(|v| v.parse::<u64>().unwrap()).sum::<u64>(), 4);
    }

    #[test]
    fn report_writes_csv_and_json_sidecar() {
        let temp = tempfile::tempdir().unwrap();
        let csv_path =
            camino::Utf8PathBuf::from_path_buf(temp.path().join("OMIM_R.csv")).unwrap();
        let table = count_lines(["rs1\tcg\ta/g\tat"], "a/g");

        let json_path = write_report(&csv_path, &table).unwrap();

        assert_eq!(json_path.file_name(), Some("OMIM_R.json"));
        assert_eq!(std::fs::read_to_string(&csv_path).unwrap(), to_csv(&table));
        let json = std::fs::read_to_string(&json_path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["total"], 1);
        assert_eq!(value["cg_b"], 1);
        assert_eq!(value["at_a"], 1);
        assert_eq!(value.as_object().unwrap().len(), 33);
        assert!(json.trim_start().starts_with("{\n  \"total\": 1,\n  \"aa_b\": 0"));
    }
}
