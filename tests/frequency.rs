use kira_snp_harvester::frequency::{FrequencyTable, count_file, count_lines};
use kira_snp_harvester::report::to_csv;

#[test]
fn file_and_line_counts_agree() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("dataset_raw_SNP_Y.txt");
    let content = "rs1\tAC\tC/T\tGG\nrs2\tac\tc/t\tta\nrs3\tno allele here";
    std::fs::write(&path, content).unwrap();

    let from_file = count_file(&path, "c/t").unwrap();
    assert_eq!(from_file, count_lines(content.lines(), "c/t"));
    assert_eq!(from_file.total(), 3);
    assert_eq!(from_file.get("ac_b"), 2);
    assert_eq!(from_file.get("gg_a"), 1);
    assert_eq!(from_file.get("ta_a"), 1);
}

#[test]
fn invalid_utf8_lines_are_still_counted() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("raw.txt");
    std::fs::write(&path, b"rs1\tcg\tc/t\tat\xff\n\xfe\xfd\n").unwrap();

    let table = count_file(&path, "c/t").unwrap();
    assert_eq!(table.total(), 2);
    assert_eq!(table.get("cg_b"), 1);
    assert_eq!(table.get("at_a"), 1);
}

#[test]
fn empty_table_renders_zero_row() {
    let csv = to_csv(&FrequencyTable::new());
    let values = csv.lines().nth(1).unwrap();
    assert!(values.split(',').all(|value| value == "0"));
    assert_eq!(FrequencyTable::keys().count(), 33);
}
