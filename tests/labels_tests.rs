use logtriage::labels::{auto_label, baseline_report, read_table, write_table, LabeledRow};
use logtriage::rules::{BASELINE_RULES, LABELING_RULES};
use logtriage::TriageError;

#[test]
fn table_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("labels.csv");
    let rows = vec![
        LabeledRow::new("sshd: authentication failure; user=root", "SSHAuthFail"),
        LabeledRow::new("line with, a comma and \"quotes\"", "Odd"),
    ];
    write_table(&path, &rows).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("line_norm,label\n"));
    assert_eq!(read_table(&path).unwrap(), rows);
}

#[test]
fn extra_columns_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels.csv");
    std::fs::write(&path, "id,line_norm,label\n1,kernel panic,Panic\n2,pending,\n").unwrap();
    assert_eq!(read_table(&path).unwrap(), vec![LabeledRow::new("kernel panic", "Panic")]);
}

#[test]
fn missing_line_column_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels.csv");
    std::fs::write(&path, "text,label\nfoo,Bar\n").unwrap();
    assert!(matches!(read_table(&path), Err(TriageError::InvalidTable(_))));
}

#[test]
fn auto_label_uses_the_labeling_rules_once_per_line() {
    let log = "\
Mar 10 10:00:01 mac kernel[0]: [Bluetooth] HCI error 42
Mar 10 10:00:02 mac kernel[0]: [Bluetooth] HCI error 43
Mar 10 10:00:03 mac configd[12]: no network route to 10.0.0.1
Mar 10 10:00:04 mac app[7]: all good";
    let rows = auto_label(&[log], Vec::new());
    let labels: Vec<&str> = rows.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["BluetoothError", "NoNetworkRoute"]);
    assert!(rows.iter().all(|r| r.line_norm == r.line_norm.to_lowercase()));
}

#[test]
fn baseline_needs_overlapping_lines() {
    let rows = vec![LabeledRow::new("something else", "X")];
    assert!(matches!(baseline_report(&["unrelated"], &rows), Err(TriageError::NoLabeledRows)));
}

#[test]
fn rule_tables_share_labels_but_not_patterns() {
    let shared: Vec<&str> = LABELING_RULES
        .labels()
        .into_iter()
        .filter(|l| BASELINE_RULES.labels().contains(l))
        .collect();
    assert_eq!(shared, vec!["BluetoothError", "NoNetworkRoute"]);
    for l in LABELING_RULES.rules() {
        assert!(BASELINE_RULES.rules().iter().all(|b| b.pattern.as_str() != l.pattern.as_str()));
    }
}
