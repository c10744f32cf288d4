use std::process::Command;

const SUMMARY_HEADER: &str = "code,usage_count,total_discount,total_order_value,unique_customers";

fn run(args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_promo-eng"))
        .args(args.iter().map(|fixture| format!("tests/fixtures/{fixture}")))
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn valid_redemptions() {
    let (stdout, stderr, success) = run(&["rules.csv", "redemptions.csv"]);

    assert!(success);
    assert!(stderr.is_empty(), "unexpected stderr: {stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], SUMMARY_HEADER);
    assert_eq!(lines[1], "FIVEOFF,1,3.0000,3.0000,1");
    assert_eq!(lines[2], "SAVE10,2,18.0000,180.0000,2");
    assert_eq!(lines.len(), 3);
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, success) = run(&["rules_with_errors.csv", "redemptions_with_errors.csv"]);

    assert!(success);
    assert!(stderr.contains("percentage discount cannot exceed 100"));
    assert!(stderr.contains("line 4: failed to parse row"));
    assert!(stderr.contains("line 3: failed to parse row"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], SUMMARY_HEADER);
    assert_eq!(lines[1], "SAVE10,1,10.0000,100.0000,1");
    assert_eq!(lines.len(), 2);
}

#[test]
fn missing_arguments_fail() {
    let (stdout, stderr, success) = run(&["rules.csv"]);

    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("usage: promo-eng"));
}

#[test]
fn missing_file_fails() {
    let (stdout, stderr, success) = run(&["rules.csv", "nope.csv"]);

    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("failed to open"));
}
