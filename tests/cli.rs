use std::process::Command;

#[test]
fn query_help_lists_store_options() {
    let output = Command::new(env!("CARGO_BIN_EXE_lexvec-query"))
        .arg("--help")
        .output()
        .expect("run CLI");

    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--top-k", "--dimension", "--metric", "--ivf-lists", "--database-url"] {
        assert!(stdout.contains(flag), "missing {flag} in:\n{stdout}");
    }
}

#[test]
fn zero_dimension_fails_before_connecting() {
    let output = Command::new(env!("CARGO_BIN_EXE_lexvec-upsert"))
        .args(["--dimension", "0", "--database-url", "postgres://nobody@127.0.0.1:1/none"])
        .env_remove("EMBED_DIM")
        .output()
        .expect("run CLI");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("embedding dimension must be positive"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn unknown_metric_is_rejected_by_parser() {
    let output = Command::new(env!("CARGO_BIN_EXE_lexvec-index"))
        .args(["--metric", "manhattan"])
        .env_remove("LEXVEC_METRIC")
        .output()
        .expect("run CLI");

    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(2));
}
