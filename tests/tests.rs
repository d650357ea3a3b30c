#[test]
fn check_rxfer_help() {
    let mut cmd = assert_cmd::Command::cargo_bin("rxfer").unwrap();
    cmd.arg("--help").assert().success();
}

#[test]
fn check_rxfer_version() {
    let mut cmd = assert_cmd::Command::cargo_bin("rxfer").unwrap();
    cmd.arg("--version").assert().success();
}
