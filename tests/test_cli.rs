use std::process::Command;

#[test]
fn test_cli_help() {
    let output = Command::new("cargo")
        .args(["run", "--bin", "nfldap", "--", "--help"])
        .output()
        .expect("Failed to execute process");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("A no-frills LDAP server"));
    assert!(stdout.contains("--config"));
    assert!(stdout.contains("--port"));
    assert!(stdout.contains("--log-level"));
    assert!(stdout.contains("--verbose"));
}

#[test]
fn test_cli_version() {
    let output = Command::new("cargo")
        .args(["run", "--bin", "nfldap", "--", "--version"])
        .output()
        .expect("Failed to execute process");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("nfldap"));
}

#[test]
fn test_cli_missing_config_file_exits_nonzero() {
    let output = Command::new("cargo")
        .args([
            "run",
            "--bin",
            "nfldap",
            "--",
            "--config",
            "/nonexistent/nfldap.yaml",
        ])
        .output()
        .expect("Failed to execute process");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot read") || stderr.contains("No such file"));
}

#[test]
fn test_nfpasswd_rejects_mismatched_passwords() {
    use std::io::Write;
    use std::process::Stdio;

    let mut child = Command::new("cargo")
        .args(["run", "--bin", "nfpasswd"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn process");

    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(b"one\ntwo\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_nfpasswd_prints_a_hash() {
    use std::io::Write;
    use std::process::Stdio;

    let mut child = Command::new("cargo")
        .args(["run", "--bin", "nfpasswd"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn process");

    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(b"secret\nsecret\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("{NF-PBKDF2-V1}"));
}
