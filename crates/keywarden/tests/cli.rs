//! CLI smoke tests for the non-interactive subcommands.

use std::process::Command;

use base64::Engine as _;
use eyre::Context as _;

fn warden_cmd(cfg: &tempfile::TempDir, data: &tempfile::TempDir) -> Command {
    let exe = assert_cmd::cargo::cargo_bin!("keywarden");
    let mut cmd = Command::new(exe);
    cmd.env("KEYWARDEN_CONFIG_DIR", cfg.path())
        .env("KEYWARDEN_DATA_DIR", data.path())
        .env_remove("KEYWARDEN_MASTER_SECRET");
    cmd
}

#[test]
fn gen_key_prints_a_fresh_32_byte_base64_secret() -> eyre::Result<()> {
    let cfg = tempfile::tempdir()?;
    let data = tempfile::tempdir()?;

    let a = warden_cmd(&cfg, &data)
        .arg("gen-key")
        .output()
        .context("run keywarden gen-key")?;
    assert!(a.status.success());
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(String::from_utf8_lossy(&a.stdout).trim())
        .context("decode generated key")?;
    assert_eq!(decoded.len(), 32);

    let b = warden_cmd(&cfg, &data)
        .arg("gen-key")
        .output()
        .context("run keywarden gen-key again")?;
    assert_ne!(a.stdout, b.stdout, "keys must be fresh each run");
    Ok(())
}

#[test]
fn paths_prints_the_overridden_dirs() -> eyre::Result<()> {
    let cfg = tempfile::tempdir()?;
    let data = tempfile::tempdir()?;

    let out = warden_cmd(&cfg, &data)
        .arg("paths")
        .output()
        .context("run keywarden paths")?;
    assert!(out.status.success());

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse paths json")?;
    assert_eq!(
        v.get("data_dir").and_then(|x| x.as_str()),
        data.path().to_str()
    );
    assert_eq!(
        v.get("config_dir").and_then(|x| x.as_str()),
        cfg.path().to_str()
    );
    Ok(())
}

#[test]
fn doctor_json_reports_an_empty_install() -> eyre::Result<()> {
    let cfg = tempfile::tempdir()?;
    let data = tempfile::tempdir()?;

    let out = warden_cmd(&cfg, &data)
        .args(["doctor", "--json"])
        .output()
        .context("run keywarden doctor --json")?;
    assert!(
        out.status.success(),
        "doctor exited non-zero: status={:?}, stderr={}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse doctor json")?;
    assert!(v.get("version").and_then(|x| x.as_str()).is_some());
    assert_eq!(
        v.get("user_count").and_then(serde_json::Value::as_u64),
        Some(0)
    );
    assert_eq!(
        v.get("master_secret_configured")
            .and_then(serde_json::Value::as_bool),
        Some(false)
    );
    Ok(())
}

#[test]
fn run_without_a_master_secret_fails_with_a_hint() -> eyre::Result<()> {
    let cfg = tempfile::tempdir()?;
    let data = tempfile::tempdir()?;

    let out = warden_cmd(&cfg, &data)
        .arg("run")
        .output()
        .context("run keywarden run")?;
    assert!(!out.status.success());
    assert!(
        String::from_utf8_lossy(&out.stderr).contains("gen-key"),
        "error should point at gen-key"
    );
    Ok(())
}
