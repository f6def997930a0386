use crate::{config::ConfigStore, paths::WardenPaths, store::FileUserStore};
use eyre::Context as _;
use serde::Serialize;
use std::io::Write as _;

/// Self-diagnostic snapshot. Safe to paste anywhere: booleans and counts
/// only, never secrets.
#[derive(Debug, Serialize)]
pub struct Report {
    pub version: &'static str,
    pub config_file_present: bool,
    pub master_secret_configured: bool,
    pub master_salt_present: bool,
    pub data_dir_present: bool,
    pub user_count: usize,
}

pub fn report(paths: &WardenPaths) -> eyre::Result<Report> {
    let config_path = paths.config_dir.join("config.toml");
    let config_file_present = config_path.exists();
    let cfg = if config_file_present {
        ConfigStore::new(paths).load_or_init_default()?
    } else {
        crate::config::WardenConfig::default()
    };

    let user_count = FileUserStore::new(paths).count_users()?;

    Ok(Report {
        version: env!("CARGO_PKG_VERSION"),
        config_file_present,
        master_secret_configured: cfg.master_secret().is_ok(),
        master_salt_present: cfg.master_salt_b64.is_some(),
        data_dir_present: paths.data_dir.exists(),
        user_count,
    })
}

pub fn run(paths: &WardenPaths, json: bool) -> eyre::Result<()> {
    let r = report(paths)?;
    let mut out = std::io::stdout().lock();
    if json {
        let s = serde_json::to_string_pretty(&r).context("serialize doctor report")?;
        writeln!(out, "{s}").context("write doctor report")?;
    } else {
        writeln!(out, "keywarden {}", r.version).context("write doctor report")?;
        writeln!(out, "config file present:      {}", r.config_file_present)
            .context("write doctor report")?;
        writeln!(
            out,
            "master secret configured: {}",
            r.master_secret_configured
        )
        .context("write doctor report")?;
        writeln!(out, "master salt present:      {}", r.master_salt_present)
            .context("write doctor report")?;
        writeln!(out, "data dir present:         {}", r.data_dir_present)
            .context("write doctor report")?;
        writeln!(out, "users:                    {}", r.user_count)
            .context("write doctor report")?;
    }
    Ok(())
}
