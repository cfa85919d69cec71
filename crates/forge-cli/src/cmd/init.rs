use anyhow::Context;
use forge_core::{config::Config, io, paths, Engine};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    println!("Initializing forge in: {}", root.display());

    for dir in [paths::FORGE_DIR, paths::PROFILES_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        Config::new(&project_name)
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    let ledger_existed = paths::ledger_path(root).exists();
    // Opening creates the ledger and every table; it also rejects a broken config.
    Engine::open(root).context("failed to open ledger")?;
    if ledger_existed {
        println!("  exists:  {}", paths::LEDGER_FILE);
    } else {
        println!("  created: {}", paths::LEDGER_FILE);
    }
    Ok(())
}
