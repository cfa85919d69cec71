use anyhow::Context;
use forge_core::paths;
use std::path::Path;

pub fn run(root: &Path, port: u16) -> anyhow::Result<()> {
    if !paths::config_path(root).exists() {
        anyhow::bail!("no {} under {}; run 'forge init' first", paths::CONFIG_FILE, root.display());
    }
    let rt = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let root = root.to_path_buf();
    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
            .await
            .with_context(|| format!("failed to bind port {port}"))?;
        println!("forge API for {} on http://localhost:{}", root.display(), listener.local_addr()?.port());
        tokio::select! {
            res = forge_server::serve_on(root, listener) => res,
            _ = tokio::signal::ctrl_c() => Ok(()),
        }
    })
}
