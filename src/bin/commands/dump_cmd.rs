use anyhow::{Context, Result};
use ipdb::Database;
use serde_json::json;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

pub fn cmd_dump(database: PathBuf, limit: Option<usize>) -> Result<()> {
    let db = Database::open(&database)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut written = 0usize;

    for item in db.networks().take(limit.unwrap_or(usize::MAX)) {
        let (network, data) = item.context("Failed to walk search tree")?;
        let line = json!({
            "network": network.to_string(),
            "data": data,
        });
        serde_json::to_writer(&mut out, &line)?;
        out.write_all(b"\n")?;
        written += 1;
    }
    out.flush()?;

    log::debug!("dumped {} networks", written);
    Ok(())
}
