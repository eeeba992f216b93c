use anyhow::{Context, Result};
use ipdb::{Database, OpenMode};
use serde_json::json;
use std::net::IpAddr;
use std::path::PathBuf;

/// Print one JSON object per address; returns whether any address matched
pub fn cmd_lookup(database: PathBuf, ips: Vec<IpAddr>, mode: OpenMode, prefix: bool) -> Result<bool> {
    let db = Database::open_with_mode(&database, mode)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;

    let mut results = Vec::with_capacity(ips.len());
    let mut any_found = false;

    for ip in ips {
        let (data, network) = db
            .lookup_network(ip)
            .with_context(|| format!("Lookup failed for: {}", ip))?;
        any_found |= data.is_some();

        let mut entry = json!({
            "ip": ip.to_string(),
            "found": data.is_some(),
            "prefix_len": network.prefix_len(),
            "data": data,
        });
        if prefix {
            entry["network"] = json!(network.to_string());
        }
        results.push(entry);
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    db.close();
    Ok(any_found)
}
