use anyhow::{Context, Result};
use ipdb::Database;
use serde_json::json;
use std::path::PathBuf;

use crate::cli_utils::{format_bytes, format_unix_timestamp};

pub fn cmd_inspect(database: PathBuf, json_output: bool) -> Result<()> {
    let file_size = std::fs::metadata(&database)
        .with_context(|| format!("Failed to stat: {}", database.display()))?
        .len();
    let db = Database::open(&database)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;
    let metadata = db.metadata();

    if json_output {
        let output = json!({
            "file": database.display().to_string(),
            "file_size": file_size,
            "search_tree_size": metadata.search_tree_size(),
            "data_section_start": metadata.data_section_start(),
            "metadata": metadata,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Database:      {}", database.display());
    println!("File size:     {}", format_bytes(file_size));
    if let Some(db_type) = &metadata.database_type {
        println!("Database type: {}", db_type);
    }
    if let (Some(major), Some(minor)) = (
        metadata.binary_format_major_version,
        metadata.binary_format_minor_version,
    ) {
        println!("Format:        {}.{}", major, minor);
    }
    if let Some(epoch) = metadata.build_epoch {
        println!("Build time:    {} ({})", format_unix_timestamp(epoch), epoch);
    }
    println!();
    println!("Search tree:");
    println!("  IP version:  IPv{}", u8::from(metadata.ip_version));
    println!("  Node count:  {}", metadata.node_count);
    println!("  Record size: {} bits", u16::from(metadata.record_size));
    println!("  Tree size:   {}", format_bytes(metadata.search_tree_size()));

    if !metadata.languages.is_empty() {
        println!();
        println!("Languages:     {}", metadata.languages.join(", "));
    }
    if !metadata.description.is_empty() {
        println!();
        println!("Description:");
        for (lang, text) in &metadata.description {
            println!("  {}: {}", lang, text);
        }
    }

    Ok(())
}
