//! Per-user statistics overview.
//!
//! Prints a quick summary of what a user has ingested and asked:
//! document counts, chunk counts, sessions, messages, and the average
//! answer confidence. Used by `dsn stats` to give confidence that
//! ingestion and querying are working as expected.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::store::{MetadataStore, SqliteStore};

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config, user_email: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let user_id = store.get_or_create_user(user_email, None).await?;
    let stats = store.user_stats(user_id).await?;
    let documents = store.list_documents(user_id).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Docsense — User Stats");
    println!("=====================");
    println!();
    println!("  User:        {}", user_email);
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", stats.total_documents);
    println!("  Chunks:      {}", stats.total_chunks);
    println!("  Sessions:    {}", stats.total_sessions);
    println!("  Messages:    {}", stats.total_messages);
    match stats.avg_confidence {
        Some(avg) => println!("  Confidence:  {:.2} (average)", avg),
        None => println!("  Confidence:  n/a"),
    }

    if !documents.is_empty() {
        println!();
        println!("  By document:");
        println!(
            "  {:<32} {:>10} {:>8} {:>10}   {}",
            "FILENAME", "TYPE", "CHUNKS", "SIZE", "UPLOADED"
        );
        println!("  {}", "-".repeat(76));
        for doc in &documents {
            println!(
                "  {:<32} {:>10} {:>8} {:>10}   {}",
                doc.filename,
                doc.file_type,
                doc.chunk_count,
                format_bytes(doc.byte_size as u64),
                doc.uploaded_at
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_format_scales() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
