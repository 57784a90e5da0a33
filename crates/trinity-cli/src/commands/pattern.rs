use anyhow::Result;
use std::collections::BTreeSet;

use super::build_runtime;
use crate::cli::OutputFormat;

pub async fn search(query: &str, limit: usize, format: OutputFormat) -> Result<()> {
    let runtime = build_runtime()?;
    let results = runtime
        .patterns()
        .search(query, BTreeSet::new(), limit)
        .await?;

    if format.is_json() {
        let value: Vec<serde_json::Value> = results
            .iter()
            .map(|(pattern, score)| {
                serde_json::json!({
                    "id": pattern.id,
                    "key": pattern.key,
                    "category": pattern.category,
                    "description": pattern.description,
                    "score": score,
                    "usage_count": pattern.usage.usage_count(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("no patterns match");
        return Ok(());
    }
    for (pattern, score) in results {
        println!(
            "{score:.3}  {:<24}  [{}]  {}",
            pattern.key, pattern.category, pattern.description
        );
    }
    Ok(())
}
