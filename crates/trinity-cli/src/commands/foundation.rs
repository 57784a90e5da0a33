use anyhow::Result;

use super::build_runtime;
use crate::cli::OutputFormat;

pub async fn verify(format: OutputFormat) -> Result<()> {
    let runtime = build_runtime()?;
    let health = runtime.foundation().verify().await?;

    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&health)?);
    } else {
        println!("healthy:     {}", health.is_healthy);
        println!("branch:      {}", health.branch);
        println!("tests:       {:?}", health.test_status);
        println!("violations:  {}", health.violation_count);
        if let Some(message) = &health.error_message {
            println!("error:       {message}");
        }
    }

    if !health.is_healthy {
        return Err(trinity_models::TrinityError::BrokenFoundation(
            health
                .error_message
                .unwrap_or_else(|| "foundation unhealthy".into()),
        )
        .into());
    }
    Ok(())
}
