use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use super::build_runtime;

/// `trinity run` - start the orchestration loop until ctrl-c.
pub async fn run() -> Result<()> {
    let runtime = Arc::new(build_runtime()?);
    info!("Starting Trinity orchestration loop");

    let run_handle = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.run().await })
    };

    tokio::select! {
        result = run_handle => {
            // The loop ended on its own: foundation failure or fatal error.
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            runtime.shutdown().await;
        }
    }
    Ok(())
}
