pub mod foundation;
pub mod pattern;
pub mod run;
pub mod workflow;

use anyhow::Result;
use trinity_core::TrinityConfig;
use trinity_core::runtime::{Runtime, RuntimeSeams};

/// Build a runtime for one command invocation: env config over defaults,
/// command-backed seams rooted at the current directory.
pub fn build_runtime() -> Result<Runtime> {
    let config = TrinityConfig::from_env()?;
    let workdir = std::env::current_dir()?;
    let runtime = Runtime::init(config, RuntimeSeams::local_defaults(workdir))?;
    Ok(runtime)
}
