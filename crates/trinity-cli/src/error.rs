//! Error-to-exit-code mapping for the process boundary.
//!
//! Categories: 0 graceful shutdown, 2 configuration error, 10 foundation
//! failure, 11 budget exhaustion, 12 workflow fatal failure, 1 everything
//! else.

use trinity_models::TrinityError;

pub fn handle_error(err: anyhow::Error) -> ! {
    let code = err
        .downcast_ref::<TrinityError>()
        .map(TrinityError::exit_category)
        .unwrap_or(1);
    eprintln!("error: {err:#}");
    std::process::exit(code);
}
