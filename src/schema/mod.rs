use crate::error::AppResult;

pub mod core;
pub mod storage;

/// Registers every namespace this binary knows about. One-shot at startup;
/// safe to call again with identical declarations.
pub fn register_all() -> AppResult<()> {
    core::register()?;
    storage::register()?;
    Ok(())
}
