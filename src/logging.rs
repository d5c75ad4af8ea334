use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber on stderr. Calling it again once a
/// subscriber is set is a no-op.
pub fn init(filter: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_new(filter).with_context(|| format!("invalid log filter '{}'", filter))?;

    // Already initialized (tests, embedding apps)
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .try_init()
        .ok();

    tracing::debug!("logging initialized with filter '{}'", filter);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init("devnote_sync=debug").unwrap();
        init("devnote_sync=info").unwrap();
    }

    #[test]
    fn test_invalid_filter_rejected() {
        assert!(init("devnote_sync=notalevel").is_err());
    }
}
