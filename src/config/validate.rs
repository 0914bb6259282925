//! Config validation: numeric bounds and obviously broken values.

use anyhow::Result;
use tracing::debug;

use super::MAX_CHUNK_SIZE_MB;
use super::types::Config;
use crate::errors::DropbackError;

const MIB: u64 = 1024 * 1024;

impl Config {
    /// Check bounds that the HTTP layer and Dropbox rely on.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(DropbackError::Config("timeout_seconds must be greater than 0".into()).into());
        }
        if self.chunk_size < MIB || self.chunk_size > MAX_CHUNK_SIZE_MB * MIB {
            return Err(DropbackError::Config(format!(
                "chunk_size_mb must be between 1 and {MAX_CHUNK_SIZE_MB} (got {})",
                self.chunk_size / MIB
            ))
            .into());
        }
        if let Some(p) = &self.log_file
            && p.is_dir()
        {
            return Err(DropbackError::Config(format!(
                "log_file points at a directory: {}",
                p.display()
            ))
            .into());
        }
        debug!(
            timeout_secs = self.timeout.as_secs(),
            chunk_mb = self.chunk_size / MIB,
            flush = self.index_flush_interval,
            "Config validated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rejects_zero_timeout_and_oversized_chunks() {
        let mut c = Config::default();
        c.timeout = Duration::ZERO;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.chunk_size = 151 * MIB;
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("chunk_size_mb"));

        let mut c = Config::default();
        c.chunk_size = 0;
        assert!(c.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }
}
