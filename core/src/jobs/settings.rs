//! Key/value settings for jobs and stages.
//!
//! Settings are looked up stage-first, then job-wide, then default. Keys are
//! plain strings so a job document can carry settings for task types the
//! engine itself knows nothing about.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Well-known setting keys consumed by the core.
pub mod keys {
    /// Maximum number of disk segments merged in one pass.
    pub const MERGE_MAX_FILE_INPUTS: &str = "merge.max-file-inputs";
    /// Buffer size in bytes for channel and segment readers.
    pub const READ_BUFFER_SIZE: &str = "channel.read-buffer-size";
    /// Buffer size in bytes for channel and segment writers.
    pub const WRITE_BUFFER_SIZE: &str = "channel.write-buffer-size";
    /// Compression applied to intermediate merge-pass files.
    pub const INTERMEDIATE_COMPRESSION: &str = "channel.compression-type";
    /// Whether intermediate files carry per-record checksums.
    pub const INTERMEDIATE_CHECKSUM: &str = "channel.enable-checksum";
    /// Interval in milliseconds between progress reports.
    pub const PROGRESS_INTERVAL_MS: &str = "task.progress-interval-ms";
}

/// Default merge fan-in when [`keys::MERGE_MAX_FILE_INPUTS`] is not set.
pub const DEFAULT_MERGE_MAX_FILE_INPUTS: usize = 64;

/// Default progress-report interval.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1000;

/// An ordered string-to-string settings map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsMap {
    entries: BTreeMap<String, String>,
}

impl SettingsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries.insert(key.into(), value.to_string());
    }

    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Parse the value stored under `key`. A missing key is `Ok(None)`;
    /// an unparseable value is a configuration error.
    pub fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.entries.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
                EngineError::configuration(format!("invalid value {raw:?} for setting {key}: {e}"))
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve a setting checked first at stage level, then at job level.
pub fn stage_or_job_setting<T>(
    stage_settings: &SettingsMap,
    job_settings: &SettingsMap,
    key: &str,
) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match stage_settings.get::<T>(key)? {
        Some(value) => Ok(Some(value)),
        None => job_settings.get::<T>(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_get() {
        let mut settings = SettingsMap::new();
        settings.set(keys::MERGE_MAX_FILE_INPUTS, 16);
        assert_eq!(
            settings.get::<usize>(keys::MERGE_MAX_FILE_INPUTS).unwrap(),
            Some(16)
        );
        assert_eq!(settings.get::<usize>("absent").unwrap(), None);
    }

    #[test]
    fn test_unparseable_value_is_configuration_error() {
        let mut settings = SettingsMap::new();
        settings.set(keys::READ_BUFFER_SIZE, "lots");
        let err = settings.get::<usize>(keys::READ_BUFFER_SIZE).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn test_stage_overrides_job() {
        let mut job = SettingsMap::new();
        job.set(keys::MERGE_MAX_FILE_INPUTS, 64);
        let mut stage = SettingsMap::new();
        stage.set(keys::MERGE_MAX_FILE_INPUTS, 4);

        let resolved: Option<usize> =
            stage_or_job_setting(&stage, &job, keys::MERGE_MAX_FILE_INPUTS).unwrap();
        assert_eq!(resolved, Some(4));

        let fallback: Option<usize> =
            stage_or_job_setting(&SettingsMap::new(), &job, keys::MERGE_MAX_FILE_INPUTS).unwrap();
        assert_eq!(fallback, Some(64));
    }
}
