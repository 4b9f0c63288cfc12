//! Pipeline configuration.
//!
//! The numeric constants must satisfy `RECORD_OVERHEAD + max_record_len <=
//! slot_capacity - reservation`, so a maximum-length record placed in an
//! empty slot still leaves `reservation` bytes free. The defaults also have
//! `RECORD_OVERHEAD + max_record_len == reservation`, so a slot that has not
//! been handed off can always take one more maximum-length record.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Channel::codec::RECORD_OVERHEAD;
use crate::errors::{PipelineError, Result};

/// Size of one shared slot in bytes.
pub const DEFAULT_SLOT_CAPACITY: usize = 1024;
/// Free-space threshold below which a slot is handed to the consumer.
pub const DEFAULT_RESERVATION: usize = 256;
/// Longest record text accepted, in bytes: 9 + 247 == 256 == reservation.
pub const DEFAULT_MAX_RECORD_LEN: usize = 247;
/// Upper bound on channels per set.
pub const MAX_CHANNELS: usize = 16;
/// Prefix for every named shared-memory object.
pub const DEFAULT_NAME_PREFIX: &str = "slotpipe";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub channel_count: usize,
    pub slot_capacity: usize,
    pub reservation: usize,
    pub max_record_len: usize,
    pub name_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_count: 1,
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            reservation: DEFAULT_RESERVATION,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel_count(mut self, count: usize) -> Self {
        self.channel_count = count;
        self
    }

    pub fn with_slot_capacity(mut self, capacity: usize) -> Self {
        self.slot_capacity = capacity;
        self
    }

    pub fn with_reservation(mut self, reservation: usize) -> Self {
        self.reservation = reservation;
        self
    }

    pub fn with_max_record_len(mut self, len: usize) -> Self {
        self.max_record_len = len;
        self
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Parse a configuration from TOML text. Missing keys take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: PipelineConfig =
            toml::from_str(text).map_err(|e| PipelineError::config("toml", e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| PipelineError::resource(path.display().to_string(), e))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_count == 0 || self.channel_count > MAX_CHANNELS {
            return Err(PipelineError::config(
                "channel_count",
                format!("must be a value of 1-{MAX_CHANNELS}, inclusive (got {})", self.channel_count),
            ));
        }
        if self.slot_capacity == 0 {
            return Err(PipelineError::config("slot_capacity", "must be greater than zero"));
        }
        if self.max_record_len == 0 {
            return Err(PipelineError::config("max_record_len", "must be greater than zero"));
        }
        if self.reservation >= self.slot_capacity {
            return Err(PipelineError::config(
                "reservation",
                format!("must be below slot_capacity {} (got {})", self.slot_capacity, self.reservation),
            ));
        }
        if RECORD_OVERHEAD + self.max_record_len > self.slot_capacity - self.reservation {
            return Err(PipelineError::config(
                "max_record_len",
                format!(
                    "{RECORD_OVERHEAD} + {} exceeds slot_capacity - reservation ({})",
                    self.max_record_len,
                    self.slot_capacity - self.reservation
                ),
            ));
        }
        if self.name_prefix.is_empty() || self.name_prefix.contains('/') {
            return Err(PipelineError::config("name_prefix", "must be non-empty and contain no '/'"));
        }
        Ok(())
    }

    /// Serialized size of the longest acceptable record.
    pub fn max_serialized_len(&self) -> usize {
        RECORD_OVERHEAD + self.max_record_len
    }

    pub(crate) fn control_name(&self) -> String {
        format!("{}-ctl", self.name_prefix)
    }

    pub(crate) fn slot_name(&self, index: usize) -> String {
        format!("{}-slot-{index}", self.name_prefix)
    }

    pub(crate) fn token_name(&self, index: usize) -> String {
        format!("{}-tok-{index}", self.name_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let cfg = PipelineConfig::default();
        cfg.validate().unwrap();
        // a maximum-length record exactly fills the reserved tail
        assert_eq!(cfg.max_serialized_len(), cfg.reservation);
    }

    #[test]
    fn test_channel_count_range() {
        assert!(PipelineConfig::new().with_channel_count(0).validate().is_err());
        assert!(PipelineConfig::new().with_channel_count(17).validate().is_err());
        PipelineConfig::new().with_channel_count(16).validate().unwrap();
    }

    #[test]
    fn test_record_len_must_leave_reservation_free() {
        // 9 + 760 > 1024 - 256
        let cfg = PipelineConfig::new().with_max_record_len(1024 - 256 - RECORD_OVERHEAD + 1);
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, PipelineError::Config { ref parameter, .. } if parameter == "max_record_len"));

        // longer than the default but within C - R
        PipelineConfig::new().with_max_record_len(DEFAULT_MAX_RECORD_LEN + 1).validate().unwrap();
        PipelineConfig::new()
            .with_reservation(256)
            .with_max_record_len(1024 - 256 - RECORD_OVERHEAD)
            .validate()
            .unwrap();
    }

    #[test]
    fn test_reservation_below_capacity() {
        let cfg = PipelineConfig::new().with_slot_capacity(64).with_reservation(64);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_from_toml_partial() {
        let cfg = PipelineConfig::from_toml_str("channel_count = 4\nname_prefix = \"demo\"\n").unwrap();
        assert_eq!(cfg.channel_count, 4);
        assert_eq!(cfg.name_prefix, "demo");
        assert_eq!(cfg.slot_capacity, DEFAULT_SLOT_CAPACITY);
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slotpipe.toml");
        fs::write(&path, "channel_count = 3\nreservation = 200\n").unwrap();
        let cfg = PipelineConfig::load(&path).unwrap();
        assert_eq!(cfg.channel_count, 3);
        assert_eq!(cfg.reservation, 200);

        let missing = PipelineConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(PipelineError::Resource { .. })));
    }

    #[test]
    fn test_names_depend_only_on_index() {
        let cfg = PipelineConfig::new().with_name_prefix("p");
        assert_eq!(cfg.slot_name(3), "p-slot-3");
        assert_eq!(cfg.token_name(3), "p-tok-3");
        assert_eq!(cfg.control_name(), "p-ctl");
    }
}
