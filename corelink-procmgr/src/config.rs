//! Processor manager configuration

use corelink_api::error::{Error, Result};
use corelink_api::MAX_PROCESSORS;

use crate::processor::profile::SocProfile;

/// Module-wide configuration handed to [`ProcMgr::setup`](crate::ProcMgr::setup)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcMgrConfig {
    /// Maximum number of processor instances the module manages
    pub max_processors: usize,
    /// Capacity of each instance's host-side mapped-entry table
    pub max_mapped_entries: usize,
    /// Capacity of each backend's translation table
    pub address_table_capacity: usize,
    /// Maximum number of outstanding state-change listeners per backend
    pub max_listeners: usize,
    /// Maximum number of arguments passed to a loaded image
    pub max_load_args: usize,
    /// Issue aligned 4-byte writes as a single word store
    pub register_write_fixup: bool,
}

impl Default for ProcMgrConfig {
    fn default() -> Self {
        Self {
            max_processors: 4,
            max_mapped_entries: 32,
            address_table_capacity: 32,
            max_listeners: 16,
            max_load_args: 16,
            register_write_fixup: true,
        }
    }
}

impl ProcMgrConfig {
    /// Sets the maximum number of processor instances
    pub fn with_max_processors(mut self, max_processors: usize) -> Self {
        self.max_processors = max_processors;
        self
    }

    /// Sets the mapped-entry table capacity
    pub fn with_max_mapped_entries(mut self, max_mapped_entries: usize) -> Self {
        self.max_mapped_entries = max_mapped_entries;
        self
    }

    /// Sets the translation table capacity
    pub fn with_address_table_capacity(mut self, capacity: usize) -> Self {
        self.address_table_capacity = capacity;
        self
    }

    /// Sets the listener capacity
    pub fn with_max_listeners(mut self, max_listeners: usize) -> Self {
        self.max_listeners = max_listeners;
        self
    }

    /// Sets the load argument limit
    pub fn with_max_load_args(mut self, max_load_args: usize) -> Self {
        self.max_load_args = max_load_args;
        self
    }

    /// Enables or disables the single-store register write path
    pub fn with_register_write_fixup(mut self, enabled: bool) -> Self {
        self.register_write_fixup = enabled;
        self
    }

    /// Checks every limit, returning `InvalidArgument` for the first bad one
    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("max_processors", self.max_processors),
            ("max_mapped_entries", self.max_mapped_entries),
            ("address_table_capacity", self.address_table_capacity),
            ("max_listeners", self.max_listeners),
            ("max_load_args", self.max_load_args),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(Error::InvalidArgument(format!("{} must be non-zero", name)));
            }
        }

        if self.max_processors > MAX_PROCESSORS as usize {
            return Err(Error::InvalidArgument(format!(
                "max_processors {} exceeds the {} known slave cores",
                self.max_processors, MAX_PROCESSORS
            )));
        }

        for profile in SocProfile::builtin() {
            if profile.static_map.len() > self.address_table_capacity {
                return Err(Error::InvalidArgument(format!(
                    "address_table_capacity {} cannot hold the {} static map ({} regions)",
                    self.address_table_capacity,
                    profile.name,
                    profile.static_map.len()
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelink_api::ErrorKind;

    #[test]
    fn test_default_config_is_valid() {
        let config = ProcMgrConfig::default();
        assert_eq!(config.max_processors, 4);
        assert_eq!(config.max_mapped_entries, 32);
        assert!(config.register_write_fixup);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = ProcMgrConfig::default().with_max_mapped_entries(0);
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.to_string().contains("max_mapped_entries"));
    }

    #[test]
    fn test_table_smaller_than_static_map_rejected() {
        let config = ProcMgrConfig::default().with_address_table_capacity(1);
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_too_many_processors_rejected() {
        let config = ProcMgrConfig::default().with_max_processors(MAX_PROCESSORS as usize + 1);
        assert!(config.validate().is_err());
    }
}
