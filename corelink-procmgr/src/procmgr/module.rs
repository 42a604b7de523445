//! Processor manager module context

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;

use corelink_api::error::{FirstError, Result};
use corelink_api::sync::Mutex;
use corelink_api::{BootMode, Error, ProcId};

use super::instance::{ProcMgrInstance, ProcMgrParts, StartParams};
use crate::config::ProcMgrConfig;
use crate::processor::AttachParams;

/// Registry of processor instances, created by [`ProcMgr::setup`]
pub struct ProcMgr {
    config: ProcMgrConfig,
    instances: Mutex<HashMap<ProcId, Arc<ProcMgrInstance>>>,
}

impl ProcMgr {
    /// Validates `config` and creates an empty module context
    pub fn setup(config: ProcMgrConfig) -> Result<Self> {
        config.validate()?;
        log::info!("procmgr: setup for up to {} processors", config.max_processors);
        Ok(Self {
            config,
            instances: Mutex::new(HashMap::new()),
        })
    }

    /// Module configuration
    pub fn config(&self) -> &ProcMgrConfig {
        &self.config
    }

    /// Attach parameters used when a caller has no preference
    pub fn default_attach_params(&self) -> AttachParams {
        AttachParams::new(BootMode::Boot)
    }

    /// Start parameters used when a caller has no preference
    pub fn default_start_params(&self) -> StartParams {
        StartParams::default()
    }

    /// Creates the instance for `proc_id` from its collaborators
    pub fn create(&self, proc_id: ProcId, parts: ProcMgrParts) -> Result<Arc<ProcMgrInstance>> {
        log::debug!("procmgr: create {}", proc_id);
        if parts.backend.proc_id() != proc_id {
            return Err(Error::InvalidArgument(format!(
                "backend drives {}, not {}",
                parts.backend.proc_id(),
                proc_id
            )));
        }

        let mut instances = self.instances.lock();
        if instances.contains_key(&proc_id) {
            return Err(Error::AlreadyExists(format!("{} already has an instance", proc_id)));
        }
        if instances.len() >= self.config.max_processors {
            return Err(Error::TableFull(format!(
                "{} processor instances exist",
                self.config.max_processors
            )));
        }

        let instance = Arc::new(ProcMgrInstance::new(proc_id, parts, &self.config));
        instances.insert(proc_id, Arc::clone(&instance));
        Ok(instance)
    }

    /// Returns the instance for `proc_id`
    pub fn open(&self, proc_id: ProcId) -> Result<Arc<ProcMgrInstance>> {
        self.instances
            .lock()
            .get(&proc_id)
            .cloned()
            .ok_or_else(|| Error::HandleNotFound(format!("no instance for {}", proc_id)))
    }

    /// Deletes a detached instance, canceling its outstanding listeners
    pub fn delete(&self, proc_id: ProcId) -> Result<()> {
        log::debug!("procmgr: delete {}", proc_id);
        let mut instances = self.instances.lock();
        let instance = instances
            .get(&proc_id)
            .ok_or_else(|| Error::HandleNotFound(format!("no instance for {}", proc_id)))?;
        if instance.is_attached() {
            return Err(Error::InvalidState(format!(
                "{} still has {} attaches",
                proc_id,
                instance.attach_count()
            )));
        }

        if let Some(instance) = instances.remove(&proc_id) {
            let canceled = instance.cancel_listeners();
            log::info!("procmgr: {} deleted, {} listeners canceled", proc_id, canceled);
        }
        Ok(())
    }

    /// Ids of every instance, in ascending order
    pub fn proc_ids(&self) -> Vec<ProcId> {
        let mut ids: Vec<ProcId> = self.instances.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Tears the module down: detaches and deletes every instance.
    ///
    /// Every instance is torn down even if an earlier one fails; the first
    /// failure is returned.
    pub fn destroy(self) -> Result<()> {
        let mut teardown = FirstError::new();
        let instances: Vec<(ProcId, Arc<ProcMgrInstance>)> = self.instances.lock().drain().collect();
        for (proc_id, instance) in instances {
            let detached = instance.force_detach();
            if let Err(err) = &detached {
                log::warn!("procmgr: destroy {}: {}", proc_id, err);
            }
            teardown.record(detached);
            instance.cancel_listeners();
        }
        log::info!("procmgr: destroyed");
        teardown.finish()
    }
}

impl fmt::Debug for ProcMgr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcMgr")
            .field("config", &self.config)
            .field("instances", &self.proc_ids())
            .finish()
    }
}
