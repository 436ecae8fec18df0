//! Control-plane backed state, keyed by workflow run id

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{state_digest, StateError, StateManager};
use crate::api::CraftingState;
use crate::controlplane::{AttestationStateService, ServiceError};

/// Stores crafting state remotely with optimistic concurrency.
///
/// The digest of the last state read or written for each key is remembered
/// and sent as the base of the next write.
pub struct RemoteStateManager {
    service: Arc<dyn AttestationStateService>,
    base_digests: Mutex<HashMap<String, String>>,
}

impl RemoteStateManager {
    pub fn new(service: Arc<dyn AttestationStateService>) -> Self {
        Self {
            service,
            base_digests: Mutex::new(HashMap::new()),
        }
    }

    fn digests(&self) -> MutexGuard<'_, HashMap<String, String>> {
        // Dropping the map would send the next write without a base.
        self.base_digests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn base_digest(&self, key: &str) -> Option<String> {
        self.digests().get(key).cloned()
    }

    fn remember(&self, key: &str, digest: Option<String>) {
        let mut digests = self.digests();
        match digest {
            Some(d) => {
                digests.insert(key.to_string(), d);
            }
            None => {
                digests.remove(key);
            }
        }
    }

    fn map_err(key: &str, err: ServiceError) -> StateError {
        match err {
            ServiceError::NotFound(_) => StateError::NotFound(key.to_string()),
            ServiceError::Conflict(_) => StateError::Conflict(key.to_string()),
            other => StateError::Remote(other),
        }
    }
}

fn require_key(key: &str) -> Result<(), StateError> {
    if key.is_empty() {
        Err(StateError::MissingKey)
    } else {
        Ok(())
    }
}

impl StateManager for RemoteStateManager {
    fn initialized(&self, key: &str) -> Result<bool, StateError> {
        require_key(key)?;
        self.service
            .initialized(key)
            .map_err(|e| Self::map_err(key, e))
    }

    fn write(&self, key: &str, state: &CraftingState) -> Result<(), StateError> {
        require_key(key)?;
        let base = self.base_digest(key);
        self.service
            .save(key, state, base.as_deref())
            .map_err(|e| Self::map_err(key, e))?;
        self.remember(key, Some(state_digest(state)?));
        Ok(())
    }

    fn read(&self, key: &str) -> Result<CraftingState, StateError> {
        require_key(key)?;
        let (state, digest) = self
            .service
            .read(key)
            .map_err(|e| Self::map_err(key, e))?;
        self.remember(key, Some(digest));
        Ok(state)
    }

    fn reset(&self, key: &str) -> Result<(), StateError> {
        require_key(key)?;
        match self.service.reset(key) {
            Ok(()) | Err(ServiceError::NotFound(_)) => {
                self.remember(key, None);
                Ok(())
            }
            Err(e) => Err(Self::map_err(key, e)),
        }
    }

    fn info(&self, key: &str) -> String {
        format!("remote state for workflow run {}", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Attestation, CraftingSchema, WorkflowMetadata};
    use chrono::Utc;
    use std::collections::BTreeMap;

    /// State service holding `(state, digest)` per run, enforcing base digests
    #[derive(Default)]
    struct InMemoryStateService {
        states: Mutex<HashMap<String, (CraftingState, String)>>,
    }

    impl AttestationStateService for InMemoryStateService {
        fn initialized(&self, run_id: &str) -> Result<bool, ServiceError> {
            Ok(self.states.lock().unwrap().contains_key(run_id))
        }

        fn read(&self, run_id: &str) -> Result<(CraftingState, String), ServiceError> {
            self.states
                .lock()
                .unwrap()
                .get(run_id)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(run_id.to_string()))
        }

        fn save(&self, run_id: &str, state: &CraftingState, base: Option<&str>) -> Result<(), ServiceError> {
            let mut states = self.states.lock().unwrap();
            if let Some((_, current)) = states.get(run_id) {
                if base != Some(current.as_str()) {
                    return Err(ServiceError::Conflict(run_id.to_string()));
                }
            }
            let digest = state_digest(state).map_err(|e| ServiceError::Transport(e.to_string()))?;
            states.insert(run_id.to_string(), (state.clone(), digest));
            Ok(())
        }

        fn reset(&self, run_id: &str) -> Result<(), ServiceError> {
            self.states
                .lock()
                .unwrap()
                .remove(run_id)
                .map(|_| ())
                .ok_or_else(|| ServiceError::NotFound(run_id.to_string()))
        }
    }

    fn state(name: &str) -> CraftingState {
        CraftingState {
            input_schema: CraftingSchema::default(),
            attestation: Attestation {
                workflow: WorkflowMetadata {
                    name: name.into(),
                    ..Default::default()
                },
                initialized_at: Utc::now(),
                finished_at: None,
                runner_type: "RUNNER_TYPE_UNSPECIFIED".into(),
                runner_url: None,
                head: None,
                env_vars: BTreeMap::new(),
                materials: BTreeMap::new(),
                annotations: BTreeMap::new(),
                policy_evaluations: Vec::new(),
            },
            dry_run: false,
        }
    }

    #[test]
    fn test_round_trip() {
        let manager = RemoteStateManager::new(Arc::new(InMemoryStateService::default()));
        assert!(!manager.initialized("run-1").unwrap());

        let written = state("a");
        manager.write("run-1", &written).unwrap();
        assert!(manager.initialized("run-1").unwrap());
        assert_eq!(manager.read("run-1").unwrap(), written);
    }

    #[test]
    fn test_sequential_writes_carry_base_digest() {
        let manager = RemoteStateManager::new(Arc::new(InMemoryStateService::default()));
        manager.write("run-1", &state("a")).unwrap();
        manager.write("run-1", &state("b")).unwrap();
        assert_eq!(manager.read("run-1").unwrap().attestation.workflow.name, "b");
    }

    #[test]
    fn test_poisoned_digest_map_still_sends_base() {
        let manager = RemoteStateManager::new(Arc::new(InMemoryStateService::default()));
        manager.write("run-1", &state("a")).unwrap();

        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = manager.base_digests.lock().unwrap();
            panic!("writer died holding the lock");
        }));
        assert!(manager.base_digests.is_poisoned());

        manager.write("run-1", &state("b")).unwrap();
        assert_eq!(manager.read("run-1").unwrap().attestation.workflow.name, "b");
    }

    #[test]
    fn test_stale_writer_gets_conflict() {
        let service = Arc::new(InMemoryStateService::default());
        let first = RemoteStateManager::new(service.clone());
        let second = RemoteStateManager::new(service);

        first.write("run-1", &state("a")).unwrap();
        second.read("run-1").unwrap();
        first.write("run-1", &state("b")).unwrap();

        let err = second.write("run-1", &state("c")).unwrap_err();
        assert!(matches!(err, StateError::Conflict(k) if k == "run-1"));
    }

    #[test]
    fn test_reset_idempotent_and_requires_key() {
        let manager = RemoteStateManager::new(Arc::new(InMemoryStateService::default()));
        manager.write("run-1", &state("a")).unwrap();
        manager.reset("run-1").unwrap();
        manager.reset("run-1").unwrap();
        assert!(manager.read("run-1").unwrap_err().is_not_found());
        assert!(matches!(manager.reset(""), Err(StateError::MissingKey)));
    }
}
