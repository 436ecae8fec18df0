//! Attestation crafting state machine
//!
//! `Uninitialized -> Initialized -> (add materials)* -> validated`, then the
//! state is handed to the renderer and reset. Every mutating call persists the
//! full state through the [`StateManager`] before returning, so a crash leaves
//! the last successful write intact.
//!
//! All calls are synchronous; callers must not run two mutations against the
//! same crafter concurrently.

mod errors;
pub mod git;

pub use errors::{error_chain, CrafterError};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use ci_runners::{discover_and_enforce, new_runner, Environment, Runner, RunnerType, SharedEnv};
use tracing::{debug, info, warn};

use crate::api::{
    Attestation, CraftingSchema, CraftingState, Material, MaterialSchema, MaterialType,
    WorkflowMetadata,
};
use crate::materials::{self, CasBackend, CraftContext, ImageResolver, MaterialError};
use crate::statemanager::StateManager;

/// Arguments of [`Crafter::init`]
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub schema: CraftingSchema,
    pub workflow: WorkflowMetadata,
    pub dry_run: bool,
    /// Runner the contract requires; defaults to the contract's own
    pub runner_type: RunnerType,
    /// Empty in local mode, the workflow run id in remote mode
    pub attestation_id: String,
    /// Values for attestation annotations the contract leaves empty
    pub annotations: BTreeMap<String, String>,
    /// Replace an existing state instead of failing
    pub force: bool,
}

impl InitOptions {
    pub fn new(schema: CraftingSchema, workflow: WorkflowMetadata) -> Self {
        let runner_type = schema.runner.kind;
        Self {
            schema,
            workflow,
            dry_run: false,
            runner_type,
            attestation_id: String::new(),
            annotations: BTreeMap::new(),
            force: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_annotation(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(name.into(), value.into());
        self
    }
}

/// Owns one crafting state and the collaborators needed to grow it
pub struct Crafter {
    state_manager: Arc<dyn StateManager>,
    env: SharedEnv,
    resolver: Arc<dyn ImageResolver>,
    working_dir: PathBuf,
    runner: Option<Box<dyn Runner>>,
    state: Option<CraftingState>,
}

impl Crafter {
    pub fn new(
        state_manager: Arc<dyn StateManager>,
        env: SharedEnv,
        resolver: Arc<dyn ImageResolver>,
    ) -> Self {
        Self {
            state_manager,
            env,
            resolver,
            working_dir: PathBuf::from("."),
            runner: None,
            state: None,
        }
    }

    /// Directory searched for git context (default: current directory)
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn state(&self) -> Option<&CraftingState> {
        self.state.as_ref()
    }

    pub fn runner(&self) -> Option<&dyn Runner> {
        self.runner.as_deref()
    }

    fn state_ref(&self) -> Result<&CraftingState, CrafterError> {
        self.state.as_ref().ok_or(CrafterError::NotInitialized)
    }

    fn persist(&self, id: &str) -> Result<(), CrafterError> {
        let state = self.state_ref()?;
        self.state_manager.write(id, state)?;
        debug!(location = %self.state_manager.info(id), "crafting state persisted");
        Ok(())
    }

    /// Create and persist a fresh crafting state
    pub fn init(&mut self, opts: InitOptions) -> Result<(), CrafterError> {
        opts.schema.validate()?;
        let id = opts.attestation_id.as_str();

        if !opts.force && self.state_manager.initialized(id)? {
            return Err(CrafterError::AlreadyInitialized);
        }

        let runner = discover_and_enforce(opts.runner_type, self.env.clone(), opts.dry_run)?;
        let head = git::head_commit(&self.working_dir);
        if head.is_none() {
            debug!(dir = %self.working_dir.display(), "no git repository, recording no head commit");
        }

        let annotations = merge_attestation_annotations(&opts.schema, &opts.annotations)?;

        let state = CraftingState {
            attestation: Attestation {
                workflow: opts.workflow,
                initialized_at: Utc::now(),
                finished_at: None,
                runner_type: runner.id().as_str().to_string(),
                runner_url: runner.run_uri(),
                head,
                env_vars: BTreeMap::new(),
                materials: BTreeMap::new(),
                annotations,
                policy_evaluations: Vec::new(),
            },
            input_schema: opts.schema,
            dry_run: opts.dry_run,
        };

        info!(
            runner = %runner.id(),
            dry_run = opts.dry_run,
            workflow = %state.attestation.workflow.name,
            "attestation initialized"
        );
        self.runner = Some(runner);
        self.state = Some(state);
        self.persist(id)
    }

    pub fn already_initialized(&self, id: &str) -> Result<bool, CrafterError> {
        Ok(self.state_manager.initialized(id)?)
    }

    /// Load a persisted state and rebuild its runner
    pub fn load_crafting_state(&mut self, id: &str) -> Result<(), CrafterError> {
        let state = match self.state_manager.read(id) {
            Ok(state) => state,
            Err(e) if e.is_not_found() => return Err(CrafterError::NotInitialized),
            Err(e) => return Err(e.into()),
        };

        // RUNNER_TYPE_UNSPECIFIED is a valid record of the generic runner; empty is not.
        if state.attestation.runner_type.is_empty() {
            return Err(CrafterError::InvalidRunnerType(String::new()));
        }
        let runner_type: RunnerType = state
            .attestation
            .runner_type
            .parse()
            .map_err(|_| CrafterError::InvalidRunnerType(state.attestation.runner_type.clone()))?;

        debug!(runner = %runner_type, "crafting state loaded");
        self.runner = Some(new_runner(runner_type, self.env.clone()));
        self.state = Some(state);
        Ok(())
    }

    pub fn is_material_in_contract(&self, key: &str) -> bool {
        self.state
            .as_ref()
            .map(|s| s.input_schema.find_material(key).is_some())
            .unwrap_or(false)
    }

    /// Add a material declared in the contract
    pub fn add_material_from_contract(
        &mut self,
        id: &str,
        key: &str,
        value: &str,
        backend: &CasBackend,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Material, CrafterError> {
        let declared = self
            .state_ref()?
            .input_schema
            .find_material(key)
            .cloned()
            .ok_or_else(|| CrafterError::MaterialNotInContract(key.to_string()))?;

        let mut material = self.craft(key, backend, |ctx| {
            materials::craft(declared.kind, key, value, ctx)
        })?;
        material.output = declared.output;
        material.annotations = merge_material_annotations(&declared, annotations)?;

        self.store_material(id, material)
    }

    /// Add a material of an explicit kind that the contract may not declare.
    ///
    /// An empty `name` is replaced with a generated one. A name the contract
    /// does declare goes through [`Crafter::add_material_from_contract`].
    pub fn add_material_contract_free(
        &mut self,
        id: &str,
        kind: MaterialType,
        name: &str,
        value: &str,
        backend: &CasBackend,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Material, CrafterError> {
        let state = self.state_ref()?;
        if let Some(declared) = state.input_schema.find_material(name) {
            if declared.kind != kind {
                return Err(CrafterError::MaterialKindMismatch {
                    key: name.to_string(),
                    declared: declared.kind,
                    requested: kind,
                });
            }
            return self.add_material_from_contract(id, name, value, backend, annotations);
        }

        let key = material_name(name);
        let mut material = self.craft(&key, backend, |ctx| {
            materials::craft(kind, &key, value, ctx)
        })?;
        material.annotations = free_annotations(&key, annotations)?;
        self.store_material(id, material)
    }

    /// Add a material whose kind is detected from `value`
    pub fn add_material_contract_free_auto_detect(
        &mut self,
        id: &str,
        name: &str,
        value: &str,
        backend: &CasBackend,
        annotations: &BTreeMap<String, String>,
    ) -> Result<MaterialType, CrafterError> {
        if self.is_material_in_contract(name) {
            let material = self.add_material_from_contract(id, name, value, backend, annotations)?;
            return Ok(material.material_type);
        }
        self.state_ref()?;

        let key = material_name(name);
        let mut material = self.craft(&key, backend, |ctx| {
            materials::auto_detect(&key, value, ctx)
        })?;
        material.annotations = free_annotations(&key, annotations)?;
        let kind = material.material_type;
        self.store_material(id, material)?;
        Ok(kind)
    }

    fn craft<F>(&self, key: &str, backend: &CasBackend, f: F) -> Result<Material, CrafterError>
    where
        F: FnOnce(CraftContext<'_>) -> Result<Material, MaterialError>,
    {
        let state = self.state_ref()?;
        // Dry runs never reach the CAS.
        let backend = if state.dry_run && backend.uploader.is_some() {
            CasBackend::inline(backend.name.clone(), backend.max_size)
        } else {
            backend.clone()
        };
        let ctx = CraftContext {
            backend: &backend,
            resolver: self.resolver.as_ref(),
        };
        debug!(key, backend = %backend.name, "crafting material");
        f(ctx).map_err(|source| CrafterError::AddMaterial {
            key: key.to_string(),
            source,
        })
    }

    fn store_material(&mut self, id: &str, material: Material) -> Result<Material, CrafterError> {
        material.validate()?;
        let state = self.state.as_mut().ok_or(CrafterError::NotInitialized)?;
        if state.attestation.materials.contains_key(&material.id) {
            warn!(material = %material.id, "material already added, overriding it");
        }
        state
            .attestation
            .materials
            .insert(material.id.clone(), material.clone());
        self.persist(id)?;
        info!(material = %material.id, kind = %material.material_type, "material added");
        Ok(material)
    }

    /// Record the runner's variables and the contract's allow-listed ones
    pub fn resolve_env_vars(&mut self, id: &str) -> Result<(), CrafterError> {
        let state = self.state_ref()?;
        let runner = self.runner.as_ref().ok_or(CrafterError::NotInitialized)?;

        let mut resolved = match runner.resolve_env_vars() {
            Ok(vars) => vars,
            Err(e) if state.dry_run => {
                warn!(error = %e, "runner environment incomplete, continuing because of dry-run");
                runner
                    .list_env_vars()
                    .iter()
                    .filter_map(|spec| {
                        runner
                            .env()
                            .get_non_empty(spec.name)
                            .map(|v| (spec.name.to_string(), v))
                    })
                    .collect()
            }
            Err(e) => return Err(e.into()),
        };

        let mut missing = Vec::new();
        for name in &state.input_schema.env_allow_list {
            match self.env.get_non_empty(name) {
                Some(value) => {
                    resolved.insert(name.clone(), value);
                }
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(CrafterError::MissingEnvVars(missing));
        }

        if let Some(state) = self.state.as_mut() {
            state.attestation.env_vars = resolved;
        }
        self.persist(id)
    }

    /// Gate before rendering
    pub fn validate_complete(&self) -> Result<(), CrafterError> {
        Ok(self.state_ref()?.validate_complete()?)
    }

    /// Stamp the finish time
    pub fn mark_finished(&mut self, id: &str) -> Result<(), CrafterError> {
        let state = self.state.as_mut().ok_or(CrafterError::NotInitialized)?;
        state.attestation.finished_at = Some(Utc::now());
        self.persist(id)
    }

    /// Discard the persisted state; idempotent
    pub fn reset(&mut self, id: &str) -> Result<(), CrafterError> {
        self.state_manager.reset(id)?;
        self.state = None;
        self.runner = None;
        info!(location = %self.state_manager.info(id), "crafting state reset");
        Ok(())
    }
}

fn material_name(name: &str) -> String {
    if !name.is_empty() {
        return name.to_string();
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("material-{}", nanos)
}

/// Contract values win; runtime values only fill empty ones
fn merge_material_annotations(
    declared: &MaterialSchema,
    runtime: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, CrafterError> {
    let mut merged: BTreeMap<String, String> = declared
        .annotations
        .iter()
        .map(|a| (a.name.clone(), a.value.clone()))
        .collect();

    for (name, value) in runtime {
        match merged.get_mut(name) {
            None => {
                return Err(CrafterError::UnknownAnnotation {
                    material: declared.name.clone(),
                    annotation: name.clone(),
                })
            }
            Some(existing) if !existing.is_empty() => {
                warn!(
                    material = %declared.name,
                    annotation = %name,
                    "annotation already set in the contract, ignoring runtime value"
                );
            }
            Some(existing) => *existing = value.clone(),
        }
    }

    if let Some((name, _)) = merged.iter().find(|(_, v)| v.is_empty()) {
        return Err(CrafterError::MissingAnnotation {
            material: declared.name.clone(),
            annotation: name.clone(),
        });
    }
    Ok(merged)
}

/// Materials outside the contract take annotations as given, but not empty ones
fn free_annotations(
    key: &str,
    runtime: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, CrafterError> {
    if let Some((name, _)) = runtime.iter().find(|(_, v)| v.is_empty()) {
        return Err(CrafterError::MissingAnnotation {
            material: key.to_string(),
            annotation: name.clone(),
        });
    }
    Ok(runtime.clone())
}

/// Same override rule as materials, applied to attestation-level annotations.
/// Values still empty afterwards are caught by completeness validation.
fn merge_attestation_annotations(
    schema: &CraftingSchema,
    runtime: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, CrafterError> {
    let mut merged: BTreeMap<String, String> = schema
        .annotations
        .iter()
        .map(|a| (a.name.clone(), a.value.clone()))
        .collect();

    for (name, value) in runtime {
        match merged.get_mut(name) {
            None => return Err(CrafterError::UnknownAttestationAnnotation(name.clone())),
            Some(existing) if !existing.is_empty() => {
                warn!(annotation = %name, "annotation already set in the contract, ignoring runtime value");
            }
            Some(existing) => *existing = value.clone(),
        }
    }
    Ok(merged)
}
