//! Attestation crafter CLI
//!
//! Entry point for the `crafter` command-line tool. Works against the local
//! state file only; file materials are stored inline in the attestation.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use attestation_crafter::api::{CraftingSchema, MaterialPayload, MaterialType, WorkflowMetadata};
use attestation_crafter::config::{default_user_config_path, CrafterConfig, EffectiveConfig};
use attestation_crafter::crafter::{error_chain, Crafter, InitOptions};
use attestation_crafter::materials::{CasBackend, RegistryCredentials, RegistryResolver};
use attestation_crafter::renderer::{key_fingerprint, render_envelope, Ed25519Signer};
use attestation_crafter::statemanager::FilesystemStateManager;
use ci_runners::{Environment, ProcessEnv};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Local mode keeps a single attestation keyed by the empty id
const LOCAL_ATTESTATION_ID: &str = "";

#[derive(Parser)]
#[command(name = "crafter")]
#[command(about = "Craft, sign and push software supply chain attestations", version)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/chainloop/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Crafting state file
    #[arg(long, global = true)]
    state_path: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (e.g. "debug")
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new attestation from a contract
    Init {
        /// Contract file (JSON or TOML)
        #[arg(long)]
        contract: PathBuf,

        /// Do not enforce the runner and never upload
        #[arg(long)]
        dry_run: bool,

        /// Replace an attestation already in progress
        #[arg(long)]
        force: bool,

        /// Workflow name recorded in the attestation
        #[arg(long, default_value = "local")]
        workflow: String,

        /// Project recorded in the attestation
        #[arg(long, default_value = "")]
        project: String,

        /// Attestation annotation, repeatable
        #[arg(long = "annotation", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        annotations: Vec<(String, String)>,
    },

    /// Add a material to the attestation in progress
    Add {
        /// Material name; declared in the contract or free-form
        #[arg(long, default_value = "")]
        name: String,

        /// File path, image reference or literal value
        #[arg(long)]
        value: String,

        /// Material kind (e.g. SBOM_CYCLONEDX_JSON); detected when omitted
        #[arg(long)]
        kind: Option<String>,

        /// Material annotation, repeatable
        #[arg(long = "annotation", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        annotations: Vec<(String, String)>,
    },

    /// Show the attestation in progress
    Status {
        /// Output the raw crafting state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate, render and sign the attestation, then clear the state
    Push {
        /// Ed25519 seed file (32 bytes, hex or base64)
        #[arg(long)]
        key: PathBuf,

        /// Write the envelope here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Discard the attestation in progress
    Reset,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn main() {
    let cli = Cli::parse();

    let effective = match load_config(&cli) {
        Ok(effective) => effective,
        Err(e) => {
            eprintln!("Error loading configuration: {}", error_chain(e.as_ref()));
            process::exit(2);
        }
    };
    init_tracing(&effective.config().log_level);
    debug!(sources = ?effective.sources, "configuration loaded");

    let config = effective.config().clone();
    let result = match cli.command {
        Commands::Init {
            contract,
            dry_run,
            force,
            workflow,
            project,
            annotations,
        } => run_init(&config, &contract, dry_run || config.dry_run, force, workflow, project, annotations),
        Commands::Add {
            name,
            value,
            kind,
            annotations,
        } => run_add(&config, &name, &value, kind.as_deref(), annotations),
        Commands::Status { json } => run_status(&config, &effective, json),
        Commands::Push { key, output } => run_push(&config, &key, output.as_deref()),
        Commands::Reset => run_reset(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", error_chain(e.as_ref()));
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<EffectiveConfig, Box<dyn std::error::Error>> {
    let env = ProcessEnv::shared();
    let user_path = cli
        .config
        .clone()
        .or_else(|| default_user_config_path(env.as_ref()));

    let mut overrides = serde_json::Map::new();
    if let Some(ref path) = cli.state_path {
        overrides.insert("state_path".into(), path.to_string_lossy().into_owned().into());
    }
    if let Some(ref level) = cli.log_level {
        overrides.insert("log_level".into(), level.clone().into());
    }

    Ok(EffectiveConfig::build(
        user_path.as_deref(),
        env.as_ref(),
        Some(serde_json::Value::Object(overrides)),
    )?)
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn new_crafter(config: &CrafterConfig) -> Result<Crafter, Box<dyn std::error::Error>> {
    let state_manager = FilesystemStateManager::new(&config.state_path);
    let env = ProcessEnv::shared();
    let mut resolver = RegistryResolver::new()?;
    if let (Some(server), Some(username), Some(password)) = (
        env.get_non_empty("CHAINLOOP_REGISTRY_SERVER"),
        env.get_non_empty("CHAINLOOP_REGISTRY_USERNAME"),
        env.get_non_empty("CHAINLOOP_REGISTRY_PASSWORD"),
    ) {
        debug!(registry = %server, "using registry credentials from the environment");
        resolver = resolver.with_credentials(server, RegistryCredentials { username, password });
    }
    Ok(Crafter::new(Arc::new(state_manager), env, Arc::new(resolver)))
}

fn local_backend(config: &CrafterConfig) -> CasBackend {
    if config.cas_addr.is_some() {
        warn!("remote CAS is not available from the CLI, storing materials inline");
    }
    CasBackend::inline("inline", config.cas.max_inline_bytes)
}

fn run_init(
    config: &CrafterConfig,
    contract: &std::path::Path,
    dry_run: bool,
    force: bool,
    workflow: String,
    project: String,
    annotations: Vec<(String, String)>,
) -> Result<(), Box<dyn std::error::Error>> {
    let schema = CraftingSchema::from_file(contract)?;
    let metadata = WorkflowMetadata {
        workflow_id: uuid::Uuid::new_v4().to_string(),
        name: workflow,
        project,
        contract_name: contract
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        ..Default::default()
    };

    let mut opts = InitOptions::new(schema, metadata).dry_run(dry_run);
    opts.force = force;
    opts.annotations = annotations.into_iter().collect();

    let mut crafter = new_crafter(config)?;
    crafter.init(opts)?;
    crafter.resolve_env_vars(LOCAL_ATTESTATION_ID)?;

    if let Some(state) = crafter.state() {
        println!("Attestation initialized");
        println!("  Workflow: {}", state.attestation.workflow.name);
        println!("  Runner: {}", state.attestation.runner_type);
        if let Some(ref url) = state.attestation.runner_url {
            println!("  Run: {}", url);
        }
        if let Some(ref head) = state.attestation.head {
            println!("  Commit: {}", head.hash);
        }
        if dry_run {
            println!("  Dry run: yes");
        }
    }
    Ok(())
}

fn run_add(
    config: &CrafterConfig,
    name: &str,
    value: &str,
    kind: Option<&str>,
    annotations: Vec<(String, String)>,
) -> Result<(), Box<dyn std::error::Error>> {
    let annotations: BTreeMap<String, String> = annotations.into_iter().collect();
    let backend = local_backend(config);

    let mut crafter = new_crafter(config)?;
    crafter.load_crafting_state(LOCAL_ATTESTATION_ID)?;

    let kind = match kind {
        Some(kind) => {
            let kind: MaterialType = kind.parse()?;
            crafter
                .add_material_contract_free(LOCAL_ATTESTATION_ID, kind, name, value, &backend, &annotations)?
                .material_type
        }
        None if crafter.is_material_in_contract(name) => {
            crafter
                .add_material_from_contract(LOCAL_ATTESTATION_ID, name, value, &backend, &annotations)?
                .material_type
        }
        None => crafter.add_material_contract_free_auto_detect(
            LOCAL_ATTESTATION_ID,
            name,
            value,
            &backend,
            &annotations,
        )?,
    };

    println!("Material added ({})", kind);
    Ok(())
}

fn run_status(
    config: &CrafterConfig,
    effective: &EffectiveConfig,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut crafter = new_crafter(config)?;
    crafter.load_crafting_state(LOCAL_ATTESTATION_ID)?;
    let Some(state) = crafter.state() else {
        return Ok(());
    };

    if json {
        println!("{}", state.to_json()?);
        return Ok(());
    }

    let attestation = &state.attestation;
    println!("Attestation in progress ({})", config.state_path.display());
    println!("  Workflow: {} ({})", attestation.workflow.name, attestation.workflow.workflow_id);
    println!("  Initialized: {}", attestation.initialized_at.to_rfc3339());
    println!("  Runner: {}", attestation.runner_type);
    println!("  Dry run: {}", if state.dry_run { "yes" } else { "no" });
    if !attestation.annotations.is_empty() {
        println!("  Annotations:");
        for (k, v) in &attestation.annotations {
            println!("    {}={}", k, v);
        }
    }

    println!();
    println!("Materials:");
    for schema in &state.input_schema.materials {
        let status = match attestation.materials.get(&schema.name) {
            Some(_) => "added",
            None if schema.optional => "optional, missing",
            None => "required, missing",
        };
        println!("  {} [{}] {}", schema.name, schema.kind, status);
    }
    for (name, material) in &attestation.materials {
        if state.input_schema.find_material(name).is_some() {
            continue;
        }
        let detail = match &material.payload {
            MaterialPayload::String { value, .. } => value.clone(),
            MaterialPayload::ContainerImage { name, .. } | MaterialPayload::Artifact { name, .. } => {
                name.clone()
            }
        };
        println!("  {} [{}] {} (not in contract)", name, material.material_type, detail);
    }

    match crafter.validate_complete() {
        Ok(()) => println!("\nReady to push"),
        Err(e) => println!("\nNot ready: {}", e),
    }

    println!();
    println!("Configuration sources:");
    for source in &effective.sources {
        match source.path {
            Some(ref path) => println!("  {:?}: {}", source.origin, path),
            None => println!("  {:?}", source.origin),
        }
    }
    Ok(())
}

fn run_push(
    config: &CrafterConfig,
    key: &std::path::Path,
    output: Option<&std::path::Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let signer = Ed25519Signer::from_seed_file(key)?;

    let mut crafter = new_crafter(config)?;
    crafter.load_crafting_state(LOCAL_ATTESTATION_ID)?;
    crafter.validate_complete()?;
    crafter.mark_finished(LOCAL_ATTESTATION_ID)?;

    let Some(state) = crafter.state() else {
        return Ok(());
    };
    let envelope = render_envelope(state, &signer)?;
    let json = envelope.to_json()?;

    match output {
        Some(path) => {
            fs::write(path, &json)?;
            eprintln!(
                "Attestation signed with key {} written to {}",
                key_fingerprint(&signer.verifying_key()),
                path.display()
            );
        }
        None => println!("{}", json),
    }

    crafter.reset(LOCAL_ATTESTATION_ID)?;
    Ok(())
}

fn run_reset(config: &CrafterConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut crafter = new_crafter(config)?;
    crafter.reset(LOCAL_ATTESTATION_ID)?;
    println!("Attestation state removed");
    Ok(())
}
