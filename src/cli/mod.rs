//! CLI subcommands: init, validate, stages, plan, synth, secrets.

use crate::core::error::{ConfigurationError, Error, ValidationError};
use crate::core::manifest::{build_manifest, DirectoryTarget, RenderTarget};
use crate::core::parser::{self, ContextOverrides};
use crate::core::stages::StageConfigTable;
use crate::core::types::{Context, ExecutionPlan, Manifest, PlanAction, ProjectFile, StageProfile};
use crate::core::{composer, planner};
use crate::secrets::{self, DirectorySecretStore, UploadAction};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

pub const PROJECT_FILE: &str = "stackplan.yaml";

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter stackplan.yaml
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Project name written into the file
        #[arg(long, default_value = parser::DEFAULT_PROJECT)]
        project: String,
    },

    /// Validate the stage table and compose every stage
    Validate {
        #[command(flatten)]
        context: ContextArgs,
    },

    /// List declared stages
    Stages {
        #[command(flatten)]
        context: ContextArgs,
    },

    /// Show what submitting the manifest would change
    Plan {
        #[command(flatten)]
        context: ContextArgs,

        /// Render target directory
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,
    },

    /// Compose, validate and submit the manifest
    Synth {
        #[command(flatten)]
        context: ContextArgs,

        /// Render target directory
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,

        /// Print the manifest instead of writing it
        #[arg(long)]
        stdout: bool,
    },

    /// Upload the stage secret payload (JSON object of strings)
    Secrets {
        #[command(flatten)]
        context: ContextArgs,

        /// Payload file
        #[arg(short, long)]
        input: PathBuf,

        /// Secret store directory
        #[arg(long, default_value = "secrets")]
        store_dir: PathBuf,
    },
}

/// Invocation context flags shared by every stage-aware command.
#[derive(Args, Debug, Clone, Default)]
pub struct ContextArgs {
    /// Project file (default: ./stackplan.yaml when present)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Deployment stage
    #[arg(short, long)]
    pub stage: Option<String>,

    /// Project name
    #[arg(short, long)]
    pub project: Option<String>,

    /// Container image tag
    #[arg(long = "app-version")]
    pub version: Option<String>,

    /// Apex domain of the hosted zones
    #[arg(long)]
    pub base_domain: Option<String>,

    /// Target account
    #[arg(long, env = "STACKPLAN_ACCOUNT")]
    pub account: Option<String>,

    /// Target region
    #[arg(long, env = "STACKPLAN_REGION")]
    pub region: Option<String>,
}

impl ContextArgs {
    fn overrides(&self) -> ContextOverrides {
        ContextOverrides {
            stage: self.stage.clone(),
            project: self.project.clone(),
            version: self.version.clone(),
            base_domain: self.base_domain.clone(),
            account: self.account.clone(),
            region: self.region.clone(),
        }
    }
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), Error> {
    match cmd {
        Commands::Init { path, project } => cmd_init(&path, &project),
        Commands::Validate { context } => cmd_validate(&context),
        Commands::Stages { context } => cmd_stages(&context),
        Commands::Plan { context, out_dir } => cmd_plan(&context, &out_dir),
        Commands::Synth {
            context,
            out_dir,
            stdout,
        } => cmd_synth(&context, &out_dir, stdout),
        Commands::Secrets {
            context,
            input,
            store_dir,
        } => cmd_secrets(&context, &input, &store_dir),
    }
}

fn cmd_init(path: &Path, project: &str) -> Result<(), Error> {
    let config_path = path.join(PROJECT_FILE);
    if config_path.exists() {
        return Err(ConfigurationError::AlreadyExists(config_path).into());
    }
    let write_err = |source| ConfigurationError::Write {
        path: config_path.clone(),
        source,
    };
    std::fs::create_dir_all(path).map_err(write_err)?;
    std::fs::write(&config_path, parser::starter_project(project)).map_err(write_err)?;

    println!("Initialized stackplan project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

/// Load the project file: an explicit path must exist, the default is optional.
fn load_project(args: &ContextArgs) -> Result<ProjectFile, Error> {
    match &args.file {
        Some(path) => Ok(parser::parse_project_file(path)?),
        None if Path::new(PROJECT_FILE).exists() => Ok(parser::parse_project_file(Path::new(PROJECT_FILE))?),
        None => {
            tracing::debug!("no {} found, using defaults", PROJECT_FILE);
            Ok(ProjectFile::default())
        }
    }
}

/// Load, validate and build the stage table, reporting every problem.
fn load_table(file: &ProjectFile) -> Result<StageConfigTable, Error> {
    let errors = parser::validate_project(file);
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err(ValidationError::Rejected { count: errors.len() }.into());
    }
    Ok(parser::build_table(file)?)
}

/// Everything a stage-scoped command needs.
fn prepare(args: &ContextArgs) -> Result<(Context, StageProfile), Error> {
    let file = load_project(args)?;
    let table = load_table(&file)?;
    let ctx = parser::resolve_context(&args.overrides(), &file)?;
    let profile = table.resolve(&ctx.stage, &ctx.project)?;
    Ok((ctx, profile))
}

fn synthesize(ctx: &Context, profile: &StageProfile) -> Result<Manifest, Error> {
    let deployment = composer::compose(ctx, profile)?;
    build_manifest(ctx, profile, &deployment)
}

fn cmd_validate(args: &ContextArgs) -> Result<(), Error> {
    let file = load_project(args)?;
    let table = load_table(&file)?;

    // Compose every stage so graph problems surface too.
    let mut nodes = 0;
    for (stage, _) in table.entries() {
        let overrides = ContextOverrides {
            stage: Some(stage.to_string()),
            ..args.overrides()
        };
        let ctx = parser::resolve_context(&overrides, &file)?;
        let profile = table.resolve(&ctx.stage, &ctx.project)?;
        nodes += composer::compose(&ctx, &profile)?.order.len();
    }
    println!("OK: {} stage(s), {} node(s)", table.len(), nodes);
    Ok(())
}

fn cmd_stages(args: &ContextArgs) -> Result<(), Error> {
    let file = load_project(args)?;
    let table = load_table(&file)?;
    let project = args
        .project
        .clone()
        .or(file.project)
        .unwrap_or_else(|| parser::DEFAULT_PROJECT.to_string());
    for (stage, settings) in table.entries() {
        let profile = table.resolve(stage, &project)?;
        println!(
            "{}: domain={} services={} secrets={}",
            stage,
            settings.domain,
            settings.services.len(),
            profile.secrets_name
        );
    }
    Ok(())
}

fn cmd_plan(args: &ContextArgs, out_dir: &Path) -> Result<(), Error> {
    let (ctx, profile) = prepare(args)?;
    let manifest = synthesize(&ctx, &profile)?;
    let target = DirectoryTarget::new(out_dir);
    let previous = target.previous(ctx.stage.as_str())?;
    let plan = planner::plan(&manifest, previous.as_ref());
    print!("{}", render_plan(&plan));
    Ok(())
}

/// Render a plan for display, grouped by stack.
fn render_plan(plan: &ExecutionPlan) -> String {
    let mut out = format!("Planning: {} ({} nodes)\n\n", plan.name, plan.changes.len());

    let mut current_stack = String::new();
    for change in &plan.changes {
        if change.stack != current_stack {
            current_stack.clone_from(&change.stack);
            out.push_str(&format!("{}:\n", current_stack));
        }
        let symbol = match change.action {
            PlanAction::Create => "+",
            PlanAction::Update => "~",
            PlanAction::Destroy => "-",
            PlanAction::NoOp => " ",
        };
        out.push_str(&format!("  {} {}\n", symbol, change.description));
    }

    out.push_str(&format!(
        "\nPlan: {} to add, {} to change, {} to destroy, {} unchanged.\n",
        plan.to_create, plan.to_update, plan.to_destroy, plan.unchanged
    ));
    out
}

fn cmd_synth(args: &ContextArgs, out_dir: &Path, stdout: bool) -> Result<(), Error> {
    let (ctx, profile) = prepare(args)?;
    let manifest = synthesize(&ctx, &profile)?;
    if stdout {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }
    let location = DirectoryTarget::new(out_dir).submit(&manifest)?;
    println!(
        "Synthesized {} stacks, {} nodes -> {}",
        manifest.stacks.len(),
        manifest.nodes.len(),
        location
    );
    println!("  Fingerprint: {}", manifest.fingerprint);
    Ok(())
}

fn cmd_secrets(args: &ContextArgs, input: &Path, store_dir: &Path) -> Result<(), Error> {
    let (_, profile) = prepare(args)?;
    let json = std::fs::read_to_string(input).map_err(|source| ConfigurationError::Read {
        path: input.to_path_buf(),
        source,
    })?;
    let payload = secrets::parse_payload(&json)?;
    let store = DirectorySecretStore::new(store_dir);
    let outcome = secrets::upload_secrets(&store, &profile, &payload)?;

    let verb = match outcome.action {
        UploadAction::Created => "Created",
        UploadAction::Updated => "Updated",
    };
    println!(
        "{} {} (version {}, {} keys)",
        verb,
        outcome.metadata.name,
        outcome.metadata.version,
        outcome.metadata.keys.len()
    );
    for key in &outcome.missing {
        println!("  WARNING: no value for {}", key);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StageSettings;
    use indexmap::IndexMap;

    fn write_project(dir: &Path, stages: IndexMap<String, StageSettings>) -> PathBuf {
        let path = dir.join(PROJECT_FILE);
        let file = ProjectFile {
            project: Some("acme".to_string()),
            stages,
            ..Default::default()
        };
        std::fs::write(&path, serde_yaml_ng::to_string(&file).unwrap()).unwrap();
        path
    }

    fn args(file: &Path, stage: &str) -> ContextArgs {
        ContextArgs {
            file: Some(file.to_path_buf()),
            stage: Some(stage.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_cli_init() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path(), "acme").unwrap();
        let content = std::fs::read_to_string(dir.path().join(PROJECT_FILE)).unwrap();
        assert!(content.contains("project: acme"));
    }

    #[test]
    fn test_cli_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path(), "acme").unwrap();
        let err = cmd_init(dir.path(), "acme").unwrap_err();
        assert!(matches!(err, Error::Configuration(ConfigurationError::AlreadyExists(_))));
    }

    #[test]
    fn test_cli_validate_starter() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path(), "acme").unwrap();
        let ctx = ContextArgs {
            file: Some(dir.path().join(PROJECT_FILE)),
            ..Default::default()
        };
        cmd_validate(&ctx).unwrap();
    }

    #[test]
    fn test_cli_validate_rejects_bad_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut stages: IndexMap<String, StageSettings> = StageConfigTable::builtin()
            .entries()
            .map(|(id, s)| (id.to_string(), s.clone()))
            .collect();
        stages.get_mut("staging").unwrap().cache.port = 0;
        stages.get_mut("production").unwrap().database.port = 0;
        let path = write_project(dir.path(), stages);
        let err = cmd_validate(&ContextArgs {
            file: Some(path),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::Rejected { count: 2 })
        ));
    }

    #[test]
    fn test_cli_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_plan(&args(&dir.path().join("nope.yaml"), "staging"), dir.path()).unwrap_err();
        assert!(matches!(err, Error::Configuration(ConfigurationError::Read { .. })));
    }

    #[test]
    fn test_cli_plan_requires_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_project(dir.path(), IndexMap::new());
        let ctx = ContextArgs {
            file: Some(path),
            ..Default::default()
        };
        let err = cmd_plan(&ctx, dir.path()).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::MissingContext("stage"))
        ));
    }

    #[test]
    fn test_cli_plan_unknown_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_project(dir.path(), IndexMap::new());
        let err = cmd_plan(&args(&path, "qa"), dir.path()).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::UnknownStage { .. })
        ));
    }

    #[test]
    fn test_cli_synth_then_plan_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_project(dir.path(), IndexMap::new());
        let out = dir.path().join("out");
        cmd_synth(&args(&path, "staging"), &out, false).unwrap();
        assert!(out.join("staging/manifest.json").exists());

        let (ctx, profile) = prepare(&args(&path, "staging")).unwrap();
        let manifest = synthesize(&ctx, &profile).unwrap();
        let previous = DirectoryTarget::new(&out).previous("staging").unwrap();
        let plan = planner::plan(&manifest, previous.as_ref());
        assert_eq!(plan.unchanged as usize, manifest.nodes.len());
        cmd_plan(&args(&path, "staging"), &out).unwrap();
    }

    #[test]
    fn test_cli_synth_stdout_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_project(dir.path(), IndexMap::new());
        let out = dir.path().join("out");
        cmd_synth(&args(&path, "production"), &out, true).unwrap();
        assert!(!out.exists());
    }

    #[test]
    fn test_cli_secrets_upload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_project(dir.path(), IndexMap::new());
        let input = dir.path().join("secrets.json");
        std::fs::write(&input, r#"{"JWT_SECRET": "x"}"#).unwrap();
        let store = dir.path().join("store");

        cmd_secrets(&args(&path, "staging"), &input, &store).unwrap();
        cmd_secrets(&args(&path, "staging"), &input, &store).unwrap();
        assert!(store.join("acme/staging/Secrets.json").exists());
    }

    #[test]
    fn test_cli_secrets_bad_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_project(dir.path(), IndexMap::new());
        let input = dir.path().join("secrets.json");
        std::fs::write(&input, r#"["not", "an", "object"]"#).unwrap();
        let err = cmd_secrets(&args(&path, "staging"), &input, dir.path()).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_cli_stages() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_project(dir.path(), IndexMap::new());
        cmd_stages(&ContextArgs {
            file: Some(path),
            ..Default::default()
        })
        .unwrap();
    }

    #[test]
    fn test_cli_dispatch_init() {
        let dir = tempfile::tempdir().unwrap();
        dispatch(Commands::Init {
            path: dir.path().join("proj"),
            project: "acme".to_string(),
        })
        .unwrap();
        assert!(dir.path().join("proj").join(PROJECT_FILE).exists());
    }

    #[test]
    fn test_cli_stages_rejects_bad_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut stages: IndexMap<String, StageSettings> = StageConfigTable::builtin()
            .entries()
            .map(|(id, s)| (id.to_string(), s.clone()))
            .collect();
        stages.get_mut("staging").unwrap().network.cidr = "not-a-cidr".to_string();
        let path = write_project(dir.path(), stages);
        let err = cmd_stages(&ContextArgs {
            file: Some(path),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::Rejected { count: 1 })
        ));
    }

    #[test]
    fn test_cli_render_plan_symbols() {
        use crate::core::types::PlannedChange;
        use crate::resources::ResourceKind;

        let change = |stack: &str, id: &str, action: PlanAction| PlannedChange {
            node_id: id.to_string(),
            stack: stack.to_string(),
            kind: ResourceKind::ObjectStore,
            description: format!("{}: {}", id, action),
            action,
        };
        let plan = ExecutionPlan {
            name: "acme/staging".to_string(),
            changes: vec![
                change("Base", "Base/Net", PlanAction::Create),
                change("Base", "Base/Bastion", PlanAction::NoOp),
                change("Storage", "Storage/Bucket", PlanAction::Update),
                change("Storage", "Storage/Old", PlanAction::Destroy),
            ],
            to_create: 1,
            to_update: 1,
            to_destroy: 1,
            unchanged: 1,
        };
        let out = render_plan(&plan);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Planning: acme/staging (4 nodes)");
        assert_eq!(lines[2], "Base:");
        assert_eq!(lines[3], "  + Base/Net: CREATE");
        assert_eq!(lines[4], "    Base/Bastion: NO-OP");
        assert_eq!(lines[5], "Storage:");
        assert_eq!(lines[6], "  ~ Storage/Bucket: UPDATE");
        assert_eq!(lines[7], "  - Storage/Old: DESTROY");
        assert_eq!(
            lines.last().copied(),
            Some("Plan: 1 to add, 1 to change, 1 to destroy, 1 unchanged.")
        );
    }
}
