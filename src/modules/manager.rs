use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::modules::config::BuildConfig;
use crate::modules::coordinator::{BuildOutcome, InterruptHandle, SurvivalCoordinator};
use crate::modules::error::{BuildError, Result};
use crate::modules::executor::{BuildExecutor, ExecutorOutcome};
use crate::modules::locator::PlayerLocator;
use crate::modules::orientation::OrientationHandler;
use crate::modules::placer::{BlockPlacer, PlacerStats};
use crate::modules::procurement::{MaterialAnalysis, analyze};
use crate::modules::schematic::VoxelGrid;
use crate::modules::state::{BuildStateStore, PauseReason};
use crate::modules::structure::StructureRegistry;
use crate::modules::world::{AgentNotifier, Bot, Inventory, Position};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Paused,
    Cancelled,
    Error,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Success => write!(f, "ok"),
            OutcomeStatus::Paused => write!(f, "paused"),
            OutcomeStatus::Cancelled => write!(f, "cancelled"),
            OutcomeStatus::Error => write!(f, "error"),
        }
    }
}

/// Result of one command, rendered to text only at the boundary.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub status: OutcomeStatus,
    pub message: String,
    pub data: Value,
}

impl CommandOutcome {
    pub fn success(message: impl Into<String>, data: Value) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: message.into(),
            data,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn render(&self) -> String {
        match self.status {
            OutcomeStatus::Success => self.message.clone(),
            status => format!("[{}] {}", status, self.message),
        }
    }
}

impl From<BuildError> for CommandOutcome {
    fn from(err: BuildError) -> Self {
        CommandOutcome::error(err.to_string())
    }
}

/// The string command surface the agent's decision layer speaks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentCommand {
    Build { name: String, player: Option<String> },
    BuildSurvival { name: String, player: Option<String> },
    BuildAutonomous { name: String, player: Option<String> },
    PreviewMaterials { name: String },
    ResumeBuild,
    GetBuildState,
    CancelBuild,
    ListStructures { category: Option<String> },
    DescribeStructure { name: String },
}

impl AgentCommand {
    pub fn label(&self) -> &'static str {
        match self {
            AgentCommand::Build { .. } => "build",
            AgentCommand::BuildSurvival { .. } => "build-survival",
            AgentCommand::BuildAutonomous { .. } => "build-autonomous",
            AgentCommand::PreviewMaterials { .. } => "preview-materials",
            AgentCommand::ResumeBuild => "resume-build",
            AgentCommand::GetBuildState => "get-build-state",
            AgentCommand::CancelBuild => "cancel-build",
            AgentCommand::ListStructures { .. } => "list-structures",
            AgentCommand::DescribeStructure { .. } => "describe-structure",
        }
    }
}

impl FromStr for AgentCommand {
    type Err = String;

    /// `verb`, `verb:arg,arg` or `verb arg arg`.
    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (verb, rest) = match trimmed.split_once([':', ' ']) {
            Some((verb, rest)) => (verb.to_lowercase().replace('_', "-"), rest),
            None => (trimmed.to_lowercase().replace('_', "-"), ""),
        };
        let args: Vec<&str> = rest
            .split([',', ' '])
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .collect();
        let name = |usage: &str| -> std::result::Result<String, String> {
            args.first()
                .map(|a| a.to_string())
                .ok_or_else(|| format!("{} requires a structure name", usage))
        };
        let player = args.get(1).map(|p| p.to_string());

        match verb.as_str() {
            "build" => Ok(AgentCommand::Build {
                name: name("build")?,
                player,
            }),
            "build-survival" => Ok(AgentCommand::BuildSurvival {
                name: name("build-survival")?,
                player,
            }),
            "build-autonomous" => Ok(AgentCommand::BuildAutonomous {
                name: name("build-autonomous")?,
                player,
            }),
            "preview-materials" | "materials" => Ok(AgentCommand::PreviewMaterials {
                name: name("preview-materials")?,
            }),
            "resume-build" | "resume" => Ok(AgentCommand::ResumeBuild),
            "get-build-state" | "build-state" => Ok(AgentCommand::GetBuildState),
            "cancel-build" | "cancel" => Ok(AgentCommand::CancelBuild),
            "list-structures" | "list" => Ok(AgentCommand::ListStructures {
                category: args.first().map(|c| c.to_string()),
            }),
            "describe-structure" | "describe" => Ok(AgentCommand::DescribeStructure {
                name: name("describe-structure")?,
            }),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown building command `{}`", other)),
        }
    }
}

/// Holds the busy flag for the lifetime of one build.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(BusyGuard(flag))
        }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Everything that needs a live world.
struct Session {
    bot: Arc<dyn Bot>,
    notifier: Arc<dyn AgentNotifier>,
    locator: PlayerLocator,
    placer: Arc<BlockPlacer>,
    executor: BuildExecutor,
    coordinator: SurvivalCoordinator,
    interrupts: InterruptHandle,
}

/// Front door for building: structure catalog, creative and survival builds,
/// persisted state, and world-event interrupts for one agent.
pub struct BuildingManager {
    config: BuildConfig,
    agent: String,
    registry: Mutex<StructureRegistry>,
    store: BuildStateStore,
    session: Option<Session>,
    busy: AtomicBool,
}

impl BuildingManager {
    pub fn new(config: BuildConfig, agent: &str) -> Self {
        let mut registry =
            StructureRegistry::new(config.schematics_dir.clone(), config.categories.clone());
        registry.scan();
        Self {
            store: BuildStateStore::new(&config.state_dir, agent),
            agent: agent.to_string(),
            registry: Mutex::new(registry),
            config,
            session: None,
            busy: AtomicBool::new(false),
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Wire up a live world session. Replaces any earlier one.
    pub fn attach(&mut self, bot: Arc<dyn Bot>, notifier: Arc<dyn AgentNotifier>) {
        let orientation = OrientationHandler::new(bot.clone(), self.config.rotation_settle());
        let placer = Arc::new(BlockPlacer::new(
            bot.clone(),
            orientation,
            self.config.verify_delay(),
            self.config.reach,
        ));
        let executor = BuildExecutor::new(placer.clone(), self.config.clone());
        let coordinator = SurvivalCoordinator::new(
            bot.clone(),
            placer.clone(),
            self.store.clone(),
            self.config.clone(),
        );
        let interrupts = coordinator.interrupts();
        info!(agent = %self.agent, bot = %bot.username(), "building attached");
        self.session = Some(Session {
            locator: PlayerLocator::new(bot.clone()),
            bot,
            notifier,
            placer,
            executor,
            coordinator,
            interrupts,
        });
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(BuildError::NotAttached)
    }

    fn registry(&self) -> MutexGuard<'_, StructureRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rescan the schematics directory. Returns the number of structures.
    pub fn rescan(&self) -> usize {
        self.registry().scan()
    }

    fn load_grid(&self, query: &str) -> Result<(String, Arc<VoxelGrid>)> {
        let mut registry = self.registry();
        let grid = registry.load_data(query)?;
        let name = registry
            .find(query)
            .map(|d| d.name.clone())
            .ok_or_else(|| BuildError::StructureNotFound(query.to_string()))?;
        Ok((name, grid))
    }

    fn origin_for(&self, session: &Session, player: Option<&str>, grid: &VoxelGrid) -> Position {
        let anchor = session.locator.anchor_for(player);
        let origin =
            PlayerLocator::calculate_build_position(anchor.position, anchor.yaw, grid.dimensions());
        info!(player = %anchor.username, origin = %origin, "build origin chosen");
        origin
    }

    pub async fn execute(&self, command: AgentCommand) -> CommandOutcome {
        match command {
            AgentCommand::Build { name, player } => self.build(&name, player.as_deref()).await,
            AgentCommand::BuildSurvival { name, player } => {
                self.build_survival(&name, player.as_deref()).await
            }
            AgentCommand::BuildAutonomous { name, player } => {
                self.build_autonomous(&name, player.as_deref()).await
            }
            AgentCommand::PreviewMaterials { name } => self.preview_materials(&name).await,
            AgentCommand::ResumeBuild => self.resume_build().await,
            AgentCommand::GetBuildState => self.get_build_state_info(),
            AgentCommand::CancelBuild => self.cancel_build(),
            AgentCommand::ListStructures { category } => self.list_structures(category.as_deref()),
            AgentCommand::DescribeStructure { name } => self.describe_structure(&name),
        }
    }

    /// Parse and run one command line, rendering the outcome as text.
    pub async fn dispatch(&self, input: &str) -> String {
        match input.parse::<AgentCommand>() {
            Ok(command) => self.execute(command).await.render(),
            Err(err) => CommandOutcome::error(err).render(),
        }
    }

    pub fn list_structures(&self, category: Option<&str>) -> CommandOutcome {
        let registry = self.registry();
        let entries = registry.list(category);
        if entries.is_empty() {
            let scope = category.map(|c| format!(" in {}", c)).unwrap_or_default();
            return CommandOutcome::success(
                format!("No structures{} under {}", scope, registry.root().display()),
                json!([]),
            );
        }

        let lines: Vec<String> = entries
            .iter()
            .map(|e| {
                format!(
                    "{} [{}] ({}, {} bytes)",
                    e.display_name, e.name, e.category, e.file_size
                )
            })
            .collect();
        let data: Vec<Value> = entries
            .iter()
            .map(|e| {
                json!({
                    "name": e.name,
                    "display_name": e.display_name,
                    "category": e.category,
                    "kind": e.kind.to_string(),
                    "file_size": e.file_size,
                })
            })
            .collect();
        CommandOutcome::success(
            format!("{} structures:\n{}", entries.len(), lines.join("\n")),
            Value::Array(data),
        )
    }

    pub fn describe_structure(&self, name: &str) -> CommandOutcome {
        let mut registry = self.registry();
        match registry.describe(name) {
            Ok(text) => {
                let data = registry
                    .find(name)
                    .map(|d| json!({ "name": d.name, "materials": d.materials }))
                    .unwrap_or(Value::Null);
                CommandOutcome::success(text, data)
            }
            Err(err) => err.into(),
        }
    }

    /// Creative build beside the player: world edits, no materials.
    pub async fn build(&self, name: &str, player: Option<&str>) -> CommandOutcome {
        let session = match self.session() {
            Ok(session) => session,
            Err(err) => return err.into(),
        };
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            return BuildError::Busy.into();
        };
        let (name, grid) = match self.load_grid(name) {
            Ok(found) => found,
            Err(err) => return err.into(),
        };
        let origin = self.origin_for(session, player, &grid);
        session
            .notifier
            .notify(&format!("Building {} at {}", name, origin));

        match session.executor.run(&name, &grid, origin).await {
            ExecutorOutcome::Completed(summary) => CommandOutcome::success(
                format!("Built {} at {}: {}", name, origin, summary.describe()),
                json!({
                    "structure": name,
                    "origin": origin,
                    "placed": summary.placed,
                    "errors": summary.errors,
                    "success_rate": summary.success_rate(),
                }),
            ),
            ExecutorOutcome::Halted(summary) => CommandOutcome {
                status: OutcomeStatus::Error,
                message: format!(
                    "Stopped building {} after {} errors; run build again to continue",
                    name, summary.errors
                ),
                data: json!({ "structure": name, "origin": origin, "placed": summary.placed }),
            },
            ExecutorOutcome::Cancelled(summary) => CommandOutcome {
                status: OutcomeStatus::Cancelled,
                message: format!("Cancelled {} after {} blocks", name, summary.placed),
                data: Value::Null,
            },
        }
    }

    /// Survival build with material procurement and resumable state.
    pub async fn build_survival(&self, name: &str, player: Option<&str>) -> CommandOutcome {
        let session = match self.session() {
            Ok(session) => session,
            Err(err) => return err.into(),
        };
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            return BuildError::Busy.into();
        };
        let (name, grid) = match self.load_grid(name) {
            Ok(found) => found,
            Err(err) => return err.into(),
        };
        let origin = self.origin_for(session, player, &grid);
        session
            .notifier
            .notify(&format!("Starting survival build of {} at {}", name, origin));

        let outcome = session.coordinator.start(&name, grid, origin).await;
        self.report(session, &name, outcome)
    }

    /// Survival build with the agent's own decision loop suspended.
    pub async fn build_autonomous(&self, name: &str, player: Option<&str>) -> CommandOutcome {
        let notifier = match self.session() {
            Ok(session) => session.notifier.clone(),
            Err(err) => return err.into(),
        };
        notifier.set_autonomous(true);
        let outcome = self.build_survival(name, player).await;
        notifier.set_autonomous(false);
        outcome
    }

    pub async fn resume_build(&self) -> CommandOutcome {
        let session = match self.session() {
            Ok(session) => session,
            Err(err) => return err.into(),
        };
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            return BuildError::Busy.into();
        };
        let name = match self.store.load() {
            Ok(Some(state)) => state.schematic,
            Ok(None) => return BuildError::NoActiveBuild.into(),
            Err(err) => return BuildError::Io(err).into(),
        };

        let outcome = session
            .coordinator
            .resume(|recorded| self.load_grid(recorded).map(|(_, grid)| grid))
            .await;
        self.report(session, &name, outcome)
    }

    fn report(
        &self,
        session: &Session,
        name: &str,
        outcome: Result<BuildOutcome>,
    ) -> CommandOutcome {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(BuildError::Busy) => {
                return CommandOutcome::error(
                    "a build is already active; use resume-build or cancel-build",
                );
            }
            Err(err) => return err.into(),
        };

        let result = match outcome {
            BuildOutcome::Completed(summary) => CommandOutcome::success(
                format!("Finished {}: {}", name, summary.describe()),
                json!({
                    "structure": name,
                    "placed": summary.placed,
                    "errors": summary.errors,
                    "success_rate": summary.success_rate(),
                }),
            ),
            BuildOutcome::Paused { reason, message } => CommandOutcome {
                status: OutcomeStatus::Paused,
                message: format!(
                    "{} paused ({}): {}. Next: {}",
                    name,
                    reason,
                    message,
                    reason.advice()
                ),
                data: json!({ "structure": name, "reason": reason }),
            },
            BuildOutcome::Failed { message, resumable } => CommandOutcome {
                status: OutcomeStatus::Error,
                message: if resumable {
                    format!("{} (resume-build to retry)", message)
                } else {
                    message
                },
                data: json!({ "structure": name, "resumable": resumable }),
            },
            BuildOutcome::Cancelled => CommandOutcome {
                status: OutcomeStatus::Cancelled,
                message: format!("Cancelled {}", name),
                data: Value::Null,
            },
        };
        session.notifier.notify(&result.message);
        result
    }

    /// Material needs for a structure. Offline, nothing is counted as held.
    pub async fn preview_materials(&self, name: &str) -> CommandOutcome {
        let (name, required) = {
            let mut registry = self.registry();
            let grid = match registry.load_data(name) {
                Ok(grid) => grid,
                Err(err) => return err.into(),
            };
            let key = registry.find(name).map(|d| d.name.clone()).unwrap_or_default();
            (key, grid.histogram())
        };

        let analysis: MaterialAnalysis = match &self.session {
            Some(session) => match session.coordinator.procurer().analyze(&required).await {
                Ok(analysis) => analysis,
                Err(err) => {
                    warn!(error = %err, "storage scan failed; counting inventory only");
                    analyze(&required, &session.bot.inventory(), &[])
                }
            },
            None => analyze(&required, &Inventory::new(), &[]),
        };

        let total: u32 = analysis.values().map(|n| n.required).sum();
        let missing: u32 = analysis.values().map(|n| n.missing).sum();
        let lines: Vec<String> = analysis
            .iter()
            .map(|(material, n)| {
                format!(
                    "{}: {} (held {}, stored {}, missing {})",
                    material, n.required, n.in_inventory, n.in_storage, n.missing
                )
            })
            .collect();
        let data: serde_json::Map<String, Value> = analysis
            .iter()
            .map(|(material, n)| {
                (
                    material.clone(),
                    json!({
                        "required": n.required,
                        "in_inventory": n.in_inventory,
                        "in_storage": n.in_storage,
                        "missing": n.missing,
                    }),
                )
            })
            .collect();
        CommandOutcome::success(
            format!(
                "{} needs {} blocks, {} missing:\n{}",
                name,
                total,
                missing,
                lines.join("\n")
            ),
            Value::Object(data),
        )
    }

    pub fn get_build_state_info(&self) -> CommandOutcome {
        if let Some(status) = self.session.as_ref().and_then(|s| s.executor.status()) {
            return CommandOutcome::success(
                format!(
                    "Building {} (creative): {}/{} placed, {} errors, {:.0}s",
                    status.name,
                    status.placed,
                    status.total,
                    status.errors,
                    status.elapsed.as_secs_f64()
                ),
                json!({ "structure": status.name, "placed": status.placed, "total": status.total }),
            );
        }

        match self.store.load() {
            Ok(Some(state)) => {
                let data = serde_json::to_value(&state).unwrap_or(Value::Null);
                CommandOutcome::success(state.summary(), data)
            }
            Ok(None) => CommandOutcome::success("No build in progress", Value::Null),
            Err(err) => BuildError::Io(err).into(),
        }
    }

    pub fn cancel_build(&self) -> CommandOutcome {
        let creative = self
            .session
            .as_ref()
            .is_some_and(|s| s.executor.cancel());
        let survival = match &self.session {
            Some(session) => session.interrupts.cancel(),
            None => self.store.delete(),
        };
        match survival {
            Ok(survival) if creative || survival => CommandOutcome {
                status: OutcomeStatus::Cancelled,
                message: "Build cancelled".to_string(),
                data: Value::Null,
            },
            Ok(_) => CommandOutcome::error(BuildError::NoActiveBuild.to_string()),
            Err(err) => BuildError::Io(err).into(),
        }
    }

    fn interrupt(&self, reason: PauseReason, notice: &str) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        match session.interrupts.pause(reason) {
            Ok(true) => {
                session.notifier.notify(notice);
                true
            }
            Ok(false) => false,
            Err(err) => {
                warn!(error = %err, "failed to persist build pause");
                false
            }
        }
    }

    /// Returns whether a build was paused.
    pub fn on_health_changed(&self, health: f32) -> bool {
        if health >= self.config.health_threshold {
            return false;
        }
        self.interrupt(
            PauseReason::LowHealth,
            &format!("Pausing build: health {:.1}/20", health),
        )
    }

    pub fn on_death(&self) -> bool {
        self.interrupt(PauseReason::Death, "Pausing build: I died")
    }

    /// Damage from an entity means combat; other damage only matters through
    /// health.
    pub fn on_damaged(&self, by_entity: Option<&str>) -> bool {
        match by_entity {
            Some(entity) => self.interrupt(
                PauseReason::Combat,
                &format!("Pausing build: attacked by {}", entity),
            ),
            None => self
                .session
                .as_ref()
                .is_some_and(|s| self.on_health_changed(s.bot.health())),
        }
    }

    pub fn placer_stats(&self) -> Option<PlacerStats> {
        self.session.as_ref().map(|s| s.placer.stats())
    }
}
