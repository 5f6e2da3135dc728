use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::modules::config::BuildConfig;
use crate::modules::error::{BuildError, Result};
use crate::modules::executor::{BuildSummary, PlacementTarget, organize_by_layer, sleep_nonzero};
use crate::modules::placer::BlockPlacer;
use crate::modules::procurement::{ProcurementOutcome, Procured, Procurer, missing_materials};
use crate::modules::schematic::VoxelGrid;
use crate::modules::state::{BuildState, BuildStateStore, BuildStatus, PauseReason};
use crate::modules::world::{Bot, Position};

/// How a survival build run ended.
#[derive(Clone, Debug, PartialEq)]
pub enum BuildOutcome {
    Completed(BuildSummary),
    Paused { reason: PauseReason, message: String },
    Failed { message: String, resumable: bool },
    Cancelled,
}

#[derive(Debug, Default)]
struct BuildSignals {
    pending_pause: Mutex<Option<PauseReason>>,
    cancelled: AtomicBool,
    running: AtomicBool,
}

impl BuildSignals {
    fn pending(&self) -> Option<PauseReason> {
        self.pending_pause
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn take_pending(&self) -> Option<PauseReason> {
        self.pending_pause
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn set_pending(&self, reason: Option<PauseReason>) {
        *self.pending_pause.lock().unwrap_or_else(|e| e.into_inner()) = reason;
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Cloneable, synchronous handle for world-event callbacks. Only sets flags
/// and persists; the build loop reacts at its next checkpoint.
#[derive(Clone, Debug)]
pub struct InterruptHandle {
    store: BuildStateStore,
    signals: Arc<BuildSignals>,
}

impl InterruptHandle {
    pub fn is_running(&self) -> bool {
        self.signals.running.load(Ordering::SeqCst)
    }

    /// Pause the active build, if any. Returns whether one was paused.
    pub fn pause(&self, reason: PauseReason) -> io::Result<bool> {
        let Some(mut state) = self.store.load()? else {
            return Ok(false);
        };
        if !state.is_active() {
            return Ok(false);
        }
        if self.is_running() {
            self.signals.set_pending(Some(reason.clone()));
        }
        info!(structure = %state.schematic, reason = %reason, "build interrupted");
        state.pause(reason);
        self.store.save(&state)?;
        Ok(true)
    }

    /// Stop the running loop and drop the persisted state. Returns whether
    /// there was anything to cancel.
    pub fn cancel(&self) -> io::Result<bool> {
        let running = self.is_running();
        if running {
            self.signals.cancelled.store(true, Ordering::SeqCst);
        }
        let removed = self.store.delete()?;
        if running || removed {
            info!("build cancelled");
        }
        Ok(running || removed)
    }
}

/// Resumable survival build: procure per layer, place, persist, pause on
/// trouble.
pub struct SurvivalCoordinator {
    bot: Arc<dyn Bot>,
    placer: Arc<BlockPlacer>,
    procurer: Procurer,
    store: BuildStateStore,
    config: BuildConfig,
    signals: Arc<BuildSignals>,
}

struct RunTally {
    placed: u32,
    errors: u32,
    started: Instant,
}

impl SurvivalCoordinator {
    pub fn new(
        bot: Arc<dyn Bot>,
        placer: Arc<BlockPlacer>,
        store: BuildStateStore,
        config: BuildConfig,
    ) -> Self {
        Self {
            procurer: Procurer::new(bot.clone(), config.clone()),
            bot,
            placer,
            store,
            config,
            signals: Arc::new(BuildSignals::default()),
        }
    }

    pub fn interrupts(&self) -> InterruptHandle {
        InterruptHandle {
            store: self.store.clone(),
            signals: self.signals.clone(),
        }
    }

    pub fn procurer(&self) -> &Procurer {
        &self.procurer
    }

    pub fn state(&self) -> io::Result<Option<BuildState>> {
        self.store.load()
    }

    fn claim(&self) -> Result<RunningGuard<'_>> {
        if self.signals.running.swap(true, Ordering::SeqCst) {
            return Err(BuildError::Busy);
        }
        self.signals.cancelled.store(false, Ordering::SeqCst);
        self.signals.set_pending(None);
        Ok(RunningGuard(&self.signals.running))
    }

    /// Begin a new build. Refused while an earlier one is still active.
    pub async fn start(
        &self,
        name: &str,
        grid: Arc<VoxelGrid>,
        origin: Position,
    ) -> Result<BuildOutcome> {
        let _guard = self.claim()?;
        if let Some(existing) = self.store.load()? {
            if existing.is_active() {
                return Err(BuildError::Busy);
            }
        }

        let total = organize_by_layer(&grid, origin)
            .values()
            .map(Vec::len)
            .sum();
        let state = BuildState::new(name, origin, total);
        self.store.save(&state)?;
        info!(structure = name, origin = %origin, total, "survival build started");
        self.run(state, &grid).await
    }

    /// Continue a paused build. `load` maps the recorded structure name to
    /// its grid.
    pub async fn resume<F>(&self, load: F) -> Result<BuildOutcome>
    where
        F: FnOnce(&str) -> Result<Arc<VoxelGrid>>,
    {
        let _guard = self.claim()?;
        let Some(mut state) = self.store.load()? else {
            return Err(BuildError::NoActiveBuild);
        };
        if !state.is_active() {
            return Ok(BuildOutcome::Failed {
                message: format!(
                    "build of {} is {}; nothing to resume",
                    state.schematic, state.status
                ),
                resumable: false,
            });
        }

        let grid = match load(&state.schematic) {
            Ok(grid) => grid,
            Err(err) => {
                let message = format!("cannot resume {}: {}", state.schematic, err);
                warn!(structure = %state.schematic, error = %err, "resume failed");
                state.status = BuildStatus::Error;
                state.pause_reason = Some(PauseReason::Error(err.to_string()));
                state.touch();
                self.store.save(&state)?;
                return Ok(BuildOutcome::Failed {
                    message,
                    resumable: false,
                });
            }
        };

        let previous = state.pause_reason.take();
        state.status = BuildStatus::Building;
        state.touch();
        self.store.save(&state)?;
        info!(
            structure = %state.schematic,
            placed = state.placed.len(),
            previous = ?previous,
            "survival build resumed"
        );
        self.run(state, &grid).await
    }

    fn persist(&self, state: &mut BuildState) -> io::Result<()> {
        if self.signals.is_cancelled() {
            return Ok(());
        }
        if let Some(reason) = self.signals.pending() {
            state.status = BuildStatus::Paused;
            state.pause_reason = Some(reason);
        }
        state.touch();
        self.store.save(state)
    }

    fn pause_with(
        &self,
        state: &mut BuildState,
        reason: PauseReason,
        message: String,
    ) -> Result<BuildOutcome> {
        if self.signals.is_cancelled() {
            return Ok(BuildOutcome::Cancelled);
        }
        // A world event that landed during the layer outranks the loop's own reason.
        let (reason, message) = match self.signals.take_pending() {
            Some(external) if external != reason => {
                debug!(structure = %state.schematic, superseded = %reason, "external pause wins");
                let message = format!("paused by {}", external);
                (external, message)
            }
            _ => (reason, message),
        };
        warn!(structure = %state.schematic, reason = %reason, "survival build paused");
        state.pause(reason.clone());
        self.store.save(state)?;
        Ok(BuildOutcome::Paused { reason, message })
    }

    /// Between-block checkpoint: honour cancellation and external pauses.
    fn checkpoint(&self, state: &mut BuildState) -> Result<Option<BuildOutcome>> {
        if self.signals.is_cancelled() {
            info!(
                structure = %state.schematic,
                placed = state.placed.len(),
                "stopping cancelled build"
            );
            return Ok(Some(BuildOutcome::Cancelled));
        }
        if let Some(reason) = self.signals.take_pending() {
            let message = format!("paused by {}", reason);
            return self.pause_with(state, reason, message).map(Some);
        }
        Ok(None)
    }

    async fn run(&self, mut state: BuildState, grid: &VoxelGrid) -> Result<BuildOutcome> {
        let layers = organize_by_layer(grid, state.origin);
        state.total_blocks = layers.values().map(Vec::len).sum();
        let home = self.bot.position();
        let mut tally = RunTally {
            placed: 0,
            errors: 0,
            started: Instant::now(),
        };

        let first = layers
            .iter()
            .find(|(_, targets)| targets.iter().any(|t| !state.placed.contains(t.pos)))
            .map(|(y, _)| *y);
        let Some(first) = first else {
            return self.complete(state, tally);
        };

        for (&y, targets) in layers.range(first..) {
            if let Some(outcome) = self.checkpoint(&mut state)? {
                return Ok(outcome);
            }
            let unplaced: Vec<&PlacementTarget> = targets
                .iter()
                .filter(|t| !state.placed.contains(t.pos))
                .collect();
            if unplaced.is_empty() {
                continue;
            }

            let required = layer_requirements(&unplaced);
            let procured = if missing_materials(&required, &self.bot.inventory()).is_empty() {
                Procured::default()
            } else {
                info!(structure = %state.schematic, layer = y, "layer needs materials");
                let outcome = self
                    .procurer
                    .procure(&required, Some(home), &mut state.recovery.material_retries)
                    .await;
                match outcome {
                    ProcurementOutcome::Satisfied(procured) => procured,
                    ProcurementOutcome::Failed { reason, message, .. } => {
                        return self.pause_with(&mut state, reason, message);
                    }
                }
            };

            let health = self.bot.health();
            if health < self.config.health_threshold {
                let message = format!(
                    "health {:.1}/20 is below {:.1}",
                    health, self.config.health_threshold
                );
                return self.pause_with(&mut state, PauseReason::LowHealth, message);
            }

            let mut layer_errors = 0;
            let mut since_snapshot = 0;
            for target in unplaced {
                if let Some(outcome) = self.checkpoint(&mut state)? {
                    return Ok(outcome);
                }
                let name = target.block.name.as_str();
                if procured.skipped.contains(name) {
                    continue;
                }
                let item = procured
                    .substitutions
                    .get(name)
                    .map(String::as_str)
                    .unwrap_or(name);

                if self.placer.place_as(&target.block, target.pos, item).await {
                    state.placed.insert(target.pos);
                    tally.placed += 1;
                    since_snapshot += 1;
                    if since_snapshot >= self.config.snapshot_every {
                        self.persist(&mut state)?;
                        since_snapshot = 0;
                    }
                } else {
                    layer_errors += 1;
                    tally.errors += 1;
                    state.recovery.total_errors += 1;
                }
                sleep_nonzero(self.config.placement_delay()).await;
            }

            if layer_errors > self.config.layer_error_limit {
                let message = format!("{} placement errors on layer y={}", layer_errors, y);
                return self.pause_with(&mut state, PauseReason::TooManyErrors, message);
            }

            state.current_layer = Some(y);
            self.persist(&mut state)?;
            debug!(
                structure = %state.schematic,
                layer = y,
                placed = state.placed.len(),
                "layer done"
            );
            sleep_nonzero(self.config.layer_delay()).await;
        }

        if let Some(outcome) = self.checkpoint(&mut state)? {
            return Ok(outcome);
        }
        self.complete(state, tally)
    }

    fn complete(&self, state: BuildState, tally: RunTally) -> Result<BuildOutcome> {
        self.store.delete()?;
        let summary = BuildSummary {
            placed: tally.placed,
            errors: tally.errors,
            total: state.total_blocks,
            elapsed: tally.started.elapsed(),
        };
        info!(
            structure = %state.schematic,
            result = %summary.describe(),
            "survival build completed"
        );
        Ok(BuildOutcome::Completed(summary))
    }
}

fn layer_requirements(targets: &[&PlacementTarget]) -> BTreeMap<String, u32> {
    let mut required = BTreeMap::new();
    for target in targets {
        *required.entry(target.block.name.clone()).or_insert(0) += 1;
    }
    required
}
