use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::modules::block_state::BlockState;
use crate::modules::config::BuildConfig;
use crate::modules::placer::BlockPlacer;
use crate::modules::schematic::VoxelGrid;
use crate::modules::world::Position;

/// Placements needed between soft-ceiling hits before errors are forgiven.
pub const MIN_PROGRESS_FOR_RELIEF: u32 = 5;

#[derive(Clone, Debug, PartialEq)]
pub struct PlacementTarget {
    pub pos: Position,
    pub block: BlockState,
}

/// Non-air cells in world coordinates, bucketed by world y. Each bucket keeps
/// the grid's storage order.
pub fn organize_by_layer(
    grid: &VoxelGrid,
    origin: Position,
) -> BTreeMap<i32, Vec<PlacementTarget>> {
    let mut layers: BTreeMap<i32, Vec<PlacementTarget>> = BTreeMap::new();
    for (local, block) in grid.iter().filter(|(_, b)| !b.is_air()) {
        let pos = origin.offset(local.x as i32, local.y as i32, local.z as i32);
        layers.entry(pos.y).or_default().push(PlacementTarget {
            pos,
            block: block.clone(),
        });
    }
    layers
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    Continue,
    Cooldown { halved: bool },
    Halt,
}

/// Error count with a soft ceiling (pause, maybe forgive half) and a hard
/// ceiling (stop). Forgiven errors still show in the build summary.
#[derive(Debug)]
pub(crate) struct ErrorBudget {
    soft: u32,
    hard: u32,
    errors: u32,
    since_soft: u32,
}

impl ErrorBudget {
    pub(crate) fn new(soft: u32, hard: u32) -> Self {
        Self {
            soft,
            hard,
            errors: 0,
            since_soft: 0,
        }
    }

    pub(crate) fn errors(&self) -> u32 {
        self.errors
    }

    pub(crate) fn success(&mut self) {
        self.since_soft += 1;
    }

    pub(crate) fn error(&mut self) -> Verdict {
        self.errors += 1;
        if self.errors >= self.hard {
            return Verdict::Halt;
        }
        if self.errors == self.soft {
            let halved = self.since_soft >= MIN_PROGRESS_FOR_RELIEF;
            if halved {
                self.errors /= 2;
            }
            self.since_soft = 0;
            return Verdict::Cooldown { halved };
        }
        Verdict::Continue
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BuildSummary {
    pub placed: u32,
    pub errors: u32,
    pub total: usize,
    pub elapsed: Duration,
}

impl BuildSummary {
    /// Share of attempted cells that ended up placed, 0..=1.
    pub fn success_rate(&self) -> f64 {
        let attempts = self.placed + self.errors;
        if attempts == 0 {
            return 1.0;
        }
        self.placed as f64 / attempts as f64
    }

    pub fn describe(&self) -> String {
        format!(
            "{} placed, {} errors in {:.1}s ({:.0}% success)",
            self.placed,
            self.errors,
            self.elapsed.as_secs_f64(),
            self.success_rate() * 100.0
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExecutorOutcome {
    Completed(BuildSummary),
    /// Hard error ceiling reached. Running the build again resumes it,
    /// since cells already in place are skipped.
    Halted(BuildSummary),
    Cancelled(BuildSummary),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExecutorStatus {
    pub name: String,
    pub placed: u32,
    pub errors: u32,
    pub total: usize,
    pub elapsed: Duration,
}

struct Progress {
    name: String,
    placed: u32,
    errors: u32,
    total: usize,
    started: Instant,
}

impl Progress {
    fn summary(&self) -> BuildSummary {
        BuildSummary {
            placed: self.placed,
            errors: self.errors,
            total: self.total,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Layer-by-layer placement of a whole structure, used for creative builds.
pub struct BuildExecutor {
    placer: Arc<BlockPlacer>,
    config: BuildConfig,
    progress: Mutex<Option<Progress>>,
    cancelled: AtomicBool,
}

impl BuildExecutor {
    pub fn new(placer: Arc<BlockPlacer>, config: BuildConfig) -> Self {
        Self {
            placer,
            config,
            progress: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> Option<ExecutorStatus> {
        let guard = self.progress.lock().ok()?;
        guard.as_ref().map(|p| ExecutorStatus {
            name: p.name.clone(),
            placed: p.placed,
            errors: p.errors,
            total: p.total,
            elapsed: p.started.elapsed(),
        })
    }

    /// Stop the running build at its next block. Returns false when idle.
    pub fn cancel(&self) -> bool {
        let running = self.status().is_some();
        if running {
            self.cancelled.store(true, Ordering::SeqCst);
        }
        running
    }

    fn record(&self, placed: bool) {
        let mut guard = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(p) = guard.as_mut() {
            if placed {
                p.placed += 1;
            } else {
                p.errors += 1;
            }
        }
    }

    /// Clear transient progress and return its final tally.
    fn finish(&self) -> BuildSummary {
        let mut guard = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        match guard.take() {
            Some(p) => p.summary(),
            None => BuildSummary {
                placed: 0,
                errors: 0,
                total: 0,
                elapsed: Duration::ZERO,
            },
        }
    }

    pub async fn run(&self, name: &str, grid: &VoxelGrid, origin: Position) -> ExecutorOutcome {
        let layers = organize_by_layer(grid, origin);
        let total: usize = layers.values().map(Vec::len).sum();
        self.cancelled.store(false, Ordering::SeqCst);
        {
            let mut guard = self.progress.lock().unwrap_or_else(|e| e.into_inner());
            *guard = Some(Progress {
                name: name.to_string(),
                placed: 0,
                errors: 0,
                total,
                started: Instant::now(),
            });
        }
        info!(structure = name, origin = %origin, total, layers = layers.len(), "build started");

        let mut budget =
            ErrorBudget::new(self.config.soft_error_ceiling, self.config.hard_error_ceiling);
        for (y, targets) in &layers {
            for target in targets {
                if self.cancelled.load(Ordering::SeqCst) {
                    let summary = self.finish();
                    info!(structure = name, layer = y, "build cancelled");
                    return ExecutorOutcome::Cancelled(summary);
                }

                let ok = self.placer.place(&target.block, target.pos).await;
                let verdict = if ok {
                    budget.success();
                    Verdict::Continue
                } else {
                    budget.error()
                };
                self.record(ok);

                match verdict {
                    Verdict::Continue => {}
                    Verdict::Cooldown { halved } => {
                        warn!(
                            structure = name,
                            layer = y,
                            halved,
                            errors = budget.errors(),
                            "error ceiling reached, cooling down"
                        );
                        sleep_nonzero(self.config.error_cooldown()).await;
                    }
                    Verdict::Halt => {
                        let summary = self.finish();
                        warn!(
                            structure = name,
                            layer = y,
                            errors = summary.errors,
                            "build halted; run it again to continue"
                        );
                        return ExecutorOutcome::Halted(summary);
                    }
                }
                sleep_nonzero(self.config.placement_delay()).await;
            }
            info!(structure = name, layer = y, blocks = targets.len(), "layer finished");
            sleep_nonzero(self.config.layer_delay()).await;
        }

        let summary = self.finish();
        info!(structure = name, result = %summary.describe(), "build finished");
        ExecutorOutcome::Completed(summary)
    }
}

pub(crate) async fn sleep_nonzero(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::orientation::OrientationHandler;
    use crate::modules::schematic::{Dimensions, parse};
    use crate::modules::schematic::fixtures::stone_plus;
    use crate::modules::testing::FakeBot;
    use crate::modules::world::Bot;

    fn executor(bot: Arc<FakeBot>) -> Arc<BuildExecutor> {
        let config = BuildConfig::immediate();
        let bot: Arc<dyn Bot> = bot;
        let orientation = OrientationHandler::new(bot.clone(), Duration::ZERO);
        let placer = Arc::new(BlockPlacer::new(bot, orientation, Duration::ZERO, config.reach));
        Arc::new(BuildExecutor::new(placer, config))
    }

    fn solid_stone(x: u32, y: u32, z: u32) -> VoxelGrid {
        let dims = Dimensions { x, y, z };
        VoxelGrid::new(
            dims,
            vec![BlockState::air(), BlockState::new("stone")],
            vec![1; dims.volume()],
        )
    }

    #[test]
    fn layers_are_world_y_in_storage_order() {
        let grid = parse(&stone_plus()).unwrap();
        let layers = organize_by_layer(&grid, Position::new(100, 64, -5));
        assert_eq!(layers.len(), 1);
        let cells: Vec<Position> = layers[&64].iter().map(|t| t.pos).collect();
        assert_eq!(
            cells,
            vec![
                Position::new(100, 64, -5),
                Position::new(102, 64, -5),
                Position::new(101, 64, -4),
                Position::new(100, 64, -3),
                Position::new(102, 64, -3),
            ]
        );

        let tall = organize_by_layer(&solid_stone(1, 3, 1), Position::new(0, 10, 0));
        assert_eq!(tall.keys().copied().collect::<Vec<_>>(), vec![10, 11, 12]);
    }

    #[test]
    fn soft_ceiling_forgives_only_after_progress() {
        let mut budget = ErrorBudget::new(4, 6);
        for _ in 0..3 {
            assert_eq!(budget.error(), Verdict::Continue);
        }
        // No placements since the start: cooldown without relief.
        assert_eq!(budget.error(), Verdict::Cooldown { halved: false });
        assert_eq!(budget.errors(), 4);
        assert_eq!(budget.error(), Verdict::Continue);
        assert_eq!(budget.error(), Verdict::Halt);

        let mut budget = ErrorBudget::new(4, 6);
        for _ in 0..MIN_PROGRESS_FOR_RELIEF {
            budget.success();
        }
        for _ in 0..3 {
            budget.error();
        }
        assert_eq!(budget.error(), Verdict::Cooldown { halved: true });
        assert_eq!(budget.errors(), 2);
    }

    #[tokio::test]
    async fn creative_build_completes_and_is_idempotent() {
        let bot = FakeBot::creative();
        let exec = executor(bot.clone());
        let grid = parse(&stone_plus()).unwrap();

        let outcome = exec.run("plus", &grid, Position::new(0, 70, 0)).await;
        let ExecutorOutcome::Completed(summary) = outcome else {
            panic!("unexpected {outcome:?}");
        };
        assert_eq!(summary.placed, 5);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.success_rate(), 1.0);
        assert_eq!(bot.commands().len(), 5);
        assert!(exec.status().is_none());

        // Everything is already there: no further world edits.
        exec.run("plus", &grid, Position::new(0, 70, 0)).await;
        assert_eq!(bot.commands().len(), 5);
    }

    #[tokio::test]
    async fn hard_ceiling_halts() {
        let bot = FakeBot::creative();
        bot.ignore_setblock(true);
        let exec = executor(bot.clone());
        let grid = solid_stone(10, 1, 10);

        let outcome = exec.run("slab", &grid, Position::new(0, 70, 0)).await;
        let ExecutorOutcome::Halted(summary) = outcome else {
            panic!("unexpected {outcome:?}");
        };
        assert_eq!(summary.errors, 75);
        assert_eq!(summary.placed, 0);
        assert_eq!(bot.commands().len(), 75);
        assert!(exec.status().is_none());
    }

    #[tokio::test]
    async fn cancel_stops_between_blocks() {
        let bot = FakeBot::survival();
        bot.give("stone", 100);
        let exec = executor(bot.clone());
        let hook_exec = exec.clone();
        bot.on_place(move |count| {
            if count == 3 {
                assert!(hook_exec.status().is_some());
                assert!(hook_exec.cancel());
            }
        });

        let outcome = exec
            .run("slab", &solid_stone(4, 1, 4), Position::new(0, 70, 0))
            .await;
        let ExecutorOutcome::Cancelled(summary) = outcome else {
            panic!("unexpected {outcome:?}");
        };
        assert_eq!(summary.placed, 3);
        assert_eq!(bot.placements().len(), 3);
        assert!(exec.status().is_none());
        assert!(!exec.cancel());
    }
}
