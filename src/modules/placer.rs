use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::modules::block_state::{BlockState, base_name, is_air};
use crate::modules::error::{BuildError, Result};
use crate::modules::orientation::{Facing, OrientationHandler, requires_orientation};
use crate::modules::world::{Bot, EYE_HEIGHT, GameMode, Position, Vec3};

/// Re-reads after a world-edit command before giving up on it.
pub const VERIFY_READS: u32 = 3;

/// At most this many standing spots are weighed before moving.
pub const MAX_CANDIDATES: usize = 8;

/// Horizontal offsets around a target, nearest first.
const CANDIDATE_OFFSETS: &[(i32, i32)] = &[
    (2, 0),
    (-2, 0),
    (0, 2),
    (0, -2),
    (2, 2),
    (-2, 2),
    (2, -2),
    (-2, -2),
    (3, 0),
    (-3, 0),
    (0, 3),
    (0, -3),
    (4, 0),
    (-4, 0),
    (0, 4),
    (0, -4),
];

/// One cell to fill. `item` differs from the block name when a substitute
/// is being placed.
pub struct PlacementRequest<'a> {
    pub block: &'a BlockState,
    pub item: &'a str,
    pub target: Position,
}

#[async_trait]
pub trait PlacementStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn place(&self, bot: &dyn Bot, request: &PlacementRequest<'_>) -> Result<()>;
}

/// Privileged world edit, confirmed by reading the cell back.
pub struct CreativeStrategy {
    verify_delay: Duration,
}

impl CreativeStrategy {
    pub fn new(verify_delay: Duration) -> Self {
        Self { verify_delay }
    }
}

#[async_trait]
impl PlacementStrategy for CreativeStrategy {
    fn name(&self) -> &'static str {
        "creative"
    }

    async fn place(&self, bot: &dyn Bot, request: &PlacementRequest<'_>) -> Result<()> {
        let t = request.target;
        let command = format!(
            "/setblock {} {} {} {}",
            t.x,
            t.y,
            t.z,
            request.block.command_string()
        );
        bot.run_command(&command).await?;

        for read in 1..=VERIFY_READS {
            if !self.verify_delay.is_zero() {
                tokio::time::sleep(self.verify_delay).await;
            }
            let seen = bot.block_at(t);
            if seen.as_deref().map(base_name) == Some(request.block.name.as_str()) {
                return Ok(());
            }
            debug!(pos = %t, read, seen = ?seen, "setblock not visible yet");
        }

        Err(BuildError::PlacementFailed {
            block: request.block.name.clone(),
            target: t,
            reason: format!("not confirmed after {} reads", VERIFY_READS),
        })
    }
}

/// Hand placement from the inventory, repositioning once when the cell is
/// out of reach or hidden.
pub struct SurvivalStrategy {
    reach: f64,
}

impl SurvivalStrategy {
    pub fn new(reach: f64) -> Self {
        Self { reach }
    }

    fn eye_at(stand: Position) -> Vec3 {
        Vec3::new(
            stand.x as f64 + 0.5,
            stand.y as f64 + EYE_HEIGHT,
            stand.z as f64 + 0.5,
        )
    }

    fn is_open(bot: &dyn Bot, pos: Position) -> bool {
        bot.block_at(pos).is_some_and(|b| is_air(&b))
    }

    fn is_solid(bot: &dyn Bot, pos: Position) -> bool {
        bot.block_at(pos).is_some_and(|b| !is_air(&b))
    }

    /// Valid standing spots around `target`, nearest first, at most
    /// [`MAX_CANDIDATES`] of them.
    pub fn standing_candidates(&self, bot: &dyn Bot, target: Position) -> Vec<Position> {
        let mut found = Vec::new();
        for (dx, dz) in CANDIDATE_OFFSETS {
            for dy in [0, -1] {
                let stand = target.offset(*dx, dy, *dz);
                let valid = Self::is_solid(bot, stand.offset(0, -1, 0))
                    && Self::is_open(bot, stand)
                    && Self::is_open(bot, stand.offset(0, 1, 0))
                    && Self::eye_at(stand).distance(target.center()) <= self.reach;
                if valid {
                    found.push(stand);
                    break;
                }
            }
            if found.len() == MAX_CANDIDATES {
                break;
            }
        }
        found
    }
}

#[async_trait]
impl PlacementStrategy for SurvivalStrategy {
    fn name(&self) -> &'static str {
        "survival"
    }

    async fn place(&self, bot: &dyn Bot, request: &PlacementRequest<'_>) -> Result<()> {
        let target = request.target;
        let first = match bot.place_block(target, request.item).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if matches!(first, BuildError::MaterialUnavailable { .. }) {
            return Err(first);
        }

        let eye = bot.eye_position();
        let in_reach = eye.distance(target.center()) <= self.reach;
        if in_reach && bot.line_of_sight(eye, target) {
            return Err(first);
        }

        let Some(stand) = self.standing_candidates(bot, target).into_iter().next() else {
            return Err(BuildError::PositionUnreachable {
                target,
                reason: "no standing spot within reach".to_string(),
            });
        };
        debug!(pos = %target, stand = %stand, in_reach, "repositioning to place");
        bot.navigate_to(
            Vec3::new(stand.x as f64 + 0.5, stand.y as f64, stand.z as f64 + 0.5),
            0.5,
        )
        .await?;
        bot.place_block(target, request.item).await
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlacerStats {
    pub attempted: u64,
    pub placed: u64,
    pub skipped_existing: u64,
}

pub struct BlockPlacer {
    bot: Arc<dyn Bot>,
    orientation: OrientationHandler,
    creative: CreativeStrategy,
    survival: SurvivalStrategy,
    attempted: AtomicU64,
    placed: AtomicU64,
    skipped_existing: AtomicU64,
}

impl BlockPlacer {
    pub fn new(
        bot: Arc<dyn Bot>,
        orientation: OrientationHandler,
        verify_delay: Duration,
        reach: f64,
    ) -> Self {
        Self {
            bot,
            orientation,
            creative: CreativeStrategy::new(verify_delay),
            survival: SurvivalStrategy::new(reach),
            attempted: AtomicU64::new(0),
            placed: AtomicU64::new(0),
            skipped_existing: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> PlacerStats {
        PlacerStats {
            attempted: self.attempted.load(Ordering::Relaxed),
            placed: self.placed.load(Ordering::Relaxed),
            skipped_existing: self.skipped_existing.load(Ordering::Relaxed),
        }
    }

    pub async fn place(&self, block: &BlockState, target: Position) -> bool {
        self.place_as(block, target, &block.name).await
    }

    /// Put `block` at `target`, holding `item` in survival. Never errors:
    /// failures are logged and reported as `false`.
    pub async fn place_as(&self, block: &BlockState, target: Position, item: &str) -> bool {
        if let Some(existing) = self.bot.block_at(target) {
            if base_name(&existing) == block.name {
                self.skipped_existing.fetch_add(1, Ordering::Relaxed);
                return true;
            }
        }
        self.attempted.fetch_add(1, Ordering::Relaxed);

        if requires_orientation(&block.name) {
            if let Some(facing) = block.facing().and_then(|f| f.parse::<Facing>().ok()) {
                self.orientation
                    .move_and_rotate(target, facing, &block.name)
                    .await;
            }
        }

        let strategy: &dyn PlacementStrategy = match self.bot.game_mode() {
            GameMode::Creative => &self.creative,
            GameMode::Survival => &self.survival,
        };
        let request = PlacementRequest {
            block,
            item,
            target,
        };
        match strategy.place(self.bot.as_ref(), &request).await {
            Ok(()) => {
                self.placed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                warn!(
                    block = %block,
                    pos = %target,
                    strategy = strategy.name(),
                    error = %err,
                    "placement failed"
                );
                false
            }
        }
    }
}
