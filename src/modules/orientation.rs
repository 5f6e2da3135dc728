use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::modules::block_state::base_name;
use crate::modules::world::{Bot, Position, Vec3};

/// Beyond this distance from the standing spot the agent walks there first.
pub const STANDING_TOLERANCE: f64 = 1.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Facing {
    North,
    South,
    East,
    West,
}

impl Facing {
    /// Minecraft yaw in degrees for looking toward this direction.
    pub const fn yaw(self) -> f32 {
        match self {
            Facing::North => 180.0,
            Facing::South => 0.0,
            Facing::East => -90.0,
            Facing::West => 90.0,
        }
    }

    pub const fn unit(self) -> (i32, i32) {
        match self {
            Facing::North => (0, -1),
            Facing::South => (0, 1),
            Facing::East => (1, 0),
            Facing::West => (-1, 0),
        }
    }

    pub const fn opposite(self) -> Facing {
        match self {
            Facing::North => Facing::South,
            Facing::South => Facing::North,
            Facing::East => Facing::West,
            Facing::West => Facing::East,
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::North => write!(f, "north"),
            Facing::South => write!(f, "south"),
            Facing::East => write!(f, "east"),
            Facing::West => write!(f, "west"),
        }
    }
}

impl FromStr for Facing {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "north" => Ok(Facing::North),
            "south" => Ok(Facing::South),
            "east" => Ok(Facing::East),
            "west" => Ok(Facing::West),
            _ => Err(()),
        }
    }
}

const ORIENTED_SUFFIXES: &[&str] = &[
    "_stairs",
    "_door",
    "_trapdoor",
    "_bed",
    "_fence_gate",
    "_wall_torch",
    "_wall_sign",
    "_wall_banner",
    "_glazed_terracotta",
    "_button",
    "_anvil",
];

const ORIENTED_BLOCKS: &[&str] = &[
    "chest",
    "trapped_chest",
    "ender_chest",
    "barrel",
    "furnace",
    "blast_furnace",
    "smoker",
    "dispenser",
    "dropper",
    "observer",
    "piston",
    "sticky_piston",
    "hopper",
    "lectern",
    "loom",
    "stonecutter",
    "grindstone",
    "anvil",
    "ladder",
    "lever",
    "repeater",
    "comparator",
    "carved_pumpkin",
    "jack_o_lantern",
    "beehive",
    "bee_nest",
    "campfire",
];

/// Blocks whose placed direction follows the agent's view.
pub fn requires_orientation(block: &str) -> bool {
    let name = base_name(block);
    ORIENTED_BLOCKS.contains(&name) || ORIENTED_SUFFIXES.iter().any(|s| name.ends_with(s))
}

fn is_bed(block: &str) -> bool {
    base_name(block).ends_with("_bed")
}

/// Beds record the direction of their head, which is the opposite of the
/// direction the agent must look when placing the foot.
pub fn placement_facing(block: &str, facing: Facing) -> Facing {
    if is_bed(block) {
        facing.opposite()
    } else {
        facing
    }
}

/// Where to stand to place a block facing `facing`: one step behind it.
pub fn standing_position_for(target: Position, facing: Facing) -> Position {
    let (dx, dz) = facing.unit();
    target.offset(-dx, 0, -dz)
}

pub struct OrientationHandler {
    bot: Arc<dyn Bot>,
    settle: Duration,
}

impl OrientationHandler {
    pub fn new(bot: Arc<dyn Bot>, settle: Duration) -> Self {
        Self { bot, settle }
    }

    /// Walk behind the target (best-effort), look the right way, let the
    /// rotation settle.
    pub async fn move_and_rotate(&self, target: Position, facing: Facing, block: &str) {
        let facing = placement_facing(block, facing);
        let stand = standing_position_for(target, facing);
        let stand_center = Vec3::new(stand.x as f64 + 0.5, stand.y as f64, stand.z as f64 + 0.5);

        if self.bot.position().distance(stand_center) > STANDING_TOLERANCE {
            if let Err(err) = self.bot.navigate_to(stand_center, 1.0).await {
                warn!(
                    block,
                    pos = %target,
                    error = %err,
                    "could not reach standing spot; placing anyway"
                );
            }
        }

        if let Err(err) = self.bot.look(facing.yaw(), 0.0).await {
            warn!(block, error = %err, "look failed");
        }
        debug!(block, facing = %facing, yaw = facing.yaw(), "rotated for placement");
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::FakeBot;

    #[test]
    fn yaw_table() {
        assert_eq!(Facing::North.yaw(), 180.0);
        assert_eq!(Facing::South.yaw(), 0.0);
        assert_eq!(Facing::East.yaw(), -90.0);
        assert_eq!(Facing::West.yaw(), 90.0);
    }

    #[test]
    fn stand_opposite_the_facing_direction() {
        let target = Position::new(10, 64, 10);
        assert_eq!(
            standing_position_for(target, Facing::North),
            Position::new(10, 64, 11)
        );
        assert_eq!(
            standing_position_for(target, Facing::East),
            Position::new(9, 64, 10)
        );
    }

    #[test]
    fn beds_invert_facing() {
        assert_eq!(placement_facing("red_bed", Facing::North), Facing::South);
        assert_eq!(placement_facing("oak_stairs", Facing::North), Facing::North);
    }

    #[test]
    fn orientation_table() {
        assert!(requires_orientation("minecraft:oak_stairs"));
        assert!(requires_orientation("furnace"));
        assert!(requires_orientation("white_bed"));
        assert!(!requires_orientation("stone"));
        assert_eq!("West".parse::<Facing>(), Ok(Facing::West));
        assert!("up".parse::<Facing>().is_err());
    }

    #[tokio::test]
    async fn walks_when_far_and_always_looks() {
        let bot = FakeBot::survival();
        bot.set_position(Vec3::new(0.5, 64.0, 0.5));
        let handler = OrientationHandler::new(bot.clone(), Duration::ZERO);

        handler
            .move_and_rotate(Position::new(10, 64, 10), Facing::North, "oak_stairs")
            .await;
        assert_eq!(bot.navigations().len(), 1);
        assert_eq!(bot.navigations()[0], Vec3::new(10.5, 64.0, 11.5));
        assert_eq!(bot.last_look(), Some((180.0, 0.0)));

        // Already standing there: no second walk.
        handler
            .move_and_rotate(Position::new(10, 64, 10), Facing::North, "oak_stairs")
            .await;
        assert_eq!(bot.navigations().len(), 1);
    }

    #[tokio::test]
    async fn navigation_failure_still_rotates() {
        let bot = FakeBot::survival();
        bot.set_navigation_fails(true);
        let handler = OrientationHandler::new(bot.clone(), Duration::ZERO);
        handler
            .move_and_rotate(Position::new(20, 64, 0), Facing::North, "red_bed")
            .await;
        // Bed facing north is placed looking south.
        assert_eq!(bot.last_look(), Some((0.0, 0.0)));
    }
}
