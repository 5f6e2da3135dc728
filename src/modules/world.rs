use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::modules::error::Result;

/// Height of the agent's eyes above its feet.
pub const EYE_HEIGHT: f64 = 1.62;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub const fn origin() -> Self {
        Self { x: 0, y: 0, z: 0 }
    }

    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    /// Placed-set key, `"x,y,z"`.
    pub fn key(self) -> String {
        format!("{},{},{}", self.x, self.y, self.z)
    }

    pub fn center(self) -> Vec3 {
        Vec3::new(
            self.x as f64 + 0.5,
            self.y as f64 + 0.5,
            self.z as f64 + 0.5,
        )
    }

    pub fn as_vec3(self) -> Vec3 {
        Vec3::new(self.x as f64, self.y as f64, self.z as f64)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<_> = s.trim().split(',').collect();
        if parts.len() != 3 {
            return Err(format!("position `{}` must be formatted as x,y,z", s));
        }

        let x = parts[0]
            .trim()
            .parse::<i32>()
            .map_err(|_| "x must be an integer")?;
        let y = parts[1]
            .trim()
            .parse::<i32>()
            .map_err(|_| "y must be an integer")?;
        let z = parts[2]
            .trim()
            .parse::<i32>()
            .map_err(|_| "z must be an integer")?;

        Ok(Position { x, y, z })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn floored(self) -> Position {
        Position {
            x: self.x.floor() as i32,
            y: self.y.floor() as i32,
            z: self.z.floor() as i32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Creative,
    Survival,
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameMode::Creative => write!(f, "creative"),
            GameMode::Survival => write!(f, "survival"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlayerInfo {
    pub username: String,
    /// `None` when the player is outside the agent's tracking range.
    pub position: Option<Vec3>,
    /// Minecraft yaw in degrees (south = 0, west = 90).
    pub yaw: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContainerInfo {
    pub position: Position,
    pub contents: BTreeMap<String, u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Recipe {
    pub ingredients: BTreeMap<String, u32>,
    /// Items produced per craft.
    pub yields: u32,
}

/// Item name to held count.
pub type Inventory = BTreeMap<String, u32>;

/// The agent's body in a live world session.
///
/// Movement, mining, crafting and container handling belong to the skill
/// library behind this trait; building code only sequences calls to it.
#[async_trait]
pub trait Bot: Send + Sync {
    fn username(&self) -> String;
    fn position(&self) -> Vec3;
    fn eye_position(&self) -> Vec3 {
        let pos = self.position();
        Vec3::new(pos.x, pos.y + EYE_HEIGHT, pos.z)
    }
    /// Minecraft yaw in degrees.
    fn yaw(&self) -> f32;
    /// Health on a 0..=20 scale.
    fn health(&self) -> f32;
    fn game_mode(&self) -> GameMode;
    fn players(&self) -> Vec<PlayerInfo>;
    /// Block name at `pos`, `None` when the chunk is not loaded.
    fn block_at(&self, pos: Position) -> Option<String>;
    /// True when nothing solid lies between `from` and the block at `target`.
    fn line_of_sight(&self, from: Vec3, target: Position) -> bool;
    fn inventory(&self) -> Inventory;

    async fn navigate_to(&self, target: Vec3, range: f64) -> Result<()>;
    async fn look(&self, yaw: f32, pitch: f32) -> Result<()>;
    /// Place `item` at `target` against an adjacent supporting block.
    async fn place_block(&self, target: Position, item: &str) -> Result<()>;
    /// Issue a privileged chat command (creative world-edit).
    async fn run_command(&self, command: &str) -> Result<()>;

    async fn nearby_containers(&self, radius: f64) -> Result<Vec<ContainerInfo>>;
    /// Returns how many items actually moved.
    async fn withdraw(&self, container: Position, item: &str, count: u32) -> Result<u32>;
    /// Returns how many items actually moved.
    async fn deposit(&self, container: Position, item: &str, count: u32) -> Result<u32>;

    /// Gather `count` of a directly obtainable material. `Ok(false)` is a
    /// failed attempt; `Err` means the skill itself broke.
    async fn collect(&self, item: &str, count: u32) -> Result<bool>;
    fn recipe(&self, item: &str) -> Option<Recipe>;
    async fn craft(&self, item: &str, count: u32) -> Result<bool>;
}

/// Channel back to the surrounding agent (chat relay, decision layer).
pub trait AgentNotifier: Send + Sync {
    fn notify(&self, message: &str);

    /// Tell the decision layer to hold off while an autonomous build runs.
    fn set_autonomous(&self, _active: bool) {}
}

pub fn held(inventory: &Inventory, item: &str) -> u32 {
    inventory.get(item).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_key_round_trips_through_from_str() {
        let pos = Position::new(-3, 64, 12);
        assert_eq!(pos.key(), "-3,64,12");
        assert_eq!(pos.key().parse::<Position>().unwrap(), pos);
    }

    #[test]
    fn position_parse_rejects_wrong_arity() {
        assert!("1,2".parse::<Position>().is_err());
        assert!("a,2,3".parse::<Position>().is_err());
    }

    #[test]
    fn floored_rounds_toward_negative_infinity() {
        let v = Vec3::new(-0.5, 64.9, 3.0);
        assert_eq!(v.floored(), Position::new(-1, 64, 3));
    }
}
