use std::sync::Arc;

use crate::modules::schematic::Dimensions;
use crate::modules::world::{Bot, PlayerInfo, Position, Vec3};

/// Minimum gap between a player and the near edge of a new structure.
pub const MIN_CLEARANCE: f64 = 5.0;

/// Who a build is anchored to: where they stand and which way they look.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildAnchor {
    pub username: String,
    pub position: Vec3,
    pub yaw: f32,
}

pub struct PlayerLocator {
    bot: Arc<dyn Bot>,
}

impl PlayerLocator {
    pub fn new(bot: Arc<dyn Bot>) -> Self {
        Self { bot }
    }

    /// Nearest other player with a known position.
    pub fn find_nearest(&self) -> Option<String> {
        let me = self.bot.username();
        let here = self.bot.position();
        self.bot
            .players()
            .into_iter()
            .filter(|p| p.username != me)
            .filter_map(|p| p.position.map(|pos| (p.username, here.distance(pos))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name)
    }

    /// Resolve the player a build should face: the named one, else the
    /// nearest, else the agent itself.
    pub fn anchor_for(&self, requested: Option<&str>) -> BuildAnchor {
        let players = self.bot.players();
        let chosen = requested
            .and_then(|name| tracked_player(&players, name))
            .or_else(|| {
                self.find_nearest()
                    .and_then(|name| tracked_player(&players, &name))
            });

        match chosen {
            Some(player) => BuildAnchor {
                username: player.username.clone(),
                position: player.position.unwrap_or_else(|| self.bot.position()),
                yaw: player.yaw,
            },
            None => BuildAnchor {
                username: self.bot.username(),
                position: self.bot.position(),
                yaw: self.bot.yaw(),
            },
        }
    }

    /// Build origin beside the player: yaw turned by +90 degrees, pushed out
    /// far enough that the footprint clears them.
    pub fn calculate_build_position(player: Vec3, yaw: f32, size: Dimensions) -> Position {
        let angle = (yaw as f64 + 90.0).to_radians();
        let (dir_x, dir_z) = (-angle.sin(), angle.cos());
        let half = (size.x.max(size.z) as f64 / 2.0).ceil();
        let clearance = MIN_CLEARANCE.max(half + 2.0);

        Position {
            x: (player.x + dir_x * clearance).floor() as i32,
            y: player.y.floor() as i32,
            z: (player.z + dir_z * clearance).floor() as i32,
        }
    }
}

fn tracked_player<'a>(players: &'a [PlayerInfo], name: &str) -> Option<&'a PlayerInfo> {
    players
        .iter()
        .find(|p| p.username.eq_ignore_ascii_case(name) && p.position.is_some())
}
