//! In-memory `Bot` used by unit tests. Records every world mutation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::modules::block_state::base_name;
use crate::modules::error::{BuildError, Result};
use crate::modules::world::{
    Bot, ContainerInfo, GameMode, Inventory, PlayerInfo, Position, Recipe, Vec3,
};

/// Cells below this height read as stone, the rest as air.
pub const GROUND_Y: i32 = 64;

type PlaceHook = Arc<dyn Fn(usize) + Send + Sync>;

struct FakeState {
    username: String,
    position: Vec3,
    yaw: f32,
    health: f32,
    mode: GameMode,
    players: Vec<PlayerInfo>,
    world: HashMap<Position, String>,
    pending_setblocks: HashMap<Position, (String, u32)>,
    setblock_lag: u32,
    ignore_setblock: bool,
    inventory: Inventory,
    containers: Vec<ContainerInfo>,
    obstructed: bool,
    navigation_fails: bool,
    place_failures: HashMap<Position, u32>,
    fail_all_placements: bool,
    collectable: HashSet<String>,
    collect_error: bool,
    recipes: HashMap<String, Recipe>,

    navigations: Vec<Vec3>,
    looks: Vec<(f32, f32)>,
    placements: Vec<(Position, String)>,
    commands: Vec<String>,
    collects: Vec<(String, u32)>,
    crafts: Vec<(String, u32)>,
    withdrawals: Vec<(String, u32)>,
    deposits: Vec<(String, u32)>,
}

pub struct FakeBot {
    state: Mutex<FakeState>,
    place_hook: Mutex<Option<PlaceHook>>,
}

impl FakeBot {
    fn with_mode(mode: GameMode) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                username: "builder".to_string(),
                position: Vec3::new(0.5, GROUND_Y as f64, 0.5),
                yaw: 0.0,
                health: 20.0,
                mode,
                players: Vec::new(),
                world: HashMap::new(),
                pending_setblocks: HashMap::new(),
                setblock_lag: 0,
                ignore_setblock: false,
                inventory: Inventory::new(),
                containers: Vec::new(),
                obstructed: false,
                navigation_fails: false,
                place_failures: HashMap::new(),
                fail_all_placements: false,
                collectable: HashSet::new(),
                collect_error: false,
                recipes: HashMap::new(),
                navigations: Vec::new(),
                looks: Vec::new(),
                placements: Vec::new(),
                commands: Vec::new(),
                collects: Vec::new(),
                crafts: Vec::new(),
                withdrawals: Vec::new(),
                deposits: Vec::new(),
            }),
            place_hook: Mutex::new(None),
        })
    }

    pub fn survival() -> Arc<Self> {
        Self::with_mode(GameMode::Survival)
    }

    pub fn creative() -> Arc<Self> {
        Self::with_mode(GameMode::Creative)
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_position(&self, pos: Vec3) {
        self.lock().position = pos;
    }

    pub fn set_health(&self, health: f32) {
        self.lock().health = health;
    }

    pub fn add_player(&self, name: &str, position: Option<Vec3>, yaw: f32) {
        self.lock().players.push(PlayerInfo {
            username: name.to_string(),
            position,
            yaw,
        });
    }

    pub fn set_block(&self, pos: Position, name: &str) {
        self.lock().world.insert(pos, base_name(name).to_string());
    }

    pub fn block(&self, pos: Position) -> String {
        let state = self.lock();
        read_world(&state, pos)
    }

    pub fn give(&self, item: &str, count: u32) {
        *self.lock().inventory.entry(item.to_string()).or_insert(0) += count;
    }

    pub fn held(&self, item: &str) -> u32 {
        self.lock().inventory.get(item).copied().unwrap_or(0)
    }

    pub fn add_container(&self, pos: Position, contents: &[(&str, u32)]) {
        self.lock().containers.push(ContainerInfo {
            position: pos,
            contents: contents
                .iter()
                .map(|(name, count)| (name.to_string(), *count))
                .collect(),
        });
    }

    pub fn container_count(&self, pos: Position, item: &str) -> u32 {
        self.lock()
            .containers
            .iter()
            .find(|c| c.position == pos)
            .and_then(|c| c.contents.get(item).copied())
            .unwrap_or(0)
    }

    pub fn set_navigation_fails(&self, fails: bool) {
        self.lock().navigation_fails = fails;
    }

    pub fn set_obstructed(&self, obstructed: bool) {
        self.lock().obstructed = obstructed;
    }

    pub fn fail_placements_at(&self, pos: Position, times: u32) {
        self.lock().place_failures.insert(pos, times);
    }

    pub fn fail_all_placements(&self, fail: bool) {
        self.lock().fail_all_placements = fail;
    }

    pub fn set_setblock_lag(&self, reads: u32) {
        self.lock().setblock_lag = reads;
    }

    pub fn ignore_setblock(&self, ignore: bool) {
        self.lock().ignore_setblock = ignore;
    }

    pub fn make_collectable(&self, item: &str) {
        self.lock().collectable.insert(item.to_string());
    }

    pub fn set_collect_error(&self, error: bool) {
        self.lock().collect_error = error;
    }

    pub fn add_recipe(&self, item: &str, ingredients: &[(&str, u32)], yields: u32) {
        self.lock().recipes.insert(
            item.to_string(),
            Recipe {
                ingredients: ingredients
                    .iter()
                    .map(|(name, count)| (name.to_string(), *count))
                    .collect(),
                yields,
            },
        );
    }

    /// Called with the running placement count after every successful place.
    pub fn on_place(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.place_hook.lock().unwrap() = Some(Arc::new(hook));
    }

    pub fn navigations(&self) -> Vec<Vec3> {
        self.lock().navigations.clone()
    }

    pub fn last_look(&self) -> Option<(f32, f32)> {
        self.lock().looks.last().copied()
    }

    pub fn placements(&self) -> Vec<(Position, String)> {
        self.lock().placements.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn collects(&self) -> Vec<(String, u32)> {
        self.lock().collects.clone()
    }

    pub fn crafts(&self) -> Vec<(String, u32)> {
        self.lock().crafts.clone()
    }

    pub fn withdrawals(&self) -> Vec<(String, u32)> {
        self.lock().withdrawals.clone()
    }

    pub fn deposits(&self) -> Vec<(String, u32)> {
        self.lock().deposits.clone()
    }

    fn fire_place_hook(&self, count: usize) {
        let hook = self.place_hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(count);
        }
    }
}

fn read_world(state: &FakeState, pos: Position) -> String {
    state.world.get(&pos).cloned().unwrap_or_else(|| {
        if pos.y < GROUND_Y {
            "stone".to_string()
        } else {
            "air".to_string()
        }
    })
}

fn add(inventory: &mut Inventory, item: &str, count: u32) {
    *inventory.entry(item.to_string()).or_insert(0) += count;
}

fn take(inventory: &mut Inventory, item: &str, count: u32) -> u32 {
    let Some(have) = inventory.get_mut(item) else {
        return 0;
    };
    let moved = (*have).min(count);
    *have -= moved;
    if *have == 0 {
        inventory.remove(item);
    }
    moved
}

#[async_trait]
impl Bot for FakeBot {
    fn username(&self) -> String {
        self.lock().username.clone()
    }

    fn position(&self) -> Vec3 {
        self.lock().position
    }

    fn yaw(&self) -> f32 {
        self.lock().yaw
    }

    fn health(&self) -> f32 {
        self.lock().health
    }

    fn game_mode(&self) -> GameMode {
        self.lock().mode
    }

    fn players(&self) -> Vec<PlayerInfo> {
        self.lock().players.clone()
    }

    fn block_at(&self, pos: Position) -> Option<String> {
        let mut state = self.lock();
        if let Some((name, remaining)) = state.pending_setblocks.get_mut(&pos) {
            if *remaining == 0 {
                let name = name.clone();
                state.pending_setblocks.remove(&pos);
                state.world.insert(pos, name);
            } else {
                *remaining -= 1;
            }
        }
        Some(read_world(&state, pos))
    }

    fn line_of_sight(&self, _from: Vec3, _target: Position) -> bool {
        !self.lock().obstructed
    }

    fn inventory(&self) -> Inventory {
        self.lock().inventory.clone()
    }

    async fn navigate_to(&self, target: Vec3, _range: f64) -> Result<()> {
        let mut state = self.lock();
        state.navigations.push(target);
        if state.navigation_fails {
            return Err(BuildError::PositionUnreachable {
                target: target.floored(),
                reason: "no path".to_string(),
            });
        }
        state.position = target;
        // A new vantage point clears the view.
        state.obstructed = false;
        Ok(())
    }

    async fn look(&self, yaw: f32, pitch: f32) -> Result<()> {
        let mut state = self.lock();
        state.yaw = yaw;
        state.looks.push((yaw, pitch));
        Ok(())
    }

    async fn place_block(&self, target: Position, item: &str) -> Result<()> {
        let count = {
            let mut state = self.lock();
            if state.fail_all_placements {
                return Err(BuildError::World("placement rejected".to_string()));
            }
            if let Some(remaining) = state.place_failures.get_mut(&target) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(BuildError::World("no support face in view".to_string()));
                }
            }
            if state.mode == GameMode::Survival && take(&mut state.inventory, item, 1) == 0 {
                return Err(BuildError::MaterialUnavailable {
                    material: item.to_string(),
                    count: 1,
                });
            }
            state.world.insert(target, base_name(item).to_string());
            state.placements.push((target, item.to_string()));
            state.placements.len()
        };
        self.fire_place_hook(count);
        Ok(())
    }

    async fn run_command(&self, command: &str) -> Result<()> {
        let mut state = self.lock();
        state.commands.push(command.to_string());
        if state.ignore_setblock {
            return Ok(());
        }
        let parts: Vec<&str> = command.split_whitespace().collect();
        if let ["/setblock", x, y, z, block] = parts.as_slice() {
            let pos = Position::new(
                x.parse().map_err(|_| BuildError::World("bad x".into()))?,
                y.parse().map_err(|_| BuildError::World("bad y".into()))?,
                z.parse().map_err(|_| BuildError::World("bad z".into()))?,
            );
            let name = base_name(block).to_string();
            let lag = state.setblock_lag;
            state.pending_setblocks.insert(pos, (name, lag));
        }
        Ok(())
    }

    async fn nearby_containers(&self, _radius: f64) -> Result<Vec<ContainerInfo>> {
        Ok(self.lock().containers.clone())
    }

    async fn withdraw(&self, container: Position, item: &str, count: u32) -> Result<u32> {
        let mut state = self.lock();
        let Some(chest) = state.containers.iter_mut().find(|c| c.position == container) else {
            return Err(BuildError::World("no container there".to_string()));
        };
        let moved = take(&mut chest.contents, item, count);
        add(&mut state.inventory, item, moved);
        state.withdrawals.push((item.to_string(), moved));
        Ok(moved)
    }

    async fn deposit(&self, container: Position, item: &str, count: u32) -> Result<u32> {
        let mut state = self.lock();
        let moved = take(&mut state.inventory, item, count);
        let Some(chest) = state.containers.iter_mut().find(|c| c.position == container) else {
            return Err(BuildError::World("no container there".to_string()));
        };
        add(&mut chest.contents, item, moved);
        state.deposits.push((item.to_string(), moved));
        Ok(moved)
    }

    async fn collect(&self, item: &str, count: u32) -> Result<bool> {
        let mut state = self.lock();
        state.collects.push((item.to_string(), count));
        if state.collect_error {
            return Err(BuildError::World("pathfinder crashed".to_string()));
        }
        if !state.collectable.contains(item) {
            return Ok(false);
        }
        add(&mut state.inventory, item, count);
        // Gathering wanders off; come back is the caller's job.
        state.position = Vec3::new(state.position.x + 30.0, state.position.y, state.position.z);
        Ok(true)
    }

    fn recipe(&self, item: &str) -> Option<Recipe> {
        self.lock().recipes.get(item).cloned()
    }

    async fn craft(&self, item: &str, count: u32) -> Result<bool> {
        let mut state = self.lock();
        state.crafts.push((item.to_string(), count));
        let Some(recipe) = state.recipes.get(item).cloned() else {
            return Ok(false);
        };
        let batches = count.div_ceil(recipe.yields.max(1));
        let enough = recipe.ingredients.iter().all(|(name, per)| {
            state.inventory.get(name).copied().unwrap_or(0) >= per * batches
        });
        if !enough {
            return Ok(false);
        }
        for (name, per) in &recipe.ingredients {
            take(&mut state.inventory, name, per * batches);
        }
        add(&mut state.inventory, item, batches * recipe.yields);
        Ok(true)
    }
}
