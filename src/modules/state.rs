use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::modules::world::Position;

pub const STATE_FILE: &str = "build_state.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Building,
    Paused,
    Completed,
    Error,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Building => write!(f, "building"),
            BuildStatus::Paused => write!(f, "paused"),
            BuildStatus::Completed => write!(f, "completed"),
            BuildStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    LowHealth,
    Death,
    Combat,
    TooManyErrors,
    MaterialGatheringFailed,
    WaitingForHelp,
    Error(String),
}

impl PauseReason {
    /// What a human should do before resuming.
    pub fn advice(&self) -> &'static str {
        match self {
            PauseReason::LowHealth => "eat or rest, then resume-build",
            PauseReason::Death => "recover items, then resume-build",
            PauseReason::Combat => "deal with the threat, then resume-build",
            PauseReason::TooManyErrors => "clear the site, then resume-build",
            PauseReason::MaterialGatheringFailed => {
                "check the area for resources, then resume-build"
            }
            PauseReason::WaitingForHelp => "bring the listed materials, then resume-build",
            PauseReason::Error(_) => "inspect get-build-state, then resume-build or cancel-build",
        }
    }
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseReason::LowHealth => write!(f, "low_health"),
            PauseReason::Death => write!(f, "death"),
            PauseReason::Combat => write!(f, "combat"),
            PauseReason::TooManyErrors => write!(f, "too_many_errors"),
            PauseReason::MaterialGatheringFailed => write!(f, "material_gathering_failed"),
            PauseReason::WaitingForHelp => write!(f, "waiting_for_help"),
            PauseReason::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// Placed world coordinates, keyed `"x,y,z"`. Serialized as a sorted list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct PlacedSet(BTreeSet<String>);

impl PlacedSet {
    pub fn contains(&self, pos: Position) -> bool {
        self.0.contains(&pos.key())
    }

    /// Returns false if `pos` was already recorded.
    pub fn insert(&mut self, pos: Position) -> bool {
        self.0.insert(pos.key())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecoveryCounters {
    pub total_errors: u32,
    pub pauses: u32,
    /// Failed procurement attempts per material since its last success.
    pub material_retries: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildState {
    pub schematic: String,
    pub origin: Position,
    pub total_blocks: usize,
    pub current_layer: Option<i32>,
    pub placed: PlacedSet,
    pub status: BuildStatus,
    pub pause_reason: Option<PauseReason>,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub recovery: RecoveryCounters,
}

impl BuildState {
    pub fn new(schematic: &str, origin: Position, total_blocks: usize) -> Self {
        let now = Utc::now();
        Self {
            schematic: schematic.to_string(),
            origin,
            total_blocks,
            current_layer: None,
            placed: PlacedSet::default(),
            status: BuildStatus::Building,
            pause_reason: None,
            started_at: now,
            last_update: now,
            recovery: RecoveryCounters::default(),
        }
    }

    pub fn touch(&mut self) {
        self.last_update = Utc::now();
    }

    pub fn pause(&mut self, reason: PauseReason) {
        self.status = BuildStatus::Paused;
        self.pause_reason = Some(reason);
        self.recovery.pauses += 1;
        self.touch();
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, BuildStatus::Building | BuildStatus::Paused)
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_blocks == 0 {
            return 100.0;
        }
        self.placed.len() as f64 * 100.0 / self.total_blocks as f64
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} at {}: {} | {}/{} blocks ({:.1}%)",
            self.schematic,
            self.origin,
            self.status,
            self.placed.len(),
            self.total_blocks,
            self.progress_percent()
        );
        if let Some(layer) = self.current_layer {
            out.push_str(&format!(" | last layer y={}", layer));
        }
        if let Some(reason) = &self.pause_reason {
            out.push_str(&format!(" | paused: {} ({})", reason, reason.advice()));
        }
        out
    }
}

/// One agent's persisted build state under `<root>/<agent>/build_state.json`.
#[derive(Debug, Clone)]
pub struct BuildStateStore {
    dir: PathBuf,
}

impl BuildStateStore {
    pub fn new(root: &Path, agent: &str) -> Self {
        Self {
            dir: root.join(agent),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn load(&self) -> io::Result<Option<BuildState>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&path)?;
        if bytes.is_empty() {
            return Ok(None);
        }

        let state: BuildState = serde_json::from_slice(&bytes).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "failed to parse build state {}; delete it or run `cancel-build` to reset: {}",
                    path.display(),
                    e
                ),
            )
        })?;
        Ok(Some(state))
    }

    pub fn save(&self, state: &BuildState) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_vec_pretty(state)?;
        fs::write(self.path(), json)?;
        Ok(())
    }

    /// Returns whether a file was removed.
    pub fn delete(&self) -> io::Result<bool> {
        match fs::remove_file(self.path()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
