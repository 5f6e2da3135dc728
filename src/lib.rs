pub mod modules;

pub use modules::block_state::{self, BlockState};
pub use modules::config::{BuildConfig, load_config};
pub use modules::coordinator::{BuildOutcome, InterruptHandle, SurvivalCoordinator};
pub use modules::error::{BuildError, FormatError};
pub use modules::executor::{
    BuildExecutor, BuildSummary, ExecutorOutcome, ExecutorStatus, PlacementTarget,
    organize_by_layer,
};
pub use modules::locator::{BuildAnchor, PlayerLocator};
pub use modules::manager::{AgentCommand, BuildingManager, CommandOutcome, OutcomeStatus};
pub use modules::materials::{self, MaterialClass};
pub use modules::orientation::{Facing, OrientationHandler};
pub use modules::placer::{
    BlockPlacer, CreativeStrategy, PlacementRequest, PlacementStrategy, PlacerStats,
    SurvivalStrategy,
};
pub use modules::procurement::{MaterialAnalysis, MaterialNeed, ProcurementOutcome, Procurer};
pub use modules::schematic::{self, Dimensions, LocalPos, VoxelGrid};
pub use modules::state::{BuildState, BuildStateStore, BuildStatus, PauseReason, PlacedSet};
pub use modules::structure::{FileKind, StructureDescriptor, StructureRegistry};
pub use modules::world::{
    AgentNotifier, Bot, ContainerInfo, GameMode, Inventory, PlayerInfo, Position, Recipe, Vec3,
};
