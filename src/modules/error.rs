use std::io;

use thiserror::Error;

use crate::modules::world::Position;

/// Failure to turn a structure file into a voxel grid.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("failed to read structure file: {0}")]
    Io(#[from] io::Error),
    #[error("failed to decompress structure file: {0}")]
    Decompress(io::Error),
    #[error("structure file is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid structure dimensions {width}x{height}x{length}")]
    InvalidDimensions { width: i64, height: i64, length: i64 },
    #[error("malformed varint in block data at index {0}")]
    BadVarint(usize),
    #[error("palette id {0} is out of range")]
    PaletteId(i32),
    #[error("unrecognised structure layout: {0}")]
    Layout(String),
    #[error("invalid block state `{0}`")]
    BlockState(String),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("structure `{0}` not found")]
    StructureNotFound(String),
    #[error("cannot reach ({}, {}, {}): {reason}", target.x, target.y, target.z)]
    PositionUnreachable { target: Position, reason: String },
    #[error("need {count} more {material}")]
    MaterialUnavailable { material: String, count: u32 },
    #[error("failed to place {block} at ({}, {}, {}): {reason}", target.x, target.y, target.z)]
    PlacementFailed {
        block: String,
        target: Position,
        reason: String,
    },
    #[error("a build is already in progress")]
    Busy,
    #[error("no build in progress")]
    NoActiveBuild,
    #[error("building is not attached to a live session")]
    NotAttached,
    #[error("world interaction failed: {0}")]
    World(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = BuildError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_errors_surface_through_build_errors() {
        let err: BuildError = FormatError::PaletteId(70_000).into();
        assert!(matches!(err, BuildError::Format(FormatError::PaletteId(70_000))));
        assert_eq!(err.to_string(), "palette id 70000 is out of range");
    }

    #[test]
    fn placement_errors_name_the_cell() {
        let err = BuildError::PlacementFailed {
            block: "stone".to_string(),
            target: Position::new(1, 64, -2),
            reason: "no support".to_string(),
        };
        assert_eq!(err.to_string(), "failed to place stone at (1, 64, -2): no support");
    }
}
