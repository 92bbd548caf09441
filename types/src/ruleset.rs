//! Board and rule constants consumed by the execution layer.
//!
//! A [Ruleset] is fixed when a match is created and never changes while it runs. Two presets
//! ship with the crate because the board numbering conventions they describe are not
//! compatible with each other; a server selects exactly one of them (or a fully custom layout)
//! at startup.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Color, DICE_FACES};

/// Named board layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulesetPreset {
    /// 52-cell track, 6-cell home stretch, 8 star cells that protect every pawn.
    Classic,
    /// 56-cell track with no global safe cells.
    Open56,
}

/// Who is protected on a color's start cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartCellPolicy {
    /// Only pawns of the owning color are protected; any other pawn resting there can be
    /// captured by an arrival of any color, including a freshly released owner pawn.
    #[default]
    OwnerOnly,
    /// Start cells protect every pawn, like globally safe cells.
    SafeForAll,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RulesetError {
    #[error("path_length must be > 0")]
    EmptyTrack,
    #[error("home_stretch_length must be > 0")]
    EmptyHomeStretch,
    #[error("start offset for {color} out of range (got={offset}, path_length={path_length})")]
    StartOffsetOutOfRange {
        color: Color,
        offset: u8,
        path_length: u8,
    },
    #[error("start offset {offset} shared by {first} and {second}")]
    DuplicateStartOffset {
        offset: u8,
        first: Color,
        second: Color,
    },
    #[error("safe cell out of range (got={cell}, path_length={path_length})")]
    SafeCellOutOfRange { cell: u8, path_length: u8 },
    #[error("release_value must be within 1..={max} (got={got})")]
    InvalidReleaseValue { got: u8, max: u8 },
    #[error("path_length + home_stretch_length overflows a pawn's progress counter")]
    ProgressOverflow,
}

/// Complete configuration of a board and its rule toggles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ruleset {
    pub name: String,
    /// Cells on the shared circular track.
    pub path_length: u8,
    /// Cells in each color's private finish lane; the last one is the goal.
    pub home_stretch_length: u8,
    /// Absolute track cell where each color enters, indexed by [Color::index].
    pub start_offsets: [u8; 4],
    /// Absolute track cells on which no pawn may be captured.
    #[serde(default)]
    pub safe_cells: Vec<u8>,
    /// Dice value that moves a pawn out of its home yard.
    #[serde(default = "default_release_value")]
    pub release_value: u8,
    #[serde(default)]
    pub start_cell_policy: StartCellPolicy,
    #[serde(default = "default_true")]
    pub extra_turn_on_release_value: bool,
    #[serde(default = "default_true")]
    pub extra_turn_on_capture: bool,
    #[serde(default = "default_true")]
    pub extra_turn_on_goal: bool,
}

fn default_release_value() -> u8 {
    6
}

fn default_true() -> bool {
    true
}

impl Ruleset {
    pub fn preset(preset: RulesetPreset) -> Self {
        match preset {
            RulesetPreset::Classic => Self::classic(),
            RulesetPreset::Open56 => Self::open56(),
        }
    }

    pub fn classic() -> Self {
        Self {
            name: "classic".to_string(),
            path_length: 52,
            home_stretch_length: 6,
            start_offsets: [0, 13, 26, 39],
            safe_cells: vec![0, 8, 13, 21, 26, 34, 39, 47],
            release_value: default_release_value(),
            start_cell_policy: StartCellPolicy::OwnerOnly,
            extra_turn_on_release_value: true,
            extra_turn_on_capture: true,
            extra_turn_on_goal: true,
        }
    }

    pub fn open56() -> Self {
        Self {
            name: "open56".to_string(),
            path_length: 56,
            home_stretch_length: 6,
            start_offsets: [0, 14, 28, 42],
            safe_cells: Vec::new(),
            release_value: default_release_value(),
            start_cell_policy: StartCellPolicy::OwnerOnly,
            extra_turn_on_release_value: true,
            extra_turn_on_capture: true,
            extra_turn_on_goal: true,
        }
    }

    pub fn start_offset(&self, color: Color) -> u8 {
        self.start_offsets[color.index()]
    }

    pub fn validate(&self) -> Result<(), RulesetError> {
        if self.path_length == 0 {
            return Err(RulesetError::EmptyTrack);
        }
        if self.home_stretch_length == 0 {
            return Err(RulesetError::EmptyHomeStretch);
        }
        if self
            .path_length
            .checked_add(self.home_stretch_length)
            .is_none()
        {
            return Err(RulesetError::ProgressOverflow);
        }
        for color in Color::ALL {
            let offset = self.start_offset(color);
            if offset >= self.path_length {
                return Err(RulesetError::StartOffsetOutOfRange {
                    color,
                    offset,
                    path_length: self.path_length,
                });
            }
            if let Some(first) = Color::ALL
                .into_iter()
                .take_while(|other| *other != color)
                .find(|other| self.start_offset(*other) == offset)
            {
                return Err(RulesetError::DuplicateStartOffset {
                    offset,
                    first,
                    second: color,
                });
            }
        }
        if let Some(cell) = self
            .safe_cells
            .iter()
            .copied()
            .find(|cell| *cell >= self.path_length)
        {
            return Err(RulesetError::SafeCellOutOfRange {
                cell,
                path_length: self.path_length,
            });
        }
        if self.release_value == 0 || self.release_value > DICE_FACES {
            return Err(RulesetError::InvalidReleaseValue {
                got: self.release_value,
                max: DICE_FACES,
            });
        }
        Ok(())
    }
}

impl Default for Ruleset {
    fn default() -> Self {
        Self::classic()
    }
}
