//! Static board geometry.
//!
//! Maps a pawn's progress (counted from its own start cell) to absolute track cells and
//! answers which cells protect which pawns. Built once per ruleset and shared read-only by
//! every match that uses it.
//!
//! Progress numbering for a color:
//! - `0..path_length` is the shared track, `0` being the color's start cell.
//! - `path_length..path_length + home_stretch_length - 1` is the private home stretch.
//! - `path_length + home_stretch_length - 1` is the goal.

use ludo_types::{Color, PawnPosition, Ruleset, RulesetError, StartCellPolicy};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoardGeometry {
    path_length: u8,
    home_stretch_length: u8,
    start_offsets: [u8; 4],
    safe: Vec<bool>,
    start_cell_policy: StartCellPolicy,
}

impl BoardGeometry {
    pub fn new(ruleset: &Ruleset) -> Result<Self, RulesetError> {
        ruleset.validate()?;
        let mut safe = vec![false; ruleset.path_length as usize];
        for cell in &ruleset.safe_cells {
            safe[*cell as usize] = true;
        }
        Ok(Self {
            path_length: ruleset.path_length,
            home_stretch_length: ruleset.home_stretch_length,
            start_offsets: ruleset.start_offsets,
            safe,
            start_cell_policy: ruleset.start_cell_policy,
        })
    }

    pub fn path_length(&self) -> u8 {
        self.path_length
    }

    pub fn home_stretch_length(&self) -> u8 {
        self.home_stretch_length
    }

    /// Progress value of the goal cell.
    pub fn goal_progress(&self) -> u8 {
        self.path_length + self.home_stretch_length - 1
    }

    pub fn start_cell(&self, color: Color) -> u8 {
        self.start_offsets[color.index()]
    }

    /// Absolute track cell for `relative` steps past `color`'s start.
    ///
    /// `relative` must be below the track length; callers range-check first.
    pub fn to_absolute(&self, color: Color, relative: u8) -> u8 {
        debug_assert!(
            relative < self.path_length,
            "relative progress {relative} is off the shared track"
        );
        let cell = (self.start_cell(color) as u16 + relative as u16) % self.path_length as u16;
        cell as u8
    }

    /// Like [Self::to_absolute], but reports an off-track input instead of asserting.
    pub fn checked_absolute(&self, color: Color, relative: u8) -> Option<u8> {
        (relative < self.path_length).then(|| self.to_absolute(color, relative))
    }

    pub fn is_globally_safe(&self, cell: u8) -> bool {
        self.safe.get(cell as usize).copied().unwrap_or(false)
    }

    pub fn is_own_start(&self, color: Color, cell: u8) -> bool {
        self.start_cell(color) == cell
    }

    /// Color whose start cell is `cell`, if any.
    pub fn start_owner(&self, cell: u8) -> Option<Color> {
        Color::ALL
            .into_iter()
            .find(|color| self.is_own_start(*color, cell))
    }

    /// Whether a pawn of `occupant` resting on track cell `cell` is immune to capture.
    pub fn protects(&self, occupant: Color, cell: u8) -> bool {
        if self.is_globally_safe(cell) {
            return true;
        }
        match self.start_cell_policy {
            StartCellPolicy::OwnerOnly => self.is_own_start(occupant, cell),
            StartCellPolicy::SafeForAll => self.start_owner(cell).is_some(),
        }
    }

    /// Absolute track cell of a position, when it is on the shared track.
    pub fn cell_of(&self, color: Color, position: PawnPosition) -> Option<u8> {
        match position {
            PawnPosition::Track { progress } => self.checked_absolute(color, progress),
            _ => None,
        }
    }

    /// Steps taken from the start cell, or `None` for a pawn still at home.
    pub fn progress_of(&self, position: PawnPosition) -> Option<u8> {
        match position {
            PawnPosition::Home => None,
            PawnPosition::Track { progress } => Some(progress),
            PawnPosition::HomeStretch { index } => Some(self.path_length + index),
            PawnPosition::Goal => Some(self.goal_progress()),
        }
    }

    /// Position reached at `progress` steps, or `None` past the goal.
    pub fn position_for_progress(&self, progress: u16) -> Option<PawnPosition> {
        let path = self.path_length as u16;
        let goal = self.goal_progress() as u16;
        if progress < path {
            Some(PawnPosition::Track {
                progress: progress as u8,
            })
        } else if progress < goal {
            Some(PawnPosition::HomeStretch {
                index: (progress - path) as u8,
            })
        } else if progress == goal {
            Some(PawnPosition::Goal)
        } else {
            None
        }
    }

    /// Whether a stored position is reachable on this board.
    pub fn is_valid_position(&self, position: PawnPosition) -> bool {
        match position {
            PawnPosition::Home | PawnPosition::Goal => true,
            PawnPosition::Track { progress } => progress < self.path_length,
            PawnPosition::HomeStretch { index } => index < self.home_stretch_length - 1,
        }
    }
}
