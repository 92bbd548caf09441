use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a pawn currently is, relative to its own color.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PawnPosition {
    /// Waiting in the yard for a release roll.
    #[default]
    Home,
    /// On the shared track, `progress` steps past the color's start cell.
    Track { progress: u8 },
    /// In the color's private finish lane, short of the goal cell.
    HomeStretch { index: u8 },
    /// Finished. Terminal.
    Goal,
}

impl PawnPosition {
    pub fn is_home(&self) -> bool {
        matches!(self, PawnPosition::Home)
    }

    pub fn is_goal(&self) -> bool {
        matches!(self, PawnPosition::Goal)
    }
}

impl Write for PawnPosition {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            PawnPosition::Home => 0u8.write(writer),
            PawnPosition::Track { progress } => {
                1u8.write(writer);
                progress.write(writer);
            }
            PawnPosition::HomeStretch { index } => {
                2u8.write(writer);
                index.write(writer);
            }
            PawnPosition::Goal => 3u8.write(writer),
        }
    }
}

impl EncodeSize for PawnPosition {
    fn encode_size(&self) -> usize {
        match self {
            PawnPosition::Home | PawnPosition::Goal => 1,
            PawnPosition::Track { .. } | PawnPosition::HomeStretch { .. } => 2,
        }
    }
}

impl Read for PawnPosition {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        match u8::read(reader)? {
            0 => Ok(PawnPosition::Home),
            1 => Ok(PawnPosition::Track {
                progress: u8::read(reader)?,
            }),
            2 => Ok(PawnPosition::HomeStretch {
                index: u8::read(reader)?,
            }),
            3 => Ok(PawnPosition::Goal),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

/// Public identity of a seated player.
///
/// Assigned by the server when a seat is taken. The private join token never leaves the
/// server, so other players cannot impersonate a seat from broadcast data.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of a match room, chosen by the clients that join it.
pub type MatchId = String;

/// Index of a pawn within its color, `0..PAWNS_PER_COLOR`.
pub type PawnId = u8;

/// A pawn named across colors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PawnRef {
    pub color: crate::Color,
    pub pawn_id: PawnId,
}
