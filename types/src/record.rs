//! History records handed to external storage once a match is over.

use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, ReadRangeExt, Write};

use crate::{
    codec::{
        opt_string_encode_size, read_opt_string, read_string, string_encode_size,
        write_opt_string, write_string,
    },
    Color, FinishReason, MatchId, PAWNS_PER_COLOR,
};

/// Longest match id, ruleset name or player id accepted when decoding a record.
pub const MAX_RECORD_STRING: usize = 128;

impl Write for FinishReason {
    fn write(&self, writer: &mut impl BufMut) {
        let tag: u8 = match self {
            FinishReason::AllPawnsHome => 0,
            FinishReason::LastPlayerStanding => 1,
            FinishReason::Abandoned => 2,
            FinishReason::Fault => 3,
        };
        tag.write(writer);
    }
}

impl Read for FinishReason {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        match u8::read(reader)? {
            0 => Ok(FinishReason::AllPawnsHome),
            1 => Ok(FinishReason::LastPlayerStanding),
            2 => Ok(FinishReason::Abandoned),
            3 => Ok(FinishReason::Fault),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl FixedSize for FinishReason {
    const SIZE: usize = 1;
}

/// How one seat ended the match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeatResult {
    pub color: Color,
    pub player_id: Option<String>,
    pub pawns_in_goal: u8,
    pub forfeited: bool,
}

impl Write for SeatResult {
    fn write(&self, writer: &mut impl BufMut) {
        self.color.write(writer);
        write_opt_string(self.player_id.as_deref(), writer);
        self.pawns_in_goal.write(writer);
        self.forfeited.write(writer);
    }
}

impl EncodeSize for SeatResult {
    fn encode_size(&self) -> usize {
        Color::SIZE + opt_string_encode_size(self.player_id.as_deref()) + 1 + 1
    }
}

impl Read for SeatResult {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let color = Color::read(reader)?;
        let player_id = read_opt_string(reader, MAX_RECORD_STRING)?;
        let pawns_in_goal = u8::read(reader)?;
        if pawns_in_goal as usize > PAWNS_PER_COLOR {
            return Err(Error::Invalid("SeatResult", "too many pawns in goal"));
        }
        let forfeited = bool::read(reader)?;
        Ok(Self {
            color,
            player_id,
            pawns_in_goal,
            forfeited,
        })
    }
}

/// Summary of a finished match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchRecord {
    pub match_id: MatchId,
    pub ruleset: String,
    pub winner_id: Option<String>,
    pub reason: FinishReason,
    /// Number of resolved turn phases (rolls, moves, passes).
    pub turns: u64,
    /// Unix milliseconds at which the server observed the finish.
    pub finished_at_ms: u64,
    pub seats: Vec<SeatResult>,
}

impl Write for MatchRecord {
    fn write(&self, writer: &mut impl BufMut) {
        write_string(&self.match_id, writer);
        write_string(&self.ruleset, writer);
        write_opt_string(self.winner_id.as_deref(), writer);
        self.reason.write(writer);
        self.turns.write(writer);
        self.finished_at_ms.write(writer);
        self.seats.write(writer);
    }
}

impl EncodeSize for MatchRecord {
    fn encode_size(&self) -> usize {
        string_encode_size(&self.match_id)
            + string_encode_size(&self.ruleset)
            + opt_string_encode_size(self.winner_id.as_deref())
            + FinishReason::SIZE
            + u64::SIZE
            + u64::SIZE
            + self.seats.encode_size()
    }
}

impl Read for MatchRecord {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let match_id = read_string(reader, MAX_RECORD_STRING)?;
        let ruleset = read_string(reader, MAX_RECORD_STRING)?;
        let winner_id = read_opt_string(reader, MAX_RECORD_STRING)?;
        let reason = FinishReason::read(reader)?;
        let turns = u64::read(reader)?;
        let finished_at_ms = u64::read(reader)?;
        let seats = Vec::<SeatResult>::read_range(reader, 0..=Color::ALL.len())?;
        Ok(Self {
            match_id,
            ruleset,
            winner_id,
            reason,
            turns,
            finished_at_ms,
            seats,
        })
    }
}
