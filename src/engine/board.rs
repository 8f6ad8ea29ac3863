//! Move-based board game
//!
//! An 8x8 board with the familiar piece set. Movement geometry is enforced
//! (sliders need a clear path, pawns capture diagonally and promote to a
//! queen), but there is no check, castling or en passant: the game ends when
//! a king is captured. It is drawn when the side to move has no legal move or
//! after a run of quiet plies without a capture or pawn move.
//!
//! `First` plays the uppercase pieces on ranks 1-2 and moves first.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Rules, Verdict};
use crate::protocol::{GameKind, GameResult, Role};

/// Quiet plies (no capture, no pawn move) before the game is drawn
pub const DEFAULT_QUIET_PLY_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    fn letter(self) -> char {
        match self {
            PieceKind::Pawn => 'P',
            PieceKind::Knight => 'N',
            PieceKind::Bishop => 'B',
            PieceKind::Rook => 'R',
            PieceKind::Queen => 'Q',
            PieceKind::King => 'K',
        }
    }

    fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'P' => Some(PieceKind::Pawn),
            'N' => Some(PieceKind::Knight),
            'B' => Some(PieceKind::Bishop),
            'R' => Some(PieceKind::Rook),
            'Q' => Some(PieceKind::Queen),
            'K' => Some(PieceKind::King),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    pub kind: PieceKind,
    pub owner: Role,
}

impl Piece {
    fn to_char(self) -> char {
        match self.owner {
            Role::First => self.kind.letter(),
            Role::Second => self.kind.letter().to_ascii_lowercase(),
        }
    }

    fn from_char(c: char) -> Option<Self> {
        let kind = PieceKind::from_letter(c)?;
        let owner = if c.is_ascii_uppercase() {
            Role::First
        } else {
            Role::Second
        };
        Some(Piece { kind, owner })
    }
}

/// Algebraic square such as `e4`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Square {
    file: u8,
    rank: u8,
}

impl Square {
    pub fn parse(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        let file = chars.next()?;
        let rank = chars.next()?;
        if chars.next().is_some() || !('a'..='h').contains(&file) || !('1'..='8').contains(&rank) {
            return None;
        }
        Some(Square {
            file: file as u8 - b'a',
            rank: rank as u8 - b'1',
        })
    }

    fn offset(self, dr: i8, df: i8) -> Option<Square> {
        let rank = self.rank as i8 + dr;
        let file = self.file as i8 + df;
        ((0..8).contains(&rank) && (0..8).contains(&file)).then(|| Square {
            rank: rank as u8,
            file: file as u8,
        })
    }

    fn all() -> impl Iterator<Item = Square> {
        (0..8u8).flat_map(|rank| (0..8u8).map(move |file| Square { file, rank }))
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.file) as char, self.rank + 1)
    }
}

impl TryFrom<String> for Square {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Square::parse(&name).ok_or_else(|| format!("not a square: {:?}", name))
    }
}

impl From<Square> for String {
    fn from(square: Square) -> Self {
        square.to_string()
    }
}

/// `{"from": "e2", "to": "e4"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardMove {
    pub from: Square,
    pub to: Square,
}

/// Board position plus what each side has captured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BoardWire", into = "BoardWire")]
pub struct BoardState {
    /// `grid[rank][file]`, rank 0 is rank 1
    grid: [[Option<Piece>; 8]; 8],
    /// Pieces taken by each role, indexed by `Role::index`
    captured: [Vec<PieceKind>; 2],
    quiet_plies: u32,
    plies: u32,
}

/// Wire form: ranks listed from 8 down to 1, `.` for an empty square
#[derive(Serialize, Deserialize)]
struct BoardWire {
    ranks: Vec<String>,
    captured_by_first: String,
    captured_by_second: String,
    quiet_plies: u32,
    plies: u32,
}

impl TryFrom<BoardWire> for BoardState {
    type Error = String;

    fn try_from(wire: BoardWire) -> Result<Self, Self::Error> {
        if wire.ranks.len() != 8 {
            return Err(format!("expected 8 ranks, got {}", wire.ranks.len()));
        }
        let mut grid = [[None; 8]; 8];
        for (row, line) in wire.ranks.iter().enumerate() {
            let cells: Vec<char> = line.chars().collect();
            if cells.len() != 8 {
                return Err(format!("rank {:?} must have 8 squares", line));
            }
            for (file, c) in cells.into_iter().enumerate() {
                grid[7 - row][file] = match c {
                    '.' => None,
                    c => Some(Piece::from_char(c).ok_or_else(|| format!("unknown piece {:?}", c))?),
                };
            }
        }
        let parse_captured = |s: &str| {
            s.chars()
                .map(|c| PieceKind::from_letter(c).ok_or_else(|| format!("unknown piece {:?}", c)))
                .collect::<Result<Vec<_>, String>>()
        };
        Ok(BoardState {
            grid,
            captured: [
                parse_captured(wire.captured_by_first.as_str())?,
                parse_captured(wire.captured_by_second.as_str())?,
            ],
            quiet_plies: wire.quiet_plies,
            plies: wire.plies,
        })
    }
}

impl From<BoardState> for BoardWire {
    fn from(state: BoardState) -> Self {
        let ranks: Vec<String> = (0..8usize)
            .rev()
            .map(|rank| {
                state.grid[rank]
                    .iter()
                    .map(|cell| cell.map_or('.', Piece::to_char))
                    .collect::<String>()
            })
            .collect();
        let letters = |kinds: &[PieceKind]| -> String { kinds.iter().map(|k| k.letter()).collect() };
        BoardWire {
            ranks,
            captured_by_first: letters(state.captured[0].as_slice()),
            captured_by_second: letters(state.captured[1].as_slice()),
            quiet_plies: state.quiet_plies,
            plies: state.plies,
        }
    }
}

impl BoardState {
    /// Standard starting position
    pub fn standard() -> Self {
        let back = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Queen,
            PieceKind::King,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];
        let mut grid = [[None; 8]; 8];
        for (file, kind) in back.into_iter().enumerate() {
            grid[0][file] = Some(Piece { kind, owner: Role::First });
            grid[1][file] = Some(Piece { kind: PieceKind::Pawn, owner: Role::First });
            grid[6][file] = Some(Piece { kind: PieceKind::Pawn, owner: Role::Second });
            grid[7][file] = Some(Piece { kind, owner: Role::Second });
        }
        Self {
            grid,
            captured: [Vec::new(), Vec::new()],
            quiet_plies: 0,
            plies: 0,
        }
    }

    pub fn piece_at(&self, square: Square) -> Option<Piece> {
        self.grid[square.rank as usize][square.file as usize]
    }

    pub fn captured_by(&self, role: Role) -> &[PieceKind] {
        &self.captured[role.index()]
    }

    pub fn plies(&self) -> u32 {
        self.plies
    }

    fn set(&mut self, square: Square, piece: Option<Piece>) {
        self.grid[square.rank as usize][square.file as usize] = piece;
    }

    fn path_clear(&self, from: Square, to: Square) -> bool {
        let dr = (to.rank as i8 - from.rank as i8).signum();
        let df = (to.file as i8 - from.file as i8).signum();
        let mut cursor = from.offset(dr, df);
        while let Some(square) = cursor {
            if square == to {
                return true;
            }
            if self.piece_at(square).is_some() {
                return false;
            }
            cursor = square.offset(dr, df);
        }
        false
    }

    /// Geometry and occupancy check for `actor` moving `from` -> `to`
    pub fn check_move(&self, actor: Role, from: Square, to: Square) -> Result<(), String> {
        if from == to {
            return Err("a move must change squares".to_string());
        }
        let piece = self
            .piece_at(from)
            .ok_or_else(|| format!("no piece on {}", from))?;
        if piece.owner != actor {
            return Err(format!("the piece on {} belongs to the opponent", from));
        }
        let target = self.piece_at(to);
        if target.map_or(false, |t| t.owner == actor) {
            return Err(format!("{} is occupied by your own piece", to));
        }

        let dr = to.rank as i8 - from.rank as i8;
        let df = to.file as i8 - from.file as i8;
        let straight = dr == 0 || df == 0;
        let diagonal = dr.abs() == df.abs();

        let ok = match piece.kind {
            PieceKind::Pawn => {
                let (dir, start) = match actor {
                    Role::First => (1, 1),
                    Role::Second => (-1, 6),
                };
                let single = df == 0 && dr == dir && target.is_none();
                let double = df == 0
                    && dr == 2 * dir
                    && from.rank == start
                    && target.is_none()
                    && self.path_clear(from, to);
                let capture = df.abs() == 1 && dr == dir && target.is_some();
                single || double || capture
            }
            PieceKind::Knight => matches!((dr.abs(), df.abs()), (1, 2) | (2, 1)),
            PieceKind::Bishop => diagonal && self.path_clear(from, to),
            PieceKind::Rook => straight && self.path_clear(from, to),
            PieceKind::Queen => (straight || diagonal) && self.path_clear(from, to),
            PieceKind::King => dr.abs() <= 1 && df.abs() <= 1,
        };

        if ok {
            Ok(())
        } else {
            Err(format!("{:?} cannot move from {} to {}", piece.kind, from, to))
        }
    }

    /// Execute an already checked move, returning what was captured
    fn play(&mut self, from: Square, to: Square) -> Option<PieceKind> {
        let mut piece = self.piece_at(from)?;
        let taken = self.piece_at(to).map(|p| p.kind);

        let last_rank = match piece.owner {
            Role::First => 7,
            Role::Second => 0,
        };
        let pawn_move = piece.kind == PieceKind::Pawn;
        if pawn_move && to.rank == last_rank {
            piece.kind = PieceKind::Queen;
        }

        self.set(from, None);
        self.set(to, Some(piece));
        self.plies += 1;

        if let Some(kind) = taken {
            self.captured[piece.owner.index()].push(kind);
        }
        if taken.is_some() || pawn_move {
            self.quiet_plies = 0;
        } else {
            self.quiet_plies += 1;
        }
        taken
    }

    pub fn has_any_move(&self, role: Role) -> bool {
        Square::all()
            .filter(|from| self.piece_at(*from).map_or(false, |p| p.owner == role))
            .any(|from| Square::all().any(|to| self.check_move(role, from, to).is_ok()))
    }
}

/// Rules for the board game
#[derive(Debug, Clone)]
pub struct BoardRules {
    quiet_ply_limit: u32,
}

impl BoardRules {
    pub fn new() -> Self {
        Self {
            quiet_ply_limit: DEFAULT_QUIET_PLY_LIMIT,
        }
    }

    pub fn with_quiet_ply_limit(limit: u32) -> Self {
        Self {
            quiet_ply_limit: limit,
        }
    }
}

impl Default for BoardRules {
    fn default() -> Self {
        Self::new()
    }
}

impl Rules for BoardRules {
    type State = BoardState;
    type Action = BoardMove;

    const KIND: GameKind = GameKind::Board;

    fn initial_state(&self) -> BoardState {
        BoardState::standard()
    }

    fn apply(&self, state: &BoardState, actor: Role, action: BoardMove) -> Verdict<BoardState> {
        if let Err(reason) = state.check_move(actor, action.from, action.to) {
            return Verdict::illegal(reason);
        }

        let mut next = state.clone();
        let taken = next.play(action.from, action.to);

        let terminal = if taken == Some(PieceKind::King) {
            Some(GameResult::win(actor, format!("{} captured the king", actor)))
        } else if next.quiet_plies >= self.quiet_ply_limit {
            Some(GameResult::draw(format!(
                "{} plies without a capture or pawn move",
                next.quiet_plies
            )))
        } else if !next.has_any_move(actor.other()) {
            Some(GameResult::draw(format!("{} has no legal move", actor.other())))
        } else {
            None
        };

        Verdict::Legal {
            state: next,
            extra_turn: false,
            terminal,
        }
    }
}
