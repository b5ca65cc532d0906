//! Adapter over `shakmaty` and `pgn-reader`: lazy PGN game iteration,
//! position hashing and FEN loading.

use std::fs::File;
use std::io::{self, Read};
use std::mem;
use std::path::Path;

use pgn_reader::{BufferedReader, RawHeader, SanPlus, Skip, Visitor};
use shakmaty::fen::Fen;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, EnPassantMode, Move, Position};

use crate::error::ChessError;
use crate::PositionHash;

/// Display-only tags of a game.
#[derive(Debug, Clone, Default)]
pub struct GameHeaders {
    pub white: Option<String>,
    pub white_elo: Option<String>,
    pub black: Option<String>,
    pub black_elo: Option<String>,
    pub date: Option<String>,
    pub result: Option<String>,
    pub variant: Option<String>,
}

impl GameHeaders {
    pub fn is_standard_variant(&self) -> bool {
        match self.variant.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(v) => ["standard", "chess", "from position"]
                .iter()
                .any(|s| v.eq_ignore_ascii_case(s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GameRecord {
    /// Assigned by whoever reads the game, e.g. `[3]2019/01.pgn`.
    pub id: String,
    pub headers: GameHeaders,
    /// Start position, the initial array unless a FEN tag says otherwise.
    pub start: Chess,
    /// Main line, resolved against the rules. Stops at the first bad move.
    pub moves: Vec<Move>,
    pub parse_error: Option<String>,
}

impl GameRecord {
    /// Whether the game can be replayed with standard rules at all.
    pub fn is_parsable(&self) -> bool {
        self.headers.is_standard_variant()
    }

    pub fn short_description(&self) -> String {
        let h = &self.headers;
        let mut out = self.id.clone();
        if let Some(variant) = &h.variant {
            out.push_str(&format!(" {{{variant}}}"));
        }
        out.push_str(&format!(
            " : {} {} {} {}",
            h.date.as_deref().unwrap_or("?"),
            player(&h.white, &h.white_elo),
            h.result.as_deref().unwrap_or("{no result parsed}"),
            player(&h.black, &h.black_elo),
        ));
        out
    }
}

fn player(name: &Option<String>, elo: &Option<String>) -> String {
    format!("{}[{}]", name.as_deref().unwrap_or("?"), elo.as_deref().unwrap_or("?"))
}

#[derive(Default)]
struct GameVisitor {
    headers: GameHeaders,
    fen: Option<String>,
    start: Chess,
    pos: Chess,
    moves: Vec<Move>,
    error: Option<String>,
}

impl Visitor for GameVisitor {
    type Result = GameRecord;

    fn begin_game(&mut self) {
        *self = GameVisitor::default();
    }

    fn header(&mut self, key: &[u8], value: RawHeader<'_>) {
        let slot = match key {
            b"White" => &mut self.headers.white,
            b"WhiteElo" => &mut self.headers.white_elo,
            b"Black" => &mut self.headers.black,
            b"BlackElo" => &mut self.headers.black_elo,
            b"Date" => &mut self.headers.date,
            b"Result" => &mut self.headers.result,
            b"Variant" => &mut self.headers.variant,
            b"FEN" => &mut self.fen,
            _ => return,
        };
        *slot = Some(value.decode_utf8_lossy().into_owned());
    }

    fn end_headers(&mut self) -> Skip {
        if !self.headers.is_standard_variant() {
            return Skip(true);
        }
        if let Some(fen) = &self.fen {
            match position_from_fen(fen) {
                Ok(pos) => {
                    self.start = pos.clone();
                    self.pos = pos;
                }
                Err(e) => {
                    self.error = Some(e.to_string());
                    return Skip(true);
                }
            }
        }
        Skip(false)
    }

    fn san(&mut self, san_plus: SanPlus) {
        if self.error.is_some() {
            return;
        }
        match san_plus.san.to_move(&self.pos) {
            Ok(m) => {
                self.pos.play_unchecked(&m);
                self.moves.push(m);
            }
            Err(e) => {
                self.error = Some(format!("half-move {} {san_plus}: {e}", self.moves.len() + 1));
            }
        }
    }

    fn begin_variation(&mut self) -> Skip {
        Skip(true)
    }

    fn end_game(&mut self) -> Self::Result {
        GameRecord {
            id: String::new(),
            headers: mem::take(&mut self.headers),
            start: mem::take(&mut self.start),
            moves: mem::take(&mut self.moves),
            parse_error: self.error.take(),
        }
    }
}

/// Games of one PGN stream, parsed one at a time. Stops for good after the
/// first read error.
pub struct PgnGames<R: Read> {
    reader: BufferedReader<R>,
    visitor: GameVisitor,
    finished: bool,
}

impl<R: Read> PgnGames<R> {
    pub fn new(inner: R) -> Self {
        Self { reader: BufferedReader::new(inner), visitor: GameVisitor::default(), finished: false }
    }
}

impl<R: Read> Iterator for PgnGames<R> {
    type Item = io::Result<GameRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.reader.read_game(&mut self.visitor) {
            Ok(Some(game)) => Some(Ok(game)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

pub fn open_pgn(path: &Path) -> io::Result<PgnGames<File>> {
    Ok(PgnGames::new(File::open(path)?))
}

pub fn position_hash(pos: &Chess) -> PositionHash {
    let hash: Zobrist64 = pos.zobrist_hash(EnPassantMode::Legal);
    hash.0 as PositionHash
}

pub fn position_from_fen(fen: &str) -> Result<Chess, ChessError> {
    let fen: Fen = fen.trim().parse()?;
    Ok(fen.into_position(CastlingMode::Standard)?)
}

/// Piece placement only, used to tell apart positions sharing a hash.
pub fn board_key(pos: &Chess) -> String {
    pos.board().to_string()
}
