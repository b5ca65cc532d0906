//! Line-oriented query loop: `exit`, `load <pgn file>`, or a FEN.

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;

use crate::query::{QueryEngine, TracedGame};
use crate::stats::grouped;

lazy_static! {
    static ref LOAD: Regex = Regex::new(r"(?i)^load(.*)$").expect("valid regex");
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Exit,
    Trace(&'a str),
    Fen(&'a str),
    Empty,
}

pub fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        Command::Empty
    } else if line.eq_ignore_ascii_case("exit") {
        Command::Exit
    } else if let Some(path) = LOAD.captures(line).and_then(|c| c.get(1)) {
        Command::Trace(path.as_str().trim())
    } else {
        Command::Fen(line)
    }
}

/// Runs until `exit` or end of input. Query failures are logged, never fatal.
pub fn run<R: BufRead, W: Write>(engine: &QueryEngine, input: R, out: &mut W) -> Result<()> {
    let total = engine.indexed_games() as u64;
    let mut lines = input.lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let Some(line) = lines.next() else {
            writeln!(out)?;
            break;
        };
        match parse_command(&line?) {
            Command::Exit => break,
            Command::Empty => {}
            Command::Trace(path) => match engine.trace_file(Path::new(path)) {
                Ok(games) => print_trace(out, &games, total)?,
                Err(e) => tracing::error!("{e:#}"),
            },
            Command::Fen(fen) => {
                let n = engine.query_fen(fen) as u64;
                writeln!(out, "found in {} / {} games", grouped(n), grouped(total))?;
            }
        }
    }
    Ok(())
}

fn print_trace<W: Write>(out: &mut W, games: &[TracedGame], total: u64) -> Result<()> {
    for game in games {
        writeln!(out, "{}", game.description)?;
        for step in &game.steps {
            writeln!(
                out,
                "      . {} - {} / {}",
                grouped(step.fullmove as u64),
                grouped(step.count as u64),
                grouped(total)
            )?;
        }
    }
    Ok(())
}
