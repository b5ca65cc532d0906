use std::fs;
use std::io::Cursor;

use pgnindex_core::chess::{position_hash, PgnGames};
use pgnindex_core::repl;
use pgnindex_core::{InvertedIndex, QueryEngine};
use shakmaty::Position;
use tempfile::tempdir;

fn engine() -> QueryEngine {
    let mut index = InvertedIndex::new();
    for (i, pgn) in ["1. e4 e5 *\n", "1. e4 c5 *\n"].iter().enumerate() {
        let game = PgnGames::new(pgn.as_bytes()).next().unwrap().unwrap();
        let mut board = game.start.clone();
        let mut positions = Vec::new();
        for m in &game.moves {
            board.play_unchecked(m);
            positions.push(position_hash(&board));
        }
        index.push_game(format!("[{}]t.pgn", i + 1), &positions);
    }
    QueryEngine::new(index)
}

fn run(input: &str) -> String {
    let mut out = Vec::new();
    repl::run(&engine(), Cursor::new(input.to_string()), &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn answers_fen_queries_until_exit() {
    let out = run(
        "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1\n\
         this is not a fen\n\
         \n\
         exit\n\
         rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1\n",
    );
    assert_eq!(out.matches("found in 2 / 2 games").count(), 1);
    assert_eq!(out.matches("found in 0 / 2 games").count(), 1);
    assert_eq!(out.matches("> ").count(), 4);
}

#[test]
fn load_traces_a_game() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("line.pgn");
    fs::write(&path, "[White \"W\"]\n[Black \"B\"]\n\n1. e4 e5 *\n").unwrap();

    let out = run(&format!("Load {}\nexit\n", path.display()));
    assert!(out.contains("game 1 : "));
    assert!(out.contains("      . 1 - 2 / 2\n"));
    assert!(out.contains("      . 2 - 1 / 2\n"));
}

#[test]
fn failed_load_keeps_the_loop_alive() {
    let out = run("load /no/such/file.pgn\n8/8/8/8/8/8/8/K1k5 w - - 0 1\n");
    assert!(out.contains("found in 0 / 2 games"));
}

#[test]
fn end_of_input_ends_the_loop() {
    let out = run("");
    assert_eq!(out, "> \n");
}
