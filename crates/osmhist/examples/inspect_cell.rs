//! Prints the entities and versions stored in a cell file.
//!
//! Usage: `cargo run --example inspect_cell -- <cell-file>`

use std::fs;
use std::process::ExitCode;

use osmhist::{EntityHistory, NoLookup, cell_bytes, decode_cell, format_timestamp};

fn print_history(history: &EntityHistory) {
    let bbox = match history.bbox() {
        Some(b) => format!(
            "[{:.7}, {:.7}, {:.7}, {:.7}]",
            b.min_lon as f64 * 1e-7,
            b.min_lat as f64 * 1e-7,
            b.max_lon as f64 * 1e-7,
            b.max_lat as f64 * 1e-7
        ),
        None => "-".to_string(),
    };
    println!("{} {}  bbox {}", history.kind().name(), history.id(), bbox);

    let detail = |version: u32| -> String {
        match history {
            EntityHistory::Node(h) => h
                .versions()
                .iter()
                .find(|n| n.meta.version == version)
                .and_then(|n| n.location)
                .map(|l| format!("at ({:.7}, {:.7})", l.lon_degrees(), l.lat_degrees()))
                .unwrap_or_default(),
            EntityHistory::Way(h) => h
                .versions()
                .iter()
                .find(|w| w.meta.version == version)
                .map(|w| format!("{} nodes", w.refs.len()))
                .unwrap_or_default(),
            EntityHistory::Relation(h) => h
                .versions()
                .iter()
                .find(|r| r.meta.version == version)
                .map(|r| format!("{} members", r.members.len()))
                .unwrap_or_default(),
        }
    };

    for meta in history.metas() {
        let tags: Vec<String> = meta.tags.iter().map(|t| format!("{}={}", t.key, t.value)).collect();
        println!(
            "  v{:<3} {}  changeset {:<8} user {:<8} {}{}  [{}]",
            meta.version,
            format_timestamp(meta.timestamp),
            meta.changeset,
            meta.user_id,
            if meta.visible { "" } else { "deleted " },
            detail(meta.version),
            tags.join(", ")
        );
    }
}

fn main() -> ExitCode {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: inspect_cell <cell-file>");
        return ExitCode::FAILURE;
    };

    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("{}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };
    let data = match cell_bytes(&raw) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("{}: [{}] {}", path, e.code().code(), e);
            return ExitCode::FAILURE;
        }
    };
    let cell = match decode_cell(&data) {
        Ok(cell) => cell,
        Err(e) => {
            eprintln!("{}: [{}] {}", path, e.code().code(), e);
            return ExitCode::FAILURE;
        }
    };

    println!(
        "{} cell {}/{} with {} records ({} bytes, {} uncompressed)",
        cell.kind.name(),
        cell.id.zoom,
        cell.id.id,
        cell.len(),
        raw.len(),
        data.len()
    );
    println!(
        "base: id {}  timestamp {}  location ({}, {})",
        cell.base.id,
        format_timestamp(cell.base.timestamp),
        cell.base.lon,
        cell.base.lat
    );

    let mut corrupt = 0;
    for (index, record) in cell.records().enumerate() {
        match record.and_then(|r| r.to_history(&NoLookup)) {
            Ok(history) => print_history(&history),
            Err(e) => {
                corrupt += 1;
                println!("record {}: [{}] {}", index, e.code().code(), e);
            }
        }
    }
    if corrupt > 0 {
        eprintln!("{} corrupt records", corrupt);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
