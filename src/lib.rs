//! Core library for SynthCorona: the SC chiptune DSL's module protocol,
//! parser, and offline WAV renderer.

pub mod command;
pub mod context;
pub mod error;
pub mod inst;
pub mod nodes;
pub mod parser;
pub mod renderer;
pub mod sequence;
pub mod signal;
pub mod song;

pub use error::{ScError, ScErrorKind};
pub use parser::SynthCorona;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parses a `.sc` file and renders it to `out_path` as a WAV file. Thin
/// wrapper tying `parser::SynthCorona::parse_file` to `renderer::render_to_file`
/// for callers (the `synthcorona` binary, tests) that don't need to inspect
/// the parsed tree in between.
pub fn render_file(sc_path: &std::path::Path, out_path: &std::path::Path) -> Result<(), String> {
    let mut sc = SynthCorona::parse_file(sc_path).map_err(|e| {
        std::fs::read_to_string(sc_path)
            .map(|text| e.report(&sc_path.display().to_string(), &text))
            .unwrap_or_else(|_| e.to_string())
    })?;
    renderer::render_to_file(&mut sc, out_path).map_err(|e| e.to_string())
}
