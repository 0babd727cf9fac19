//! `synthcorona` CLI: parses one `.sc` file and writes a `.wav` file next to
//! it. Missing-path interactive prompting and the instrument visualizer are
//! external collaborators out of scope here (spec §1, §4.11).

use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let Some(path_arg) = args.next() else {
        eprintln!("usage: synthcorona <path.sc>");
        return ExitCode::FAILURE;
    };

    let sc_path = PathBuf::from(path_arg);
    let out_path = sc_path.with_extension("wav");

    match synthcorona_core::render_file(&sc_path, &out_path) {
        Ok(()) => {
            println!("Wrote {}", out_path.display());
            ExitCode::SUCCESS
        }
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}
