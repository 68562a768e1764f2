//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

fn main() {
    if let Err(err) = gazetteer_cli::run() {
        eprintln!("gazetteer: {err}");
        std::process::exit(1);
    }
}
