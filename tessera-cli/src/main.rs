//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

fn main() {
    env_logger::init();
    if let Err(err) = tessera_cli::run() {
        eprintln!("tessera: {err}");
        std::process::exit(1);
    }
}
