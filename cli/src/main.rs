use clap::Parser;

mod cli;
mod commands;
mod error;
mod utils;

use cli::Cli;

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(err) = cli.execute() {
        eprintln!("{}", err.into_human_message("mmdb"));
        std::process::exit(1);
    }
}
