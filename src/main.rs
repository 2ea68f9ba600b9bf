use clap::Parser;
use owo_colors::OwoColorize;

use artpilot::cli::Cli;
use artpilot::commands;

fn main() {
    let cli = Cli::parse();
    let code = match commands::run(cli) {
        Ok(status) => status.code(),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red(), e);
            1
        }
    };
    std::process::exit(code);
}
