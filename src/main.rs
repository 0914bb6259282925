use std::process::ExitCode;

mod app;
mod logging;

fn main() -> ExitCode {
    let args = dropback::cli::parse();
    app::run(args)
}
