use std::process::ExitCode;

fn main() -> ExitCode {
    tireline_cli::run()
}
