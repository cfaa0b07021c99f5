use std::process::ExitCode;

fn main() -> ExitCode {
    noticeboard_cli::run()
}
