use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use dircap_inject::{Args, ExitStatus};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if std::env::args_os().len() <= 1 {
        let _ = Args::command().print_help();
        return ExitStatus::Success.into();
    }

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if !e.use_stderr() => {
            let _ = e.print();
            return ExitStatus::Success.into();
        }
        Err(e) => {
            let _ = e.print();
            return ExitStatus::BadArguments.into();
        }
    };

    match dircap_inject::run(&args) {
        Ok(()) => ExitStatus::Success.into(),
        Err(e) => {
            log::error!("{}", e);
            ExitStatus::from(&e).into()
        }
    }
}
