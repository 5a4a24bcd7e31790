//! Command-line model.

use std::path::PathBuf;

use clap::Parser;

use crate::error::CliError;

/// Default output file, relative to the working directory.
pub const DEFAULT_OUTPUT: &str = r".\rec.wav";

/// Default engine module, next to this tool.
pub const DEFAULT_LIB: &str = r"<exepath>\dircap_engine.dll";

#[derive(Parser, Debug)]
#[command(name = "dircap")]
#[command(about = "Records DirectSound output from another application (x64)")]
#[command(version)]
pub struct Args {
    /// Process ID of target application
    #[arg(short, long)]
    pub pid: Option<u32>,

    /// Window title of target application. Overrides --pid
    #[arg(short, long)]
    pub window: Option<String>,

    /// Output wave file
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Time in milliseconds to wait after each write to a sound buffer
    #[arg(short, long, default_value_t = 0)]
    pub delay: u32,

    /// Inject the engine into the application and quit immediately
    #[arg(short = 'q', long, conflicts_with = "unload_only")]
    pub load_only: bool,

    /// Unload the engine from the application and quit immediately
    #[arg(short, long)]
    pub unload_only: bool,

    /// Path to the engine module; "<exepath>" is replaced by this tool's directory
    #[arg(short, long, default_value = DEFAULT_LIB)]
    pub lib: String,

    /// Working set size of the target process in MiB
    #[arg(short, long, value_name = "MIN,MAX", value_parser = parse_mem_range)]
    pub mem: Option<MemRange>,

    /// Quit after setting the working set size
    #[arg(short = 'y', long, requires = "mem")]
    pub mem_only: bool,
}

/// How the target is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Pid(u32),
    Window(String),
}

/// Which blobs run, and whether the tool waits in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Install, wait for Enter, uninstall.
    Capture,
    LoadOnly,
    UnloadOnly,
}

impl Mode {
    pub fn installs(self) -> bool {
        self != Mode::UnloadOnly
    }

    pub fn uninstalls(self) -> bool {
        self != Mode::LoadOnly
    }

    pub fn pauses(self) -> bool {
        self == Mode::Capture
    }
}

/// Working-set bounds in MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRange {
    pub min_mib: usize,
    pub max_mib: usize,
}

impl Args {
    pub fn target(&self) -> Result<Target, CliError> {
        match (&self.window, self.pid) {
            (Some(title), _) => Ok(Target::Window(title.clone())),
            (None, Some(pid)) => Ok(Target::Pid(pid)),
            (None, None) => Err(CliError::MissingTarget),
        }
    }

    pub fn mode(&self) -> Mode {
        if self.load_only {
            Mode::LoadOnly
        } else if self.unload_only {
            Mode::UnloadOnly
        } else {
            Mode::Capture
        }
    }
}

fn parse_mem_range(value: &str) -> Result<MemRange, String> {
    let (min, max) = value
        .split_once(',')
        .ok_or_else(|| "expected \"min,max\"".to_string())?;
    let parse = |part: &str| {
        part.trim()
            .parse::<usize>()
            .map_err(|e| format!("{:?} is not a size in MiB: {}", part, e))
    };
    let range = MemRange {
        min_mib: parse(min)?,
        max_mib: parse(max)?,
    };
    if range.min_mib > range.max_mib {
        return Err(format!("minimum {} exceeds maximum {}", range.min_mib, range.max_mib));
    }
    Ok(range)
}
