//! Output and module path handling.

use std::path::{Path, PathBuf};

use crate::error::CliError;

/// Token in the module path replaced by the tool's own directory.
pub const EXEPATH_TOKEN: &str = "<exepath>";

/// Replace the first `<exepath>` in `raw` with `exe_dir`.
pub fn expand_exepath(raw: &str, exe_dir: &Path) -> PathBuf {
    match raw.split_once(EXEPATH_TOKEN) {
        Some((before, after)) => PathBuf::from(format!("{}{}{}", before, exe_dir.display(), after)),
        None => PathBuf::from(raw),
    }
}

/// Directory holding the running executable.
pub fn exe_dir() -> Result<PathBuf, CliError> {
    let exe = std::env::current_exe().map_err(|e| CliError::MalformedPath(format!("current executable: {}", e)))?;
    Ok(exe.parent().map(Path::to_path_buf).unwrap_or_default())
}

/// Absolute form of the output path, resolved against the working
/// directory. The engine runs with the target's working directory, so it
/// only ever sees absolute paths.
pub fn absolute_output(path: &Path) -> Result<PathBuf, CliError> {
    absolute(path, "output file")
}

/// Absolute form of the module path. The target's loader search order and
/// the uninstall lookup both need the exact file the tool resolved.
pub fn absolute_module(path: &Path) -> Result<PathBuf, CliError> {
    absolute(path, "DLL")
}

fn absolute(path: &Path, what: &str) -> Result<PathBuf, CliError> {
    if path.as_os_str().is_empty() {
        return Err(CliError::MalformedPath(format!("{} path is empty", what)));
    }
    std::path::absolute(path).map_err(|e| CliError::MalformedPath(format!("{} path {}: {}", what, path.display(), e)))
}
