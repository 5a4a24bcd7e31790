//! The install / pause / uninstall sequence against a live target.

use std::io::BufRead;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;

use dircap_core::inject::shellcode::InstallPayload;
use dircap_windows::{InjectError, RemoteInjector, TargetProcess};

use crate::cli::{Args, Target};
use crate::error::{uninstall_outcome, CliError};
use crate::paths::{absolute_module, absolute_output, exe_dir, expand_exepath};

pub fn run(args: &Args) -> Result<(), CliError> {
    let pid = match args.target()? {
        Target::Pid(pid) => pid,
        Target::Window(title) => TargetProcess::find_window(&title)?,
    };
    let mode = args.mode();

    let output = if mode.installs() {
        Some(absolute_output(&args.output)?)
    } else {
        None
    };
    let module = absolute_module(&expand_exepath(&args.lib, &exe_dir()?))?;
    let module_w = wide_path(&module);

    let process = TargetProcess::open(pid)?;
    if !process.matches_pointer_width()? {
        return Err(InjectError::PointerWidth { pid }.into());
    }

    if let Some(range) = args.mem {
        if let Err(e) = process.set_working_set(range.min_mib, range.max_mib) {
            log::error!("Error changing working set size: {}", e);
        }
        if args.mem_only {
            return Ok(());
        }
    }

    let injector = RemoteInjector::new(&process)?;

    if let Some(output) = output {
        log::info!("Injecting {} into process {}, recording to {}", module.display(), pid, output.display());
        injector.install(&InstallPayload {
            module_path: module_w.clone(),
            output_path: wide_path(&output),
            delay_ms: args.delay,
        })?;
    }

    if mode.pauses() {
        log::info!("Waiting for keypress to release capture...");
        let mut line = String::new();
        if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
            log::warn!("Reading stdin failed ({}), releasing capture now", e);
        }
    }

    if mode.uninstalls() {
        log::info!("Unloading {} from process {}", module.display(), pid);
        uninstall_outcome(injector.uninstall(&module_w))?;
    }
    Ok(())
}

fn wide_path(path: &Path) -> Vec<u16> {
    path.as_os_str().encode_wide().collect()
}
