//! Position-fixed x64 blobs executed by a remote thread inside the target.
//!
//! A blob is its payload strings followed by code; the entry point is the
//! first code byte. Every address an instruction refers to is baked in as
//! `base + offset`, so a blob only works once copied unmodified to the base
//! it was emitted for.
//!
//! Both routines run as a thread start routine under the Windows x64
//! convention: arguments in `rcx`/`rdx`, `rsp` 16-byte aligned with 32 bytes
//! of shadow space at every call, result in `rax`. The thread's exit status
//! is `0` on success and the `GetLastError()` value otherwise.

use crate::models::config::{DELAY_VAR, OUTPUT_PATH_VAR};

/// Export the uninstall routine resolves and calls inside the engine module.
pub const TEARDOWN_EXPORT: &str = "dircap_unload";

/// Size of the single remote allocation a blob has to fit in.
pub const PAGE_SIZE: usize = 4096;

/// `ERROR_MOD_NOT_FOUND`, the exit status of a failed module lookup.
pub const ERROR_MOD_NOT_FOUND: u32 = 126;

const CODE_ALIGN: usize = 16;

/// Addresses of the kernel32 routines the blobs call.
///
/// kernel32 is mapped at the same base in every process of a session, so
/// addresses resolved in the injector are valid in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelRoutines {
    pub set_environment_variable_w: u64,
    pub load_library_w: u64,
    pub get_last_error: u64,
    pub get_module_handle_w: u64,
    pub get_proc_address: u64,
}

/// Strings the install routine hands to the target. Paths are UTF-16
/// without a terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPayload {
    pub module_path: Vec<u16>,
    pub output_path: Vec<u16>,
    pub delay_ms: u32,
}

/// Emitted bytes plus the offset execution starts at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellcodeBlob {
    bytes: Vec<u8>,
    entry_offset: usize,
}

impl ShellcodeBlob {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn entry_offset(&self) -> usize {
        self.entry_offset
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Thread start address once the blob sits at `base`.
    pub fn entry_point(&self, base: u64) -> u64 {
        base + self.entry_offset as u64
    }
}

/// UTF-16 code units of `text`, no terminator.
pub fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}

/// Sets the engine's two configuration values, then loads the engine
/// module. Returns `0` if the module loaded, `GetLastError()` if not.
pub fn emit_install(base: u64, routines: &KernelRoutines, payload: &InstallPayload) -> ShellcodeBlob {
    let mut data = DataSection::new(base);
    let module = data.wide(&payload.module_path);
    let output_name = data.wide(&wide(OUTPUT_PATH_VAR));
    let output_value = data.wide(&payload.output_path);
    let delay_name = data.wide(&wide(DELAY_VAR));
    let delay_value = data.wide(&wide(&payload.delay_ms.to_string()));

    let mut failed = Code::default();
    failed.call(routines.get_last_error).leave();

    let mut code = Code::default();
    code.enter()
        .mov_imm(Reg::Rcx, output_name)
        .mov_imm(Reg::Rdx, output_value)
        .call(routines.set_environment_variable_w)
        .mov_imm(Reg::Rcx, delay_name)
        .mov_imm(Reg::Rdx, delay_value)
        .call(routines.set_environment_variable_w)
        .mov_imm(Reg::Rcx, module)
        .call(routines.load_library_w)
        .skip_unless(Branch::RaxZero, &failed)
        .zero_eax()
        .leave();

    data.finish(code)
}

/// Looks up the engine module and calls its teardown export.
///
/// The export normally ends the thread itself. If the module or the export
/// is missing the routine returns `GetLastError()`.
pub fn emit_uninstall(base: u64, routines: &KernelRoutines, module_path: &[u16]) -> ShellcodeBlob {
    let mut data = DataSection::new(base);
    let module = data.wide(module_path);
    let export = data.ascii(TEARDOWN_EXPORT);

    let mut invoke = Code::default();
    invoke.call_rax();

    let mut resolve = Code::default();
    resolve
        .mov_rcx_rax()
        .mov_imm(Reg::Rdx, export)
        .call(routines.get_proc_address)
        .skip_unless(Branch::RaxNonZero, &invoke);

    let mut code = Code::default();
    code.enter()
        .mov_imm(Reg::Rcx, module)
        .call(routines.get_module_handle_w)
        .skip_unless(Branch::RaxNonZero, &resolve)
        .call(routines.get_last_error)
        .leave();

    data.finish(code)
}

#[derive(Debug, Clone, Copy)]
enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
}

#[derive(Debug, Clone, Copy)]
enum Branch {
    RaxZero,
    RaxNonZero,
}

/// Payload strings, addressed from `base`.
struct DataSection {
    base: u64,
    bytes: Vec<u8>,
}

impl DataSection {
    fn new(base: u64) -> Self {
        Self {
            base,
            bytes: Vec::new(),
        }
    }

    fn here(&self) -> u64 {
        self.base + self.bytes.len() as u64
    }

    /// NUL-terminated UTF-16 string; returns its address.
    fn wide(&mut self, text: &[u16]) -> u64 {
        // Wide strings must start on an even address.
        if self.bytes.len() % 2 != 0 {
            self.bytes.push(0);
        }
        let address = self.here();
        for unit in text.iter().copied().chain(std::iter::once(0)) {
            self.bytes.extend_from_slice(&unit.to_le_bytes());
        }
        address
    }

    /// NUL-terminated byte string; returns its address.
    fn ascii(&mut self, text: &str) -> u64 {
        let address = self.here();
        self.bytes.extend_from_slice(text.as_bytes());
        self.bytes.push(0);
        address
    }

    fn finish(mut self, code: Code) -> ShellcodeBlob {
        let entry_offset = self.bytes.len().next_multiple_of(CODE_ALIGN);
        self.bytes.resize(entry_offset, 0xCC);
        self.bytes.extend_from_slice(&code.0);
        ShellcodeBlob {
            bytes: self.bytes,
            entry_offset,
        }
    }
}

/// Straight-line code. Nothing in it depends on where it is placed: data is
/// reached through absolute immediates and branches are relative.
#[derive(Default)]
struct Code(Vec<u8>);

impl Code {
    fn emit(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.extend_from_slice(bytes);
        self
    }

    /// push rbx; mov rbx, rsp; and rsp, -16; sub rsp, 32
    fn enter(&mut self) -> &mut Self {
        self.emit(&[0x53, 0x48, 0x89, 0xE3, 0x48, 0x83, 0xE4, 0xF0, 0x48, 0x83, 0xEC, 0x20])
    }

    /// mov rsp, rbx; pop rbx; ret
    fn leave(&mut self) -> &mut Self {
        self.emit(&[0x48, 0x89, 0xDC, 0x5B, 0xC3])
    }

    /// mov r64, imm64
    fn mov_imm(&mut self, reg: Reg, value: u64) -> &mut Self {
        self.emit(&[0x48, 0xB8 + reg as u8]).emit(&value.to_le_bytes())
    }

    /// mov rcx, rax
    fn mov_rcx_rax(&mut self) -> &mut Self {
        self.emit(&[0x48, 0x89, 0xC1])
    }

    /// xor eax, eax
    fn zero_eax(&mut self) -> &mut Self {
        self.emit(&[0x31, 0xC0])
    }

    /// call rax
    fn call_rax(&mut self) -> &mut Self {
        self.emit(&[0xFF, 0xD0])
    }

    fn call(&mut self, routine: u64) -> &mut Self {
        self.mov_imm(Reg::Rax, routine).call_rax()
    }

    /// Run `body` only when `rax` satisfies `condition`; otherwise jump
    /// straight past it.
    fn skip_unless(&mut self, condition: Branch, body: &Code) -> &mut Self {
        let opcode = match condition {
            // Skip on the opposite flag state.
            Branch::RaxZero => 0x75,
            Branch::RaxNonZero => 0x74,
        };
        debug_assert!(body.0.len() <= i8::MAX as usize, "branch body exceeds rel8 range");
        self.emit(&[0x48, 0x85, 0xC0, opcode, body.0.len() as u8]).emit(&body.0)
    }
}
