//=============================================
// fiberhost/src/runtime/dylib.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Shared-library backed embedded runtime
// Objective: Resolve, open and call the player library's main entry
//=============================================

use std::ffi::{CString, c_char, c_int, c_void};
use std::fmt;
use std::path::{Path, PathBuf};

use libloading::Library;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{EmbeddedRuntime, RuntimeLoader};
use crate::config::RuntimeConfig;
use crate::error::LoadError;
use crate::scheduler::Yielder;

type ArgvMain = unsafe extern "C" fn(c_int, *const *const c_char) -> c_int;
type WinMain = unsafe extern "C" fn(*mut c_void, *const u16, *mut u16, c_int) -> c_int;

/// `SW_SHOW`, what the player's Windows entry expects from its launcher.
const SW_SHOW: c_int = 5;

/// Calling convention of the runtime's main entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryAbi {
    /// `int main(int argc, const char **argv)`
    Argv,
    /// `int main(HINSTANCE, const wchar_t *data_folder, wchar_t *cmdline, int show)`
    WinMain,
}

impl EntryAbi {
    pub fn native() -> Self {
        if cfg!(windows) {
            EntryAbi::WinMain
        } else {
            EntryAbi::Argv
        }
    }
}

impl Default for EntryAbi {
    fn default() -> Self {
        Self::native()
    }
}

/// Path of the binary image containing this module, the loaded addon when
/// running under a host, otherwise the executable.
#[cfg(unix)]
pub fn module_path() -> Option<PathBuf> {
    use std::ffi::CStr;
    use std::os::unix::ffi::OsStrExt;

    let anchor = module_path as fn() -> Option<PathBuf> as *const c_void;
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    if unsafe { libc::dladdr(anchor, &mut info) } == 0 || info.dli_fname.is_null() {
        return std::env::current_exe().ok();
    }
    let name = unsafe { CStr::from_ptr(info.dli_fname) };
    let path = PathBuf::from(std::ffi::OsStr::from_bytes(name.to_bytes()));
    Some(path.canonicalize().unwrap_or(path))
}

#[cfg(not(unix))]
pub fn module_path() -> Option<PathBuf> {
    std::env::current_exe().ok()
}

/// Directory of [`module_path`].
pub fn module_dir() -> Option<PathBuf> {
    module_path().and_then(|path| path.parent().map(Path::to_path_buf))
}

/// Loads the embedded runtime from a shared library.
#[derive(Debug, Clone)]
pub struct DylibLoader {
    library: PathBuf,
    symbol: String,
    abi: EntryAbi,
    image: PathBuf,
    args: Vec<String>,
    data_folder: PathBuf,
}

impl DylibLoader {
    pub fn new(library: impl Into<PathBuf>, symbol: impl Into<String>, abi: EntryAbi) -> Self {
        let library = library.into();
        let base = library.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            image: module_path().unwrap_or_else(|| library.clone()),
            library,
            symbol: symbol.into(),
            abi,
            args: Vec::new(),
            data_folder: base,
        }
    }

    /// Builds a loader from config; relative paths resolve against
    /// `module_dir`.
    pub fn from_config(config: &RuntimeConfig, module_dir: &Path) -> Self {
        let library = module_dir.join(&config.library);
        let data_folder = config
            .data_folder
            .as_ref()
            .map(|folder| module_dir.join(folder))
            .unwrap_or_else(|| module_dir.to_path_buf());
        Self::new(library, config.entry_symbol.clone(), config.abi)
            .with_args(config.args.clone())
            .with_data_folder(data_folder)
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_data_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.data_folder = folder.into();
        self
    }

    pub fn library(&self) -> &Path {
        &self.library
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Arguments as the entry will see them, image path first.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.image.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect()
    }

    fn entry(&self, library: &Library) -> Result<Entry, LoadError> {
        let missing = |err: libloading::Error| LoadError::MissingSymbol {
            path: self.library.clone(),
            symbol: self.symbol.clone(),
            reason: err.to_string(),
        };
        let entry = unsafe {
            match self.abi {
                EntryAbi::Argv => Entry::Argv(*library.get::<ArgvMain>(self.symbol.as_bytes()).map_err(missing)?),
                EntryAbi::WinMain => Entry::WinMain(*library.get::<WinMain>(self.symbol.as_bytes()).map_err(missing)?),
            }
        };
        Ok(entry)
    }
}

impl RuntimeLoader for DylibLoader {
    fn describe(&self) -> String {
        format!("{}!{} ({:?})", self.library.display(), self.symbol, self.abi)
    }

    fn load(&self) -> Result<Box<dyn EmbeddedRuntime>, LoadError> {
        let library = unsafe { Library::new(&self.library) }.map_err(|err| LoadError::OpenLibrary {
            path: self.library.clone(),
            reason: err.to_string(),
        })?;
        let entry = self.entry(&library)?;

        let argv = self
            .argv()
            .into_iter()
            .map(|arg| CString::new(arg.clone()).map_err(|_| LoadError::InvalidArgument(arg)))
            .collect::<Result<Vec<_>, _>>()?;
        let data_folder = wide(&self.data_folder.to_string_lossy());
        let command_line = wide(&self.args.join(" "));

        info!(library = %self.library.display(), symbol = %self.symbol, "embedded runtime loaded");
        Ok(Box::new(DylibRuntime {
            entry,
            argv,
            data_folder,
            command_line,
            library: Some(library),
        }))
    }
}

#[derive(Clone, Copy)]
enum Entry {
    Argv(ArgvMain),
    WinMain(WinMain),
}

struct DylibRuntime {
    entry: Entry,
    argv: Vec<CString>,
    data_folder: Vec<u16>,
    command_line: Vec<u16>,
    library: Option<Library>,
}

impl EmbeddedRuntime for DylibRuntime {
    fn run(mut self: Box<Self>, _yielder: &Yielder<'_>) -> i32 {
        // The library yields through `fiberhost_yield` on its own.
        let code = match self.entry {
            Entry::Argv(main) => {
                let pointers: Vec<*const c_char> = self.argv.iter().map(|arg| arg.as_ptr()).collect();
                unsafe { main(pointers.len() as c_int, pointers.as_ptr()) }
            }
            Entry::WinMain(main) => unsafe {
                main(
                    instance_handle(),
                    self.data_folder.as_ptr(),
                    self.command_line.as_mut_ptr(),
                    SW_SHOW,
                )
            },
        };
        if let Some(library) = self.library.take() {
            debug!("closing embedded runtime library");
            drop(library);
        }
        code
    }
}

impl fmt::Debug for DylibRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DylibRuntime")
            .field("argv", &self.argv)
            .field("open", &self.library.is_some())
            .finish()
    }
}

/// NUL-terminated UTF-16.
fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

#[cfg(windows)]
fn instance_handle() -> *mut c_void {
    unsafe extern "system" {
        fn GetModuleHandleW(name: *const u16) -> *mut c_void;
    }
    unsafe { GetModuleHandleW(std::ptr::null()) }
}

#[cfg(not(windows))]
fn instance_handle() -> *mut c_void {
    std::ptr::null_mut()
}
