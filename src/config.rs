//! Kernel limits for the user-process boundary.

/// Longest accepted command line, in bytes. Anything longer could not be
/// laid out on the single initial stack page.
pub const MAX_CMDLINE: usize = 2000;

/// Argument count must stay strictly below this.
pub const MAX_ARGS: usize = 500;

/// Largest slice handed to the console in one call, so lines from
/// different processes do not interleave.
pub const CONSOLE_CHUNK: usize = 256;

/// Open files per process, standard streams excluded.
pub const MAX_OPEN_FILES: usize = 128;

/// Longest file name a system call will read from user memory.
pub const MAX_PATH: usize = 4096;

/// Longest process name (excluding terminator).
pub const NAME_MAX: usize = 15;

/// Limits applied by a [`Kernel`](crate::Kernel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub max_cmdline: usize,
    pub max_args: usize,
    pub console_chunk: usize,
    pub max_open_files: usize,
    pub max_path: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_cmdline: MAX_CMDLINE,
            max_args: MAX_ARGS,
            console_chunk: CONSOLE_CHUNK,
            max_open_files: MAX_OPEN_FILES,
            max_path: MAX_PATH,
        }
    }
}
