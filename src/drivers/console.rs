//! Console and keyboard devices
//!
//! The console and keyboard drivers live outside the process layer; this
//! module defines what it needs from them plus the line-printing macro.
//!
//! # Security Considerations
//! - User bytes are passed through untouched; no interpretation of control
//!   sequences happens here
//! - Large user writes are split so one process cannot hold the console

/// Console output device.
pub trait Console: Send + Sync {
    /// Write a buffer in one call, without interleaving other writers.
    fn putbuf(&self, bytes: &[u8]);
}

/// Keyboard input device.
pub trait Keyboard: Send + Sync {
    /// Block until a key is available and return it.
    fn getc(&self) -> u8;
}

/// Machine power control.
pub trait Power: Send + Sync {
    fn power_off(&self);
}

/// Write `bytes` to the console in slices of at most `chunk` bytes.
pub fn putbuf_chunked(console: &dyn Console, bytes: &[u8], chunk: usize) {
    for part in bytes.chunks(chunk.max(1)) {
        console.putbuf(part);
    }
}

/// Println to a console collaborator.
///
/// Formats the whole line first so it reaches the device in one call.
#[macro_export]
macro_rules! cprintln {
    ($console:expr, $($arg:tt)*) => {{
        let line = $crate::__alloc::format!("{}\n", format_args!($($arg)*));
        $crate::drivers::console::Console::putbuf($console, line.as_bytes());
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestConsole;

    #[test]
    fn test_chunked_write() {
        let console = TestConsole::new();
        putbuf_chunked(&*console, &[b'x'; 1000], 256);
        let calls = console.calls();
        assert_eq!(
            calls.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![256, 256, 256, 232]
        );
    }

    #[test]
    fn test_println_is_one_call() {
        let console = TestConsole::new();
        cprintln!(&*console, "{}: exit({})", "echo", 0);
        assert_eq!(console.calls().len(), 1);
        assert_eq!(console.output(), "echo: exit(0)\n");
    }
}
