use std::{
    fmt,
    io::{self, BufRead, Write as _},
};

use parking_lot::Mutex;

/// Trait for the interpreter's console.
///
/// Implement this to capture or redirect output from sandboxed programs. The
/// console is shared between a parent interpreter and its async children, so
/// implementations must be `Send + Sync` and internally synchronized.
pub trait Console: Send + Sync + fmt::Debug {
    /// Writes text to standard output. No newline is appended.
    fn write_out(&self, text: &str);

    /// Writes text to standard error. No newline is appended.
    fn write_err(&self, text: &str);

    /// Reads one line from standard input, without the trailing newline.
    ///
    /// Returns `None` at end of input.
    fn read_line(&self) -> Option<String>;
}

/// Default console bound to the process's stdio.
#[derive(Debug, Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn write_out(&self, text: &str) {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        let _ = lock.write_all(text.as_bytes());
        let _ = lock.flush();
    }

    fn write_err(&self, text: &str) {
        let stderr = io::stderr();
        let mut lock = stderr.lock();
        let _ = lock.write_all(text.as_bytes());
        let _ = lock.flush();
    }

    fn read_line(&self) -> Option<String> {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                if line.ends_with('\n') {
                    line.pop();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                }
                Some(line)
            }
        }
    }
}

/// Console that collects output into strings and serves scripted input.
///
/// Useful for tests and programmatic embedding.
#[derive(Debug, Default)]
pub struct CaptureConsole {
    out: Mutex<String>,
    err: Mutex<String>,
    /// Lines returned by `read_line`, served front to back.
    input: Mutex<Vec<String>>,
}

impl CaptureConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a console with pre-loaded input lines.
    pub fn with_input(lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            input: Mutex::new(lines.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Returns everything written to stdout so far.
    pub fn output(&self) -> String {
        self.out.lock().clone()
    }

    /// Returns everything written to stderr so far.
    pub fn error_output(&self) -> String {
        self.err.lock().clone()
    }
}

impl Console for CaptureConsole {
    fn write_out(&self, text: &str) {
        self.out.lock().push_str(text);
    }

    fn write_err(&self, text: &str) {
        self.err.lock().push_str(text);
    }

    fn read_line(&self) -> Option<String> {
        let mut input = self.input.lock();
        if input.is_empty() { None } else { Some(input.remove(0)) }
    }
}

/// Console that discards all output and serves no input.
#[derive(Debug, Default)]
pub struct NullConsole;

impl Console for NullConsole {
    fn write_out(&self, _text: &str) {}

    fn write_err(&self, _text: &str) {}

    fn read_line(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_console_roundtrip() {
        let console = CaptureConsole::with_input(["first", "second"]);
        console.write_out("a");
        console.write_out("b");
        console.write_err("oops");
        assert_eq!(console.output(), "ab");
        assert_eq!(console.error_output(), "oops");
        assert_eq!(console.read_line().as_deref(), Some("first"));
        assert_eq!(console.read_line().as_deref(), Some("second"));
        assert_eq!(console.read_line(), None);
    }
}
