//! Exit status encoding, in the layout `waitpid` reports.

/// Hangup
pub const SIGHUP: i32 = 1;
/// Kill, cannot be caught
pub const SIGKILL: i32 = 9;
/// Invalid memory reference
pub const SIGSEGV: i32 = 11;

/// How a process ended
///
/// Normal exits keep the low 8 bits of the code in bits 8..16 and zero in
/// the low 7 bits; a terminating signal occupies the low 7 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitStatus(i32);

impl ExitStatus {
    /// Normal exit with `code`
    pub const fn exited(code: i32) -> Self {
        Self((code & 0xff) << 8)
    }

    /// Terminated by `signal`
    pub const fn killed(signal: i32) -> Self {
        Self(signal & 0x7f)
    }

    /// Decode a raw status word
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw status word
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Whether the process called exit
    pub const fn is_exited(self) -> bool {
        self.0 & 0x7f == 0
    }

    /// Exit code, for normal exits
    pub fn exit_code(self) -> Option<i32> {
        self.is_exited().then_some((self.0 >> 8) & 0xff)
    }

    /// Terminating signal, for abnormal exits
    pub fn term_signal(self) -> Option<i32> {
        (!self.is_exited()).then_some(self.0 & 0x7f)
    }
}
