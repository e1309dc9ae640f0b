//! Fault containment around freshly loaded code
//!
//! Code that was compiled a moment ago is treated as untrusted. Every phase of
//! a swap that calls into it runs inside [`run_protected`], which turns a
//! panic into a [`Fault`] the registry can roll back from.
//!
//! Only unwinding panics are contained. Hardware faults (segfaults, illegal
//! instructions) still terminate the process.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

/// Protected phase of the swap protocol.
///
/// Dumping state runs the code that is already live and is not protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwapPhase {
    Construct,
    Load,
    Init,
    Commit,
    Rollback,
}

impl SwapPhase {
    pub fn name(&self) -> &'static str {
        match self {
            SwapPhase::Construct => "construct",
            SwapPhase::Load => "load",
            SwapPhase::Init => "init",
            SwapPhase::Commit => "commit",
            SwapPhase::Rollback => "rollback",
        }
    }

    /// Whether a fault in this phase is recovered by rolling back
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SwapPhase::Construct | SwapPhase::Load | SwapPhase::Init)
    }
}

impl fmt::Display for SwapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A contained fault
#[derive(Debug, Clone)]
pub struct Fault {
    pub phase: SwapPhase,
    /// Type whose code faulted, when known
    pub constructor: Option<String>,
    /// Source file the faulting type was built from
    pub file: Option<PathBuf>,
    pub message: String,
}

impl Fault {
    /// Extract the panic message from a caught payload
    pub fn from_panic(
        payload: Box<dyn Any + Send>,
        phase: SwapPhase,
        constructor: Option<&str>,
    ) -> Self {
        Self {
            phase,
            constructor: constructor.map(str::to_string),
            file: None,
            message: panic_message(payload.as_ref()),
        }
    }

    pub fn with_file(mut self, file: Option<PathBuf>) -> Self {
        self.file = file;
        self
    }
}

/// Message carried by a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault during {}", self.phase)?;
        if let Some(name) = &self.constructor {
            write!(f, " of '{}'", name)?;
        }
        if let Some(file) = &self.file {
            write!(f, " ({})", file.display())?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Run `f`, converting a panic into a [`Fault`]
pub fn run_protected<R>(
    phase: SwapPhase,
    constructor: Option<&str>,
    f: impl FnOnce() -> R,
) -> std::result::Result<R, Fault> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| Fault::from_panic(payload, phase, constructor))
}
