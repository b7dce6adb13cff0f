use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! structural_error {
    ($offset:expr, $msg:expr) => {
        crate::Error::Structural {
            offset: $offset,
            message: $msg.to_string(),
        }
    };

    ($offset:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::Structural {
            offset: $offset,
            message: format!($fmt, $($arg)*),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into the four categories of [`DiagnosticKind`]. Format and decode errors are
/// fatal for a whole file, structural errors only for the subroutine in which they occur.
/// The decompilation pipeline itself never propagates these to its caller; it converts
/// them into [`Diagnostic`] entries attached to a (possibly partial) result.
///
/// # Error Categories
///
/// ## Format Errors
/// - [`Error::InvalidHeader`] - The 8-byte `NCS V1.0` magic did not match
/// - [`Error::Truncated`] - The input is too short to hold a header
///
/// ## Decode Errors
/// - [`Error::Malformed`] - An operand could not be read or holds an impossible value
/// - [`Error::UnknownOpcode`] - An opcode byte outside the documented instruction set
/// - [`Error::OutOfBounds`] - A read would have run past the end of the input
///
/// ## Structural Errors
/// - [`Error::Structural`] - Unresolvable jump targets, stack mismatches, missing prototypes
///
/// ## API Errors
/// - [`Error::NameCollision`], [`Error::InvalidName`], [`Error::UnknownSubroutine`] - Renaming
/// - [`Error::ActionTable`] - The action manifest could not be parsed
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// # Examples
///
/// ```rust
/// use ncscope::{disassembler::decode_stream, Error};
///
/// match decode_stream(b"NCS") {
///     Err(Error::Truncated(len)) => assert_eq!(len, 3),
///     other => panic!("unexpected {:?}", other),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The 8-byte magic at the start of the stream is not `NCS V1.0`.
    #[error("Invalid NCS header - expected \"NCS V1.0\", found {0:?}")]
    InvalidHeader(Vec<u8>),

    /// The input holds fewer bytes than the fixed header.
    #[error("Input of {0} bytes is too short to hold an NCS header")]
    Truncated(usize),

    /// The file is damaged and could not be decoded.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while decoding.
    #[error("Out of Bound read would have occurred! - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An opcode byte which is not part of the instruction set.
    #[error("Unknown opcode 0x{opcode:02X} at offset 0x{offset:X}")]
    UnknownOpcode {
        /// The offending opcode byte
        opcode: u8,
        /// Byte offset of the instruction
        offset: usize,
    },

    /// The control flow or stack discipline of a subroutine could not be reconstructed.
    ///
    /// Only the affected subroutine is skipped; the remaining ones are still decompiled.
    #[error("Structural error at 0x{offset:X}: {message}")]
    Structural {
        /// Byte offset of the instruction that triggered the failure
        offset: usize,
        /// Description of the failure
        message: String,
    },

    /// A subroutine with the requested name already exists.
    #[error("A subroutine named '{0}' already exists")]
    NameCollision(String),

    /// The requested name is not a valid script identifier.
    #[error("'{0}' is not a valid identifier")]
    InvalidName(String),

    /// No subroutine carries the requested name.
    #[error("No subroutine named '{0}'")]
    UnknownSubroutine(String),

    /// The action manifest could not be parsed.
    #[error("Action manifest line {line}: {message}")]
    ActionTable {
        /// 1-based line number inside the manifest
        line: usize,
        /// Description of the failure
        message: String,
    },

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Classifies this error into the diagnostic taxonomy.
    #[must_use]
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Error::InvalidHeader(_) | Error::Truncated(_) | Error::FileError(_) => {
                DiagnosticKind::Format
            }
            Error::Malformed { .. } | Error::OutOfBounds { .. } | Error::UnknownOpcode { .. } => {
                DiagnosticKind::Decode
            }
            _ => DiagnosticKind::Structural,
        }
    }

    /// Byte offset associated with this error, if it carries one.
    #[must_use]
    pub fn offset(&self) -> Option<usize> {
        match self {
            Error::UnknownOpcode { offset, .. } | Error::Structural { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

/// The category a [`Diagnostic`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// Bad magic header or truncated stream, fatal for the file.
    Format,
    /// Unknown opcode or malformed operand, fatal for the file.
    Decode,
    /// Broken control flow or stack discipline, fatal for one subroutine.
    Structural,
    /// The prototype fixed point was not reached, output uses partial types.
    Convergence,
}

/// A non-fatal record of something that went wrong while decompiling.
///
/// Diagnostics accumulate next to the partial result so that a single broken subroutine
/// never prevents the rest of a file from being decompiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Category of the problem
    pub kind: DiagnosticKind,
    /// Byte offset of the instruction involved, if known
    pub offset: Option<usize>,
    /// Name of the affected subroutine, if any
    pub subroutine: Option<String>,
    /// Human readable description
    pub message: String,
}

impl Diagnostic {
    /// Creates a diagnostic from an [`Error`].
    #[must_use]
    pub fn from_error(error: &Error, subroutine: Option<&str>) -> Self {
        Diagnostic {
            kind: error.kind(),
            offset: error.offset(),
            subroutine: subroutine.map(str::to_string),
            message: error.to_string(),
        }
    }

    /// Creates a convergence warning.
    #[must_use]
    pub fn convergence(subroutine: Option<&str>, message: impl Into<String>) -> Self {
        Diagnostic {
            kind: DiagnosticKind::Convergence,
            offset: None,
            subroutine: subroutine.map(str::to_string),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}]", self.kind)?;
        if let Some(sub) = &self.subroutine {
            write!(f, " {sub}")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " @0x{offset:X}")?;
        }
        write!(f, ": {}", self.message)
    }
}
