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

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all possible error conditions that can occur while loading a PE file,
/// classifying it, and decoding the ReadyToRun container embedded in it. Each variant provides
/// specific context about the failure mode to enable appropriate error handling.
///
/// # Error Categories
///
/// ## Image Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid image structure (bad header, unknown machine,
///   out-of-range indices)
/// - [`Error::OutOfBounds`] - Attempted to read beyond image boundaries
/// - [`Error::NotSupported`] - The input is not a ReadyToRun image
/// - [`Error::NotImplemented`] - A format feature this reader does not decode yet
/// - [`Error::Empty`] - Empty input provided
///
/// ## Resolution Errors
/// - [`Error::MissingReferenceAssembly`] - The assembly resolver could not locate a demanded
///   reference assembly
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - PE parsing errors from the goblin crate
///
/// # Examples
///
/// ```rust,no_run
/// use r2rscope::{Error, ReadyToRunReader};
/// use std::path::Path;
///
/// match ReadyToRunReader::from_file(Path::new("app.r2r.dll")) {
///     Ok(reader) => {
///         println!("{} methods", reader.methods().len());
///     }
///     Err(Error::NotSupported) => {
///         eprintln!("Not a ReadyToRun image");
///     }
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed image: {} ({}:{})", message, file, line);
///     }
///     Err(e) => {
///         eprintln!("Other error: {}", e);
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The image is damaged and could not be parsed.
    ///
    /// This error indicates that the image structure is corrupted or doesn't conform to the
    /// ReadyToRun format. The error includes the source location where the malformation was
    /// detected for debugging purposes.
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

    /// An out of bound access was attempted while parsing the image.
    ///
    /// This error occurs when trying to read data beyond the end of the image buffer. It's a
    /// safety check to prevent buffer overruns during parsing.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file is not a ReadyToRun image.
    ///
    /// Indicates that the input is a valid PE file but carries no ReadyToRun container - the
    /// COR header lacks the `IL_LIBRARY` flag and no `RTR_HEADER` export is present.
    #[error("This file type is not supported")]
    NotSupported,

    /// A format feature this reader does not decode.
    ///
    /// Raised for encodings that are valid ReadyToRun but outside the scope of this reader,
    /// such as slot-encoded instance method entries. The associated value names the feature.
    #[error("Not implemented - {0}")]
    NotImplemented(&'static str),

    /// The assembly resolver could not locate a demanded reference assembly.
    ///
    /// Cross-assembly lookups (module overrides in instance method signatures, the
    /// `System.Private.CoreLib` fallback of composite images) delegate to the configured
    /// [`crate::metadata::resolver::AssemblyResolver`]. When the resolver returns no match for
    /// a demanded reference, the current decode cannot proceed.
    #[error("Missing reference assembly - {0}")]
    MissingReferenceAssembly(String),

    /// Provided input was empty.
    ///
    /// This error occurs when an empty file or buffer is provided where actual image data was
    /// expected.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur during file operations such as reading from
    /// disk, permission issues, or filesystem errors.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    ///
    /// Used for errors that don't fit into other categories or for wrapping external library
    /// errors with additional context.
    #[error("{0}")]
    Error(String),

    /// Error from the goblin crate during PE parsing.
    ///
    /// The goblin crate is used for low-level PE format parsing. This error wraps any failures
    /// from that parsing layer.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),
}
