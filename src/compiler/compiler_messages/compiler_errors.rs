//! Unified error handling for the Opal compiler.
//!
//! Checking keeps going after a failed member so one run reports as much
//! as possible; everything lands in a [`CompilerMessages`] at the end.
//! Internal invariant violations are not errors, they are bugs: those use
//! `unreachable!`/`debug_assert!` and abort.

use crate::compiler::compiler_messages::compiler_warnings::CompilerWarning;
use crate::compiler::tokenizer::tokens::CharPosition;
use std::path::PathBuf;

/// The final set of errors and warnings emitted from one compilation.
#[derive(Debug, Default)]
pub struct CompilerMessages {
    pub errors: Vec<CompileError>,
    pub warnings: Vec<CompilerWarning>,
}

impl CompilerMessages {
    pub fn new() -> Self {
        CompilerMessages {
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// 1-based source lines that carry at least one error, per file.
    /// Error-test mode diffs these against `// error` markers.
    pub fn error_lines(&self, file: &std::path::Path) -> Vec<i32> {
        let mut lines: Vec<i32> = self
            .errors
            .iter()
            .filter(|e| e.location.file == file)
            .map(|e| e.location.start_pos.line_number)
            .collect();
        lines.sort_unstable();
        lines.dedup();
        lines
    }
}

impl From<CompileError> for CompilerMessages {
    fn from(error: CompileError) -> Self {
        CompilerMessages {
            errors: vec![error],
            warnings: Vec::new(),
        }
    }
}

/// Fully owned location so errors can cross phase boundaries without
/// dragging the string table along.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorLocation {
    pub file: PathBuf,
    pub start_pos: CharPosition,
    pub end_pos: CharPosition,
}

impl ErrorLocation {
    pub fn new(file: PathBuf, start: CharPosition, end: CharPosition) -> ErrorLocation {
        ErrorLocation {
            file,
            start_pos: start,
            end_pos: end,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileError {
    pub msg: String,
    pub location: ErrorLocation,
    pub error_type: ErrorType,
}

#[derive(PartialEq, Debug, Clone)]
pub enum ErrorType {
    Syntax,
    Type,
    Rule,
    File,
    Config,
    Compiler,
    Eval,
}

impl CompileError {
    pub fn new(msg: impl Into<String>, location: ErrorLocation, error_type: ErrorType) -> Self {
        CompileError {
            msg: msg.into(),
            location,
            error_type,
        }
    }

    pub fn with_file_path(mut self, file_path: PathBuf) -> Self {
        self.location.file = file_path;
        self
    }

    /// Internal bug, not the user's fault.
    pub fn compiler_error(msg: impl Into<String>) -> Self {
        CompileError {
            msg: msg.into(),
            location: ErrorLocation::default(),
            error_type: ErrorType::Compiler,
        }
    }

    pub fn file_error(path: &std::path::Path, msg: impl Into<String>) -> Self {
        CompileError {
            msg: msg.into(),
            location: ErrorLocation::new(
                path.to_path_buf(),
                CharPosition::default(),
                CharPosition::default(),
            ),
            error_type: ErrorType::File,
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        CompileError {
            msg: msg.into(),
            location: ErrorLocation::default(),
            error_type: ErrorType::Config,
        }
    }

    /// Fatal evaluator failure (cast, null deref, bounds, uninitialized,
    /// unsupported construct). There is no recovery from these.
    pub fn eval_error(msg: impl Into<String>, location: ErrorLocation) -> Self {
        CompileError {
            msg: msg.into(),
            location,
            error_type: ErrorType::Eval,
        }
    }
}

/// Returns a new CompileError for malformed code.
///
/// Usage: `return_syntax_error!(location, "Expected '{{' after class name")`;
#[macro_export]
macro_rules! return_syntax_error {
    ($location:expr, $($msg:tt)*) => {
        return Err($crate::compiler::compiler_messages::compiler_errors::CompileError::new(
            format!($($msg)*),
            $location,
            $crate::compiler::compiler_messages::compiler_errors::ErrorType::Syntax,
        ))
    };
}

/// Returns a new CompileError for type system violations.
///
/// Usage: `return_type_error!(location, "can't convert {} to {}", found, expected)`;
#[macro_export]
macro_rules! return_type_error {
    ($location:expr, $($msg:tt)*) => {
        return Err($crate::compiler::compiler_messages::compiler_errors::CompileError::new(
            format!($($msg)*),
            $location,
            $crate::compiler::compiler_messages::compiler_errors::ErrorType::Type,
        ))
    };
}

/// Returns a new CompileError for semantic rule violations:
/// undefined names, bad member access, flow analysis rejections.
#[macro_export]
macro_rules! return_rule_error {
    ($location:expr, $($msg:tt)*) => {
        return Err($crate::compiler::compiler_messages::compiler_errors::CompileError::new(
            format!($($msg)*),
            $location,
            $crate::compiler::compiler_messages::compiler_errors::ErrorType::Rule,
        ))
    };
}

/// Returns a new CompileError for internal bugs that were caught gracefully.
#[macro_export]
macro_rules! return_compiler_error {
    ($($msg:tt)*) => {
        return Err($crate::compiler::compiler_messages::compiler_errors::CompileError::compiler_error(
            format!($($msg)*),
        ))
    };
}
