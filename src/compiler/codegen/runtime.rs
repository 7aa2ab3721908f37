use crate::compiler::compiler_messages::compiler_errors::CompileError;
use crate::settings::RUNTIME_HEADER_NAME;
use std::fs;
use std::path::{Path, PathBuf};

/// The bundled runtime header travels inside the compiler binary and is
/// written next to the generated translation unit so the include
/// resolves without install steps.
pub const RUNTIME_HEADER: &str = include_str!("../../../runtime/opal_runtime.h");

pub fn write_runtime_header(out_dir: &Path) -> Result<PathBuf, CompileError> {
    let path = out_dir.join(RUNTIME_HEADER_NAME);
    fs::write(&path, RUNTIME_HEADER)
        .map_err(|e| CompileError::file_error(&path, e.to_string()))?;
    Ok(path)
}
