use crate::compiler::compiler_messages::compiler_errors::CompileError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const OPAL_FILE_EXTENSION: &str = "opl";
pub const TARGET_FILE_EXTENSION: &str = "cpp";
pub const CONFIG_FILE_NAME: &str = "opal.toml";
pub const RUNTIME_HEADER_NAME: &str = "opal_runtime.h";

pub const ENTRY_METHOD_NAME: &str = "Main";
pub const ERROR_MARKER_COMMENT: &str = "error";

// Rough pre-allocation guesses so the token and node vecs don't thrash.
// Based on a handful of medium-sized test programs, not science.
pub const SRC_TO_TOKEN_RATIO: usize = 5;
pub const LIKELY_MEMBERS_PER_CLASS: usize = 12;
pub const LIKELY_LOCALS_PER_METHOD: usize = 8;
pub const MINIMUM_STRING_TABLE_CAPACITY: usize = 256;

/// Which C++ compiler the driver shells out to when `-c` is given.
pub const DEFAULT_TOOLCHAIN: &str = "c++";

/// Everything the driver needs to know for one invocation.
/// CLI flags always win over values read from an `opal.toml`.
#[derive(Clone, Debug)]
pub struct Config {
    pub compile_native: bool,
    pub debug_build: bool,
    pub error_test: bool,
    pub output_name: Option<String>,
    pub profile_refcounts: bool,
    pub pessimistic_refcounts: bool,
    pub unsafe_mode: bool,
    pub verbose: bool,
    pub stop_after_emit: bool,
    pub use_crt_allocator: bool,
    pub print_typesets: bool,
    pub toolchain: String,
    pub source_files: Vec<PathBuf>,
    pub include_files: Vec<PathBuf>,
    pub program_args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            compile_native: false,
            debug_build: false,
            error_test: false,
            output_name: None,
            profile_refcounts: false,
            pessimistic_refcounts: false,
            unsafe_mode: false,
            verbose: false,
            stop_after_emit: false,
            use_crt_allocator: false,
            print_typesets: false,
            toolchain: DEFAULT_TOOLCHAIN.to_string(),
            source_files: Vec::new(),
            include_files: Vec::new(),
            program_args: Vec::new(),
        }
    }
}

/// The subset of settings a project can pin in an `opal.toml`
/// placed next to its first source file.
#[derive(Debug, Default, Deserialize)]
pub struct ProjectFile {
    pub output: Option<String>,
    pub toolchain: Option<String>,
    pub debug: Option<bool>,
    pub unsafe_mode: Option<bool>,
}

impl Config {
    /// Output basename: `-o name`, then the config file, then the first
    /// source file's stem.
    pub fn output_basename(&self) -> String {
        if let Some(name) = &self.output_name {
            return name.clone();
        }

        self.source_files
            .first()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "out".to_string())
    }

    /// Merge values from an `opal.toml` next to the first source file, if
    /// one exists. CLI-provided values are left untouched.
    pub fn apply_project_file(&mut self) -> Result<(), CompileError> {
        let Some(first) = self.source_files.first() else {
            return Ok(());
        };

        let dir = first.parent().unwrap_or_else(|| Path::new("."));
        let config_path = dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Ok(());
        }

        let raw = fs::read_to_string(&config_path)
            .map_err(|e| CompileError::file_error(&config_path, e.to_string()))?;

        let project: ProjectFile = toml::from_str(&raw).map_err(|e| {
            CompileError::config_error(format!("Could not parse {}: {e}", config_path.display()))
        })?;

        if self.output_name.is_none() {
            self.output_name = project.output;
        }
        if self.toolchain == DEFAULT_TOOLCHAIN {
            if let Some(toolchain) = project.toolchain {
                self.toolchain = toolchain;
            }
        }
        self.debug_build |= project.debug.unwrap_or(false);
        self.unsafe_mode |= project.unsafe_mode.unwrap_or(false);

        Ok(())
    }
}
