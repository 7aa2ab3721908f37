pub mod analysis;
pub mod ast_nodes;
pub mod cfg;
pub mod checker;
pub mod codegen;
pub mod datatypes;
pub mod parsers;
pub mod registry;
pub mod string_interning;

pub mod compiler_messages {
    pub mod compiler_dev_logging;
    pub mod compiler_errors;
    pub mod compiler_warnings;
    pub mod display_messages;
}

pub mod tokenizer {
    pub mod tokenizer;
    pub mod tokens;

    #[cfg(test)]
    mod tests {
        pub(crate) mod tokenizer_tests;
    }
}

use crate::compiler::checker::CheckedProgram;
use crate::compiler::compiler_messages::compiler_errors::{CompileError, CompilerMessages};
use crate::compiler::registry::ClassRegistry;
use crate::compiler::string_interning::StringTable;
use crate::compiler::tokenizer::tokens::FileTokens;
use crate::settings::Config;
use std::path::Path;

/// One compilation, front to back. The phases mirror the pipeline:
/// tokenize → parse → check (resolve + CFG construction) → analyze →
/// emit or interpret; the driver in `build.rs` decides what happens
/// with the results.
pub struct Compiler<'a> {
    pub config: &'a Config,
    pub string_table: StringTable,
    pub registry: ClassRegistry,
}

impl<'a> Compiler<'a> {
    pub fn new(config: &'a Config) -> Self {
        let mut string_table = StringTable::new();
        let registry = ClassRegistry::with_builtins(&mut string_table);
        Compiler {
            config,
            string_table,
            registry,
        }
    }

    /// -----------------------------
    /// TOKENIZER
    /// -----------------------------
    pub fn source_to_tokens(
        &mut self,
        source_code: &str,
        module_path: &Path,
    ) -> Result<FileTokens, CompileError> {
        tokenizer::tokenizer::tokenize(source_code, module_path, &mut self.string_table)
    }

    /// -----------------------------
    /// PARSING
    /// -----------------------------
    /// Populates the class registry with classes and raw member
    /// signatures; bodies stay as unchecked statement trees.
    pub fn tokens_to_classes(&mut self, files: &[FileTokens]) -> Vec<CompileError> {
        parsers::parse_program(files, &mut self.registry, &mut self.string_table)
    }

    /// -----------------------------
    /// CHECKING
    /// -----------------------------
    /// Resolve pass (parents, default constructors, member types), then
    /// per-method type checking with CFG construction and the flow
    /// checks. Never aborts early: everything reportable is collected.
    pub fn check(&mut self) -> (CheckedProgram, CompilerMessages) {
        checker::check_program(&mut self.registry, &self.string_table)
    }

    /// -----------------------------
    /// OWNERSHIP ANALYSES
    /// -----------------------------
    /// Destruction sets are computed lazily underneath; this decides
    /// which locals and temporaries need a runtime ref count.
    pub fn analyze(&self, program: &mut CheckedProgram) {
        analysis::refcount::run(
            &self.registry,
            program,
            self.config.pessimistic_refcounts,
        );
    }

    /// -----------------------------
    /// EMISSION
    /// -----------------------------
    pub fn emit(&self, program: &CheckedProgram) -> String {
        codegen::emit_program(&self.registry, program, &self.string_table, self.config)
    }
}
