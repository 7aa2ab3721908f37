//! Shared helpers for checker, analysis and emitter tests: run the
//! front half of the pipeline over a source string.

use crate::compiler::checker::{CheckedMethod, CheckedProgram, check_program};
use crate::compiler::compiler_messages::compiler_errors::CompilerMessages;
use crate::compiler::parsers::parse_program;
use crate::compiler::registry::ClassRegistry;
use crate::compiler::string_interning::StringTable;
use crate::compiler::tokenizer::tokenizer::tokenize;
use std::path::PathBuf;

pub(crate) struct Checked {
    pub registry: ClassRegistry,
    pub string_table: StringTable,
    pub program: CheckedProgram,
    pub messages: CompilerMessages,
}

impl Checked {
    pub fn error_messages(&self) -> Vec<String> {
        self.messages.errors.iter().map(|e| e.msg.clone()).collect()
    }

    pub fn assert_clean(&self) {
        assert!(
            self.messages.errors.is_empty(),
            "expected no errors, got: {:?}",
            self.error_messages()
        );
    }

    pub fn assert_error_containing(&self, needle: &str) {
        assert!(
            self.messages.errors.iter().any(|e| e.msg.contains(needle)),
            "expected an error containing {needle:?}, got: {:?}",
            self.error_messages()
        );
    }

    pub fn method(&self, class: &str, method: &str) -> &CheckedMethod {
        self.program
            .methods
            .iter()
            .find(|m| {
                self.registry
                    .class_name(m.class_id, &self.string_table)
                    .eq(class)
                    && self.string_table.resolve(m.name) == method
            })
            .unwrap_or_else(|| panic!("no checked method {class}.{method}"))
    }
}

pub(crate) fn check_source(source: &str) -> Checked {
    let mut string_table = StringTable::new();
    let mut registry = ClassRegistry::with_builtins(&mut string_table);

    let file = tokenize(source, &PathBuf::from("test.opl"), &mut string_table)
        .expect("tokenizer should accept test source");
    let parse_errors = parse_program(&[file], &mut registry, &mut string_table);
    assert!(parse_errors.is_empty(), "parse errors: {:?}", parse_errors);

    let (program, messages) = check_program(&mut registry, &string_table);

    Checked {
        registry,
        string_table,
        program,
        messages,
    }
}
