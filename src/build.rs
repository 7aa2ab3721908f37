//! Build driver: source files in, diagnostics plus artifacts out.
//!
//! The compiler always exits 0, even after reporting diagnostics; the
//! error-test mode exists so test suites can assert on the diagnostics
//! themselves instead of the exit code.

use crate::compiler::Compiler;
use crate::compiler::analysis::destroy_sets::DestroyAnalysis;
use crate::compiler::compiler_messages::compiler_errors::{CompileError, CompilerMessages};
use crate::compiler::compiler_messages::display_messages::{
    print_compiler_messages, print_formatted_error,
};
use crate::compiler::registry::Accessor;
use crate::compiler::tokenizer::tokens::FileTokens;
use crate::interpreter;
use crate::settings::{Config, TARGET_FILE_EXTENSION};
use crate::timer_log;
use rayon::prelude::*;
use saying::say;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;

pub fn build(mut config: Config) {
    let time = Instant::now();

    if let Err(e) = config.apply_project_file() {
        print_formatted_error(&e);
        return;
    }

    // Source files load in parallel; everything after is sequential.
    let sources: Vec<Result<(PathBuf, String), CompileError>> = config
        .source_files
        .par_iter()
        .map(|path| {
            fs::read_to_string(path)
                .map(|content| (path.clone(), content))
                .map_err(|e| CompileError::file_error(path, e.to_string()))
        })
        .collect();

    let mut loaded = Vec::with_capacity(sources.len());
    for source in sources {
        match source {
            Ok(loaded_source) => loaded.push(loaded_source),
            Err(e) => {
                print_formatted_error(&e);
                return;
            }
        }
    }
    timer_log!(time, "Sources loaded in: ");

    let mut compiler = Compiler::new(&config);
    let mut messages = CompilerMessages::new();

    let mut files: Vec<FileTokens> = Vec::with_capacity(loaded.len());
    for (path, source) in &loaded {
        match compiler.source_to_tokens(source, path) {
            Ok(tokens) => files.push(tokens),
            Err(e) => messages.errors.push(e),
        }
    }
    timer_log!(time, "Tokenized in: ");

    messages.errors.extend(compiler.tokens_to_classes(&files));

    let (mut program, mut check_messages) = compiler.check();
    messages.errors.append(&mut check_messages.errors);
    messages.warnings.append(&mut check_messages.warnings);
    timer_log!(time, "Checked in: ");

    if config.error_test {
        report_error_test(&files, &messages);
        return;
    }

    if messages.has_errors() {
        print_compiler_messages(&messages);
        return;
    }
    for warning in &messages.warnings {
        crate::compiler::compiler_messages::compiler_warnings::print_formatted_warning(warning);
    }

    compiler.analyze(&mut program);
    timer_log!(time, "Analyzed in: ");

    if config.print_typesets {
        print_typesets(&compiler, &program);
    }

    if !config.compile_native {
        if let Err(e) = interpreter::interpret(
            &compiler.registry,
            &program,
            &compiler.string_table,
            &config.program_args,
        ) {
            print_formatted_error(&e);
            std::process::exit(1);
        }
        return;
    }

    let generated = compiler.emit(&program);
    timer_log!(time, "Emitted in: ");

    let basename = config.output_basename();
    let out_dir = config
        .source_files
        .first()
        .and_then(|p| p.parent())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let cpp_path = out_dir.join(format!("{basename}.{TARGET_FILE_EXTENSION}"));

    if let Err(e) = fs::write(&cpp_path, &generated) {
        print_formatted_error(&CompileError::file_error(&cpp_path, e.to_string()));
        return;
    }
    if let Err(e) = crate::compiler::codegen::runtime::write_runtime_header(&out_dir) {
        print_formatted_error(&e);
        return;
    }

    if config.stop_after_emit {
        say!(Green "Wrote ", { cpp_path.display().to_string() });
        return;
    }

    invoke_toolchain(&config, &cpp_path, &out_dir.join(&basename));
}

/// Compare reported error lines against `// error` markers per file and
/// print the diff.
fn report_error_test(files: &[FileTokens], messages: &CompilerMessages) {
    let mut missing_total = 0usize;
    let mut unexpected_total = 0usize;

    for file in files {
        let reported = messages.error_lines(&file.src_path);
        let expected = &file.expected_error_lines;

        let missing: Vec<i32> = expected
            .iter()
            .filter(|line| !reported.contains(line))
            .copied()
            .collect();
        let unexpected: Vec<i32> = reported
            .iter()
            .filter(|line| !expected.contains(line))
            .copied()
            .collect();

        if missing.is_empty() && unexpected.is_empty() {
            continue;
        }

        say!(Dark Magenta { file.src_path.display().to_string() });
        for line in &missing {
            say!(Red "expected an error on line ", Bright { *line }, ", none reported");
            missing_total += 1;
        }
        for line in &unexpected {
            say!(Red "unexpected error on line ", Bright { *line });
            unexpected_total += 1;
        }
    }

    if missing_total == 0 && unexpected_total == 0 {
        say!(Green "error test passed: all markers matched");
    } else {
        say!(Red "error test failed: ", Bright { missing_total }, " missing, ", Bright { unexpected_total }, " unexpected");
    }
}

/// Dump the computed destruction sets per class and per method.
fn print_typesets(compiler: &Compiler, program: &crate::compiler::checker::CheckedProgram) {
    let mut analysis = DestroyAnalysis::new(&compiler.registry, program);

    let mut classes = serde_json::Map::new();
    for class in &compiler.registry.classes {
        if class.is_extern {
            continue;
        }
        let set = analysis.type_destroys(class.id);
        classes.insert(
            compiler
                .registry
                .class_name(class.id, &compiler.string_table)
                .to_string(),
            serde_json::json!(set.display(&compiler.registry, &compiler.string_table)),
        );
    }

    let mut methods = serde_json::Map::new();
    for method in &program.methods {
        let set = analysis.method_destroys(method.key);
        let class_name = compiler
            .registry
            .class_name(method.class_id, &compiler.string_table);
        let member_name = compiler.string_table.resolve(method.name);
        let label = match method.key.accessor {
            Accessor::Main => format!("{class_name}.{member_name}"),
            Accessor::Get => format!("{class_name}.get_{member_name}"),
            Accessor::Set => format!("{class_name}.set_{member_name}"),
        };
        methods.insert(
            label,
            serde_json::json!(set.display(&compiler.registry, &compiler.string_table)),
        );
    }

    let report = serde_json::json!({
        "classes": classes,
        "methods": methods,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).unwrap_or_default()
    );
}

fn invoke_toolchain(config: &Config, cpp_path: &std::path::Path, exe_path: &std::path::Path) {
    let mut command = Command::new(&config.toolchain);
    command.arg(cpp_path).arg("-o").arg(exe_path).arg("-std=c++17");

    if config.debug_build {
        command.arg("-g").arg("-O0");
    } else {
        command.arg("-O2");
    }

    if config.verbose {
        let line: Vec<String> = std::iter::once(config.toolchain.clone())
            .chain(
                command
                    .get_args()
                    .map(|a| a.to_string_lossy().to_string()),
            )
            .collect();
        say!(Dark Magenta { line.join(" ") });
    }

    match command.output() {
        Ok(output) => {
            if !output.status.success() {
                // The C++ compiler's own diagnostics, verbatim.
                eprint!("{}", String::from_utf8_lossy(&output.stderr));
            }
        }
        Err(e) => {
            print_formatted_error(&CompileError::file_error(
                cpp_path,
                format!("Could not run '{}': {e}", config.toolchain),
            ));
        }
    }
}
