use crate::compiler::compiler_messages::compiler_errors::{
    CompileError, CompilerMessages, ErrorType,
};
use crate::compiler::compiler_messages::compiler_warnings::print_formatted_warning;
use saying::say;
use std::path::{Path, PathBuf};
use std::{env, fs};

fn relative_display_path(file: &Path) -> String {
    match env::current_dir() {
        Ok(dir) => file
            .strip_prefix(&dir)
            .unwrap_or(file)
            .to_string_lossy()
            .to_string(),
        Err(_) => file.to_string_lossy().to_string(),
    }
}

pub fn print_compiler_messages(messages: &CompilerMessages) {
    for err in &messages.errors {
        print_formatted_error(err);
    }

    for warning in &messages.warnings {
        print_formatted_warning(warning);
    }
}

pub fn print_formatted_error(e: &CompileError) {
    let relative_dir = relative_display_path(&e.location.file);
    let line_number = e.location.start_pos.line_number.max(1) as usize;

    match e.error_type {
        ErrorType::Syntax => {
            if !relative_dir.is_empty() {
                say!("\n(╯°□°)╯  🔥🔥 ", Dark Magenta relative_dir, " 🔥🔥");
            }
            say!(Red "Syntax");
            say!(Dark Magenta "Line ", Bright { line_number });
        }

        ErrorType::Type => {
            if !relative_dir.is_empty() {
                say!("\n(ಠ_ಠ) ", Dark Magenta relative_dir);
            }
            say!(Red "Type Error");
            say!(Dark Magenta "Line ", Bright { line_number });
        }

        ErrorType::Rule => {
            if !relative_dir.is_empty() {
                say!("\nヽ(˶°o°)ﾉ  🔥🔥 ", Dark Magenta relative_dir, " 🔥🔥");
            }
            say!(Red "Rule");
            say!(Dark Magenta "Line ", Bright { line_number });
        }

        ErrorType::File => {
            say!(Yellow "🏚 Can't find/read file or directory: ", relative_dir);
            say!(Red { e.msg.clone() });
            return;
        }

        ErrorType::Config => {
            say!(Yellow "CONFIG FILE ISSUE - ");
            say!(Red { e.msg.clone() });
            return;
        }

        ErrorType::Compiler => {
            say!(Yellow "COMPILER BUG - ");
            say!(Dark Yellow "not your fault, please report it");
        }

        ErrorType::Eval => {
            say!(Red "Runtime Error");
            if line_number > 1 {
                say!(Dark Magenta "Line ", Bright { line_number });
            }
        }
    }

    say!(Red { e.msg.clone() });
    print_source_snippet(e);
}

/// The offending line plus a caret underline when we can still read the file.
fn print_source_snippet(e: &CompileError) {
    if e.location.file == PathBuf::new() {
        return;
    }

    let line_index = (e.location.start_pos.line_number - 1).max(0) as usize;
    let line = match fs::read_to_string(&e.location.file) {
        Ok(file) => match file.lines().nth(line_index) {
            Some(l) => l.to_string(),
            None => return,
        },
        Err(_) => return,
    };

    println!("\n{line}");

    print!(
        "{}",
        " ".repeat((e.location.start_pos.char_column - 1).max(0) as usize)
    );

    let underline_len =
        (e.location.end_pos.char_column - e.location.start_pos.char_column + 1).max(1) as usize;
    say!(Red { "^".repeat(underline_len) });
}
