use crate::compiler::compiler_messages::compiler_errors::ErrorLocation;
use saying::say;

#[derive(Clone, Debug)]
pub struct CompilerWarning {
    pub msg: String,
    pub location: ErrorLocation,
    pub warning_kind: WarningKind,
}

impl CompilerWarning {
    pub fn new(msg: impl Into<String>, location: ErrorLocation, warning_kind: WarningKind) -> Self {
        CompilerWarning {
            msg: msg.into(),
            location,
            warning_kind,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WarningKind {
    UnusedVariable,
    UnusedParameter,
    UnreachableCode,
}

pub fn print_formatted_warning(w: &CompilerWarning) {
    let line = w.location.start_pos.line_number;
    match w.warning_kind {
        WarningKind::UnusedVariable => {
            say!(Yellow "Warning: ", "unused variable ", Bright { w.msg.clone() });
        }
        WarningKind::UnusedParameter => {
            say!(Yellow "Warning: ", "unused parameter ", Bright { w.msg.clone() });
        }
        WarningKind::UnreachableCode => {
            say!(Yellow "Warning: ", "unreachable code");
        }
    }

    if line > 0 {
        say!(Dark Magenta "Line ", Bright { line });
    }
}
