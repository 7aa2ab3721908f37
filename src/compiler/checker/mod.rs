//! Type checking.
//!
//! Checking walks every method body once, resolving names and types in
//! place and threading the control-flow graph through the statements as
//! it goes. A failed member records its diagnostics and checking moves
//! on to the next; the driver decides what to do with the pile at the
//! end. The flow checks (use before init, ownership transfer, missing
//! returns) run on each method's finished graph.

pub(crate) mod expressions;
pub(crate) mod flow_checks;
pub(crate) mod statements;

#[cfg(test)]
pub(crate) mod tests {
    pub(crate) mod checker_tests;
    pub(crate) mod flow_tests;
    pub(crate) mod test_support;
}

use crate::compiler::ast_nodes::{AstNode, Expression};
use crate::compiler::cfg::{Cursor, FlowGraph, FlowId, Local, LocalId, LocalKind, TempId};
use crate::compiler::compiler_messages::compiler_errors::{CompileError, CompilerMessages};
use crate::compiler::compiler_messages::compiler_warnings::{CompilerWarning, WarningKind};
use crate::compiler::datatypes::DataType;
use crate::compiler::registry::{
    Accessor, ClassId, ClassRegistry, DelegationKind, MemberKind, MemberRef, MethodKey,
    MethodShell, ParamMode,
};
use crate::compiler::string_interning::{StringId, StringTable};
use crate::compiler::tokenizer::tokens::TextLocation;
use crate::settings::{ENTRY_METHOD_NAME, LIKELY_LOCALS_PER_METHOD};
use rustc_hash::FxHashMap;
use std::path::PathBuf;

/// The flow span of one owning-typed expression value: evaluated at
/// `start`, last needed at `end`. The ref-count analysis decides whether
/// the value must be pinned across that span.
#[derive(Debug, Clone)]
pub struct TempSpan {
    pub start: FlowId,
    pub end: FlowId,
    pub data_type: DataType,
    /// The local backing the expression, when it was a plain local read.
    pub local: Option<LocalId>,
    /// End point recorded (a consuming node closed the span).
    pub closed: bool,
    pub needs_ref: bool,
}

/// One fully checked method body: graph, locals, spans and the checked
/// statement tree the backends walk.
#[derive(Debug)]
pub struct CheckedMethod {
    pub key: MethodKey,
    pub class_id: ClassId,
    pub name: StringId,
    pub location: TextLocation,
    pub src_file: PathBuf,

    pub graph: FlowGraph,
    pub exit: FlowId,
    pub locals: Vec<Local>,
    pub param_count: usize,
    pub body: Vec<AstNode>,
    pub temps: Vec<TempSpan>,
    pub calls_out: Vec<MethodKey>,
    pub return_type: DataType,
    pub is_static: bool,

    /// Checked `: this(...)` / `: base(...)` constructor delegation.
    pub delegation: Option<(DelegationKind, MethodKey, Vec<Expression>)>,
}

#[derive(Debug, Default)]
pub struct CheckedProgram {
    pub methods: Vec<CheckedMethod>,
    by_key: FxHashMap<MethodKey, usize>,

    /// Checked field initializers, in declaration order.
    pub field_inits: Vec<(MemberRef, Expression)>,

    /// Virtual dispatch fan-out: declared method to every override.
    pub overrides_of: FxHashMap<MethodKey, Vec<MethodKey>>,

    /// The discovered `Main`.
    pub entry: Option<MethodKey>,
    pub entry_takes_args: bool,
}

impl CheckedProgram {
    pub fn method(&self, key: MethodKey) -> Option<&CheckedMethod> {
        self.by_key.get(&key).map(|&idx| &self.methods[idx])
    }

    pub fn method_mut(&mut self, key: MethodKey) -> Option<&mut CheckedMethod> {
        self.by_key.get(&key).map(|&idx| &mut self.methods[idx])
    }

    fn push(&mut self, method: CheckedMethod) {
        self.by_key.insert(method.key, self.methods.len());
        self.methods.push(method);
    }
}

struct JumpTarget {
    joiner: FlowId,
    scope_depth: usize,
}

/// All the state threaded through checking one method body.
pub(crate) struct MethodContext<'a> {
    pub registry: &'a mut ClassRegistry,
    pub string_table: &'a StringTable,
    pub src_file: PathBuf,
    pub class_id: ClassId,
    pub key: MethodKey,

    pub graph: FlowGraph,
    pub exit: FlowId,
    pub locals: Vec<Local>,
    pub return_type: DataType,
    pub is_static: bool,

    scopes: Vec<Vec<LocalId>>,
    break_targets: Vec<JumpTarget>,
    continue_targets: Vec<JumpTarget>,

    pub temps: Vec<TempSpan>,
    /// Spans opened during the current statement.
    stmt_spans: Vec<TempId>,
    pub calls_out: Vec<MethodKey>,

    pub errors: Vec<CompileError>,
    pub warnings: Vec<CompilerWarning>,
}

/// Resolve, check and flow-analyze the whole program.
pub fn check_program(
    registry: &mut ClassRegistry,
    string_table: &StringTable,
) -> (CheckedProgram, CompilerMessages) {
    let mut messages = CompilerMessages::new();

    messages.errors.extend(registry.bind_parents(string_table));
    registry.add_default_constructors();
    messages
        .errors
        .extend(registry.resolve_member_types(string_table));

    let mut program = CheckedProgram::default();

    messages
        .errors
        .extend(validate_abstract_coverage(registry, string_table));

    // Field initializers first: they are tiny expression contexts.
    check_field_inits(registry, string_table, &mut program, &mut messages);

    for class_idx in 0..registry.classes.len() {
        let class_id = ClassId(class_idx as u32);
        if registry.class(class_id).is_extern {
            continue;
        }

        for member_idx in 0..registry.class(class_id).members.len() {
            let member = MemberRef {
                class: class_id,
                index: member_idx as u32,
            };
            for accessor in [Accessor::Main, Accessor::Get, Accessor::Set] {
                check_shell(registry, string_table, member, accessor, &mut program, &mut messages);
            }
        }
    }

    build_override_map(registry, &mut program);
    discover_entry(registry, string_table, &mut program, &mut messages);

    (program, messages)
}

/// Check one accessor shell of one member, if it has a body.
fn check_shell(
    registry: &mut ClassRegistry,
    string_table: &StringTable,
    member: MemberRef,
    accessor: Accessor,
    program: &mut CheckedProgram,
    messages: &mut CompilerMessages,
) {
    let key = MethodKey { member, accessor };
    let (meta, body) = {
        let member_data = registry.member_mut(member);
        let location = member_data.location;
        let name = member_data.name;
        let Some(shell) = member_data.shell_mut(accessor) else {
            return;
        };
        let Some(body) = shell.body.take() else {
            return;
        };
        (ShellMeta::capture(shell, name, location), body)
    };

    let delegation = {
        let member_data = registry.member_mut(member);
        member_data
            .shell_mut(accessor)
            .and_then(|shell| shell.delegation.take())
    };

    let src_file = registry.class(member.class).src_file.clone();
    eprintln!("DEBUG check_shell class={:?} member={:?} accessor={:?} is_static={}", member.class, member.index, accessor, meta.is_static);
    let mut ctx = MethodContext::new(registry, string_table, src_file, key, &meta);

    let checked = ctx.check_method(body, &meta, delegation);
    messages.errors.append(&mut ctx.errors);
    messages.warnings.append(&mut ctx.warnings);

    let mut checked = checked;
    let flow_errors = flow_checks::run(&mut checked, string_table);
    messages.errors.extend(flow_errors);

    program.push(checked);
}

/// What the context needs to know about a shell without borrowing it.
pub(crate) struct ShellMeta {
    pub name: StringId,
    pub location: TextLocation,
    pub params: Vec<(StringId, ParamMode, DataType, TextLocation)>,
    pub return_type: DataType,
    pub is_static: bool,
}

impl ShellMeta {
    fn capture(shell: &MethodShell, name: StringId, location: TextLocation) -> Self {
        ShellMeta {
            name,
            location,
            params: shell
                .params
                .iter()
                .map(|p| (p.name, p.mode, p.data_type.clone(), p.location))
                .collect(),
            return_type: shell.return_type.clone(),
            is_static: shell.is_static,
        }
    }
}

impl<'a> MethodContext<'a> {
    fn new(
        registry: &'a mut ClassRegistry,
        string_table: &'a StringTable,
        src_file: PathBuf,
        key: MethodKey,
        meta: &ShellMeta,
    ) -> Self {
        let mut graph = FlowGraph::new();
        let exit = graph.new_joiner();

        MethodContext {
            registry,
            string_table,
            src_file,
            class_id: key.member.class,
            key,
            graph,
            exit,
            locals: Vec::with_capacity(LIKELY_LOCALS_PER_METHOD),
            return_type: meta.return_type.clone(),
            is_static: meta.is_static,
            scopes: vec![Vec::new()],
            break_targets: Vec::new(),
            continue_targets: Vec::new(),
            temps: Vec::new(),
            stmt_spans: Vec::new(),
            calls_out: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn check_method(
        &mut self,
        mut body: Vec<AstNode>,
        meta: &ShellMeta,
        delegation: Option<crate::compiler::registry::CtorDelegation>,
    ) -> CheckedMethod {
        // Parameters are locals of the outermost scope. In and ref
        // parameters arrive assigned; out parameters do not.
        for (name, mode, data_type, location) in &meta.params {
            let id = LocalId(self.locals.len() as u32);
            let mut local = Local::new(*name, data_type.clone(), LocalKind::Param(*mode), *location);
            if !matches!(mode, ParamMode::Out) {
                local.assignments.push(self.graph.entry);
            }
            self.locals.push(local);
            self.scopes.last_mut().unwrap().push(id);
        }
        let param_count = meta.params.len();

        let checked_delegation = delegation.and_then(|d| match self.check_delegation(d) {
            Ok(checked) => checked,
            Err(e) => {
                self.errors.push(e);
                None
            }
        });

        for node in &mut body {
            self.check_statement(node);
        }

        // Reaching the end of a non-void body means a path returns
        // nothing.
        if self.graph.cursor != Cursor::Unreachable && self.return_type != DataType::Void {
            self.errors.push(CompileError::new(
                "Not all code paths return a value".to_string(),
                meta.location.to_error_location(&self.src_file),
                crate::compiler::compiler_messages::compiler_errors::ErrorType::Rule,
            ));
        }

        // The implicit return at the end of a void body still destroys
        // the outermost scope and reaches the exit joiner.
        if self.graph.cursor != Cursor::Unreachable {
            let effect = crate::compiler::cfg::NodeEffect {
                destroys: self.destroyable_types_from_depth(0),
                destroys_locals: self.locals_from_depth(0),
                ..crate::compiler::cfg::NodeEffect::default()
            };
            self.graph.add_node(effect, meta.location);
            let cursor = self.graph.cursor;
            self.graph.join(self.exit, cursor);
        }

        self.warn_unused_locals();
        self.graph.finalize();

        CheckedMethod {
            key: self.key,
            class_id: self.class_id,
            name: meta.name,
            location: meta.location,
            src_file: self.src_file.clone(),
            graph: std::mem::take(&mut self.graph),
            exit: self.exit,
            locals: std::mem::take(&mut self.locals),
            param_count,
            body,
            temps: std::mem::take(&mut self.temps),
            calls_out: std::mem::take(&mut self.calls_out),
            return_type: self.return_type.clone(),
            is_static: self.is_static,
            delegation: checked_delegation,
        }
    }

    fn check_delegation(
        &mut self,
        mut delegation: crate::compiler::registry::CtorDelegation,
    ) -> Result<Option<(DelegationKind, MethodKey, Vec<Expression>)>, CompileError> {
        let target_class = match delegation.kind {
            DelegationKind::This => self.class_id,
            DelegationKind::Base => match self.registry.class(self.class_id).parent {
                Some(parent) => parent,
                None => {
                    return Err(CompileError::new(
                        "Class has no parent; 'base(...)' is meaningless here".to_string(),
                        delegation.location.to_error_location(&self.src_file),
                        crate::compiler::compiler_messages::compiler_errors::ErrorType::Rule,
                    ));
                }
            },
        };

        let mut arg_types = Vec::with_capacity(delegation.args.len());
        for arg in &mut delegation.args {
            self.check_expression_logged(arg);
            arg_types.push(arg.data_type.clone());
        }
        let modes = vec![ParamMode::In; arg_types.len()];

        let target = match self.registry.resolve_constructor(
            target_class,
            &arg_types,
            &modes,
            Some(self.class_id),
        ) {
            Ok(member) => member,
            Err(_) => {
                return Err(CompileError::new(
                    "No matching constructor for delegation".to_string(),
                    delegation.location.to_error_location(&self.src_file),
                    crate::compiler::compiler_messages::compiler_errors::ErrorType::Type,
                ));
            }
        };

        let key = MethodKey {
            member: target,
            accessor: Accessor::Main,
        };
        self.calls_out.push(key);
        self.graph
            .add_node(crate::compiler::cfg::NodeEffect::calling(key), delegation.location);

        Ok(Some((delegation.kind, key, delegation.args)))
    }

    // ------------------------------------------------------------------
    //  Scope and local management (shared by statements and expressions)
    // ------------------------------------------------------------------

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Pop the innermost scope, appending a scope-end node that destroys
    /// the owned locals declared in it (when the end is reachable).
    pub(crate) fn pop_scope(&mut self, location: TextLocation) {
        let scope = self.scopes.pop().unwrap_or_default();

        if self.graph.cursor != Cursor::Unreachable {
            let destroyed: Vec<DataType> = scope
                .iter()
                .map(|id| self.locals[id.0 as usize].data_type.clone())
                .filter(|t| t.is_owned())
                .collect();
            if !destroyed.is_empty() {
                let effect = crate::compiler::cfg::NodeEffect {
                    destroys: destroyed,
                    destroys_locals: scope.clone(),
                    ..crate::compiler::cfg::NodeEffect::default()
                };
                self.graph.add_node(effect, location);
            }
        }
    }

    pub(crate) fn declare_local(
        &mut self,
        name: StringId,
        data_type: DataType,
        location: TextLocation,
    ) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        self.locals
            .push(Local::new(name, data_type, LocalKind::Var, location));
        self.scopes.last_mut().unwrap().push(id);
        id
    }

    pub(crate) fn lookup_local(&self, name: StringId) -> Option<LocalId> {
        for scope in self.scopes.iter().rev() {
            for &id in scope.iter().rev() {
                if self.locals[id.0 as usize].name == name {
                    return Some(id);
                }
            }
        }
        None
    }

    /// The owned types of every local in scopes at or below `depth`,
    /// outermost last. break/continue/return nodes destroy exactly these.
    pub(crate) fn destroyable_types_from_depth(&self, depth: usize) -> Vec<DataType> {
        self.scopes[depth..]
            .iter()
            .flatten()
            .map(|id| self.locals[id.0 as usize].data_type.clone())
            .filter(|t| t.is_owned())
            .collect()
    }

    /// Every local whose binding ends when control leaves scopes at or
    /// below `depth`.
    pub(crate) fn locals_from_depth(&self, depth: usize) -> Vec<LocalId> {
        self.scopes[depth..].iter().flatten().copied().collect()
    }

    pub(crate) fn record_assignment(&mut self, local: LocalId, node: FlowId) {
        let entry = &mut self.locals[local.0 as usize];
        if !entry.assignments.is_empty() {
            entry.mutable = true;
        }
        entry.assignments.push(node);
    }

    pub(crate) fn record_use(&mut self, local: LocalId, node: FlowId) {
        self.locals[local.0 as usize].uses.push(node);
    }

    // ------------------------------------------------------------------
    //  Jump targets
    // ------------------------------------------------------------------

    pub(crate) fn push_break_target(&mut self, joiner: FlowId) {
        self.break_targets.push(JumpTarget {
            joiner,
            scope_depth: self.scopes.len(),
        });
    }

    pub(crate) fn pop_break_target(&mut self) {
        self.break_targets.pop();
    }

    pub(crate) fn push_continue_target(&mut self, joiner: FlowId) {
        self.continue_targets.push(JumpTarget {
            joiner,
            scope_depth: self.scopes.len(),
        });
    }

    pub(crate) fn pop_continue_target(&mut self) {
        self.continue_targets.pop();
    }

    pub(crate) fn break_target(&self) -> Option<(FlowId, usize)> {
        self.break_targets.last().map(|t| (t.joiner, t.scope_depth))
    }

    pub(crate) fn continue_target(&self) -> Option<(FlowId, usize)> {
        self.continue_targets
            .last()
            .map(|t| (t.joiner, t.scope_depth))
    }

    // ------------------------------------------------------------------
    //  Temp spans
    // ------------------------------------------------------------------

    /// Open a span for an owning value produced at `start`.
    pub(crate) fn open_span(
        &mut self,
        start: FlowId,
        data_type: DataType,
        local: Option<LocalId>,
    ) -> TempId {
        let id = TempId(self.temps.len() as u32);
        self.temps.push(TempSpan {
            start,
            end: start,
            data_type,
            local,
            closed: false,
            needs_ref: false,
        });
        self.stmt_spans.push(id);
        id
    }

    /// Close every span opened at or after `from` that is still open,
    /// recording `end` as its use point. Calls close the spans of their
    /// own arguments.
    pub(crate) fn close_spans_from(&mut self, from: usize, end: FlowId) {
        for span in &mut self.temps[from..] {
            if !span.closed {
                span.end = end;
                span.closed = true;
            }
        }
    }

    pub(crate) fn spans_len(&self) -> usize {
        self.temps.len()
    }

    /// Statement boundary: materialize the statement-end temporaries
    /// node destroying every owning rvalue produced by the statement.
    pub(crate) fn end_statement(&mut self, location: TextLocation) {
        if self.stmt_spans.is_empty() {
            return;
        }

        let rvalue_types: Vec<DataType> = self
            .stmt_spans
            .iter()
            .filter(|id| self.temps[id.0 as usize].local.is_none())
            .map(|id| self.temps[id.0 as usize].data_type.clone())
            .collect();

        if !rvalue_types.is_empty() && self.graph.cursor != Cursor::Unreachable {
            let node = self.graph.add_node(
                crate::compiler::cfg::NodeEffect::destroying(rvalue_types),
                location,
            );
            for id in &self.stmt_spans {
                let span = &mut self.temps[id.0 as usize];
                if !span.closed {
                    span.end = node;
                    span.closed = true;
                }
            }
        }

        self.stmt_spans.clear();
    }

    pub(crate) fn check_expression_logged(&mut self, expr: &mut Expression) {
        if let Err(e) = self.check_expression(expr) {
            self.errors.push(e);
        }
    }

    fn warn_unused_locals(&mut self) {
        for local in &self.locals {
            if local.uses.is_empty() && matches!(local.kind, LocalKind::Var) {
                self.warnings.push(CompilerWarning::new(
                    self.string_table.resolve(local.name),
                    local.location.to_error_location(&self.src_file),
                    WarningKind::UnusedVariable,
                ));
            }
        }
    }
}

fn check_field_inits(
    registry: &mut ClassRegistry,
    string_table: &StringTable,
    program: &mut CheckedProgram,
    messages: &mut CompilerMessages,
) {
    for class_idx in 0..registry.classes.len() {
        let class_id = ClassId(class_idx as u32);
        if registry.class(class_id).is_extern {
            continue;
        }

        for member_idx in 0..registry.class(class_id).members.len() {
            let member = MemberRef {
                class: class_id,
                index: member_idx as u32,
            };

            let (mut init, field_type, location) = {
                let member_data = registry.member_mut(member);
                let location = member_data.location;
                let MemberKind::Field {
                    init, data_type, ..
                } = &mut member_data.kind
                else {
                    continue;
                };
                let Some(init) = init.take() else { continue };
                (init, data_type.clone(), location)
            };

            let src_file = registry.class(class_id).src_file.clone();
            let key = MethodKey {
                member,
                accessor: Accessor::Main,
            };
            let meta = ShellMeta {
                name: registry.member(member).name,
                location,
                params: Vec::new(),
                return_type: DataType::Void,
                is_static: true,
            };
            let mut ctx = MethodContext::new(registry, string_table, src_file, key, &meta);

            if let Err(e) = ctx.check_expression(&mut init) {
                ctx.errors.push(e);
            } else if let Err(e) = ctx.require_convert(
                &mut init,
                &field_type,
                crate::compiler::datatypes::ConvertContext::AssignVar,
            ) {
                ctx.errors.push(e);
            }

            messages.errors.append(&mut ctx.errors);
            program.field_inits.push((member, init));
        }
    }
}

/// Every concrete class must override every abstract method visible on
/// its ancestry.
fn validate_abstract_coverage(
    registry: &ClassRegistry,
    string_table: &StringTable,
) -> Vec<CompileError> {
    let mut errors = Vec::new();

    for class in &registry.classes {
        if class.is_abstract || class.is_extern {
            continue;
        }

        let chain = registry.ancestry(class.id);
        for &ancestor in chain.iter().skip(1) {
            for member in &registry.class(ancestor).members {
                if !matches!(&member.kind, MemberKind::Method(shell) if shell.is_abstract) {
                    continue;
                }

                let implemented = chain
                    .iter()
                    .take_while(|&&c| c != ancestor)
                    .any(|&c| {
                        registry.class(c).members.iter().any(|m| {
                            m.name == member.name
                                && matches!(&m.kind, MemberKind::Method(s) if s.is_override && !s.is_abstract)
                        })
                    });

                if !implemented {
                    errors.push(CompileError::new(
                        format!(
                            "Class '{}' must override abstract method '{}'",
                            string_table.resolve(class.name),
                            string_table.resolve(member.name),
                        ),
                        class.location.to_error_location(&class.src_file),
                        crate::compiler::compiler_messages::compiler_errors::ErrorType::Rule,
                    ));
                }
            }
        }
    }

    errors
}

/// Link every override to the member it overrides so virtual dispatch
/// can fan out during the destruction analysis.
fn build_override_map(registry: &ClassRegistry, program: &mut CheckedProgram) {
    for class in &registry.classes {
        for (index, member) in class.members.iter().enumerate() {
            let member_ref = MemberRef {
                class: class.id,
                index: index as u32,
            };

            let is_override = match &member.kind {
                MemberKind::Method(shell) => shell.is_override,
                MemberKind::Property { getter, setter, .. }
                | MemberKind::Indexer { getter, setter, .. } => {
                    getter.as_ref().map(|s| s.is_override).unwrap_or(false)
                        || setter.as_ref().map(|s| s.is_override).unwrap_or(false)
                }
                _ => false,
            };
            if !is_override {
                continue;
            }

            let Some(overridden) = registry.find_overridden(member_ref) else {
                continue;
            };

            for accessor in [Accessor::Main, Accessor::Get, Accessor::Set] {
                if member.shell(accessor).is_none() {
                    continue;
                }
                program
                    .overrides_of
                    .entry(MethodKey {
                        member: overridden,
                        accessor,
                    })
                    .or_default()
                    .push(MethodKey {
                        member: member_ref,
                        accessor,
                    });
            }
        }
    }
}

/// Find the program entry: a static `Main()` or `Main(string[] args)`.
fn discover_entry(
    registry: &ClassRegistry,
    string_table: &StringTable,
    program: &mut CheckedProgram,
    messages: &mut CompilerMessages,
) {
    let Some(main_name) = string_table.get_existing(ENTRY_METHOD_NAME) else {
        return;
    };

    for class in &registry.classes {
        for (index, member) in class.members.iter().enumerate() {
            if member.name != main_name {
                continue;
            }
            let MemberKind::Method(shell) = &member.kind else {
                continue;
            };
            if !shell.is_static {
                continue;
            }

            let takes_args = match shell.params.len() {
                0 => false,
                1 => matches!(&shell.params[0].data_type, DataType::Array(elem) if **elem == DataType::Str),
                _ => continue,
            };
            if shell.params.len() == 1 && !takes_args {
                continue;
            }

            let key = MethodKey {
                member: MemberRef {
                    class: class.id,
                    index: index as u32,
                },
                accessor: Accessor::Main,
            };

            if program.entry.is_some() {
                messages.errors.push(CompileError::new(
                    "Program has more than one Main method".to_string(),
                    member.location.to_error_location(&class.src_file),
                    crate::compiler::compiler_messages::compiler_errors::ErrorType::Rule,
                ));
                return;
            }
            program.entry = Some(key);
            program.entry_takes_args = takes_args;
        }
    }
}
