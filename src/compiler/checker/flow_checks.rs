//! Definite-assignment and ownership-transfer checks.
//!
//! Both run backwards over the finished method graph: from every use of
//! every local (and from the exit joiner for out parameters), stopping
//! at nodes that assign the variable. Reaching the entry means some path
//! never assigned it; crossing a node that moved the value out means the
//! use might see a hollowed-out variable.

use crate::compiler::cfg::{FlowId, LocalKind, TakeTarget};
use crate::compiler::checker::CheckedMethod;
use crate::compiler::compiler_messages::compiler_errors::{CompileError, ErrorType};
use crate::compiler::registry::{MemberRef, ParamMode};
use crate::compiler::string_interning::StringTable;

enum WalkOutcome {
    Fine,
    ReachedEntryUnassigned,
    CrossedTake(FlowId),
}

pub(crate) fn run(method: &mut CheckedMethod, string_table: &StringTable) -> Vec<CompileError> {
    let mut errors = Vec::new();

    for local_idx in 0..method.locals.len() {
        let local_id = crate::compiler::cfg::LocalId(local_idx as u32);
        let entry_assigned = matches!(
            method.locals[local_idx].kind,
            LocalKind::Param(ParamMode::In | ParamMode::Ref)
        );

        for use_idx in 0..method.locals[local_idx].uses.len() {
            let use_node = method.locals[local_idx].uses[use_idx];
            let outcome = walk_for_local(method, use_node, local_id, entry_assigned);

            match outcome {
                WalkOutcome::Fine => {}
                WalkOutcome::ReachedEntryUnassigned => {
                    let name = string_table.resolve(method.locals[local_idx].name);
                    errors.push(CompileError::new(
                        format!("Variable '{name}' may be used before it is assigned"),
                        method
                            .graph
                            .node(use_node)
                            .location
                            .to_error_location(&method.src_file),
                        ErrorType::Rule,
                    ));
                    break;
                }
                WalkOutcome::CrossedTake(_) => {
                    let name = string_table.resolve(method.locals[local_idx].name);
                    errors.push(CompileError::new(
                        format!("can't transfer ownership: '{name}' may already have been moved"),
                        method
                            .graph
                            .node(use_node)
                            .location
                            .to_error_location(&method.src_file),
                        ErrorType::Rule,
                    ));
                    break;
                }
            }
        }
    }

    errors.extend(check_out_params(method, string_table));
    errors.extend(check_field_takes(method));
    errors
}

/// Backward DFS from one use. Stops at assignments of the local; flags
/// takes crossed on the way; reaching entry unassigned is use-before-init.
fn walk_for_local(
    method: &mut CheckedMethod,
    use_node: FlowId,
    local: crate::compiler::cfg::LocalId,
    entry_assigned: bool,
) -> WalkOutcome {
    method.graph.next_marker();
    let mut stack: Vec<FlowId> = method.graph.preds(use_node).to_vec();

    while let Some(node) = stack.pop() {
        if !method.graph.mark(node) {
            continue;
        }

        let effect = method.graph.effect(node);

        if effect.takes == Some(TakeTarget::Local(local)) {
            return WalkOutcome::CrossedTake(node);
        }
        if effect.sets == Some(local) {
            continue;
        }
        if node == method.graph.entry {
            if entry_assigned {
                continue;
            }
            return WalkOutcome::ReachedEntryUnassigned;
        }

        stack.extend_from_slice(method.graph.preds(node));
    }

    WalkOutcome::Fine
}

/// Every path to the exit joiner must assign every out parameter.
fn check_out_params(method: &mut CheckedMethod, string_table: &StringTable) -> Vec<CompileError> {
    let mut errors = Vec::new();

    for local_idx in 0..method.locals.len() {
        if !matches!(
            method.locals[local_idx].kind,
            LocalKind::Param(ParamMode::Out)
        ) {
            continue;
        }
        let local_id = crate::compiler::cfg::LocalId(local_idx as u32);

        let outcome = walk_for_local(method, method.exit, local_id, false);
        if matches!(outcome, WalkOutcome::ReachedEntryUnassigned) {
            let name = string_table.resolve(method.locals[local_idx].name);
            errors.push(CompileError::new(
                format!("Out parameter '{name}' may be used before it is assigned"),
                method
                    .locals[local_idx]
                    .location
                    .to_error_location(&method.src_file),
                ErrorType::Rule,
            ));
        }
    }

    errors
}

/// A second `take` of the same field with no intervening assignment is
/// rejected at the later take.
fn check_field_takes(method: &mut CheckedMethod) -> Vec<CompileError> {
    let mut errors = Vec::new();

    let take_nodes: Vec<(FlowId, MemberRef)> = (0..method.graph.len())
        .filter_map(|idx| {
            let id = FlowId(idx as u32);
            match method.graph.effect(id).takes {
                Some(TakeTarget::Field(member)) => Some((id, member)),
                _ => None,
            }
        })
        .collect();

    for (take_node, member) in take_nodes {
        method.graph.next_marker();
        let mut stack: Vec<FlowId> = method.graph.preds(take_node).to_vec();
        let mut reported = false;

        while let Some(node) = stack.pop() {
            if reported {
                break;
            }
            if !method.graph.mark(node) {
                continue;
            }

            let effect = method.graph.effect(node);
            if effect.takes == Some(TakeTarget::Field(member)) {
                errors.push(CompileError::new(
                    "can't transfer ownership: the field may already have been moved".to_string(),
                    method
                        .graph
                        .node(take_node)
                        .location
                        .to_error_location(&method.src_file),
                    ErrorType::Rule,
                ));
                reported = true;
                continue;
            }
            if effect.sets_field == Some(member) {
                continue;
            }

            stack.extend_from_slice(method.graph.preds(node));
        }
    }

    errors
}
