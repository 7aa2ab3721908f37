//! Reference-count necessity.
//!
//! A runtime ref-count wrapper costs an increment and a decrement, so
//! one is inserted only where the flow analysis proves a value could
//! otherwise be destroyed while still needed:
//!
//! - a local keeps its value alive, so it needs a wrapper only when
//!   something between one of its assignments and the next can destroy
//!   its type;
//! - a recorded owning-expression span needs a wrapper when the backing
//!   local (if any) may be reassigned inside the span and something in
//!   the span can destroy the value's type.
//!
//! Root-object locals are always wrapped: strings hide behind them and
//! string destruction is not modeled in the destroy sets. `-r` skips
//! the analysis and wraps everything.

use crate::compiler::analysis::destroy_sets::DestroyAnalysis;
use crate::compiler::cfg::{FlowId, LocalId};
use crate::compiler::checker::{CheckedMethod, CheckedProgram};
use crate::compiler::datatypes::DataType;
use crate::compiler::registry::ClassRegistry;
use rustc_hash::FxHashSet;

pub fn run(registry: &ClassRegistry, program: &mut CheckedProgram, pessimistic: bool) {
    let mut decisions: Vec<(usize, Vec<bool>, Vec<bool>)> = Vec::new();

    {
        let mut analysis = DestroyAnalysis::new(registry, program);

        for (method_idx, method) in program.methods.iter().enumerate() {
            let local_flags = method
                .locals
                .iter()
                .enumerate()
                .map(|(local_idx, local)| {
                    local_needs_ref(
                        registry,
                        &mut analysis,
                        method,
                        LocalId(local_idx as u32),
                        &local.data_type,
                        pessimistic,
                    )
                })
                .collect();

            let temp_flags = method
                .temps
                .iter()
                .map(|span| {
                    if pessimistic {
                        return true;
                    }
                    span_needs_ref(&mut analysis, method, span)
                })
                .collect();

            decisions.push((method_idx, local_flags, temp_flags));
        }
    }

    for (method_idx, local_flags, temp_flags) in decisions {
        let method = &mut program.methods[method_idx];
        for (local, flag) in method.locals.iter_mut().zip(local_flags) {
            local.needs_ref = flag;
        }
        for (span, flag) in method.temps.iter_mut().zip(temp_flags) {
            span.needs_ref = flag;
        }
    }
}

fn local_needs_ref(
    registry: &ClassRegistry,
    analysis: &mut DestroyAnalysis,
    method: &CheckedMethod,
    local: LocalId,
    data_type: &DataType,
    pessimistic: bool,
) -> bool {
    // Strings always live in a counted handle; the flag is about the
    // extra wrapper for pointers.
    let Some(class) = analysis.class_of_interest(data_type) else {
        return false;
    };

    // Root-object locals can hide a string; wrap unconditionally.
    if class == registry.object_class {
        return true;
    }

    if pessimistic {
        return true;
    }

    // Forward from every assignment: does anything destroy the type
    // before the binding dies?
    let entry = &method.locals[local.0 as usize];
    for &assignment in &entry.assignments {
        let mut visited: FxHashSet<FlowId> = FxHashSet::default();
        let mut stack: Vec<FlowId> = method.graph.succs(assignment).to_vec();

        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }

            let effect = method.graph.effect(node);
            // The binding itself dies here; its own destruction is not
            // a threat to it.
            if effect.destroys_locals.contains(&local) {
                continue;
            }
            if analysis.node_can_destroy(effect, class) {
                return true;
            }
            // A re-assignment kills the binding along this path.
            if effect.sets == Some(local) {
                continue;
            }

            stack.extend_from_slice(method.graph.succs(node));
        }
    }

    false
}

/// Nodes strictly between `start` and `end`: the value is produced at
/// `start` and handed over at `end`, so only what happens in between
/// can invalidate it.
fn span_needs_ref(
    analysis: &mut DestroyAnalysis,
    method: &CheckedMethod,
    span: &crate::compiler::checker::TempSpan,
) -> bool {
    let Some(class) = analysis.class_of_interest(&span.data_type) else {
        return false;
    };

    // Produced and consumed at the same point: nothing can interfere.
    if span.end == span.start {
        return false;
    }

    let mut assigned_between = span.local.is_none();
    let mut destroyed_between = false;

    let mut visited: FxHashSet<FlowId> = FxHashSet::default();
    let mut stack: Vec<FlowId> = method.graph.preds(span.end).to_vec();

    while let Some(node) = stack.pop() {
        if node == span.start || !visited.insert(node) {
            continue;
        }

        let effect = method.graph.effect(node);
        if let Some(local) = span.local {
            if effect.sets == Some(local) {
                assigned_between = true;
            }
        }
        if analysis.node_can_destroy(effect, class) {
            destroyed_between = true;
        }

        if assigned_between && destroyed_between {
            return true;
        }

        stack.extend_from_slice(method.graph.preds(node));
    }

    assigned_between && destroyed_between
}
