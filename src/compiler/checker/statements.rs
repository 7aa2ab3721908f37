//! Statement checking and CFG construction.
//!
//! Each construct lowers to the node/joiner shapes the analyses expect:
//! loops keep their header joiner alive for back edges, merges are
//! combined once complete, and break/continue/return record exactly the
//! scopes they abandon.

use crate::compiler::ast_nodes::{AstNode, NodeKind, SwitchLabel};
use crate::compiler::cfg::{Cursor, LocalId, NodeEffect};
use crate::compiler::checker::MethodContext;
use crate::compiler::compiler_messages::compiler_errors::{CompileError, ErrorType};
use crate::compiler::datatypes::{ConvertContext, DataType};

impl<'a> MethodContext<'a> {
    pub(crate) fn check_statement(&mut self, node: &mut AstNode) {
        let location = node.location;

        // foreach rebuilds hidden locals and needs the whole node.
        if matches!(node.kind, NodeKind::Foreach { .. }) {
            return self.check_foreach(node);
        }

        match &mut node.kind {
            NodeKind::Block(nodes) => {
                self.push_scope();
                for child in nodes {
                    self.check_statement(child);
                }
                self.pop_scope(location);
            }

            NodeKind::VarDecl {
                name,
                declared,
                init,
                local,
            } => {
                let data_type = self.resolve_type(declared);

                if self.lookup_local(*name).is_some() {
                    self.errors.push(CompileError::new(
                        format!(
                            "A variable named '{}' is already in scope",
                            self.string_table.resolve(*name)
                        ),
                        location.to_error_location(&self.src_file),
                        ErrorType::Rule,
                    ));
                }

                // The initializer is checked before the local exists so
                // `int x = x;` reports an undefined name.
                let mut move_target = None;
                if let Some(init) = init {
                    self.check_expression_logged(init);
                    if let Err(e) = self.require_convert(init, &data_type, ConvertContext::AssignVar)
                    {
                        self.errors.push(e);
                    }
                    match self.implicit_move_target(init, &data_type) {
                        Ok(target) => move_target = target,
                        Err(e) => self.errors.push(e),
                    }
                }

                let id = self.declare_local(*name, data_type, location);
                *local = Some(id);

                if init.is_some() {
                    let effect = NodeEffect {
                        sets: Some(id),
                        takes: move_target,
                        ..NodeEffect::default()
                    };
                    let node_id = self.graph.add_node(effect, location);
                    self.record_assignment(id, node_id);
                }

                self.end_statement(location);
            }

            NodeKind::ExprStmt(expr) => {
                self.check_expression_logged(expr);

                // A discarded owning result is a temporary dying at the
                // end of the statement.
                if expr.data_type.is_owned() && expr_produces_value(expr) {
                    if let Cursor::At(at) = self.graph.cursor {
                        let id = self.open_span(at, expr.data_type.clone(), None);
                        expr.ref_temp = Some(id);
                    }
                }

                self.end_statement(location);
            }

            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.check_condition(condition);
                self.end_statement(location);

                let fork = self.graph.cursor;
                let join = self.graph.new_joiner();

                self.check_statement(then_branch);
                let after_then = self.graph.cursor;
                self.graph.join(join, after_then);

                self.graph.cursor = fork;
                match else_branch {
                    Some(else_branch) => {
                        self.check_statement(else_branch);
                        let after_else = self.graph.cursor;
                        self.graph.join(join, after_else);
                    }
                    None => {
                        self.graph.join(join, fork);
                    }
                }

                self.graph.cursor = self.graph.combine_joiner(join);
            }

            NodeKind::While { condition, body } => {
                let header = self.graph.new_joiner();
                let before = self.graph.cursor;
                self.graph.join(header, before);
                self.graph.enter_joiner(header);

                self.check_condition(condition);
                self.end_statement(location);

                let exit = self.graph.new_joiner();
                let after_condition = self.graph.cursor;
                self.graph.join(exit, after_condition);

                self.push_break_target(exit);
                self.push_continue_target(header);
                self.check_statement(body);
                self.pop_continue_target();
                self.pop_break_target();

                let after_body = self.graph.cursor;
                self.graph.join(header, after_body);

                self.graph.cursor = self.graph.combine_joiner(exit);
            }

            NodeKind::DoWhile { body, condition } => {
                let top = self.graph.new_joiner();
                let before = self.graph.cursor;
                self.graph.join(top, before);
                self.graph.enter_joiner(top);

                let exit = self.graph.new_joiner();
                let before_condition = self.graph.new_joiner();

                self.push_break_target(exit);
                self.push_continue_target(before_condition);
                self.check_statement(body);
                self.pop_continue_target();
                self.pop_break_target();

                let after_body = self.graph.cursor;
                self.graph.join(before_condition, after_body);
                self.graph.cursor = self.graph.combine_joiner(before_condition);

                self.check_condition(condition);
                self.end_statement(location);

                let after_condition = self.graph.cursor;
                self.graph.join(top, after_condition);
                self.graph.join(exit, after_condition);

                self.graph.cursor = self.graph.combine_joiner(exit);
            }

            NodeKind::For {
                init,
                condition,
                iterator,
                body,
            } => {
                // The initializer's local lives in the enclosing scope,
                // visible to condition, body and iterator.
                if let Some(init) = init {
                    self.check_statement(init);
                }

                let header = self.graph.new_joiner();
                let before = self.graph.cursor;
                self.graph.join(header, before);
                self.graph.enter_joiner(header);

                let exit = self.graph.new_joiner();
                if let Some(condition) = condition {
                    self.check_condition(condition);
                    self.end_statement(location);
                    let after_condition = self.graph.cursor;
                    self.graph.join(exit, after_condition);
                }

                let before_iterator = self.graph.new_joiner();
                self.push_break_target(exit);
                self.push_continue_target(before_iterator);
                self.check_statement(body);
                self.pop_continue_target();
                self.pop_break_target();

                let after_body = self.graph.cursor;
                self.graph.join(before_iterator, after_body);
                self.graph.cursor = self.graph.combine_joiner(before_iterator);

                if let Some(iterator) = iterator {
                    self.check_expression_logged(iterator);
                    self.end_statement(location);
                }

                let after_iterator = self.graph.cursor;
                self.graph.join(header, after_iterator);

                self.graph.cursor = self.graph.combine_joiner(exit);
            }

            NodeKind::Switch {
                scrutinee,
                sections,
            } => {
                self.check_expression_logged(scrutinee);
                let scrutinee_type = scrutinee.data_type.clone();
                if !matches!(
                    scrutinee_type,
                    DataType::Int | DataType::Char | DataType::Str | DataType::Void
                ) {
                    self.errors.push(CompileError::new(
                        format!(
                            "Can't switch on {}",
                            scrutinee_type.display(self.registry, self.string_table)
                        ),
                        location.to_error_location(&self.src_file),
                        ErrorType::Type,
                    ));
                }
                self.end_statement(location);

                let fork = self.graph.cursor;
                let exit = self.graph.new_joiner();
                self.push_break_target(exit);

                let mut has_default = false;
                for section in sections.iter_mut() {
                    self.graph.cursor = fork;

                    for label in &mut section.labels {
                        match label {
                            SwitchLabel::Case(value) => {
                                self.check_expression_logged(value);
                                if let Err(e) = self.require_convert(
                                    value,
                                    &scrutinee_type,
                                    ConvertContext::Other,
                                ) {
                                    self.errors.push(e);
                                }
                            }
                            SwitchLabel::Default => has_default = true,
                        }
                    }

                    self.push_scope();
                    for stmt in &mut section.body {
                        self.check_statement(stmt);
                    }
                    self.pop_scope(section.location);

                    // Sections never fall through to the next one.
                    if self.graph.cursor != Cursor::Unreachable {
                        self.errors.push(CompileError::new(
                            "Switch section must end with break, continue or return".to_string(),
                            section.location.to_error_location(&self.src_file),
                            ErrorType::Rule,
                        ));
                    }
                }

                self.pop_break_target();

                if !has_default {
                    self.graph.join(exit, fork);
                }
                self.graph.cursor = self.graph.combine_joiner(exit);
            }

            NodeKind::Break => match self.break_target() {
                Some((joiner, depth)) => {
                    let effect = NodeEffect {
                        destroys: self.destroyable_types_from_depth(depth),
                        destroys_locals: self.locals_from_depth(depth),
                        ..NodeEffect::default()
                    };
                    self.graph.add_node(effect, location);
                    let cursor = self.graph.cursor;
                    self.graph.join(joiner, cursor);
                    self.graph.cursor = Cursor::Unreachable;
                }
                None => self.errors.push(CompileError::new(
                    "'break' outside a loop or switch".to_string(),
                    location.to_error_location(&self.src_file),
                    ErrorType::Rule,
                )),
            },

            NodeKind::Continue => match self.continue_target() {
                Some((joiner, depth)) => {
                    let effect = NodeEffect {
                        destroys: self.destroyable_types_from_depth(depth),
                        destroys_locals: self.locals_from_depth(depth),
                        ..NodeEffect::default()
                    };
                    self.graph.add_node(effect, location);
                    let cursor = self.graph.cursor;
                    self.graph.join(joiner, cursor);
                    self.graph.cursor = Cursor::Unreachable;
                }
                None => self.errors.push(CompileError::new(
                    "'continue' outside a loop".to_string(),
                    location.to_error_location(&self.src_file),
                    ErrorType::Rule,
                )),
            },

            NodeKind::Return(value) => {
                let mut move_target = None;

                match value {
                    Some(value) => {
                        if self.return_type == DataType::Void {
                            self.errors.push(CompileError::new(
                                "A void method can't return a value".to_string(),
                                location.to_error_location(&self.src_file),
                                ErrorType::Type,
                            ));
                        } else {
                            self.check_expression_logged(value);
                            let return_type = self.return_type.clone();
                            if let Err(e) =
                                self.require_convert(value, &return_type, ConvertContext::MethodArg)
                            {
                                self.errors.push(e);
                            }
                            match self.implicit_move_target(value, &return_type) {
                                Ok(target) => move_target = target,
                                Err(e) => self.errors.push(e),
                            }
                        }
                    }
                    None => {
                        if self.return_type != DataType::Void {
                            self.errors.push(CompileError::new(
                                "Method must return a value".to_string(),
                                location.to_error_location(&self.src_file),
                                ErrorType::Type,
                            ));
                        }
                    }
                }

                self.end_statement(location);

                // Leaving the method destroys every live scope.
                let effect = NodeEffect {
                    takes: move_target,
                    destroys: self.destroyable_types_from_depth(0),
                    destroys_locals: self.locals_from_depth(0),
                    ..NodeEffect::default()
                };
                self.graph.add_node(effect, location);
                let cursor = self.graph.cursor;
                self.graph.join(self.exit, cursor);
                self.graph.cursor = Cursor::Unreachable;
            }

            NodeKind::Foreach { .. } => unreachable!(
                "Foreach is handled above via early return"
            ),
        }
    }

    /// foreach lowers to: evaluate the collection once into a hidden
    /// local, count with a hidden index, read elements through the
    /// index. The hidden collection local borrows unless the collection
    /// expression was an owning rvalue.
    fn check_foreach(&mut self, node: &mut AstNode) {
        let location = node.location;
        let NodeKind::Foreach {
            declared,
            var_name,
            collection,
            body,
            local,
            collection_local,
            index_local,
        } = &mut node.kind
        else {
            unreachable!("check_foreach on a non-foreach node");
        };

        self.check_expression_logged(collection);

        let elem_type = match collection.data_type.strip_owned() {
            DataType::Array(elem) => (**elem).clone(),
            DataType::Str => DataType::Char,
            other => {
                if *other != DataType::Void {
                    self.errors.push(CompileError::new(
                        format!(
                            "Can't iterate over {}",
                            other.display(self.registry, self.string_table)
                        ),
                        location.to_error_location(&self.src_file),
                        ErrorType::Type,
                    ));
                }
                DataType::Void
            }
        };

        self.push_scope();

        // Hidden collection local: owning only when it must keep an
        // rvalue alive for the duration of the loop.
        let owns_collection = collection.data_type.is_owned()
            && self
                .implicit_move_target(collection, &collection.data_type)
                .ok()
                .flatten()
                .is_none()
            && expr_produces_value(collection);
        let collection_type = if owns_collection {
            collection.data_type.clone()
        } else {
            collection.data_type.strip_owned().clone()
        };

        let coll_id = self.declare_local(*var_name, collection_type, location);
        *collection_local = Some(coll_id);
        let set_coll = self.graph.add_node(NodeEffect::setting(coll_id), location);
        self.record_assignment(coll_id, set_coll);

        let index_id = self.declare_local(*var_name, DataType::Int, location);
        *index_local = Some(index_id);
        let set_index = self.graph.add_node(NodeEffect::setting(index_id), location);
        self.record_assignment(index_id, set_index);

        let declared_type = self.resolve_type(declared);
        if elem_type != DataType::Void {
            let mut probe = crate::compiler::ast_nodes::Expression::new(
                crate::compiler::ast_nodes::ExpressionKind::Null,
                location,
            );
            probe.data_type = elem_type.clone();
            if let Err(e) = self.require_convert(&mut probe, &declared_type, ConvertContext::AssignVar)
            {
                self.errors.push(e);
            }
        }

        let iter_id = self.declare_local(*var_name, declared_type, location);
        *local = Some(iter_id);

        let header = self.graph.new_joiner();
        let before = self.graph.cursor;
        self.graph.join(header, before);
        self.graph.enter_joiner(header);

        // Condition: index < collection.Count
        let condition_node = self.graph.add_node(NodeEffect::none(), location);
        self.record_use(index_id, condition_node);
        self.record_use(coll_id, condition_node);

        let exit = self.graph.new_joiner();
        let after_condition = self.graph.cursor;
        self.graph.join(exit, after_condition);

        // Element read into the iteration variable.
        let set_iter = self.graph.add_node(NodeEffect::setting(iter_id), location);
        self.record_use(coll_id, set_iter);
        self.record_use(index_id, set_iter);
        self.record_assignment(iter_id, set_iter);

        let before_increment = self.graph.new_joiner();
        self.push_break_target(exit);
        self.push_continue_target(before_increment);
        self.check_statement(body);
        self.pop_continue_target();
        self.pop_break_target();

        let after_body = self.graph.cursor;
        self.graph.join(before_increment, after_body);
        self.graph.cursor = self.graph.combine_joiner(before_increment);

        let increment = self.graph.add_node(NodeEffect::setting(index_id), location);
        self.record_use(index_id, increment);
        self.record_assignment(index_id, increment);

        let after_increment = self.graph.cursor;
        self.graph.join(header, after_increment);

        self.graph.cursor = self.graph.combine_joiner(exit);

        self.pop_scope(location);
        self.end_statement(location);
    }

    pub(crate) fn check_condition(&mut self, condition: &mut crate::compiler::ast_nodes::Expression) {
        self.check_expression_logged(condition);
        if condition.data_type != DataType::Bool && condition.data_type != DataType::Void {
            self.errors.push(CompileError::new(
                format!(
                    "Condition must be bool, found {}",
                    condition.data_type.display(self.registry, self.string_table)
                ),
                condition.location.to_error_location(&self.src_file),
                ErrorType::Type,
            ));
        }
    }

    /// Resolve a parsed annotation, reporting errors into the context.
    pub(crate) fn resolve_type(
        &mut self,
        declared: &crate::compiler::ast_nodes::TypeExpr,
    ) -> DataType {
        match self
            .registry
            .resolve_type(declared, &self.src_file, self.string_table)
        {
            Ok(t) => t,
            Err(e) => {
                self.errors.push(e);
                DataType::Void
            }
        }
    }
}

/// True when the expression produces a fresh value rather than reading
/// storage — the cases whose owning results become temporaries.
pub(crate) fn expr_produces_value(expr: &crate::compiler::ast_nodes::Expression) -> bool {
    use crate::compiler::ast_nodes::ExpressionKind;
    matches!(
        expr.kind,
        ExpressionKind::New { .. }
            | ExpressionKind::NewArray { .. }
            | ExpressionKind::Call { .. }
            | ExpressionKind::Take(_)
            | ExpressionKind::Cast { .. }
            | ExpressionKind::Ternary { .. }
    )
}
