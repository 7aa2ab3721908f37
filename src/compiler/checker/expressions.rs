//! Expression checking.
//!
//! Resolves names and member accesses, fills in expression types, and
//! appends the CFG nodes that make reads, writes, moves and calls
//! visible to the flow analyses. Prior failures leave `Void` behind and
//! later checks stay quiet about it so one mistake reports once.

use crate::compiler::ast_nodes::{
    BinOp, Binding, Callee, CallTarget, Expression, ExpressionKind, LogicalOp, UnaryOp,
};
use crate::compiler::cfg::{Cursor, NodeEffect, TakeTarget};
use crate::compiler::checker::MethodContext;
use crate::compiler::checker::statements::expr_produces_value;
use crate::compiler::compiler_messages::compiler_errors::{CompileError, ErrorType};
use crate::compiler::datatypes::{can_convert, ConvertContext, DataType};
use crate::compiler::registry::{
    Accessor, BuiltinFn, ClassId, LookupError, MemberKind, MemberRef, MethodKey, ParamMode,
};
use crate::compiler::string_interning::StringId;
use crate::compiler::tokenizer::tokens::TextLocation;

impl<'a> MethodContext<'a> {
    pub(crate) fn check_expression(&mut self, expr: &mut Expression) -> Result<(), CompileError> {
        let location = expr.location;

        // Calls and allocations resolve against the registry and need
        // the whole expression.
        if matches!(expr.kind, ExpressionKind::Call { .. }) {
            return self.check_call(expr);
        }
        if matches!(expr.kind, ExpressionKind::New { .. }) {
            return self.check_new(expr);
        }

        match &mut expr.kind {
            ExpressionKind::Null => expr.data_type = DataType::Null,
            ExpressionKind::BoolLiteral(_) => expr.data_type = DataType::Bool,
            ExpressionKind::IntLiteral(_) => expr.data_type = DataType::Int,
            ExpressionKind::FloatLiteral(_) => expr.data_type = DataType::Float,
            ExpressionKind::DoubleLiteral(_) => expr.data_type = DataType::Double,
            ExpressionKind::CharLiteral(_) => expr.data_type = DataType::Char,
            ExpressionKind::StrLiteral(_) => expr.data_type = DataType::Str,

            ExpressionKind::This => {
                if self.is_static {
                    return Err(CompileError::new(
                        "'this' is not available in a static method".to_string(),
                        location.to_error_location(&self.src_file),
                        ErrorType::Rule,
                    ));
                }
                expr.data_type = DataType::Class(self.class_id);
            }

            ExpressionKind::Name { name, binding } => {
                let (resolved, data_type) = self.resolve_name(*name, location, true)?;
                *binding = resolved;
                expr.data_type = data_type;
            }

            ExpressionKind::FieldAccess {
                object,
                name,
                binding,
            } => {
                self.check_expression(object)?;
                let (resolved, data_type) =
                    self.resolve_member_read(object, *name, location, true)?;
                *binding = resolved;
                expr.data_type = data_type;
            }

            ExpressionKind::Index {
                object,
                index,
                indexer,
            } => {
                self.check_expression(object)?;
                self.check_expression(index)?;

                match object.data_type.strip_owned().clone() {
                    DataType::Array(elem) => {
                        self.require_convert(index, &DataType::Int, ConvertContext::Other)?;
                        expr.data_type = (*elem).clone();
                    }
                    DataType::Str => {
                        self.require_convert(index, &DataType::Int, ConvertContext::Other)?;
                        expr.data_type = DataType::Char;
                    }
                    DataType::Class(class_id) => {
                        let member = self
                            .registry
                            .find_indexer(class_id, &index.data_type, Some(self.class_id))
                            .map_err(|_| {
                                CompileError::new(
                                    "No matching indexer".to_string(),
                                    location.to_error_location(&self.src_file),
                                    ErrorType::Type,
                                )
                            })?;
                        *indexer = Some(member);

                        let key = MethodKey {
                            member,
                            accessor: Accessor::Get,
                        };
                        self.require_accessor(member, Accessor::Get, location)?;
                        self.calls_out.push(key);
                        self.graph.add_node(NodeEffect::calling(key), location);

                        let MemberKind::Indexer { data_type, .. } = &self.registry.member(member).kind
                        else {
                            unreachable!("find_indexer returned a non-indexer member");
                        };
                        expr.data_type = data_type.clone();
                    }
                    DataType::Void => expr.data_type = DataType::Void,
                    other => {
                        return Err(CompileError::new(
                            format!(
                                "Can't index into {}",
                                other.display(self.registry, self.string_table)
                            ),
                            location.to_error_location(&self.src_file),
                            ErrorType::Type,
                        ));
                    }
                }
            }

            ExpressionKind::NewArray { elem, length } => {
                let elem_type = self.resolve_type(elem);
                self.check_expression(length)?;
                self.require_convert(length, &DataType::Int, ConvertContext::Other)?;
                expr.data_type = DataType::Owned(Box::new(DataType::Array(Box::new(elem_type))));
            }

            ExpressionKind::Cast { target, value } => {
                self.check_expression(value)?;
                let target_type = self.resolve_type(target);

                if value.data_type != DataType::Void
                    && target_type != DataType::Void
                    && !can_convert(
                        self.registry,
                        &value.data_type,
                        &target_type,
                        ConvertContext::Other,
                        true,
                        false,
                    )
                {
                    return Err(CompileError::new(
                        format!(
                            "can't convert {} to {}",
                            value.data_type.display(self.registry, self.string_table),
                            target_type.display(self.registry, self.string_table)
                        ),
                        location.to_error_location(&self.src_file),
                        ErrorType::Type,
                    ));
                }

                expr.data_type = target_type;
            }

            ExpressionKind::Take(operand) => {
                self.check_expression(operand)?;

                if operand.data_type == DataType::Void {
                    expr.data_type = DataType::Void;
                    return Ok(());
                }
                if !operand.data_type.is_owned() {
                    return Err(CompileError::new(
                        "'take' needs an owning storage location".to_string(),
                        location.to_error_location(&self.src_file),
                        ErrorType::Type,
                    ));
                }

                let target = match &operand.kind {
                    ExpressionKind::Name {
                        binding: Binding::Local(id),
                        ..
                    } => Some(TakeTarget::Local(*id)),
                    ExpressionKind::Name {
                        binding: Binding::Field(m) | Binding::StaticField(m),
                        ..
                    }
                    | ExpressionKind::FieldAccess {
                        binding: Binding::Field(m) | Binding::StaticField(m),
                        ..
                    } => Some(TakeTarget::Field(*m)),
                    ExpressionKind::Index { .. } => None,
                    _ => {
                        return Err(CompileError::new(
                            "'take' needs a variable, field or element".to_string(),
                            location.to_error_location(&self.src_file),
                            ErrorType::Type,
                        ));
                    }
                };

                let effect = NodeEffect {
                    takes: target,
                    ..NodeEffect::default()
                };
                let node = self.graph.add_node(effect, location);
                if let Some(TakeTarget::Local(id)) = target {
                    self.record_use(id, node);
                }

                expr.data_type = operand.data_type.clone();
            }

            ExpressionKind::Unary { op, operand } => {
                self.check_expression(operand)?;
                match op {
                    UnaryOp::Neg => {
                        if !matches!(
                            operand.data_type,
                            DataType::Int | DataType::Float | DataType::Double | DataType::Void
                        ) {
                            return Err(CompileError::new(
                                "Unary '-' needs a numeric operand".to_string(),
                                location.to_error_location(&self.src_file),
                                ErrorType::Type,
                            ));
                        }
                        expr.data_type = operand.data_type.clone();
                    }
                    UnaryOp::Not => {
                        if !matches!(operand.data_type, DataType::Bool | DataType::Void) {
                            return Err(CompileError::new(
                                "Unary '!' needs a bool operand".to_string(),
                                location.to_error_location(&self.src_file),
                                ErrorType::Type,
                            ));
                        }
                        expr.data_type = DataType::Bool;
                    }
                }
            }

            ExpressionKind::Binary { op, left, right } => {
                self.check_expression(left)?;
                self.check_expression(right)?;
                expr.data_type = self.binary_result(*op, left, right, location)?;
            }

            ExpressionKind::Logical { op: _, left, right } => {
                self.check_expression(left)?;
                self.require_bool(left)?;

                // The right side only runs when the left doesn't
                // short-circuit, so the paths merge afterwards.
                let short_circuit = self.graph.cursor;
                self.check_expression(right)?;
                self.require_bool(right)?;
                let full = self.graph.cursor;

                let join = self.graph.new_joiner();
                self.graph.join(join, short_circuit);
                self.graph.join(join, full);
                self.graph.cursor = self.graph.combine_joiner(join);

                expr.data_type = DataType::Bool;
            }

            ExpressionKind::Ternary {
                condition,
                then_value,
                else_value,
            } => {
                self.check_expression(condition)?;
                self.require_bool(condition)?;

                let fork = self.graph.cursor;
                let join = self.graph.new_joiner();

                self.check_expression(then_value)?;
                let after_then = self.graph.cursor;
                self.graph.join(join, after_then);

                self.graph.cursor = fork;
                self.check_expression(else_value)?;
                let after_else = self.graph.cursor;
                self.graph.join(join, after_else);

                self.graph.cursor = self.graph.combine_joiner(join);

                expr.data_type = self.unify_branch_types(then_value, else_value, location)?;
            }

            ExpressionKind::Assign { target, op, value } => {
                let result = self.check_assignment(target, *op, value, location)?;
                expr.data_type = result;
            }

            ExpressionKind::Increment { target, .. } => {
                self.check_expression(target)?;
                if !matches!(
                    target.data_type,
                    DataType::Int | DataType::Float | DataType::Double | DataType::Void
                ) {
                    return Err(CompileError::new(
                        "'++' and '--' need a numeric variable".to_string(),
                        location.to_error_location(&self.src_file),
                        ErrorType::Type,
                    ));
                }

                match &target.kind {
                    ExpressionKind::Name {
                        binding: Binding::Local(id),
                        ..
                    } => {
                        let node = self.graph.add_node(NodeEffect::setting(*id), location);
                        self.record_assignment(*id, node);
                    }
                    ExpressionKind::Name {
                        binding: Binding::Field(m) | Binding::StaticField(m),
                        ..
                    }
                    | ExpressionKind::FieldAccess {
                        binding: Binding::Field(m) | Binding::StaticField(m),
                        ..
                    } => {
                        let effect = NodeEffect {
                            sets_field: Some(*m),
                            ..NodeEffect::default()
                        };
                        self.graph.add_node(effect, location);
                    }
                    _ => {
                        return Err(CompileError::new(
                            "'++' and '--' need a variable or field".to_string(),
                            location.to_error_location(&self.src_file),
                            ErrorType::Rule,
                        ));
                    }
                }

                expr.data_type = target.data_type.clone();
            }

            ExpressionKind::Call { .. } | ExpressionKind::New { .. } => unreachable!(
                "Call and New are handled above via early return"
            ),
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    //  Names and members
    // ------------------------------------------------------------------

    /// Resolve a bare name: locals, then members of the current class
    /// chain, then class names.
    fn resolve_name(
        &mut self,
        name: StringId,
        location: TextLocation,
        record_read: bool,
    ) -> Result<(Binding, DataType), CompileError> {
        if let Some(local) = self.lookup_local(name) {
            if record_read {
                let node = self.graph.add_node(NodeEffect::none(), location);
                self.record_use(local, node);
            }
            let data_type = self.locals[local.0 as usize].data_type.clone();
            return Ok((Binding::Local(local), data_type));
        }

        match self.registry.find_value_member(self.class_id, name, Some(self.class_id)) {
            Ok(member) => return self.bind_value_member(member, location, record_read),
            Err(LookupError::Inaccessible) => {
                return Err(CompileError::new(
                    format!("'{}' is inaccessible here", self.string_table.resolve(name)),
                    location.to_error_location(&self.src_file),
                    ErrorType::Rule,
                ));
            }
            Err(_) => {}
        }

        if let Some(class_id) = self.registry.class_by_name(name) {
            return Ok((Binding::ClassRef(class_id), DataType::Void));
        }

        Err(CompileError::new(
            format!("Undefined name '{}'", self.string_table.resolve(name)),
            location.to_error_location(&self.src_file),
            ErrorType::Rule,
        ))
    }

    fn bind_value_member(
        &mut self,
        member: MemberRef,
        location: TextLocation,
        record_read: bool,
    ) -> Result<(Binding, DataType), CompileError> {
        match &self.registry.member(member).kind {
            MemberKind::Field {
                data_type,
                is_static,
                ..
            } => {
                let data_type = data_type.clone();
                eprintln!("DEBUG bind_value_member member={:?} field_is_static={} self.is_static={} self.key={:?}", member, is_static, self.is_static, self.key);
                if *is_static {
                    Ok((Binding::StaticField(member), data_type))
                } else {
                    if self.is_static {
                        return Err(CompileError::new(
                            "Instance field is not available in a static method".to_string(),
                            location.to_error_location(&self.src_file),
                            ErrorType::Rule,
                        ));
                    }
                    Ok((Binding::Field(member), data_type))
                }
            }

            MemberKind::Property {
                data_type,
                is_static,
                ..
            } => {
                let data_type = data_type.clone();
                if !is_static && self.is_static {
                    return Err(CompileError::new(
                        "Instance property is not available in a static method".to_string(),
                        location.to_error_location(&self.src_file),
                        ErrorType::Rule,
                    ));
                }

                if record_read {
                    self.require_accessor(member, Accessor::Get, location)?;
                    let key = MethodKey {
                        member,
                        accessor: Accessor::Get,
                    };
                    self.calls_out.push(key);
                    self.graph.add_node(NodeEffect::calling(key), location);
                }
                Ok((Binding::Property(member), data_type))
            }

            _ => unreachable!("find_value_member returned a non-value member"),
        }
    }

    /// Resolve `object.name` accesses, including the built-in
    /// Length/Count pseudo-members on strings and arrays. A pure write
    /// passes `record_read: false` so no getter call is demanded.
    fn resolve_member_read(
        &mut self,
        object: &Expression,
        name: StringId,
        location: TextLocation,
        record_read: bool,
    ) -> Result<(Binding, DataType), CompileError> {
        // Static access through a class name
        if let ExpressionKind::Name {
            binding: Binding::ClassRef(class_id),
            ..
        } = &object.kind
        {
            let member = self
                .registry
                .find_value_member(*class_id, name, Some(self.class_id))
                .map_err(|_| self.unknown_member_error(name, location))?;
            return match &self.registry.member(member).kind {
                MemberKind::Field {
                    data_type,
                    is_static: true,
                    ..
                } => Ok((Binding::StaticField(member), data_type.clone())),
                _ => Err(CompileError::new(
                    format!(
                        "'{}' is not a static member",
                        self.string_table.resolve(name)
                    ),
                    location.to_error_location(&self.src_file),
                    ErrorType::Rule,
                )),
            };
        }

        match object.data_type.strip_owned() {
            DataType::Str => {
                if name.eq_str(self.string_table, "Length") {
                    return Ok((Binding::Unresolved, DataType::Int));
                }
                Err(self.unknown_member_error(name, location))
            }
            DataType::Array(_) => {
                if name.eq_str(self.string_table, "Count") {
                    return Ok((Binding::Unresolved, DataType::Int));
                }
                Err(self.unknown_member_error(name, location))
            }
            DataType::Class(class_id) => {
                let member = self
                    .registry
                    .find_value_member(*class_id, name, Some(self.class_id))
                    .map_err(|_| self.unknown_member_error(name, location))?;
                self.bind_value_member(member, location, record_read)
            }
            DataType::Void => Ok((Binding::Unresolved, DataType::Void)),
            other => Err(CompileError::new(
                format!(
                    "{} has no members",
                    other.display(self.registry, self.string_table)
                ),
                location.to_error_location(&self.src_file),
                ErrorType::Type,
            )),
        }
    }

    fn unknown_member_error(&self, name: StringId, location: TextLocation) -> CompileError {
        CompileError::new(
            format!("Unknown member '{}'", self.string_table.resolve(name)),
            location.to_error_location(&self.src_file),
            ErrorType::Rule,
        )
    }

    fn require_accessor(
        &self,
        member: MemberRef,
        accessor: Accessor,
        location: TextLocation,
    ) -> Result<(), CompileError> {
        if self.registry.member(member).shell(accessor).is_some() {
            return Ok(());
        }
        let what = match accessor {
            Accessor::Get => "readable",
            Accessor::Set => "writable",
            Accessor::Main => "callable",
        };
        Err(CompileError::new(
            format!(
                "'{}' is not {what}",
                self.string_table
                    .resolve(self.registry.member(member).name)
            ),
            location.to_error_location(&self.src_file),
            ErrorType::Rule,
        ))
    }

    // ------------------------------------------------------------------
    //  Calls
    // ------------------------------------------------------------------

    fn check_call(&mut self, expr: &mut Expression) -> Result<(), CompileError> {
        let location = expr.location;
        let ExpressionKind::Call {
            callee,
            args,
            arg_modes,
            target,
        } = &mut expr.kind
        else {
            unreachable!("check_call on a non-call expression");
        };

        // Receiver first, then arguments, left to right.
        let receiver_class: Option<(ClassId, bool)> = match callee {
            Callee::Member { object, name, .. } => {
                self.check_expression(object)?;

                if let ExpressionKind::Name {
                    binding: Binding::ClassRef(class_id),
                    ..
                } = &object.kind
                {
                    Some((*class_id, true))
                } else {
                    match object.data_type.strip_owned() {
                        DataType::Class(class_id) => Some((*class_id, false)),
                        DataType::Void => {
                            expr.data_type = DataType::Void;
                            return Ok(());
                        }
                        other => {
                            return Err(CompileError::new(
                                format!(
                                    "{} has no method '{}'",
                                    other.display(self.registry, self.string_table),
                                    self.string_table.resolve(*name)
                                ),
                                location.to_error_location(&self.src_file),
                                ErrorType::Type,
                            ));
                        }
                    }
                }
            }
            Callee::Base { .. } => {
                if self.is_static {
                    return Err(CompileError::new(
                        "'base' is not available in a static method".to_string(),
                        location.to_error_location(&self.src_file),
                        ErrorType::Rule,
                    ));
                }
                match self.registry.class(self.class_id).parent {
                    Some(parent) => Some((parent, false)),
                    None => {
                        return Err(CompileError::new(
                            "Class has no parent".to_string(),
                            location.to_error_location(&self.src_file),
                            ErrorType::Rule,
                        ));
                    }
                }
            }
            Callee::Name { .. } => None,
        };

        let spans_before = self.spans_len();
        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args.iter_mut() {
            self.check_expression(arg)?;
            arg_types.push(arg.data_type.clone());
        }

        let (name, name_location) = match callee {
            Callee::Name { name, location } => (*name, *location),
            Callee::Member { name, location, .. } => (*name, *location),
            Callee::Base { name, location } => (*name, *location),
        };

        // Unqualified lookup: the class chain, then the builtin library.
        let search_class = receiver_class.map(|(c, _)| c).unwrap_or(self.class_id);
        let resolved = self.registry.resolve_method_call(
            search_class,
            name,
            &arg_types,
            arg_modes,
            Some(self.class_id),
        );

        let member = match resolved {
            Ok(member) => member,
            Err(LookupError::NotFound) if matches!(callee, Callee::Name { .. }) => {
                let builtin = BuiltinFn::from_name(self.string_table.resolve(name)).ok_or_else(
                    || {
                        CompileError::new(
                            format!("Undefined method '{}'", self.string_table.resolve(name)),
                            name_location.to_error_location(&self.src_file),
                            ErrorType::Rule,
                        )
                    },
                )?;
                let result = self.check_builtin_call(builtin, args, location)?;
                *target = Some(CallTarget::Builtin(builtin));
                expr.data_type = result;
                return Ok(());
            }
            Err(e) => return Err(self.lookup_failure_error(e, name, name_location)),
        };

        let (param_info, return_type, is_static, is_virtual) = {
            let shell = self
                .registry
                .member(member)
                .shell(Accessor::Main)
                .expect("method member must have a main shell");
            (
                shell
                    .params
                    .iter()
                    .map(|p| (p.mode, p.data_type.clone()))
                    .collect::<Vec<_>>(),
                shell.return_type.clone(),
                shell.is_static,
                shell.is_virtual,
            )
        };

        if !is_static {
            match (&receiver_class, self.is_static) {
                (Some((_, true)), _) => {
                    return Err(CompileError::new(
                        format!(
                            "'{}' is an instance method; it needs an object",
                            self.string_table.resolve(name)
                        ),
                        name_location.to_error_location(&self.src_file),
                        ErrorType::Rule,
                    ));
                }
                (None, true) => {
                    return Err(CompileError::new(
                        format!(
                            "Instance method '{}' is not available in a static method",
                            self.string_table.resolve(name)
                        ),
                        name_location.to_error_location(&self.src_file),
                        ErrorType::Rule,
                    ));
                }
                _ => {}
            }
        }

        self.convert_call_args(args, arg_modes, &param_info, location)?;

        let key = MethodKey {
            member,
            accessor: Accessor::Main,
        };
        self.calls_out.push(key);
        let call_node = self.graph.add_node(NodeEffect::calling(key), location);
        self.close_spans_from(spans_before, call_node);
        self.record_out_assignments(args, arg_modes, location);

        let virtual_dispatch =
            is_virtual && !is_static && !matches!(callee, Callee::Base { .. });
        *target = Some(CallTarget::Method {
            member,
            is_static,
            virtual_dispatch,
        });
        expr.data_type = return_type;

        Ok(())
    }

    /// Conversion, move and borrow bookkeeping for resolved call
    /// arguments.
    fn convert_call_args(
        &mut self,
        args: &mut [Expression],
        arg_modes: &[ParamMode],
        params: &[(ParamMode, DataType)],
        location: TextLocation,
    ) -> Result<(), CompileError> {
        for (i, arg) in args.iter_mut().enumerate() {
            let Some((param_mode, param_type)) = params.get(i) else {
                break;
            };
            let arg_mode = arg_modes.get(i).copied().unwrap_or(ParamMode::In);

            match param_mode {
                ParamMode::In => {
                    self.require_convert(arg, param_type, ConvertContext::MethodArg)?;

                    // Transfer into an owning parameter moves the source.
                    if let Some(take) = self.implicit_move_target(arg, param_type)? {
                        let effect = NodeEffect {
                            takes: Some(take),
                            ..NodeEffect::default()
                        };
                        self.graph.add_node(effect, location);
                    }
                }
                ParamMode::Ref | ParamMode::Out => {
                    if arg_mode != *param_mode {
                        return Err(CompileError::new(
                            "Argument must be marked 'ref' or 'out' to match the parameter"
                                .to_string(),
                            arg.location.to_error_location(&self.src_file),
                            ErrorType::Type,
                        ));
                    }
                    if !matches!(
                        arg.kind,
                        ExpressionKind::Name {
                            binding: Binding::Local(_) | Binding::Field(_) | Binding::StaticField(_),
                            ..
                        } | ExpressionKind::FieldAccess { .. }
                    ) {
                        return Err(CompileError::new(
                            "ref and out arguments must be variables or fields".to_string(),
                            arg.location.to_error_location(&self.src_file),
                            ErrorType::Rule,
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// An out argument is assigned by the call; a ref argument may be.
    fn record_out_assignments(
        &mut self,
        args: &[Expression],
        arg_modes: &[ParamMode],
        location: TextLocation,
    ) {
        for (i, arg) in args.iter().enumerate() {
            let mode = arg_modes.get(i).copied().unwrap_or(ParamMode::In);
            if !matches!(mode, ParamMode::Ref | ParamMode::Out) {
                continue;
            }
            if let ExpressionKind::Name {
                binding: Binding::Local(id),
                ..
            } = &arg.kind
            {
                let node = self.graph.add_node(NodeEffect::setting(*id), location);
                self.record_assignment(*id, node);
            }
        }
    }

    fn check_builtin_call(
        &mut self,
        builtin: BuiltinFn,
        args: &mut [Expression],
        location: TextLocation,
    ) -> Result<DataType, CompileError> {
        let arity = match builtin {
            BuiltinFn::ReadLine => 0,
            _ => 1,
        };
        if args.len() != arity {
            return Err(CompileError::new(
                format!("{} takes {arity} argument(s)", builtin.name()),
                location.to_error_location(&self.src_file),
                ErrorType::Type,
            ));
        }

        match builtin {
            BuiltinFn::Print | BuiltinFn::PrintLine => {
                let arg = &mut args[0];
                match arg.data_type.strip_owned().clone() {
                    DataType::Bool
                    | DataType::Char
                    | DataType::Int
                    | DataType::Float
                    | DataType::Double
                    | DataType::Str
                    | DataType::Void => {}
                    DataType::Class(_) => {
                        let object = DataType::Class(self.registry.object_class);
                        self.require_convert(arg, &object, ConvertContext::MethodArg)?;
                    }
                    other => {
                        return Err(CompileError::new(
                            format!(
                                "Can't print {}",
                                other.display(self.registry, self.string_table)
                            ),
                            location.to_error_location(&self.src_file),
                            ErrorType::Type,
                        ));
                    }
                }
                Ok(DataType::Void)
            }
            BuiltinFn::ReadLine => Ok(DataType::Str),
            BuiltinFn::Exit => {
                self.require_convert(&mut args[0], &DataType::Int, ConvertContext::MethodArg)?;
                Ok(DataType::Void)
            }
            BuiltinFn::Sqrt => {
                self.require_convert(&mut args[0], &DataType::Double, ConvertContext::MethodArg)?;
                Ok(DataType::Double)
            }
            BuiltinFn::Abs => {
                self.require_convert(&mut args[0], &DataType::Int, ConvertContext::MethodArg)?;
                Ok(DataType::Int)
            }
        }
    }

    fn lookup_failure_error(
        &self,
        error: LookupError,
        name: StringId,
        location: TextLocation,
    ) -> CompileError {
        let name = self.string_table.resolve(name);
        let (msg, error_type) = match error {
            LookupError::NotFound => (format!("Undefined method '{name}'"), ErrorType::Rule),
            LookupError::NoMatchingOverload => (
                format!("No overload of '{name}' matches these arguments"),
                ErrorType::Type,
            ),
            LookupError::Ambiguous => (
                format!("Call to '{name}' is ambiguous"),
                ErrorType::Type,
            ),
            LookupError::Inaccessible => {
                (format!("'{name}' is inaccessible here"), ErrorType::Rule)
            }
        };
        CompileError::new(msg, location.to_error_location(&self.src_file), error_type)
    }

    // ------------------------------------------------------------------
    //  Allocation
    // ------------------------------------------------------------------

    fn check_new(&mut self, expr: &mut Expression) -> Result<(), CompileError> {
        let location = expr.location;
        let ExpressionKind::New {
            class_name,
            args,
            arg_modes,
            pool,
            class_id,
            ctor,
        } = &mut expr.kind
        else {
            unreachable!("check_new on a non-new expression");
        };

        let id = self.registry.class_by_name(*class_name).ok_or_else(|| {
            CompileError::new(
                format!("Unknown class '{}'", self.string_table.resolve(*class_name)),
                location.to_error_location(&self.src_file),
                ErrorType::Rule,
            )
        })?;
        *class_id = Some(id);

        if self.registry.class(id).is_abstract {
            return Err(CompileError::new(
                format!(
                    "Can't instantiate abstract class '{}'",
                    self.string_table.resolve(*class_name)
                ),
                location.to_error_location(&self.src_file),
                ErrorType::Rule,
            ));
        }

        if let Some(pool_expr) = pool {
            self.check_expression(pool_expr)?;
            let is_pool = matches!(
                pool_expr.data_type.strip_owned(),
                DataType::Class(c) if *c == self.registry.pool_class
            );
            if !is_pool && pool_expr.data_type != DataType::Void {
                return Err(CompileError::new(
                    "Allocation target must be a Pool".to_string(),
                    pool_expr.location.to_error_location(&self.src_file),
                    ErrorType::Type,
                ));
            }
            self.registry.mark_pool_destroy_needed(id);
            // A pool owns what it allocates; destroying one can reach any
            // of its contents, so the class also needs its vtable kept.
            self.registry.mark_virtual_needed(id);
        }

        // The built-in Pool has no declared constructor.
        if id == self.registry.pool_class {
            if !args.is_empty() {
                return Err(CompileError::new(
                    "Pool takes no constructor arguments".to_string(),
                    location.to_error_location(&self.src_file),
                    ErrorType::Type,
                ));
            }
            expr.data_type = DataType::Owned(Box::new(DataType::Class(id)));
            return Ok(());
        }

        if self.registry.class(id).is_extern {
            return Err(CompileError::new(
                format!(
                    "Can't instantiate built-in class '{}'",
                    self.string_table.resolve(*class_name)
                ),
                location.to_error_location(&self.src_file),
                ErrorType::Rule,
            ));
        }

        let spans_before = self.spans_len();
        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args.iter_mut() {
            self.check_expression(arg)?;
            arg_types.push(arg.data_type.clone());
        }

        let member = self
            .registry
            .resolve_constructor(id, &arg_types, arg_modes, Some(self.class_id))
            .map_err(|e| {
                self.lookup_failure_error(e, *class_name, location)
            })?;
        *ctor = Some(member);

        let param_info = {
            let shell = self
                .registry
                .member(member)
                .shell(Accessor::Main)
                .expect("constructor member must have a shell");
            shell
                .params
                .iter()
                .map(|p| (p.mode, p.data_type.clone()))
                .collect::<Vec<_>>()
        };
        self.convert_call_args(args, arg_modes, &param_info, location)?;

        let key = MethodKey {
            member,
            accessor: Accessor::Main,
        };
        self.calls_out.push(key);
        let call_node = self.graph.add_node(NodeEffect::calling(key), location);
        self.close_spans_from(spans_before, call_node);

        // Pool allocations belong to the pool, not the expression.
        expr.data_type = if pool.is_some() {
            DataType::Class(id)
        } else {
            DataType::Owned(Box::new(DataType::Class(id)))
        };

        Ok(())
    }

    // ------------------------------------------------------------------
    //  Assignment
    // ------------------------------------------------------------------

    fn check_assignment(
        &mut self,
        target: &mut Expression,
        op: Option<BinOp>,
        value: &mut Expression,
        location: TextLocation,
    ) -> Result<DataType, CompileError> {
        // Resolve the target; compound assignment also reads it.
        let target_type = match &mut target.kind {
            ExpressionKind::Name { name, binding } => {
                let (resolved, data_type) = self.resolve_name(*name, target.location, op.is_some())?;
                if matches!(resolved, Binding::ClassRef(_)) {
                    return Err(CompileError::new(
                        "Can't assign to a class name".to_string(),
                        target.location.to_error_location(&self.src_file),
                        ErrorType::Rule,
                    ));
                }
                *binding = resolved;
                target.data_type = data_type.clone();
                data_type
            }

            ExpressionKind::FieldAccess {
                object,
                name,
                binding,
            } => {
                self.check_expression(object)?;
                let (resolved, data_type) =
                    self.resolve_member_read(object, *name, target.location, op.is_some())?;
                if matches!(resolved, Binding::Unresolved) && data_type != DataType::Void {
                    return Err(CompileError::new(
                        "This member is read-only".to_string(),
                        target.location.to_error_location(&self.src_file),
                        ErrorType::Rule,
                    ));
                }
                *binding = resolved;
                target.data_type = data_type.clone();
                data_type
            }

            ExpressionKind::Index { .. } => {
                self.check_expression(target)?;
                if matches!(target.data_type, DataType::Void) {
                    return Ok(DataType::Void);
                }
                if let ExpressionKind::Index { object, .. } = &target.kind {
                    if matches!(object.data_type.strip_owned(), DataType::Str) {
                        return Err(CompileError::new(
                            "Strings are immutable".to_string(),
                            target.location.to_error_location(&self.src_file),
                            ErrorType::Type,
                        ));
                    }
                }
                target.data_type.clone()
            }

            _ => {
                return Err(CompileError::new(
                    "Can't assign to this expression".to_string(),
                    target.location.to_error_location(&self.src_file),
                    ErrorType::Rule,
                ));
            }
        };

        self.check_expression(value)?;

        if let Some(op) = op {
            // Compound assignment re-checks as the underlying operator.
            let result = self.binary_result(op, target, value, location)?;
            let mut probe = Expression::new(ExpressionKind::Null, location);
            probe.data_type = result;
            self.require_convert(&mut probe, &target_type, ConvertContext::AssignVar)?;
        } else {
            self.require_convert(value, &target_type, ConvertContext::AssignVar)?;
        }

        let move_target = self.implicit_move_target(value, &target_type)?;

        // The write node: overwriting an owning location destroys the
        // previous value.
        let destroys = if target_type.is_owned() {
            vec![target_type.clone()]
        } else {
            Vec::new()
        };

        match &target.kind {
            ExpressionKind::Name {
                binding: Binding::Local(id),
                ..
            } => {
                let effect = NodeEffect {
                    sets: Some(*id),
                    takes: move_target,
                    destroys,
                    ..NodeEffect::default()
                };
                let node = self.graph.add_node(effect, location);
                self.record_assignment(*id, node);
            }

            ExpressionKind::Name {
                binding: Binding::Field(m) | Binding::StaticField(m),
                ..
            }
            | ExpressionKind::FieldAccess {
                binding: Binding::Field(m) | Binding::StaticField(m),
                ..
            } => {
                let effect = NodeEffect {
                    sets_field: Some(*m),
                    takes: move_target,
                    destroys,
                    ..NodeEffect::default()
                };
                self.graph.add_node(effect, location);
            }

            ExpressionKind::Name {
                binding: Binding::Property(m),
                ..
            }
            | ExpressionKind::FieldAccess {
                binding: Binding::Property(m),
                ..
            } => {
                self.require_accessor(*m, Accessor::Set, location)?;
                let key = MethodKey {
                    member: *m,
                    accessor: Accessor::Set,
                };
                self.calls_out.push(key);
                self.graph.add_node(NodeEffect::calling(key), location);
            }

            ExpressionKind::Index { indexer, .. } => {
                match indexer {
                    Some(member) => {
                        self.require_accessor(*member, Accessor::Set, location)?;
                        let key = MethodKey {
                            member: *member,
                            accessor: Accessor::Set,
                        };
                        self.calls_out.push(key);
                        self.graph.add_node(NodeEffect::calling(key), location);
                    }
                    None => {
                        // Array element write.
                        let effect = NodeEffect {
                            takes: move_target,
                            destroys,
                            ..NodeEffect::default()
                        };
                        self.graph.add_node(effect, location);
                    }
                }
            }

            _ => {}
        }

        Ok(target_type)
    }

    // ------------------------------------------------------------------
    //  Conversion helpers
    // ------------------------------------------------------------------

    /// Demand that `expr` converts to `dest`, recording the borrow span
    /// when an owning value ends up behind a non-owning destination.
    pub(crate) fn require_convert(
        &mut self,
        expr: &mut Expression,
        dest: &DataType,
        ctx: ConvertContext,
    ) -> Result<(), CompileError> {
        if expr.data_type == DataType::Void || *dest == DataType::Void {
            return Ok(());
        }

        if !can_convert(self.registry, &expr.data_type, dest, ctx, false, false) {
            return Err(CompileError::new(
                format!(
                    "can't convert {} to {}",
                    expr.data_type.display(self.registry, self.string_table),
                    dest.display(self.registry, self.string_table)
                ),
                expr.location.to_error_location(&self.src_file),
                ErrorType::Type,
            ));
        }

        if expr.data_type.is_owned() && !dest.is_owned() {
            if expr_produces_value(expr) {
                // Owning rvalue borrowed: a temporary that must survive
                // the statement.
                if let Cursor::At(at) = self.graph.cursor {
                    let id = self.open_span(at, expr.data_type.clone(), None);
                    expr.ref_temp = Some(id);
                }
            } else if let ExpressionKind::Name {
                binding: Binding::Local(local),
                ..
            } = &expr.kind
            {
                // Borrow of an owning local: span from the read to the
                // consuming node.
                let start = self.locals[local.0 as usize]
                    .uses
                    .last()
                    .copied()
                    .unwrap_or(self.graph.entry);
                let id = self.open_span(start, expr.data_type.clone(), Some(*local));
                expr.ref_temp = Some(id);
            }
        }

        Ok(())
    }

    /// Implicit move bookkeeping when an owning value lands in owning
    /// storage. Fields demand an explicit `take`.
    pub(crate) fn implicit_move_target(
        &self,
        expr: &Expression,
        dest: &DataType,
    ) -> Result<Option<TakeTarget>, CompileError> {
        if !dest.is_owned() || !expr.data_type.is_owned() {
            return Ok(None);
        }

        match &expr.kind {
            ExpressionKind::Name {
                binding: Binding::Local(id),
                ..
            } => Ok(Some(TakeTarget::Local(*id))),

            ExpressionKind::Name {
                binding: Binding::Field(_) | Binding::StaticField(_),
                ..
            }
            | ExpressionKind::FieldAccess {
                binding: Binding::Field(_) | Binding::StaticField(_),
                ..
            }
            | ExpressionKind::Index { .. } => Err(CompileError::new(
                "can't transfer ownership implicitly; use 'take'".to_string(),
                expr.location.to_error_location(&self.src_file),
                ErrorType::Rule,
            )),

            _ => Ok(None),
        }
    }

    fn require_bool(&mut self, expr: &Expression) -> Result<(), CompileError> {
        if matches!(expr.data_type, DataType::Bool | DataType::Void) {
            return Ok(());
        }
        Err(CompileError::new(
            format!(
                "Expected bool, found {}",
                expr.data_type.display(self.registry, self.string_table)
            ),
            expr.location.to_error_location(&self.src_file),
            ErrorType::Type,
        ))
    }

    fn binary_result(
        &mut self,
        op: BinOp,
        left: &Expression,
        right: &Expression,
        location: TextLocation,
    ) -> Result<DataType, CompileError> {
        let l = &left.data_type;
        let r = &right.data_type;

        if *l == DataType::Void || *r == DataType::Void {
            return Ok(DataType::Void);
        }

        match op {
            BinOp::Add if *l == DataType::Str || *r == DataType::Str => {
                if *l == DataType::Str && *r == DataType::Str {
                    return Ok(DataType::Str);
                }
                Err(self.binary_error(op, l, r, location))
            }

            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                match self.numeric_promotion(l, r) {
                    Some(result) => Ok(result),
                    None => Err(self.binary_error(op, l, r, location)),
                }
            }

            BinOp::Lt | BinOp::Gt | BinOp::LtEq | BinOp::GtEq => {
                if self.numeric_promotion(l, r).is_some()
                    || (*l == DataType::Str && *r == DataType::Str)
                {
                    Ok(DataType::Bool)
                } else {
                    Err(self.binary_error(op, l, r, location))
                }
            }

            BinOp::Eq | BinOp::NotEq => {
                let comparable = self.numeric_promotion(l, r).is_some()
                    || (*l == DataType::Bool && *r == DataType::Bool)
                    || (*l == DataType::Str && *r == DataType::Str)
                    || (l.is_reference() && r.is_reference());
                if comparable {
                    Ok(DataType::Bool)
                } else {
                    Err(self.binary_error(op, l, r, location))
                }
            }
        }
    }

    fn numeric_promotion(&self, l: &DataType, r: &DataType) -> Option<DataType> {
        if !l.is_numeric() || !r.is_numeric() {
            return None;
        }
        if *l == DataType::Double || *r == DataType::Double {
            return Some(DataType::Double);
        }
        if *l == DataType::Float || *r == DataType::Float {
            return Some(DataType::Float);
        }
        Some(DataType::Int)
    }

    fn binary_error(
        &self,
        op: BinOp,
        l: &DataType,
        r: &DataType,
        location: TextLocation,
    ) -> CompileError {
        CompileError::new(
            format!(
                "Operator '{}' can't combine {} and {}",
                op.symbol(),
                l.display(self.registry, self.string_table),
                r.display(self.registry, self.string_table)
            ),
            location.to_error_location(&self.src_file),
            ErrorType::Type,
        )
    }

    fn unify_branch_types(
        &mut self,
        then_value: &Expression,
        else_value: &Expression,
        location: TextLocation,
    ) -> Result<DataType, CompileError> {
        let t = &then_value.data_type;
        let e = &else_value.data_type;

        if *t == DataType::Void || *e == DataType::Void {
            return Ok(DataType::Void);
        }
        if t == e {
            return Ok(t.clone());
        }
        if *t == DataType::Null && e.is_reference() {
            return Ok(e.clone());
        }
        if *e == DataType::Null && t.is_reference() {
            return Ok(t.clone());
        }
        if let Some(promoted) = self.numeric_promotion(t, e) {
            return Ok(promoted);
        }
        if self.registry.is_subtype(t, e) {
            return Ok(e.clone());
        }
        if self.registry.is_subtype(e, t) {
            return Ok(t.clone());
        }

        Err(CompileError::new(
            format!(
                "Branches of '?:' have incompatible types {} and {}",
                t.display(self.registry, self.string_table),
                e.display(self.registry, self.string_table)
            ),
            location.to_error_location(&self.src_file),
            ErrorType::Type,
        ))
    }
}
