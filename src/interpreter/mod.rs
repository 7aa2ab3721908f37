//! Tree-walking evaluator.
//!
//! Runs the checked program directly when `-c` is absent. Reference
//! semantics ride on Rc, so the ownership analyses have nothing to do
//! here; this mode exists to run programs without a C++ toolchain and
//! to cross-check the compiled output. The supported construct set is
//! the common core; anything outside it stops with an "unsupported
//! construct" failure, like the other fatal evaluator errors.

#[cfg(test)]
mod tests;

use crate::compiler::ast_nodes::{
    AstNode, BinOp, Binding, Callee, CallTarget, Expression, ExpressionKind, LogicalOp, NodeKind,
    SwitchLabel, UnaryOp,
};
use crate::compiler::cfg::LocalId;
use crate::compiler::checker::CheckedProgram;
use crate::compiler::compiler_messages::compiler_errors::CompileError;
use crate::compiler::datatypes::DataType;
use crate::compiler::registry::{
    Accessor, BuiltinFn, ClassId, ClassRegistry, MemberKind, MemberRef, MethodKey,
};
use crate::compiler::string_interning::StringTable;
use crate::compiler::tokenizer::tokens::TextLocation;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

#[derive(Clone, Debug)]
pub enum Value {
    Uninit,
    Null,
    Bool(bool),
    Char(u16),
    Int(i32),
    Float(f32),
    Double(f64),
    Str(Rc<str>),
    Object(Rc<ObjectData>),
    Array(Rc<ArrayData>),
    Boxed(Rc<Value>),
}

#[derive(Debug)]
pub struct ObjectData {
    pub class: ClassId,
    pub fields: RefCell<FxHashMap<MemberRef, Value>>,
}

#[derive(Debug)]
pub struct ArrayData {
    pub elems: RefCell<Vec<Value>>,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    locals: Vec<Value>,
    this: Option<Rc<ObjectData>>,
}

pub struct Interpreter<'a> {
    registry: &'a ClassRegistry,
    program: &'a CheckedProgram,
    string_table: &'a StringTable,
    statics: FxHashMap<MemberRef, Value>,
}

type EvalResult<T> = Result<T, CompileError>;

impl<'a> Interpreter<'a> {
    pub fn new(
        registry: &'a ClassRegistry,
        program: &'a CheckedProgram,
        string_table: &'a StringTable,
    ) -> Self {
        Interpreter {
            registry,
            program,
            string_table,
            statics: FxHashMap::default(),
        }
    }

    pub fn run(&mut self, args: &[String]) -> Result<(), CompileError> {
        let Some(entry) = self.program.entry else {
            return Err(CompileError::eval_error(
                "Program has no Main method",
                Default::default(),
            ));
        };

        self.init_statics()?;

        let call_args = if self.program.entry_takes_args {
            let elems: Vec<Value> = args
                .iter()
                .map(|a| Value::Str(Rc::from(a.as_str())))
                .collect();
            vec![Value::Array(Rc::new(ArrayData {
                elems: RefCell::new(elems),
            }))]
        } else {
            Vec::new()
        };

        self.call_method(entry, None, call_args, TextLocation::default())?;
        Ok(())
    }

    /// Test entry: run a static method by name and hand back its result.
    #[cfg(test)]
    pub(crate) fn call_static_by_name(
        &mut self,
        class: &str,
        method: &str,
        args: Vec<Value>,
    ) -> EvalResult<Value> {
        self.init_statics()?;

        let class_name = self
            .string_table
            .get_existing(class)
            .expect("class name never interned");
        let class_id = self
            .registry
            .class_by_name(class_name)
            .expect("class not registered");

        for (index, member) in self.registry.class(class_id).members.iter().enumerate() {
            if self.string_table.resolve(member.name) != method {
                continue;
            }
            let key = MethodKey {
                member: MemberRef {
                    class: class_id,
                    index: index as u32,
                },
                accessor: Accessor::Main,
            };
            if self.program.method(key).is_some() {
                return self.call_method(key, None, args, TextLocation::default());
            }
        }

        panic!("no checked method {class}.{method}");
    }

    fn init_statics(&mut self) -> EvalResult<()> {
        for (member, init) in &self.program.field_inits {
            let is_static = matches!(
                self.registry.member(*member).kind,
                MemberKind::Field {
                    is_static: true, ..
                } | MemberKind::Field { is_const: true, .. }
            );
            if !is_static {
                continue;
            }

            let mut frame = Frame {
                locals: Vec::new(),
                this: None,
            };
            let value = self.eval(init, &mut frame)?;
            self.statics.insert(*member, value);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    //  Calls
    // ------------------------------------------------------------------

    fn call_method(
        &mut self,
        key: MethodKey,
        this: Option<Rc<ObjectData>>,
        args: Vec<Value>,
        location: TextLocation,
    ) -> EvalResult<Value> {
        let Some(method) = self.program.method(key) else {
            return Err(self.unsupported("call to a method without a body", location));
        };

        let mut locals = vec![Value::Uninit; method.locals.len()];
        for (i, arg) in args.into_iter().enumerate() {
            if i < method.param_count {
                locals[i] = arg;
            }
        }

        let mut frame = Frame { locals, this };

        // Constructor delegation runs before the body.
        if let Some((_, target, delegation_args)) = &method.delegation {
            let mut evaluated = Vec::with_capacity(delegation_args.len());
            for arg in delegation_args {
                evaluated.push(self.eval_in(arg, &mut frame)?);
            }
            self.call_method(*target, frame.this.clone(), evaluated, location)?;
        }

        match self.exec_block(&method.body, &mut frame)? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Null),
        }
    }

    /// Most-derived override of a declared member for a runtime class.
    fn resolve_virtual(&self, runtime_class: ClassId, declared: MemberRef, accessor: Accessor) -> MethodKey {
        let name = self.registry.member(declared).name;

        for class in self.registry.ancestry(runtime_class) {
            for (index, member) in self.registry.class(class).members.iter().enumerate() {
                if member.name != name {
                    continue;
                }
                let member_ref = MemberRef {
                    class,
                    index: index as u32,
                };
                let key = MethodKey {
                    member: member_ref,
                    accessor,
                };
                if self.program.method(key).is_some() {
                    return key;
                }
            }
        }

        MethodKey {
            member: declared,
            accessor,
        }
    }

    fn instantiate(
        &mut self,
        class: ClassId,
        ctor: Option<MemberRef>,
        args: Vec<Value>,
        location: TextLocation,
    ) -> EvalResult<Value> {
        let object = Rc::new(ObjectData {
            class,
            fields: RefCell::new(FxHashMap::default()),
        });

        // Field defaults and declared initializers, base first.
        let mut chain = self.registry.ancestry(class);
        chain.reverse();
        for ancestor in chain {
            for (index, member) in self.registry.class(ancestor).members.iter().enumerate() {
                let MemberKind::Field {
                    data_type,
                    is_static: false,
                    is_const: false,
                    ..
                } = &member.kind
                else {
                    continue;
                };
                let member_ref = MemberRef {
                    class: ancestor,
                    index: index as u32,
                };
                let default = default_value(data_type);
                object.fields.borrow_mut().insert(member_ref, default);
            }
        }

        let inits: Vec<(MemberRef, Expression)> = self
            .program
            .field_inits
            .iter()
            .filter(|(m, _)| {
                self.registry
                    .ancestry(class)
                    .contains(&m.class)
                    && matches!(
                        self.registry.member(*m).kind,
                        MemberKind::Field {
                            is_static: false,
                            is_const: false,
                            ..
                        }
                    )
            })
            .cloned()
            .collect();
        for (member, init) in inits {
            let mut frame = Frame {
                locals: Vec::new(),
                this: Some(object.clone()),
            };
            let value = self.eval(&init, &mut frame)?;
            object.fields.borrow_mut().insert(member, value);
        }

        if let Some(ctor) = ctor {
            let key = MethodKey {
                member: ctor,
                accessor: Accessor::Main,
            };
            self.call_method(key, Some(object.clone()), args, location)?;
        }

        Ok(Value::Object(object))
    }

    // ------------------------------------------------------------------
    //  Statements
    // ------------------------------------------------------------------

    fn exec_block(&mut self, nodes: &[AstNode], frame: &mut Frame) -> EvalResult<Flow> {
        for node in nodes {
            match self.exec(node, frame)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, node: &AstNode, frame: &mut Frame) -> EvalResult<Flow> {
        match &node.kind {
            NodeKind::Block(nodes) => self.exec_block(nodes, frame),

            NodeKind::VarDecl { init, local, .. } => {
                if let (Some(local), Some(init)) = (local, init) {
                    let value = self.eval_in(init, frame)?;
                    set_local(frame, *local, value);
                }
                Ok(Flow::Normal)
            }

            NodeKind::ExprStmt(expr) => {
                self.eval_in(expr, frame)?;
                Ok(Flow::Normal)
            }

            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval_bool(condition, frame)? {
                    self.exec(then_branch, frame)
                } else if let Some(else_branch) = else_branch {
                    self.exec(else_branch, frame)
                } else {
                    Ok(Flow::Normal)
                }
            }

            NodeKind::While { condition, body } => {
                while self.eval_bool(condition, frame)? {
                    match self.exec(body, frame)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }

            NodeKind::DoWhile { body, condition } => {
                loop {
                    match self.exec(body, frame)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                    if !self.eval_bool(condition, frame)? {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }

            NodeKind::For {
                init,
                condition,
                iterator,
                body,
            } => {
                if let Some(init) = init {
                    self.exec(init, frame)?;
                }
                loop {
                    if let Some(condition) = condition {
                        if !self.eval_bool(condition, frame)? {
                            break;
                        }
                    }
                    match self.exec(body, frame)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                    if let Some(iterator) = iterator {
                        self.eval_in(iterator, frame)?;
                    }
                }
                Ok(Flow::Normal)
            }

            NodeKind::Foreach {
                collection,
                body,
                local,
                ..
            } => {
                let Some(local) = local else {
                    return Ok(Flow::Normal);
                };
                let collection_value = self.eval_in(collection, frame)?;
                let count = self.collection_len(&collection_value, collection.location)?;

                for i in 0..count {
                    let element =
                        self.collection_at(&collection_value, i, collection.location)?;
                    set_local(frame, *local, element);

                    match self.exec(body, frame)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }

            NodeKind::Switch {
                scrutinee,
                sections,
            } => {
                let value = self.eval_in(scrutinee, frame)?;

                let mut chosen: Option<usize> = None;
                let mut default: Option<usize> = None;
                'sections: for (idx, section) in sections.iter().enumerate() {
                    for label in &section.labels {
                        match label {
                            SwitchLabel::Case(case) => {
                                let case_value = self.eval_in(case, frame)?;
                                if values_equal(&value, &case_value) {
                                    chosen = Some(idx);
                                    break 'sections;
                                }
                            }
                            SwitchLabel::Default => default = Some(idx),
                        }
                    }
                }

                if let Some(idx) = chosen.or(default) {
                    match self.exec_block(&sections[idx].body, frame)? {
                        Flow::Break | Flow::Normal => {}
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }

            NodeKind::Break => Ok(Flow::Break),
            NodeKind::Continue => Ok(Flow::Continue),

            NodeKind::Return(value) => {
                let result = match value {
                    Some(value) => self.eval_in(value, frame)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(result))
            }
        }
    }

    // ------------------------------------------------------------------
    //  Expressions
    // ------------------------------------------------------------------

    fn eval_in(&mut self, expr: &Expression, frame: &mut Frame) -> EvalResult<Value> {
        self.eval(expr, frame)
    }

    fn eval_bool(&mut self, expr: &Expression, frame: &mut Frame) -> EvalResult<bool> {
        match self.eval(expr, frame)? {
            Value::Bool(b) => Ok(b),
            _ => Err(self.unsupported("non-bool condition", expr.location)),
        }
    }

    fn eval(&mut self, expr: &Expression, frame: &mut Frame) -> EvalResult<Value> {
        let location = expr.location;

        match &expr.kind {
            ExpressionKind::Null => Ok(Value::Null),
            ExpressionKind::BoolLiteral(v) => Ok(Value::Bool(*v)),
            ExpressionKind::IntLiteral(v) => Ok(Value::Int(*v)),
            ExpressionKind::FloatLiteral(v) => Ok(Value::Float(*v)),
            ExpressionKind::DoubleLiteral(v) => Ok(Value::Double(*v)),
            ExpressionKind::CharLiteral(v) => Ok(Value::Char(*v)),
            ExpressionKind::StrLiteral(id) => {
                Ok(Value::Str(Rc::from(self.string_table.resolve(*id))))
            }

            ExpressionKind::This => match &frame.this {
                Some(object) => Ok(Value::Object(object.clone())),
                None => Err(self.fatal("'this' outside an instance method", location)),
            },

            ExpressionKind::Name { binding, .. } => self.read_binding(*binding, frame, location),

            ExpressionKind::FieldAccess {
                object, binding, ..
            } => {
                let object_value = self.eval(object, frame)?;
                match binding {
                    Binding::Field(member) => self.read_field(&object_value, *member, location),
                    Binding::StaticField(member) => {
                        Ok(self.statics.get(member).cloned().unwrap_or(Value::Null))
                    }
                    Binding::Property(member) => {
                        let key = self.dispatch_get(&object_value, *member);
                        let this = self.as_object(&object_value, location)?;
                        self.call_method(key, Some(this), Vec::new(), location)
                    }
                    Binding::Unresolved => {
                        // Length / Count pseudo-members
                        self.collection_len(&object_value, location)
                            .map(|n| Value::Int(n as i32))
                    }
                    _ => Err(self.unsupported("member access", location)),
                }
            }

            ExpressionKind::Index {
                object,
                index,
                indexer,
            } => {
                let object_value = self.eval(object, frame)?;
                let index_value = self.eval(index, frame)?;

                match indexer {
                    Some(member) => {
                        let key = self.dispatch_get(&object_value, *member);
                        let this = self.as_object(&object_value, location)?;
                        self.call_method(key, Some(this), vec![index_value], location)
                    }
                    None => {
                        let i = as_index(&index_value)
                            .ok_or_else(|| self.fatal("bad array index", location))?;
                        self.collection_at(&object_value, i, location)
                    }
                }
            }

            ExpressionKind::Call {
                callee,
                args,
                arg_modes,
                target,
            } => {
                if arg_modes
                    .iter()
                    .any(|m| *m != crate::compiler::registry::ParamMode::In)
                {
                    return Err(self.unsupported("ref/out arguments", location));
                }
                self.eval_call(callee, args, target, frame, location)
            }

            ExpressionKind::New {
                args,
                class_id,
                ctor,
                ..
            } => {
                let Some(class_id) = class_id else {
                    return Err(self.fatal("unresolved allocation", location));
                };

                if *class_id == self.registry.pool_class {
                    // Pools are implicit under Rc semantics.
                    return self.instantiate(*class_id, None, Vec::new(), location);
                }

                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval(arg, frame)?);
                }
                self.instantiate(*class_id, *ctor, evaluated, location)
            }

            ExpressionKind::NewArray { length, .. } => {
                let length_value = self.eval(length, frame)?;
                let n = as_index(&length_value)
                    .ok_or_else(|| self.fatal("negative array length", location))?;
                let elem_default = match expr.data_type.strip_owned() {
                    DataType::Array(elem) => default_value(elem),
                    _ => Value::Null,
                };
                Ok(Value::Array(Rc::new(ArrayData {
                    elems: RefCell::new(vec![elem_default; n]),
                })))
            }

            ExpressionKind::Cast { value, .. } => {
                let inner = self.eval(value, frame)?;
                self.cast_value(inner, &expr.data_type, location)
            }

            ExpressionKind::Take(operand) => {
                let place = self.resolve_place(operand, frame)?;
                let value = self.read_place(&place, frame, location)?;
                self.write_place(&place, Value::Null, frame)?;
                Ok(value)
            }

            ExpressionKind::Unary { op, operand } => {
                let inner = self.eval(operand, frame)?;
                match (op, inner) {
                    (UnaryOp::Neg, Value::Int(v)) => Ok(Value::Int(-v)),
                    (UnaryOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
                    (UnaryOp::Neg, Value::Double(v)) => Ok(Value::Double(-v)),
                    (UnaryOp::Not, Value::Bool(v)) => Ok(Value::Bool(!v)),
                    _ => Err(self.unsupported("unary operator", location)),
                }
            }

            ExpressionKind::Binary { op, left, right } => {
                let l = self.eval(left, frame)?;
                let r = self.eval(right, frame)?;
                self.binary(*op, l, r, location)
            }

            ExpressionKind::Logical { op, left, right } => {
                let l = self.eval_bool(left, frame)?;
                let result = match op {
                    LogicalOp::And => l && self.eval_bool(right, frame)?,
                    LogicalOp::Or => l || self.eval_bool(right, frame)?,
                };
                Ok(Value::Bool(result))
            }

            ExpressionKind::Ternary {
                condition,
                then_value,
                else_value,
            } => {
                if self.eval_bool(condition, frame)? {
                    self.eval(then_value, frame)
                } else {
                    self.eval(else_value, frame)
                }
            }

            ExpressionKind::Assign { target, op, value } => {
                let new_value = match op {
                    Some(op) => {
                        let current = self.eval(target, frame)?;
                        let rhs = self.eval(value, frame)?;
                        self.binary(*op, current, rhs, location)?
                    }
                    None => self.eval(value, frame)?,
                };

                match &target.kind {
                    ExpressionKind::Name {
                        binding: Binding::Property(member),
                        ..
                    } => {
                        let this = frame
                            .this
                            .clone()
                            .ok_or_else(|| self.fatal("property without object", location))?;
                        let key = self.resolve_virtual(this.class, *member, Accessor::Set);
                        self.call_method(key, Some(this), vec![new_value.clone()], location)?;
                    }
                    ExpressionKind::FieldAccess {
                        object,
                        binding: Binding::Property(member),
                        ..
                    } => {
                        let object_value = self.eval(object, frame)?;
                        let key = self.dispatch_set(&object_value, *member);
                        let this = self.as_object(&object_value, location)?;
                        self.call_method(key, Some(this), vec![new_value.clone()], location)?;
                    }
                    ExpressionKind::Index {
                        object,
                        index,
                        indexer: Some(member),
                    } => {
                        let object_value = self.eval(object, frame)?;
                        let index_value = self.eval(index, frame)?;
                        let key = self.dispatch_set(&object_value, *member);
                        let this = self.as_object(&object_value, location)?;
                        self.call_method(
                            key,
                            Some(this),
                            vec![index_value, new_value.clone()],
                            location,
                        )?;
                    }
                    _ => {
                        let place = self.resolve_place(target, frame)?;
                        self.write_place(&place, new_value.clone(), frame)?;
                    }
                }

                Ok(new_value)
            }

            ExpressionKind::Increment { target, decrement } => {
                let place = self.resolve_place(target, frame)?;
                let current = self.read_place(&place, frame, location)?;
                let next = match current {
                    Value::Int(v) => Value::Int(if *decrement { v - 1 } else { v + 1 }),
                    Value::Float(v) => Value::Float(if *decrement { v - 1.0 } else { v + 1.0 }),
                    Value::Double(v) => Value::Double(if *decrement { v - 1.0 } else { v + 1.0 }),
                    _ => return Err(self.unsupported("increment target", location)),
                };
                self.write_place(&place, next, frame)?;
                Ok(current)
            }
        }
    }

    fn eval_call(
        &mut self,
        callee: &Callee,
        args: &[Expression],
        target: &Option<CallTarget>,
        frame: &mut Frame,
        location: TextLocation,
    ) -> EvalResult<Value> {
        match target {
            Some(CallTarget::Builtin(builtin)) => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval(arg, frame)?);
                }
                self.call_builtin(*builtin, evaluated, location)
            }

            Some(CallTarget::Method {
                member,
                is_static,
                virtual_dispatch,
            }) => {
                let this: Option<Rc<ObjectData>> = if *is_static {
                    None
                } else {
                    match callee {
                        Callee::Member { object, .. } => {
                            let object_value = self.eval(object, frame)?;
                            Some(self.as_object(&object_value, location)?)
                        }
                        _ => frame.this.clone(),
                    }
                };

                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval(arg, frame)?);
                }

                let key = match (&this, virtual_dispatch) {
                    (Some(object), true) => {
                        self.resolve_virtual(object.class, *member, Accessor::Main)
                    }
                    _ => MethodKey {
                        member: *member,
                        accessor: Accessor::Main,
                    },
                };

                self.call_method(key, this, evaluated, location)
            }

            None => Err(self.unsupported("unresolved call", location)),
        }
    }

    fn call_builtin(
        &mut self,
        builtin: BuiltinFn,
        mut args: Vec<Value>,
        location: TextLocation,
    ) -> EvalResult<Value> {
        match builtin {
            BuiltinFn::Print | BuiltinFn::PrintLine => {
                let value = args.pop().unwrap_or(Value::Null);
                let text = self.value_to_text(&value);
                if builtin == BuiltinFn::PrintLine {
                    println!("{text}");
                } else {
                    print!("{text}");
                    let _ = io::stdout().flush();
                }
                Ok(Value::Null)
            }
            BuiltinFn::ReadLine => {
                let mut line = String::new();
                io::stdin()
                    .lock()
                    .read_line(&mut line)
                    .map_err(|e| self.fatal(&format!("stdin: {e}"), location))?;
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Ok(Value::Str(Rc::from(line.as_str())))
            }
            BuiltinFn::Exit => match args.pop() {
                Some(Value::Int(code)) => std::process::exit(code),
                _ => Err(self.fatal("Exit needs an int", location)),
            },
            BuiltinFn::Sqrt => match args.pop() {
                Some(Value::Double(v)) => Ok(Value::Double(v.sqrt())),
                Some(Value::Int(v)) => Ok(Value::Double((v as f64).sqrt())),
                Some(Value::Float(v)) => Ok(Value::Double((v as f64).sqrt())),
                _ => Err(self.fatal("Sqrt needs a number", location)),
            },
            BuiltinFn::Abs => match args.pop() {
                Some(Value::Int(v)) => Ok(Value::Int(v.abs())),
                _ => Err(self.fatal("Abs needs an int", location)),
            },
        }
    }

    // ------------------------------------------------------------------
    //  Places
    // ------------------------------------------------------------------

    fn resolve_place(&mut self, expr: &Expression, frame: &mut Frame) -> EvalResult<Place> {
        match &expr.kind {
            ExpressionKind::Name { binding, .. } => match binding {
                Binding::Local(local) => Ok(Place::Local(*local)),
                Binding::Field(member) => {
                    let this = frame
                        .this
                        .clone()
                        .ok_or_else(|| self.fatal("field without object", expr.location))?;
                    Ok(Place::Field(this, *member))
                }
                Binding::StaticField(member) => Ok(Place::Static(*member)),
                _ => Err(self.unsupported("assignment target", expr.location)),
            },

            ExpressionKind::FieldAccess {
                object, binding, ..
            } => {
                let object_value = self.eval(object, frame)?;
                match binding {
                    Binding::Field(member) => {
                        let this = self.as_object(&object_value, expr.location)?;
                        Ok(Place::Field(this, *member))
                    }
                    Binding::StaticField(member) => Ok(Place::Static(*member)),
                    _ => Err(self.unsupported("assignment target", expr.location)),
                }
            }

            ExpressionKind::Index { object, index, .. } => {
                let object_value = self.eval(object, frame)?;
                let index_value = self.eval(index, frame)?;
                let i = as_index(&index_value)
                    .ok_or_else(|| self.fatal("bad array index", expr.location))?;
                match object_value {
                    Value::Array(array) => Ok(Place::Elem(array, i)),
                    Value::Null => Err(self.fatal("null dereference", expr.location)),
                    _ => Err(self.unsupported("indexed assignment", expr.location)),
                }
            }

            _ => Err(self.unsupported("assignment target", expr.location)),
        }
    }

    fn read_place(
        &mut self,
        place: &Place,
        frame: &mut Frame,
        location: TextLocation,
    ) -> EvalResult<Value> {
        match place {
            Place::Local(local) => {
                let value = frame.locals[local.0 as usize].clone();
                if matches!(value, Value::Uninit) {
                    return Err(self.fatal("value used before initialization", location));
                }
                Ok(value)
            }
            Place::Field(object, member) => Ok(object
                .fields
                .borrow()
                .get(member)
                .cloned()
                .unwrap_or(Value::Null)),
            Place::Static(member) => {
                Ok(self.statics.get(member).cloned().unwrap_or(Value::Null))
            }
            Place::Elem(array, i) => {
                let elems = array.elems.borrow();
                elems
                    .get(*i)
                    .cloned()
                    .ok_or_else(|| self.fatal("array index out of range", location))
            }
        }
    }

    fn write_place(&mut self, place: &Place, value: Value, frame: &mut Frame) -> EvalResult<()> {
        match place {
            Place::Local(local) => {
                set_local(frame, *local, value);
                Ok(())
            }
            Place::Field(object, member) => {
                object.fields.borrow_mut().insert(*member, value);
                Ok(())
            }
            Place::Static(member) => {
                self.statics.insert(*member, value);
                Ok(())
            }
            Place::Elem(array, i) => {
                let mut elems = array.elems.borrow_mut();
                if *i >= elems.len() {
                    return Err(self.fatal("array index out of range", TextLocation::default()));
                }
                elems[*i] = value;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    //  Values
    // ------------------------------------------------------------------

    fn read_binding(
        &mut self,
        binding: Binding,
        frame: &mut Frame,
        location: TextLocation,
    ) -> EvalResult<Value> {
        match binding {
            Binding::Local(local) => {
                let value = frame.locals[local.0 as usize].clone();
                if matches!(value, Value::Uninit) {
                    return Err(self.fatal("value used before initialization", location));
                }
                Ok(value)
            }
            Binding::Field(member) => {
                let this = frame
                    .this
                    .clone()
                    .ok_or_else(|| self.fatal("field without object", location))?;
                Ok(this
                    .fields
                    .borrow()
                    .get(&member)
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            Binding::StaticField(member) => {
                Ok(self.statics.get(&member).cloned().unwrap_or(Value::Null))
            }
            Binding::Property(member) => {
                let this = frame
                    .this
                    .clone()
                    .ok_or_else(|| self.fatal("property without object", location))?;
                let key = self.resolve_virtual(this.class, member, Accessor::Get);
                self.call_method(key, Some(this), Vec::new(), location)
            }
            Binding::ClassRef(_) | Binding::Unresolved => {
                Err(self.unsupported("name", location))
            }
        }
    }

    fn read_field(
        &mut self,
        object: &Value,
        member: MemberRef,
        location: TextLocation,
    ) -> EvalResult<Value> {
        let object = self.as_object(object, location)?;
        Ok(object
            .fields
            .borrow()
            .get(&member)
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn dispatch_get(&self, value: &Value, member: MemberRef) -> MethodKey {
        match value {
            Value::Object(object) => self.resolve_virtual(object.class, member, Accessor::Get),
            _ => MethodKey {
                member,
                accessor: Accessor::Get,
            },
        }
    }

    fn dispatch_set(&self, value: &Value, member: MemberRef) -> MethodKey {
        match value {
            Value::Object(object) => self.resolve_virtual(object.class, member, Accessor::Set),
            _ => MethodKey {
                member,
                accessor: Accessor::Set,
            },
        }
    }

    fn as_object(&self, value: &Value, location: TextLocation) -> EvalResult<Rc<ObjectData>> {
        match value {
            Value::Object(object) => Ok(object.clone()),
            Value::Null => Err(self.fatal("null dereference", location)),
            _ => Err(self.unsupported("object operation", location)),
        }
    }

    fn collection_len(&self, value: &Value, location: TextLocation) -> EvalResult<usize> {
        match value {
            Value::Array(array) => Ok(array.elems.borrow().len()),
            Value::Str(s) => Ok(s.encode_utf16().count()),
            Value::Null => Err(self.fatal("null dereference", location)),
            _ => Err(self.unsupported("collection", location)),
        }
    }

    fn collection_at(
        &self,
        value: &Value,
        index: usize,
        location: TextLocation,
    ) -> EvalResult<Value> {
        match value {
            Value::Array(array) => array
                .elems
                .borrow()
                .get(index)
                .cloned()
                .ok_or_else(|| self.fatal("array index out of range", location)),
            Value::Str(s) => s
                .encode_utf16()
                .nth(index)
                .map(Value::Char)
                .ok_or_else(|| self.fatal("string index out of range", location)),
            Value::Null => Err(self.fatal("null dereference", location)),
            _ => Err(self.unsupported("collection", location)),
        }
    }

    fn cast_value(
        &self,
        value: Value,
        target: &DataType,
        location: TextLocation,
    ) -> EvalResult<Value> {
        match (value, target.strip_owned()) {
            (v, DataType::Class(c)) if *c == self.registry.object_class => match v {
                Value::Object(_) | Value::Str(_) | Value::Boxed(_) | Value::Null => Ok(v),
                primitive => Ok(Value::Boxed(Rc::new(primitive))),
            },

            (Value::Boxed(inner), d) if d.is_value_type() => {
                let inner = (*inner).clone();
                let matches_type = matches!(
                    (&inner, d),
                    (Value::Bool(_), DataType::Bool)
                        | (Value::Char(_), DataType::Char)
                        | (Value::Int(_), DataType::Int)
                        | (Value::Float(_), DataType::Float)
                        | (Value::Double(_), DataType::Double)
                );
                if matches_type {
                    Ok(inner)
                } else {
                    Err(self.fatal("invalid cast", location))
                }
            }

            (Value::Int(v), DataType::Int) => Ok(Value::Int(v)),
            (Value::Int(v), DataType::Float) => Ok(Value::Float(v as f32)),
            (Value::Int(v), DataType::Double) => Ok(Value::Double(v as f64)),
            (Value::Float(v), DataType::Int) => Ok(Value::Int(v as i32)),
            (Value::Float(v), DataType::Double) => Ok(Value::Double(v as f64)),
            (Value::Double(v), DataType::Int) => Ok(Value::Int(v as i32)),
            (Value::Double(v), DataType::Float) => Ok(Value::Float(v as f32)),
            (Value::Char(v), DataType::Int) => Ok(Value::Int(v as i32)),
            (Value::Int(v), DataType::Char) => Ok(Value::Char(v as u16)),

            (Value::Str(s), DataType::Str) => Ok(Value::Str(s)),

            (Value::Null, d) if d.is_reference() => Ok(Value::Null),

            (Value::Object(object), DataType::Class(c)) => {
                if self
                    .registry
                    .ancestry(object.class)
                    .contains(c)
                {
                    Ok(Value::Object(object))
                } else {
                    Err(self.fatal("invalid cast", location))
                }
            }

            (Value::Str(s), DataType::Class(_)) => Ok(Value::Str(s)),

            _ => Err(self.fatal("invalid cast", location)),
        }
    }

    fn binary(
        &self,
        op: BinOp,
        l: Value,
        r: Value,
        location: TextLocation,
    ) -> EvalResult<Value> {
        use Value::*;

        if op == BinOp::Add {
            if let (Str(a), Str(b)) = (&l, &r) {
                return Ok(Str(Rc::from(format!("{a}{b}").as_str())));
            }
        }

        if op.is_comparison() {
            return self.compare(op, l, r, location);
        }

        let result = match (l, r) {
            (Int(a), Int(b)) => match op {
                BinOp::Add => Int(a.wrapping_add(b)),
                BinOp::Sub => Int(a.wrapping_sub(b)),
                BinOp::Mul => Int(a.wrapping_mul(b)),
                BinOp::Div => {
                    if b == 0 {
                        return Err(self.fatal("division by zero", location));
                    }
                    Int(a.wrapping_div(b))
                }
                BinOp::Mod => {
                    if b == 0 {
                        return Err(self.fatal("division by zero", location));
                    }
                    Int(a.wrapping_rem(b))
                }
                _ => return Err(self.unsupported("operator", location)),
            },
            (a, b) => {
                let (a, b) = match promote_pair(a, b) {
                    Some(pair) => pair,
                    None => return Err(self.unsupported("operator operands", location)),
                };
                match (a, b) {
                    (Double(a), Double(b)) => match op {
                        BinOp::Add => Double(a + b),
                        BinOp::Sub => Double(a - b),
                        BinOp::Mul => Double(a * b),
                        BinOp::Div => Double(a / b),
                        BinOp::Mod => Double(a % b),
                        _ => return Err(self.unsupported("operator", location)),
                    },
                    (Float(a), Float(b)) => match op {
                        BinOp::Add => Float(a + b),
                        BinOp::Sub => Float(a - b),
                        BinOp::Mul => Float(a * b),
                        BinOp::Div => Float(a / b),
                        BinOp::Mod => Float(a % b),
                        _ => return Err(self.unsupported("operator", location)),
                    },
                    _ => return Err(self.unsupported("operator operands", location)),
                }
            }
        };

        Ok(result)
    }

    fn compare(&self, op: BinOp, l: Value, r: Value, location: TextLocation) -> EvalResult<Value> {
        use std::cmp::Ordering;

        let ordering: Option<Ordering> = match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Char(a), Value::Char(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => {
                if values_reference_kind(&l) && values_reference_kind(&r) {
                    let equal = values_equal(&l, &r);
                    return match op {
                        BinOp::Eq => Ok(Value::Bool(equal)),
                        BinOp::NotEq => Ok(Value::Bool(!equal)),
                        _ => Err(self.unsupported("reference comparison", location)),
                    };
                }
                match promote_pair(l.clone(), r.clone()) {
                    Some((Value::Double(a), Value::Double(b))) => a.partial_cmp(&b),
                    Some((Value::Float(a), Value::Float(b))) => a.partial_cmp(&b),
                    _ => None,
                }
            }
        };

        let Some(ordering) = ordering else {
            return Err(self.unsupported("comparison operands", location));
        };

        let result = match op {
            BinOp::Eq => ordering == Ordering::Equal,
            BinOp::NotEq => ordering != Ordering::Equal,
            BinOp::Lt => ordering == Ordering::Less,
            BinOp::Gt => ordering == Ordering::Greater,
            BinOp::LtEq => ordering != Ordering::Greater,
            BinOp::GtEq => ordering != Ordering::Less,
            _ => unreachable!("compare called with a non-comparison operator"),
        };

        Ok(Value::Bool(result))
    }

    fn value_to_text(&self, value: &Value) -> String {
        match value {
            Value::Uninit => "<uninitialized>".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Char(v) => char::from_u32(*v as u32)
                .unwrap_or('\u{fffd}')
                .to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format!("{v}"),
            Value::Double(v) => format!("{v}"),
            Value::Str(s) => s.to_string(),
            Value::Boxed(inner) => self.value_to_text(inner),
            Value::Object(object) => format!(
                "[{}]",
                self.registry.class_name(object.class, self.string_table)
            ),
            Value::Array(array) => format!("[array of {}]", array.elems.borrow().len()),
        }
    }

    fn fatal(&self, msg: &str, location: TextLocation) -> CompileError {
        CompileError::eval_error(msg.to_string(), location.to_error_location(std::path::Path::new("")))
    }

    fn unsupported(&self, what: &str, location: TextLocation) -> CompileError {
        CompileError::eval_error(
            format!("unsupported construct: {what}"),
            location.to_error_location(std::path::Path::new("")),
        )
    }
}

enum Place {
    Local(LocalId),
    Field(Rc<ObjectData>, MemberRef),
    Static(MemberRef),
    Elem(Rc<ArrayData>, usize),
}

fn set_local(frame: &mut Frame, local: LocalId, value: Value) {
    let idx = local.0 as usize;
    if idx >= frame.locals.len() {
        frame.locals.resize(idx + 1, Value::Uninit);
    }
    frame.locals[idx] = value;
}

fn default_value(data_type: &DataType) -> Value {
    match data_type.strip_owned() {
        DataType::Bool => Value::Bool(false),
        DataType::Char => Value::Char(0),
        DataType::Int => Value::Int(0),
        DataType::Float => Value::Float(0.0),
        DataType::Double => Value::Double(0.0),
        _ => Value::Null,
    }
}

fn as_index(value: &Value) -> Option<usize> {
    match value {
        Value::Int(v) if *v >= 0 => Some(*v as usize),
        _ => None,
    }
}

fn promote_pair(l: Value, r: Value) -> Option<(Value, Value)> {
    use Value::*;
    let widen = |v: &Value| -> Option<f64> {
        match v {
            Int(v) => Some(*v as f64),
            Float(v) => Some(*v as f64),
            Double(v) => Some(*v),
            Char(v) => Some(*v as f64),
            _ => None,
        }
    };

    match (&l, &r) {
        (Double(_), _) | (_, Double(_)) => Some((Double(widen(&l)?), Double(widen(&r)?))),
        (Float(_), _) | (_, Float(_)) => {
            Some((Float(widen(&l)? as f32), Float(widen(&r)? as f32)))
        }
        _ => Some((Double(widen(&l)?), Double(widen(&r)?))),
    }
}

fn values_reference_kind(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Object(_) | Value::Array(_) | Value::Boxed(_)
    )
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Char(a), Value::Char(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Double(a), Value::Double(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
        (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
        (Value::Boxed(a), Value::Boxed(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

/// Drive the evaluator and surface its one fatal error, if any.
pub fn interpret(
    registry: &ClassRegistry,
    program: &CheckedProgram,
    string_table: &StringTable,
    args: &[String],
) -> Result<(), CompileError> {
    Interpreter::new(registry, program, string_table).run(args)
}
