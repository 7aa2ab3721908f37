//! Class registry and member tables.
//!
//! The parser registers classes and raw member signatures here; the
//! resolve pass binds parent pointers, fills subclass lists, adds default
//! constructors and resolves every declared type. Member lookup and
//! overload resolution walk the inheritance chain with the accessibility
//! and scoring rules the checker relies on.

use crate::compiler::ast_nodes::{AstNode, Expression, TypeExpr, TypeExprKind};
use crate::compiler::compiler_messages::compiler_errors::CompileError;
use crate::compiler::datatypes::{ConvertContext, DataType, convertible};
use crate::compiler::string_interning::{StringId, StringTable};
use crate::compiler::tokenizer::tokens::TextLocation;
use crate::settings::LIKELY_MEMBERS_PER_CLASS;
use rustc_hash::FxHashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// A member pinned to its declaring class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberRef {
    pub class: ClassId,
    pub index: u32,
}

/// Which half of a property/indexer a method key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accessor {
    Main,
    Get,
    Set,
}

/// Stable key for a checked method body; analyses memoize on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub member: MemberRef,
    pub accessor: Accessor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Protected,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamMode {
    In,
    Ref,
    Out,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: StringId,
    pub mode: ParamMode,
    pub declared: TypeExpr,
    pub data_type: DataType,
    pub location: TextLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationKind {
    This,
    Base,
}

/// `Ctor(...) : this(...)` / `: base(...)` prefix on a constructor.
#[derive(Debug, Clone)]
pub struct CtorDelegation {
    pub kind: DelegationKind,
    pub args: Vec<Expression>,
    pub location: TextLocation,
}

#[derive(Debug, Clone)]
pub struct MethodShell {
    pub params: Vec<Param>,
    pub declared_return: Option<TypeExpr>,
    pub return_type: DataType,
    /// None for abstract and extern members. The checker takes the body
    /// out while checking; emission reads the checked copy instead.
    pub body: Option<Vec<AstNode>>,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_abstract: bool,
    pub delegation: Option<CtorDelegation>,
}

impl MethodShell {
    pub fn plain(params: Vec<Param>, declared_return: Option<TypeExpr>) -> Self {
        MethodShell {
            params,
            declared_return,
            return_type: DataType::Void,
            body: None,
            is_static: false,
            is_virtual: false,
            is_override: false,
            is_abstract: false,
            delegation: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MemberKind {
    Field {
        declared: TypeExpr,
        data_type: DataType,
        is_static: bool,
        is_const: bool,
        init: Option<Expression>,
    },
    Method(MethodShell),
    Constructor(MethodShell),
    Property {
        declared: TypeExpr,
        data_type: DataType,
        is_static: bool,
        getter: Option<MethodShell>,
        setter: Option<MethodShell>,
    },
    Indexer {
        declared: TypeExpr,
        data_type: DataType,
        index_param: Param,
        getter: Option<MethodShell>,
        setter: Option<MethodShell>,
    },
}

#[derive(Debug, Clone)]
pub struct Member {
    pub name: StringId,
    pub access: Access,
    pub kind: MemberKind,
    pub location: TextLocation,
}

impl Member {
    pub fn is_field(&self) -> bool {
        matches!(self.kind, MemberKind::Field { .. })
    }

    pub fn shell(&self, accessor: Accessor) -> Option<&MethodShell> {
        match (&self.kind, accessor) {
            (MemberKind::Method(shell), Accessor::Main) => Some(shell),
            (MemberKind::Constructor(shell), Accessor::Main) => Some(shell),
            (MemberKind::Property { getter, .. }, Accessor::Get) => getter.as_ref(),
            (MemberKind::Property { setter, .. }, Accessor::Set) => setter.as_ref(),
            (MemberKind::Indexer { getter, .. }, Accessor::Get) => getter.as_ref(),
            (MemberKind::Indexer { setter, .. }, Accessor::Set) => setter.as_ref(),
            _ => None,
        }
    }

    pub fn shell_mut(&mut self, accessor: Accessor) -> Option<&mut MethodShell> {
        match (&mut self.kind, accessor) {
            (MemberKind::Method(shell), Accessor::Main) => Some(shell),
            (MemberKind::Constructor(shell), Accessor::Main) => Some(shell),
            (MemberKind::Property { getter, .. }, Accessor::Get) => getter.as_mut(),
            (MemberKind::Property { setter, .. }, Accessor::Set) => setter.as_mut(),
            (MemberKind::Indexer { getter, .. }, Accessor::Get) => getter.as_mut(),
            (MemberKind::Indexer { setter, .. }, Accessor::Set) => setter.as_mut(),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Class {
    pub id: ClassId,
    pub name: StringId,
    pub src_file: PathBuf,
    pub location: TextLocation,

    pub parent: Option<ClassId>,
    pub parent_name: Option<(StringId, TextLocation)>,
    pub subclasses: Vec<ClassId>,

    pub is_abstract: bool,
    pub is_extern: bool,
    pub is_public: bool,

    pub members: Vec<Member>,

    // Derived during checking, honored at emission.
    pub virtual_needed: bool,
    pub object_inheritance_needed: bool,
    pub pool_destroy_needed: bool,
}

/// Free functions available without qualification in any method body.
/// These are the compiler's window on the runtime library surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFn {
    Print,
    PrintLine,
    ReadLine,
    Exit,
    Sqrt,
    Abs,
}

impl BuiltinFn {
    pub fn from_name(name: &str) -> Option<BuiltinFn> {
        Some(match name {
            "Print" => BuiltinFn::Print,
            "PrintLine" => BuiltinFn::PrintLine,
            "ReadLine" => BuiltinFn::ReadLine,
            "Exit" => BuiltinFn::Exit,
            "Sqrt" => BuiltinFn::Sqrt,
            "Abs" => BuiltinFn::Abs,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinFn::Print => "Print",
            BuiltinFn::PrintLine => "PrintLine",
            BuiltinFn::ReadLine => "ReadLine",
            BuiltinFn::Exit => "Exit",
            BuiltinFn::Sqrt => "Sqrt",
            BuiltinFn::Abs => "Abs",
        }
    }
}

/// How a member lookup failed, for diagnostics at the call site.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupError {
    NotFound,
    NoMatchingOverload,
    Ambiguous,
    Inaccessible,
}

const INACCESSIBLE_PENALTY: u32 = 100;

pub struct ClassRegistry {
    pub classes: Vec<Class>,
    by_name: FxHashMap<StringId, ClassId>,

    pub object_class: ClassId,
    pub string_class: ClassId,
    pub array_class: ClassId,
    pub pool_class: ClassId,
}

impl ClassRegistry {
    pub fn with_builtins(string_table: &mut StringTable) -> Self {
        let mut registry = ClassRegistry {
            classes: Vec::new(),
            by_name: FxHashMap::default(),
            object_class: ClassId(0),
            string_class: ClassId(0),
            array_class: ClassId(0),
            pool_class: ClassId(0),
        };

        // The root object class has no parent; everything else built in
        // hangs off it.
        registry.object_class = registry.add_builtin_class("Object", None, string_table);
        let object = registry.object_class;
        registry.string_class = registry.add_builtin_class("String", Some(object), string_table);
        registry.array_class = registry.add_builtin_class("Array", Some(object), string_table);
        registry.pool_class = registry.add_builtin_class("Pool", Some(object), string_table);

        registry
    }

    fn add_builtin_class(
        &mut self,
        name: &str,
        parent: Option<ClassId>,
        string_table: &mut StringTable,
    ) -> ClassId {
        let name_id = string_table.intern(name);
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(Class {
            id,
            name: name_id,
            src_file: PathBuf::new(),
            location: TextLocation::default(),
            parent,
            parent_name: None,
            subclasses: Vec::new(),
            is_abstract: false,
            is_extern: true,
            is_public: true,
            members: Vec::new(),
            virtual_needed: false,
            object_inheritance_needed: false,
            pool_destroy_needed: false,
        });
        self.by_name.insert(name_id, id);
        if let Some(parent) = parent {
            self.classes[parent.0 as usize].subclasses.push(id);
        }
        id
    }

    /// Register a user class parsed from `src_file`. Duplicate names are
    /// a rule error reported by the parser.
    pub fn declare_class(
        &mut self,
        name: StringId,
        src_file: PathBuf,
        location: TextLocation,
    ) -> Result<ClassId, ClassId> {
        if let Some(&existing) = self.by_name.get(&name) {
            return Err(existing);
        }

        let id = ClassId(self.classes.len() as u32);
        self.classes.push(Class {
            id,
            name,
            src_file,
            location,
            parent: None,
            parent_name: None,
            subclasses: Vec::new(),
            is_abstract: false,
            is_extern: false,
            is_public: false,
            members: Vec::with_capacity(LIKELY_MEMBERS_PER_CLASS),
            virtual_needed: false,
            object_inheritance_needed: false,
            pool_destroy_needed: false,
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    #[cfg(test)]
    pub fn declare_test_class(
        &mut self,
        name: &str,
        parent: Option<ClassId>,
        string_table: &mut StringTable,
    ) -> ClassId {
        let name_id = string_table.intern(name);
        let id = self
            .declare_class(name_id, PathBuf::from("test.opl"), TextLocation::default())
            .expect("test class name collision");
        self.classes[id.0 as usize].parent = Some(parent.unwrap_or(self.object_class));
        let parent_id = self.classes[id.0 as usize].parent.unwrap();
        self.classes[parent_id.0 as usize].subclasses.push(id);
        id
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0 as usize]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0 as usize]
    }

    pub fn class_by_name(&self, name: StringId) -> Option<ClassId> {
        self.by_name.get(&name).copied()
    }

    pub fn class_name<'a>(&self, id: ClassId, string_table: &'a StringTable) -> &'a str {
        string_table.resolve(self.class(id).name)
    }

    pub fn member(&self, member: MemberRef) -> &Member {
        &self.class(member.class).members[member.index as usize]
    }

    pub fn member_mut(&mut self, member: MemberRef) -> &mut Member {
        &mut self.classes[member.class.0 as usize].members[member.index as usize]
    }

    pub fn is_object(&self, t: &DataType) -> bool {
        matches!(t, DataType::Class(id) if *id == self.object_class)
    }

    pub fn mark_virtual_needed(&mut self, id: ClassId) {
        self.class_mut(id).virtual_needed = true;
    }

    pub fn mark_object_inheritance_needed(&mut self, id: ClassId) {
        self.class_mut(id).object_inheritance_needed = true;
    }

    pub fn mark_pool_destroy_needed(&mut self, id: ClassId) {
        // Pool destruction is a whole-subtree property: the pool may hold
        // any subclass behind a base pointer.
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let class = self.class_mut(current);
            if class.pool_destroy_needed {
                continue;
            }
            class.pool_destroy_needed = true;
            stack.extend(self.class(current).subclasses.iter().copied());
        }
    }

    /// Subtype-or-equal among reference types. Value types only relate
    /// to themselves. Every reference type sits under the root object
    /// class even when its emitted form avoids the base until a
    /// conversion demands it.
    pub fn is_subtype(&self, s: &DataType, d: &DataType) -> bool {
        if s == d {
            return true;
        }

        if self.is_object(d) {
            return s.is_reference();
        }

        match (s, d) {
            (DataType::Class(a), DataType::Class(b)) => self.class_chain_contains(*a, *b),
            (DataType::Array(_), DataType::Class(b)) => {
                self.class_chain_contains(self.array_class, *b)
            }
            (DataType::Str, DataType::Class(b)) => {
                self.class_chain_contains(self.string_class, *b)
            }
            (DataType::Array(s_elem), DataType::Array(d_elem)) => s_elem == d_elem,
            _ => false,
        }
    }

    fn class_chain_contains(&self, start: ClassId, target: ClassId) -> bool {
        let mut current = Some(start);
        while let Some(id) = current {
            if id == target {
                return true;
            }
            current = self.class(id).parent;
        }
        false
    }

    /// The parent chain from `id` up to the root, inclusive.
    pub fn ancestry(&self, id: ClassId) -> Vec<ClassId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(class) = current {
            chain.push(class);
            current = self.class(class).parent;
        }
        chain
    }

    // ------------------------------------------------------------------
    //  Resolve pass
    // ------------------------------------------------------------------

    /// Bind parent names to ids, fill subclass lists and reject cycles.
    /// Classes without an explicit parent stay parentless: they only gain
    /// the object base later if a conversion demands it.
    pub fn bind_parents(&mut self, string_table: &StringTable) -> Vec<CompileError> {
        let mut errors = Vec::new();

        for idx in 0..self.classes.len() {
            let Some((parent_name, location)) = self.classes[idx].parent_name else {
                continue;
            };

            match self.by_name.get(&parent_name) {
                Some(&parent_id) => {
                    if parent_id == self.classes[idx].id {
                        errors.push(CompileError::new(
                            format!(
                                "Class '{}' can't inherit from itself",
                                string_table.resolve(self.classes[idx].name)
                            ),
                            location.to_error_location(&self.classes[idx].src_file),
                            crate::compiler::compiler_messages::compiler_errors::ErrorType::Rule,
                        ));
                        continue;
                    }
                    self.classes[idx].parent = Some(parent_id);
                }
                None => {
                    errors.push(CompileError::new(
                        format!("Unknown class '{}'", string_table.resolve(parent_name)),
                        location.to_error_location(&self.classes[idx].src_file),
                        crate::compiler::compiler_messages::compiler_errors::ErrorType::Rule,
                    ));
                }
            }
        }

        // Cycle check before filling subclass lists; a cycle would spin
        // every chain walk below.
        for idx in 0..self.classes.len() {
            let start = ClassId(idx as u32);
            let mut slow = Some(start);
            let mut fast = self.class(start).parent;
            while let (Some(s), Some(f)) = (slow, fast) {
                if s == f {
                    errors.push(CompileError::new(
                        format!(
                            "Inheritance cycle involving class '{}'",
                            string_table.resolve(self.classes[idx].name)
                        ),
                        self.classes[idx]
                            .location
                            .to_error_location(&self.classes[idx].src_file),
                        crate::compiler::compiler_messages::compiler_errors::ErrorType::Rule,
                    ));
                    self.classes[idx].parent = None;
                    break;
                }
                slow = self.class(s).parent;
                fast = self.class(f).parent.and_then(|p| self.class(p).parent);
            }
        }

        for idx in 0..self.classes.len() {
            let id = ClassId(idx as u32);
            if let Some(parent) = self.classes[idx].parent {
                if !self.classes[parent.0 as usize].subclasses.contains(&id) {
                    self.classes[parent.0 as usize].subclasses.push(id);
                }
            }
        }

        errors
    }

    /// Every non-extern class without a constructor gets a public
    /// parameterless one with an empty body.
    pub fn add_default_constructors(&mut self) {
        for class in &mut self.classes {
            if class.is_extern {
                continue;
            }
            let has_ctor = class
                .members
                .iter()
                .any(|m| matches!(m.kind, MemberKind::Constructor(_)));
            if has_ctor {
                continue;
            }

            let mut shell = MethodShell::plain(Vec::new(), None);
            shell.body = Some(Vec::new());
            class.members.push(Member {
                name: class.name,
                access: Access::Public,
                kind: MemberKind::Constructor(shell),
                location: class.location,
            });
        }
    }

    /// Resolve a parsed type annotation against the registered classes.
    pub fn resolve_type(
        &self,
        t: &TypeExpr,
        src_file: &std::path::Path,
        string_table: &StringTable,
    ) -> Result<DataType, CompileError> {
        Self::resolve_type_expr(&self.by_name, t, src_file, string_table)
    }

    /// Resolve a parsed type annotation to a DataType.
    pub fn resolve_type_expr(
        by_name: &FxHashMap<StringId, ClassId>,
        t: &TypeExpr,
        src_file: &std::path::Path,
        string_table: &StringTable,
    ) -> Result<DataType, CompileError> {
        let resolved = match &t.kind {
            TypeExprKind::Bool => DataType::Bool,
            TypeExprKind::Char => DataType::Char,
            TypeExprKind::Int => DataType::Int,
            TypeExprKind::Float => DataType::Float,
            TypeExprKind::Double => DataType::Double,
            TypeExprKind::Str => DataType::Str,
            TypeExprKind::Void => DataType::Void,
            TypeExprKind::Named(name) => match by_name.get(name) {
                Some(&id) => DataType::Class(id),
                None => {
                    return Err(CompileError::new(
                        format!("Unknown type '{}'", string_table.resolve(*name)),
                        t.location.to_error_location(src_file),
                        crate::compiler::compiler_messages::compiler_errors::ErrorType::Rule,
                    ));
                }
            },
            TypeExprKind::Array(elem) => {
                let elem = Self::resolve_type_expr(by_name, elem, src_file, string_table)?;
                DataType::Array(Box::new(elem))
            }
            TypeExprKind::Owned(inner) => {
                let inner = Self::resolve_type_expr(by_name, inner, src_file, string_table)?;
                if !inner.may_be_owned() {
                    return Err(CompileError::new(
                        "The owning marker '^' only applies to class and array types".to_string(),
                        t.location.to_error_location(src_file),
                        crate::compiler::compiler_messages::compiler_errors::ErrorType::Type,
                    ));
                }
                DataType::Owned(Box::new(inner))
            }
        };

        Ok(resolved)
    }

    /// Resolve every member's declared types in place.
    pub fn resolve_member_types(&mut self, string_table: &StringTable) -> Vec<CompileError> {
        let mut errors = Vec::new();
        let by_name = self.by_name.clone();

        for class in &mut self.classes {
            let src_file = class.src_file.clone();
            for member in &mut class.members {
                match &mut member.kind {
                    MemberKind::Field {
                        declared,
                        data_type,
                        ..
                    } => {
                        match Self::resolve_type_expr(&by_name, declared, &src_file, string_table)
                        {
                            Ok(t) => *data_type = t,
                            Err(e) => errors.push(e),
                        }
                    }
                    MemberKind::Method(shell) | MemberKind::Constructor(shell) => {
                        resolve_shell_types(&by_name, shell, &src_file, string_table, &mut errors);
                    }
                    MemberKind::Property {
                        declared,
                        data_type,
                        getter,
                        setter,
                        ..
                    } => {
                        match Self::resolve_type_expr(&by_name, declared, &src_file, string_table)
                        {
                            Ok(t) => *data_type = t,
                            Err(e) => errors.push(e),
                        }
                        for shell in getter.iter_mut().chain(setter.iter_mut()) {
                            resolve_shell_types(
                                &by_name,
                                shell,
                                &src_file,
                                string_table,
                                &mut errors,
                            );
                            shell.return_type = data_type.clone();
                        }
                        if let Some(setter) = setter {
                            setter.return_type = DataType::Void;
                        }
                    }
                    MemberKind::Indexer {
                        declared,
                        data_type,
                        index_param,
                        getter,
                        setter,
                    } => {
                        match Self::resolve_type_expr(&by_name, declared, &src_file, string_table)
                        {
                            Ok(t) => *data_type = t,
                            Err(e) => errors.push(e),
                        }
                        match Self::resolve_type_expr(
                            &by_name,
                            &index_param.declared,
                            &src_file,
                            string_table,
                        ) {
                            Ok(t) => index_param.data_type = t,
                            Err(e) => errors.push(e),
                        }
                        for shell in getter.iter_mut().chain(setter.iter_mut()) {
                            resolve_shell_types(
                                &by_name,
                                shell,
                                &src_file,
                                string_table,
                                &mut errors,
                            );
                            shell.return_type = data_type.clone();
                        }
                        if let Some(setter) = setter {
                            setter.return_type = DataType::Void;
                        }
                    }
                }
            }
        }

        errors
    }

    // ------------------------------------------------------------------
    //  Member lookup
    // ------------------------------------------------------------------

    fn accessible(&self, member: &Member, owner: ClassId, from: Option<ClassId>) -> bool {
        match member.access {
            Access::Public => true,
            Access::Private => from == Some(owner),
            Access::Protected => match from {
                Some(from) => self.class_chain_contains(from, owner),
                None => false,
            },
        }
    }

    /// Find a field or property by name along the inheritance chain.
    pub fn find_value_member(
        &self,
        class: ClassId,
        name: StringId,
        from: Option<ClassId>,
    ) -> Result<MemberRef, LookupError> {
        let mut saw_inaccessible = false;

        for owner in self.ancestry(class) {
            for (index, member) in self.class(owner).members.iter().enumerate() {
                let is_value = matches!(
                    member.kind,
                    MemberKind::Field { .. } | MemberKind::Property { .. }
                );
                if !is_value || member.name != name {
                    continue;
                }
                if !self.accessible(member, owner, from) {
                    saw_inaccessible = true;
                    continue;
                }
                return Ok(MemberRef {
                    class: owner,
                    index: index as u32,
                });
            }
        }

        if saw_inaccessible {
            Err(LookupError::Inaccessible)
        } else {
            Err(LookupError::NotFound)
        }
    }

    /// Find an indexer whose index parameter accepts `index_type`.
    pub fn find_indexer(
        &self,
        class: ClassId,
        index_type: &DataType,
        from: Option<ClassId>,
    ) -> Result<MemberRef, LookupError> {
        for owner in self.ancestry(class) {
            for (index, member) in self.class(owner).members.iter().enumerate() {
                let MemberKind::Indexer { index_param, .. } = &member.kind else {
                    continue;
                };
                if !convertible(
                    self,
                    index_type,
                    &index_param.data_type,
                    ConvertContext::MethodArg,
                    false,
                    false,
                ) {
                    continue;
                }
                if !self.accessible(member, owner, from) {
                    return Err(LookupError::Inaccessible);
                }
                return Ok(MemberRef {
                    class: owner,
                    index: index as u32,
                });
            }
        }

        Err(LookupError::NotFound)
    }

    /// Overload resolution for a method call.
    ///
    /// Candidates along the chain are scored: an arity or argument
    /// mismatch adds one per argument, inaccessibility adds a flat
    /// penalty. The search stops at the first depth that produces a
    /// clean candidate; two clean candidates at one depth is ambiguous.
    /// Members marked `override` are skipped so resolution always targets
    /// the declared member.
    pub fn resolve_method_call(
        &self,
        class: ClassId,
        name: StringId,
        args: &[DataType],
        arg_modes: &[ParamMode],
        from: Option<ClassId>,
    ) -> Result<MemberRef, LookupError> {
        let mut best: Option<(u32, MemberRef)> = None;
        let mut found_any = false;

        for owner in self.ancestry(class) {
            let mut clean_at_depth: Vec<MemberRef> = Vec::new();

            for (index, member) in self.class(owner).members.iter().enumerate() {
                let MemberKind::Method(shell) = &member.kind else {
                    continue;
                };
                if member.name != name || shell.is_override {
                    continue;
                }
                found_any = true;

                let mut score = self.score_call(&shell.params, args, arg_modes);
                if !self.accessible(member, owner, from) {
                    score += INACCESSIBLE_PENALTY;
                }

                let candidate = MemberRef {
                    class: owner,
                    index: index as u32,
                };

                if score == 0 {
                    clean_at_depth.push(candidate);
                } else if best.map(|(s, _)| score < s).unwrap_or(true) {
                    best = Some((score, candidate));
                }
            }

            match clean_at_depth.len() {
                0 => {}
                1 => return Ok(clean_at_depth[0]),
                _ => return Err(LookupError::Ambiguous),
            }
        }

        match best {
            Some((score, _)) if score >= INACCESSIBLE_PENALTY => Err(LookupError::Inaccessible),
            Some((_, member)) => Ok(member),
            None if found_any => Err(LookupError::NoMatchingOverload),
            None => Err(LookupError::NotFound),
        }
    }

    /// Constructor lookup never walks the chain; it only scores the
    /// declaring class's constructors.
    pub fn resolve_constructor(
        &self,
        class: ClassId,
        args: &[DataType],
        arg_modes: &[ParamMode],
        from: Option<ClassId>,
    ) -> Result<MemberRef, LookupError> {
        let mut clean: Vec<MemberRef> = Vec::new();
        let mut best: Option<(u32, MemberRef)> = None;
        let mut found_any = false;

        for (index, member) in self.class(class).members.iter().enumerate() {
            let MemberKind::Constructor(shell) = &member.kind else {
                continue;
            };
            found_any = true;

            let mut score = self.score_call(&shell.params, args, arg_modes);
            if !self.accessible(member, class, from) {
                score += INACCESSIBLE_PENALTY;
            }

            let candidate = MemberRef {
                class,
                index: index as u32,
            };

            if score == 0 {
                clean.push(candidate);
            } else if best.map(|(s, _)| score < s).unwrap_or(true) {
                best = Some((score, candidate));
            }
        }

        match clean.len() {
            1 => return Ok(clean[0]),
            n if n > 1 => return Err(LookupError::Ambiguous),
            _ => {}
        }

        match best {
            Some((score, _)) if score >= INACCESSIBLE_PENALTY => Err(LookupError::Inaccessible),
            Some((_, member)) => Ok(member),
            None if found_any => Err(LookupError::NoMatchingOverload),
            None => Err(LookupError::NotFound),
        }
    }

    fn score_call(&self, params: &[Param], args: &[DataType], arg_modes: &[ParamMode]) -> u32 {
        if params.len() != args.len() {
            return INACCESSIBLE_PENALTY + params.len().abs_diff(args.len()) as u32;
        }

        let mut mismatches = 0u32;
        for (i, param) in params.iter().enumerate() {
            let arg_mode = arg_modes.get(i).copied().unwrap_or(ParamMode::In);
            if param.mode != arg_mode {
                mismatches += 1;
                continue;
            }
            let matches = match param.mode {
                // ref/out demand the exact storage type
                ParamMode::Ref | ParamMode::Out => args[i] == param.data_type,
                ParamMode::In => convertible(
                    self,
                    &args[i],
                    &param.data_type,
                    ConvertContext::MethodArg,
                    false,
                    false,
                ),
            };
            if !matches {
                mismatches += 1;
            }
        }

        mismatches
    }

    /// The base declaration a member overrides, if any: same name, same
    /// kind, found on an ancestor.
    pub fn find_overridden(&self, member: MemberRef) -> Option<MemberRef> {
        let decl = self.member(member);
        let mut current = self.class(member.class).parent;

        while let Some(owner) = current {
            for (index, candidate) in self.class(owner).members.iter().enumerate() {
                if candidate.name != decl.name {
                    continue;
                }
                let same_kind = matches!(
                    (&candidate.kind, &decl.kind),
                    (MemberKind::Method(_), MemberKind::Method(_))
                        | (MemberKind::Property { .. }, MemberKind::Property { .. })
                        | (MemberKind::Indexer { .. }, MemberKind::Indexer { .. })
                );
                if same_kind {
                    return Some(MemberRef {
                        class: owner,
                        index: index as u32,
                    });
                }
            }
            current = self.class(owner).parent;
        }

        None
    }
}

fn resolve_shell_types(
    by_name: &FxHashMap<StringId, ClassId>,
    shell: &mut MethodShell,
    src_file: &std::path::Path,
    string_table: &StringTable,
    errors: &mut Vec<CompileError>,
) {
    for param in &mut shell.params {
        match ClassRegistry::resolve_type_expr(by_name, &param.declared, src_file, string_table) {
            Ok(t) => {
                // Transfer through a ref parameter is an explicit take,
                // so the boundary type itself is never owning.
                if t.is_owned() && param.mode != ParamMode::In {
                    errors.push(CompileError::new(
                        "ref and out parameters can't have an owning type".to_string(),
                        param.location.to_error_location(src_file),
                        crate::compiler::compiler_messages::compiler_errors::ErrorType::Type,
                    ));
                }
                param.data_type = t;
            }
            Err(e) => errors.push(e),
        }
    }

    match &shell.declared_return {
        Some(declared) => {
            match ClassRegistry::resolve_type_expr(by_name, declared, src_file, string_table) {
                Ok(t) => shell.return_type = t,
                Err(e) => errors.push(e),
            }
        }
        None => shell.return_type = DataType::Void,
    }
}
