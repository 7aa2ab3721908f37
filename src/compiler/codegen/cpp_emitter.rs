//! Lowers the checked program to one C++ translation unit.
//!
//! The unit is laid out the way a hand-written one would be: feature
//! macros, includes, forward declarations, class declarations in
//! parent-before-child order, out-of-line definitions, and a main()
//! delegating to the discovered entry method.
//!
//! Storage shapes follow the analyses: owning fields and locals become
//! opal::Own, strings opal::Str, root-object storage the hybrid
//! handles, flagged locals opal::Ptr, and everything else stays a raw
//! pointer. Owning temporaries are pinned at their use site and die at
//! the end of the statement.

use crate::compiler::ast_nodes::{
    AstNode, BinOp, Binding, Callee, CallTarget, Expression, ExpressionKind, LogicalOp, NodeKind,
    SwitchLabel, UnaryOp,
};
use crate::compiler::cfg::{LocalId, LocalKind};
use crate::compiler::checker::{CheckedMethod, CheckedProgram};
use crate::compiler::datatypes::DataType;
use crate::compiler::registry::{
    Accessor, ClassId, ClassRegistry, DelegationKind, Member, MemberKind, MemberRef, MethodKey,
    MethodShell, ParamMode,
};
use crate::compiler::string_interning::StringTable;
use crate::settings::{Config, RUNTIME_HEADER_NAME};
use rustc_hash::FxHashSet;

pub fn emit_program(
    registry: &ClassRegistry,
    program: &CheckedProgram,
    string_table: &StringTable,
    config: &Config,
) -> String {
    let mut emitter = CppEmitter::new(registry, program, string_table, config);
    emitter.emit_unit();
    emitter.out
}

struct CppEmitter<'a> {
    registry: &'a ClassRegistry,
    program: &'a CheckedProgram,
    string_table: &'a StringTable,
    config: &'a Config,

    out: String,
    indent: usize,

    /// Classes whose constructors delegate with `this(...)` get the
    /// `_Construct` forwarder split.
    needs_construct: FxHashSet<ClassId>,
}

impl<'a> CppEmitter<'a> {
    fn new(
        registry: &'a ClassRegistry,
        program: &'a CheckedProgram,
        string_table: &'a StringTable,
        config: &'a Config,
    ) -> Self {
        let mut needs_construct = FxHashSet::default();
        for method in &program.methods {
            if matches!(method.delegation, Some((DelegationKind::This, ..))) {
                needs_construct.insert(method.class_id);
            }
        }

        CppEmitter {
            registry,
            program,
            string_table,
            config,
            out: String::new(),
            indent: 0,
            needs_construct,
        }
    }

    // ------------------------------------------------------------------
    //  Output helpers
    // ------------------------------------------------------------------

    fn emit_line(&mut self, line: &str) {
        if line.is_empty() {
            self.out.push('\n');
            return;
        }
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(line);
        self.out.push('\n');
    }

    fn open_block(&mut self, header: &str) {
        self.emit_line(header);
        self.indent += 1;
    }

    fn close_block(&mut self, footer: &str) {
        self.indent -= 1;
        self.emit_line(footer);
    }

    // ------------------------------------------------------------------
    //  Unit layout
    // ------------------------------------------------------------------

    fn emit_unit(&mut self) {
        self.emit_prologue();
        self.emit_forward_decls();
        self.emit_class_decls();
        self.emit_definitions();
        self.emit_entry_point();
    }

    fn emit_prologue(&mut self) {
        self.emit_line("// Generated by opalc. Do not edit.");
        self.emit_line(&format!(
            "#define OPAL_SAFE {}",
            if self.config.unsafe_mode { 0 } else { 1 }
        ));
        self.emit_line(&format!(
            "#define OPAL_PROFILE {}",
            if self.config.profile_refcounts { 1 } else { 0 }
        ));
        self.emit_line(&format!(
            "#define OPAL_CRT_ALLOC {}",
            if self.config.use_crt_allocator { 1 } else { 0 }
        ));
        self.emit_line(&format!("#include \"{RUNTIME_HEADER_NAME}\""));

        for include in &self.config.include_files {
            self.emit_line(&format!("#include \"{}\"", include.display()));
        }

        self.emit_line("");
        self.emit_line("#if OPAL_PROFILE");
        self.emit_line("namespace opal { long g_incs = 0; long g_decs = 0; }");
        self.emit_line("#endif");
        self.emit_line("");
    }

    fn user_classes(&self) -> Vec<ClassId> {
        // Parent before child: walk the subclass tree from the roots.
        let mut ordered = Vec::new();
        let mut stack: Vec<ClassId> = self
            .registry
            .classes
            .iter()
            .filter(|c| {
                !c.is_extern
                    && c.parent
                        .map(|p| self.registry.class(p).is_extern)
                        .unwrap_or(true)
            })
            .map(|c| c.id)
            .collect();
        stack.reverse();

        while let Some(id) = stack.pop() {
            ordered.push(id);
            let mut subclasses = self.registry.class(id).subclasses.clone();
            subclasses.reverse();
            for sub in subclasses {
                if !self.registry.class(sub).is_extern {
                    stack.push(sub);
                }
            }
        }

        ordered
    }

    fn emit_forward_decls(&mut self) {
        for class in self.user_classes() {
            let name = self.class_name(class);
            self.emit_line(&format!("class {name};"));
        }
        self.emit_line("");
    }

    fn emit_class_decls(&mut self) {
        for class in self.user_classes() {
            self.emit_class_decl(class);
            self.emit_line("");
        }
    }

    fn emit_definitions(&mut self) {
        for class in self.user_classes() {
            self.emit_static_definitions(class);
            self.emit_method_definitions(class);
        }
    }

    // ------------------------------------------------------------------
    //  Names and types
    // ------------------------------------------------------------------

    fn class_name(&self, id: ClassId) -> String {
        sanitize(self.registry.class_name(id, self.string_table))
    }

    fn member_name(&self, member: MemberRef) -> String {
        sanitize(
            self.string_table
                .resolve(self.registry.member(member).name),
        )
    }

    fn base_spec(&self, class: ClassId) -> String {
        let data = self.registry.class(class);
        match data.parent {
            Some(parent) if !self.registry.class(parent).is_extern => {
                format!("public {}", self.class_name(parent))
            }
            _ => {
                if data.object_inheritance_needed || data.virtual_needed {
                    "public opal::Object".to_string()
                } else {
                    "public opal::Plain".to_string()
                }
            }
        }
    }

    /// The C++ spelling of a declared type in each storage position.
    fn cpp_type(&self, data_type: &DataType, position: Position) -> String {
        match data_type {
            DataType::Bool => "bool".to_string(),
            DataType::Char => "char16_t".to_string(),
            DataType::Int => "int".to_string(),
            DataType::Float => "float".to_string(),
            DataType::Double => "double".to_string(),
            DataType::Void => "void".to_string(),
            DataType::Null => "void*".to_string(),
            DataType::Str => "opal::Str".to_string(),

            DataType::Class(id) if *id == self.registry.object_class => match position {
                Position::Return => "opal::Object*".to_string(),
                _ => "opal::OwnOrCounted<opal::Object>".to_string(),
            },

            DataType::Class(id) => {
                let name = self.class_name(*id);
                match position {
                    Position::Local { needs_ref: true } => format!("opal::Ptr<{name}>"),
                    _ => format!("{name}*"),
                }
            }

            DataType::Array(elem) => {
                let elem = self.cpp_elem_type(elem);
                match position {
                    Position::Local { needs_ref: true } => format!("opal::Ptr<opal::Array<{elem}>>"),
                    _ => format!("opal::Array<{elem}>*"),
                }
            }

            DataType::Owned(inner) => {
                let base = self.cpp_base_type(inner);
                match position {
                    // Ownership returns as a raw pointer the caller binds.
                    Position::Return => format!("{base}*"),
                    _ => format!("opal::Own<{base}>"),
                }
            }
        }
    }

    /// The bare C++ class behind a reference type (for handle template
    /// arguments).
    fn cpp_base_type(&self, data_type: &DataType) -> String {
        match data_type.strip_owned() {
            DataType::Class(id) if *id == self.registry.object_class => {
                "opal::Object".to_string()
            }
            DataType::Class(id) => self.class_name(*id),
            DataType::Array(elem) => format!("opal::Array<{}>", self.cpp_elem_type(elem)),
            DataType::Str => "opal::StrData".to_string(),
            other => self.cpp_type(other, Position::Value),
        }
    }

    /// Array element storage.
    fn cpp_elem_type(&self, elem: &DataType) -> String {
        match elem {
            DataType::Owned(inner) => format!("opal::Own<{}>", self.cpp_base_type(inner)),
            other => self.cpp_type(other, Position::Field),
        }
    }

    fn local_type(&self, method: &CheckedMethod, local: LocalId) -> String {
        let entry = &method.locals[local.0 as usize];
        match entry.kind {
            LocalKind::Param(ParamMode::Ref | ParamMode::Out) => {
                format!("{}&", self.cpp_type(&entry.data_type, Position::Field))
            }
            _ => self.cpp_type(
                &entry.data_type,
                Position::Local {
                    needs_ref: entry.needs_ref,
                },
            ),
        }
    }

    fn local_name(&self, method: &CheckedMethod, local: LocalId) -> String {
        sanitize(self.string_table.resolve(method.locals[local.0 as usize].name))
    }

    // ------------------------------------------------------------------
    //  Class declarations
    // ------------------------------------------------------------------

    fn emit_class_decl(&mut self, class: ClassId) {
        let name = self.class_name(class);
        let base = self.base_spec(class);
        self.open_block(&format!("class {name} : {base} {{"));

        let data = self.registry.class(class);
        let mut current_access: Option<crate::compiler::registry::Access> = None;

        for (index, member) in data.members.iter().enumerate() {
            if current_access != Some(member.access) {
                self.indent -= 1;
                let label = match member.access {
                    crate::compiler::registry::Access::Public => "public:",
                    crate::compiler::registry::Access::Protected => "protected:",
                    crate::compiler::registry::Access::Private => "private:",
                };
                self.emit_line(label);
                self.indent += 1;
                current_access = Some(member.access);
            }

            let member_ref = MemberRef {
                class,
                index: index as u32,
            };
            self.emit_member_decl(member_ref, member);
        }

        self.indent -= 1;
        self.emit_line("public:");
        self.indent += 1;

        if data.virtual_needed {
            self.emit_line(&format!("virtual ~{name}() {{ }}"));
        }

        if data.pool_destroy_needed {
            self.emit_line("static void _DestroyFirst(void* obj);");
            self.emit_line("static void _DestroySecond(void* obj);");
        }

        if self.ctor_count(class) > 1 {
            self.indent -= 1;
            self.emit_line("private:");
            self.indent += 1;
            self.emit_line("void _Init();");
        }
        if self.needs_construct.contains(&class) {
            for member in &data.members {
                let MemberKind::Constructor(shell) = &member.kind else {
                    continue;
                };
                let params = self.param_list(shell);
                self.emit_line(&format!("void _Construct({params});"));
            }
        }

        self.close_block("};");
    }

    fn emit_member_decl(&mut self, member_ref: MemberRef, member: &Member) {
        let name = sanitize(self.string_table.resolve(member.name));

        match &member.kind {
            MemberKind::Field {
                data_type,
                is_static,
                is_const,
                ..
            } => {
                let cpp = self.cpp_type(data_type, Position::Field);
                let prefix = match (is_static, is_const) {
                    (_, true) => "static const ",
                    (true, false) => "static ",
                    (false, false) => "",
                };
                self.emit_line(&format!("{prefix}{cpp} {name};"));
            }

            MemberKind::Method(shell) => {
                let ret = self.cpp_type(&shell.return_type, Position::Return);
                let params = self.param_list(shell);
                let prefix = if shell.is_static {
                    "static "
                } else if shell.is_virtual && !shell.is_override {
                    "virtual "
                } else {
                    ""
                };
                let suffix = if shell.is_abstract {
                    " = 0;"
                } else if shell.is_override {
                    " override;"
                } else {
                    ";"
                };
                self.emit_line(&format!("{prefix}{ret} {name}({params}){suffix}"));
            }

            MemberKind::Constructor(shell) => {
                let class_name = self.class_name(member_ref.class);
                let params = self.param_list(shell);
                self.emit_line(&format!("{class_name}({params});"));
            }

            MemberKind::Property {
                data_type,
                is_static,
                getter,
                setter,
                ..
            } => {
                let cpp = self.cpp_type(data_type, Position::Return);
                let value = self.cpp_type(data_type, Position::Field);
                for (accessor, shell) in
                    [(Accessor::Get, getter), (Accessor::Set, setter)]
                {
                    let Some(shell) = shell else { continue };
                    let prefix = if *is_static {
                        "static "
                    } else if shell.is_virtual && !shell.is_override {
                        "virtual "
                    } else {
                        ""
                    };
                    let suffix = if shell.is_abstract {
                        " = 0;"
                    } else if shell.is_override {
                        " override;"
                    } else {
                        ";"
                    };
                    match accessor {
                        Accessor::Get => {
                            self.emit_line(&format!("{prefix}{cpp} get_{name}(){suffix}"))
                        }
                        _ => self.emit_line(&format!(
                            "{prefix}void set_{name}({value} value){suffix}"
                        )),
                    }
                }
            }

            MemberKind::Indexer {
                data_type,
                index_param,
                getter,
                setter,
                ..
            } => {
                let cpp = self.cpp_type(data_type, Position::Return);
                let value = self.cpp_type(data_type, Position::Field);
                let index_type = self.cpp_type(&index_param.data_type, Position::Field);
                let index_name = sanitize(self.string_table.resolve(index_param.name));
                for (accessor, shell) in
                    [(Accessor::Get, getter), (Accessor::Set, setter)]
                {
                    let Some(shell) = shell else { continue };
                    let prefix = if shell.is_virtual && !shell.is_override {
                        "virtual "
                    } else {
                        ""
                    };
                    let suffix = if shell.is_abstract {
                        " = 0;"
                    } else if shell.is_override {
                        " override;"
                    } else {
                        ";"
                    };
                    match accessor {
                        Accessor::Get => self.emit_line(&format!(
                            "{prefix}{cpp} getItem({index_type} {index_name}){suffix}"
                        )),
                        _ => self.emit_line(&format!(
                            "{prefix}void setItem({index_type} {index_name}, {value} value){suffix}"
                        )),
                    }
                }
            }
        }
    }

    fn param_list(&self, shell: &MethodShell) -> String {
        shell
            .params
            .iter()
            .map(|p| {
                let name = sanitize(self.string_table.resolve(p.name));
                let cpp = match p.mode {
                    ParamMode::Ref | ParamMode::Out => {
                        format!("{}&", self.cpp_type(&p.data_type, Position::Field))
                    }
                    ParamMode::In => self.cpp_type(&p.data_type, Position::Param),
                };
                format!("{cpp} {name}")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn ctor_count(&self, class: ClassId) -> usize {
        self.registry
            .class(class)
            .members
            .iter()
            .filter(|m| matches!(m.kind, MemberKind::Constructor(_)))
            .count()
    }

    // ------------------------------------------------------------------
    //  Definitions
    // ------------------------------------------------------------------

    fn emit_static_definitions(&mut self, class: ClassId) {
        let class_name = self.class_name(class);

        for (index, member) in self.registry.class(class).members.iter().enumerate() {
            let MemberKind::Field {
                data_type,
                is_static,
                is_const,
                ..
            } = &member.kind
            else {
                continue;
            };
            if !is_static && !is_const {
                continue;
            }

            let member_ref = MemberRef {
                class,
                index: index as u32,
            };
            let name = sanitize(self.string_table.resolve(member.name));
            let cpp = self.cpp_type(data_type, Position::Field);
            let init = self
                .field_init(member_ref)
                .map(|expr| {
                    let dummy = self.empty_method(class);
                    self.emit_converted(expr, data_type, &dummy)
                })
                .unwrap_or_else(|| self.zero_value(data_type));
            let prefix = if *is_const { "const " } else { "" };
            self.emit_line(&format!("{prefix}{cpp} {class_name}::{name} = {init};"));
        }
    }

    fn field_init(&self, member: MemberRef) -> Option<&Expression> {
        self.program
            .field_inits
            .iter()
            .find(|(m, _)| *m == member)
            .map(|(_, e)| e)
    }

    /// Placeholder method context for expressions outside any body
    /// (static field initializers reference no locals).
    fn empty_method(&self, class: ClassId) -> CheckedMethod {
        CheckedMethod {
            key: MethodKey {
                member: MemberRef { class, index: 0 },
                accessor: Accessor::Main,
            },
            class_id: class,
            name: self.registry.class(class).name,
            location: Default::default(),
            src_file: Default::default(),
            graph: Default::default(),
            exit: crate::compiler::cfg::FlowId(0),
            locals: Vec::new(),
            param_count: 0,
            body: Vec::new(),
            temps: Vec::new(),
            calls_out: Vec::new(),
            return_type: DataType::Void,
            is_static: true,
            delegation: None,
        }
    }

    fn zero_value(&self, data_type: &DataType) -> String {
        match data_type {
            DataType::Bool => "false".to_string(),
            DataType::Char => "0".to_string(),
            DataType::Int => "0".to_string(),
            DataType::Float => "0.0f".to_string(),
            DataType::Double => "0.0".to_string(),
            DataType::Str => "opal::Str()".to_string(),
            _ => "0".to_string(),
        }
    }

    fn emit_method_definitions(&mut self, class: ClassId) {
        let class_name = self.class_name(class);

        if self.registry.class(class).pool_destroy_needed {
            self.open_block(&format!("void {class_name}::_DestroyFirst(void* obj) {{"));
            self.emit_line(&format!("{class_name}* self = ({class_name}*)obj;"));
            self.emit_line("void* vtable = opal::StashVTable(obj);");
            self.emit_line(&format!("self->~{class_name}();"));
            self.emit_line("opal::RestoreVTable(obj, vtable);");
            self.close_block("}");
            self.open_block(&format!("void {class_name}::_DestroySecond(void* obj) {{"));
            self.emit_line("#if OPAL_SAFE");
            self.emit_line(&format!(
                "if ((({class_name}*)obj)->_refs != 0) opal::Fatal(\"opal: pool object still referenced\");"
            ));
            self.emit_line("#endif");
            self.emit_line("(void)obj;");
            self.close_block("}");
            self.emit_line("");
        }

        if self.ctor_count(class) > 1 {
            self.open_block(&format!("void {class_name}::_Init() {{"));
            self.emit_instance_field_inits(class);
            self.close_block("}");
            self.emit_line("");
        }

        for (index, _) in self.registry.class(class).members.iter().enumerate() {
            let member_ref = MemberRef {
                class,
                index: index as u32,
            };
            for accessor in [Accessor::Main, Accessor::Get, Accessor::Set] {
                let key = MethodKey {
                    member: member_ref,
                    accessor,
                };
                if let Some(method) = self.program.method(key) {
                    self.emit_method_definition(method);
                }
            }
        }
    }

    fn emit_instance_field_inits(&mut self, class: ClassId) {
        for (index, member) in self.registry.class(class).members.iter().enumerate() {
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
                class,
                index: index as u32,
            };
            let name = sanitize(self.string_table.resolve(member.name));

            match self.field_init(member_ref) {
                Some(expr) => {
                    let dummy = self.empty_method(class);
                    let value = self.emit_converted(expr, data_type, &dummy);
                    self.emit_line(&format!("this->{name} = {value};"));
                }
                None => {
                    // Handles default-construct themselves; raw storage
                    // gets zeroed.
                    if matches!(
                        data_type,
                        DataType::Bool
                            | DataType::Char
                            | DataType::Int
                            | DataType::Float
                            | DataType::Double
                            | DataType::Class(_)
                            | DataType::Array(_)
                    ) {
                        self.emit_line(&format!(
                            "this->{name} = {};",
                            self.zero_value(data_type)
                        ));
                    }
                }
            }
        }
    }

    fn emit_method_definition(&mut self, method: &CheckedMethod) {
        let class_name = self.class_name(method.class_id);
        let member = self.registry.member(method.key.member);

        let params: String = method.locals[..method.param_count]
            .iter()
            .enumerate()
            .map(|(i, local)| {
                let id = LocalId(i as u32);
                format!(
                    "{} {}",
                    self.local_type(method, id),
                    sanitize(self.string_table.resolve(local.name))
                )
            })
            .collect::<Vec<_>>()
            .join(", ");

        let header = match (&member.kind, method.key.accessor) {
            (MemberKind::Constructor(_), _) => {
                let delegated_base = match &method.delegation {
                    Some((DelegationKind::Base, key, args)) => {
                        let parent_name = self.class_name(key.member.class);
                        let arg_list = self.emit_delegation_args(key, args, method);
                        format!(" : {parent_name}({arg_list})")
                    }
                    _ => String::new(),
                };
                format!("{class_name}::{class_name}({params}){delegated_base} {{")
            }
            (MemberKind::Method(shell), _) => {
                let ret = self.cpp_type(&shell.return_type, Position::Return);
                let name = sanitize(self.string_table.resolve(member.name));
                format!("{ret} {class_name}::{name}({params}) {{")
            }
            (MemberKind::Property { data_type, .. }, Accessor::Get) => {
                let ret = self.cpp_type(data_type, Position::Return);
                let name = sanitize(self.string_table.resolve(member.name));
                format!("{ret} {class_name}::get_{name}({params}) {{")
            }
            (MemberKind::Property { .. }, _) => {
                let name = sanitize(self.string_table.resolve(member.name));
                format!("void {class_name}::set_{name}({params}) {{")
            }
            (MemberKind::Indexer { data_type, .. }, Accessor::Get) => {
                let ret = self.cpp_type(data_type, Position::Return);
                format!("{ret} {class_name}::getItem({params}) {{")
            }
            (MemberKind::Indexer { .. }, _) => {
                format!("void {class_name}::setItem({params}) {{")
            }
            (MemberKind::Field { .. }, _) => return,
        };

        let is_ctor = matches!(member.kind, MemberKind::Constructor(_));
        let split_construct = is_ctor && self.needs_construct.contains(&method.class_id);

        self.open_block(&header);

        if is_ctor {
            if self.ctor_count(method.class_id) > 1 {
                if !matches!(method.delegation, Some((DelegationKind::This, ..))) {
                    self.emit_line("_Init();");
                }
            } else {
                self.emit_instance_field_inits(method.class_id);
            }
        }

        if split_construct {
            let arg_names: String = method.locals[..method.param_count]
                .iter()
                .map(|l| sanitize(self.string_table.resolve(l.name)))
                .collect::<Vec<_>>()
                .join(", ");
            self.emit_line(&format!("_Construct({arg_names});"));
            self.close_block("}");
            self.emit_line("");

            // The forwarder carries the body (and any this-delegation).
            self.open_block(&format!("void {class_name}::_Construct({params}) {{"));
            if let Some((DelegationKind::This, key, args)) = &method.delegation {
                let arg_list = self.emit_delegation_args(key, args, method);
                self.emit_line(&format!("_Construct({arg_list});"));
            }
        }

        for node in &method.body {
            self.emit_statement(node, method);
        }

        self.close_block("}");
        self.emit_line("");
    }

    fn emit_delegation_args(
        &self,
        key: &MethodKey,
        args: &[Expression],
        method: &CheckedMethod,
    ) -> String {
        let params: Vec<DataType> = self
            .registry
            .member(key.member)
            .shell(Accessor::Main)
            .map(|shell| shell.params.iter().map(|p| p.data_type.clone()).collect())
            .unwrap_or_default();

        args.iter()
            .enumerate()
            .map(|(i, arg)| match params.get(i) {
                Some(param) => self.emit_converted(arg, param, method),
                None => self.emit_expr(arg, method),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    // ------------------------------------------------------------------
    //  Statements
    // ------------------------------------------------------------------

    fn emit_statement(&mut self, node: &AstNode, method: &CheckedMethod) {
        match &node.kind {
            NodeKind::Block(nodes) => {
                self.open_block("{");
                for child in nodes {
                    self.emit_statement(child, method);
                }
                self.close_block("}");
            }

            NodeKind::VarDecl { init, local, .. } => {
                let Some(local) = local else { return };
                let cpp = self.local_type(method, *local);
                let name = self.local_name(method, *local);
                match init {
                    Some(init) => {
                        let data_type = method.locals[local.0 as usize].data_type.clone();
                        let value = self.emit_converted(init, &data_type, method);
                        self.emit_line(&format!("{cpp} {name} = {value};"));
                    }
                    None => {
                        let entry = &method.locals[local.0 as usize];
                        let raw_pointer = matches!(
                            entry.data_type,
                            DataType::Class(_) | DataType::Array(_)
                        ) && !entry.needs_ref;
                        if raw_pointer {
                            self.emit_line(&format!("{cpp} {name} = 0;"));
                        } else {
                            self.emit_line(&format!("{cpp} {name};"));
                        }
                    }
                }
            }

            NodeKind::ExprStmt(expr) => {
                let code = self.emit_expr(expr, method);
                self.emit_line(&format!("{code};"));
            }

            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond = self.emit_expr(condition, method);
                self.open_block(&format!("if ({cond}) {{"));
                self.emit_statement_body(then_branch, method);
                match else_branch {
                    Some(else_branch) => {
                        self.close_block("} else {");
                        self.indent += 1;
                        self.emit_statement_body(else_branch, method);
                        self.close_block("}");
                    }
                    None => self.close_block("}"),
                }
            }

            NodeKind::While { condition, body } => {
                let cond = self.emit_expr(condition, method);
                self.open_block(&format!("while ({cond}) {{"));
                self.emit_statement_body(body, method);
                self.close_block("}");
            }

            NodeKind::DoWhile { body, condition } => {
                self.open_block("do {");
                self.emit_statement_body(body, method);
                let cond = self.emit_expr(condition, method);
                self.close_block(&format!("}} while ({cond});"));
            }

            NodeKind::For {
                init,
                condition,
                iterator,
                body,
            } => {
                // The init statement stays in the enclosing scope, like
                // the checker treats it.
                self.open_block("{");
                if let Some(init) = init {
                    self.emit_statement(init, method);
                }
                let cond = condition
                    .as_ref()
                    .map(|c| self.emit_expr(c, method))
                    .unwrap_or_default();
                let iter = iterator
                    .as_ref()
                    .map(|i| self.emit_expr(i, method))
                    .unwrap_or_default();
                self.open_block(&format!("for (; {cond}; {iter}) {{"));
                self.emit_statement_body(body, method);
                self.close_block("}");
                self.close_block("}");
            }

            NodeKind::Foreach {
                collection,
                body,
                local,
                collection_local,
                index_local,
                ..
            } => {
                let (Some(iter_local), Some(coll_local), Some(idx_local)) =
                    (local, collection_local, index_local)
                else {
                    return;
                };

                self.open_block("{");

                let coll_type = self.local_type(method, *coll_local);
                let coll_name = format!("__c{}", coll_local.0);
                let coll_value = self.emit_expr(collection, method);
                self.emit_line(&format!("{coll_type} {coll_name} = {coll_value};"));

                let idx_name = format!("__i{}", idx_local.0);
                let is_string = matches!(
                    method.locals[coll_local.0 as usize].data_type.strip_owned(),
                    DataType::Str
                );
                let count = if is_string {
                    format!("{coll_name}.Length()")
                } else {
                    format!("{coll_name}->Count()")
                };
                self.open_block(&format!(
                    "for (int {idx_name} = 0; {idx_name} < {count}; {idx_name}++) {{"
                ));

                let iter_type = self.local_type(method, *iter_local);
                let iter_name = self.local_name(method, *iter_local);
                let element = if is_string {
                    format!("{coll_name}.At({idx_name})")
                } else {
                    format!("{coll_name}->At({idx_name})")
                };
                self.emit_line(&format!("{iter_type} {iter_name} = {element};"));

                self.emit_statement_body(body, method);
                self.close_block("}");
                self.close_block("}");
            }

            NodeKind::Switch {
                scrutinee,
                sections,
            } => {
                // switch(0) keeps break targeting the switch while
                // continue still reaches the enclosing loop; the label
                // comparisons themselves are an if chain so string and
                // non-constant labels work.
                self.open_block("switch (0) { default: {");
                let scrutinee_type = self.cpp_type(&scrutinee.data_type, Position::Field);
                let value = self.emit_expr(scrutinee, method);
                self.emit_line(&format!("{scrutinee_type} __s = {value};"));

                let mut default_section: Option<&crate::compiler::ast_nodes::SwitchSection> = None;
                let mut first = true;
                for section in sections {
                    let mut comparisons = Vec::new();
                    let mut is_default = false;
                    for label in &section.labels {
                        match label {
                            SwitchLabel::Case(case) => {
                                let case_value = self.emit_expr(case, method);
                                comparisons.push(format!("__s == ({case_value})"));
                            }
                            SwitchLabel::Default => is_default = true,
                        }
                    }
                    if is_default && comparisons.is_empty() {
                        default_section = Some(section);
                        continue;
                    }

                    let keyword = if first { "if" } else { "else if" };
                    first = false;
                    self.open_block(&format!("{keyword} ({}) {{", comparisons.join(" || ")));
                    for stmt in &section.body {
                        self.emit_statement(stmt, method);
                    }
                    self.close_block("}");
                }

                if let Some(section) = default_section {
                    if first {
                        self.open_block("{");
                    } else {
                        self.open_block("else {");
                    }
                    for stmt in &section.body {
                        self.emit_statement(stmt, method);
                    }
                    self.close_block("}");
                }

                self.close_block("} }");
            }

            NodeKind::Break => self.emit_line("break;"),
            NodeKind::Continue => self.emit_line("continue;"),

            NodeKind::Return(value) => match value {
                Some(value) => {
                    let return_type = method.return_type.clone();
                    let code = self.emit_converted(value, &return_type, method);
                    self.emit_line(&format!("return {code};"));
                }
                None => self.emit_line("return;"),
            },
        }
    }

    /// Emit a statement that syntactically needs to live inside its own
    /// braces (branch and loop bodies already opened by the caller).
    fn emit_statement_body(&mut self, node: &AstNode, method: &CheckedMethod) {
        match &node.kind {
            NodeKind::Block(nodes) => {
                for child in nodes {
                    self.emit_statement(child, method);
                }
            }
            _ => self.emit_statement(node, method),
        }
    }

    // ------------------------------------------------------------------
    //  Expressions
    // ------------------------------------------------------------------

    fn emit_expr(&self, expr: &Expression, method: &CheckedMethod) -> String {
        let inner = self.emit_expr_inner(expr, method);
        self.wrap_temp(expr, inner, method)
    }

    /// Owning temporaries get pinned at their use site: counted when
    /// the analysis said so, plainly owned otherwise, so either way they
    /// die at the end of the statement.
    fn wrap_temp(&self, expr: &Expression, inner: String, method: &CheckedMethod) -> String {
        let Some(temp) = expr.ref_temp else {
            return inner;
        };
        let span = &method.temps[temp.0 as usize];
        let base = self.cpp_base_type(&span.data_type);

        match (span.local.is_some(), span.needs_ref) {
            (false, true) => format!("opal::Tmp<{base}>({inner})"),
            (false, false) => format!("opal::Own<{base}>({inner})"),
            (true, true) => format!("opal::Pin<{base}>({inner})"),
            (true, false) => inner,
        }
    }

    fn emit_expr_inner(&self, expr: &Expression, method: &CheckedMethod) -> String {
        match &expr.kind {
            ExpressionKind::Null => "0".to_string(),
            ExpressionKind::BoolLiteral(v) => if *v { "true" } else { "false" }.to_string(),
            ExpressionKind::IntLiteral(v) => format!("{v}"),
            ExpressionKind::FloatLiteral(v) => format!("{v:?}f"),
            ExpressionKind::DoubleLiteral(v) => format!("{v:?}"),
            ExpressionKind::CharLiteral(v) => format!("(char16_t){v}"),
            ExpressionKind::StrLiteral(id) => {
                format!("opal::Str(u\"{}\")", escape_cpp(self.string_table.resolve(*id)))
            }

            ExpressionKind::This => "this".to_string(),

            ExpressionKind::Name { name, binding } => match binding {
                Binding::Local(local) => self.local_name(method, *local),
                Binding::Field(member) => format!("this->{}", self.member_name(*member)),
                Binding::StaticField(member) => format!(
                    "{}::{}",
                    self.class_name(member.class),
                    self.member_name(*member)
                ),
                Binding::Property(member) => format!("get_{}()", self.member_name(*member)),
                Binding::ClassRef(_) | Binding::Unresolved => {
                    sanitize(self.string_table.resolve(*name))
                }
            },

            ExpressionKind::FieldAccess {
                object,
                name,
                binding,
            } => {
                let object_code = self.emit_expr(object, method);
                match binding {
                    Binding::Field(member) => {
                        format!("{object_code}->{}", self.member_name(*member))
                    }
                    Binding::StaticField(member) => format!(
                        "{}::{}",
                        self.class_name(member.class),
                        self.member_name(*member)
                    ),
                    Binding::Property(member) => {
                        format!("{object_code}->get_{}()", self.member_name(*member))
                    }
                    _ => {
                        // Built-in Length / Count pseudo-members.
                        if matches!(object.data_type.strip_owned(), DataType::Str) {
                            format!("{object_code}.Length()")
                        } else if matches!(object.data_type.strip_owned(), DataType::Array(_)) {
                            format!("{object_code}->Count()")
                        } else {
                            format!(
                                "{object_code}->{}",
                                sanitize(self.string_table.resolve(*name))
                            )
                        }
                    }
                }
            }

            ExpressionKind::Index {
                object,
                index,
                indexer,
            } => {
                let object_code = self.emit_expr(object, method);
                let index_code = self.emit_expr(index, method);
                match indexer {
                    Some(member) => format!("{object_code}->getItem({index_code})"),
                    None => {
                        if matches!(object.data_type.strip_owned(), DataType::Str) {
                            format!("{object_code}.At({index_code})")
                        } else {
                            format!("{object_code}->At({index_code})")
                        }
                    }
                }
            }

            ExpressionKind::Call {
                callee,
                args,
                target,
                ..
            } => self.emit_call(callee, args, target, method),

            ExpressionKind::New {
                args,
                pool,
                class_id,
                ctor,
                ..
            } => {
                let Some(class_id) = class_id else {
                    return "0".to_string();
                };
                let class_name = self.class_name(*class_id);

                let arg_list = match ctor {
                    Some(ctor) => self.emit_args_for(*ctor, args, method),
                    None => String::new(),
                };

                match pool {
                    Some(pool_expr) => {
                        let pool_code = self.emit_expr(pool_expr, method);
                        format!(
                            "new (({pool_code})->Place(sizeof({class_name}), &{class_name}::_DestroyFirst, &{class_name}::_DestroySecond)) {class_name}({arg_list})"
                        )
                    }
                    None if *class_id == self.registry.pool_class => {
                        "new opal::Pool()".to_string()
                    }
                    None => format!("new {class_name}({arg_list})"),
                }
            }

            ExpressionKind::NewArray { length, .. } => {
                let elem = match expr.data_type.strip_owned() {
                    DataType::Array(elem) => self.cpp_elem_type(elem),
                    _ => "int".to_string(),
                };
                let length_code = self.emit_expr(length, method);
                format!("opal::Array<{elem}>::Make({length_code})")
            }

            ExpressionKind::Cast { value, .. } => {
                let inner = self.emit_expr(value, method);
                self.emit_cast(value, &expr.data_type, inner)
            }

            ExpressionKind::Take(operand) => {
                let place = self.emit_expr_inner(operand, method);
                format!("{place}.Take()")
            }

            ExpressionKind::Unary { op, operand } => {
                let inner = self.emit_expr(operand, method);
                match op {
                    UnaryOp::Neg => format!("(-{inner})"),
                    UnaryOp::Not => format!("(!{inner})"),
                }
            }

            ExpressionKind::Binary { op, left, right } => {
                self.emit_binary(*op, left, right, &expr.data_type, method)
            }

            ExpressionKind::Logical { op, left, right } => {
                let l = self.emit_expr(left, method);
                let r = self.emit_expr(right, method);
                let symbol = match op {
                    LogicalOp::And => "&&",
                    LogicalOp::Or => "||",
                };
                format!("({l} {symbol} {r})")
            }

            ExpressionKind::Ternary {
                condition,
                then_value,
                else_value,
            } => {
                let c = self.emit_expr(condition, method);
                let t = self.emit_converted(then_value, &expr.data_type, method);
                let e = self.emit_converted(else_value, &expr.data_type, method);
                format!("({c} ? {t} : {e})")
            }

            ExpressionKind::Assign { target, op, value } => {
                self.emit_assignment(target, *op, value, method)
            }

            ExpressionKind::Increment { target, decrement } => {
                let place = self.emit_expr_inner(target, method);
                if *decrement {
                    format!("{place}--")
                } else {
                    format!("{place}++")
                }
            }
        }
    }

    fn emit_call(
        &self,
        callee: &Callee,
        args: &[Expression],
        target: &Option<CallTarget>,
        method: &CheckedMethod,
    ) -> String {
        match target {
            Some(CallTarget::Builtin(builtin)) => {
                let arg_list = args
                    .iter()
                    .map(|a| self.emit_expr(a, method))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("opal::{}({arg_list})", builtin.name())
            }

            Some(CallTarget::Method {
                member, is_static, ..
            }) => {
                let name = self.member_name(*member);
                let arg_list = self.emit_args_for(*member, args, method);

                match callee {
                    Callee::Name { .. } => {
                        if *is_static {
                            format!("{}::{name}({arg_list})", self.class_name(member.class))
                        } else {
                            format!("this->{name}({arg_list})")
                        }
                    }
                    Callee::Member { object, .. } => {
                        if *is_static {
                            format!("{}::{name}({arg_list})", self.class_name(member.class))
                        } else {
                            let object_code = self.emit_expr(object, method);
                            format!("{object_code}->{name}({arg_list})")
                        }
                    }
                    Callee::Base { .. } => {
                        format!("{}::{name}({arg_list})", self.class_name(member.class))
                    }
                }
            }

            None => "0".to_string(),
        }
    }

    /// Arguments converted to the callee's parameter types, with
    /// ownership transfers spelled as Take().
    fn emit_args_for(
        &self,
        member: MemberRef,
        args: &[Expression],
        method: &CheckedMethod,
    ) -> String {
        let params: Vec<(ParamMode, DataType)> = self
            .registry
            .member(member)
            .shell(Accessor::Main)
            .map(|shell| {
                shell
                    .params
                    .iter()
                    .map(|p| (p.mode, p.data_type.clone()))
                    .collect()
            })
            .unwrap_or_default();

        args.iter()
            .enumerate()
            .map(|(i, arg)| match params.get(i) {
                Some((ParamMode::In, param_type)) => self.emit_converted(arg, param_type, method),
                Some(_) => self.emit_expr_inner(arg, method),
                None => self.emit_expr(arg, method),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn emit_binary(
        &self,
        op: BinOp,
        left: &Expression,
        right: &Expression,
        result: &DataType,
        method: &CheckedMethod,
    ) -> String {
        // String/null comparisons have no raw-pointer spelling.
        if matches!(op, BinOp::Eq | BinOp::NotEq) {
            let null_test = match (&left.kind, &right.kind) {
                (ExpressionKind::Null, _) if right.data_type == DataType::Str => Some(right),
                (_, ExpressionKind::Null) if left.data_type == DataType::Str => Some(left),
                _ => None,
            };
            if let Some(value) = null_test {
                let code = self.emit_expr(value, method);
                return match op {
                    BinOp::Eq => format!("({code}).IsNull()"),
                    _ => format!("(!({code}).IsNull())"),
                };
            }
        }

        let l = self.emit_expr(left, method);
        let r = self.emit_expr(right, method);

        if op == BinOp::Mod && matches!(result, DataType::Float | DataType::Double) {
            return format!("std::fmod({l}, {r})");
        }

        format!("({l} {} {r})", op.symbol())
    }

    fn emit_cast(&self, value: &Expression, target: &DataType, inner: String) -> String {
        let source = &value.data_type;

        if source.strip_owned() == target.strip_owned() {
            return inner;
        }

        match (source.strip_owned(), target.strip_owned()) {
            // Numerics
            (s, d) if s.is_value_type() && d.is_value_type() => {
                format!("({})({inner})", self.cpp_type(d, Position::Value))
            }

            // Unboxing
            (DataType::Class(c), d) if *c == self.registry.object_class && d.is_value_type() => {
                format!(
                    "opal::Unbox<{}>({inner})",
                    self.cpp_type(d, Position::Value)
                )
            }

            // Boxing
            (s, DataType::Class(c)) if *c == self.registry.object_class && s.is_value_type() => {
                format!("opal::Box({inner})")
            }

            // String to object and back
            (DataType::Str, DataType::Class(c)) if *c == self.registry.object_class => {
                format!("({inner}).Data()")
            }
            (DataType::Class(c), DataType::Str) if *c == self.registry.object_class => {
                format!("opal::Str(opal::Cast<opal::StrData>((opal::Object*)({inner})))")
            }

            // Upcasts are free; downcasts check at runtime.
            (s, d) if self.registry.is_subtype(s, d) => inner,
            (_, d) => {
                format!("opal::Cast<{}>({inner})", self.cpp_base_type(d))
            }
        }
    }

    fn emit_assignment(
        &self,
        target: &Expression,
        op: Option<BinOp>,
        value: &Expression,
        method: &CheckedMethod,
    ) -> String {
        let value_code = if op.is_some() {
            self.emit_expr(value, method)
        } else {
            self.emit_converted(value, &target.data_type, method)
        };

        match &target.kind {
            // Property writes route through the setter.
            ExpressionKind::Name {
                binding: Binding::Property(member),
                ..
            } => {
                let name = self.member_name(*member);
                match op {
                    Some(op) => format!(
                        "set_{name}(get_{name}() {} ({value_code}))",
                        op.symbol()
                    ),
                    None => format!("set_{name}({value_code})"),
                }
            }

            ExpressionKind::FieldAccess {
                object,
                binding: Binding::Property(member),
                ..
            } => {
                let object_code = self.emit_expr(object, method);
                let name = self.member_name(*member);
                match op {
                    Some(op) => format!(
                        "{object_code}->set_{name}({object_code}->get_{name}() {} ({value_code}))",
                        op.symbol()
                    ),
                    None => format!("{object_code}->set_{name}({value_code})"),
                }
            }

            // Indexer writes route through setItem.
            ExpressionKind::Index {
                object,
                index,
                indexer: Some(_),
            } => {
                let object_code = self.emit_expr(object, method);
                let index_code = self.emit_expr(index, method);
                match op {
                    Some(op) => format!(
                        "{object_code}->setItem({index_code}, {object_code}->getItem({index_code}) {} ({value_code}))",
                        op.symbol()
                    ),
                    None => format!("{object_code}->setItem({index_code}, {value_code})"),
                }
            }

            // Everything else is a plain C++ lvalue.
            _ => {
                let place = self.emit_expr_inner(target, method);
                match op {
                    Some(op) => {
                        if target.data_type == DataType::Str {
                            format!("{place} = {place} {} ({value_code})", op.symbol())
                        } else {
                            format!("{place} {}= ({value_code})", op.symbol())
                        }
                    }
                    None => format!("{place} = {value_code}"),
                }
            }
        }
    }

    /// Emit with the implicit conversions the checker approved:
    /// ownership transfers become Take(), values box into objects,
    /// strings alias their shared payload.
    fn emit_converted(
        &self,
        expr: &Expression,
        dest: &DataType,
        method: &CheckedMethod,
    ) -> String {
        let inner = self.emit_expr(expr, method);

        // Move out of an owning local into owning storage.
        if dest.is_owned() && expr.data_type.is_owned() {
            if let ExpressionKind::Name {
                binding: Binding::Local(local),
                ..
            } = &expr.kind
            {
                return format!("{}.Take()", self.local_name(method, *local));
            }
            return inner;
        }

        let dest_is_object = matches!(
            dest.strip_owned(),
            DataType::Class(c) if *c == self.registry.object_class
        );
        if dest_is_object {
            if expr.data_type.is_value_type() {
                return format!("opal::Box({inner})");
            }
            if expr.data_type == DataType::Str {
                return format!("({inner}).Data()");
            }
        }

        if *dest == DataType::Str && matches!(expr.kind, ExpressionKind::Null) {
            return "opal::Str()".to_string();
        }

        inner
    }

    // ------------------------------------------------------------------
    //  Entry point
    // ------------------------------------------------------------------

    fn emit_entry_point(&mut self) {
        let Some(entry) = self.program.entry else {
            return;
        };
        let class_name = self.class_name(entry.member.class);
        let name = self.member_name(entry.member);

        self.open_block("int main(int argc, char** argv) {");
        if self.program.entry_takes_args {
            self.emit_line(&format!(
                "{class_name}::{name}(opal::MakeArgs(argc, argv));"
            ));
        } else {
            self.emit_line("(void)argc;");
            self.emit_line("(void)argv;");
            self.emit_line(&format!("{class_name}::{name}();"));
        }
        self.emit_line("opal::ReportProfile();");
        self.emit_line("return 0;");
        self.close_block("}");
    }
}

/// Storage position a type is being spelled for.
#[derive(Clone, Copy, PartialEq)]
enum Position {
    Field,
    Local { needs_ref: bool },
    Param,
    Return,
    Value,
}

const CPP_KEYWORDS: &[&str] = &[
    "auto", "bool", "break", "case", "catch", "char", "class", "const", "continue", "default",
    "delete", "do", "double", "else", "enum", "extern", "false", "float", "for", "friend", "goto",
    "if", "inline", "int", "long", "namespace", "new", "operator", "private", "protected",
    "public", "register", "return", "short", "signed", "sizeof", "static", "struct", "switch",
    "template", "this", "throw", "true", "try", "typedef", "typename", "union", "unsigned",
    "using", "virtual", "void", "volatile", "while",
];

fn sanitize(name: &str) -> String {
    if CPP_KEYWORDS.contains(&name) {
        return format!("{name}_");
    }
    name.to_string()
}

fn escape_cpp(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c if (c as u32) < 0x20 || (c as u32) > 0x7e => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}
