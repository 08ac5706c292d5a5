//! The symbol table consulted during code generation.
//!
//! Types, fields, and methods are interned by the front end and referenced
//! by index from the typed trees. The table is read-only during code
//! generation, so independent `CodeAsm` instances can share it freely.

use crate::trees::StaticType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u16);

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub base: Option<TypeId>,
    /// Instance size in bytes.
    pub size: u16,
    /// Instance initializer invoked after allocation by `new`.
    pub instance_init: Option<MethodId>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>, base: Option<TypeId>, size: u16) -> TypeDef {
        TypeDef {
            name: name.into(),
            base,
            size,
            instance_init: None,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }
}

/// How a field is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Addressed through the owning instance.
    Instance,
    /// Addressed through the static data base address.
    Static,
    /// A named constant resolved by the loader; read-only.
    Define,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub parent: TypeId,
    pub kind: FieldKind,
    pub ty: StaticType,
    pub is_const: bool,
    pub is_inline: bool,
    /// A log-category define; calls on it compile to gated log statements.
    pub is_log: bool,
    /// Byte offset within the instance or static data area.
    pub offset: u16,
}

impl FieldDef {
    pub fn new(
        name: impl Into<String>,
        parent: TypeId,
        kind: FieldKind,
        ty: StaticType,
    ) -> FieldDef {
        FieldDef {
            name: name.into(),
            parent,
            kind,
            ty,
            is_const: false,
            is_inline: false,
            is_log: false,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    Static,
    Virtual,
    Override,
    Native,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub name: String,
    pub parent: TypeId,
    pub dispatch: DispatchKind,
    pub ret: StaticType,
    /// Parameter types, including the receiver for instance methods.
    pub params: Vec<StaticType>,
    /// For log methods: the method that tests whether the level is enabled.
    pub log_gate: Option<MethodId>,
}

impl MethodDef {
    pub fn new(
        name: impl Into<String>,
        parent: TypeId,
        dispatch: DispatchKind,
        ret: StaticType,
        params: Vec<StaticType>,
    ) -> MethodDef {
        MethodDef {
            name: name.into(),
            parent,
            dispatch,
            ret,
            params,
            log_gate: None,
        }
    }

    /// Operand-stack slots consumed by the arguments.
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(StaticType::slot_width).sum()
    }
}

/// Runtime slots the code generator itself needs to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellKnown {
    /// Native allocator called by `new`.
    pub alloc: MethodId,
    /// Native deallocator called by `delete`.
    pub dealloc: MethodId,
    /// Define holding the byte size of a reference on the target.
    pub ref_size: FieldId,
    /// Stream newline call appended to every log statement.
    pub newline: MethodId,
}

#[derive(Debug)]
pub struct SymbolTable {
    types: Vec<TypeDef>,
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,
    pub well_known: WellKnown,
    /// The built-in output-stream type log statements chain through.
    pub stream_type: TypeId,
}

impl SymbolTable {
    /// Creates a table seeded with the runtime type and the well-known
    /// slots every compilation needs.
    pub fn new() -> SymbolTable {
        let runtime = TypeId(0);
        let stream = TypeId(1);
        let types = vec![
            TypeDef::new("Runtime", None, 0),
            TypeDef::new("OutStream", None, 4),
        ];
        let fields = vec![FieldDef::new(
            "refSize",
            runtime,
            FieldKind::Define,
            StaticType::Int,
        )];
        let methods = vec![
            MethodDef::new(
                "alloc",
                runtime,
                DispatchKind::Native,
                StaticType::Ref(runtime),
                vec![StaticType::Int],
            ),
            MethodDef::new(
                "dealloc",
                runtime,
                DispatchKind::Native,
                StaticType::Void,
                vec![StaticType::Ref(runtime)],
            ),
            MethodDef::new(
                "nl",
                stream,
                DispatchKind::Static,
                StaticType::Ref(stream),
                vec![StaticType::Ref(stream)],
            ),
        ];
        let mut table = SymbolTable {
            types,
            fields,
            methods,
            well_known: WellKnown {
                alloc: MethodId(0),
                dealloc: MethodId(1),
                ref_size: FieldId(0),
                newline: MethodId(2),
            },
            stream_type: stream,
        };
        table.types[0].fields.push(FieldId(0));
        table.types[0].methods.push(MethodId(0));
        table.types[0].methods.push(MethodId(1));
        table.types[1].methods.push(MethodId(2));
        table
    }

    pub fn add_type(&mut self, def: TypeDef) -> TypeId {
        let id = TypeId(self.types.len() as u16);
        self.types.push(def);
        id
    }

    pub fn add_field(&mut self, def: FieldDef) -> FieldId {
        let id = FieldId(self.fields.len() as u16);
        self.types[def.parent.0 as usize].fields.push(id);
        self.fields.push(def);
        id
    }

    pub fn add_method(&mut self, def: MethodDef) -> MethodId {
        let id = MethodId(self.methods.len() as u16);
        self.types[def.parent.0 as usize].methods.push(id);
        self.methods.push(def);
        id
    }

    pub fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id.0 as usize]
    }

    pub fn type_def_mut(&mut self, id: TypeId) -> &mut TypeDef {
        &mut self.types[id.0 as usize]
    }

    pub fn field(&self, id: FieldId) -> &FieldDef {
        &self.fields[id.0 as usize]
    }

    pub fn field_mut(&mut self, id: FieldId) -> &mut FieldDef {
        &mut self.fields[id.0 as usize]
    }

    pub fn method(&self, id: MethodId) -> &MethodDef {
        &self.methods[id.0 as usize]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut MethodDef {
        &mut self.methods[id.0 as usize]
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}
