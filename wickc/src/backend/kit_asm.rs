//! Per-type assembly driver and kit packaging.
//!
//! `KitAsm` walks the methods of each type, runs `CodeAsm` over every
//! body, computes the method's max operand-stack depth, and packages the
//! surviving streams plus the type metadata into a `KitFile`. Compile
//! errors are collected per method so a single run reports every failing
//! method instead of stopping at the first.

use std::collections::HashMap;

use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;
use wick_shared::kitfile::{
    CodeEntry, FieldEntry, KitFile, MethodEntry, StringEntry, StringIndex, TypeEntry,
    FIELD_CONST, FIELD_DEFINE, FIELD_INLINE, FIELD_STATIC, METHOD_NATIVE, METHOD_OVERRIDE,
    METHOD_VIRTUAL,
};

use crate::backend::code_asm::CodeAsm;
use crate::backend::verify::verify;
use crate::errors::CompileError;
use crate::ir::{Arg, IrMethod, IrOp};
use crate::symbols::{DispatchKind, FieldDef, FieldKind, MethodId, SymbolTable};
use crate::trees::typed::{MethodAst, TypeAst};

#[derive(Default)]
struct StringPool {
    entries: Vec<String>,
    index: HashMap<String, StringIndex>,
}

impl StringPool {
    fn intern(&mut self, s: &str) -> StringIndex {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        self.entries.push(s.to_string());
        // the string table is 1-indexed; 0 means "null"
        let i = self.entries.len() as StringIndex;
        self.index.insert(s.to_string(), i);
        i
    }

    fn into_entries(self) -> Vec<StringEntry> {
        self.entries
            .into_iter()
            .map(|value| StringEntry {
                value: value.into_bytes(),
            })
            .collect()
    }
}

fn field_flags(field: &FieldDef) -> u8 {
    let mut flags = match field.kind {
        FieldKind::Instance => 0,
        FieldKind::Static => FIELD_STATIC,
        FieldKind::Define => FIELD_DEFINE,
    };
    if field.is_const {
        flags |= FIELD_CONST;
    }
    if field.is_inline {
        flags |= FIELD_INLINE;
    }
    flags
}

fn method_flags(dispatch: DispatchKind) -> u8 {
    match dispatch {
        DispatchKind::Static => 0,
        DispatchKind::Virtual => METHOD_VIRTUAL,
        DispatchKind::Override => METHOD_OVERRIDE,
        DispatchKind::Native => METHOD_NATIVE,
    }
}

pub struct KitAsm<'a> {
    syms: &'a SymbolTable,
    errors: Vec<CompileError>,
    strings: StringPool,
    code_table: Vec<CodeEntry>,
}

impl<'a> KitAsm<'a> {
    pub fn new(syms: &'a SymbolTable) -> KitAsm<'a> {
        KitAsm {
            syms,
            errors: Vec::new(),
            strings: StringPool::default(),
            code_table: Vec::new(),
        }
    }

    /// Assembles every type into a kit, or the collected compile errors.
    pub fn assemble(
        mut self,
        kit_name: &str,
        types: &[TypeAst],
    ) -> Result<KitFile, Vec<CompileError>> {
        let name = self.strings.intern(kit_name);
        let mut entries = Vec::new();
        for ty in types {
            let entry = self.assemble_type(ty);
            entries.push(entry);
        }
        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        Ok(KitFile::new_from_parts(
            name,
            entries,
            self.code_table,
            self.strings.into_entries(),
        ))
    }

    fn assemble_type(&mut self, ast: &TypeAst) -> TypeEntry {
        let def = self.syms.type_def(ast.id);
        debug!("assembling type {}", def.name);

        let name = self.strings.intern(&def.name);
        let base = match def.base {
            Some(base) => {
                let base_name = self.syms.type_def(base).name.clone();
                self.strings.intern(&base_name)
            }
            None => 0,
        };

        let fields = def
            .fields
            .iter()
            .map(|&id| {
                let field = self.syms.field(id);
                FieldEntry {
                    name: self.strings.intern(&field.name),
                    type_tag: field.ty.tag(),
                    flags: field_flags(field),
                    offset: field.offset,
                }
            })
            .collect();

        let mut methods = Vec::new();
        for &id in &def.methods {
            methods.push(self.assemble_method(ast, id));
        }

        TypeEntry {
            name,
            base,
            size: def.size,
            fields,
            methods,
        }
    }

    fn assemble_method(&mut self, ast: &TypeAst, id: MethodId) -> MethodEntry {
        let def = self.syms.method(id);
        let name = self.strings.intern(&def.name);
        let flags = method_flags(def.dispatch);
        let ret = def.ret.tag();
        let params = def.params.iter().map(|p| p.tag()).collect();

        let body = ast.methods.iter().find(|m| m.method == id);
        let (max_locals, max_stack, code) = match body {
            Some(body) => match self.assemble_body(ast, body) {
                Some(ir) => {
                    let encoded = self.encode_method(&ir);
                    self.code_table.push(CodeEntry { code: encoded });
                    (ir.max_locals, ir.max_stack, self.code_table.len() as u16)
                }
                None => (0, 0, 0),
            },
            // no body: native, or declared elsewhere
            None => (0, 0, 0),
        };

        MethodEntry {
            name,
            flags,
            ret,
            params,
            max_locals,
            max_stack,
            code,
        }
    }

    /// Assembles one body; a compile error is recorded and sibling
    /// methods keep compiling.
    fn assemble_body(&mut self, ast: &TypeAst, body: &MethodAst) -> Option<IrMethod> {
        let def = self.syms.method(body.method);
        debug!(
            "assembling {}.{}",
            self.syms.type_def(ast.id).name,
            def.name
        );

        let asm = CodeAsm::new(self.syms, ast.id, &ast.file);
        let code = match asm.assemble(&body.body) {
            Ok(code) => code,
            Err(err) => {
                self.errors.push(err);
                return None;
            }
        };

        // a stream that fails verification means the assembler itself is
        // broken; that aborts the run
        let max_stack = verify(&code, self.syms, &def.ret)
            .unwrap_or_else(|err| panic!("emitted stream failed verification: {}", err));

        Some(IrMethod {
            method: body.method,
            code,
            max_locals: body.num_locals,
            max_stack,
        })
    }

    /// Encodes a finished stream into the kit's portable form: one opcode
    /// byte followed by a fixed-width argument. Jump targets stay
    /// instruction offsets; the loader maps them to addresses.
    fn encode_method(&mut self, ir: &IrMethod) -> Vec<u8> {
        let mut out = Vec::new();
        for op in &ir.code {
            self.encode_op(op, &mut out);
        }
        out
    }

    fn encode_op(&mut self, op: &IrOp, out: &mut Vec<u8>) {
        out.push(op.opcode.as_byte());
        match &op.arg {
            None => {}
            Some(Arg::Int(v)) => out.write_i32::<LittleEndian>(*v).unwrap(),
            Some(Arg::Long(v)) => out.write_i64::<LittleEndian>(*v).unwrap(),
            Some(Arg::Float(v)) => out.write_f32::<LittleEndian>(*v).unwrap(),
            Some(Arg::Double(v)) => out.write_f64::<LittleEndian>(*v).unwrap(),
            Some(Arg::Str(s)) => {
                let index = self.strings.intern(s);
                out.write_u16::<LittleEndian>(index).unwrap();
            }
            Some(Arg::Type(id)) => out.write_u16::<LittleEndian>(id.0).unwrap(),
            Some(Arg::Field(id)) => out.write_u16::<LittleEndian>(id.0).unwrap(),
            Some(Arg::Method(id)) => out.write_u16::<LittleEndian>(id.0).unwrap(),
            Some(Arg::Jump(Some(target))) => {
                out.write_u16::<LittleEndian>(*target as u16).unwrap()
            }
            Some(Arg::Jump(None)) => panic!("unresolved jump escaped assembly"),
            Some(Arg::Table(targets)) => {
                out.write_u16::<LittleEndian>(targets.len() as u16).unwrap();
                for &target in targets {
                    out.write_u16::<LittleEndian>(target as u16).unwrap();
                }
            }
        }
    }
}
