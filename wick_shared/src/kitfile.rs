//! The kit container format.
//!
//! A kit packages the compiled types of one translation unit for the VM
//! loader. Here is the structure of the kit as binary data using a vaguely
//! Rust-like format (all multi-byte fields little-endian):
//! ```ignore
//! type StringIndex = u16;
//! type CodeIndex = u16;
//!
//! struct KitFile {
//!     magic: u8,
//!     major_version: u8,
//!     minor_version: u8,
//!     patch_version: u8,
//!     name: StringIndex,
//!     types_size: u16,
//!     types: [TypeEntry; types_size],
//!     code_table_size: u16,
//!     code_table: [CodeEntry; code_table_size],
//!     string_table_size: u16,
//!     string_table: [StringEntry; string_table_size],
//! }
//!
//! TypeEntry {
//!     name: StringIndex,
//!     base: StringIndex,          // 0 = no base type
//!     size: u16,                  // instance size in bytes
//!     fields_size: u16,
//!     fields: [FieldEntry; fields_size],
//!     methods_size: u16,
//!     methods: [MethodEntry; methods_size],
//! }
//!
//! FieldEntry {
//!     name: StringIndex,
//!     type_tag: u8,
//!     flags: u8,
//!     offset: u16,
//! }
//!
//! MethodEntry {
//!     name: StringIndex,
//!     flags: u8,
//!     ret: u8,
//!     params_size: u8,
//!     params: [u8; params_size],
//!     max_locals: u16,
//!     max_stack: u16,
//!     code: CodeIndex,            // 0 = no body (native)
//! }
//!
//! CodeEntry {
//!     code_size: u32,
//!     code: [u8; code_size],
//! }
//!
//! StringEntry {
//!     length: u16,
//!     value: [u8; length],
//! }
//! ```

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::TypeTag;

/// Index into the string table
pub type StringIndex = u16;
/// Index into the code table
pub type CodeIndex = u16;

pub const KIT_MAGIC: u8 = 0x57;

pub const FIELD_STATIC: u8 = 0x01;
pub const FIELD_DEFINE: u8 = 0x02;
pub const FIELD_CONST: u8 = 0x04;
pub const FIELD_INLINE: u8 = 0x08;

pub const METHOD_VIRTUAL: u8 = 0x01;
pub const METHOD_OVERRIDE: u8 = 0x02;
pub const METHOD_NATIVE: u8 = 0x04;

#[derive(PartialEq, Debug)]
pub struct KitFile {
    /// Magic number to identify the file
    pub magic: u8,
    /// Major, minor, and patch version numbers
    pub major_version: u8,
    pub minor_version: u8,
    pub patch_version: u8,
    /// Kit name
    pub name: StringIndex,
    /// Compiled types
    pub types: Vec<TypeEntry>,
    /// Where the instruction streams are stored
    /// This table is 1 indexed so that a zero CodeIndex can mean "no body"
    pub(crate) code_table: Vec<CodeEntry>,
    /// String table
    /// This table is 1 indexed so that a zero StringIndex can mean "null"
    pub(crate) string_table: Vec<StringEntry>,
}

#[derive(PartialEq, Debug)]
pub struct TypeEntry {
    pub name: StringIndex,
    /// Base type name, 0 when the type has no base
    pub base: StringIndex,
    /// Instance size in bytes
    pub size: u16,
    pub fields: Vec<FieldEntry>,
    pub methods: Vec<MethodEntry>,
}

#[derive(PartialEq, Debug)]
pub struct FieldEntry {
    pub name: StringIndex,
    pub type_tag: TypeTag,
    pub flags: u8,
    /// Byte offset within the instance or static data area
    pub offset: u16,
}

#[derive(PartialEq, Debug)]
pub struct MethodEntry {
    pub name: StringIndex,
    pub flags: u8,
    pub ret: TypeTag,
    pub params: Vec<TypeTag>,
    pub max_locals: u16,
    /// Maximum operand-stack depth, used to size the call frame
    pub max_stack: u16,
    pub code: CodeIndex,
}

#[derive(PartialEq, Debug)]
pub struct CodeEntry {
    pub code: Vec<u8>,
}

#[derive(PartialEq, Debug)]
pub struct StringEntry {
    pub value: Vec<u8>,
}

impl KitFile {
    pub fn new_from_parts(
        name: StringIndex,
        types: Vec<TypeEntry>,
        code_table: Vec<CodeEntry>,
        string_table: Vec<StringEntry>,
    ) -> KitFile {
        KitFile {
            magic: KIT_MAGIC,
            major_version: 0,
            minor_version: 1,
            patch_version: 0,
            name,
            types,
            code_table,
            string_table,
        }
    }

    pub fn index_string_table(&self, index: StringIndex) -> &str {
        assert_ne!(index, 0, "string index should not be zero");
        std::str::from_utf8(&self.string_table[(index - 1) as usize].value).unwrap()
    }

    pub fn index_code_table(&self, index: CodeIndex) -> &CodeEntry {
        assert_ne!(index, 0, "code index should not be zero");
        &self.code_table[(index - 1) as usize]
    }

    pub fn as_binary(&self) -> Vec<u8> {
        let mut binary = Vec::new();
        binary.push(self.magic);
        binary.push(self.major_version);
        binary.push(self.minor_version);
        binary.push(self.patch_version);
        binary.write_u16::<LittleEndian>(self.name).unwrap();

        binary
            .write_u16::<LittleEndian>(self.types.len() as u16)
            .unwrap();
        for ty in &self.types {
            binary.write_u16::<LittleEndian>(ty.name).unwrap();
            binary.write_u16::<LittleEndian>(ty.base).unwrap();
            binary.write_u16::<LittleEndian>(ty.size).unwrap();
            binary
                .write_u16::<LittleEndian>(ty.fields.len() as u16)
                .unwrap();
            for field in &ty.fields {
                binary.write_u16::<LittleEndian>(field.name).unwrap();
                binary.push(field.type_tag.as_byte());
                binary.push(field.flags);
                binary.write_u16::<LittleEndian>(field.offset).unwrap();
            }
            binary
                .write_u16::<LittleEndian>(ty.methods.len() as u16)
                .unwrap();
            for method in &ty.methods {
                binary.write_u16::<LittleEndian>(method.name).unwrap();
                binary.push(method.flags);
                binary.push(method.ret.as_byte());
                binary.push(method.params.len() as u8);
                for param in &method.params {
                    binary.push(param.as_byte());
                }
                binary.write_u16::<LittleEndian>(method.max_locals).unwrap();
                binary.write_u16::<LittleEndian>(method.max_stack).unwrap();
                binary.write_u16::<LittleEndian>(method.code).unwrap();
            }
        }

        binary
            .write_u16::<LittleEndian>(self.code_table.len() as u16)
            .unwrap();
        for entry in &self.code_table {
            binary
                .write_u32::<LittleEndian>(entry.code.len() as u32)
                .unwrap();
            binary.write_all(&entry.code).unwrap();
        }

        binary
            .write_u16::<LittleEndian>(self.string_table.len() as u16)
            .unwrap();
        for entry in &self.string_table {
            binary
                .write_u16::<LittleEndian>(entry.value.len() as u16)
                .unwrap();
            binary.write_all(&entry.value).unwrap();
        }

        binary
    }

    pub fn parse(binary: &[u8]) -> io::Result<KitFile> {
        let mut cursor = Cursor::new(binary);

        let magic = cursor.read_u8()?;
        if magic != KIT_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad kit magic: {:#04x}", magic),
            ));
        }
        let major_version = cursor.read_u8()?;
        let minor_version = cursor.read_u8()?;
        let patch_version = cursor.read_u8()?;
        let name = cursor.read_u16::<LittleEndian>()?;

        let types_size = cursor.read_u16::<LittleEndian>()?;
        let mut types = Vec::new();
        for _ in 0..types_size {
            let name = cursor.read_u16::<LittleEndian>()?;
            let base = cursor.read_u16::<LittleEndian>()?;
            let size = cursor.read_u16::<LittleEndian>()?;

            let fields_size = cursor.read_u16::<LittleEndian>()?;
            let mut fields = Vec::new();
            for _ in 0..fields_size {
                let name = cursor.read_u16::<LittleEndian>()?;
                let type_tag = TypeTag::from(cursor.read_u8()?);
                let flags = cursor.read_u8()?;
                let offset = cursor.read_u16::<LittleEndian>()?;
                fields.push(FieldEntry {
                    name,
                    type_tag,
                    flags,
                    offset,
                });
            }

            let methods_size = cursor.read_u16::<LittleEndian>()?;
            let mut methods = Vec::new();
            for _ in 0..methods_size {
                let name = cursor.read_u16::<LittleEndian>()?;
                let flags = cursor.read_u8()?;
                let ret = TypeTag::from(cursor.read_u8()?);
                let params_size = cursor.read_u8()?;
                let mut params = Vec::new();
                for _ in 0..params_size {
                    params.push(TypeTag::from(cursor.read_u8()?));
                }
                let max_locals = cursor.read_u16::<LittleEndian>()?;
                let max_stack = cursor.read_u16::<LittleEndian>()?;
                let code = cursor.read_u16::<LittleEndian>()?;
                methods.push(MethodEntry {
                    name,
                    flags,
                    ret,
                    params,
                    max_locals,
                    max_stack,
                    code,
                });
            }

            types.push(TypeEntry {
                name,
                base,
                size,
                fields,
                methods,
            });
        }

        let code_table_size = cursor.read_u16::<LittleEndian>()?;
        let mut code_table = Vec::new();
        for _ in 0..code_table_size {
            let code_size = cursor.read_u32::<LittleEndian>()?;
            let mut code = vec![0u8; code_size as usize];
            cursor.read_exact(&mut code)?;
            code_table.push(CodeEntry { code });
        }

        let string_table_size = cursor.read_u16::<LittleEndian>()?;
        let mut string_table = Vec::new();
        for _ in 0..string_table_size {
            let length = cursor.read_u16::<LittleEndian>()?;
            let mut value = vec![0u8; length as usize];
            cursor.read_exact(&mut value)?;
            string_table.push(StringEntry { value });
        }

        Ok(KitFile {
            magic,
            major_version,
            minor_version,
            patch_version,
            name,
            types,
            code_table,
            string_table,
        })
    }
}
