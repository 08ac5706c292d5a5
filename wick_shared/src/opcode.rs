//! The instruction set of the Wick stack machine.
//!
//! Opcodes come in families that differ only by operand width or addressing
//! mode: the dedicated immediate forms for common small integers, the
//! slot-indexed load/store forms for the first few parameters and locals,
//! and the 8/16/32/64-bit and reference forms for field and array access.
//! The compiler always picks the smallest form that can express the
//! operation; the encoder relies on the family being unambiguous.

/// What kind of argument an opcode carries in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    None,
    /// Small integer immediate, slot index, or source line.
    Int,
    Long,
    Float,
    Double,
    /// String-pool entry.
    Str,
    /// Resolved type reference.
    TypeRef,
    /// Resolved field reference.
    FieldRef,
    /// Resolved method reference.
    MethodRef,
    /// Stream-relative jump target.
    Jump,
    /// Jump table for `Switch`.
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::FromRepr)]
#[repr(u8)]
pub enum Opcode {
    Nop,

    // int immediates; the named forms are single-byte encodings
    LoadIM1,
    LoadI0,
    LoadI1,
    LoadI2,
    LoadI3,
    LoadI4,
    LoadI5,
    LoadIntU1,
    LoadIntU2,
    LoadInt,

    // long/float/double immediates
    LoadL0,
    LoadL1,
    LoadLong,
    LoadF0,
    LoadF1,
    LoadFloat,
    LoadD0,
    LoadD1,
    LoadDouble,

    // typed null constants; the non-ref forms exist for nullable
    // primitives (bool/float are one slot, double is two)
    LoadNull,
    LoadNullBool,
    LoadNullFloat,
    LoadNullDouble,

    // pooled and symbolic loads
    LoadStr,
    /// Push the byte size of the referenced type.
    SizeOf,
    /// Push the value of a define (named constant) field.
    LoadDefine,
    /// Push a static const reference field.
    LoadConstStatic,
    /// Push the base address of the static data area.
    LoadDataAddr,

    // parameters
    LoadParam0,
    LoadParam1,
    LoadParam2,
    LoadParam3,
    LoadParam,
    LoadParamWide,
    StoreParam,
    StoreParamWide,

    // locals
    LoadLocal0,
    LoadLocal1,
    LoadLocal2,
    LoadLocal3,
    LoadLocal4,
    LoadLocal5,
    LoadLocal6,
    LoadLocal7,
    LoadLocal,
    LoadLocalWide,
    StoreLocal0,
    StoreLocal1,
    StoreLocal2,
    StoreLocal3,
    StoreLocal4,
    StoreLocal5,
    StoreLocal6,
    StoreLocal7,
    StoreLocal,
    StoreLocalWide,

    // fields: pop the base address, push/pop the value
    Load8BitField,
    Load16BitField,
    Load32BitField,
    Load64BitField,
    LoadRefField,
    LoadConstField,
    LoadInlineField,
    Store8BitField,
    Store16BitField,
    Store32BitField,
    Store64BitField,
    StoreRefField,

    // arrays: pop array ref and index, push/pop the element
    Load8BitArray,
    Load16BitArray,
    Load32BitArray,
    Load64BitArray,
    LoadRefArray,
    LoadConstArray,
    Store8BitArray,
    Store16BitArray,
    Store32BitArray,
    Store64BitArray,
    StoreRefArray,

    // pointer arithmetic: pop array ref and element offset, push the
    // scaled address
    Add8BitArray,
    Add16BitArray,
    Add32BitArray,
    Add64BitArray,
    AddRefArray,

    // int arithmetic and bit ops
    IntAdd,
    IntSub,
    IntMul,
    IntDiv,
    IntMod,
    IntNeg,
    IntNot,
    IntAnd,
    IntOr,
    IntXor,
    IntShiftL,
    IntShiftR,
    IntInc,
    IntDec,

    // long arithmetic and bit ops; shift counts are ints
    LongAdd,
    LongSub,
    LongMul,
    LongDiv,
    LongMod,
    LongNeg,
    LongNot,
    LongAnd,
    LongOr,
    LongXor,
    LongShiftL,
    LongShiftR,

    // float arithmetic
    FloatAdd,
    FloatSub,
    FloatMul,
    FloatDiv,
    FloatNeg,

    // double arithmetic
    DoubleAdd,
    DoubleSub,
    DoubleMul,
    DoubleDiv,
    DoubleNeg,

    // comparisons, each pushes an int 0/1
    IntEq,
    IntNotEq,
    IntGt,
    IntGtEq,
    IntLt,
    IntLtEq,
    LongEq,
    LongNotEq,
    LongGt,
    LongGtEq,
    LongLt,
    LongLtEq,
    FloatEq,
    FloatNotEq,
    FloatGt,
    FloatGtEq,
    FloatLt,
    FloatLtEq,
    DoubleEq,
    DoubleNotEq,
    DoubleGt,
    DoubleGtEq,
    DoubleLt,
    DoubleLtEq,
    ObjEq,
    ObjNotEq,
    /// Logical not: push 1 if the popped int is zero, else 0.
    EqZero,

    // numeric conversions
    IntToLong,
    IntToFloat,
    IntToDouble,
    LongToInt,
    LongToFloat,
    LongToDouble,
    FloatToInt,
    FloatToLong,
    FloatToDouble,
    DoubleToInt,
    DoubleToLong,
    DoubleToFloat,
    /// Checked reference-to-reference cast.
    Cast,

    // stack manipulation
    Pop,
    Pop2,
    Pop3,
    Dup,
    Dup2,
    /// Duplicate the top value and bury it beneath the two values below
    /// it: `[a, b]` becomes `[b, a, b]`.
    DupDown2,
    /// `[a, b, c]` becomes `[c, a, b, c]`.
    DupDown3,
    /// Wide form of `DupDown2`: `[a, v1, v2]` becomes `[v1, v2, a, v1, v2]`.
    Dup2Down2,
    /// Wide form of `DupDown3`: `[a, b, v1, v2]` becomes
    /// `[v1, v2, a, b, v1, v2]`.
    Dup2Down3,

    // control flow
    Jump,
    JumpZero,
    JumpNonZero,
    /// Loop step over the `[array, length, counter]` triple left on the
    /// stack by the loop prologue. Increments the counter; when it reaches
    /// the length, jumps to the target leaving the triple in place,
    /// otherwise falls through after pushing copies of the array and the
    /// counter for the element load that follows.
    Foreach,
    /// Indexed jump through the table argument; a popped value outside
    /// the table range falls through (the default block follows).
    Switch,

    // calls
    Call,
    CallVirtual,
    CallNative,
    CallNativeWide,
    CallNativeVoid,

    // returns
    ReturnVoid,
    ReturnPop,
    ReturnPopWide,

    /// Check the popped condition; the argument is the source line for
    /// the failure report.
    Assert,
}

impl Opcode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn arg_kind(self) -> ArgKind {
        use Opcode::*;
        match self {
            LoadIntU1 | LoadIntU2 | LoadInt => ArgKind::Int,
            LoadLong => ArgKind::Long,
            LoadFloat => ArgKind::Float,
            LoadDouble => ArgKind::Double,
            LoadStr => ArgKind::Str,
            SizeOf | Cast => ArgKind::TypeRef,
            LoadDefine | LoadConstStatic => ArgKind::FieldRef,
            Load8BitField | Load16BitField | Load32BitField | Load64BitField | LoadRefField
            | LoadConstField | LoadInlineField | Store8BitField | Store16BitField
            | Store32BitField | Store64BitField | StoreRefField => ArgKind::FieldRef,
            LoadParam | LoadParamWide | StoreParam | StoreParamWide | LoadLocal
            | LoadLocalWide | StoreLocal | StoreLocalWide => ArgKind::Int,
            Call | CallVirtual | CallNative | CallNativeWide | CallNativeVoid => {
                ArgKind::MethodRef
            }
            Jump | JumpZero | JumpNonZero | Foreach => ArgKind::Jump,
            Switch => ArgKind::Table,
            Assert => ArgKind::Int,
            _ => ArgKind::None,
        }
    }

    /// Static operand-stack effect as `(pops, pushes)` in slots.
    ///
    /// `None` means the effect is not determined by the opcode alone:
    /// calls depend on the target signature, `LoadDefine` on the define's
    /// width, and `Foreach` on which way the branch goes.
    pub fn stack_effect(self) -> Option<(u8, u8)> {
        use Opcode::*;
        Some(match self {
            Nop | Jump => (0, 0),

            LoadIM1 | LoadI0 | LoadI1 | LoadI2 | LoadI3 | LoadI4 | LoadI5 | LoadIntU1
            | LoadIntU2 | LoadInt | LoadF0 | LoadF1 | LoadFloat | LoadNull | LoadNullBool
            | LoadNullFloat | LoadStr | SizeOf | LoadConstStatic | LoadDataAddr => (0, 1),
            LoadL0 | LoadL1 | LoadLong | LoadD0 | LoadD1 | LoadDouble | LoadNullDouble => (0, 2),

            LoadParam0 | LoadParam1 | LoadParam2 | LoadParam3 | LoadParam => (0, 1),
            LoadParamWide => (0, 2),
            StoreParam => (1, 0),
            StoreParamWide => (2, 0),

            LoadLocal0 | LoadLocal1 | LoadLocal2 | LoadLocal3 | LoadLocal4 | LoadLocal5
            | LoadLocal6 | LoadLocal7 | LoadLocal => (0, 1),
            LoadLocalWide => (0, 2),
            StoreLocal0 | StoreLocal1 | StoreLocal2 | StoreLocal3 | StoreLocal4 | StoreLocal5
            | StoreLocal6 | StoreLocal7 | StoreLocal => (1, 0),
            StoreLocalWide => (2, 0),

            Load8BitField | Load16BitField | Load32BitField | LoadRefField | LoadConstField
            | LoadInlineField => (1, 1),
            Load64BitField => (1, 2),
            Store8BitField | Store16BitField | Store32BitField | StoreRefField => (2, 0),
            Store64BitField => (3, 0),

            Load8BitArray | Load16BitArray | Load32BitArray | LoadRefArray | LoadConstArray => {
                (2, 1)
            }
            Load64BitArray => (2, 2),
            Store8BitArray | Store16BitArray | Store32BitArray | StoreRefArray => (3, 0),
            Store64BitArray => (4, 0),

            Add8BitArray | Add16BitArray | Add32BitArray | Add64BitArray | AddRefArray => (2, 1),

            IntAdd | IntSub | IntMul | IntDiv | IntMod | IntAnd | IntOr | IntXor | IntShiftL
            | IntShiftR => (2, 1),
            IntNeg | IntNot | IntInc | IntDec => (1, 1),

            LongAdd | LongSub | LongMul | LongDiv | LongMod | LongAnd | LongOr | LongXor => (4, 2),
            LongShiftL | LongShiftR => (3, 2),
            LongNeg | LongNot => (2, 2),

            FloatAdd | FloatSub | FloatMul | FloatDiv => (2, 1),
            FloatNeg => (1, 1),
            DoubleAdd | DoubleSub | DoubleMul | DoubleDiv => (4, 2),
            DoubleNeg => (2, 2),

            IntEq | IntNotEq | IntGt | IntGtEq | IntLt | IntLtEq | FloatEq | FloatNotEq
            | FloatGt | FloatGtEq | FloatLt | FloatLtEq | ObjEq | ObjNotEq => (2, 1),
            LongEq | LongNotEq | LongGt | LongGtEq | LongLt | LongLtEq | DoubleEq
            | DoubleNotEq | DoubleGt | DoubleGtEq | DoubleLt | DoubleLtEq => (4, 1),
            EqZero => (1, 1),

            IntToFloat | FloatToInt | Cast => (1, 1),
            IntToLong | IntToDouble | FloatToLong | FloatToDouble => (1, 2),
            LongToInt | LongToFloat | DoubleToInt | DoubleToFloat => (2, 1),
            LongToDouble | DoubleToLong => (2, 2),

            Pop => (1, 0),
            Pop2 => (2, 0),
            Pop3 => (3, 0),
            Dup => (1, 2),
            Dup2 => (2, 4),
            DupDown2 => (2, 3),
            DupDown3 => (3, 4),
            Dup2Down2 => (3, 5),
            Dup2Down3 => (4, 6),

            JumpZero | JumpNonZero | Switch | Assert => (1, 0),

            ReturnVoid => (0, 0),
            ReturnPop => (1, 0),
            ReturnPopWide => (2, 0),

            LoadDefine | Foreach | Call | CallVirtual | CallNative | CallNativeWide
            | CallNativeVoid => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminant_round_trip() {
        let ops = [Opcode::Nop, Opcode::LoadI0, Opcode::Switch, Opcode::Assert];
        for op in ops {
            assert_eq!(Opcode::from_repr(op.as_byte()), Some(op));
        }
    }

    #[test]
    fn test_arg_kinds() {
        assert_eq!(Opcode::LoadI0.arg_kind(), ArgKind::None);
        assert_eq!(Opcode::LoadInt.arg_kind(), ArgKind::Int);
        assert_eq!(Opcode::LoadDefine.arg_kind(), ArgKind::FieldRef);
        assert_eq!(Opcode::CallVirtual.arg_kind(), ArgKind::MethodRef);
        assert_eq!(Opcode::Foreach.arg_kind(), ArgKind::Jump);
        assert_eq!(Opcode::Switch.arg_kind(), ArgKind::Table);
    }

    #[test]
    fn test_stack_effects() {
        assert_eq!(Opcode::LoadI0.stack_effect(), Some((0, 1)));
        assert_eq!(Opcode::LoadLong.stack_effect(), Some((0, 2)));
        assert_eq!(Opcode::LongAdd.stack_effect(), Some((4, 2)));
        assert_eq!(Opcode::Dup2Down3.stack_effect(), Some((4, 6)));
        assert_eq!(Opcode::Call.stack_effect(), None);
        assert_eq!(Opcode::Foreach.stack_effect(), None);
    }

    #[test]
    fn test_display_is_mnemonic() {
        assert_eq!(Opcode::LoadIM1.to_string(), "LoadIM1");
        assert_eq!(Opcode::JumpZero.to_string(), "JumpZero");
    }
}
