pub mod code_asm;
pub mod kit_asm;
pub mod verify;

pub use code_asm::CodeAsm;
pub use kit_asm::KitAsm;
pub use verify::verify;
