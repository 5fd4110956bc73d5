//! The whole-program index consulted by the interpreter.

mod func;
mod index;
mod memory;

pub use func::{CallContext, FuncInfo, ResFunc};
pub use index::Index;
pub use memory::MemoryIndex;
