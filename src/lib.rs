//! Abstract interpretation of HHBC bytecode.
//!
//! The member crates are re-exported under short names:
//!
//! - [`types`]: the type lattice and concrete values
//! - [`bc`]: instructions and the program representation
//! - [`index`]: whole-program facts the interpreter queries
//! - [`interp`]: the per-instruction interpreter and the fixpoint driver

pub use hhbbc_bc as bc;
pub use hhbbc_index as index;
pub use hhbbc_types as types;

#[cfg(feature = "interpret")]
pub use hhbbc_interp as interp;

pub mod prelude {
    pub use hhbbc_bc::{Block, BlockId, Bytecode, Func, LocalId, Unit};
    pub use hhbbc_index::{Index, MemoryIndex};
    pub use hhbbc_types::{Lattice, Type};

    #[cfg(feature = "interpret")]
    pub use hhbbc_interp::{FuncAnalysis, FuncAnalyzer, Options, State};
}
