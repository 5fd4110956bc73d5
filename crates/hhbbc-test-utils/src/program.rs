//! Small builders for test programs.

use hhbbc_bc::{Block, Bytecode, Func, Local, LocalId, Param, Unit};

pub fn unit() -> Unit {
    Unit::builder().name("test.php").build()
}

/// A function named `f` over `blocks`.
pub fn func(blocks: Vec<Block>) -> Func {
    Func::builder().name("f").blocks(blocks).build()
}

/// A function with one block holding `hhbcs` and no successors.
pub fn straight_line(hhbcs: Vec<Bytecode>) -> Func {
    func(vec![Block::new(0u32, hhbcs)])
}

/// Untyped parameters named `names`, in order.
pub fn params(names: &[&str]) -> Vec<Param> {
    names
        .iter()
        .map(|name| Param::builder().name(*name).build())
        .collect()
}

/// Named locals `0..names.len()`.
pub fn locals(names: &[&str]) -> Vec<Local> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| Local {
            id: LocalId::from(i),
            name: Some((*name).into()),
        })
        .collect()
}
