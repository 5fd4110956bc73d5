//! The program an analysis runs over: units, classes and functions made of
//! basic blocks.

use std::sync::Arc;

use hhbbc_types::Cell;

use crate::bytecode::Bytecode;
use crate::ids::{BlockId, LocalId};
use crate::imm::SlotUse;

// ============================================================================
// Type constraints
// ============================================================================

/// The annotation category of a declared type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AnnotType {
    #[default]
    Mixed,
    Null,
    Bool,
    Int,
    Float,
    String,
    ArrayKey,
    Number,
    Array,
    Vec,
    Dict,
    Keyset,
    Resource,
    /// A class, interface or type alias named by [`TypeConstraint::name`].
    Object,
    Self_,
    Parent,
    Callable,
    Nonnull,
    This,
    NoReturn,
}

/// A declared parameter, return or property type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, bon::Builder)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TypeConstraint {
    #[builder(default)]
    pub annot: AnnotType,
    #[builder(default)]
    pub nullable: bool,
    /// Violations only warn.
    #[builder(default)]
    pub soft: bool,
    #[builder(into)]
    pub name: Option<Arc<str>>,
}

impl TypeConstraint {
    pub fn new(annot: AnnotType) -> Self {
        Self {
            annot,
            ..Self::default()
        }
    }

    pub fn object(name: impl Into<Arc<str>>) -> Self {
        Self {
            annot: AnnotType::Object,
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Anything satisfies the constraint.
    pub fn is_mixed(&self) -> bool {
        self.annot == AnnotType::Mixed
    }
}

// ============================================================================
// Units and classes
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

#[derive(Clone, Debug, PartialEq, bon::Builder)]
pub struct Prop {
    #[builder(into)]
    pub name: Arc<str>,
    #[builder(default)]
    pub visibility: Visibility,
    #[builder(default)]
    pub is_static: bool,
    /// Initial value, when it is a compile-time constant.
    pub initial: Option<Cell>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassAttrs {
    pub is_interface: bool,
    pub is_trait: bool,
    pub no_override: bool,
    /// The class of a closure created by `CreateCl`.
    pub is_closure: bool,
}

#[derive(Clone, Debug, PartialEq, bon::Builder)]
pub struct Class {
    #[builder(into)]
    pub name: Arc<str>,
    #[builder(into)]
    pub parent: Option<Arc<str>>,
    #[builder(default)]
    pub attrs: ClassAttrs,
    #[builder(default)]
    pub props: Vec<Prop>,
}

impl Class {
    pub fn prop(&self, name: &str) -> Option<&Prop> {
        self.props.iter().find(|p| &*p.name == name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, bon::Builder)]
pub struct Unit {
    #[builder(into)]
    pub name: Arc<str>,
    #[builder(default)]
    pub classes: Vec<Class>,
    #[builder(default)]
    pub is_systemlib: bool,
}

// ============================================================================
// Functions
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, bon::Builder)]
pub struct Param {
    #[builder(into)]
    pub name: Arc<str>,
    pub constraint: Option<TypeConstraint>,
    #[builder(default)]
    pub by_ref: bool,
    #[builder(default)]
    pub variadic: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Local {
    pub id: LocalId,
    /// Unnamed locals are compiler temporaries.
    pub name: Option<Arc<str>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FuncAttrs {
    pub is_static: bool,
    pub is_async: bool,
    pub is_generator: bool,
    pub is_closure_body: bool,
    pub is_memoize_wrapper: bool,
    /// May read or write locals by name (`extract`, `$$x`, ...).
    pub may_use_vv: bool,
    pub is_pseudomain: bool,
    /// Implemented natively; the body is a single `NativeImpl`.
    pub is_native: bool,
}

/// A basic block: straight-line code with a single entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub hhbcs: Vec<Bytecode>,
    /// Successor when the last instruction does not transfer control.
    pub fallthrough: Option<BlockId>,
    /// Exception handlers a throwing instruction in this block may reach.
    pub factored_exits: Vec<BlockId>,
}

impl Block {
    pub fn new(id: impl Into<BlockId>, hhbcs: Vec<Bytecode>) -> Self {
        Self {
            id: id.into(),
            hhbcs,
            fallthrough: None,
            factored_exits: Vec::new(),
        }
    }

    pub fn with_fallthrough(mut self, target: impl Into<BlockId>) -> Self {
        self.fallthrough = Some(target.into());
        self
    }

    pub fn with_factored_exit(mut self, target: impl Into<BlockId>) -> Self {
        self.factored_exits.push(target.into());
        self
    }

    /// Every successor: explicit branch targets of the last instruction,
    /// the fallthrough and the factored exits.
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.hhbcs
            .last()
            .map(Bytecode::targets)
            .into_iter()
            .flatten()
            .chain(self.fallthrough)
            .chain(self.factored_exits.iter().copied())
    }
}

#[derive(Clone, Debug, PartialEq, bon::Builder)]
pub struct Func {
    #[builder(into)]
    pub name: Arc<str>,
    /// Name of the class for methods.
    #[builder(into)]
    pub cls: Option<Arc<str>>,
    #[builder(default)]
    pub params: Vec<Param>,
    /// Every local, parameters first. Locals named only by bytecode may be
    /// left out.
    #[builder(default)]
    pub locals: Vec<Local>,
    /// Block `i` has id `i`; block 0 is the entry.
    pub blocks: Vec<Block>,
    #[builder(default)]
    pub attrs: FuncAttrs,
    pub ret_constraint: Option<TypeConstraint>,
    /// Return type of a native implementation, in place of a body.
    pub native_ret: Option<TypeConstraint>,
}

impl Func {
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    /// Follow fallthrough-only empty blocks from `id` to the first block that
    /// does something.
    pub fn next_real_block(&self, mut id: BlockId) -> BlockId {
        let mut seen = 0;
        while let Some(b) = self.block(id) {
            match b.fallthrough {
                Some(next) if b.hhbcs.is_empty() && seen < self.blocks.len() => {
                    id = next;
                    seen += 1;
                }
                _ => break,
            }
        }
        id
    }

    pub fn find_local(&self, name: &str) -> Option<LocalId> {
        self.locals
            .iter()
            .find(|l| l.name.as_deref() == Some(name))
            .map(|l| l.id)
    }

    pub fn local_name(&self, id: LocalId) -> Option<&str> {
        self.locals
            .iter()
            .find(|l| l.id == id)
            .and_then(|l| l.name.as_deref())
    }

    /// Name of the implementation function wrapped by a memoize wrapper.
    pub fn memoize_impl_name(&self) -> String {
        format!("{}$memoize_impl", self.name)
    }

    /// Slot counts needed to interpret the body: at least one local per
    /// declared local and parameter.
    pub fn slot_use(&self) -> SlotUse {
        let mut slots = SlotUse::default();
        for bc in self.blocks.iter().flat_map(|b| &b.hhbcs) {
            bc.visit_slots(&mut slots);
        }
        let declared = self.locals.len().max(self.params.len()) as u32;
        slots.locals = slots.locals.max(declared);
        slots
    }
}

/// What is being analyzed: a function, its unit and its class.
#[derive(Clone, Copy, Debug)]
pub struct Context<'a> {
    pub unit: &'a Unit,
    pub func: &'a Func,
    pub cls: Option<&'a Class>,
}

impl<'a> Context<'a> {
    pub fn new(unit: &'a Unit, func: &'a Func) -> Self {
        let cls = func
            .cls
            .as_deref()
            .and_then(|name| unit.classes.iter().find(|c| &*c.name == name));
        Self { unit, func, cls }
    }
}
