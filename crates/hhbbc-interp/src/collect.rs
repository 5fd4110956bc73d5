use std::sync::Arc;

use hhbbc_bc::{Context, Visibility};
use hhbbc_types::{Cell, Lattice, Type};
use indexmap::IndexMap;
use rustc_hash::FxHashSet;

use crate::options::CollectionOpts;

/// What is known about a global constant the function touches.
#[derive(Clone, Debug, PartialEq)]
pub enum CnsEntry {
    /// Defined here with this value. `Cell::Uninit` when the value is not a
    /// compile-time constant.
    Value(Cell),
    /// Read but not defined here, and unknown to the index.
    ReadOnly,
    /// Defined more than once, or in a way that cannot be tracked.
    Dynamic,
}

/// Types of the private properties of the context class, as written by the
/// function. Untracked names are ignored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropState {
    props: IndexMap<Arc<str>, Type>,
}

impl PropState {
    pub fn get(&self, name: &str) -> Option<&Type> {
        self.props.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Type)> {
        self.props.iter().map(|(k, v)| (&**k, v))
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    fn track(&mut self, name: Arc<str>) {
        self.props.insert(name, Type::BOTTOM);
    }

    /// Widen `name` to include `ty`.
    pub fn merge(&mut self, name: &str, ty: &Type) {
        if let Some(t) = self.props.get_mut(name) {
            *t = t.join(ty);
        }
    }

    /// Widen every tracked property to include `ty`.
    pub fn merge_each(&mut self, ty: &Type) {
        for t in self.props.values_mut() {
            *t = t.join(ty);
        }
    }

    /// Anything could have been written.
    pub fn kill(&mut self) {
        self.merge_each(&Type::GEN);
    }
}

/// Facts gathered while interpreting the blocks of one function.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectedInfo {
    pub opts: CollectionOpts,
    /// Every interpreted instruction was effect free.
    pub effect_free: bool,
    pub cns_map: IndexMap<Arc<str>, CnsEntry>,
    /// A constant unknown to the index was read; the function must be
    /// analysed again once the index knows more.
    pub reads_untracked_constants: bool,
    /// Types of the function's static locals, indexed by local. Seeded
    /// from earlier rounds and widened by every value bound or written to a
    /// static.
    pub local_static_types: Vec<Type>,
    /// Use-variable types of closures created here, by closure class index.
    pub closure_use_types: IndexMap<u32, Vec<Type>>,
    /// Callees whose calls turned out not to be foldable.
    pub unfoldable_funcs: FxHashSet<Arc<str>>,
    pub this_props: PropState,
    pub self_props: PropState,
    /// Properties initialised by `InitProp`, with their value when constant.
    pub init_props: IndexMap<Arc<str>, Option<Cell>>,
    /// Public static properties written through a known class and name.
    pub public_statics: IndexMap<(Arc<str>, Arc<str>), Type>,
    /// Join of the types written to public statics that could not be named.
    pub unknown_public_statics: Type,
    /// Locals may be read or written by name.
    pub may_use_vv: bool,
}

impl CollectedInfo {
    /// Start collecting for `ctx`, tracking the private properties of its
    /// class.
    pub fn new(ctx: &Context<'_>, opts: CollectionOpts) -> Self {
        let mut this_props = PropState::default();
        let mut self_props = PropState::default();
        for prop in ctx.cls.iter().flat_map(|c| &c.props) {
            if prop.visibility != Visibility::Private {
                continue;
            }
            if prop.is_static {
                self_props.track(prop.name.clone());
            } else {
                this_props.track(prop.name.clone());
            }
        }
        Self {
            opts,
            effect_free: true,
            cns_map: IndexMap::new(),
            reads_untracked_constants: false,
            local_static_types: Vec::new(),
            closure_use_types: IndexMap::new(),
            unfoldable_funcs: FxHashSet::default(),
            this_props,
            self_props,
            init_props: IndexMap::new(),
            public_statics: IndexMap::new(),
            unknown_public_statics: Type::BOTTOM,
            may_use_vv: ctx.func.attrs.may_use_vv,
        }
    }

    pub fn with_local_static_types(mut self, types: Vec<Type>) -> Self {
        self.local_static_types = types;
        self
    }

    /// Type of static local `l` as bound on entry; unknown when not bound.
    pub fn local_static_type(&self, l: hhbbc_bc::LocalId) -> Type {
        self.local_static_types
            .get(l.index())
            .cloned()
            .unwrap_or(Type::GEN)
    }

    /// Widen the type of the static of `l` to include `ty`.
    pub fn widen_local_static(&mut self, l: hhbbc_bc::LocalId, ty: &Type) {
        if self.local_static_types.len() <= l.index() {
            self.local_static_types.resize(l.index() + 1, Type::BOTTOM);
        }
        let slot = &mut self.local_static_types[l.index()];
        *slot = slot.join(ty);
    }

    pub fn merge_public_static(&mut self, cls: Option<&str>, name: Option<&str>, ty: &Type) {
        match (cls, name) {
            (Some(cls), Some(name)) => {
                let slot = self
                    .public_statics
                    .entry((cls.into(), name.into()))
                    .or_insert(Type::BOTTOM);
                *slot = slot.join(ty);
            }
            _ => self.unknown_public_statics = self.unknown_public_statics.join(ty),
        }
    }

    pub fn merge_closure_use_types(&mut self, cls_index: u32, uses: Vec<Type>) {
        match self.closure_use_types.get_mut(&cls_index) {
            Some(known) => {
                for (k, u) in known.iter_mut().zip(&uses) {
                    *k = k.join(u);
                }
            }
            None => {
                self.closure_use_types.insert(cls_index, uses);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hhbbc_bc::{Class, Func, Prop, Unit};

    #[test]
    fn test_private_props_are_tracked() {
        let unit = Unit::builder()
            .name("u")
            .classes(vec![Class::builder()
                .name("C")
                .props(vec![
                    Prop::builder().name("a").visibility(Visibility::Private).build(),
                    Prop::builder()
                        .name("s")
                        .visibility(Visibility::Private)
                        .is_static(true)
                        .build(),
                    Prop::builder().name("pub").build(),
                ])
                .build()])
            .build();
        let func = Func::builder().name("m").cls("C").blocks(vec![]).build();
        let mut info = CollectedInfo::new(&Context::new(&unit, &func), CollectionOpts::default());

        info.this_props.merge("a", &Type::INT);
        info.this_props.merge("pub", &Type::INT);
        assert_eq!(info.this_props.get("a"), Some(&Type::INT));
        assert_eq!(info.this_props.get("pub"), None);
        assert_eq!(info.self_props.get("s"), Some(&Type::BOTTOM));

        info.this_props.kill();
        assert_eq!(info.this_props.get("a"), Some(&Type::GEN));
    }

    #[test]
    fn test_public_static_merges() {
        let unit = Unit::builder().name("u").build();
        let func = Func::builder().name("f").blocks(vec![]).build();
        let mut info = CollectedInfo::new(&Context::new(&unit, &func), CollectionOpts::default());
        info.merge_public_static(Some("C"), Some("x"), &Type::INT);
        info.merge_public_static(Some("C"), Some("x"), &Type::STR);
        info.merge_public_static(None, Some("x"), &Type::DBL);
        assert_eq!(
            info.public_statics.get(&(Arc::from("C"), Arc::from("x"))),
            Some(&Type::INT.join(&Type::STR))
        );
        assert_eq!(info.unknown_public_statics, Type::DBL);
    }
}
