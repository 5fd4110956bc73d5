use std::sync::Arc;

use hhbbc_bc::Context;
use hhbbc_types::{ClassInfo, Lattice, ResClass, Type};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::func::{FuncInfo, ResFunc};
use crate::index::Index;

type Key = Arc<str>;

/// An [`Index`] backed by in-memory tables filled before analysis.
///
/// # Example
///
/// ```
/// use hhbbc_index::{FuncInfo, MemoryIndex};
/// use hhbbc_types::{ClassInfo, Type};
///
/// let index = MemoryIndex::new()
///     .with_class(ClassInfo::builder().name("C").build())
///     .with_func(FuncInfo::builder().name("f").ret(Type::INT).build())
///     .with_constant("ANSWER", Type::ival(42));
/// # let _ = index;
/// ```
#[derive(Default)]
pub struct MemoryIndex {
    classes: FxHashMap<Key, ResClass>,
    /// Classes defined more than once cannot be resolved.
    ambiguous: FxHashSet<Key>,
    builtin_classes: FxHashMap<Key, ResClass>,
    closures: FxHashMap<u32, ResClass>,
    funcs: FxHashMap<Key, Arc<FuncInfo>>,
    methods: FxHashMap<(Key, Key), Arc<FuncInfo>>,
    return_types: FxHashMap<Key, Type>,
    constants: FxHashMap<Key, Type>,
    class_constants: FxHashMap<(Key, Key), Type>,
    public_statics: RwLock<FxHashMap<(Key, Key), Type>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, info: ClassInfo) -> Self {
        let cls = ResClass::new(info);
        let name: Key = cls.name().into();
        if self.classes.insert(name.clone(), cls).is_some() {
            self.ambiguous.insert(name);
        }
        self
    }

    pub fn with_builtin_class(mut self, info: ClassInfo) -> Self {
        let cls = ResClass::new(info);
        self.builtin_classes.insert(cls.name().into(), cls.clone());
        self.classes.insert(cls.name().into(), cls);
        self
    }

    pub fn with_closure(mut self, cls_index: u32, info: ClassInfo) -> Self {
        self.closures.insert(cls_index, ResClass::new(info));
        self
    }

    pub fn with_func(mut self, info: FuncInfo) -> Self {
        match info.cls.clone() {
            Some(cls) => {
                self.methods.insert((cls, info.name.clone()), Arc::new(info));
            }
            None => {
                self.funcs.insert(info.name.clone(), Arc::new(info));
            }
        }
        self
    }

    /// Record an inferred return type, overriding the declared one. Methods
    /// are keyed as `Class::method`.
    pub fn with_return_type(mut self, name: impl Into<Key>, ty: Type) -> Self {
        self.return_types.insert(name.into(), ty);
        self
    }

    pub fn with_constant(mut self, name: impl Into<Key>, ty: Type) -> Self {
        self.constants.insert(name.into(), ty);
        self
    }

    pub fn with_class_constant(
        mut self,
        cls: impl Into<Key>,
        name: impl Into<Key>,
        ty: Type,
    ) -> Self {
        self.class_constants.insert((cls.into(), name.into()), ty);
        self
    }

    pub fn with_public_static(self, cls: impl Into<Key>, name: impl Into<Key>, ty: Type) -> Self {
        self.public_statics.write().insert((cls.into(), name.into()), ty);
        self
    }

    /// Current type of a public static property, if recorded.
    pub fn public_static(&self, cls: &str, name: &str) -> Option<Type> {
        self.public_statics
            .read()
            .get(&(Key::from(cls), Key::from(name)))
            .cloned()
    }

    fn find_method(&self, cls: &ResClass, name: &str) -> Option<Arc<FuncInfo>> {
        cls.ancestors()
            .find_map(|c| self.methods.get(&(Key::from(c.name()), Key::from(name))))
            .cloned()
    }

    fn return_key(info: &FuncInfo) -> String {
        match &info.cls {
            Some(cls) => format!("{cls}::{}", info.name),
            None => info.name.to_string(),
        }
    }
}

impl Index for MemoryIndex {
    fn resolve_class(&self, _ctx: &Context<'_>, name: &str) -> Option<ResClass> {
        if self.ambiguous.contains(name) {
            return None;
        }
        self.classes.get(name).cloned()
    }

    fn resolve_func(&self, _ctx: &Context<'_>, name: &str) -> ResFunc {
        match self.funcs.get(name) {
            Some(info) => ResFunc::exact(info.clone()),
            None => ResFunc::unresolved(name),
        }
    }

    fn resolve_method(&self, _ctx: &Context<'_>, this: &Type, name: &str) -> ResFunc {
        let Some(spec) = this.cls_spec() else {
            return ResFunc::unresolved(name);
        };
        match self.find_method(&spec.cls, name) {
            // A subclass could override the method unless the class is final.
            Some(info) if spec.exact || spec.cls.no_override() => ResFunc::exact(info),
            Some(_) => ResFunc::method_name(name),
            None => ResFunc::unresolved(name),
        }
    }

    fn resolve_ctor(&self, _ctx: &Context<'_>, cls: &ResClass, exact: bool) -> Option<ResFunc> {
        if !exact && !cls.no_override() {
            return None;
        }
        self.find_method(cls, "__construct").map(ResFunc::exact)
    }

    fn resolve_closure_class(&self, _ctx: &Context<'_>, cls_index: u32) -> Option<ResClass> {
        self.closures.get(&cls_index).cloned()
    }

    fn builtin_class(&self, name: &str) -> Option<ResClass> {
        self.builtin_classes.get(name).cloned()
    }

    fn lookup_return_type(&self, _ctx: &Context<'_>, func: &ResFunc) -> Type {
        let Some(info) = func.info() else {
            return Type::INIT_GEN;
        };
        if let Some(t) = self.return_types.get(Self::return_key(info).as_str()) {
            return t.clone();
        }
        info.ret.clone().unwrap_or(Type::INIT_GEN)
    }

    fn lookup_constant(&self, _ctx: &Context<'_>, name: &str) -> Option<Type> {
        self.constants.get(name).cloned()
    }

    fn lookup_class_constant(&self, _ctx: &Context<'_>, cls: &Type, name: &str) -> Type {
        let Some(spec) = cls.cls_spec() else {
            return Type::INIT_CELL;
        };
        spec.cls
            .ancestors()
            .find_map(|c| {
                self.class_constants
                    .get(&(Key::from(c.name()), Key::from(name)))
            })
            .cloned()
            .unwrap_or(Type::INIT_CELL)
    }

    fn lookup_public_static(&self, cls: &Type, name: &Type) -> Type {
        let (Some(spec), Some(name)) = (cls.cls_spec(), name.tv()) else {
            return Type::INIT_GEN;
        };
        let Some(name) = name.as_str() else {
            return Type::INIT_GEN;
        };
        let statics = self.public_statics.read();
        spec.cls
            .ancestors()
            .find_map(|c| statics.get(&(Key::from(c.name()), Key::from(name))))
            .cloned()
            .unwrap_or(Type::INIT_GEN)
    }

    fn fixup_public_static(&self, cls: &str, name: &str, ty: &Type) {
        let mut statics = self.public_statics.write();
        let slot = statics
            .entry((Key::from(cls), Key::from(name)))
            .or_insert(Type::BOTTOM);
        let widened = slot.join(ty);
        if widened != *slot {
            debug!(%cls, %name, from = %slot, to = %widened, "widening public static");
            *slot = widened;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hhbbc_bc::{AnnotType, Func, TypeConstraint, Unit};

    fn with_ctx<R>(f: impl FnOnce(&Context<'_>) -> R) -> R {
        let unit = Unit::builder().name("u").build();
        let func = Func::builder().name("main").blocks(vec![]).build();
        f(&Context::new(&unit, &func))
    }

    fn hierarchy() -> MemoryIndex {
        let base = ResClass::new(ClassInfo::builder().name("Base").build());
        MemoryIndex::new()
            .with_class(ClassInfo::builder().name("Base").build())
            .with_class(ClassInfo::builder().name("Leaf").parent(base).no_override(true).build())
            .with_func(FuncInfo::builder().name("m").cls("Base").ret(Type::INT).build())
    }

    #[test]
    fn test_method_resolution_respects_overrides() {
        let index = hierarchy();
        with_ctx(|ctx| {
            let base = index.resolve_class(ctx, "Base").unwrap();
            let leaf = index.resolve_class(ctx, "Leaf").unwrap();
            assert!(!index.resolve_method(ctx, &Type::sub_obj(base.clone()), "m").is_exact());
            assert!(index.resolve_method(ctx, &Type::obj_exact(base), "m").is_exact());
            let found = index.resolve_method(ctx, &Type::sub_obj(leaf), "m");
            assert!(found.is_exact());
            assert_eq!(index.lookup_return_type(ctx, &found), Type::INT);
        });
    }

    #[test]
    fn test_duplicate_classes_do_not_resolve() {
        let index = MemoryIndex::new()
            .with_class(ClassInfo::builder().name("C").build())
            .with_class(ClassInfo::builder().name("C").build());
        with_ctx(|ctx| assert!(index.resolve_class(ctx, "C").is_none()));
    }

    #[test]
    fn test_fallback_resolution() {
        let index = MemoryIndex::new().with_func(FuncInfo::builder().name("strlen").build());
        with_ctx(|ctx| {
            assert!(index.resolve_func_fallback(ctx, "strlen", "strlen").is_exact());
            assert!(!index.resolve_func_fallback(ctx, "ns\\strlen", "strlen").is_exact());
        });
    }

    #[test]
    fn test_fixup_public_static_widens() {
        let index = hierarchy().with_public_static("Base", "count", Type::INT);
        index.fixup_public_static("Base", "count", &Type::INIT_NULL);
        assert_eq!(
            index.public_static("Base", "count"),
            Some(Type::INT.join(&Type::INIT_NULL))
        );
        with_ctx(|ctx| {
            let leaf = Type::sub_cls(index.resolve_class(ctx, "Leaf").unwrap());
            let t = index.lookup_public_static(&leaf, &Type::sval("count"));
            assert_eq!(t, Type::INT.join(&Type::INIT_NULL));
            assert_eq!(index.lookup_public_static(&leaf, &Type::STR), Type::INIT_GEN);
        });
    }

    #[test]
    fn test_constraints() {
        let index = hierarchy();
        with_ctx(|ctx| {
            let int = TypeConstraint::new(AnnotType::Int);
            assert!(index.satisfies_constraint(ctx, &Type::ival(3), &int));
            assert!(!index.satisfies_constraint(ctx, &Type::NUM, &int));
            let opt_base = TypeConstraint::object("Base").nullable();
            let leaf = index.resolve_class(ctx, "Leaf").unwrap();
            assert!(index.satisfies_constraint(ctx, &Type::sub_obj(leaf).opt(), &opt_base));
            let callable = TypeConstraint::new(AnnotType::Callable);
            assert!(!index.satisfies_constraint(ctx, &Type::sval("f"), &callable));
        });
    }
}
