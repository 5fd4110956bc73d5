use hhbbc_bc::{AnnotType, Context, TypeConstraint};
use hhbbc_types::{ArrKind, Lattice, ResClass, Type};

use crate::func::{CallContext, ResFunc};

/// Whole-program facts queried during analysis.
///
/// Every query has a conservative answer for names the index cannot resolve;
/// implementations must never answer optimistically. Queries take `&self`:
/// many functions may be analyzed against one index at once, and the only
/// write path, [`fixup_public_static`](Index::fixup_public_static), is
/// synchronized by the implementation.
pub trait Index {
    /// The class `name` refers to from `ctx`, if it is uniquely defined.
    fn resolve_class(&self, ctx: &Context<'_>, name: &str) -> Option<ResClass>;

    fn resolve_func(&self, ctx: &Context<'_>, name: &str) -> ResFunc;

    /// Resolve a namespaced function name that falls back to a global one
    /// when undefined. Resolves only when both names agree on the target.
    fn resolve_func_fallback(&self, ctx: &Context<'_>, name: &str, fallback: &str) -> ResFunc {
        let first = self.resolve_func(ctx, name);
        if first.is_exact() {
            return first;
        }
        let second = self.resolve_func(ctx, fallback);
        if second.is_exact() {
            // The namespaced function might still be defined at runtime.
            return ResFunc::unresolved(second.name().to_owned());
        }
        first
    }

    /// Resolve method `name` called on a value of type `this` (an object or
    /// class type).
    fn resolve_method(&self, ctx: &Context<'_>, this: &Type, name: &str) -> ResFunc;

    /// The constructor run by `new` on `cls`.
    fn resolve_ctor(&self, ctx: &Context<'_>, cls: &ResClass, exact: bool) -> Option<ResFunc>;

    /// The closure class created by `CreateCl` for class slot `cls_index` of
    /// the unit.
    fn resolve_closure_class(&self, ctx: &Context<'_>, cls_index: u32) -> Option<ResClass>;

    /// A class provided by the runtime (`Closure`, `Awaitable`...).
    fn builtin_class(&self, name: &str) -> Option<ResClass>;

    /// Return type of calling `func`; `Type::INIT_GEN` when unknown.
    fn lookup_return_type(&self, ctx: &Context<'_>, func: &ResFunc) -> Type;

    /// Return type of `func` called with the given argument types, for
    /// callees whose result depends on their arguments.
    fn lookup_foldable_return_type(
        &self,
        ctx: &Context<'_>,
        func: &ResFunc,
        call: &CallContext,
    ) -> Type {
        let _ = call;
        self.lookup_return_type(ctx, func)
    }

    /// A global constant's type, `None` when it may be undefined.
    fn lookup_constant(&self, ctx: &Context<'_>, name: &str) -> Option<Type>;

    fn lookup_class_constant(&self, ctx: &Context<'_>, cls: &Type, name: &str) -> Type;

    /// Type of public static property `name` on class `cls`, both given as
    /// types; `Type::INIT_GEN` when either is not known precisely.
    fn lookup_public_static(&self, cls: &Type, name: &Type) -> Type;

    /// Widen the recorded type of a public static property.
    fn fixup_public_static(&self, cls: &str, name: &str, ty: &Type);

    /// Resolve a type alias or class name appearing in a constraint.
    fn resolve_type_name(&self, name: &str) -> AnnotType {
        let _ = name;
        AnnotType::Object
    }

    /// The set of values that satisfy `tc` without a runtime failure.
    fn lookup_constraint(&self, ctx: &Context<'_>, tc: &TypeConstraint) -> Type {
        if tc.soft {
            return Type::INIT_CELL;
        }
        let base = match tc.annot {
            AnnotType::Mixed => return Type::INIT_CELL,
            AnnotType::Null => Type::INIT_NULL,
            AnnotType::Bool => Type::BOOL,
            AnnotType::Int => Type::INT,
            AnnotType::Float => Type::DBL,
            AnnotType::String => Type::STR,
            AnnotType::ArrayKey => Type::ARR_KEY,
            AnnotType::Number => Type::NUM,
            AnnotType::Array => Type::arr_of(ArrKind::Arr),
            AnnotType::Vec => Type::VEC,
            AnnotType::Dict => Type::DICT,
            AnnotType::Keyset => Type::KEYSET,
            AnnotType::Resource => Type::RES,
            AnnotType::Nonnull => Type::INIT_CELL.remove_bits(hhbbc_types::Bits::INIT_NULL),
            AnnotType::Object => {
                let resolved = tc.name.as_deref().map(|n| self.resolve_type_name(n));
                match (resolved, tc.name.as_deref()) {
                    (Some(AnnotType::Object), Some(name)) => self
                        .resolve_class(ctx, name)
                        .map_or(Type::OBJ, Type::sub_obj),
                    (Some(other), _) => {
                        let alias = TypeConstraint {
                            annot: other,
                            name: None,
                            ..tc.clone()
                        };
                        return self.lookup_constraint(ctx, &alias);
                    }
                    _ => Type::OBJ,
                }
            }
            AnnotType::Self_ | AnnotType::This => ctx
                .cls
                .and_then(|c| self.resolve_class(ctx, &c.name))
                .map_or(Type::OBJ, Type::sub_obj),
            AnnotType::Parent => ctx
                .cls
                .and_then(|c| c.parent.as_deref())
                .and_then(|p| self.resolve_class(ctx, p))
                .map_or(Type::OBJ, Type::sub_obj),
            // Strings and arrays can be callable as well.
            AnnotType::Callable => return Type::INIT_CELL,
            AnnotType::NoReturn => Type::BOTTOM,
        };
        if tc.nullable {
            base.join(&Type::INIT_NULL)
        } else {
            base
        }
    }

    /// Values of type `ty` always pass a check against `tc`.
    fn satisfies_constraint(&self, ctx: &Context<'_>, ty: &Type, tc: &TypeConstraint) -> bool {
        if tc.is_mixed() || tc.soft {
            return true;
        }
        if tc.annot == AnnotType::Callable {
            return false;
        }
        ty.subtype_of(&self.lookup_constraint(ctx, tc))
    }
}
