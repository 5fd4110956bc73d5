use std::fmt;
use std::sync::Arc;

use hhbbc_bc::Param;
use hhbbc_types::Type;

/// What the index knows about one function or method.
#[derive(Debug, bon::Builder)]
pub struct FuncInfo {
    #[builder(into)]
    pub name: Arc<str>,
    #[builder(into)]
    pub cls: Option<Arc<str>>,
    #[builder(default)]
    pub params: Vec<Param>,
    /// Calls with constant arguments can be evaluated at analysis time.
    #[builder(default)]
    pub foldable: bool,
    #[builder(default)]
    pub builtin: bool,
    #[builder(default)]
    pub is_async: bool,
    /// May read or write the locals of its caller (`compact`, `extract`...).
    #[builder(default)]
    pub might_access_caller_frame: bool,
    /// Declared or previously inferred return type.
    pub ret: Option<Type>,
}

impl FuncInfo {
    /// Whether argument `i` is passed by reference. Arguments past the end
    /// of the parameter list follow a trailing variadic.
    pub fn by_ref(&self, i: u32) -> bool {
        match self.params.get(i as usize) {
            Some(p) => p.by_ref,
            None => self.params.last().is_some_and(|p| p.variadic && p.by_ref),
        }
    }
}

/// A function reference as far as the index could resolve it.
///
/// Unresolved references keep only the name; every query on them answers
/// conservatively.
#[derive(Clone)]
pub struct ResFunc {
    name: Arc<str>,
    info: Option<Arc<FuncInfo>>,
    might_access_caller_frame: bool,
    cant_be_magic_call: bool,
}

impl ResFunc {
    pub fn exact(info: Arc<FuncInfo>) -> Self {
        Self {
            name: info.name.clone(),
            might_access_caller_frame: info.might_access_caller_frame,
            cant_be_magic_call: true,
            info: Some(info),
        }
    }

    /// A reference the index could not pin down.
    pub fn unresolved(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            info: None,
            might_access_caller_frame: true,
            cant_be_magic_call: false,
        }
    }

    /// A method known by name only, on a class that cannot dispatch through
    /// `__call`.
    pub fn method_name(name: impl Into<Arc<str>>) -> Self {
        Self {
            cant_be_magic_call: true,
            might_access_caller_frame: false,
            ..Self::unresolved(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> Option<&FuncInfo> {
        self.info.as_deref()
    }

    pub fn is_exact(&self) -> bool {
        self.info.is_some()
    }

    pub fn might_access_caller_frame(&self) -> bool {
        self.might_access_caller_frame
    }

    pub fn cant_be_magic_call(&self) -> bool {
        self.cant_be_magic_call
    }

    pub fn is_foldable(&self) -> bool {
        self.info.as_ref().is_some_and(|i| i.foldable)
    }

    pub fn is_async(&self) -> bool {
        self.info.as_ref().is_some_and(|i| i.is_async)
    }

    /// `Some(by_ref)` when the callee's parameter `i` is known.
    pub fn by_ref(&self, i: u32) -> Option<bool> {
        self.info.as_ref().map(|info| info.by_ref(i))
    }
}

impl PartialEq for ResFunc {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.is_exact() == other.is_exact()
    }
}

impl fmt::Debug for ResFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_exact() {
            write!(f, "func({})", self.name)
        } else {
            write!(f, "func?({})", self.name)
        }
    }
}

/// The argument types of one call, for context-sensitive return typing.
#[derive(Clone, Debug, PartialEq)]
pub struct CallContext {
    pub args: Vec<Type>,
    /// Type of `$this` or the called class; `Type::BOTTOM` for plain
    /// functions.
    pub context: Type,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_ref_follows_variadic() {
        let info = FuncInfo::builder()
            .name("f")
            .params(vec![
                Param::builder().name("a").build(),
                Param::builder().name("rest").by_ref(true).variadic(true).build(),
            ])
            .build();
        assert!(!info.by_ref(0));
        assert!(info.by_ref(1));
        assert!(info.by_ref(7));
    }

    #[test]
    fn test_unresolved_is_conservative() {
        let f = ResFunc::unresolved("g");
        assert_eq!(f.by_ref(0), None);
        assert!(f.might_access_caller_frame());
        assert!(!f.is_foldable());
        insta::assert_snapshot!(format!("{f:?}"), @"func?(g)");
    }
}
