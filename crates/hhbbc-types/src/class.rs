use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ClassKind {
    #[default]
    Class,
    Interface,
    Trait,
}

/// Facts about a class that the index resolved by name.
///
/// `parent` forms the single-inheritance chain used for subtyping;
/// `interfaces` lists every interface name the class implements, directly or
/// through its parents.
#[derive(Debug, bon::Builder)]
pub struct ClassInfo {
    #[builder(into)]
    pub name: Arc<str>,
    pub parent: Option<ResClass>,
    #[builder(default)]
    pub interfaces: Vec<Arc<str>>,
    #[builder(default)]
    pub kind: ClassKind,
    /// The class can have no subclasses.
    #[builder(default)]
    pub no_override: bool,
    /// Defined by the system library rather than user code.
    #[builder(default)]
    pub systemlib: bool,
}

/// A resolved class handle. Two handles are equal when they name the same
/// class.
#[derive(Clone)]
pub struct ResClass(Arc<ClassInfo>);

impl ResClass {
    pub fn new(info: ClassInfo) -> Self {
        Self(Arc::new(info))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn info(&self) -> &ClassInfo {
        &self.0
    }

    pub fn parent(&self) -> Option<&ResClass> {
        self.0.parent.as_ref()
    }

    pub fn is_interface(&self) -> bool {
        self.0.kind == ClassKind::Interface
    }

    pub fn is_trait(&self) -> bool {
        self.0.kind == ClassKind::Trait
    }

    pub fn no_override(&self) -> bool {
        self.0.no_override
    }

    /// Walk the class and its parents, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = &ResClass> {
        std::iter::successors(Some(self), |c| c.parent())
    }

    /// Whether every instance of `self` is an instance of `other`.
    pub fn subtype_of(&self, other: &ResClass) -> bool {
        if other.is_interface() {
            return self.name() == other.name()
                || self.0.interfaces.iter().any(|i| **i == *other.name());
        }
        self.ancestors().any(|c| c == other)
    }

    /// Whether some object could be an instance of both classes.
    pub fn could_be(&self, other: &ResClass) -> bool {
        if self.subtype_of(other) || other.subtype_of(self) {
            return true;
        }
        let open = |c: &ResClass| c.is_interface() && !c.no_override();
        open(self) || open(other)
    }

    /// Nearest common ancestor along the parent chains, if any.
    pub fn common_ancestor(&self, other: &ResClass) -> Option<ResClass> {
        self.ancestors().find(|c| other.subtype_of(c)).cloned()
    }
}

impl PartialEq for ResClass {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for ResClass {}

impl Hash for ResClass {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl fmt::Debug for ResClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for ResClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
