use std::fmt;

macro_rules! identifier {
    ($(#[$attr:meta])* struct $name:ident, $prefix:literal) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<usize> for $name {
            fn from(value: usize) -> Self {
                Self(value as u32)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

identifier! {
    /// Index of a local variable slot in the enclosing function.
    struct LocalId, "L:"
}

identifier! {
    /// Index of a basic block in the enclosing function.
    struct BlockId, "B"
}

identifier! {
    struct IterId, "I:"
}

identifier! {
    /// Class-reference slot, holding a class for the `S`/`ClsRef` ops.
    struct ClsRefSlotId, "S:"
}

identifier! {
    /// Index of a closure class in the enclosing unit.
    struct ClosureId, "C"
}
