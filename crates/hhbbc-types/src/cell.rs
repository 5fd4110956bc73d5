use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Flavour of an array value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArrKind {
    /// Mixed PHP array with int/string keys and insertion order.
    Arr,
    Vec,
    Dict,
    Keyset,
}

impl ArrKind {
    pub fn name(self) -> &'static str {
        match self {
            ArrKind::Arr => "array",
            ArrKind::Vec => "vec",
            ArrKind::Dict => "dict",
            ArrKind::Keyset => "keyset",
        }
    }
}

/// A concrete, immutable value known at analysis time.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Cell {
    Uninit,
    Null,
    Bool(bool),
    Int(i64),
    Dbl(f64),
    Str(Arc<str>),
    Arr(Arc<ArrayData>),
}

/// Array literal contents, in insertion order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArrayData {
    pub kind: ArrKind,
    pub entries: Vec<(Cell, Cell)>,
}

impl Cell {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Cell::Str(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null | Cell::Uninit)
    }

    /// PHP truthiness.
    pub fn to_bool(&self) -> bool {
        match self {
            Cell::Uninit | Cell::Null => false,
            Cell::Bool(b) => *b,
            Cell::Int(i) => *i != 0,
            Cell::Dbl(d) => *d != 0.0,
            Cell::Str(s) => !(s.is_empty() || &**s == "0"),
            Cell::Arr(a) => !a.entries.is_empty(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Cell::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_arr(&self) -> Option<&ArrayData> {
        match self {
            Cell::Arr(a) => Some(a),
            _ => None,
        }
    }

    /// Whether this is a double that compares unequal to itself.
    pub fn is_nan(&self) -> bool {
        matches!(self, Cell::Dbl(d) if d.is_nan())
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Cell::Uninit, Cell::Uninit) | (Cell::Null, Cell::Null) => true,
            (Cell::Bool(a), Cell::Bool(b)) => a == b,
            (Cell::Int(a), Cell::Int(b)) => a == b,
            (Cell::Dbl(a), Cell::Dbl(b)) => a.to_bits() == b.to_bits(),
            (Cell::Str(a), Cell::Str(b)) => a == b,
            (Cell::Arr(a), Cell::Arr(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Cell {}

impl Hash for Cell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Cell::Uninit | Cell::Null => {}
            Cell::Bool(b) => b.hash(state),
            Cell::Int(i) => i.hash(state),
            Cell::Dbl(d) => d.to_bits().hash(state),
            Cell::Str(s) => s.hash(state),
            Cell::Arr(a) => a.hash(state),
        }
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Dbl(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Str(value.into())
    }
}

impl From<ArrayData> for Cell {
    fn from(value: ArrayData) -> Self {
        Cell::Arr(Arc::new(value))
    }
}

impl ArrayData {
    pub fn empty(kind: ArrKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    /// Build a list-shaped array (keys `0..n`); keysets use the values as
    /// keys.
    pub fn packed(kind: ArrKind, values: impl IntoIterator<Item = Cell>) -> Option<Self> {
        let mut arr = Self::empty(kind);
        for v in values {
            arr = arr.append(v)?;
        }
        Some(arr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Cell) -> Option<&Cell> {
        let key = self.normalize_key(key)?;
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &Cell) -> bool {
        self.get(key).is_some()
    }

    /// Set `key` to `value`, returning the new array, or `None` when the key
    /// is illegal for this kind of array.
    pub fn set(&self, key: &Cell, value: Cell) -> Option<Self> {
        if matches!(self.kind, ArrKind::Vec | ArrKind::Keyset) {
            // Vec writes must hit an existing index; keysets only append.
            let key = self.normalize_key(key)?;
            if self.kind == ArrKind::Keyset || !self.entries.iter().any(|(k, _)| *k == key) {
                return None;
            }
        }
        let key = self.normalize_key(key)?;
        let mut out = self.clone();
        match out.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => out.entries.push((key, value)),
        }
        Some(out)
    }

    /// Append `value` at the next integer key.
    pub fn append(&self, value: Cell) -> Option<Self> {
        let mut out = self.clone();
        if self.kind == ArrKind::Keyset {
            let key = self.normalize_key(&value)?;
            if !out.entries.iter().any(|(k, _)| *k == key) {
                out.entries.push((key.clone(), key));
            }
            return Some(out);
        }
        let next = self
            .entries
            .iter()
            .filter_map(|(k, _)| k.as_int())
            .max()
            .map_or(Some(0), |m| m.checked_add(1))?;
        out.entries.push((Cell::Int(next.max(0)), value));
        Some(out)
    }

    /// Canonical key form: integer-like strings become ints in PHP arrays,
    /// and only ints and strings are legal keys.
    fn normalize_key(&self, key: &Cell) -> Option<Cell> {
        match key {
            Cell::Int(_) => Some(key.clone()),
            Cell::Str(s) if self.kind == ArrKind::Arr => Some(
                canonical_int_key(s)
                    .map(Cell::Int)
                    .unwrap_or_else(|| key.clone()),
            ),
            Cell::Str(_) if self.kind != ArrKind::Vec => Some(key.clone()),
            Cell::Null if self.kind == ArrKind::Arr => Some(Cell::str("")),
            Cell::Bool(b) if self.kind == ArrKind::Arr => Some(Cell::Int(*b as i64)),
            _ => None,
        }
    }
}

/// A string like `"12"` or `"-3"` that PHP arrays store as an integer key.
fn canonical_int_key(s: &str) -> Option<i64> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty()
        || !digits.bytes().all(|b| b.is_ascii_digit())
        || (digits.len() > 1 && digits.starts_with('0'))
        || s == "-0"
    {
        return None;
    }
    s.parse().ok()
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Uninit => f.write_str("uninit"),
            Cell::Null => f.write_str("null"),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Dbl(d) => write!(f, "{d:?}"),
            Cell::Str(s) => write!(f, "{:?}", &**s),
            Cell::Arr(a) => write!(f, "{a}"),
        }
    }
}

impl fmt::Display for ArrayData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.kind.name())?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match self.kind {
                ArrKind::Vec | ArrKind::Keyset => write!(f, "{v}")?,
                ArrKind::Arr | ArrKind::Dict => write!(f, "{k} => {v}")?,
            }
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Cell::str("0").to_bool());
        assert!(!Cell::str("").to_bool());
        assert!(Cell::str("0.0").to_bool());
        assert!(Cell::Dbl(f64::NAN).to_bool());
        assert!(!Cell::Dbl(-0.0).to_bool());
        assert!(!Cell::from(ArrayData::empty(ArrKind::Vec)).to_bool());
    }

    #[test]
    fn test_nan_cells_are_structurally_equal() {
        assert_eq!(Cell::Dbl(f64::NAN), Cell::Dbl(f64::NAN));
        assert_ne!(Cell::Dbl(0.0), Cell::Dbl(-0.0));
    }

    #[test]
    fn test_php_array_keys_are_canonicalized() {
        let arr = ArrayData::empty(ArrKind::Arr)
            .set(&Cell::str("12"), Cell::Int(1))
            .unwrap();
        assert_eq!(arr.entries[0].0, Cell::Int(12));
        assert!(arr.contains_key(&Cell::Int(12)));
        let arr = arr.set(&Cell::str("012"), Cell::Int(2)).unwrap();
        assert_eq!(arr.entries[1].0, Cell::str("012"));
    }

    #[test]
    fn test_append_and_vec_writes() {
        let v = ArrayData::packed(ArrKind::Vec, [Cell::Int(7), Cell::Int(8)]).unwrap();
        assert_eq!(v.get(&Cell::Int(1)), Some(&Cell::Int(8)));
        assert!(v.set(&Cell::Int(5), Cell::Null).is_none());
        assert!(v.set(&Cell::str("a"), Cell::Null).is_none());
        let ks = ArrayData::packed(ArrKind::Keyset, [Cell::str("a"), Cell::str("a")]).unwrap();
        assert_eq!(ks.len(), 1);
    }

    #[test]
    fn test_display() {
        let d = ArrayData::empty(ArrKind::Dict)
            .set(&Cell::str("k"), Cell::Int(1))
            .unwrap();
        assert_eq!(Cell::from(d).to_string(), r#"dict["k" => 1]"#);
    }
}
