use std::cmp::Ordering;
use std::sync::Arc;

use crate::cell::{ArrKind, ArrayData, Cell};

/// Operators the concrete-value oracle knows how to evaluate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    AddO,
    SubO,
    MulO,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Shl,
    Shr,
    Not,
    Xor,
    Concat,
    Same,
    NSame,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Cmp,
    CastBool,
    CastInt,
    CastDouble,
    CastString,
    CastArray,
    CastVec,
    CastDict,
    CastKeyset,
}

/// Evaluates operators on concrete values.
///
/// Returning `None` means "not evaluable at analysis time": the operation
/// could warn, throw, or depend on runtime state.
pub trait Oracle {
    fn eval(&self, op: CellOp, args: &[Cell]) -> Option<Cell>;

    /// Evaluate a call to a foldable builtin function on constant arguments.
    fn fold_builtin(&self, _name: &str, _args: &[Cell]) -> Option<Cell> {
        None
    }
}

/// PHP scalar semantics for null, bool, int, double and string operands.
///
/// Anything that would emit a notice (non-numeric strings in arithmetic,
/// array-to-string conversion, division by zero) is reported as not
/// evaluable.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScalarOracle;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Num {
    Int(i64),
    Dbl(f64),
}

impl Num {
    fn to_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Dbl(d) => d,
        }
    }

    fn into_cell(self) -> Cell {
        match self {
            Num::Int(i) => Cell::Int(i),
            Num::Dbl(d) => Cell::Dbl(d),
        }
    }
}

/// A string PHP treats as numeric without any notice.
fn numeric_str(s: &str) -> Option<Num> {
    let t = s.trim_start_matches([' ', '\t', '\n', '\r', '\x0b', '\x0c']);
    if t.is_empty() {
        return None;
    }
    if let Ok(i) = t.parse::<i64>() {
        return Some(Num::Int(i));
    }
    let valid = t
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
    if !valid || !t.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    t.parse::<f64>().ok().map(Num::Dbl)
}

fn to_num(c: &Cell) -> Option<Num> {
    match c {
        Cell::Null => Some(Num::Int(0)),
        Cell::Bool(b) => Some(Num::Int(*b as i64)),
        Cell::Int(i) => Some(Num::Int(*i)),
        Cell::Dbl(d) => Some(Num::Dbl(*d)),
        Cell::Str(s) => numeric_str(s),
        Cell::Uninit | Cell::Arr(_) => None,
    }
}

fn dbl_to_int(d: f64) -> Option<i64> {
    (d.is_finite() && d >= i64::MIN as f64 && d < i64::MAX as f64).then(|| d as i64)
}

fn to_int(c: &Cell) -> Option<i64> {
    match to_num(c)? {
        Num::Int(i) => Some(i),
        Num::Dbl(d) => dbl_to_int(d),
    }
}

/// PHP string conversion, for the values that convert without a notice.
pub fn cell_to_string(c: &Cell) -> Option<Arc<str>> {
    match c {
        Cell::Null => Some("".into()),
        Cell::Bool(true) => Some("1".into()),
        Cell::Bool(false) => Some("".into()),
        Cell::Int(i) => Some(i.to_string().into()),
        Cell::Dbl(d) => Some(dbl_to_string(*d).into()),
        Cell::Str(s) => Some(s.clone()),
        Cell::Uninit | Cell::Arr(_) => None,
    }
}

/// Significant digits PHP prints for a double.
const DBL_PRECISION: i32 = 14;

/// `%.14G` as PHP prints it: trailing zeros dropped, exponents written
/// `1.0E+25` and negative zero kept as `-0`.
fn dbl_to_string(d: f64) -> String {
    if d.is_nan() {
        return "NAN".into();
    }
    if d.is_infinite() {
        return if d > 0.0 { "INF" } else { "-INF" }.into();
    }
    let mut out = String::new();
    if d.is_sign_negative() {
        out.push('-');
    }
    if d == 0.0 {
        out.push('0');
        return out;
    }

    // `d.ddddddddddddde<exp>`, correctly rounded to the precision.
    let sci = format!("{:.*e}", (DBL_PRECISION - 1) as usize, d.abs());
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let digits = digits.trim_end_matches('0');
    // Position of the decimal point relative to the first digit.
    let decpt = exp + 1;

    if decpt < -3 || decpt > DBL_PRECISION {
        let (first, rest) = digits.split_at(1);
        out.push_str(first);
        out.push('.');
        out.push_str(if rest.is_empty() { "0" } else { rest });
        out.push('E');
        out.push(if exp < 0 { '-' } else { '+' });
        out.push_str(&exp.abs().to_string());
    } else if decpt <= 0 {
        out.push_str("0.");
        out.extend(std::iter::repeat('0').take(decpt.unsigned_abs() as usize));
        out.push_str(digits);
    } else {
        let decpt = decpt as usize;
        if digits.len() <= decpt {
            out.push_str(digits);
            out.extend(std::iter::repeat('0').take(decpt - digits.len()));
        } else {
            out.push_str(&digits[..decpt]);
            out.push('.');
            out.push_str(&digits[decpt..]);
        }
    }
    out
}

fn arith(op: CellOp, a: Num, b: Num) -> Option<Cell> {
    use Num::{Dbl, Int};
    let out = match (op, a, b) {
        (CellOp::Add, Int(x), Int(y)) => Int(x.wrapping_add(y)),
        (CellOp::Sub, Int(x), Int(y)) => Int(x.wrapping_sub(y)),
        (CellOp::Mul, Int(x), Int(y)) => Int(x.wrapping_mul(y)),
        (CellOp::AddO, Int(x), Int(y)) => x
            .checked_add(y)
            .map_or(Dbl(x as f64 + y as f64), Int),
        (CellOp::SubO, Int(x), Int(y)) => x
            .checked_sub(y)
            .map_or(Dbl(x as f64 - y as f64), Int),
        (CellOp::MulO, Int(x), Int(y)) => x
            .checked_mul(y)
            .map_or(Dbl(x as f64 * y as f64), Int),
        (CellOp::Add | CellOp::AddO, x, y) => Dbl(x.to_f64() + y.to_f64()),
        (CellOp::Sub | CellOp::SubO, x, y) => Dbl(x.to_f64() - y.to_f64()),
        (CellOp::Mul | CellOp::MulO, x, y) => Dbl(x.to_f64() * y.to_f64()),
        (CellOp::Div, _, y) if y.to_f64() == 0.0 => return None,
        (CellOp::Div, Int(x), Int(y)) => match x.checked_rem(y) {
            Some(0) => Int(x / y),
            _ => Dbl(x as f64 / y as f64),
        },
        (CellOp::Div, x, y) => Dbl(x.to_f64() / y.to_f64()),
        (CellOp::Mod, x, y) => {
            let x = match x {
                Int(i) => i,
                Dbl(d) => dbl_to_int(d)?,
            };
            let y = match y {
                Int(i) => i,
                Dbl(d) => dbl_to_int(d)?,
            };
            if y == 0 {
                return None;
            }
            Int(x.checked_rem(y).unwrap_or(0))
        }
        (CellOp::Pow, Int(x), Int(y)) if y >= 0 => match u32::try_from(y)
            .ok()
            .and_then(|e| x.checked_pow(e))
        {
            Some(v) => Int(v),
            None => Dbl((x as f64).powf(y as f64)),
        },
        (CellOp::Pow, x, y) => Dbl(x.to_f64().powf(y.to_f64())),
        _ => return None,
    };
    Some(out.into_cell())
}

fn bitwise(op: CellOp, a: &Cell, b: &Cell) -> Option<Cell> {
    if let (Cell::Str(x), Cell::Str(y)) = (a, b) {
        if matches!(op, CellOp::Shl | CellOp::Shr) {
            return None;
        }
        let (x, y) = (x.as_bytes(), y.as_bytes());
        let bytes: Vec<u8> = match op {
            CellOp::BitAnd => x.iter().zip(y).map(|(p, q)| p & q).collect(),
            CellOp::BitXor => x.iter().zip(y).map(|(p, q)| p ^ q).collect(),
            _ => {
                let (long, short) = if x.len() >= y.len() { (x, y) } else { (y, x) };
                long.iter()
                    .enumerate()
                    .map(|(i, p)| p | short.get(i).copied().unwrap_or(0))
                    .collect()
            }
        };
        return String::from_utf8(bytes).ok().map(|s| Cell::str(s));
    }
    let int_like = |c: &Cell| matches!(c, Cell::Null | Cell::Bool(_) | Cell::Int(_));
    if !int_like(a) || !int_like(b) {
        return None;
    }
    let (x, y) = (to_int(a)?, to_int(b)?);
    let out = match op {
        CellOp::BitAnd => x & y,
        CellOp::BitOr => x | y,
        CellOp::BitXor => x ^ y,
        CellOp::Shl | CellOp::Shr if y < 0 => return None,
        CellOp::Shl if y >= 64 => 0,
        CellOp::Shr if y >= 64 => {
            if x < 0 {
                -1
            } else {
                0
            }
        }
        CellOp::Shl => x.wrapping_shl(y as u32),
        CellOp::Shr => x >> y,
        _ => return None,
    };
    Some(Cell::Int(out))
}

/// Strict (`===`) equality. Doubles compare numerically, so `NAN` is never
/// the same as itself.
pub fn cell_same(a: &Cell, b: &Cell) -> bool {
    match (a, b) {
        (Cell::Uninit | Cell::Null, Cell::Uninit | Cell::Null) => true,
        (Cell::Bool(x), Cell::Bool(y)) => x == y,
        (Cell::Int(x), Cell::Int(y)) => x == y,
        (Cell::Dbl(x), Cell::Dbl(y)) => x == y,
        (Cell::Str(x), Cell::Str(y)) => x == y,
        (Cell::Arr(x), Cell::Arr(y)) => {
            x.kind == y.kind
                && x.len() == y.len()
                && x.entries
                    .iter()
                    .zip(&y.entries)
                    .all(|((k1, v1), (k2, v2))| cell_same(k1, k2) && cell_same(v1, v2))
        }
        _ => false,
    }
}

/// Loose comparison ordering, for the scalar combinations where PHP's rules
/// are unambiguous.
fn loose_cmp(a: &Cell, b: &Cell) -> Option<Ordering> {
    match (a, b) {
        (Cell::Uninit | Cell::Null, Cell::Uninit | Cell::Null) => Some(Ordering::Equal),
        (Cell::Bool(_), _) | (_, Cell::Bool(_)) | (Cell::Null, _) | (_, Cell::Null)
            if !matches!(a, Cell::Str(_)) && !matches!(b, Cell::Str(_)) =>
        {
            Some(a.to_bool().cmp(&b.to_bool()))
        }
        (Cell::Null, Cell::Str(s)) => Some("".cmp(&**s)),
        (Cell::Str(s), Cell::Null) => Some((**s).cmp("")),
        (Cell::Bool(_), Cell::Str(_)) | (Cell::Str(_), Cell::Bool(_)) => {
            Some(a.to_bool().cmp(&b.to_bool()))
        }
        (Cell::Str(x), Cell::Str(y)) => match (numeric_str(x), numeric_str(y)) {
            (Some(p), Some(q)) => num_cmp(p, q),
            _ => Some(x.as_bytes().cmp(y.as_bytes())),
        },
        (Cell::Int(_) | Cell::Dbl(_), Cell::Int(_) | Cell::Dbl(_))
        | (Cell::Str(_), Cell::Int(_) | Cell::Dbl(_))
        | (Cell::Int(_) | Cell::Dbl(_), Cell::Str(_)) => num_cmp(to_num(a)?, to_num(b)?),
        _ => None,
    }
}

fn num_cmp(a: Num, b: Num) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
        (x, y) => x.to_f64().partial_cmp(&y.to_f64()),
    }
}

fn cast(op: CellOp, c: &Cell) -> Option<Cell> {
    let out = match op {
        CellOp::CastBool => Cell::Bool(c.to_bool()),
        CellOp::CastInt => Cell::Int(match c {
            Cell::Arr(a) => !a.is_empty() as i64,
            _ => to_int(c)?,
        }),
        CellOp::CastDouble => Cell::Dbl(to_num(c)?.to_f64()),
        CellOp::CastString => Cell::Str(cell_to_string(c)?),
        CellOp::CastArray => match c {
            Cell::Uninit | Cell::Null => ArrayData::empty(ArrKind::Arr).into(),
            Cell::Arr(a) => {
                let mut out = ArrayData::empty(ArrKind::Arr);
                for (k, v) in &a.entries {
                    out = out.set(k, v.clone())?;
                }
                out.into()
            }
            scalar => ArrayData::packed(ArrKind::Arr, [scalar.clone()])?.into(),
        },
        CellOp::CastVec | CellOp::CastDict | CellOp::CastKeyset => {
            let kind = match op {
                CellOp::CastVec => ArrKind::Vec,
                CellOp::CastDict => ArrKind::Dict,
                _ => ArrKind::Keyset,
            };
            let Cell::Arr(a) = c else { return None };
            let out = match kind {
                ArrKind::Vec => ArrayData::packed(kind, a.entries.iter().map(|(_, v)| v.clone()))?,
                ArrKind::Keyset => {
                    ArrayData::packed(kind, a.entries.iter().map(|(_, v)| v.clone()))?
                }
                _ => {
                    let mut out = ArrayData::empty(kind);
                    for (k, v) in &a.entries {
                        out = out.set(k, v.clone())?;
                    }
                    out
                }
            };
            out.into()
        }
        _ => return None,
    };
    Some(out)
}

impl Oracle for ScalarOracle {
    fn eval(&self, op: CellOp, args: &[Cell]) -> Option<Cell> {
        match (op, args) {
            (
                CellOp::Add
                | CellOp::Sub
                | CellOp::Mul
                | CellOp::Div
                | CellOp::Mod
                | CellOp::Pow
                | CellOp::AddO
                | CellOp::SubO
                | CellOp::MulO,
                [a, b],
            ) => {
                if let (CellOp::Add | CellOp::AddO, Cell::Arr(x), Cell::Arr(y)) = (op, a, b) {
                    if x.kind != ArrKind::Arr || y.kind != ArrKind::Arr {
                        return None;
                    }
                    let mut out = (**x).clone();
                    for (k, v) in &y.entries {
                        if !out.contains_key(k) {
                            out = out.set(k, v.clone())?;
                        }
                    }
                    return Some(out.into());
                }
                arith(op, to_num(a)?, to_num(b)?)
            }
            (
                CellOp::BitAnd | CellOp::BitOr | CellOp::BitXor | CellOp::Shl | CellOp::Shr,
                [a, b],
            ) => bitwise(op, a, b),
            (CellOp::BitNot, [Cell::Int(i)]) => Some(Cell::Int(!i)),
            (CellOp::BitNot, [_]) => None,
            (CellOp::Not, [a]) => Some(Cell::Bool(!a.to_bool())),
            (CellOp::Xor, [a, b]) => Some(Cell::Bool(a.to_bool() ^ b.to_bool())),
            (CellOp::Concat, [a, b]) => {
                let (x, y) = (cell_to_string(a)?, cell_to_string(b)?);
                Some(Cell::str(format!("{x}{y}")))
            }
            (CellOp::Same, [a, b]) => Some(Cell::Bool(cell_same(a, b))),
            (CellOp::NSame, [a, b]) => Some(Cell::Bool(!cell_same(a, b))),
            (CellOp::Eq | CellOp::Neq | CellOp::Lt | CellOp::Lte | CellOp::Gt | CellOp::Gte, [a, b]) => {
                let nan = a.is_nan() || b.is_nan();
                let ord = loose_cmp(a, b);
                let result = match op {
                    CellOp::Eq => !nan && ord? == Ordering::Equal,
                    CellOp::Neq => nan || ord? != Ordering::Equal,
                    CellOp::Lt => !nan && ord? == Ordering::Less,
                    CellOp::Lte => !nan && ord? != Ordering::Greater,
                    CellOp::Gt => !nan && ord? == Ordering::Greater,
                    _ => !nan && ord? != Ordering::Less,
                };
                Some(Cell::Bool(result))
            }
            (CellOp::Cmp, [a, b]) => Some(Cell::Int(match loose_cmp(a, b)? {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            })),
            (op, [a]) => cast(op, a),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(op: CellOp, args: &[Cell]) -> Option<Cell> {
        ScalarOracle.eval(op, args)
    }

    #[test]
    fn test_int_arith_wraps_and_checked_arith_promotes() {
        assert_eq!(
            eval(CellOp::Add, &[Cell::Int(i64::MAX), Cell::Int(1)]),
            Some(Cell::Int(i64::MIN))
        );
        assert_eq!(
            eval(CellOp::AddO, &[Cell::Int(i64::MAX), Cell::Int(1)]),
            Some(Cell::Dbl(i64::MAX as f64 + 1.0))
        );
        assert_eq!(eval(CellOp::Div, &[Cell::Int(6), Cell::Int(3)]), Some(Cell::Int(2)));
        assert_eq!(eval(CellOp::Div, &[Cell::Int(1), Cell::Int(2)]), Some(Cell::Dbl(0.5)));
        assert_eq!(eval(CellOp::Div, &[Cell::Int(1), Cell::Int(0)]), None);
        assert_eq!(eval(CellOp::Mod, &[Cell::Int(i64::MIN), Cell::Int(-1)]), Some(Cell::Int(0)));
    }

    #[test]
    fn test_numeric_strings() {
        assert_eq!(eval(CellOp::Add, &[Cell::str("2"), Cell::Int(3)]), Some(Cell::Int(5)));
        assert_eq!(eval(CellOp::Add, &[Cell::str("1.5"), Cell::Int(1)]), Some(Cell::Dbl(2.5)));
        assert_eq!(eval(CellOp::Add, &[Cell::str("abc"), Cell::Int(1)]), None);
    }

    #[test]
    fn test_concat_and_string_conversion() {
        assert_eq!(
            eval(CellOp::Concat, &[Cell::str("a"), Cell::Int(1)]),
            Some(Cell::str("a1"))
        );
        assert_eq!(
            eval(CellOp::Concat, &[Cell::Bool(false), Cell::Dbl(2.0)]),
            Some(Cell::str("2"))
        );
        assert_eq!(eval(CellOp::CastString, &[Cell::Dbl(f64::NAN)]), Some(Cell::str("NAN")));
    }

    #[test]
    fn test_double_formatting() {
        let cases: &[(f64, &str)] = &[
            (0.0, "0"),
            (-0.0, "-0"),
            (1.0, "1"),
            (-2.5, "-2.5"),
            (0.1 + 0.2, "0.3"),
            (1.0 / 3.0, "0.33333333333333"),
            (123.456, "123.456"),
            (0.0001, "0.0001"),
            (0.00001, "1.0E-5"),
            (2.5e-7, "2.5E-7"),
            (99999999999999.0, "99999999999999"),
            (1e14, "1.0E+14"),
            (1.5e15, "1.5E+15"),
            (-1e100, "-1.0E+100"),
            (f64::INFINITY, "INF"),
            (f64::NEG_INFINITY, "-INF"),
        ];
        for &(d, expected) in cases {
            assert_eq!(dbl_to_string(d), expected, "{d:e}");
        }
    }

    #[test]
    fn test_concat_of_doubles_uses_php_formatting() {
        assert_eq!(
            eval(CellOp::Concat, &[Cell::str("x"), Cell::Dbl(0.00001)]),
            Some(Cell::str("x1.0E-5"))
        );
        assert_eq!(
            eval(CellOp::Concat, &[Cell::str("x"), Cell::Dbl(-0.0)]),
            Some(Cell::str("x-0"))
        );
        assert_eq!(
            eval(CellOp::Concat, &[Cell::str("x"), Cell::Dbl(1e14)]),
            Some(Cell::str("x1.0E+14"))
        );
    }

    #[test]
    fn test_nan_is_never_same_or_equal() {
        let nan = Cell::Dbl(f64::NAN);
        assert_eq!(eval(CellOp::Same, &[nan.clone(), nan.clone()]), Some(Cell::Bool(false)));
        assert_eq!(eval(CellOp::Eq, &[nan.clone(), nan.clone()]), Some(Cell::Bool(false)));
        assert_eq!(eval(CellOp::Neq, &[nan.clone(), nan]), Some(Cell::Bool(true)));
    }

    #[test]
    fn test_loose_comparisons() {
        assert_eq!(eval(CellOp::Eq, &[Cell::Null, Cell::Bool(false)]), Some(Cell::Bool(true)));
        assert_eq!(eval(CellOp::Eq, &[Cell::str("1e1"), Cell::str("10")]), Some(Cell::Bool(true)));
        assert_eq!(eval(CellOp::Lt, &[Cell::Int(1), Cell::Dbl(1.5)]), Some(Cell::Bool(true)));
        assert_eq!(eval(CellOp::Cmp, &[Cell::str("b"), Cell::str("a")]), Some(Cell::Int(1)));
        assert_eq!(eval(CellOp::Eq, &[Cell::Int(0), Cell::str("a")]), None);
    }

    #[test]
    fn test_shifts() {
        assert_eq!(eval(CellOp::Shl, &[Cell::Int(1), Cell::Int(64)]), Some(Cell::Int(0)));
        assert_eq!(eval(CellOp::Shr, &[Cell::Int(-8), Cell::Int(70)]), Some(Cell::Int(-1)));
        assert_eq!(eval(CellOp::Shl, &[Cell::Int(1), Cell::Int(-1)]), None);
    }

    #[test]
    fn test_casts() {
        assert_eq!(eval(CellOp::CastInt, &[Cell::Dbl(3.9)]), Some(Cell::Int(3)));
        assert_eq!(eval(CellOp::CastInt, &[Cell::Dbl(f64::NAN)]), None);
        assert_eq!(eval(CellOp::CastBool, &[Cell::str("0")]), Some(Cell::Bool(false)));
        let arr = eval(CellOp::CastArray, &[Cell::Int(4)]).unwrap();
        assert_eq!(arr.as_arr().map(ArrayData::len), Some(1));
    }
}
