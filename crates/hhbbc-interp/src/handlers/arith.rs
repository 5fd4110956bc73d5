//! Arithmetic, bitwise, concatenation and casts.

use hhbbc_bc::Bytecode;
use hhbbc_types::{
    ArithOp, BitOp, Bits, Cell, CellOp, Emptiness, Type, cell_to_string, type_arith, type_bit,
    type_bit_not,
};
use tracing::debug;

use super::{Result, eval, reduce};
use crate::env::Env;
use crate::flags::Effect;

// ----------------------------------------------------------------------------
// Concatenation
// ----------------------------------------------------------------------------

pub(super) fn concat(env: &mut Env<'_, '_>) -> Result {
    concat_n(env, 2)
}

pub(super) fn concat_n_op(env: &mut Env<'_, '_>, count: u32) -> Result {
    if count == 2 {
        return reduce([Bytecode::Concat]);
    }
    concat_n(env, count)
}

/// Concatenate the top `n` values. A run of constants on top of the stack
/// is folded into one string literal.
fn concat_n(env: &mut Env<'_, '_>, n: u32) -> Result {
    let mut folded = 0;
    let mut result = String::new();
    while folded < n {
        let Some(v) = env.top(folded as usize)?.tv() else {
            break;
        };
        if !matches!(
            v,
            Cell::Str(_) | Cell::Null | Cell::Bool(_) | Cell::Int(_) | Cell::Dbl(_)
        ) {
            break;
        }
        let Some(s) = cell_to_string(&v) else {
            break;
        };
        result.insert_str(0, &s);
        folded += 1;
    }

    if folded >= 2 {
        debug!(operands = folded, "folded constant concatenation");
        let mut bcs: Vec<Bytecode> = (0..folded).map(|_| Bytecode::PopC).collect();
        bcs.push(Bytecode::String { val: result.into() });
        if folded < n {
            bcs.push(Bytecode::ConcatN {
                count: n - folded + 1,
            });
        }
        return reduce(bcs);
    }
    env.discard(n as usize)?;
    env.push(Type::STR);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Arithmetic
// ----------------------------------------------------------------------------

fn arith_cell_op(op: ArithOp) -> CellOp {
    match op {
        ArithOp::Add => CellOp::Add,
        ArithOp::Sub => CellOp::Sub,
        ArithOp::Mul => CellOp::Mul,
        ArithOp::Div => CellOp::Div,
        ArithOp::Mod => CellOp::Mod,
        ArithOp::Pow => CellOp::Pow,
        ArithOp::AddO => CellOp::AddO,
        ArithOp::SubO => CellOp::SubO,
        ArithOp::MulO => CellOp::MulO,
    }
}

fn bit_cell_op(op: BitOp) -> CellOp {
    match op {
        BitOp::And => CellOp::BitAnd,
        BitOp::Or => CellOp::BitOr,
        BitOp::Xor => CellOp::BitXor,
        BitOp::Shl => CellOp::Shl,
        BitOp::Shr => CellOp::Shr,
    }
}

pub(super) fn arith(env: &mut Env<'_, '_>, op: ArithOp) -> Result {
    env.constprop();
    let t1 = env.pop()?;
    let t2 = env.pop()?;
    let out = eval(env, arith_cell_op(op), &[&t2, &t1])
        .unwrap_or_else(|| type_arith(op, &t2, &t1));
    env.push(out);
    Ok(Effect::Direct)
}

pub(super) fn bit(env: &mut Env<'_, '_>, op: BitOp) -> Result {
    env.constprop();
    let t1 = env.pop()?;
    let t2 = env.pop()?;
    let out = eval(env, bit_cell_op(op), &[&t2, &t1]).unwrap_or_else(|| type_bit(op, &t2, &t1));
    env.push(out);
    Ok(Effect::Direct)
}

pub(super) fn bit_not(env: &mut Env<'_, '_>) -> Result {
    let t = env.pop()?;
    if t.tv().is_some() {
        env.constprop();
        if let Some(out) = eval(env, CellOp::BitNot, &[&t]) {
            env.push(out);
            return Ok(Effect::Direct);
        }
    }
    env.push(type_bit_not(&t));
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Truthiness
// ----------------------------------------------------------------------------

pub(super) fn cast_bool_impl(env: &mut Env<'_, '_>, t: &Type, negate: bool) {
    env.nothrow();
    env.constprop();
    let out = match t.emptiness() {
        e @ (Emptiness::Empty | Emptiness::NonEmpty) => {
            if (e == Emptiness::Empty) == negate {
                Type::TRUE
            } else {
                Type::FALSE
            }
        }
        Emptiness::Maybe => Type::BOOL,
    };
    env.push(out);
}

pub(super) fn not(env: &mut Env<'_, '_>) -> Result {
    let t = env.pop()?;
    cast_bool_impl(env, &t, true);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Casts
// ----------------------------------------------------------------------------

pub(super) fn cast_bool(env: &mut Env<'_, '_>) -> Result {
    if env.top(0)?.subtype_of_bits(Bits::BOOL) {
        return reduce([Bytecode::Nop]);
    }
    let t = env.pop()?;
    cast_bool_impl(env, &t, false);
    Ok(Effect::Direct)
}

pub(super) fn cast_int(env: &mut Env<'_, '_>) -> Result {
    if env.top(0)?.subtype_of_bits(Bits::INT) {
        return reduce([Bytecode::Nop]);
    }
    env.constprop();
    let t = env.pop()?;
    // Objects warn when converted.
    if !t.could_be_bits(Bits::OBJ) {
        env.nothrow();
    }
    let out = eval(env, CellOp::CastInt, &[&t]).unwrap_or(Type::INT);
    env.push(out);
    Ok(Effect::Direct)
}

/// A cast to `target`, folded through `op` when the operand is known.
pub(super) fn cast(env: &mut Env<'_, '_>, target: Type, op: Option<CellOp>) -> Result {
    if env.top(0)?.subtype_of(&target) {
        return reduce([Bytecode::Nop]);
    }
    let t = env.pop()?;
    let folded = op.and_then(|op| eval(env, op, &[&t]));
    match folded {
        Some(out) => {
            env.constprop();
            env.push(out);
        }
        None => env.push(target),
    }
    Ok(Effect::Direct)
}

/// `CastVArray` and `CastDArray`.
pub(super) fn cast_varray(env: &mut Env<'_, '_>) -> Result {
    env.pop()?;
    env.push(Type::ARR);
    Ok(Effect::Direct)
}

// ----------------------------------------------------------------------------
// Misc operators
// ----------------------------------------------------------------------------

pub(super) fn print(env: &mut Env<'_, '_>) -> Result {
    env.pop()?;
    env.push(Type::ival(1));
    Ok(Effect::Direct)
}

pub(super) fn clone(env: &mut Env<'_, '_>) -> Result {
    let val = env.pop()?;
    let out = if val.subtype_of_bits(Bits::OBJ) {
        val
    } else if val.is_opt() {
        val.unopt()
    } else {
        Type::OBJ
    };
    env.push(out);
    Ok(Effect::Direct)
}

pub(super) fn exit(env: &mut Env<'_, '_>) -> Result {
    env.pop()?;
    env.push(Type::INIT_NULL);
    Ok(Effect::Direct)
}

pub(super) fn fatal(env: &mut Env<'_, '_>) -> Result {
    env.pop()?;
    Ok(Effect::Direct)
}
