//! Assertion helpers for lattice algebraic laws.
//!
//! Every check walks all pairs (and, for associativity, triples) of the given
//! samples and collects the failures into one report, so a broken `join` or
//! `meet` shows every counterexample at once.
//!
//! # Example
//!
//! ```
//! use hhbbc_test_utils::lattice::assert_finite_lattice_laws;
//! use hhbbc_types::Type;
//!
//! assert_finite_lattice_laws(&[Type::INT, Type::ival(1), Type::INIT_NULL]);
//! ```

use std::fmt::{Debug, Write};

use hhbbc_types::{HasBottom, HasTop, Lattice};

#[derive(Default)]
struct Violations(Vec<String>);

impl Violations {
    fn check(&mut self, ok: bool, msg: impl FnOnce() -> String) {
        if !ok {
            self.0.push(msg());
        }
    }

    fn finish(self) {
        if self.0.is_empty() {
            return;
        }
        let mut msg = format!("{} lattice law violation(s):\n", self.0.len());
        for (i, v) in self.0.iter().enumerate() {
            let _ = writeln!(msg, "  {}. {}", i + 1, v);
        }
        panic!("{msg}");
    }
}

/// `join` and `meet` are each idempotent, commutative and associative, the
/// absorption laws hold, and `is_subseteq` agrees with both operators.
pub fn assert_lattice_laws<L: Lattice + PartialEq + Debug>(elements: &[L]) {
    let mut v = Violations::default();
    lattice_laws(elements, &mut v);
    v.finish();
}

/// [`assert_lattice_laws`] plus the bottom/top identities. Bottom and top are
/// added to the samples automatically.
pub fn assert_finite_lattice_laws<L: HasBottom + HasTop + PartialEq + Debug + Clone>(
    elements: &[L],
) {
    let mut all = elements.to_vec();
    all.push(L::bottom());
    all.push(L::top());

    let mut v = Violations::default();
    lattice_laws(&all, &mut v);
    let (bot, top) = (L::bottom(), L::top());
    for x in &all {
        v.check(bot.is_subseteq(x), || format!("bottom not below {x:?}"));
        v.check(bot.join(x) == *x, || format!("bottom().join({x:?}) != {x:?}"));
        v.check(bot.meet(x) == bot, || format!("bottom().meet({x:?}) != bottom()"));
        v.check(x.is_subseteq(&top), || format!("{x:?} not below top"));
        v.check(top.join(x) == top, || format!("top().join({x:?}) != top()"));
        v.check(top.meet(x) == *x, || format!("top().meet({x:?}) != {x:?}"));
    }
    v.finish();
}

/// `f` preserves the order: `a ⊑ b` implies `f(a) ⊑ f(b)` for every sampled
/// pair.
pub fn assert_monotone<L, F>(elements: &[L], name: &str, f: F)
where
    L: Lattice + Debug,
    F: Fn(&L) -> L,
{
    let mut v = Violations::default();
    for a in elements {
        for b in elements {
            if a.is_subseteq(b) {
                let (fa, fb) = (f(a), f(b));
                v.check(fa.is_subseteq(&fb), || {
                    format!("{name} not monotone: {a:?} <= {b:?} but {fa:?} !<= {fb:?}")
                });
            }
        }
    }
    v.finish();
}

fn lattice_laws<L: Lattice + PartialEq + Debug>(elements: &[L], v: &mut Violations) {
    for a in elements {
        v.check(a.join(a) == *a, || format!("join not idempotent at {a:?}"));
        v.check(a.meet(a) == *a, || format!("meet not idempotent at {a:?}"));
        for b in elements {
            let (j, m) = (a.join(b), a.meet(b));
            v.check(j == b.join(a), || format!("join not commutative: {a:?}, {b:?}"));
            v.check(m == b.meet(a), || format!("meet not commutative: {a:?}, {b:?}"));
            v.check(a.join(&m) == *a, || {
                format!("absorption violated: {a:?}.join({a:?}.meet({b:?})) != {a:?}")
            });
            v.check(a.meet(&j) == *a, || {
                format!("absorption violated: {a:?}.meet({a:?}.join({b:?})) != {a:?}")
            });
            let sub = a.is_subseteq(b);
            v.check(sub == (j == *b), || {
                format!("{a:?}.is_subseteq({b:?}) = {sub} disagrees with join")
            });
            v.check(sub == (m == *a), || {
                format!("{a:?}.is_subseteq({b:?}) = {sub} disagrees with meet")
            });
            for c in elements {
                v.check(j.join(c) == a.join(&b.join(c)), || {
                    format!("join not associative: {a:?}, {b:?}, {c:?}")
                });
                v.check(m.meet(c) == a.meet(&b.meet(c)), || {
                    format!("meet not associative: {a:?}, {b:?}, {c:?}")
                });
            }
        }
    }
}
