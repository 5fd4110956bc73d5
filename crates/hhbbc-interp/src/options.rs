/// Analysis policy knobs.
///
/// Passed by reference into every run; nothing is read from globals. The
/// defaults match an optimizing build with hard type hints enabled.
#[derive(Clone, Debug, PartialEq, Eq, bon::Builder)]
pub struct Options {
    /// Record replacement sequences proposed by handlers.
    #[builder(default = true)]
    pub strength_reduce: bool,
    /// Replace outputs that resolve to literals, and treat the step as
    /// effect free.
    #[builder(default = true)]
    pub constant_prop: bool,
    /// Evaluate calls to foldable functions with constant arguments.
    #[builder(default = true)]
    pub constant_fold_builtins: bool,
    /// Assume constants and public statics hold their index types.
    #[builder(default = true)]
    pub hard_const_prop: bool,
    /// Unresolved function calls with a fallback name are assumed to hit the
    /// fallback.
    #[builder(default)]
    pub elide_autoload_invokes: bool,
    /// Comparing PHP arrays with hack arrays raises a notice.
    #[builder(default)]
    pub hack_arr_compat_notices: bool,
    /// A parameter that passed `VerifyParamType` has its declared type.
    #[builder(default = true)]
    pub hard_type_hints: bool,
    /// `0` disables return type checks; `3` makes violations fatal, which
    /// lets `VerifyRetTypeC` narrow the returned value.
    #[builder(default = 3)]
    pub check_return_type_hints: u8,
    /// `this` type hints are enforced.
    #[builder(default)]
    pub check_this_type_hints: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// What a run collects, and whether it may stop early.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectionOpts {
    /// Stop interpreting a block at the first instruction that is not
    /// effect free.
    pub effect_free_only: bool,
    /// The function is being analyzed for inlining into a caller; unit-level
    /// facts are not updated.
    pub inlining: bool,
}
