//! The `step` command argument.
//!
//! The source's `step(delta, const=-1)` calling convention overloads `const`
//! as either a genuine positive constant-time value or one of three negative
//! sentinels (`DELTA`, `STOP`, `ADJUST`). We add a fourth, `RELEASE`, used to
//! propagate a release request into nested envelopes without stopping the
//! owning `Inst` (see spec §4.6 and §4.3). `Tick` makes the union explicit
//! and exhaustively matchable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    /// Use `delta` itself as the constant-time value forwarded downstream.
    Delta(f64),
    /// A constant-time value distinct from `delta` (e.g. scaled by a rate).
    Const(f64),
    /// Request termination; the receiver should enter its release phase.
    Stop,
    /// Forward exactly `delta`, bypassing rate scaling. Used after a
    /// `reset()` to replay overshoot continuously across a boundary.
    Adjust(f64),
    /// Tell contained envelopes to begin release without stopping the
    /// owning instrument as a whole.
    Release,
}

impl Tick {
    /// The constant-time value carried by `Delta`/`Const`/`Adjust`, falling
    /// back to `delta` for `Delta` as the source's `if(const==DELTA) const =
    /// delta` does.
    pub fn const_value(self, delta: f64) -> f64 {
        match self {
            Tick::Delta(_) => delta,
            Tick::Const(c) => c,
            Tick::Adjust(c) => c,
            Tick::Stop | Tick::Release => 0.0,
        }
    }
}
