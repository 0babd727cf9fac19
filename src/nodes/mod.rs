//! The module graph: a tagged enum over every node kind in the signal
//! engine (see spec §2-§5), preferred here over trait objects per the
//! spec's Design Notes — the node set is closed and small enough that a
//! `match` dispatch reads better than a `dyn Module` vtable, and it lets
//! leaf/container/binary/unary code share concrete field access (as
//! `Cross` needs, through `ab`/`ab_mut` below) without downcasting.

pub mod binary;
pub mod container;
pub mod leaf;
pub mod unary;

use crate::command::Tick;
use crate::signal::Stereo;
use binary::{Binary, Envelope, LengthNode, LinInterp, Speed};
use container::{Pattern, Series, Set};
use leaf::{StereoVal, Val};
use unary::{ConstNode, Repeat};

/// One node of the signal graph. Every variant implements the same
/// protocol: `step`, `step_tails`, `read`, `reset`, `clear`, `done`,
/// `get_extra`, `length`, `set_freq`, and (for value-typed leaves)
/// `no_tails`.
#[derive(Debug, Clone)]
pub enum Module {
    Val(Val),
    StereoVal(StereoVal),
    Pattern(Pattern),
    Series(Series),
    Set(Set),
    Invert(Box<Module>),
    Repeat(Repeat),
    Const(ConstNode),
    Cross(Cross),
    Add(Binary),
    Subtract(Binary),
    Multiply(Binary),
    Divide(Binary),
    Level(Binary),
    LinInterp(LinInterp),
    Speed(Speed),
    Length(LengthNode),
    Envelope(Envelope),
}

impl Module {
    pub fn step(&mut self, delta: f64, tick: Tick) {
        match self {
            Module::Val(m) => m.step(delta, tick),
            Module::StereoVal(m) => m.step(delta, tick),
            Module::Pattern(m) => m.step(delta, tick),
            Module::Series(m) => m.step(delta, tick),
            Module::Set(m) => m.step(delta, tick),
            Module::Invert(m) => m.step(delta, tick),
            Module::Repeat(m) => m.step(delta, tick),
            Module::Const(m) => m.step(delta, tick),
            Module::Cross(m) => m.step(delta, tick),
            Module::Add(m) | Module::Subtract(m) | Module::Multiply(m) | Module::Divide(m) | Module::Level(m) => {
                m.step(delta, tick)
            }
            Module::LinInterp(m) => m.step(delta, tick),
            Module::Speed(m) => m.step(delta, tick),
            Module::Length(m) => m.step(delta, tick),
            Module::Envelope(m) => m.step(delta, tick),
        }
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        match self {
            Module::Val(m) => m.step_tails(delta, tick),
            Module::StereoVal(m) => m.step_tails(delta, tick),
            Module::Pattern(m) => m.step_tails(delta, tick),
            Module::Series(m) => m.step_tails(delta, tick),
            Module::Set(m) => m.step_tails(delta, tick),
            Module::Invert(m) => m.step_tails(delta, tick),
            Module::Repeat(m) => m.step_tails(delta, tick),
            Module::Const(m) => m.step_tails(delta, tick),
            Module::Cross(m) => m.step_tails(delta, tick),
            Module::Add(m) | Module::Subtract(m) | Module::Multiply(m) | Module::Divide(m) | Module::Level(m) => {
                m.step_tails(delta, tick)
            }
            Module::LinInterp(m) => m.step_tails(delta, tick),
            Module::Speed(m) => m.step_tails(delta, tick),
            Module::Length(m) => m.step_tails(delta, tick),
            Module::Envelope(m) => m.step_tails(delta, tick),
        }
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        match self {
            Module::Val(m) => m.read(tails, stereo, signal),
            Module::StereoVal(m) => m.read(tails, stereo, signal),
            Module::Pattern(m) => m.read(tails, stereo, signal),
            Module::Series(m) => m.read(tails, stereo, signal),
            Module::Set(m) => m.read(tails, stereo, signal),
            Module::Invert(m) => {
                let v = m.read(tails, stereo, signal);
                [-v[0], -v[1]]
            }
            Module::Repeat(m) => m.read(tails, stereo, signal),
            Module::Const(m) => m.read(tails, stereo, signal),
            Module::Cross(m) => m.read(tails, stereo, signal),
            Module::Add(m) | Module::Subtract(m) | Module::Multiply(m) | Module::Divide(m) | Module::Level(m) => {
                m.read(tails, stereo, signal)
            }
            Module::LinInterp(m) => m.read(tails, stereo, signal),
            Module::Speed(m) => m.read(tails, stereo, signal),
            Module::Length(m) => m.read(tails, stereo, signal),
            Module::Envelope(m) => m.read(tails, stereo, signal),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Module::Val(m) => m.reset(),
            Module::StereoVal(m) => m.reset(),
            Module::Pattern(m) => m.reset(),
            Module::Series(m) => m.reset(),
            Module::Set(m) => m.reset(),
            Module::Invert(m) => m.reset(),
            Module::Repeat(m) => m.reset(),
            Module::Const(m) => m.reset(),
            Module::Cross(m) => m.reset(),
            Module::Add(m) | Module::Subtract(m) | Module::Multiply(m) | Module::Divide(m) | Module::Level(m) => {
                m.reset()
            }
            Module::LinInterp(m) => m.reset(),
            Module::Speed(m) => m.reset(),
            Module::Length(m) => m.reset(),
            Module::Envelope(m) => m.reset(),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Module::Val(m) => m.clear(),
            Module::StereoVal(m) => m.clear(),
            Module::Pattern(m) => m.clear(),
            Module::Series(m) => m.clear(),
            Module::Set(m) => m.clear(),
            Module::Invert(m) => m.clear(),
            Module::Repeat(m) => m.clear(),
            Module::Const(m) => m.clear(),
            Module::Cross(m) => m.clear(),
            Module::Add(m) | Module::Subtract(m) | Module::Multiply(m) | Module::Divide(m) | Module::Level(m) => {
                m.clear()
            }
            Module::LinInterp(m) => m.clear(),
            Module::Speed(m) => m.clear(),
            Module::Length(m) => m.clear(),
            Module::Envelope(m) => m.clear(),
        }
    }

    pub fn done(&mut self) -> bool {
        match self {
            Module::Val(m) => m.done(),
            Module::StereoVal(m) => m.done(),
            Module::Pattern(m) => m.done(),
            Module::Series(m) => m.done(),
            Module::Set(m) => m.done(),
            Module::Invert(m) => m.done(),
            Module::Repeat(m) => m.done(),
            Module::Const(m) => m.done(),
            Module::Cross(m) => m.done(),
            Module::Add(m) | Module::Subtract(m) | Module::Multiply(m) | Module::Divide(m) | Module::Level(m) => {
                m.done()
            }
            Module::LinInterp(m) => m.done(),
            Module::Speed(m) => m.done(),
            Module::Length(m) => m.done(),
            Module::Envelope(m) => m.done(),
        }
    }

    pub fn get_extra(&mut self) -> f64 {
        match self {
            Module::Val(m) => m.get_extra(),
            Module::StereoVal(m) => m.get_extra(),
            Module::Pattern(m) => m.get_extra(),
            Module::Series(m) => m.get_extra(),
            Module::Set(m) => m.get_extra(),
            Module::Invert(m) => m.get_extra(),
            Module::Repeat(m) => m.get_extra(),
            Module::Const(m) => m.get_extra(),
            Module::Cross(m) => m.get_extra(),
            Module::Add(m) | Module::Subtract(m) | Module::Multiply(m) | Module::Divide(m) | Module::Level(m) => {
                m.get_extra()
            }
            Module::LinInterp(m) => m.get_extra(),
            Module::Speed(m) => m.get_extra(),
            Module::Length(m) => m.get_extra(),
            Module::Envelope(m) => m.get_extra(),
        }
    }

    pub fn length(&mut self) -> f64 {
        match self {
            Module::Val(m) => m.length(),
            Module::StereoVal(m) => m.length(),
            Module::Pattern(m) => m.length(),
            Module::Series(m) => m.length(),
            Module::Set(m) => m.length(),
            Module::Invert(m) => m.length(),
            Module::Repeat(m) => m.length(),
            Module::Const(m) => m.length(),
            Module::Cross(m) => m.length(),
            Module::Add(m) | Module::Subtract(m) | Module::Multiply(m) | Module::Divide(m) | Module::Level(m) => {
                m.length()
            }
            Module::LinInterp(m) => m.length(),
            Module::Speed(m) => m.length(),
            Module::Length(m) => m.length(),
            Module::Envelope(m) => m.length(),
        }
    }

    pub fn set_freq(&mut self, freq: f64) {
        match self {
            Module::Val(m) => m.set_freq(freq),
            Module::StereoVal(m) => m.set_freq(freq),
            Module::Pattern(m) => m.set_freq(freq),
            Module::Series(m) => m.set_freq(freq),
            Module::Set(m) => m.set_freq(freq),
            Module::Invert(m) => m.set_freq(freq),
            Module::Repeat(m) => m.set_freq(freq),
            Module::Const(m) => m.set_freq(freq),
            Module::Cross(m) => m.set_freq(freq),
            Module::Add(m) | Module::Subtract(m) | Module::Multiply(m) | Module::Divide(m) | Module::Level(m) => {
                m.set_freq(freq)
            }
            Module::LinInterp(m) => m.set_freq(freq),
            Module::Speed(m) => m.set_freq(freq),
            Module::Length(m) => m.set_freq(freq),
            Module::Envelope(m) => m.set_freq(freq),
        }
    }

    /// Value-typed modules (spec §5): containers skip them when mixing in
    /// decaying tails alongside the currently active child, since they
    /// carry no independent audible state worth double-counting.
    pub fn no_tails(&self) -> bool {
        matches!(self, Module::Val(_) | Module::StereoVal(_) | Module::LinInterp(_))
    }
}

/// Extracts the `(a, b)` shape of any module kind `Cross` can wrap. `Speed`
/// exposes `(mdl, rate)` under the same shape.
fn ab(m: &Module) -> Option<(&Module, &Module)> {
    match m {
        Module::Add(b) | Module::Subtract(b) | Module::Multiply(b) | Module::Divide(b) | Module::Level(b) => {
            Some((b.a.as_ref(), b.b.as_ref()))
        }
        Module::LinInterp(li) => Some((li.a.as_ref(), li.b.as_ref())),
        Module::Speed(s) => Some((s.mdl.as_ref(), s.rate.as_ref())),
        Module::Length(l) => Some((l.a.as_ref(), l.b.as_ref())),
        Module::Envelope(e) => Some((e.a.as_ref(), e.b.as_ref())),
        Module::Repeat(r) => Some((r.a.as_ref(), r.b.as_ref())),
        _ => None,
    }
}

fn ab_mut(m: &mut Module) -> Option<(&mut Module, &mut Module)> {
    match m {
        Module::Add(b) | Module::Subtract(b) | Module::Multiply(b) | Module::Divide(b) | Module::Level(b) => {
            Some((b.a.as_mut(), b.b.as_mut()))
        }
        Module::LinInterp(li) => Some((li.a.as_mut(), li.b.as_mut())),
        Module::Speed(s) => Some((s.mdl.as_mut(), s.rate.as_mut())),
        Module::Length(l) => Some((l.a.as_mut(), l.b.as_mut())),
        Module::Envelope(e) => Some((e.a.as_mut(), e.b.as_mut())),
        Module::Repeat(r) => Some((r.a.as_mut(), r.b.as_mut())),
        _ => None,
    }
}

/// Wraps a binary-shaped module (anything `ab`/`ab_mut` recognizes) and
/// plays its `a` side once per "super-cycle" while walking its `b` side
/// once across the *whole* super-cycle — a single playthrough of `a`
/// advances `b` by `1/length(a)`, so `b` sweeps its full range exactly once
/// while `a` repeats `length(b)` times (see spec §4.5).
#[derive(Debug, Clone)]
pub struct Cross {
    op: Box<Module>,
    bstep: f64,
    cur: f64,
    len: f64,
    initialized: bool,
}

impl Cross {
    /// Fails (returning `Err(())`, surfaced by the parser as
    /// `ScErrorKind::InvalidCrossOperator`) unless `op` has an `(a, b)`
    /// shape `ab` recognizes.
    pub fn new(op: Module) -> Result<Self, ()> {
        if ab(&op).is_none() {
            return Err(());
        }
        Ok(Cross { op: Box::new(op), bstep: 1.0, cur: 0.0, len: 0.0, initialized: false })
    }

    fn ensure_init(&mut self) {
        if self.initialized {
            return;
        }
        let (a_len, b_len) = {
            let (a, b) = ab_mut(&mut self.op).expect("Cross always wraps an (a, b)-shaped module");
            (a.length(), b.length())
        };
        self.bstep = if a_len != 0.0 { 1.0 / a_len } else { 1.0 };
        self.len = a_len * b_len;
        self.initialized = true;
    }

    pub fn step(&mut self, delta: f64, tick: Tick) {
        self.ensure_init();
        let bstep = self.bstep;
        let a_done = {
            let (a, b) = ab_mut(&mut self.op).expect("Cross always wraps an (a, b)-shaped module");
            a.step(delta, tick);
            b.step(delta * bstep, tick);
            a.done()
        };
        self.cur += delta;
        if a_done && !self.done() {
            {
                let (a, _b) = ab_mut(&mut self.op).expect("Cross always wraps an (a, b)-shaped module");
                let extra = a.get_extra();
                a.reset();
                a.step(extra, Tick::Adjust(extra));
            }
            let (a_len, b_len) = {
                let (a, b) = ab_mut(&mut self.op).expect("Cross always wraps an (a, b)-shaped module");
                (a.length(), b.length())
            };
            self.bstep = if a_len != 0.0 { 1.0 / a_len } else { 1.0 };
            self.len = a_len * b_len;
        }
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        self.ensure_init();
        let bstep = self.bstep;
        let (a, b) = ab_mut(&mut self.op).expect("Cross always wraps an (a, b)-shaped module");
        a.step_tails(delta, tick);
        b.step_tails(delta * bstep, tick);
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        self.op.read(tails, stereo, signal)
    }

    pub fn reset(&mut self) {
        self.op.reset();
        self.initialized = false;
        self.cur = 0.0;
        self.ensure_init();
    }

    pub fn clear(&mut self) {
        self.op.clear();
        self.initialized = false;
        self.cur = 0.0;
        self.ensure_init();
    }

    pub fn done(&mut self) -> bool {
        self.ensure_init();
        self.cur + f64::EPSILON >= self.len
    }

    pub fn get_extra(&mut self) -> f64 {
        if self.done() { self.cur - self.len } else { 0.0 }
    }

    pub fn length(&mut self) -> f64 {
        self.ensure_init();
        self.len
    }

    pub fn set_freq(&mut self, freq: f64) {
        self.op.set_freq(freq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::binary::{BinOp, Binary};
    use crate::nodes::leaf::Val;

    fn val_mod(v: f64) -> Module {
        Module::Val(Val::new(v))
    }

    #[test]
    fn invert_negates_read() {
        let mut m = Module::Invert(Box::new(val_mod(3.0)));
        assert_eq!(m.read(false, false, true), [-3.0, -3.0]);
    }

    #[test]
    fn cross_rejects_non_binary_operand() {
        assert!(Cross::new(val_mod(1.0)).is_err());
    }

    #[test]
    fn cross_wraps_a_multiply_and_tracks_combined_length() {
        let pattern_a = Module::Pattern(crate::nodes::container::Pattern::new(vec![
            val_mod(1.0), val_mod(2.0), val_mod(3.0),
        ]));
        let pattern_b = Module::Pattern(crate::nodes::container::Pattern::new(vec![
            val_mod(1.0), val_mod(0.0),
        ]));
        let mul = Module::Multiply(Binary::new(pattern_a, pattern_b, true, BinOp::Multiply));
        let mut cross = Cross::new(mul).expect("multiply is a, b-shaped");
        assert_eq!(cross.length(), 6.0);
    }
}
