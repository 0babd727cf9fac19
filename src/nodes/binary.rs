//! Binary combinators: `Add`, `Subtract`, `Multiply`, `Divide`, `Level`
//! (shared `Binary` struct, distinguished by `BinOp`), plus `LinInterp`,
//! `Speed`, `Length`, and `Envelope`, each with their own shape.
//!
//! All of these share the "leader" idiom from spec §4.3: one operand's
//! completion drives the combinator's own `done()`; the other is kept
//! alive by a reset-and-ADJUST whenever it finishes first, so it keeps
//! cycling underneath the leader without stalling.

use crate::command::Tick;
use crate::nodes::Module;
use crate::signal::{as_decimal, lcm, Stereo};

/// Which pointwise operation a `Binary` performs on read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    /// Multiply where B is read in signal domain and converted to a unit
    /// gain via `as_decimal` before multiplying A.
    Level,
}

#[derive(Debug, Clone)]
pub struct Binary {
    pub a: Box<Module>,
    pub b: Box<Module>,
    pub a_lead: bool,
    pub op: BinOp,
}

impl Binary {
    pub fn new(a: Module, b: Module, a_lead: bool, op: BinOp) -> Self {
        Binary { a: Box::new(a), b: Box::new(b), a_lead, op }
    }

    pub fn step(&mut self, delta: f64, tick: Tick) {
        self.a.step(delta, tick);
        self.b.step(delta, tick);
        if self.a_lead {
            if self.b.done() && !self.a.done() {
                let extra = self.b.get_extra();
                self.b.reset();
                self.b.step(extra, Tick::Adjust(extra));
            }
        } else if self.a.done() && !self.b.done() {
            let extra = self.a.get_extra();
            self.a.reset();
            self.a.step(extra, Tick::Adjust(extra));
        }
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        self.a.step_tails(delta, tick);
        self.b.step_tails(delta, tick);
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        let val_a = self.a.read(tails, stereo, signal);
        match self.op {
            BinOp::Add => {
                let val_b = self.b.read(tails, stereo, signal);
                [val_a[0] + val_b[0], val_a[1] + val_b[1]]
            }
            BinOp::Subtract => {
                let val_b = self.b.read(tails, stereo, signal);
                [val_a[0] - val_b[0], val_a[1] - val_b[1]]
            }
            BinOp::Multiply => {
                let val_b = self.b.read(tails, stereo, false);
                [val_a[0] * val_b[0], val_a[1] * val_b[1]]
            }
            BinOp::Divide => {
                let val_b = self.b.read(tails, stereo, false);
                [val_a[0] / val_b[0], val_a[1] / val_b[1]]
            }
            BinOp::Level => {
                let val_b = self.b.read(tails, stereo, true);
                [val_a[0] * as_decimal(val_b[0]), val_a[1] * as_decimal(val_b[1])]
            }
        }
    }

    pub fn reset(&mut self) {
        self.a.reset();
        self.b.reset();
    }

    pub fn clear(&mut self) {
        self.a.clear();
        self.b.clear();
    }

    pub fn done(&mut self) -> bool {
        if self.a_lead { self.a.done() } else { self.b.done() }
    }

    pub fn get_extra(&mut self) -> f64 {
        if self.a_lead { self.a.get_extra() } else { self.b.get_extra() }
    }

    pub fn length(&mut self) -> f64 {
        match self.op {
            BinOp::Divide => lcm(self.a.length(), self.b.length()),
            _ => if self.a_lead { self.a.length() } else { self.b.length() },
        }
    }

    pub fn set_freq(&mut self, freq: f64) {
        self.a.set_freq(freq);
        self.b.set_freq(freq);
    }
}

/// Blends A and B over `width` local-time units: `out = A*(1-t) + B*t`,
/// `t = cur/width`. Value-typed (`no_tails`): never holds audible state of
/// its own worth summing as a decaying tail.
#[derive(Debug, Clone)]
pub struct LinInterp {
    pub a: Box<Module>,
    pub b: Box<Module>,
    pub width: f64,
    pub cur: f64,
}

impl LinInterp {
    pub fn new(a: Module, b: Module, width: f64) -> Self {
        let width = if width > 0.0 { width } else { 1.0 };
        LinInterp { a: Box::new(a), b: Box::new(b), width, cur: 0.0 }
    }

    pub fn step(&mut self, delta: f64, tick: Tick) {
        self.cur += delta;
        self.a.step(delta, tick);
        if self.a.done() && !self.done() {
            let extra = self.a.get_extra();
            self.a.reset();
            self.a.step(extra, Tick::Adjust(extra));
        }
        self.b.step(delta, tick);
        if self.b.done() && !self.done() {
            let extra = self.b.get_extra();
            self.b.reset();
            self.b.step(extra, Tick::Adjust(extra));
        }
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        self.a.step_tails(delta, tick);
        self.b.step_tails(delta, tick);
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        let pct = self.cur / self.width;
        let val_a = self.a.read(tails, stereo, signal);
        let val_b = self.b.read(tails, stereo, signal);
        [
            val_a[0] * (1.0 - pct) + val_b[0] * pct,
            val_a[1] * (1.0 - pct) + val_b[1] * pct,
        ]
    }

    pub fn reset(&mut self) {
        self.cur = 0.0;
        self.a.reset();
        self.b.reset();
    }

    pub fn clear(&mut self) {
        self.cur = 0.0;
        self.a.clear();
        self.b.clear();
    }

    pub fn done(&mut self) -> bool {
        self.cur + f64::EPSILON >= self.width
    }

    pub fn get_extra(&mut self) -> f64 {
        if self.done() { self.cur - self.width } else { 0.0 }
    }

    pub fn length(&mut self) -> f64 {
        self.width
    }

    pub fn set_freq(&mut self, freq: f64) {
        self.a.set_freq(freq);
        self.b.set_freq(freq);
    }
}

/// Scales both `delta` and `const` of its subject by the current read of a
/// rate child — applied to an instrument this affects pitch as well as
/// tempo; applied to a sequence (whose `Const` is pinned to 1) it changes
/// only tempo.
#[derive(Debug, Clone)]
pub struct Speed {
    pub mdl: Box<Module>,
    pub rate: Box<Module>,
    pub a_lead: bool,
}

impl Speed {
    pub fn new(mdl: Module, rate: Module, a_lead: bool) -> Self {
        Speed { mdl: Box::new(mdl), rate: Box::new(rate), a_lead }
    }

    fn rate_val(&mut self) -> f64 {
        self.rate.read(false, false, false)[0]
    }

    pub fn step(&mut self, delta: f64, tick: Tick) {
        let r = self.rate_val();
        match tick {
            Tick::Adjust(_) => self.mdl.step(delta, tick),
            Tick::Stop => self.mdl.step(delta * r, Tick::Stop),
            Tick::Release => self.mdl.step(delta * r, Tick::Release),
            Tick::Delta(_) => self.mdl.step(delta * r, Tick::Const(delta * r)),
            Tick::Const(c) => self.mdl.step(delta * r, Tick::Const(c * r)),
        }
        self.rate.step(delta, tick);
        if self.a_lead {
            if self.rate.done() {
                let extra = self.rate.get_extra();
                self.rate.reset();
                self.rate.step(extra, Tick::Adjust(extra));
            }
        } else if self.mdl.done() {
            let extra = self.mdl.get_extra();
            self.mdl.reset();
            self.mdl.step(extra, Tick::Adjust(extra));
        }
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        let r = self.rate_val();
        let c = match tick {
            Tick::Delta(_) => delta,
            other => other.const_value(delta),
        };
        self.mdl.step_tails(delta * r, Tick::Const(c * r));
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        self.mdl.read(tails, stereo, signal)
    }

    pub fn reset(&mut self) {
        self.mdl.reset();
        self.rate.reset();
    }

    pub fn clear(&mut self) {
        self.mdl.clear();
        self.rate.clear();
    }

    pub fn done(&mut self) -> bool {
        if self.a_lead { self.mdl.done() } else { self.rate.done() }
    }

    pub fn get_extra(&mut self) -> f64 {
        if self.a_lead { self.mdl.get_extra() } else { self.rate.get_extra() }
    }

    pub fn length(&mut self) -> f64 {
        if self.a_lead { let r = self.rate_val(); self.mdl.length() / r } else { self.rate.length() }
    }

    pub fn set_freq(&mut self, freq: f64) {
        self.mdl.set_freq(freq);
        self.rate.set_freq(freq);
    }
}

/// Overrides a module's reported length against a (possibly time-varying)
/// `B` read, tracking its own cursor independently.
#[derive(Debug, Clone)]
pub struct LengthNode {
    pub a: Box<Module>,
    pub b: Box<Module>,
    pub cur: f64,
}

impl LengthNode {
    pub fn new(a: Module, b: Module) -> Self {
        LengthNode { a: Box::new(a), b: Box::new(b), cur: 0.0 }
    }

    fn target(&mut self) -> f64 {
        self.b.read(false, false, false)[0]
    }

    pub fn step(&mut self, delta: f64, tick: Tick) {
        self.cur += delta;
        self.a.step(delta, tick);
        if self.a.done() {
            let extra = self.a.get_extra();
            self.a.reset();
            self.a.step(extra, Tick::Adjust(extra));
        }
        self.b.step(delta, tick);
        if self.b.done() {
            let extra = self.b.get_extra();
            self.b.reset();
            self.b.step(extra, Tick::Adjust(extra));
        }
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        self.a.step_tails(delta, tick);
        self.b.step_tails(delta, tick);
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        self.a.read(tails, stereo, signal)
    }

    pub fn reset(&mut self) {
        self.cur = 0.0;
        self.a.reset();
        self.b.reset();
    }

    pub fn clear(&mut self) {
        self.cur = 0.0;
        self.a.clear();
        self.b.clear();
    }

    pub fn done(&mut self) -> bool {
        self.cur + f64::EPSILON >= self.target()
    }

    pub fn get_extra(&mut self) -> f64 {
        if self.done() { self.cur - self.target() } else { 0.0 }
    }

    pub fn length(&mut self) -> f64 {
        self.target()
    }

    pub fn set_freq(&mut self, freq: f64) {
        self.a.set_freq(freq);
        self.b.set_freq(freq);
    }
}

/// `Level` whose `B` runs in constant song-step time. Parameters: `rate`
/// (already pre-multiplied by `frameslice` at parse time, matching
/// `Const`'s construction), `loop_` (cycle `b` between `attack` and the end
/// until released), `attack`/`release` song-step marks (see spec §4.3).
///
/// On `Stop`/`Release`, both children are notified with `Tick::Release` so
/// nested envelopes release cleanly, and (if looping) `b`'s cursor jumps to
/// `release` so it plays the release segment through to the end instead of
/// cycling back to `attack` again.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub a: Box<Module>,
    pub b: Box<Module>,
    pub rate: f64,
    pub loop_: bool,
    pub attack: f64,
    pub release: f64,
    /// `b`'s own cursor, tracked independently of `b.done()`/`b.get_extra()`
    /// since those only fire at `b`'s full `length()` — the loop boundary
    /// this envelope cares about is the `release` mark, which can sit well
    /// short of that (spec §4.3).
    cur: f64,
    released: bool,
}

impl Envelope {
    pub fn new(a: Module, b: Module, rate: f64, loop_: bool, attack: f64, release: f64) -> Self {
        Envelope {
            a: Box::new(a),
            b: Box::new(b),
            rate,
            loop_,
            attack,
            release,
            cur: 0.0,
            released: false,
        }
    }

    pub fn step(&mut self, delta: f64, tick: Tick) {
        match tick {
            Tick::Stop | Tick::Release => {
                if self.loop_ && !self.released {
                    self.b.reset();
                    self.b.step(self.release, Tick::Adjust(self.release));
                    self.cur = self.release;
                }
                self.released = true;
                self.a.step(0.0, Tick::Release);
                self.b.step(0.0, Tick::Release);
            }
            Tick::Adjust(c) => {
                self.b.step(delta, Tick::Adjust(c));
                self.cur += c;
            }
            _ => {
                let c = tick.const_value(delta);
                self.a.step(delta, tick);
                let bc = c * self.rate;
                self.b.step(bc, Tick::Const(bc));
                self.cur += bc;
                if self.a.done() {
                    let extra = self.a.get_extra();
                    self.a.reset();
                    self.a.step(extra, Tick::Adjust(extra));
                }
                if self.loop_ && !self.released && self.cur + f64::EPSILON >= self.release {
                    let extra = self.cur - self.release;
                    self.b.reset();
                    self.b.step(self.attack + extra, Tick::Adjust(self.attack + extra));
                    self.cur = self.attack + extra;
                }
            }
        }
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        let c = tick.const_value(delta);
        self.a.step_tails(delta, tick);
        self.b.step_tails(c * self.rate, Tick::Const(c * self.rate));
    }

    pub fn read(&self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        let val_a = self.a.read(tails, stereo, signal);
        let val_b = self.b.read(tails, stereo, true);
        [val_a[0] * as_decimal(val_b[0]), val_a[1] * as_decimal(val_b[1])]
    }

    pub fn reset(&mut self) {
        if self.loop_ {
            self.a.reset();
            self.b.reset();
            self.cur = 0.0;
        }
        self.released = false;
    }

    pub fn clear(&mut self) {
        self.a.clear();
        self.b.clear();
        self.cur = 0.0;
        self.released = false;
    }

    pub fn done(&mut self) -> bool {
        self.b.done()
    }

    pub fn get_extra(&mut self) -> f64 {
        self.b.get_extra()
    }

    pub fn length(&mut self) -> f64 {
        self.b.length() / self.rate
    }

    pub fn set_freq(&mut self, freq: f64) {
        self.a.set_freq(freq);
        self.b.set_freq(freq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::container::Pattern;
    use crate::nodes::leaf::Val;

    fn val_mod(v: f64) -> Module {
        Module::Val(Val::new(v))
    }

    fn four_step_pattern() -> Module {
        Module::Pattern(Pattern::new(vec![
            val_mod(10.0), val_mod(20.0), val_mod(30.0), val_mod(40.0),
        ]))
    }

    #[test]
    fn envelope_loops_at_release_mark_not_full_b_length() {
        // release (2.0) sits well short of b's full length (4.0); a
        // looping envelope must jump b back to `attack` as soon as its own
        // cursor crosses `release`, not wait for b.done() at 4.0.
        let mut env = Envelope::new(val_mod(1.0), four_step_pattern(), 1.0, true, 0.0, 2.0);
        env.step(1.0, Tick::Delta(1.0));
        env.step(1.0, Tick::Delta(1.0));
        assert_eq!(env.b.read(false, false, true), [10.0, 10.0]);
    }

    #[test]
    fn envelope_plays_through_to_end_after_stop() {
        // Once stopped, looping must not resume — b keeps advancing from
        // wherever it was at the release mark through to its own end.
        let mut env = Envelope::new(val_mod(1.0), four_step_pattern(), 1.0, true, 0.0, 2.0);
        env.step(1.0, Tick::Delta(1.0));
        env.step(1.0, Tick::Delta(1.0));
        env.step(0.0, Tick::Stop);
        assert_eq!(env.b.read(false, false, true), [30.0, 30.0]);
        env.step(1.0, Tick::Delta(1.0));
        assert_eq!(env.b.read(false, false, true), [40.0, 40.0]);
        assert!(!env.done());
        env.step(1.0, Tick::Delta(1.0));
        assert!(env.done());
    }
}
