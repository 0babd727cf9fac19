//! Unary wrappers: `Repeat` (cycle A while a count stays non-negative or
//! under a B-supplied limit) and `Const` (rate-scaled time wrapper, the
//! building block behind both instrument pitch scaling and sequence
//! tempo). `Invert` and `Cross` live in `nodes::mod` — `Invert` because
//! it is a one-line negation with no state of its own, `Cross` because it
//! must reach into an arbitrary binary-shaped child via the `ab`/`ab_mut`
//! helpers defined there.

use crate::command::Tick;
use crate::nodes::Module;
use crate::signal::Stereo;

/// A length this large stands in for "unbounded" (mirrors the source's
/// `9999999999999` sentinel for a `Repeat` whose count is negative).
pub const UNBOUNDED_LENGTH: f64 = 9_999_999_999_999.0;

/// Repeats `a`, consulting `b` (read once per cycle, scalar) for how many
/// times: negative means forever, otherwise a cycle count.
#[derive(Debug, Clone)]
pub struct Repeat {
    pub a: Box<Module>,
    pub b: Box<Module>,
    resets: i64,
}

impl Repeat {
    pub fn new(a: Module, b: Module) -> Self {
        Repeat { a: Box::new(a), b: Box::new(b), resets: 1 }
    }

    fn reps(&mut self) -> f64 {
        self.b.read(false, false, false)[0]
    }

    pub fn step(&mut self, delta: f64, tick: Tick) {
        self.a.step(delta, tick);
        if self.a.done() && !self.done() {
            let extra = self.a.get_extra();
            self.a.reset();
            self.a.step(extra, Tick::Adjust(extra));
            self.resets += 1;
        }
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        self.a.step_tails(delta, tick);
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        self.a.read(tails, stereo, signal)
    }

    pub fn reset(&mut self) {
        self.a.reset();
        self.resets = 1;
    }

    pub fn clear(&mut self) {
        self.a.clear();
        self.resets = 1;
    }

    pub fn done(&mut self) -> bool {
        let reps = self.reps();
        reps >= 0.0 && self.resets as f64 >= reps && self.a.done()
    }

    pub fn get_extra(&mut self) -> f64 {
        if self.done() { self.a.get_extra() } else { 0.0 }
    }

    pub fn length(&mut self) -> f64 {
        let reps = self.reps();
        if reps < 0.0 {
            UNBOUNDED_LENGTH
        } else {
            self.a.length() * reps
        }
    }

    pub fn set_freq(&mut self, freq: f64) {
        self.a.set_freq(freq);
        self.b.set_freq(freq);
    }
}

/// Wraps `mdl` in a fixed local-time rate: one call to `step` with the
/// sentinel-free "play normally" tick advances `mdl` by `delta * rate`,
/// where `rate` already folds in a per-song-step `frameslice` baked at
/// parse time — this is how `Inst` maps DSL cursor-units to real time and
/// how a sequence's one-step-per-beat clock is derived.
///
/// `Stop`/`Release`/`Adjust` ticks pass through unscaled, matching the
/// source's forward-unchanged handling of those sentinels; only the plain
/// advancing tick is rate-scaled.
#[derive(Debug, Clone)]
pub struct ConstNode {
    pub mdl: Box<Module>,
    pub rate: f64,
    loop_: bool,
}

impl ConstNode {
    pub fn new(mdl: Module, rate: f64) -> Self {
        ConstNode { mdl: Box::new(mdl), rate, loop_: true }
    }

    /// A non-looping `Const` ignores `reset()` entirely, so a one-shot
    /// wrapped module (e.g. a transient that shouldn't retrigger when an
    /// owning `Pattern`/`Repeat` cycles back around) stays finished.
    pub fn with_loop(mut self, loop_: bool) -> Self {
        self.loop_ = loop_;
        self
    }

    pub fn step(&mut self, delta: f64, tick: Tick) {
        match tick {
            Tick::Stop => self.mdl.step(delta, Tick::Stop),
            Tick::Release => self.mdl.step(delta, Tick::Release),
            Tick::Adjust(c) => self.mdl.step(delta, Tick::Adjust(c)),
            _ => {
                let resolved = tick.const_value(delta);
                let c = resolved * self.rate;
                self.mdl.step(c, Tick::Const(resolved));
            }
        }
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        let c = tick.const_value(delta) * self.rate;
        self.mdl.step_tails(delta * self.rate, Tick::Const(c));
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        self.mdl.read(tails, stereo, signal)
    }

    pub fn reset(&mut self) {
        if self.loop_ {
            self.mdl.reset();
        }
    }

    pub fn clear(&mut self) {
        self.mdl.clear();
    }

    pub fn done(&mut self) -> bool {
        self.mdl.done()
    }

    /// Not divided by `rate`, matching the grounding source's deliberately
    /// commented-out division here (unlike `length()` just below, which
    /// does divide) — the same asymmetry `Envelope::get_extra` preserves.
    pub fn get_extra(&mut self) -> f64 {
        self.mdl.get_extra()
    }

    pub fn length(&mut self) -> f64 {
        self.mdl.length() / self.rate
    }

    pub fn set_freq(&mut self, freq: f64) {
        self.mdl.set_freq(freq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::leaf::Val;

    fn val_mod(v: f64) -> Module {
        Module::Val(Val::new(v))
    }

    #[test]
    fn repeat_counts_fixed_cycles() {
        let mut r = Repeat::new(val_mod(1.0), val_mod(2.0));
        assert_eq!(r.length(), 2.0);
        r.step(1.0, Tick::Delta(1.0));
        assert!(!r.done());
        r.step(1.0, Tick::Delta(1.0));
        assert!(r.done());
    }

    #[test]
    fn repeat_negative_count_is_unbounded() {
        let mut r = Repeat::new(val_mod(1.0), val_mod(-1.0));
        assert_eq!(r.length(), UNBOUNDED_LENGTH);
        for _ in 0..10 {
            r.step(1.0, Tick::Delta(1.0));
            assert!(!r.done());
        }
    }

    #[test]
    fn const_node_scales_time() {
        let mut c = ConstNode::new(val_mod(5.0), 2.0);
        assert_eq!(c.length(), 0.5);
        c.step(0.25, Tick::Delta(0.25));
        assert!(c.done());
    }
}
