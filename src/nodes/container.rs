//! Container modules: `Pattern` (concatenation), `Series` (round-robin
//! across resets), `Set` (uniform random pick, redrawn per cycle).

use crate::command::Tick;
use crate::nodes::Module;
use crate::signal::Stereo;
use rand::Rng;

/// Plays its children one after another, left to right, then is done.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub pat: Vec<Module>,
    cur_inx: usize,
    extra: f64,
}

impl Pattern {
    pub fn new(pat: Vec<Module>) -> Self {
        Pattern { pat, cur_inx: 0, extra: 0.0 }
    }

    /// Steps the active child, then — since a large `delta` can finish more
    /// than one child in a single call — keeps advancing and re-stepping
    /// with the accumulated overshoot until the new current child is not
    /// itself already done or the whole pattern has ended.
    pub fn step(&mut self, delta: f64, tick: Tick) {
        if self.done() {
            return;
        }
        self.pat[self.cur_inx].step(delta, tick);
        while !self.done() && self.pat[self.cur_inx].done() {
            self.extra = self.pat[self.cur_inx].get_extra();
            self.pat[self.cur_inx].reset();
            self.cur_inx += 1;
            if !self.done() {
                self.pat[self.cur_inx].step(self.extra, Tick::Adjust(self.extra));
            }
        }
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        for mdl in self.pat.iter_mut() {
            mdl.step_tails(delta, tick);
        }
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        if !tails {
            return if self.done() {
                [0.0, 0.0]
            } else {
                self.pat[self.cur_inx].read(tails, stereo, signal)
            };
        }
        let cur_inx = self.cur_inx;
        let mut out = [0.0, 0.0];
        for (i, mdl) in self.pat.iter_mut().enumerate() {
            if i == cur_inx || !mdl.no_tails() {
                let v = mdl.read(tails, stereo, signal);
                out[0] += v[0];
                out[1] += v[1];
            }
        }
        out
    }

    pub fn reset(&mut self) {
        if !self.done() {
            self.pat[self.cur_inx].reset();
        }
        self.cur_inx = 0;
    }

    pub fn clear(&mut self) {
        self.cur_inx = 0;
        self.extra = 0.0;
        for mdl in self.pat.iter_mut() {
            mdl.clear();
        }
    }

    pub fn done(&self) -> bool {
        self.cur_inx >= self.pat.len()
    }

    pub fn get_extra(&self) -> f64 {
        if self.done() { self.extra } else { 0.0 }
    }

    pub fn length(&self) -> f64 {
        self.pat.iter().map(|mdl| mdl.length()).sum()
    }

    pub fn set_freq(&mut self, freq: f64) {
        for mdl in self.pat.iter_mut() {
            mdl.set_freq(freq);
        }
    }
}

/// Plays one child per cycle, advancing to the next at every `reset()`
/// (wrapping). Never finishes on its own — `done()` mirrors the active
/// child's own completion for the current cycle.
#[derive(Debug, Clone)]
pub struct Series {
    pub srs: Vec<Module>,
    cur_inx: usize,
}

impl Series {
    pub fn new(srs: Vec<Module>) -> Self {
        Series { srs, cur_inx: 0 }
    }

    pub fn step(&mut self, delta: f64, tick: Tick) {
        self.srs[self.cur_inx].step(delta, tick);
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        for mdl in self.srs.iter_mut() {
            mdl.step_tails(delta, tick);
        }
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        if !tails && self.srs[self.cur_inx].done() {
            let extra = self.srs[self.cur_inx].get_extra();
            self.srs[self.cur_inx].reset();
            self.srs[self.cur_inx].step(extra, Tick::Adjust(extra));
        }
        if !tails {
            return self.srs[self.cur_inx].read(tails, stereo, signal);
        }
        let cur_inx = self.cur_inx;
        let mut out = [0.0, 0.0];
        for (i, mdl) in self.srs.iter_mut().enumerate() {
            if i == cur_inx || !mdl.no_tails() {
                let v = mdl.read(tails, stereo, signal);
                out[0] += v[0];
                out[1] += v[1];
            }
        }
        out
    }

    pub fn reset(&mut self) {
        self.srs[self.cur_inx].reset();
        self.cur_inx = (self.cur_inx + 1) % self.srs.len();
    }

    pub fn clear(&mut self) {
        self.cur_inx = 0;
        for mdl in self.srs.iter_mut() {
            mdl.clear();
        }
    }

    pub fn done(&self) -> bool {
        self.srs[self.cur_inx].done()
    }

    pub fn get_extra(&self) -> f64 {
        self.srs[self.cur_inx].get_extra()
    }

    pub fn length(&self) -> f64 {
        self.srs[self.cur_inx].length()
    }

    pub fn set_freq(&mut self, freq: f64) {
        for mdl in self.srs.iter_mut() {
            mdl.set_freq(freq);
        }
    }
}

/// Plays one uniformly-random child per cycle; the pick is redrawn on every
/// `reset()`/`clear()`/`clone()` (cloning re-draws rather than preserving
/// the source's current index — see DESIGN.md).
#[derive(Debug, Clone)]
pub struct Set {
    pub set: Vec<Module>,
    cur: usize,
}

impl Set {
    pub fn new(set: Vec<Module>) -> Self {
        let cur = rand::thread_rng().gen_range(0..set.len());
        Set { set, cur }
    }

    fn redraw(&mut self) {
        self.cur = rand::thread_rng().gen_range(0..self.set.len());
    }

    pub fn step(&mut self, delta: f64, tick: Tick) {
        self.set[self.cur].step(delta, tick);
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        for mdl in self.set.iter_mut() {
            mdl.step_tails(delta, tick);
        }
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        if !tails {
            return self.set[self.cur].read(tails, stereo, signal);
        }
        let cur = self.cur;
        let mut out = [0.0, 0.0];
        for (i, mdl) in self.set.iter_mut().enumerate() {
            if i == cur || !mdl.no_tails() {
                let v = mdl.read(tails, stereo, signal);
                out[0] += v[0];
                out[1] += v[1];
            }
        }
        out
    }

    pub fn reset(&mut self) {
        self.set[self.cur].reset();
        self.redraw();
    }

    pub fn clear(&mut self) {
        for mdl in self.set.iter_mut() {
            mdl.clear();
        }
        self.redraw();
    }

    pub fn done(&self) -> bool {
        self.set[self.cur].done()
    }

    pub fn get_extra(&self) -> f64 {
        self.set[self.cur].get_extra()
    }

    pub fn length(&self) -> f64 {
        self.set[self.cur].length()
    }

    pub fn set_freq(&mut self, freq: f64) {
        for mdl in self.set.iter_mut() {
            mdl.set_freq(freq);
        }
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
    fn pattern_concatenates_and_crosses_multiple_boundaries_in_one_step() {
        let mut pat = Pattern::new(vec![val_mod(1.0), val_mod(2.0), val_mod(3.0)]);
        assert_eq!(pat.length(), 3.0);
        pat.step(2.5, Tick::Delta(2.5));
        assert!(!pat.done());
        assert_eq!(pat.read(false, false, true), [3.0, 3.0]);
    }

    #[test]
    fn pattern_finishes_and_reports_extra() {
        let mut pat = Pattern::new(vec![val_mod(1.0), val_mod(1.0)]);
        pat.step(2.5, Tick::Delta(2.5));
        assert!(pat.done());
        assert!((pat.get_extra() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn series_round_robins_across_resets() {
        let mut srs = Series::new(vec![val_mod(10.0), val_mod(20.0)]);
        assert_eq!(srs.read(false, false, true), [10.0, 10.0]);
        srs.reset();
        assert_eq!(srs.read(false, false, true), [20.0, 20.0]);
        srs.reset();
        assert_eq!(srs.read(false, false, true), [10.0, 10.0]);
    }

    #[test]
    fn set_picks_one_of_its_children() {
        let set = Set::new(vec![val_mod(1.0), val_mod(2.0), val_mod(3.0)]);
        let v = set.read(false, false, true)[0];
        assert!(v == 1.0 || v == 2.0 || v == 3.0);
    }
}
