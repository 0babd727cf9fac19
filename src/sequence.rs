//! The sequence layer: `SeqLine` (one voice's cell pattern), `Sequence`
//! (several `SeqLine`s stacked in parallel, plus a shared pan and a list of
//! decaying tails), and `SeqBlock` (an arbitrary `Module` wearing a
//! sequence's pan/tails clothing so `Song` can mix it alongside real
//! sequences). Grounded in the source's `SeqLine`/`Sequence`/`SeqBlock`
//! classes (see spec §4.7-§4.8).

use std::rc::Rc;

use crate::command::Tick;
use crate::context::Context;
use crate::inst::Inst;
use crate::nodes::leaf::Val;
use crate::nodes::Module;
use crate::signal::{pan, Stereo};

/// One slot of a `SeqLine`'s pattern: silence, a tie into the previous
/// attack, or a fresh attack.
#[derive(Debug, Clone)]
pub enum Cell {
    Silence,
    Tie,
    Attack(Inst),
}

/// A single voice: a pitch module (read once per step, cents from C0), a
/// pan module, and a row of cells played one per song-step. Ties hold the
/// previous attack sounding across the boundary instead of retriggering it.
#[derive(Debug, Clone)]
pub struct SeqLine {
    ctx: Rc<Context>,
    pitch: Box<Module>,
    pan: Box<Module>,
    pat: Vec<Cell>,
    cur: f64,
    cur_inx: usize,
    cur_inst: Option<usize>,
}

impl SeqLine {
    pub fn new(ctx: Rc<Context>, pitch: Module, pat: Vec<Cell>, pan: Option<Module>) -> Self {
        let pan = pan.unwrap_or_else(|| Module::Val(Val::new(0.0)));
        let cur_inst = match pat.first() {
            Some(Cell::Attack(_)) => Some(0),
            _ => None,
        };
        SeqLine { ctx, pitch: Box::new(pitch), pan: Box::new(pan), pat, cur: 0.0, cur_inx: 0, cur_inst }
    }

    /// Advances the line by `delta`. Returns any attack that just finished
    /// sounding (either it hit a non-tied cell boundary or it auto-stopped on
    /// its own) so the owning `Sequence` can fold it into its tails list —
    /// this stands in for the source's `self.seq.tails.append(...)`
    /// back-reference, which Rust's ownership model doesn't let a `SeqLine`
    /// hold directly.
    pub fn step(&mut self, delta: f64, tick: Tick) -> Vec<Inst> {
        let mut released = Vec::new();
        self.cur += delta;
        if let Tick::Adjust(_) = tick {
            return released;
        }
        self.pitch.step(self.ctx.frameslice, Tick::Const(1.0));
        self.pan.step(self.ctx.frameslice, Tick::Const(1.0));
        if let Some(idx) = self.cur_inst {
            if let Cell::Attack(inst) = &mut self.pat[idx] {
                inst.step(delta, tick);
            }
            let next_is_tie = matches!(self.pat.get(self.cur_inx + 1), Some(Cell::Tie));
            let last_cell = self.cur_inx + 1 >= self.pat.len();
            let at_boundary = self.cur >= self.ctx.frames_per_step - self.ctx.rel_time;
            if at_boundary && (last_cell || !next_is_tie) {
                if let Cell::Attack(inst) = &mut self.pat[idx] {
                    inst.stop();
                    released.push(inst.clone());
                }
                self.cur_inst = None;
            } else {
                let stopped_already = matches!(&self.pat[idx], Cell::Attack(inst) if inst.is_stopped());
                if stopped_already {
                    if let Cell::Attack(inst) = &mut self.pat[idx] {
                        released.push(inst.clone());
                    }
                    self.cur_inst = None;
                }
            }
        }
        if self.cur >= self.ctx.frames_per_step {
            self.cur %= self.ctx.frames_per_step;
            self.cur_inx += 1;
            if !self.done() {
                match &self.pat[self.cur_inx] {
                    Cell::Tie => {}
                    Cell::Silence => self.cur_inst = None,
                    Cell::Attack(_) => self.cur_inst = Some(self.cur_inx),
                }
            }
        }
        released
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        if self.pitch.done() {
            let extra = self.pitch.get_extra();
            self.pitch.reset();
            self.pitch.step(extra, Tick::Adjust(extra));
        }
        if stereo && self.pan.done() {
            let extra = self.pan.get_extra();
            self.pan.reset();
            self.pan.step(extra, Tick::Adjust(extra));
        }
        match self.cur_inst {
            Some(idx) => {
                let cents = self.pitch.read(false, false, false)[0];
                let freq = self.ctx.freqs.lookup(cents);
                let val = if let Cell::Attack(inst) = &mut self.pat[idx] {
                    if (inst.freq() - freq).abs() > f64::EPSILON {
                        inst.set_freq(freq);
                    }
                    inst.read(tails, stereo, signal)
                } else {
                    [0.0, 0.0]
                };
                if stereo {
                    let pan_val = self.pan.read(false, false, false)[0];
                    pan(val, pan_val)
                } else {
                    val
                }
            }
            None => [0.0, 0.0],
        }
    }

    pub fn reset(&mut self) {
        self.cur = 0.0;
        self.cur_inx = 0;
        for cell in self.pat.iter_mut() {
            if let Cell::Attack(inst) = cell {
                inst.clear();
            }
        }
        match self.pat.first() {
            // a line can't sensibly open on a tie; the source leaves
            // `curInst` untouched here rather than defining a meaning for it.
            Some(Cell::Tie) => {}
            Some(Cell::Silence) => self.cur_inst = None,
            Some(Cell::Attack(_)) => self.cur_inst = Some(0),
            None => {}
        }
    }

    pub fn clear(&mut self) {
        self.pitch.clear();
        self.pan.clear();
        self.reset();
    }

    pub fn done(&self) -> bool {
        self.cur_inx >= self.pat.len()
    }

    pub fn get_extra(&self) -> f64 {
        if self.done() { self.cur } else { 0.0 }
    }

    pub fn length(&self) -> f64 {
        self.pat.len() as f64 * self.ctx.frames_per_step
    }
}

/// Several `SeqLine`s stacked in parallel under a shared pan, plus a list of
/// `tails`: attacks that finished but are still decaying into their release
/// phase and must keep being read (and stepped) after the line that spawned
/// them moves on.
#[derive(Debug, Clone)]
pub struct Sequence {
    pan: Box<Module>,
    lines: Vec<SeqLine>,
    tails: Vec<Inst>,
    stopped: bool,
    len: f64,
}

impl Sequence {
    pub fn new(lines: Vec<SeqLine>, pan: Option<Module>) -> Self {
        let len = lines.iter().map(|l| l.length()).fold(0.0, f64::max);
        let pan = pan.unwrap_or_else(|| Module::Val(Val::new(0.0)));
        Sequence { pan: Box::new(pan), lines, tails: Vec::new(), stopped: false, len }
    }

    pub fn step(&mut self, _delta: f64, tick: Tick) {
        if let Tick::Stop = tick {
            self.stopped = true;
            return;
        }
        if self.stopped {
            return;
        }
        self.pan.step(_delta, Tick::Const(1.0));
        for ln in self.lines.iter_mut() {
            if !ln.done() {
                let released = ln.step(_delta, Tick::Const(1.0));
                self.tails.extend(released);
            }
        }
    }

    pub fn step_tails(&mut self, delta: f64, _tick: Tick) {
        for t in self.tails.iter_mut() {
            t.step(delta, Tick::Const(1.0));
        }
        self.tails.retain_mut(|t| !t.done());
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        if tails {
            let mut sum = [0.0, 0.0];
            for t in self.tails.iter_mut() {
                let v = t.read(false, stereo, signal);
                sum[0] += v[0];
                sum[1] += v[1];
            }
            if stereo {
                let pan_val = self.pan.read(false, false, false)[0];
                pan(sum, pan_val)
            } else {
                sum
            }
        } else {
            if stereo && self.pan.done() {
                let extra = self.pan.get_extra();
                self.pan.reset();
                self.pan.step(extra, Tick::Adjust(extra));
            }
            let mut sum = [0.0, 0.0];
            if !self.stopped {
                for ln in self.lines.iter_mut() {
                    if !ln.done() {
                        let v = ln.read(tails, stereo, signal);
                        sum[0] += v[0];
                        sum[1] += v[1];
                    }
                }
            }
            if stereo {
                let pan_val = self.pan.read(false, false, false)[0];
                pan(sum, pan_val)
            } else {
                sum
            }
        }
    }

    pub fn reset(&mut self) {
        self.pan.reset();
        self.stopped = false;
        self.tails.clear();
        for ln in self.lines.iter_mut() {
            ln.reset();
        }
    }

    pub fn clear(&mut self) {
        self.pan.clear();
        self.stopped = false;
        self.tails.clear();
        for ln in self.lines.iter_mut() {
            ln.clear();
        }
    }

    pub fn done(&self) -> bool {
        if !self.stopped {
            self.lines.iter().all(|l| l.done())
        } else {
            self.tails.is_empty()
        }
    }

    pub fn get_extra(&self) -> f64 {
        self.lines.first().map(|l| l.get_extra()).unwrap_or(0.0)
    }

    /// While running, the fixed length computed from the widest line at
    /// construction time. Once stopped, the longest remaining tail — the
    /// source's equivalent assigns the tail *object* itself into `len`
    /// (`if(t.length() > len): len = t`), a bug; this takes `t.length()`.
    pub fn length(&mut self) -> f64 {
        if !self.stopped {
            self.len
        } else {
            self.tails.iter_mut().map(|t| t.length()).fold(0.0, f64::max)
        }
    }

    pub fn set_freq(&mut self, freq: f64) {
        for t in self.tails.iter_mut() {
            t.set_freq(freq);
        }
    }

    /// A plain `Sequence` always participates in tail-mixing; only a
    /// `SeqBlock` wrapping a value-typed module can opt out the way some
    /// `Song` pattern entries do (see `SongItem::no_tails`).
    pub fn no_tails(&self) -> bool {
        false
    }
}

/// Wraps an arbitrary `Module` so it can sit in a `Song`'s pattern list next
/// to genuine `Sequence`s — used for a bare SEQ-less block reference. Has no
/// tails of its own; it defers entirely to the wrapped module's state.
#[derive(Debug, Clone)]
pub struct SeqBlock {
    module: Box<Module>,
    pan: Box<Module>,
}

impl SeqBlock {
    pub fn new(module: Module, pan: Option<Module>) -> Self {
        let pan = pan.unwrap_or_else(|| Module::Val(Val::new(0.0)));
        SeqBlock { module: Box::new(module), pan: Box::new(pan) }
    }

    pub fn step(&mut self, delta: f64, tick: Tick) {
        self.pan.step(delta, tick);
        self.module.step(delta, tick);
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        self.module.step_tails(delta, tick);
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        let val = self.module.read(tails, stereo, signal);
        if stereo {
            if self.pan.done() {
                let extra = self.pan.get_extra();
                self.pan.reset();
                self.pan.step(extra, Tick::Adjust(extra));
            }
            let pan_val = self.pan.read(false, false, false)[0];
            pan(val, pan_val)
        } else {
            val
        }
    }

    pub fn reset(&mut self) {
        self.pan.reset();
        self.module.reset();
    }

    pub fn clear(&mut self) {
        self.pan.clear();
        self.module.clear();
    }

    pub fn done(&mut self) -> bool {
        self.module.done()
    }

    pub fn get_extra(&mut self) -> f64 {
        self.module.get_extra()
    }

    pub fn length(&mut self) -> f64 {
        self.module.length()
    }

    pub fn set_freq(&mut self, freq: f64) {
        self.module.set_freq(freq);
    }

    pub fn no_tails(&self) -> bool {
        self.module.no_tails()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::leaf::Val;

    fn ctx() -> Rc<Context> {
        Rc::new(Context::new())
    }

    fn val_mod(v: f64) -> Module {
        Module::Val(Val::new(v))
    }

    fn attack(ctx: Rc<Context>) -> Cell {
        Cell::Attack(Inst::new(ctx, val_mod(9.0), Some(1.0), false, false, None))
    }

    #[test]
    fn seq_line_ties_hold_the_same_attack_across_a_boundary() {
        let c = ctx();
        let pat = vec![attack(c.clone()), Cell::Tie, Cell::Silence];
        let mut line = SeqLine::new(c.clone(), val_mod(5700.0), pat, None);
        assert!(!line.done());
        assert_eq!(line.length(), 3.0 * c.frames_per_step);
        // stepping through the whole first step shouldn't release the
        // attack yet, since the next cell ties into it.
        let mut released = Vec::new();
        let mut t = 0.0;
        while t < c.frames_per_step {
            released.extend(line.step(1.0, Tick::Delta(1.0)));
            t += 1.0;
        }
        assert!(released.is_empty());
        assert_eq!(line.cur_inx, 1);
    }

    #[test]
    fn seq_line_releases_into_tails_at_a_non_tied_boundary() {
        let c = ctx();
        let pat = vec![attack(c.clone()), Cell::Silence];
        let mut line = SeqLine::new(c.clone(), val_mod(5700.0), pat, None);
        let mut released = Vec::new();
        let mut t = 0.0;
        while t < c.frames_per_step {
            released.extend(line.step(1.0, Tick::Delta(1.0)));
            t += 1.0;
        }
        assert_eq!(released.len(), 1);
        assert_eq!(line.cur_inx, 1);
    }

    #[test]
    fn sequence_reports_done_once_every_line_finishes() {
        let c = ctx();
        let pat = vec![attack(c.clone())];
        let line = SeqLine::new(c.clone(), val_mod(5700.0), pat, None);
        let mut seq = Sequence::new(vec![line], None);
        assert!(!seq.done());
        let frames = seq.len.ceil() as i64 + 1;
        for _ in 0..frames {
            seq.step(1.0, Tick::Delta(1.0));
        }
        assert!(seq.done());
    }

    #[test]
    fn sequence_stop_moves_finished_attacks_into_tails_only() {
        let c = ctx();
        let pat = vec![attack(c.clone())];
        let line = SeqLine::new(c.clone(), val_mod(5700.0), pat, None);
        let mut seq = Sequence::new(vec![line], None);
        seq.step(0.0, Tick::Stop);
        assert!(seq.stopped);
        // no tails yet since nothing had finished before the stop
        assert_eq!(seq.length(), 0.0);
    }
}
