//! Song-wide configuration shared by every `Const`, `Inst`, and sequence
//! node — the values an SC `CFG` block produces (see spec §4.10). Bound
//! once per render: later `CFG` lines rebuild this and any nodes
//! constructed afterward capture the new values, exactly as the source
//! recomputes `frameslice`/`framesperstep`/`rel_time` after each config
//! change and bakes them into whatever `Const`/`Inst` is built next.

use crate::signal::{FreqTable, ToneTable};

/// `INS_REL_TIME`: the instrument release fade length in milliseconds.
pub const INS_REL_TIME_MS: f64 = 6.0;

#[derive(Debug, Clone)]
pub struct Context {
    pub tempo: f64,
    pub beat: f64,
    pub sample_rate: f64,
    pub depth: u32,
    pub stereo: bool,
    pub normalize: bool,
    pub name: String,
    pub frames_per_step: f64,
    pub frameslice: f64,
    pub rel_time: f64,
    pub tones: ToneTable,
    pub freqs: FreqTable,
}

impl Context {
    pub fn new() -> Self {
        let tones = ToneTable::build();
        let freqs = FreqTable::build(tones.a4_cents());
        let mut ctx = Context {
            tempo: 120.0,
            beat: 4.0,
            sample_rate: 44100.0,
            depth: 16,
            stereo: true,
            normalize: false,
            name: String::from("untitled"),
            frames_per_step: 0.0,
            frameslice: 0.0,
            rel_time: 0.0,
            tones,
            freqs,
        };
        ctx.recompute();
        ctx
    }

    /// Recomputes `frames_per_step`, `frameslice`, and `rel_time` from
    /// `tempo`/`beat`/`sample_rate`. Call after any `CFG` field changes.
    pub fn recompute(&mut self) {
        self.frames_per_step = (60.0 * self.sample_rate) / (self.tempo * self.beat);
        self.frameslice = 1.0 / self.frames_per_step;
        self.rel_time = INS_REL_TIME_MS * self.sample_rate / 1000.0;
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_matches_source_defaults() {
        let ctx = Context::new();
        assert!((ctx.frames_per_step - (60.0 * 44100.0) / (120.0 * 4.0)).abs() < 1e-9);
        assert!((ctx.frameslice - 1.0 / ctx.frames_per_step).abs() < 1e-12);
        assert!((ctx.rel_time - 6.0 * 44100.0 / 1000.0).abs() < 1e-9);
    }

    #[test]
    fn recompute_tracks_cfg_changes() {
        let mut ctx = Context::new();
        ctx.tempo = 140.0;
        ctx.recompute();
        assert!((ctx.frames_per_step - (60.0 * 44100.0) / (140.0 * 4.0)).abs() < 1e-9);
    }
}
