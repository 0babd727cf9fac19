//! `Song`: the top-level driver. An ordered list of sequence-valued
//! `SongItem`s (`Sequence` or `SeqBlock`) played one at a time; when one
//! finishes it is stopped and, unless it is purely value-typed, kept
//! around in a `tails` list so whatever it was still decaying (its own
//! inner tails) keeps sounding into the next item (spec §4.9; source
//! `class Song`).

use std::collections::VecDeque;

use crate::command::Tick;
use crate::sequence::{SeqBlock, Sequence};
use crate::signal::Stereo;
use rand::Rng;

/// One entry of a song's pattern list: either a genuine parallel
/// `Sequence` of `SeqLine`s, a bare `Module` wearing a `Sequence`'s
/// pan/tails clothing (a `SEQ`-less `BLK`/`PAT` block), or a
/// `[...]`/`{...}`/`(...)` grouping of further entries — the parser's
/// `SEQN`-kind atom grammar reuses the same bracket syntax as module
/// expressions, so a song line or `BLK` list can itself be a Pattern,
/// Series, or Set of sequences (source `parseSongLine`/`parsePattern`
/// called with `kind=SEQN`).
#[derive(Debug, Clone)]
pub enum SongItem {
    Sequence(Sequence),
    SeqBlock(SeqBlock),
    Group(SeqGroup),
}

impl SongItem {
    pub fn step(&mut self, delta: f64, tick: Tick) {
        match self {
            SongItem::Sequence(s) => s.step(delta, tick),
            SongItem::SeqBlock(b) => b.step(delta, tick),
            SongItem::Group(g) => g.step(delta, tick),
        }
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        match self {
            SongItem::Sequence(s) => s.step_tails(delta, tick),
            SongItem::SeqBlock(b) => b.step_tails(delta, tick),
            SongItem::Group(g) => g.step_tails(delta, tick),
        }
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        match self {
            SongItem::Sequence(s) => s.read(tails, stereo, signal),
            SongItem::SeqBlock(b) => b.read(tails, stereo, signal),
            SongItem::Group(g) => g.read(tails, stereo, signal),
        }
    }

    pub fn done(&mut self) -> bool {
        match self {
            SongItem::Sequence(s) => s.done(),
            SongItem::SeqBlock(b) => b.done(),
            SongItem::Group(g) => g.done(),
        }
    }

    pub fn clear(&mut self) {
        match self {
            SongItem::Sequence(s) => s.clear(),
            SongItem::SeqBlock(b) => b.clear(),
            SongItem::Group(g) => g.clear(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            SongItem::Sequence(s) => s.reset(),
            SongItem::SeqBlock(b) => b.reset(),
            SongItem::Group(g) => g.reset(),
        }
    }

    pub fn get_extra(&mut self) -> f64 {
        match self {
            SongItem::Sequence(s) => s.get_extra(),
            SongItem::SeqBlock(b) => b.get_extra(),
            SongItem::Group(g) => g.get_extra(),
        }
    }

    pub fn length(&mut self) -> f64 {
        match self {
            SongItem::Sequence(s) => s.length(),
            SongItem::SeqBlock(b) => b.length(),
            SongItem::Group(g) => g.length(),
        }
    }

    pub fn set_freq(&mut self, freq: f64) {
        match self {
            SongItem::Sequence(s) => s.set_freq(freq),
            SongItem::SeqBlock(b) => b.set_freq(freq),
            SongItem::Group(g) => g.set_freq(freq),
        }
    }

    /// See `nodes::Module::no_tails` and `sequence::SeqBlock::no_tails`:
    /// a `SeqBlock` wrapping a purely value-typed module (e.g. a bare
    /// `Val`) never has audible decay worth holding in `Song::tails`.
    pub fn no_tails(&self) -> bool {
        match self {
            SongItem::Sequence(s) => s.no_tails(),
            SongItem::SeqBlock(b) => b.no_tails(),
            SongItem::Group(g) => g.no_tails(),
        }
    }
}

/// Which container algorithm a `SeqGroup` runs — the three are kept as one
/// struct (rather than three, as `nodes::container` does for `Module`)
/// because this is the only place a song-list grouping of sequence-valued
/// items is needed; splitting it into `SeqPattern`/`SeqSeries`/`SeqSet`
/// would just triplicate `SongItem`'s dispatch boilerplate above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    Pattern,
    Series,
    Set,
}

/// A `[...]`/`{...}`/`(...)` grouping of `SongItem`s, mirroring
/// `nodes::container::{Pattern, Series, Set}` but over sequence-valued
/// children instead of `Module`s.
#[derive(Debug, Clone)]
pub struct SeqGroup {
    mode: GroupMode,
    items: Vec<SongItem>,
    cur_inx: usize,
    extra: f64,
}

impl SeqGroup {
    pub fn new(mode: GroupMode, items: Vec<SongItem>) -> Self {
        let cur_inx = match mode {
            GroupMode::Pattern | GroupMode::Series => 0,
            GroupMode::Set => rand::thread_rng().gen_range(0..items.len()),
        };
        SeqGroup { mode, items, cur_inx, extra: 0.0 }
    }

    fn redraw(&mut self) {
        if self.mode == GroupMode::Set {
            self.cur_inx = rand::thread_rng().gen_range(0..self.items.len());
        }
    }

    pub fn step(&mut self, delta: f64, tick: Tick) {
        match self.mode {
            GroupMode::Pattern => {
                if self.done() {
                    return;
                }
                self.items[self.cur_inx].step(delta, tick);
                while !self.done() && self.items[self.cur_inx].done() {
                    self.extra = self.items[self.cur_inx].get_extra();
                    self.items[self.cur_inx].reset();
                    self.cur_inx += 1;
                    if !self.done() {
                        self.items[self.cur_inx].step(self.extra, Tick::Adjust(self.extra));
                    }
                }
            }
            GroupMode::Series | GroupMode::Set => {
                self.items[self.cur_inx].step(delta, tick);
            }
        }
    }

    pub fn step_tails(&mut self, delta: f64, tick: Tick) {
        for item in self.items.iter_mut() {
            item.step_tails(delta, tick);
        }
    }

    pub fn read(&mut self, tails: bool, stereo: bool, signal: bool) -> Stereo {
        if self.mode == GroupMode::Series && !tails && self.items[self.cur_inx].done() {
            let extra = self.items[self.cur_inx].get_extra();
            self.items[self.cur_inx].reset();
            self.items[self.cur_inx].step(extra, Tick::Adjust(extra));
        }
        if !tails {
            return if self.done() {
                [0.0, 0.0]
            } else {
                self.items[self.cur_inx].read(tails, stereo, signal)
            };
        }
        let cur_inx = self.cur_inx;
        let mut out = [0.0, 0.0];
        for (i, item) in self.items.iter_mut().enumerate() {
            if i == cur_inx || !item.no_tails() {
                let v = item.read(tails, stereo, signal);
                out[0] += v[0];
                out[1] += v[1];
            }
        }
        out
    }

    pub fn reset(&mut self) {
        match self.mode {
            GroupMode::Pattern => {
                if !self.done() {
                    self.items[self.cur_inx].reset();
                }
                self.cur_inx = 0;
            }
            GroupMode::Series => {
                self.items[self.cur_inx].reset();
                self.cur_inx = (self.cur_inx + 1) % self.items.len();
            }
            GroupMode::Set => {
                self.items[self.cur_inx].reset();
                self.redraw();
            }
        }
    }

    pub fn clear(&mut self) {
        self.cur_inx = 0;
        self.extra = 0.0;
        for item in self.items.iter_mut() {
            item.clear();
        }
        self.redraw();
    }

    pub fn done(&mut self) -> bool {
        match self.mode {
            GroupMode::Pattern => self.cur_inx >= self.items.len(),
            GroupMode::Series | GroupMode::Set => self.items[self.cur_inx].done(),
        }
    }

    pub fn get_extra(&mut self) -> f64 {
        match self.mode {
            GroupMode::Pattern => {
                if self.done() {
                    self.extra
                } else {
                    0.0
                }
            }
            GroupMode::Series | GroupMode::Set => self.items[self.cur_inx].get_extra(),
        }
    }

    pub fn length(&mut self) -> f64 {
        match self.mode {
            GroupMode::Pattern => self.items.iter_mut().map(|item| item.length()).sum(),
            GroupMode::Series | GroupMode::Set => self.items[self.cur_inx].length(),
        }
    }

    pub fn set_freq(&mut self, freq: f64) {
        for item in self.items.iter_mut() {
            item.set_freq(freq);
        }
    }

    pub fn no_tails(&self) -> bool {
        false
    }
}

/// Drives every sample of the render: one `SongItem` active at a time,
/// in order, with a side list of finished items still decaying.
#[derive(Debug, Clone)]
pub struct Song {
    upcoming: VecDeque<SongItem>,
    current: Option<SongItem>,
    tails: Vec<SongItem>,
    total_length: f64,
}

impl Song {
    pub fn new(pat: Vec<SongItem>) -> Self {
        let mut upcoming: VecDeque<SongItem> = pat.into();
        let total_length = upcoming.iter_mut().map(|item| item.length()).sum();
        let current = upcoming.pop_front();
        Song { upcoming, current, tails: Vec::new(), total_length }
    }

    /// Steps existing tails first, then the active item — matching the
    /// source's ordering (spec §5, "Ordering guarantees"). The active
    /// item is stepped with `const` pinned to the literal `delta` value
    /// (not the `Delta` sentinel): `Sequence`/`SeqBlock` read it only to
    /// detect `Stop`, so its exact value is otherwise unused downstream.
    pub fn step(&mut self, delta: f64) {
        for t in self.tails.iter_mut() {
            t.step_tails(delta, Tick::Const(delta));
        }
        self.tails.retain_mut(|t| !t.done());

        if let Some(cur) = self.current.as_mut() {
            cur.step(delta, Tick::Const(delta));
            cur.step_tails(delta, Tick::Const(delta));
            if cur.done() {
                cur.step(0.0, Tick::Stop);
                let finished = self.current.take().expect("current just matched Some");
                if !finished.no_tails() {
                    self.tails.push(finished);
                }
                self.current = self.upcoming.pop_front();
            }
        }
    }

    /// Sums the active item's active output, the active item's own
    /// tails (unless it opts out), and every global tail — the same
    /// sample-order the source reads in within one driver tick.
    pub fn read(&mut self, stereo: bool, signal: bool) -> Stereo {
        let mut sum = [0.0, 0.0];
        if let Some(cur) = self.current.as_mut() {
            let v = cur.read(false, stereo, signal);
            sum[0] += v[0];
            sum[1] += v[1];
            if !cur.no_tails() {
                let v = cur.read(true, stereo, signal);
                sum[0] += v[0];
                sum[1] += v[1];
            }
        }
        for t in self.tails.iter_mut() {
            let v = t.read(true, stereo, signal);
            sum[0] += v[0];
            sum[1] += v[1];
        }
        sum
    }

    pub fn done(&self) -> bool {
        self.current.is_none() && self.tails.is_empty()
    }

    /// Informational only (spec §4.9): progress may read past 100% since
    /// tails can outlive the item that spawned them.
    pub fn length(&self) -> f64 {
        self.total_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::inst::Inst;
    use crate::nodes::leaf::Val;
    use crate::nodes::Module;
    use crate::sequence::{Cell, SeqLine};
    use std::rc::Rc;

    fn ctx() -> Rc<Context> {
        Rc::new(Context::new())
    }

    fn val_mod(v: f64) -> Module {
        Module::Val(Val::new(v))
    }

    #[test]
    fn song_advances_through_items_and_reports_done() {
        let c = ctx();
        let attack = Cell::Attack(Inst::new(c.clone(), val_mod(9.0), Some(1.0), false, false, None));
        let line = SeqLine::new(c.clone(), val_mod(5700.0), vec![attack], None);
        let seq = Sequence::new(vec![line], None);
        let mut song = Song::new(vec![SongItem::Sequence(seq)]);
        assert!(!song.done());
        let frames = (song.length() * 2.0) as i64 + 100;
        for _ in 0..frames {
            if song.done() {
                break;
            }
            song.step(1.0);
        }
        assert!(song.done());
    }

    #[test]
    fn song_is_immediately_done_with_no_items() {
        let song = Song::new(vec![]);
        assert!(song.done());
    }

    fn seq_block(v: f64) -> SongItem {
        SongItem::SeqBlock(SeqBlock::new(val_mod(v), None))
    }

    #[test]
    fn seq_group_pattern_concatenates_children() {
        let mut group = SeqGroup::new(GroupMode::Pattern, vec![seq_block(1.0), seq_block(2.0)]);
        assert_eq!(group.length(), 2.0);
        assert_eq!(group.read(false, false, true), [1.0, 1.0]);
        group.step(1.0, Tick::Delta(1.0));
        assert!(group.done());
    }

    #[test]
    fn seq_group_series_round_robins_across_resets() {
        let mut group = SeqGroup::new(GroupMode::Series, vec![seq_block(1.0), seq_block(2.0)]);
        assert_eq!(group.read(false, false, true), [1.0, 1.0]);
        group.reset();
        assert_eq!(group.read(false, false, true), [2.0, 2.0]);
    }
}
