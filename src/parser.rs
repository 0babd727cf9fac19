//! The `.sc` text parser: a line-oriented block-header state machine
//! (`CFG`/`INS`/`MDL`/`SEQ`/`PAT`|`BLK`/`SNG`/`IMP`) feeding a left-to-right,
//! no-precedence expression grammar for module/instrument bodies (see spec
//! §6-§7). Grounded directly in the source's `parse`/`parseModule`/
//! `popModule`/`parseMeta`/`parseSongLine` family.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::context::Context;
use crate::error::{ScError, ScErrorKind};
use crate::inst::Inst;
use crate::nodes::binary::{Binary, BinOp, Envelope, LengthNode, LinInterp, Speed};
use crate::nodes::container::{Pattern, Series, Set};
use crate::nodes::leaf::Val;
use crate::nodes::unary::{ConstNode, Repeat};
use crate::nodes::{Cross, Module};
use crate::sequence::{Cell, SeqBlock, SeqLine, Sequence};
use crate::song::{GroupMode, SeqGroup, Song, SongItem};

/// Characters that can never appear inside an identifier: the binary
/// operators, unary prefixes, and every bracketing/meta punctuation mark.
/// An identifier scan stops at the first one of these, wherever it occurs.
const RESERVED: &str = "+-*/rixlvcsn{}[]()<>.,|";

const HEADERS: [&str; 8] = ["CFG", "INS", "MDL", "SEQ", "PAT", "BLK", "SNG", "IMP"];

/// Which dictionary an atom reference resolves against. Mirrors the
/// source's `INST`/`TONE`/`SEQN`/`MDLE` type constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseKind {
    Inst,
    Tone,
    Mdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Cfg,
    Ins,
    Mdl,
    Seq,
    Blk,
    Sng,
}

/// A fully parsed SC program, ready to hand its `song` to the renderer.
pub struct SynthCorona {
    pub ctx: Rc<Context>,
    pub insts: HashMap<String, Inst>,
    pub modules: HashMap<String, Module>,
    pub seqs: HashMap<String, SongItem>,
    pub song: Song,
}

impl SynthCorona {
    /// Parses a `.sc` file, resolving any `IMP` directives relative to its
    /// own directory.
    pub fn parse_file(path: &Path) -> Result<Self, ScError> {
        let text = fs::read_to_string(path)
            .map_err(|e| ScError::new(ScErrorKind::Io(format!("{}: {e}", path.display())), 0, path.display().to_string()))?;
        let dir = path.parent().map(PathBuf::from).unwrap_or_default();
        let mut parser = Parser::new(dir);
        parser.parse_text(&text)?;
        Ok(parser.finish())
    }
}

struct Parser {
    ctx: Rc<Context>,
    insts: HashMap<String, Inst>,
    modules: HashMap<String, Module>,
    seqs: HashMap<String, SongItem>,
    song_steps: Vec<SongItem>,
    cur_parse_module: String,
    dir: PathBuf,
}

impl Parser {
    fn new(dir: PathBuf) -> Self {
        Parser {
            ctx: Rc::new(Context::new()),
            insts: HashMap::new(),
            modules: HashMap::new(),
            seqs: HashMap::new(),
            song_steps: Vec::new(),
            cur_parse_module: "CFG".to_string(),
            dir,
        }
    }

    fn finish(self) -> SynthCorona {
        SynthCorona {
            ctx: self.ctx,
            insts: self.insts,
            modules: self.modules,
            seqs: self.seqs,
            song: Song::new(self.song_steps),
        }
    }

    fn ctx_mut(&mut self) -> &mut Context {
        Rc::make_mut(&mut self.ctx)
    }

    fn err(&self, kind: ScErrorKind, line_no: usize) -> ScError {
        ScError::new(kind, line_no, self.cur_parse_module.clone())
    }

    fn tone_at(&self, s: &str, n: usize) -> Option<i32> {
        if s.len() >= n && s.is_char_boundary(n) {
            self.ctx.tones.get(&s[..n])
        } else {
            None
        }
    }

    // ---- top-level line dispatch -----------------------------------

    fn parse_text(&mut self, text: &str) -> Result<(), ScError> {
        let lines: Vec<&str> = text.lines().collect();
        let mut state = BlockState::Cfg;
        let mut seq_name = String::new();
        let mut seq_pan: Option<Module> = None;
        let mut seq_lines: Vec<SeqLine> = Vec::new();

        for (i, raw) in lines.iter().enumerate() {
            let line_no = i + 1;
            let code = match raw.find("//") {
                Some(idx) => &raw[..idx],
                None => raw,
            };

            if code.trim().is_empty() {
                if state == BlockState::Seq && is_seq_block_ending(&lines, i) {
                    self.finalize_sequence(&seq_name, seq_pan.take(), std::mem::take(&mut seq_lines));
                }
                continue;
            }

            if starts_with_ci(code, &["IMP"]) {
                self.handle_import(code, line_no)?;
            } else if starts_with_ci(code, &["CFG"]) {
                state = BlockState::Cfg;
                self.cur_parse_module = "CFG".to_string();
            } else if starts_with_ci(code, &["INS"]) {
                state = BlockState::Ins;
            } else if starts_with_ci(code, &["MDL"]) {
                state = BlockState::Mdl;
            } else if starts_with_ci(code, &["SEQ"]) {
                state = BlockState::Seq;
                seq_lines = Vec::new();
                let header_rest = strip_header(code, 3);
                let (name, pan) = self.parse_seq_header(&header_rest, line_no)?;
                seq_name = name;
                seq_pan = pan;
                self.cur_parse_module = format!("SEQ: {seq_name}");
            } else if starts_with_ci(code, &["PAT", "BLK"]) {
                state = BlockState::Blk;
            } else if starts_with_ci(code, &["SNG"]) {
                state = BlockState::Sng;
                self.cur_parse_module = "SONG".to_string();
                let rest = strip_header(code, 3);
                if !rest.trim().is_empty() {
                    self.parse_song_line(&rest, line_no)?;
                }
            } else {
                match state {
                    BlockState::Cfg => self.parse_cfg_line(code, line_no)?,
                    BlockState::Ins | BlockState::Mdl => self.parse_ins_or_mdl_line(code, state, line_no)?,
                    BlockState::Blk => self.parse_blk_line(code, line_no)?,
                    BlockState::Sng => self.parse_song_line(code, line_no)?,
                    BlockState::Seq => {
                        let seq_line = self.parse_seq_content_line(code, line_no)?;
                        seq_lines.push(seq_line);
                        if is_seq_block_ending(&lines, i) {
                            self.finalize_sequence(&seq_name, seq_pan.take(), std::mem::take(&mut seq_lines));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn finalize_sequence(&mut self, name: &str, pan: Option<Module>, lines: Vec<SeqLine>) {
        let seq = Sequence::new(lines, pan);
        self.seqs.insert(name.to_string(), SongItem::Sequence(seq));
    }

    fn handle_import(&mut self, line: &str, line_no: usize) -> Result<(), ScError> {
        let rest = strip_header(line, 3);
        let rest = rest.trim();
        if rest.is_empty() {
            return Err(self.err(ScErrorKind::Malformed("Empty IMP directive.".to_string()), line_no));
        }
        let path = self.dir.join(rest);
        let imported = SynthCorona::parse_file(&path).map_err(|e| e.with_import(path.clone()))?;
        self.modules.extend(imported.modules);
        self.insts.extend(imported.insts);
        self.seqs.extend(imported.seqs);
        Ok(())
    }

    // ---- CFG ---------------------------------------------------------

    fn parse_cfg_line(&mut self, line: &str, line_no: usize) -> Result<(), ScError> {
        if starts_with_ci(line, &["TEMPO", "TMP"]) {
            let v = cfg_value(line, line_no, &self.cur_parse_module)?;
            self.ctx_mut().tempo = parse_cfg_num(&v, line_no, &self.cur_parse_module)?;
        } else if starts_with_ci(line, &["BEAT"]) {
            let v = cfg_value(line, line_no, &self.cur_parse_module)?;
            self.ctx_mut().beat = parse_cfg_num(&v, line_no, &self.cur_parse_module)?;
        } else if starts_with_ci(line, &["RATE"]) {
            let v = cfg_value(line, line_no, &self.cur_parse_module)?;
            self.ctx_mut().sample_rate = parse_cfg_num(&v, line_no, &self.cur_parse_module)?;
        } else if starts_with_ci(line, &["DEPTH"]) {
            let v = cfg_value(line, line_no, &self.cur_parse_module)?;
            self.ctx_mut().depth = parse_cfg_num(&v, line_no, &self.cur_parse_module)?;
        } else if starts_with_ci(line, &["NAME", "TITLE"]) {
            let v = cfg_value(line, line_no, &self.cur_parse_module)?;
            self.ctx_mut().name = v.trim().to_string();
        } else if starts_with_ci(line, &["STEREO"]) {
            self.ctx_mut().stereo = true;
        } else if starts_with_ci(line, &["MONO"]) {
            self.ctx_mut().stereo = false;
        } else if starts_with_ci(line, &["NORMALIZE", "NORM"]) {
            let v = cfg_value(line, line_no, &self.cur_parse_module)?;
            self.ctx_mut().normalize = !v.trim().starts_with(['F', 'f', '0']);
        }
        self.ctx_mut().recompute();
        Ok(())
    }

    // ---- INS / MDL -----------------------------------------------------

    fn parse_ins_or_mdl_line(&mut self, line: &str, state: BlockState, line_no: usize) -> Result<(), ScError> {
        let (name_part, desc) = split_name_desc(line, line_no, &self.cur_parse_module)?;
        let (name, meta) = split_name_meta(&name_part, line_no, &self.cur_parse_module)?;

        if state == BlockState::Ins {
            self.cur_parse_module = format!("INS: {name}");
            let mut period: Option<f64> = None;
            let mut loop_ = true;
            let mut sus = false;
            let mut pan: Option<Module> = None;

            for tag in &meta {
                let upper = tag.to_uppercase();
                let value = tag.splitn(2, '=').nth(1).map(|v| v.trim());
                if upper.starts_with("PERIOD") || upper.starts_with("PRD") {
                    period = value.and_then(|v| v.parse::<f64>().ok());
                } else if upper.starts_with("LOOP") || upper.starts_with('L') {
                    if let Some(v) = value {
                        loop_ = truthy(v);
                    }
                } else if upper.starts_with("SUS") || upper.starts_with('S') {
                    if let Some(v) = value {
                        sus = truthy(v);
                    }
                } else if upper.starts_with("PAN") {
                    if let Some(v) = value {
                        pan = self.resolve_pan_value(v);
                    }
                } else if upper.starts_with("BASE") {
                    if let Some(v) = value {
                        let base = self
                            .insts
                            .get(v)
                            .ok_or_else(|| self.err(ScErrorKind::InvalidInstrument(v.to_string()), line_no))?;
                        period = Some(base.period());
                        loop_ = base.loop_flag();
                        sus = base.sus_flag();
                        pan = Some(base.pan_clone());
                    }
                }
            }

            let (module, _) = self.parse_module_expr(&desc, ParseKind::Inst, line_no)?;
            let inst = Inst::new(self.ctx.clone(), module, period, loop_, sus, pan);
            self.insts.insert(name, inst);
        } else {
            self.cur_parse_module = format!("MDL: {name}");
            let (module, _) = self.parse_module_expr(&desc, ParseKind::Mdle, line_no)?;
            self.modules.insert(name, module);
        }
        Ok(())
    }

    // ---- BLK -----------------------------------------------------------

    fn parse_blk_line(&mut self, line: &str, line_no: usize) -> Result<(), ScError> {
        let (name_part, desc) = split_name_desc(line, line_no, &self.cur_parse_module)?;
        let (name, meta) = split_name_meta(&name_part, line_no, &self.cur_parse_module)?;
        self.cur_parse_module = format!("BLOCK: {name}");

        let mut pan = None;
        for tag in &meta {
            if tag.to_uppercase().starts_with("PAN") {
                if let Some(v) = tag.splitn(2, '=').nth(1) {
                    pan = self.resolve_pan_value(v);
                }
            }
        }

        let (module, _) = self.parse_module_expr(&desc, ParseKind::Mdle, line_no)?;
        self.seqs.insert(name, SongItem::SeqBlock(SeqBlock::new(module, pan)));
        Ok(())
    }

    // ---- SEQ -------------------------------------------------------------

    fn parse_seq_header(&mut self, s: &str, line_no: usize) -> Result<(String, Option<Module>), ScError> {
        match s.find('<') {
            None => Ok((s.trim().to_string(), None)),
            Some(idx) => {
                let name = s[..idx].trim().to_string();
                let after = &s[idx + 1..];
                let end = after.find('>').ok_or_else(|| self.err(ScErrorKind::MissingMetaClose, line_no))?;
                let meta: Vec<String> = after[..end].split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect();
                let mut pan = None;
                for tag in &meta {
                    if tag.to_uppercase().starts_with("PAN") {
                        if let Some(v) = tag.splitn(2, '=').nth(1) {
                            pan = self.resolve_pan_value(v);
                        }
                    }
                }
                Ok((name, pan))
            }
        }
    }

    /// Parses one `<pan=...>pitchExpr : |cells|` sequence-line. `pitchExpr`
    /// is read once per song-step as a `Tone`-kind expression; cells are a
    /// space for silence, `-` for a tie, or a single character naming an
    /// existing single-letter instrument.
    fn parse_seq_content_line(&mut self, line: &str, line_no: usize) -> Result<SeqLine, ScError> {
        let mut rest = line;
        let mut pan = None;

        let leading = rest.trim_start();
        if leading.starts_with('<') {
            let end = leading.find('>').ok_or_else(|| self.err(ScErrorKind::MissingMetaClose, line_no))?;
            let meta: Vec<String> = leading[1..end].split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect();
            for tag in &meta {
                if tag.to_uppercase().starts_with("PAN") {
                    if let Some(v) = tag.splitn(2, '=').nth(1) {
                        pan = self.resolve_pan_value(v);
                    }
                }
            }
            rest = &leading[end + 1..];
        }

        let bar_start = rest.find('|');
        let bar_end = rest.rfind('|');
        let (pitch_text, bar_text) = match (bar_start, bar_end) {
            (Some(s), Some(e)) if e > s => (rest[..s].trim(), &rest[s + 1..e]),
            _ => (rest.trim(), ""),
        };

        let (pitch, _) = self.parse_module_expr(pitch_text, ParseKind::Tone, line_no)?;

        let mut cells = Vec::new();
        for ch in bar_text.chars() {
            match ch {
                '|' => {}
                ' ' => cells.push(Cell::Silence),
                '-' => cells.push(Cell::Tie),
                c => {
                    let key = c.to_string();
                    let inst = self
                        .insts
                        .get(&key)
                        .ok_or_else(|| self.err(ScErrorKind::UnrecognizedInstrumentCell(c), line_no))?;
                    cells.push(Cell::Attack(inst.clone()));
                }
            }
        }

        Ok(SeqLine::new(self.ctx.clone(), pitch, cells, pan))
    }

    // ---- SNG / song lines ------------------------------------------------

    fn parse_song_line(&mut self, line: &str, line_no: usize) -> Result<(), ScError> {
        for part in split_top_level_commas(line) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (item, rest) = self.pop_seq_item(part, line_no)?;
            if !rest.trim().is_empty() {
                return Err(self.err(
                    ScErrorKind::Malformed(format!("Unexpected trailing text '{rest}' in song line.")),
                    line_no,
                ));
            }
            self.song_steps.push(item);
        }
        Ok(())
    }

    /// Resolves one `SEQN`-kind atom: a `[...]`/`{...}`/`(...)` grouping of
    /// further atoms, or a bare name looked up in `seqs` then `modules`.
    /// Unlike `Module`-kind atoms, this never sees binary operators, an
    /// invert prefix, or a `c`-rate wrapper — arithmetic over sequence-
    /// valued objects has no meaning the spec assigns, so the grammar here
    /// is deliberately narrower than the general module expression grammar.
    fn pop_seq_item(&mut self, s: &str, line_no: usize) -> Result<(SongItem, String), ScError> {
        let s = s.trim_start();
        if s.is_empty() {
            return Err(self.err(ScErrorKind::EmptyModule, line_no));
        }
        if let Some(open) = s.chars().next() {
            let (mode, close) = match open {
                '[' => (GroupMode::Pattern, ']'),
                '{' => (GroupMode::Set, '}'),
                '(' => (GroupMode::Series, ')'),
                _ => {
                    let end = s.find(|c: char| RESERVED.contains(c)).unwrap_or(s.len());
                    let name = s[..end].trim().to_string();
                    let item = self.resolve_seq_identifier(&name, line_no)?;
                    return Ok((item, s[end..].to_string()));
                }
            };
            let (inner, rest) = extract_balanced(s, open, close, line_no, &self.cur_parse_module)?;
            let mut items = Vec::new();
            for part in split_top_level_commas(&inner) {
                let part = part.trim();
                let (item, _) = self.pop_seq_item(part, line_no)?;
                items.push(item);
            }
            return Ok((SongItem::Group(SeqGroup::new(mode, items)), rest));
        }
        unreachable!("s is non-empty, checked above");
    }

    fn resolve_seq_identifier(&mut self, name: &str, line_no: usize) -> Result<SongItem, ScError> {
        if let Some(item) = self.seqs.get(name) {
            Ok(item.clone())
        } else if let Some(m) = self.modules.get(name) {
            Ok(SongItem::SeqBlock(SeqBlock::new(m.clone(), None)))
        } else {
            Err(self.err(ScErrorKind::InvalidSequence(name.to_string()), line_no))
        }
    }

    // ---- module expression grammar ---------------------------------------

    /// Parses a full `Module`-kind expression: an atom (`pop_module`)
    /// followed by zero or more `<op><meta>?<atom>` pairs, applied strictly
    /// left to right with no operator precedence (spec §6, "Expression
    /// grammar").
    fn parse_module_expr(&mut self, s: &str, kind: ParseKind, line_no: usize) -> Result<(Module, String), ScError> {
        let (mut mod_a, mut rest) = self.pop_module(s, kind, line_no)?;

        while !rest.trim().is_empty() {
            let after_ws = rest.trim_start();
            let mut chars = after_ws.chars();
            let mut op = chars.next().expect("rest.trim() checked non-empty above");
            let mut tail = chars.as_str();

            let cross = op == 'x';
            if cross {
                let mut chars2 = tail.trim_start().chars();
                op = chars2.next().ok_or_else(|| self.err(ScErrorKind::InvalidCrossOperator, line_no))?;
                tail = chars2.as_str();
            }

            let (meta, after_meta) = parse_meta_tag(tail, line_no, &self.cur_parse_module)?;
            let (mod_b, rest2) = self.pop_module(&after_meta, kind, line_no)?;
            rest = rest2;

            mod_a = self.apply_binary(op, mod_a, mod_b, &meta, line_no)?;
            if cross {
                mod_a = Module::Cross(Cross::new(mod_a).map_err(|_| self.err(ScErrorKind::InvalidCrossOperator, line_no))?);
            }
        }

        Ok((mod_a, rest))
    }

    fn apply_binary(&mut self, op: char, a: Module, mut b: Module, meta: &[String], line_no: usize) -> Result<Module, ScError> {
        let lead = |meta: &[String]| -> bool {
            match meta_value(meta, &["LEAD", "LD"]) {
                Some(v) => !v.starts_with(['B', 'b']),
                None => true,
            }
        };

        Ok(match op {
            '+' => Module::Add(Binary::new(a, b, lead(meta), BinOp::Add)),
            '-' => Module::Subtract(Binary::new(a, b, lead(meta), BinOp::Subtract)),
            '*' => Module::Multiply(Binary::new(a, b, lead(meta), BinOp::Multiply)),
            '/' => Module::Divide(Binary::new(a, b, lead(meta), BinOp::Divide)),
            'l' => Module::Level(Binary::new(a, b, lead(meta), BinOp::Level)),
            's' => Module::Speed(Speed::new(a, b, lead(meta))),
            'r' => Module::Repeat(Repeat::new(a, b)),
            'n' => Module::Length(LengthNode::new(a, b)),
            'i' => {
                let width = meta_value(meta, &["WID", "W"]).and_then(|v| v.parse::<f64>().ok()).unwrap_or(1.0);
                Module::LinInterp(LinInterp::new(a, b, width))
            }
            'v' => {
                let rate = meta_value(meta, &["R", "RATE"]).and_then(|v| v.parse::<f64>().ok()).filter(|r| *r > 0.0).unwrap_or(1.0);
                let loop_ = meta_value(meta, &["L", "LOOP"]).map(truthy).unwrap_or(false);
                let attack = meta_value(meta, &["ATK", "ATTACK"]).and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
                let default_release = b.length();
                let release = meta_value(meta, &["REL", "RELEASE"]).and_then(|v| v.parse::<f64>().ok()).unwrap_or(default_release);
                Module::Envelope(Envelope::new(a, b, rate * self.ctx.frameslice, loop_, attack, release))
            }
            _ => return Err(self.err(ScErrorKind::Malformed(format!("Unknown operator '{op}'.")), line_no)),
        })
    }

    /// Parses a single `Module`-kind atom: an optional `-` invert prefix, an
    /// optional `c`-rate wrapper (`Const`), then a number, a tone/instrument/
    /// module identifier, or a `[...]`/`{...}`/`(...)` grouping.
    fn pop_module(&mut self, s: &str, kind: ParseKind, line_no: usize) -> Result<(Module, String), ScError> {
        let mut s = s.trim_start().to_string();
        if s.is_empty() {
            return Err(self.err(ScErrorKind::EmptyModule, line_no));
        }

        let mut invert = false;
        let mut const_rate: Option<(f64, bool)> = None;

        if let Some(stripped) = s.strip_prefix('-') {
            s = stripped.to_string();
            invert = true;
        } else if s.starts_with('c') {
            s = s[1..].trim_start().to_string();
            let mut rate = 1.0;
            let mut cloop = true;
            if s.starts_with('<') {
                let (meta, rest) = parse_meta_tag(&s, line_no, &self.cur_parse_module)?;
                s = rest;
                if let Some(v) = meta_value(&meta, &["R", "RATE"]) {
                    if let Ok(r) = v.parse::<f64>() {
                        if r >= 1.0 {
                            rate = r;
                        }
                    }
                }
                if let Some(v) = meta_value(&meta, &["L", "LOOP"]) {
                    cloop = truthy(v);
                }
            }
            const_rate = Some((rate, cloop));
        }

        if s.is_empty() {
            return Err(self.err(ScErrorKind::EmptyModule, line_no));
        }

        let is_tone_kind = matches!(kind, ParseKind::Tone | ParseKind::Mdle);
        let mut mod_a = if is_tone_kind && self.tone_at(&s, 2).is_some() {
            let cents = self.tone_at(&s, 2).expect("checked Some above");
            let m = Module::Val(Val::new(cents as f64));
            s = s[2..].to_string();
            m
        } else if is_tone_kind && self.tone_at(&s, 3).is_some() {
            let cents = self.tone_at(&s, 3).expect("checked Some above");
            let m = Module::Val(Val::new(cents as f64));
            s = s[3..].to_string();
            m
        } else if s.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
            let end = s.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(s.len());
            let num: f64 = s[..end]
                .parse()
                .map_err(|_| self.err(ScErrorKind::Malformed(format!("Invalid number '{}'.", &s[..end])), line_no))?;
            let m = Module::Val(Val::new(num));
            s = s[end..].to_string();
            m
        } else if s.starts_with('[') {
            let (inner, rest) = extract_balanced(&s, '[', ']', line_no, &self.cur_parse_module)?;
            let children = self.parse_group_children(&inner, kind, line_no)?;
            s = rest;
            Module::Pattern(Pattern::new(children))
        } else if s.starts_with('{') {
            let (inner, rest) = extract_balanced(&s, '{', '}', line_no, &self.cur_parse_module)?;
            let children = self.parse_group_children(&inner, kind, line_no)?;
            s = rest;
            Module::Set(Set::new(children))
        } else if s.starts_with('(') {
            let (inner, rest) = extract_balanced(&s, '(', ')', line_no, &self.cur_parse_module)?;
            let children = self.parse_group_children(&inner, kind, line_no)?;
            s = rest;
            Module::Series(Series::new(children))
        } else {
            let end = s.find(|c: char| RESERVED.contains(c)).unwrap_or(s.len());
            let name = s[..end].to_string();
            s = s[end..].to_string();
            let (_meta, rest) = parse_meta_tag(&s, line_no, &self.cur_parse_module)?;
            s = rest;
            self.resolve_module_identifier(&name, kind, line_no)?
        };

        if invert {
            mod_a = Module::Invert(Box::new(mod_a));
        }
        if let Some((rate, cloop)) = const_rate {
            let node_rate = rate * self.ctx.frameslice;
            mod_a = Module::Const(ConstNode::new(mod_a, node_rate).with_loop(cloop));
        }

        Ok((mod_a, s))
    }

    fn parse_group_children(&mut self, s: &str, kind: ParseKind, line_no: usize) -> Result<Vec<Module>, ScError> {
        let mut out = Vec::new();
        for part in split_top_level_commas(s) {
            let (m, _) = self.parse_module_expr(part.trim(), kind, line_no)?;
            out.push(m);
        }
        Ok(out)
    }

    /// Resolves a bare identifier for `Inst`/`Mdle`/`Tone`-kind parsing.
    /// An instrument referenced inside a module expression always resolves
    /// to its own waveform model (as if `<module=T>` were implicitly
    /// applied) rather than a nested `Inst` — see DESIGN.md.
    fn resolve_module_identifier(&mut self, name: &str, kind: ParseKind, line_no: usize) -> Result<Module, ScError> {
        match kind {
            ParseKind::Inst | ParseKind::Mdle => {
                if let Some(inst) = self.insts.get(name) {
                    Ok(inst.model_clone())
                } else if let Some(m) = self.modules.get(name) {
                    Ok(m.clone())
                } else {
                    Err(self.err(ScErrorKind::InvalidInstrument(name.to_string()), line_no))
                }
            }
            ParseKind::Tone => {
                if let Some(cents) = self.ctx.tones.get(name) {
                    Ok(Module::Val(Val::new(cents as f64)))
                } else if let Some(m) = self.modules.get(name) {
                    Ok(m.clone())
                } else {
                    Err(self.err(ScErrorKind::InvalidPitch(name.to_string()), line_no))
                }
            }
        }
    }

    fn resolve_pan_value(&self, v: &str) -> Option<Module> {
        let v = v.trim();
        if v.is_empty() {
            return None;
        }
        if let Some(m) = self.modules.get(v) {
            return Some(m.clone());
        }
        let first = v.chars().next()?;
        if !(first.is_ascii_digit() || first == '.' || first == '-') {
            return None;
        }
        let (invert, digits) = match v.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, v),
        };
        let end = digits.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(digits.len());
        let num: f64 = digits[..end].parse().ok()?;
        let val = Module::Val(Val::new(num));
        Some(if invert { Module::Invert(Box::new(val)) } else { val })
    }
}

// ---- free helper functions -----------------------------------------------

fn starts_with_ci(line: &str, variants: &[&str]) -> bool {
    let upper = line.to_uppercase();
    variants.iter().any(|v| upper.starts_with(v))
}

/// Drops the first `prefix_len` characters (the header keyword), then an
/// optional `:` separator, returning whatever text remains.
fn strip_header(line: &str, prefix_len: usize) -> String {
    let rest = &line[prefix_len.min(line.len())..];
    let rest = rest.trim_start();
    rest.strip_prefix(':').unwrap_or(rest).trim_start().to_string()
}

fn truthy(v: &str) -> bool {
    v.starts_with(['T', 't', '1'])
}

fn cfg_value(line: &str, line_no: usize, ctx_label: &str) -> Result<String, ScError> {
    line.splitn(2, ':')
        .nth(1)
        .map(|s| s.to_string())
        .ok_or_else(|| ScError::new(ScErrorKind::Malformed("Expected ':' in CFG line.".to_string()), line_no, ctx_label))
}

fn parse_cfg_num<T: std::str::FromStr>(v: &str, line_no: usize, ctx_label: &str) -> Result<T, ScError> {
    v.trim()
        .parse::<T>()
        .map_err(|_| ScError::new(ScErrorKind::Malformed(format!("Invalid CFG value '{}'.", v.trim())), line_no, ctx_label))
}

/// Splits `name: desc` on the first `:` only, so a description containing
/// further colons (e.g. a nested meta tag) isn't truncated.
fn split_name_desc(line: &str, line_no: usize, ctx_label: &str) -> Result<(String, String), ScError> {
    let mut parts = line.splitn(2, ':');
    let name = parts.next().unwrap_or("").trim().to_string();
    let desc = parts
        .next()
        .ok_or_else(|| ScError::new(ScErrorKind::Malformed("Expected ':' separating name and description.".to_string()), line_no, ctx_label))?
        .trim()
        .to_string();
    Ok((name, desc))
}

/// Splits a header name token's embedded `<...>` meta from its bare name,
/// e.g. `"bass<period=4>"` -> `("bass", ["period=4"])`.
fn split_name_meta(name: &str, line_no: usize, ctx_label: &str) -> Result<(String, Vec<String>), ScError> {
    match name.find('<') {
        None => Ok((name.trim().to_string(), Vec::new())),
        Some(idx) => {
            let before = name[..idx].trim().to_string();
            let after = &name[idx + 1..];
            let end = after.find('>').ok_or_else(|| ScError::new(ScErrorKind::MissingMetaClose, line_no, ctx_label))?;
            let meta = after[..end].split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect();
            Ok((before, meta))
        }
    }
}

/// If `s` starts with `<`, extracts the comma-separated tags up to the
/// first (non-nested) `>` and returns `(tags, remainder)`; otherwise
/// returns an empty tag list and `s` unchanged.
fn parse_meta_tag(s: &str, line_no: usize, ctx_label: &str) -> Result<(Vec<String>, String), ScError> {
    let trimmed = s.trim_start();
    if !trimmed.starts_with('<') {
        return Ok((Vec::new(), trimmed.to_string()));
    }
    match trimmed.find('>') {
        Some(end) => {
            let meta = trimmed[1..end].split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect();
            Ok((meta, trimmed[end + 1..].to_string()))
        }
        None => Err(ScError::new(ScErrorKind::MissingMetaClose, line_no, ctx_label)),
    }
}

/// Looks up the value of the first meta tag whose (case-insensitive) text
/// starts with one of `keys`, e.g. `meta_value(&tags, &["RATE", "R"])`.
fn meta_value<'a>(meta: &'a [String], keys: &[&str]) -> Option<&'a str> {
    for tag in meta {
        let upper = tag.to_uppercase();
        if keys.iter().any(|k| upper.starts_with(k)) {
            return tag.splitn(2, '=').nth(1).map(|v| v.trim());
        }
    }
    None
}

/// Extracts the text between a balanced `open`/`close` pair starting at
/// `s`'s first character (which must be `open`), returning `(inner,
/// remainder-after-close)`.
fn extract_balanced(s: &str, open: char, close: char, line_no: usize, ctx_label: &str) -> Result<(String, String), ScError> {
    let mut depth = 0i32;
    let mut end = None;
    for (idx, ch) in s.char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
        }
        if depth == 0 {
            end = Some(idx + ch.len_utf8());
            break;
        }
    }
    match end {
        Some(end) => Ok((s[1..end - 1].to_string(), s[end..].to_string())),
        None => Err(ScError::new(ScErrorKind::ExpectedClose(close), line_no, ctx_label)),
    }
}

/// Splits on top-level commas only, tracking combined bracket/brace/paren
/// depth so a comma nested inside a grouping doesn't split it apart.
fn split_top_level_commas(s: &str) -> Vec<String> {
    let mut bits = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (idx, ch) in s.char_indices() {
        match ch {
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => depth -= 1,
            ',' if depth == 0 => {
                bits.push(s[start..idx].to_string());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if start < s.len() {
        bits.push(s[start..].to_string());
    }
    bits
}

fn is_seq_block_ending(lines: &[&str], i: usize) -> bool {
    match lines.get(i + 1) {
        None => true,
        Some(next) => {
            let prefix: String = next.chars().take(3).collect::<String>().to_uppercase();
            HEADERS.contains(&prefix.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> SynthCorona {
        let mut parser = Parser::new(PathBuf::new());
        parser.parse_text(text).expect("test source should parse");
        parser.finish()
    }

    #[test]
    fn cfg_block_updates_context_and_recomputes() {
        let sc = parse("CFG\nTEMPO: 140\nBEAT: 4\nMONO\n");
        assert_eq!(sc.ctx.tempo, 140.0);
        assert!(!sc.ctx.stereo);
        assert!((sc.ctx.frames_per_step - (60.0 * 44100.0) / (140.0 * 4.0)).abs() < 1e-9);
    }

    #[test]
    fn ins_block_defines_a_playable_instrument() {
        let sc = parse("INS\nbass: 5\n");
        assert!(sc.insts.contains_key("bass"));
    }

    #[test]
    fn mdl_block_can_reference_another_module() {
        let sc = parse("MDL\nbase: 3\ndouble: base+base\n");
        assert!(sc.modules.contains_key("double"));
    }

    #[test]
    fn seq_block_parses_pitch_and_cells() {
        let text = "INS\na: 5\nSEQ mySeq\nC4 : |a - |\n";
        let sc = parse(text);
        assert!(sc.seqs.contains_key("mySeq"));
    }

    #[test]
    fn blk_block_wraps_an_arbitrary_module_expression() {
        let sc = parse("BLK\ndrone: 5+3\n");
        assert!(sc.seqs.contains_key("drone"));
    }

    #[test]
    fn song_line_references_a_named_block() {
        let text = "BLK\ndrone: 5\nSNG: drone\n";
        let sc = parse(text);
        assert_eq!(sc.song.length(), 1.0);
    }

    #[test]
    fn song_line_groups_sequence_atoms_into_a_pattern() {
        let text = "BLK\na: 1\nb: 2\nSNG: [a, b]\n";
        let sc = parse(text);
        assert_eq!(sc.song.length(), 2.0);
    }

    #[test]
    fn tone_atom_resolves_two_and_three_character_names() {
        let sc = parse("MDL\npitch: C4\nsharp: C#4\n");
        assert!(sc.modules.contains_key("pitch"));
        assert!(sc.modules.contains_key("sharp"));
    }

    #[test]
    fn unknown_instrument_reference_is_a_parse_error() {
        let mut parser = Parser::new(PathBuf::new());
        let err = parser.parse_text("MDL\nbad: nosuch\n").unwrap_err();
        assert!(matches!(err.kind, ScErrorKind::InvalidInstrument(_)));
    }
}
