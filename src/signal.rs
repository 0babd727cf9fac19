//! Signal value primitives: the `[-9, +9]` DSL domain, unit-gain conversion,
//! stereo panning, and pitch-to-frequency mapping.

/// Nominal maximum magnitude of a value as written in SC source.
pub const MAX_VAL: f64 = 9.0;

/// A stereo sample pair, left and right.
pub type Stereo = [f64; 2];

/// Convert a signal-domain value (`[-9, 9]`) to a unit gain (`[-1, 1]`).
pub fn as_decimal(val: f64) -> f64 {
    val / MAX_VAL
}

/// Clamp `val` to just inside `±MAX_VAL`, matching the source's
/// `limit()` — used to keep the final integer WAV conversion from
/// overflowing at exactly the boundary.
pub fn limit(val: f64) -> f64 {
    if val >= MAX_VAL {
        MAX_VAL * 0.9999
    } else if val <= -MAX_VAL {
        -MAX_VAL * 0.9999
    } else {
        val
    }
}

/// `440 * 2^(cents/1200)`.
pub fn calc_freq(cents_from_a4: f64) -> f64 {
    440.0 * 2f64.powf(cents_from_a4 / 1200.0)
}

/// Linear cross-bleed stereo pan. `p` is clipped to `[-9, 9]` and divided by
/// 9 to get `q in [-1, 1]`. Negative `q` bleeds right into left; positive
/// bleeds left into right. This is energy-preserving (L+R unchanged) but not
/// a true equal-power pan.
pub fn pan(vals: Stereo, p: f64) -> Stereo {
    let mut q = p / MAX_VAL;
    if q.abs() > 1.0 {
        q = q / q.abs();
    }
    if q == 0.0 {
        vals
    } else if q < 0.0 {
        let lpan = q.abs();
        let bleed = vals[1] * lpan;
        [vals[0] + bleed, vals[1] - bleed]
    } else {
        let bleed = vals[0] * q;
        [vals[0] - bleed, vals[1] + bleed]
    }
}

/// Static mapping from note-name strings to integer pitch-in-cents relative
/// to C0. Ten octaves (0-9), both sharp/flat spellings, both letter cases.
/// `C0 = 0`; `A4 = 5700`.
#[derive(Debug, Clone)]
pub struct ToneTable {
    // Sorted by descending key length so 2-char names aren't shadowed by
    // an unrelated 3-char prefix; in practice keys are exactly 2 or 3 chars.
    entries: std::collections::HashMap<String, i32>,
}

impl ToneTable {
    pub fn build() -> Self {
        // Natural-note letters, in semitone order starting at C; lowercase
        // entries are the flat of the following sharp-pitch letter (e.g.
        // "d" is D-flat, i.e. C#) matching the source's single-letter
        // shorthand for black keys.
        let slts = ["C", "d", "D", "e", "E", "F", "g", "G", "a", "A", "b", "B"];
        // Two-character sharp/flat spellings, 17 per octave (includes the
        // "natural, explicitly spaced" forms like "C ").
        let dlts = [
            "C ", "C#", "Db", "D ", "D#", "Eb", "E ", "F ", "F#", "Gb", "G ", "G#", "Ab", "A ",
            "A#", "Bb", "B ",
        ];
        let dvals = [0, 1, 1, 2, 3, 4, 4, 5, 6, 6, 7, 8, 9, 9, 10, 11, 11];

        let mut entries = std::collections::HashMap::new();
        for oct in 0..10i32 {
            for (step, name) in slts.iter().enumerate() {
                let key = format!("{name}{oct}");
                entries.insert(key, 12 * oct + step as i32);
            }
            for (inx, name) in dlts.iter().enumerate() {
                let key = format!("{}{oct}", name.trim_end());
                // preserve source behavior for the space-padded natural
                // spellings too (e.g. "C 4" would collide with "C4" when
                // trimmed; the un-trimmed key is also inserted below).
                entries.insert(format!("{name}{oct}"), 12 * oct + dvals[inx]);
                entries.entry(key).or_insert(12 * oct + dvals[inx]);
            }
        }
        // cents, not semitones
        let entries = entries.into_iter().map(|(k, v)| (k, v * 100)).collect();
        ToneTable { entries }
    }

    pub fn get(&self, name: &str) -> Option<i32> {
        self.entries.get(name).copied()
    }

    pub fn a4_cents(&self) -> i32 {
        self.entries.get("A4").copied().unwrap_or(5700)
    }
}

/// Pre-baked frequency table: `freqs[i]` is the Hz of cent offset
/// `i - a4_cents` from C0, covering `0..12000` cents.
#[derive(Debug, Clone)]
pub struct FreqTable {
    freqs: Vec<f64>,
    a4_cents: i32,
}

impl FreqTable {
    pub fn build(a4_cents: i32) -> Self {
        let freqs = (0..12000).map(|i| calc_freq((i - a4_cents) as f64)).collect();
        FreqTable { freqs, a4_cents }
    }

    /// Look up by integer cents from C0, truncating non-integer pitch
    /// readings as the source does when indexing this table.
    pub fn lookup(&self, cents_from_c0: f64) -> f64 {
        let idx = cents_from_c0 as i64;
        if idx < 0 {
            calc_freq((idx - self.a4_cents as i64) as f64)
        } else if (idx as usize) < self.freqs.len() {
            self.freqs[idx as usize]
        } else {
            calc_freq((idx - self.a4_cents as i64) as f64)
        }
    }
}

pub fn gcd(a: f64, b: f64) -> f64 {
    let (mut a, mut b) = (a, b);
    while b > 0.0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

pub fn lcm(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        0.0
    } else {
        a * b / gcd(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_decimal_bounds() {
        assert_eq!(as_decimal(9.0), 1.0);
        assert_eq!(as_decimal(-9.0), -1.0);
    }

    #[test]
    fn limit_clamps() {
        assert_eq!(limit(9.0), 9.0 * 0.9999);
        assert_eq!(limit(-9.0), -9.0 * 0.9999);
        assert_eq!(limit(3.0), 3.0);
    }

    #[test]
    fn freq_round_trip() {
        assert_eq!(calc_freq(0.0), 440.0);
        assert_eq!(calc_freq(1200.0), 880.0);
        assert!((calc_freq(-1200.0) - 220.0).abs() < 1e-9);
    }

    #[test]
    fn pan_symmetry() {
        let v = [1.0, 1.0];
        assert_eq!(pan(v, 0.0), v);
        let left = pan(v, -9.0);
        let right = pan(v, 9.0);
        assert_eq!(left, [right[1], right[0]]);
        // energy neutral
        assert!((left[0] + left[1] - (v[0] + v[1])).abs() < 1e-9);
    }

    #[test]
    fn tone_table_a4() {
        let tones = ToneTable::build();
        assert_eq!(tones.a4_cents(), 5700);
        assert_eq!(tones.get("C0"), Some(0));
        assert_eq!(tones.get("a0"), Some(100));
        assert_eq!(tones.get("C#4"), Some(4900));
        assert_eq!(tones.get("Db4"), Some(4900));
    }

    #[test]
    fn freq_table_matches_calc_freq() {
        let tones = ToneTable::build();
        let table = FreqTable::build(tones.a4_cents());
        let a4 = tones.a4_cents() as f64;
        assert!((table.lookup(a4) - 440.0).abs() < 1e-6);
    }
}
