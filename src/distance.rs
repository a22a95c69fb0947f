//! Bounded Levenshtein distance over Unicode code points.
//!
//! Used by the fuzzy lookup path. The calculator owns its DP rows so that
//! scanning every headword of every dictionary does not reallocate per word.

/// Levenshtein distance calculator with a reusable row buffer and an
/// early-exit ceiling.
#[derive(Debug, Default)]
pub struct EditDistance {
    prev: Vec<usize>,
    cur: Vec<usize>,
}

impl EditDistance {
    pub fn new() -> Self {
        EditDistance::default()
    }

    /// Distance between `s` and `t`, capped at `limit`.
    ///
    /// Returns `limit` as soon as the minimum of a DP row reaches it, so
    /// `limit` doubles as the "too far" sentinel.
    pub fn distance(&mut self, s: &[char], t: &[char], limit: usize) -> usize {
        if s.is_empty() {
            return t.len().min(limit);
        }
        if t.is_empty() {
            return s.len().min(limit);
        }

        let m = t.len();
        self.prev.clear();
        self.prev.extend(0..=m);

        for (i, &sc) in s.iter().enumerate() {
            self.cur.clear();
            self.cur.push(i + 1);
            let mut row_min = i + 1;
            for (j, &tc) in t.iter().enumerate() {
                let cost = usize::from(sc != tc);
                let val = (self.prev[j] + cost)
                    .min(self.prev[j + 1] + 1)
                    .min(self.cur[j] + 1);
                self.cur.push(val);
                row_min = row_min.min(val);
            }
            if row_min >= limit {
                return limit;
            }
            std::mem::swap(&mut self.prev, &mut self.cur);
        }

        self.prev[m].min(limit)
    }
}
