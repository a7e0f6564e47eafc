/*
    flux2imd
    Copyright 2026 The flux2imd Contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.
    --------------------------------------------------------------------------

    src/flux/histogram.rs

    Cell-width estimation by bucketed histogram of consecutive flux deltas,
    per spec.md SS4.1. Buckets are 500ns wide; the estimated cell width is
    the bucket `i` that maximises `H[i] + H[2i]` (a 2-cell-wide short
    transition reinforces the histogram peak of the cell that is half its
    width), scaled by 500ns.

    Backed by the `histogram` crate rather than a hand-rolled bucket array.
*/
use histogram::Histogram;

const BUCKET_NS: i64 = 500;

/// Accumulates flux deltas (in ns) into 500ns buckets and estimates the
/// dominant cell width.
pub struct CellWidthHistogram {
    hist: Histogram,
    counts: Vec<u64>,
}

impl CellWidthHistogram {
    /// `max_buckets` bounds the longest delta we'll bucket (buckets beyond
    /// this are folded into the last bucket), guarding against a single
    /// wild outlier blowing up memory.
    pub fn new(max_buckets: usize) -> Self {
        CellWidthHistogram {
            // grouping_power/max_value_power sized generously; we only use
            // this for relative bucket counts, not precise quantiles.
            hist: Histogram::new(4, 32).expect("valid histogram params"),
            counts: vec![0u64; max_buckets],
        }
    }

    pub fn record(&mut self, delta_ns: i64) {
        if delta_ns <= 0 {
            return;
        }
        let _ = self.hist.increment(delta_ns as u64);
        let bucket = (delta_ns / BUCKET_NS) as usize;
        let idx = bucket.min(self.counts.len() - 1);
        self.counts[idx] += 1;
    }

    /// Returns the estimated cell width in nanoseconds: `argmax_i (H[i] +
    /// H[2i]) * 500ns`, per spec.md SS4.1.
    pub fn estimate_cell_width_ns(&self) -> i64 {
        let mut best_i = 0usize;
        let mut best_score = 0u64;
        for i in 1..self.counts.len() {
            let h_i = self.counts[i];
            let h_2i = self.counts.get(2 * i).copied().unwrap_or(0);
            let score = h_i + h_2i;
            if score > best_score {
                best_score = score;
                best_i = i;
            }
        }
        best_i as i64 * BUCKET_NS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peaks_at_dominant_short_cell() {
        let mut h = CellWidthHistogram::new(64);
        // Dominant short cell around 2000ns (bucket 4), reinforced by its
        // double at 4000ns (bucket 8).
        for _ in 0..100 {
            h.record(2000);
        }
        for _ in 0..20 {
            h.record(4000);
        }
        for _ in 0..5 {
            h.record(6000);
        }
        assert_eq!(h.estimate_cell_width_ns(), 2000);
    }

    #[test]
    fn ignores_non_positive_deltas() {
        let mut h = CellWidthHistogram::new(16);
        h.record(0);
        h.record(-5);
        assert_eq!(h.estimate_cell_width_ns(), 0);
    }
}
