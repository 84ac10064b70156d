//! Mergeable streaming quantile sketch (t-digest family).
//!
//! Samples are clustered into centroids whose size limit shrinks toward both
//! tails, so p99/p100 stay sharp while the median is summarized coarsely.
//! New samples are buffered and folded in with one sorted sweep, so insertion
//! is amortized O(log compression). The arcsine scale function caps a
//! compressed digest at `compression + 1` centroids however many samples arrive.

use latreport_common::{ConfigError, DigestError, DEFAULT_COMPRESSION, MIN_COMPRESSION};

/// Weighted mean of a cluster of nearby samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    pub mean: f64,
    pub weight: f64,
}

/// Approximate quantile sketch over one test run's latencies.
///
/// Invariants: `centroids` is sorted by ascending mean and the weights of
/// `centroids` plus the buffered samples sum to `count`. `min`/`max` are the
/// exact extremes observed.
#[derive(Debug, Clone)]
pub struct QuantileDigest {
    compression: f64,
    centroids: Vec<Centroid>,
    pending: Vec<f64>,
    count: u64,
    min: f64,
    max: f64,
}

impl Default for QuantileDigest {
    fn default() -> Self {
        Self::with_valid_compression(DEFAULT_COMPRESSION)
    }
}

impl QuantileDigest {
    /// Create an empty digest.
    ///
    /// # Errors
    /// [`ConfigError::InvalidCompression`] when `compression` is not finite or below
    /// [`MIN_COMPRESSION`].
    pub fn new(compression: f64) -> Result<Self, ConfigError> {
        if !compression.is_finite() || compression < MIN_COMPRESSION {
            return Err(ConfigError::InvalidCompression(compression));
        }
        Ok(Self::with_valid_compression(compression))
    }

    fn with_valid_compression(compression: f64) -> Self {
        Self {
            compression,
            centroids: Vec::new(),
            pending: Vec::new(),
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn compression(&self) -> f64 {
        self.compression
    }

    /// Exact number of samples ingested.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of centroids folded in so far. Buffered samples are not included until [`flush`](Self::flush).
    pub fn centroid_count(&self) -> usize {
        self.centroids.len()
    }

    pub fn centroids(&self) -> &[Centroid] {
        &self.centroids
    }

    /// Smallest sample seen, `None` when empty.
    pub fn min(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.min)
    }

    /// Largest sample seen, `None` when empty.
    pub fn max(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.max)
    }

    /// Add one sample. Non-finite values are ignored and not counted.
    pub fn insert(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }

        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        self.pending.push(value);
        if self.pending.len() >= self.pending_limit() {
            self.flush();
        }
    }

    /// Fold buffered samples into the centroid list.
    ///
    /// Each sample joins the nearer of its two neighbouring centroids when that
    /// centroid can take one more sample under the scale bound, and otherwise
    /// becomes a singleton at its sorted position. Ranks are accumulated during
    /// one ascending sweep over the centroids and the sorted buffer.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let mut incoming = std::mem::take(&mut self.pending);
        incoming.sort_unstable_by(f64::total_cmp);

        let total = self.count as f64;
        let mut ahead = std::mem::take(&mut self.centroids).into_iter().peekable();
        let mut swept: Vec<Centroid> = Vec::with_capacity(ahead.len() + incoming.len());
        // Weight of `swept` excluding its last centroid.
        let mut before_last = 0.0;

        for value in incoming {
            while let Some(centroid) = ahead.next_if(|c| c.mean < value) {
                push_centroid(&mut swept, &mut before_last, centroid);
            }

            let above_start = before_last + swept.last().map_or(0.0, |c| c.weight);
            let below = swept
                .last()
                .filter(|c| self.fits(before_last, c.weight + 1.0, total))
                .map(|c| value - c.mean);
            let above = ahead
                .peek()
                .filter(|c| self.fits(above_start, c.weight + 1.0, total))
                .map(|c| c.mean - value);

            match (below, above) {
                (Some(b), Some(a)) if a < b => absorb(ahead.peek_mut(), value),
                (Some(_), _) => absorb(swept.last_mut(), value),
                (None, Some(_)) => absorb(ahead.peek_mut(), value),
                (None, None) => push_centroid(&mut swept, &mut before_last, Centroid { mean: value, weight: 1.0 }),
            }
        }
        swept.extend(ahead);

        self.centroids = swept;
        if self.centroids.len() > self.compress_threshold() {
            self.compress();
        }
    }

    /// Fold `other` into this digest, keeping this digest's compression.
    pub fn merge(&mut self, other: &QuantileDigest) {
        if other.is_empty() {
            return;
        }
        self.flush();

        let ours = std::mem::take(&mut self.centroids);
        let mut merged = Vec::with_capacity(ours.len() + other.centroids.len());
        let (mut i, mut j) = (0, 0);
        while i < ours.len() && j < other.centroids.len() {
            if ours[i].mean <= other.centroids[j].mean {
                merged.push(ours[i]);
                i += 1;
            } else {
                merged.push(other.centroids[j]);
                j += 1;
            }
        }
        merged.extend_from_slice(&ours[i..]);
        merged.extend_from_slice(&other.centroids[j..]);

        self.centroids = merged;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.pending.extend_from_slice(&other.pending);
        self.flush();
        self.compress();
    }

    /// Estimate the value at quantile `q`.
    ///
    /// `q = 0` and `q = 1` return the exact minimum and maximum.
    ///
    /// # Errors
    /// [`DigestError::Empty`] when no sample was inserted, and
    /// [`DigestError::InvalidQuantile`] when `q` is NaN or outside `[0, 1]`.
    pub fn quantile(&self, q: f64) -> Result<f64, DigestError> {
        if !(0.0..=1.0).contains(&q) {
            return Err(DigestError::InvalidQuantile(q));
        }
        if self.is_empty() {
            return Err(DigestError::Empty);
        }
        if q == 0.0 {
            return Ok(self.min);
        }
        if q == 1.0 {
            return Ok(self.max);
        }
        if !self.pending.is_empty() {
            let mut flushed = self.clone();
            flushed.flush();
            return flushed.quantile(q);
        }

        let total = self.count as f64;
        let target = q * total;
        let first = self.centroids[0];
        let last = self.centroids[self.centroids.len() - 1];

        // Below the first centre or above the last one, the exact extremes anchor the line.
        let estimate = if target < first.weight / 2.0 {
            lerp(self.min, first.mean, target / (first.weight / 2.0))
        } else if target > total - last.weight / 2.0 {
            let left = total - last.weight / 2.0;
            lerp(last.mean, self.max, (target - left) / (last.weight / 2.0))
        } else {
            self.interpolate_between_centres(target)
        };

        Ok(estimate.clamp(self.min, self.max))
    }

    fn interpolate_between_centres(&self, target: f64) -> f64 {
        let mut cumulative = 0.0;
        for pair in self.centroids.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            let left_centre = cumulative + left.weight / 2.0;
            let right_centre = cumulative + left.weight + right.weight / 2.0;
            if target <= right_centre {
                let t = (target - left_centre) / (right_centre - left_centre);
                return lerp(left.mean, right.mean, t);
            }
            cumulative += left.weight;
        }
        self.centroids[self.centroids.len() - 1].mean
    }

    /// Arcsine scale: maps quantile `q` onto `[-compression/4, compression/4]`.
    fn scale(&self, q: f64) -> f64 {
        self.compression / (2.0 * std::f64::consts::PI) * (2.0 * q.clamp(0.0, 1.0) - 1.0).asin()
    }

    /// Whether a centroid of `weight` starting at cumulative weight `start` spans at most one scale unit.
    fn fits(&self, start: f64, weight: f64, total: f64) -> bool {
        self.scale((start + weight) / total) - self.scale(start / total) <= 1.0
    }

    fn pending_limit(&self) -> usize {
        self.compression.ceil() as usize
    }

    fn compress_threshold(&self) -> usize {
        (self.compression * 2.0).ceil() as usize
    }

    /// Greedily merge adjacent centroids that fit together under the scale bound.
    fn compress(&mut self) {
        if self.centroids.len() <= 1 {
            return;
        }

        let total = self.count as f64;
        let old = std::mem::take(&mut self.centroids);
        let mut merged: Vec<Centroid> = Vec::with_capacity(old.len());
        let mut before_last = 0.0;

        for centroid in old {
            if let Some(last) = merged.last_mut() {
                let combined = last.weight + centroid.weight;
                if self.fits(before_last, combined, total) {
                    last.mean += (centroid.mean - last.mean) * (centroid.weight / combined);
                    last.weight = combined;
                    continue;
                }
                before_last += last.weight;
            }
            merged.push(centroid);
        }

        self.centroids = merged;
    }
}

fn push_centroid(swept: &mut Vec<Centroid>, before_last: &mut f64, centroid: Centroid) {
    if let Some(last) = swept.last() {
        *before_last += last.weight;
    }
    swept.push(centroid);
}

fn absorb(centroid: Option<&mut Centroid>, value: f64) {
    if let Some(centroid) = centroid {
        centroid.weight += 1.0;
        centroid.mean += (value - centroid.mean) / centroid.weight;
    }
}

fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t.clamp(0.0, 1.0)
}
