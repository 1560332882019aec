//! Per-key moving statistic with transient-outlier inpainting.
use std::collections::{HashMap, VecDeque};

use tracing::error;

use crate::error::StageError;
use crate::stage::{Filter, TripleIter};
use crate::triple::Triple;

/// The statistic a [`MovingStat`] tracks, holding enough state to support
/// incremental insert/remove as the window slides.
pub trait Statistic: Send {
    /// Rebuilds internal state from the full set of current window values.
    fn initialize(&mut self, values: &[f64]);
    /// Current value of the statistic, or `None` if uninitialized/empty.
    fn value(&self) -> Option<f64>;
    /// Inserts one value with no corresponding removal.
    fn insert(&mut self, new: f64);
    /// Removes one occurrence of `old` with no corresponding insertion.
    fn remove(&mut self, old: f64);
    /// Removes one occurrence of `old` (if any) and inserts `new`. The
    /// default composes [`Statistic::remove`] and [`Statistic::insert`];
    /// quantile-like statistics override this with the fused sorted-sequence
    /// fused update a quantile statistic overrides with.
    fn insert_remove(&mut self, new: f64, old: Option<f64>) {
        if let Some(old) = old {
            self.remove(old);
        }
        self.insert(new);
    }
}

/// Arithmetic mean, tracked as a running sum and count.
#[derive(Default)]
pub struct Mean {
    sum: f64,
    count: usize,
}

impl Statistic for Mean {
    fn initialize(&mut self, values: &[f64]) {
        self.sum = values.iter().sum();
        self.count = values.len();
    }

    fn value(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }

    fn insert(&mut self, new: f64) {
        self.sum += new;
        self.count += 1;
    }

    fn remove(&mut self, old: f64) {
        self.sum -= old;
        self.count = self.count.saturating_sub(1);
    }
}

/// Nearest-rank quantile over a maintained sorted sequence, with a fused
/// "remove one, insert one" update that shifts only the span between the two
/// positions rather than doing a plain remove-then-insert.
pub struct Quantile {
    k: u64,
    q: u64,
    sorted: Vec<f64>,
}

impl Quantile {
    pub fn new(k: u64, q: u64) -> Self {
        Self {
            k,
            q,
            sorted: Vec::new(),
        }
    }

    fn rank_index(&self) -> usize {
        if self.k == 0 || self.sorted.is_empty() {
            return 0;
        }
        let n = self.sorted.len() as u64;
        let rank = n.saturating_mul(self.k).div_ceil(self.q.max(1));
        rank.saturating_sub(1).min(n.saturating_sub(1)) as usize
    }

    fn insert_sorted(&mut self, v: f64) {
        let pos = self
            .sorted
            .partition_point(|x| *x < v);
        self.sorted.insert(pos, v);
    }

    fn remove_sorted(&mut self, v: f64) {
        if let Some(pos) = self.sorted.iter().position(|x| *x == v) {
            self.sorted.remove(pos);
        }
    }
}

impl Statistic for Quantile {
    fn initialize(&mut self, values: &[f64]) {
        self.sorted = values.to_vec();
        self.sorted
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    }

    fn value(&self) -> Option<f64> {
        self.sorted.get(self.rank_index()).copied()
    }

    fn insert(&mut self, new: f64) {
        self.insert_sorted(new);
    }

    fn remove(&mut self, old: f64) {
        self.remove_sorted(old);
    }

    fn insert_remove(&mut self, new: f64, old: Option<f64>) {
        // Fused update: find both positions and shift the shorter run
        // between them by one slot, rather than a plain remove-then-insert
        // (which shifts everything past the removed index twice).
        let Some(old) = old else {
            self.insert_sorted(new);
            return;
        };
        let Some(old_pos) = self.sorted.iter().position(|x| *x == old) else {
            self.insert_sorted(new);
            return;
        };
        let new_pos = self
            .sorted
            .partition_point(|x| *x < new);
        if new_pos == old_pos || new_pos == old_pos + 1 {
            if let Some(slot) = self.sorted.get_mut(old_pos) {
                *slot = new;
            }
            return;
        }
        if new_pos > old_pos {
            for i in old_pos..new_pos.saturating_sub(1) {
                let next = self.sorted.get(i + 1).copied();
                if let (Some(next), Some(slot)) = (next, self.sorted.get_mut(i)) {
                    *slot = next;
                }
            }
            if let Some(slot) = self.sorted.get_mut(new_pos.saturating_sub(1)) {
                *slot = new;
            }
        } else {
            for i in (new_pos + 1..=old_pos).rev() {
                let prev = self.sorted.get(i - 1).copied();
                if let (Some(prev), Some(slot)) = (prev, self.sorted.get_mut(i)) {
                    *slot = prev;
                }
            }
            if let Some(slot) = self.sorted.get_mut(new_pos) {
                *slot = new;
            }
        }
    }
}

/// Parsed `type: [name, ...params]` configuration.
pub fn statistic_from_spec(name: &str, params: &[f64]) -> Result<Box<dyn Statistic>, String> {
    match name {
        "mean" => Ok(Box::new(Mean::default())),
        "min" => Ok(Box::new(Quantile::new(0, 1))),
        "max" => Ok(Box::new(Quantile::new(1, 1))),
        "median" => Ok(Box::new(Quantile::new(1, 2))),
        "quantile" => {
            let &[k, q] = params else {
                return Err("quantile requires [k, q] parameters".to_string());
            };
            Ok(Box::new(Quantile::new(k as u64, q as u64)))
        }
        other => Err(format!("unknown statistic type '{other}'")),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Inpainting {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub maxduration: i64,
}

pub struct MovingStatConfig {
    pub history: i64,
    pub warmup: i64,
    pub inpainting: Option<Inpainting>,
}

struct KeyState {
    q: VecDeque<(f64, i64)>,
    stat: Option<Box<dyn Statistic>>,
    raw_q: Vec<(f64, i64)>,
    inpaint_start: Option<i64>,
}

impl KeyState {
    fn new() -> Self {
        Self {
            q: VecDeque::new(),
            stat: None,
            raw_q: Vec::new(),
            inpaint_start: None,
        }
    }
}

pub struct MovingStat {
    config: MovingStatConfig,
    make_statistic: Box<dyn Fn() -> Box<dyn Statistic> + Send>,
    keys: HashMap<String, KeyState>,
}

impl MovingStat {
    pub fn new(
        config: MovingStatConfig,
        make_statistic: impl Fn() -> Box<dyn Statistic> + Send + 'static,
    ) -> Self {
        Self {
            config,
            make_statistic: Box::new(make_statistic),
            keys: HashMap::new(),
        }
    }

    pub fn ingest(&mut self, input: Triple) -> Option<Triple> {
        let Some(v) = input.value else {
            return None;
        };
        let key = input.key.clone();
        let t = input.time;
        let state = self.keys.entry(key.clone()).or_insert_with(KeyState::new);

        // Step 1: unseen key.
        if state.q.is_empty() && state.stat.is_none() {
            state.q.push_back((v, t));
            return None;
        }

        // Step 2: still warming up.
        if let Some(&(_, front_time)) = state.q.front() {
            if state.stat.is_none() && front_time > t - self.config.warmup {
                state.q.push_back((v, t));
                return None;
            }
        }

        // Step 3: warmup just completed.
        if state.stat.is_none() {
            let mut stat = (self.make_statistic)();
            let values: Vec<f64> = state.q.iter().map(|(v, _)| *v).collect();
            stat.initialize(&values);
            state.stat = Some(stat);
        }
        let stat = state.stat.as_mut().expect("initialized above");

        // Step 4: drop window-expired entries.
        while let Some(&(old_v, old_t)) = state.q.front() {
            if old_t < t - self.config.history {
                state.q.pop_front();
                stat.remove(old_v);
            } else {
                break;
            }
        }

        // Step 5: predicted value and ratio, using the statistic as it
        // stands before this point is applied.
        let predicted = stat.value();
        let ratio = predicted.and_then(|p| if p == 0.0 { None } else { Some(v / p) });

        // Step 6: inpainting decision.
        let mut newval = v;
        if let Some(inpainting) = self.config.inpainting {
            let out_of_band = ratio.is_some_and(|r| {
                inpainting.min.is_some_and(|min| r < min) || inpainting.max.is_some_and(|max| r >= max)
            });
            if out_of_band {
                match state.inpaint_start {
                    None => {
                        state.inpaint_start = Some(t);
                        state.raw_q.clear();
                        state.raw_q.push((v, t));
                        newval = predicted.unwrap_or(v);
                    }
                    Some(start) if start > t - inpainting.maxduration => {
                        state.raw_q.push((v, t));
                        newval = predicted.unwrap_or(v);
                    }
                    Some(start) => {
                        // New-normal rebuild: the inpainted run outlasted
                        // maxduration, so treat it as the new baseline.
                        let raw_count = state.raw_q.len();
                        let mut popped = Vec::new();
                        while let Some(&(_, back_t)) = state.q.back() {
                            if back_t >= start {
                                popped.push(state.q.pop_back().expect("checked above"));
                            } else {
                                break;
                            }
                        }
                        if popped.len() != raw_count {
                            error!(
                                key = %key,
                                popped = popped.len(),
                                raw_count,
                                "moving-stat inpaint rebuild size mismatch"
                            );
                        }
                        for raw in state.raw_q.drain(..) {
                            state.q.push_back(raw);
                        }
                        let values: Vec<f64> = state.q.iter().map(|(v, _)| *v).collect();
                        stat.initialize(&values);
                        state.inpaint_start = None;
                        state.raw_q.clear();
                        // Preserve the original's one flagged quirk: this
                        // tick still emits the raw extreme over the freshly
                        // rebuilt statistic, not the placeholder.
                        newval = v;
                    }
                }
            } else if state.inpaint_start.is_some() {
                // Returned to normal: stop inpainting, keep placeholders.
                state.inpaint_start = None;
                state.raw_q.clear();
            }
        }

        // Step 7: insert/remove into q and statistic.
        let window_not_full = state
            .q
            .front()
            .is_none_or(|&(_, front_time)| front_time > t - self.config.history);
        if window_not_full {
            stat.insert_remove(newval, None);
            state.q.push_back((newval, t));
        } else {
            let removed = state.q.pop_front().map(|(v, _)| v);
            stat.insert_remove(newval, removed);
            state.q.push_back((newval, t));
        }

        // Step 8: emit.
        let out_value = stat.value().and_then(|s| if s == 0.0 { None } else { Some(newval / s) });
        Some(Triple::new(key, out_value, t))
    }
}

struct MovingStatIter {
    inner: MovingStat,
    input: TripleIter,
}

impl Iterator for MovingStatIter {
    type Item = Result<Triple, StageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.input.next()? {
                Err(e) => return Some(Err(e)),
                Ok(triple) => {
                    if let Some(out) = self.inner.ingest(triple) {
                        return Some(Ok(out));
                    }
                }
            }
        }
    }
}

impl Filter for MovingStat {
    fn apply(self: Box<Self>, input: TripleIter) -> TripleIter {
        Box::new(MovingStatIter {
            inner: *self,
            input,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn median_stat() -> MovingStat {
        MovingStat::new(
            MovingStatConfig {
                history: 10,
                warmup: 3,
                inpainting: None,
            },
            || Box::new(Quantile::new(1, 2)),
        )
    }

    #[test]
    fn warmup_suppresses_output() {
        let mut ms = median_stat();
        assert!(ms.ingest(Triple::new("k", Some(10.0), 0)).is_none());
        assert!(ms.ingest(Triple::new("k", Some(12.0), 1)).is_none());
        assert!(ms.ingest(Triple::new("k", Some(8.0), 2)).is_none());
    }

    #[test]
    fn median_ratio_after_warmup() {
        let mut ms = median_stat();
        ms.ingest(Triple::new("k", Some(10.0), 0));
        ms.ingest(Triple::new("k", Some(12.0), 1));
        ms.ingest(Triple::new("k", Some(8.0), 2));
        let out = ms.ingest(Triple::new("k", Some(14.0), 3)).unwrap();
        assert_approx_eq::assert_approx_eq!(out.value.unwrap(), 1.4);
    }

    #[test]
    fn mean_ratio_matches_running_average() {
        let mut ms = MovingStat::new(
            MovingStatConfig {
                history: 10,
                warmup: 2,
                inpainting: None,
            },
            || Box::new(Mean::default()),
        );
        ms.ingest(Triple::new("k", Some(10.0), 0));
        ms.ingest(Triple::new("k", Some(20.0), 1));
        let out = ms.ingest(Triple::new("k", Some(30.0), 2)).unwrap();
        // statistic(q) reflects the window *after* this point is folded in.
        assert_approx_eq::assert_approx_eq!(out.value.unwrap(), 30.0 / 20.0);
    }

    #[test]
    fn inpainting_replaces_extreme_with_predicted() {
        let mut ms = MovingStat::new(
            MovingStatConfig {
                history: 10,
                warmup: 3,
                inpainting: Some(Inpainting {
                    min: None,
                    max: Some(1.5),
                    maxduration: 5,
                }),
            },
            || Box::new(Quantile::new(1, 2)),
        );
        ms.ingest(Triple::new("k", Some(10.0), 0));
        ms.ingest(Triple::new("k", Some(12.0), 1));
        ms.ingest(Triple::new("k", Some(8.0), 2));
        ms.ingest(Triple::new("k", Some(14.0), 3));
        let out = ms.ingest(Triple::new("k", Some(30.0), 4)).unwrap();
        assert_eq!(out.value, Some(1.0));
    }
}
