//! Group-by-capture summing aggregation stage.
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use indexmap::IndexMap;
use metrics::counter;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::StageError;
use crate::stage::{Filter, TripleIter};
use crate::triple::Triple;

/// A group identity: the tuple of captured substrings from the expression's
/// capture groups, in order.
type GroupId = Vec<String>;

struct AggInfo {
    first_seen: Instant,
    count: u32,
    sum: f64,
}

pub struct AggSumConfig {
    /// The original glob text, used to rebuild an output key by substituting
    /// each parenthesized subexpression with its captured value.
    pub glob: String,
    pub matcher: Regex,
    pub groupsize: Option<u32>,
    pub timeout: i64,
    pub droppartial: bool,
}

pub struct AggSum {
    paren_re: Regex,
    config: AggSumConfig,
    /// group -> set of times with an in-flight partial for that group.
    agg_by_group: HashMap<GroupId, HashSet<i64>>,
    /// (group, time) -> partial, ordered by insertion (arrival) order.
    agg_by_seen: IndexMap<(GroupId, i64), AggInfo>,
    old_keys: HashMap<GroupId, i64>,
}

impl AggSum {
    pub fn new(config: AggSumConfig) -> Self {
        Self {
            paren_re: Regex::new(r"\([^)]*\)").expect("static pattern"),
            config,
            agg_by_group: HashMap::new(),
            agg_by_seen: IndexMap::new(),
            old_keys: HashMap::new(),
        }
    }

    fn output_key(&self, group: &GroupId) -> String {
        let mut out = String::new();
        let mut last_end = 0;
        for (i, m) in self.paren_re.find_iter(&self.config.glob).enumerate() {
            out.push_str(self.config.glob.get(last_end..m.start()).unwrap_or(""));
            out.push_str(group.get(i).map(String::as_str).unwrap_or(""));
            last_end = m.end();
        }
        out.push_str(self.config.glob.get(last_end..).unwrap_or(""));
        out
    }

    fn remove(&mut self, group: &GroupId, time: i64) -> Option<AggInfo> {
        let info = self.agg_by_seen.shift_remove(&(group.clone(), time));
        if let Some(times) = self.agg_by_group.get_mut(group) {
            times.remove(&time);
            if times.is_empty() {
                self.agg_by_group.remove(group);
            }
        }
        info
    }

    /// Processes one input triple, returning every output triple it causes
    /// (zero, one from a group-complete emission, plus any in-order-flush or
    /// timeout-sweep emissions).
    pub fn ingest(&mut self, input: Triple) -> Vec<Triple> {
        counter!("sentry_aggsum_triples_received_total").increment(1);
        let mut out = Vec::new();

        let Some(caps) = self.config.matcher.captures(&input.key) else {
            counter!("sentry_aggsum_triples_dropped_total").increment(1);
            return out;
        };
        let group: GroupId = caps
            .iter()
            .skip(1)
            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect();
        let time = input.time;

        if let Some(&old) = self.old_keys.get(&group) {
            if time < old {
                warn!(?group, time, old, "unexpected late data for completed group");
                return out;
            }
        }

        let now = Instant::now();
        if !self.agg_by_seen.contains_key(&(group.clone(), time)) {
            self.agg_by_group
                .entry(group.clone())
                .or_default()
                .insert(time);
            self.agg_by_seen.insert(
                (group.clone(), time),
                AggInfo {
                    first_seen: now,
                    count: 0,
                    sum: 0.0,
                },
            );
        }
        {
            let entry = self
                .agg_by_seen
                .get_mut(&(group.clone(), time))
                .expect("just inserted");
            entry.count += 1;
            if let Some(v) = input.value {
                entry.sum += v;
            }
        }

        // Step 6: group-complete check.
        if let Some(groupsize) = self.config.groupsize {
            let complete = self
                .agg_by_seen
                .get(&(group.clone(), time))
                .is_some_and(|e| e.count == groupsize);
            if complete {
                let info = self.remove(&group, time).expect("just checked present");

                let mut older_times: Vec<i64> = self
                    .agg_by_group
                    .get(&group)
                    .map(|set| set.iter().copied().filter(|&t| t < time).collect())
                    .unwrap_or_default();
                older_times.sort_unstable();
                let mut newest_flushed = time;
                for t in older_times {
                    if let Some(partial) = self.remove(&group, t) {
                        debug!(?group, t, "giving up on incomplete partial, flushing in order");
                        out.push(Triple::new(self.output_key(&group), Some(partial.sum), t));
                        newest_flushed = newest_flushed.max(t);
                    }
                }

                counter!("sentry_aggsum_triples_emitted_total").increment(1);
                out.push(Triple::new(self.output_key(&group), Some(info.sum), time));
                let prior = self.old_keys.get(&group).copied().unwrap_or(i64::MIN);
                self.old_keys
                    .insert(group.clone(), prior.max(newest_flushed).max(time));
            }
        }

        // Step 7: timeout sweep, global across all groups.
        let expiry_budget = self.config.timeout.max(0) as u64;
        loop {
            let Some(((g, t), info)) = self.agg_by_seen.get_index(0) else {
                break;
            };
            if now.duration_since(info.first_seen).as_secs() < expiry_budget {
                break;
            }
            let g = g.clone();
            let t = *t;
            let partial = self.remove(&g, t).expect("from front of index");
            if !self.config.droppartial {
                out.push(Triple::new(self.output_key(&g), Some(partial.sum), t));
            }
            let prior = self.old_keys.get(&g).copied().unwrap_or(i64::MIN);
            self.old_keys.insert(g, prior.max(t));
        }

        out
    }
}

struct AggSumIter {
    inner: AggSum,
    input: TripleIter,
    pending: VecDeque<Triple>,
}

impl Iterator for AggSumIter {
    type Item = Result<Triple, StageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(t) = self.pending.pop_front() {
                return Some(Ok(t));
            }
            match self.input.next()? {
                Err(e) => return Some(Err(e)),
                Ok(triple) => {
                    let emitted = self.inner.ingest(triple);
                    self.pending.extend(emitted);
                }
            }
        }
    }
}

impl Filter for AggSum {
    fn apply(self: Box<Self>, input: TripleIter) -> TripleIter {
        Box::new(AggSumIter {
            inner: *self,
            input,
            pending: VecDeque::new(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make(glob: &str, groupsize: Option<u32>, timeout: i64, droppartial: bool) -> AggSum {
        let t = globmatch::translate(glob).unwrap();
        AggSum::new(AggSumConfig {
            glob: glob.to_string(),
            matcher: Regex::new(&t.pattern).unwrap(),
            groupsize,
            timeout,
            droppartial,
        })
    }

    #[test]
    fn completes_group_on_groupsize() {
        // spec.md §8 scenario 1: group `x` at t=1001 receives exactly two
        // inputs (2.0, then 3.0), completing at groupsize=2 with sum 5.0.
        // No earlier, still-incomplete entry for group `x` is left in
        // flight, so this only exercises the groupsize-complete path, not
        // the in-order flush.
        let mut agg = make("a.(*).b", Some(2), 60, false);
        assert!(agg.ingest(Triple::new("a.y.b", Some(10.0), 1000)).is_empty());
        assert!(agg.ingest(Triple::new("a.x.b", Some(2.0), 1001)).is_empty());
        assert!(agg.ingest(Triple::new("a.y.b", Some(20.0), 1001)).is_empty());
        let mut out = agg.ingest(Triple::new("a.x.b", Some(3.0), 1001));
        assert_eq!(out.len(), 1);
        let emitted = out.pop().unwrap();
        assert_eq!(emitted.key, "a.x.b");
        assert_eq!(emitted.value, Some(5.0));
        assert_eq!(emitted.time, 1001);
    }

    #[test]
    fn non_matching_key_is_dropped() {
        let mut agg = make("a.(*).b", Some(1), 60, false);
        assert!(agg.ingest(Triple::new("zzz", Some(1.0), 0)).is_empty());
    }

    #[test]
    fn late_data_after_old_keys_is_dropped() {
        let mut agg = make("a.(*).b", Some(1), 60, false);
        let out = agg.ingest(Triple::new("a.x.b", Some(1.0), 100));
        assert_eq!(out.len(), 1);
        assert!(agg.ingest(Triple::new("a.x.b", Some(1.0), 50)).is_empty());
    }

    #[test]
    fn droppartial_suppresses_timeout_emission() {
        let mut agg = make("a.(*).b", None, 0, true);
        assert!(agg.ingest(Triple::new("a.x.b", Some(1.0), 0)).is_empty());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(agg.ingest(Triple::new("a.y.b", Some(1.0), 0)).is_empty());
    }
}
