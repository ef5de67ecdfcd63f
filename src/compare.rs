//! Two-profile method comparison.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::path::Path;

use crate::{CollapsedStack, LensError, LensResult, Percent, SelfTotalStats, share_exceeds};

/// Which share drives thresholding and classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompareMetric {
    #[default]
    #[serde(rename = "self")]
    SelfTime,
    Total,
}

impl clap::ValueEnum for CompareMetric {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::SelfTime, Self::Total]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::SelfTime => clap::builder::PossibleValue::new("self"),
            Self::Total => clap::builder::PossibleValue::new("total"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CompareOptions {
    /// Minimum share (`0.01` is 1%) in at least one profile. `<= 0` keeps every method.
    pub threshold: f64,
    pub metric: CompareMetric,
}

/// Raw per-method counts from both profiles, before percentages exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodSamples {
    pub name: String,
    pub self_samples1: u64,
    pub total_samples1: u64,
    pub self_samples2: u64,
    pub total_samples2: u64,
}

impl MethodSamples {
    /// Derives the four percentages; both totals must be non-zero.
    pub fn calculate_percents(&self, total1: u64, total2: u64) -> LensResult<MethodCompareInfo> {
        let p1 = |v| Percent::of(v, total1).ok_or_else(|| LensError::NoData("file 1".to_string()));
        let p2 = |v| Percent::of(v, total2).ok_or_else(|| LensError::NoData("file 2".to_string()));
        let self_percent1 = p1(self.self_samples1)?;
        let self_percent2 = p2(self.self_samples2)?;
        let total_percent1 = p1(self.total_samples1)?;
        let total_percent2 = p2(self.total_samples2)?;
        Ok(MethodCompareInfo {
            name: self.name.clone(),
            self_samples1: self.self_samples1,
            total_samples1: self.total_samples1,
            self_samples2: self.self_samples2,
            total_samples2: self.total_samples2,
            self_percent1,
            self_percent2,
            total_percent1,
            total_percent2,
            self_diff: self_percent2 - self_percent1,
            total_diff: total_percent2 - total_percent1,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodCompareInfo {
    pub name: String,
    pub self_samples1: u64,
    pub total_samples1: u64,
    pub self_samples2: u64,
    pub total_samples2: u64,
    pub self_percent1: Percent,
    pub self_percent2: Percent,
    pub total_percent1: Percent,
    pub total_percent2: Percent,
    pub self_diff: Percent,
    pub total_diff: Percent,
}

impl MethodCompareInfo {
    fn diff(&self, metric: CompareMetric) -> Percent {
        match metric {
            CompareMetric::SelfTime => self.self_diff,
            CompareMetric::Total => self.total_diff,
        }
    }
}

/// Union of the methods of two profiles with their totals.
#[derive(Debug, Clone, Default)]
pub struct CompareInfo {
    pub total1: u64,
    pub total2: u64,
    pub methods: Vec<MethodSamples>,
}

impl CompareInfo {
    pub fn from_stats(first: &SelfTotalStats, second: &SelfTotalStats) -> Self {
        let mut merged = BTreeMap::<String, MethodSamples>::new();
        for (name, stats) in first.methods() {
            let entry = merged.entry(name.to_string()).or_default();
            entry.self_samples1 += stats.self_samples;
            entry.total_samples1 += stats.total_samples;
        }
        for (name, stats) in second.methods() {
            let entry = merged.entry(name.to_string()).or_default();
            entry.self_samples2 += stats.self_samples;
            entry.total_samples2 += stats.total_samples;
        }
        let methods = merged
            .into_iter()
            .map(|(name, samples)| MethodSamples { name, ..samples })
            .collect();
        Self {
            total1: first.total(),
            total2: second.total(),
            methods,
        }
    }

    pub fn from_collapsed(first: &CollapsedStack, second: &CollapsedStack) -> Self {
        Self::from_stats(
            &SelfTotalStats::from_collapsed(first),
            &SelfTotalStats::from_collapsed(second),
        )
    }

    pub fn load(first: &Path, second: &Path) -> LensResult<Self> {
        let (a, b) = rayon::join(|| CollapsedStack::load(first), || CollapsedStack::load(second));
        Ok(Self::from_collapsed(&a?, &b?))
    }

    fn over_threshold(&self, m: &MethodSamples, options: &CompareOptions) -> bool {
        if options.threshold <= 0.0 {
            return true;
        }
        let (s1, s2) = match options.metric {
            CompareMetric::SelfTime => (m.self_samples1, m.self_samples2),
            CompareMetric::Total => (m.total_samples1, m.total_samples2),
        };
        share_exceeds(s1, self.total1, options.threshold) || share_exceeds(s2, self.total2, options.threshold)
    }

    /// Thresholds, derives percentages and classifies every remaining method.
    pub fn compare(&self, options: CompareOptions) -> LensResult<Comparison> {
        if self.total1 == 0 {
            return Err(LensError::NoData("file 1".to_string()));
        }
        if self.total2 == 0 {
            return Err(LensError::NoData("file 2".to_string()));
        }
        let infos = self
            .methods
            .iter()
            .filter(|m| self.over_threshold(m, &options))
            .map(|m| m.calculate_percents(self.total1, self.total2))
            .collect::<LensResult<Vec<_>>>()?;

        let metric = options.metric;
        let only_in_file2 = classify(&infos, metric, true, |m| m.total_samples1 == 0);
        let only_in_file1 = classify(&infos, metric, false, |m| m.total_samples2 == 0);
        let more_in_file1 = classify(&infos, metric, false, |m| {
            in_both(m) && m.diff(metric) < Percent::ZERO
        });
        let more_in_file2 = classify(&infos, metric, true, |m| {
            in_both(m) && m.diff(metric) > Percent::ZERO
        });
        let unchanged = classify(&infos, metric, true, |m| in_both(m) && m.diff(metric).is_zero());

        tracing::debug!(
            compared = infos.len(),
            skipped = self.methods.len() - infos.len(),
            "classified methods"
        );

        Ok(Comparison {
            metric,
            threshold: options.threshold,
            total1: self.total1,
            total2: self.total2,
            only_in_file2,
            only_in_file1,
            more_in_file1,
            more_in_file2,
            unchanged,
        })
    }
}

fn in_both(m: &MethodCompareInfo) -> bool {
    m.total_samples1 != 0 && m.total_samples2 != 0
}

fn classify<F>(
    infos: &[MethodCompareInfo],
    metric: CompareMetric,
    descending: bool,
    keep: F,
) -> Vec<MethodCompareInfo>
where
    F: Fn(&MethodCompareInfo) -> bool,
{
    let mut rows = infos.iter().filter(|m| keep(m)).cloned().collect::<Vec<_>>();
    rows.sort_by(|a, b| {
        let ord = a.diff(metric).cmp(&b.diff(metric));
        let ord = if descending { ord.reverse() } else { ord };
        ord.then_with(|| a.name.cmp(&b.name))
    });
    rows
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub metric: CompareMetric,
    pub threshold: f64,
    pub total1: u64,
    pub total2: u64,
    pub only_in_file2: Vec<MethodCompareInfo>,
    pub only_in_file1: Vec<MethodCompareInfo>,
    pub more_in_file1: Vec<MethodCompareInfo>,
    pub more_in_file2: Vec<MethodCompareInfo>,
    pub unchanged: Vec<MethodCompareInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(lines: &str) -> CollapsedStack {
        CollapsedStack::read_from(lines.as_bytes()).expect("collapsed")
    }

    fn names(rows: &[MethodCompareInfo]) -> Vec<&str> {
        rows.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn disjoint_leaves_classify_as_only_in_one_file() {
        let info = CompareInfo::from_collapsed(&store("a;b;c 10\n"), &store("a;b;d 10\n"));
        let cmp = info.compare(CompareOptions::default()).expect("compare");

        assert_eq!(names(&cmp.only_in_file1), vec!["c"]);
        assert_eq!(cmp.only_in_file1[0].self_percent1.to_string(), "100.00");
        assert_eq!(names(&cmp.only_in_file2), vec!["d"]);
        assert_eq!(cmp.only_in_file2[0].self_percent2.to_string(), "100.00");
        assert_eq!(names(&cmp.unchanged), vec!["a", "b"]);
        for row in &cmp.unchanged {
            assert_eq!((row.total_samples1, row.total_samples2), (10, 10));
            assert_eq!((row.self_samples1, row.self_samples2), (0, 0));
            assert_eq!(row.self_diff.to_string(), "0.00");
        }
        assert!(cmp.more_in_file1.is_empty());
        assert!(cmp.more_in_file2.is_empty());
    }

    #[test]
    fn shifted_self_time_is_ordered_by_diff() {
        let first = store("r;x 50\nr;y 30\nr;z 20\n");
        let second = store("r;x 20\nr;y 40\nr;z 40\n");
        let cmp = CompareInfo::from_collapsed(&first, &second)
            .compare(CompareOptions::default())
            .expect("compare");
        assert_eq!(names(&cmp.more_in_file1), vec!["x"]);
        assert_eq!(cmp.more_in_file1[0].self_diff.to_string(), "-30.00");
        assert_eq!(names(&cmp.more_in_file2), vec!["z", "y"]);
        assert_eq!(names(&cmp.unchanged), vec!["r"]);
    }

    #[test]
    fn threshold_drops_methods_small_in_both_files() {
        let first = store("main;small 5\nmain;big 995\n");
        let second_small = store("main;small 5\nmain;big 995\n");
        let second_grown = store("main;small 50\nmain;big 950\n");
        let options = CompareOptions {
            threshold: 0.01,
            metric: CompareMetric::SelfTime,
        };

        let cmp = CompareInfo::from_collapsed(&first, &second_small)
            .compare(options)
            .expect("compare");
        let all = [&cmp.only_in_file1, &cmp.only_in_file2, &cmp.more_in_file1, &cmp.more_in_file2, &cmp.unchanged]
            .iter()
            .flat_map(|rows| names(rows))
            .collect::<Vec<_>>();
        assert!(!all.contains(&"small"));
        assert!(all.contains(&"big"));

        let cmp = CompareInfo::from_collapsed(&first, &second_grown)
            .compare(options)
            .expect("compare");
        assert_eq!(names(&cmp.more_in_file2), vec!["small"]);
    }

    #[test]
    fn total_metric_classifies_on_total_share() {
        let first = store("a;b 10\n");
        let second = store("a;b 5\na;c 5\n");
        let cmp = CompareInfo::from_collapsed(&first, &second)
            .compare(CompareOptions {
                threshold: 0.0,
                metric: CompareMetric::Total,
            })
            .expect("compare");
        assert_eq!(names(&cmp.more_in_file1), vec!["b"]);
        assert_eq!(names(&cmp.unchanged), vec!["a"]);
    }

    #[test]
    fn empty_profile_is_no_data() {
        let info = CompareInfo::from_collapsed(&store("a 1\n"), &CollapsedStack::new());
        match info.compare(CompareOptions::default()) {
            Err(LensError::NoData(which)) => assert_eq!(which, "file 2"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn percents_require_non_zero_totals() {
        let m = MethodSamples {
            name: "m".to_string(),
            self_samples1: 1,
            total_samples1: 1,
            ..MethodSamples::default()
        };
        assert!(m.calculate_percents(4, 0).is_err());
        let info = m.calculate_percents(4, 8).expect("percents");
        assert_eq!(info.self_percent1.to_string(), "25.00");
        assert_eq!(info.self_diff.to_string(), "-25.00");
    }
}
