//! CPU-load pseudo stacks and per-file load series.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::{CollapsedStack, FrameType, Payload, ProfiledEvent};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CpuLoadKind {
    JvmUser,
    JvmSystem,
    JvmTotal,
    MachineTotal,
    MachineMinusJvm,
}

impl CpuLoadKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::JvmUser => "JVM user",
            Self::JvmSystem => "JVM system",
            Self::JvmTotal => "JVM total",
            Self::MachineTotal => "Machine total",
            Self::MachineMinusJvm => "Machine total - JVM total",
        }
    }

    /// Whole-percent value of this measure; negative differences clamp later.
    pub fn scaled(self, load: &ScaledLoad) -> i64 {
        match self {
            Self::JvmUser => load.jvm_user,
            Self::JvmSystem => load.jvm_system,
            Self::JvmTotal => load.jvm_user + load.jvm_system,
            Self::MachineTotal => load.machine_total,
            Self::MachineMinusJvm => load.machine_total - (load.jvm_user + load.jvm_system),
        }
    }
}

/// Load fractions scaled to whole percents, rounded half-to-even.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScaledLoad {
    pub jvm_user: i64,
    pub jvm_system: i64,
    pub machine_total: i64,
}

impl ScaledLoad {
    pub fn of(event: &ProfiledEvent) -> Option<Self> {
        match event.payload {
            Payload::CpuUsage {
                jvm_user,
                jvm_system,
                machine_total,
            } => Some(Self {
                jvm_user: scale(jvm_user),
                jvm_system: scale(jvm_system),
                machine_total: scale(machine_total),
            }),
            _ => None,
        }
    }
}

fn scale(fraction: f64) -> i64 {
    if !fraction.is_finite() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * 100.0).round_ties_even() as i64
}

/// `Label[;file_[i]];0%_[i];...;N%` with one frame per whole percent.
pub fn cpu_load_stack(label: &str, filename: Option<&str>, percent: i64) -> String {
    let mut out = String::from(label);
    if let Some(name) = filename {
        out.push(';');
        out.push_str(name);
        out.push_str(FrameType::Inlined.suffix());
    }
    for i in 0..=percent.clamp(0, 100) {
        out.push(';');
        out.push_str(&i.to_string());
        out.push('%');
        let suffix = match i {
            0..=25 => Some(FrameType::Inlined.suffix()),
            26..=50 => Some(FrameType::JitCompiled.suffix()),
            51..=75 => Some(FrameType::Native.suffix()),
            _ => None,
        };
        if let Some(suffix) = suffix {
            out.push_str(suffix);
        }
    }
    out
}

/// One pseudo stack per CPU-load sample for the chosen measure.
pub fn cpu_load_collapsed(
    events: &[&ProfiledEvent],
    kind: CpuLoadKind,
    include_filename: bool,
) -> CollapsedStack {
    let out = CollapsedStack::new();
    for event in events {
        if let Some(load) = ScaledLoad::of(event) {
            let filename = include_filename.then(|| event.filename());
            out.add_single(&cpu_load_stack(kind.label(), filename, kind.scaled(&load)));
        }
    }
    out
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CpuLoadPoint {
    pub epoch_millis: i64,
    pub jvm_user: i64,
    pub jvm_system: i64,
    pub jvm_total: i64,
    pub machine_total: i64,
    pub machine_minus_jvm: i64,
}

/// Time-ordered load points grouped by source file.
pub fn cpu_load_series(events: &[&ProfiledEvent]) -> BTreeMap<String, Vec<CpuLoadPoint>> {
    let mut out = BTreeMap::<String, Vec<CpuLoadPoint>>::new();
    for event in events {
        let Some(load) = ScaledLoad::of(event) else {
            continue;
        };
        out.entry(event.filename().to_string())
            .or_default()
            .push(CpuLoadPoint {
                epoch_millis: event.epoch_millis(),
                jvm_user: load.jvm_user,
                jvm_system: load.jvm_system,
                jvm_total: CpuLoadKind::JvmTotal.scaled(&load),
                machine_total: load.machine_total,
                machine_minus_jvm: CpuLoadKind::MachineMinusJvm.scaled(&load),
            });
    }
    for points in out.values_mut() {
        points.sort_by_key(|p| p.epoch_millis);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::sample;

    fn load_event(user: f64, system: f64, machine: f64, millis: i64) -> ProfiledEvent {
        let mut event = sample(&[], None, 0, millis);
        event.payload = Payload::CpuUsage {
            jvm_user: user,
            jvm_system: system,
            machine_total: machine,
        };
        event
    }

    #[test]
    fn pseudo_stack_colors_by_band() {
        let stack = cpu_load_stack("JVM user", None, 2);
        assert_eq!(stack, "JVM user;0%_[i];1%_[i];2%_[i]");
        let stack = cpu_load_stack("X", Some("a.jfr"), 77);
        assert!(stack.starts_with("X;a.jfr_[i];0%_[i]"));
        assert!(stack.contains(";26%_[j];"));
        assert!(stack.contains(";75%_[k];"));
        assert!(stack.ends_with(";76%;77%"));
        assert_eq!(cpu_load_stack("Y", None, -4), "Y;0%_[i]");
    }

    #[test]
    fn scaling_rounds_half_to_even() {
        let event = load_event(0.125, 0.135, 0.5, 0);
        let load = ScaledLoad::of(&event).expect("load");
        assert_eq!(load.jvm_user, 12);
        assert_eq!(load.machine_total, 50);
        assert_eq!(CpuLoadKind::JvmTotal.scaled(&load), load.jvm_user + load.jvm_system);
    }

    #[test]
    fn out_of_range_fractions_stay_bounded() {
        let event = load_event(-3.0, f64::NAN, 1e300, 0);
        let load = ScaledLoad::of(&event).expect("load");
        assert_eq!((load.jvm_user, load.jvm_system, load.machine_total), (0, 0, 100));

        let refs = vec![&event];
        let store = cpu_load_collapsed(&refs, CpuLoadKind::MachineTotal, false);
        let (stack, weight) = store.entries().remove(0);
        assert_eq!(weight, 1);
        assert!(stack.ends_with(";99%;100%"));
        assert_eq!(cpu_load_stack("Z", None, i64::MAX).matches('%').count(), 101);
    }

    #[test]
    fn collapsed_and_series_cover_every_sample() {
        let events = vec![load_event(0.1, 0.0, 0.2, 2_000), load_event(0.1, 0.0, 0.05, 1_000)];
        let refs = events.iter().collect::<Vec<_>>();
        let store = cpu_load_collapsed(&refs, CpuLoadKind::MachineMinusJvm, false);
        assert_eq!(store.total_weight(), 2);
        assert_eq!(store.weight("Machine total - JVM total;0%_[i]"), 1);

        let series = cpu_load_series(&refs);
        let points = &series["app.jfr"];
        assert_eq!(points[0].epoch_millis, 1_000);
        assert_eq!(points[0].machine_minus_jvm, -5);
    }
}
