//! Derives sub-profiles anchored at one method.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ProfiledEvent;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Keep the anchor and every frame after it toward the leaf.
    Up,
    /// Keep the root side of the stack through the anchor.
    Down,
}

impl clap::ValueEnum for Direction {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Up, Self::Down]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Up => clap::builder::PossibleValue::new("up"),
            Self::Down => clap::builder::PossibleValue::new("down"),
        })
    }
}

/// Trimmed copy of `event`, or `None` when `method` is neither a frame nor
/// the event's resource label. Events without a stack are always dropped.
pub fn trim_event(event: &ProfiledEvent, method: &str, direction: Direction) -> Option<ProfiledEvent> {
    let stack = event.stack_trace()?;
    if let Some(p) = stack.position(method) {
        let kept = match direction {
            Direction::Up => stack.slice(p..stack.len()),
            Direction::Down => stack.slice(0..p + 1),
        };
        return Some(event.with_stack(kept));
    }
    let resource = event.terminal_resource()?;
    if &*resource != method {
        return None;
    }
    Some(match direction {
        Direction::Up => event.with_stack(stack.slice(0..0)),
        Direction::Down => event.clone(),
    })
}

/// New event set; the input is left untouched and input order is kept.
pub fn trim_events(events: &[ProfiledEvent], method: &str, direction: Direction) -> Vec<ProfiledEvent> {
    events
        .par_iter()
        .filter_map(|e| trim_event(e, method, direction))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Payload;
    use crate::event::tests::sample;

    fn names(event: &ProfiledEvent) -> Vec<String> {
        event
            .meta
            .stack
            .frames()
            .iter()
            .map(|f| f.to_string())
            .collect()
    }

    #[test]
    fn up_and_down_split_at_anchor() {
        let event = sample(&["root", "svc", "M", "dao", "leaf"], None, 0, 0);
        let up = trim_event(&event, "M", Direction::Up).expect("up");
        let down = trim_event(&event, "M", Direction::Down).expect("down");
        assert_eq!(names(&up), vec!["M", "dao", "leaf"]);
        assert_eq!(names(&down), vec!["root", "svc", "M"]);

        let mut rebuilt = names(&down);
        rebuilt.extend(names(&up).into_iter().skip(1));
        assert_eq!(rebuilt, names(&event));
        assert_eq!(names(&event).len(), 5);
    }

    #[test]
    fn absent_method_drops_event() {
        let events = vec![
            sample(&["a", "M"], None, 0, 0),
            sample(&["a", "b"], None, 0, 0),
        ];
        let trimmed = trim_events(&events, "M", Direction::Up);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn resource_anchor_trims_to_resource() {
        let mut event = sample(&["a", "b"], None, 0, 0);
        event.payload = Payload::Lock {
            monitor_class: crate::intern("java.lang.Object"),
            duration_nanos: 10,
        };
        let up = trim_event(&event, "java.lang.Object_[i]", Direction::Up).expect("up");
        assert!(up.meta.stack.is_empty());
        assert_eq!(up.terminal_resource().as_deref(), Some("java.lang.Object_[i]"));
        let down = trim_event(&event, "java.lang.Object_[i]", Direction::Down).expect("down");
        assert_eq!(names(&down), vec!["a", "b"]);
    }
}
