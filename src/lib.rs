//! jfrlens core library: turns decoded JVM profiling events into flame-graph
//! stacks, method tables, correlation spans and profile comparisons.

mod cmd;
mod collapsed;
mod compare;
mod config;
mod cpuload;
mod decoder;
mod ecid;
mod error;
mod event;
mod extract;
mod filter;
mod frame;
mod fsutil;
mod intern;
mod percent;
mod session;
mod stats;
mod trim;
mod window;

pub use cmd::*;
pub use collapsed::*;
pub use compare::*;
pub use config::*;
pub use cpuload::*;
pub use decoder::*;
pub use ecid::*;
pub use error::*;
pub use event::*;
pub use extract::*;
pub use filter::*;
pub use frame::*;
pub use fsutil::*;
pub use intern::*;
pub use percent::*;
pub use session::*;
pub use stats::*;
pub use trim::*;
pub use window::*;
