//! Signal Bus & Thalamus Router
//!
//! The bus is a typed pub/sub with sequential per-emission dispatch and
//! error isolation; the router sits on top and decides which registered
//! handlers receive a signal based on declarative rules.

mod bus;
mod matcher;
mod router;

pub use bus::{BusStats, SignalBus, Subscription};
pub use matcher::{glob_match, Matcher};
pub use router::{DispatchError, Route, RouteOutcome, ThalamusRouter};
