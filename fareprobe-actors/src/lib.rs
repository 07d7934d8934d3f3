//! Actor runtime and the SQLite-backed store actor.
//!
//! Writes from the pipeline are funnelled through a single [`store::StoreActor`]
//! mailbox, so route results and direction payloads never contend for the
//! database connection.
pub mod actor;
pub mod store;
pub mod system;

use fareprobe_common::{DirectionRecord, RouteResult};

pub enum StoreMsg {
    InsertRoute(RouteResult),
    InsertDirection(DirectionRecord),
}
