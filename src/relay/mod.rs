//! Message forwarding: the pipeline that turns source events into
//! destination posts, plus its supporting state (forwarded-id records,
//! identity cache, watermarks, content filter, counters) and the catch-up
//! replayer that drains the backlog after an outage.

pub mod catchup;
pub mod filter;
pub mod identity;
pub mod pipeline;
pub mod records;
pub mod stats;
pub mod watermark;
