use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Monotonic time, abstracted so tests can supply deterministic timestamps. This trait exists
/// so the Turn Engine never calls `Utc::now()` directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Opaque unique id generation, abstracted for the same reason as [`Clock`].
pub trait Ids: Send + Sync {
    fn new_id(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl Ids for UuidIds {
    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
