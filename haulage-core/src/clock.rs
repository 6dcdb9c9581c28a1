//! Time source and per-operation context.
//!
//! Core logic never reads the system clock directly. Every engine operation
//! receives an [`OpContext`] carrying the clock, the initiating [`Actor`] and a
//! [`Cancellation`] signal.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use time::{Date, OffsetDateTime, UtcOffset};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::DispatchError;

pub trait Clock: Send + Sync {
    /// Current instant, in UTC.
    fn now(&self) -> OffsetDateTime;

    /// Offset of the business timezone used for dates, weekends and peak hours.
    fn offset(&self) -> UtcOffset;

    fn local_now(&self) -> OffsetDateTime {
        self.now().to_offset(self.offset())
    }

    fn today(&self) -> Date {
        self.local_now().date()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(UtcOffset::UTC)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn offset(&self) -> UtcOffset {
        self.offset
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
    offset: UtcOffset,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self::with_offset(start, UtcOffset::UTC)
    }

    pub fn with_offset(start: OffsetDateTime, offset: UtcOffset) -> Self {
        Self {
            now: Mutex::new(start),
            offset,
        }
    }

    pub fn set(&self, at: OffsetDateTime) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: time::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }

    fn offset(&self) -> UtcOffset {
        self.offset
    }
}

/// Who initiated an operation. Recorded on timeline events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    System,
    Customer(Uuid),
    Provider(Uuid),
    Admin(Uuid),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => write!(f, "system"),
            Actor::Customer(id) => write!(f, "customer:{id}"),
            Actor::Provider(id) => write!(f, "provider:{id}"),
            Actor::Admin(id) => write!(f, "admin:{id}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid actor: {0}")]
pub struct ParseActorError(String);

impl FromStr for Actor {
    type Err = ParseActorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "system" {
            return Ok(Actor::System);
        }
        let (kind, id) = s.split_once(':').ok_or_else(|| ParseActorError(s.to_string()))?;
        let id = Uuid::parse_str(id).map_err(|_| ParseActorError(s.to_string()))?;
        match kind {
            "customer" => Ok(Actor::Customer(id)),
            "provider" => Ok(Actor::Provider(id)),
            "admin" => Ok(Actor::Admin(id)),
            _ => Err(ParseActorError(s.to_string())),
        }
    }
}

/// Cooperative cancellation signal.
///
/// Backed by the same `watch::Receiver<bool>` the background processors use
/// for shutdown, so a processor can hand its shutdown receiver straight to
/// the operations it runs.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
}

/// Owning side of a [`Cancellation`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Cancellation {
    pub fn new() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Self { rx: Some(rx) })
    }

    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn from_watch(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub fn check(&self) -> Result<(), DispatchError> {
        if self.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        Ok(())
    }

    /// Resolves once cancellation is requested. Never resolves for
    /// [`Cancellation::never`] or when the sender is gone without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// Sleep for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: std::time::Duration) -> Result<(), DispatchError> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(DispatchError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Everything an engine operation needs to know about its caller.
#[derive(Clone)]
pub struct OpContext {
    pub clock: Arc<dyn Clock>,
    pub actor: Actor,
    pub cancel: Cancellation,
}

impl OpContext {
    pub fn new(clock: Arc<dyn Clock>, actor: Actor) -> Self {
        Self {
            clock,
            actor,
            cancel: Cancellation::never(),
        }
    }

    pub fn system(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, Actor::System)
    }

    pub fn with_cancel(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn as_actor(&self, actor: Actor) -> Self {
        Self {
            clock: Arc::clone(&self.clock),
            actor,
            cancel: self.cancel.clone(),
        }
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub fn today(&self) -> Date {
        self.clock.today()
    }
}

impl fmt::Debug for OpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpContext")
            .field("now", &self.clock.now())
            .field("actor", &self.actor)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(datetime!(2026-03-02 10:00 UTC));
        clock.advance(time::Duration::minutes(65));
        assert_eq!(clock.now(), datetime!(2026-03-02 11:05 UTC));
    }

    #[test]
    fn test_today_uses_business_offset() {
        let clock = ManualClock::with_offset(datetime!(2026-03-02 23:30 UTC), offset!(+2));
        assert_eq!(clock.today(), time::macros::date!(2026 - 03 - 03));
    }

    #[test]
    fn test_actor_text_form() {
        let id = Uuid::nil();
        let actor = Actor::Provider(id);
        assert_eq!(actor.to_string().parse::<Actor>().unwrap(), actor);
        assert_eq!("system".parse::<Actor>().unwrap(), Actor::System);
        assert!("robot:1".parse::<Actor>().is_err());
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_sleep() {
        let (handle, cancel) = Cancellation::new();
        handle.cancel();
        let result = cancel.sleep(std::time::Duration::from_secs(60)).await;
        assert!(matches!(result, Err(DispatchError::Cancelled)));
        assert!(Cancellation::never().check().is_ok());
    }
}
