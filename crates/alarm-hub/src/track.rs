//! Handler bindings for state changes and wall-clock times

use crate::EventBus;
use alarm_core::events::StateChangedData;
use alarm_core::EntityId;
use chrono::{DateTime, Days, Local, NaiveTime, TimeZone};
use std::collections::HashSet;
use std::future::Future;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// A live handler binding; dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(fut),
        }
    }

    pub fn cancel(self) {
        drop(self);
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Call `handler` for every state change of one of `entity_ids`
///
/// Handlers run one after another in event order, so a handler that needs to
/// wait should spawn instead of sleeping inline.
pub fn track_state_change<I, F, Fut>(bus: &EventBus, entity_ids: I, handler: F) -> Subscription
where
    I: IntoIterator<Item = EntityId>,
    F: Fn(StateChangedData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let watched: HashSet<EntityId> = entity_ids.into_iter().collect();
    // Subscribe before spawning so nothing fired after this call is missed
    let mut rx = bus.subscribe_typed::<StateChangedData>();
    debug!(count = watched.len(), "Tracking state changes");

    Subscription::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) if watched.contains(&event.data.entity_id) => {
                    trace!(entity_id = %event.data.entity_id, "Tracked state changed");
                    handler(event.data).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    warn!("State tracker lagged by {} events", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Call `handler` every day at local wall-clock `time`
pub fn track_time_change<F, Fut>(time: NaiveTime, handler: F) -> Subscription
where
    F: Fn(DateTime<Local>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    debug!(%time, "Tracking time of day");

    Subscription::spawn(async move {
        // Never fire the same occurrence twice, even if the wall clock lags
        // behind the timer
        let mut last = Local::now();
        loop {
            let now = Local::now();
            let next = next_occurrence(now.max(last), time);
            let wait = (next - now).to_std().unwrap_or_default();
            trace!(%next, "Sleeping until next time trigger");
            tokio::time::sleep(wait).await;
            handler(next).await;
            last = next;
        }
    })
}

/// First instant strictly after `now` whose local time of day is `time`
///
/// A time skipped by a DST gap resolves to the next day that has it.
pub fn next_occurrence<Tz: TimeZone>(now: DateTime<Tz>, time: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();

    (0..=2u64)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter_map(|day| tz.from_local_datetime(&day.and_time(time)).earliest())
        .find(|candidate| *candidate > now)
        .unwrap_or_else(|| now + chrono::Duration::days(1))
}
