use alloc::vec::Vec;
use core::time::Duration;

use crate::dispatch::Dispatcher;
use crate::event::{Event, EventSource, SourceError};
use crate::platform::Clock;

struct Periodic {
    name: &'static str,
    period_ms: u64,
    due_ms: u64,
}

/// The poll driver.  Owns the event source, the dispatcher with its state and a list of periodic
/// tasks, and runs them one after the other on a single task:
///
/// 1. poll the source, waiting at most `wait` for activity
/// 2. dispatch a [`Event::Timer`] for every periodic task that fell due on the clock
/// 3. idle through the clock before going round again
///
/// Dispatches never overlap, a timer dispatch always sees the state left by the previous event.
pub struct Reactor<S, D: Dispatcher, K> {
    source: S,
    dispatcher: D,
    state: D::State,
    clock: K,
    wait: Duration,
    idle: Duration,
    timers: Vec<Periodic>,
}

impl<S: EventSource, D: Dispatcher, K: Clock> Reactor<S, D, K> {
    /// A reactor with a zero poll wait and no periodic tasks.
    pub fn new(source: S, dispatcher: D, state: D::State, clock: K) -> Self {
        Self {
            source,
            dispatcher,
            state,
            clock,
            wait: Duration::ZERO,
            idle: Duration::ZERO,
            timers: Vec::new(),
        }
    }

    /// Longest time a single poll of the source may block.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Pause handed to [`Clock::idle`] at the end of every turn.
    pub fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Register a periodic task dispatched as `Event::Timer(name)`.  It first falls due on the
    /// next turn and then every `period_ms` after it last ran.  A turn that comes late runs the
    /// task once, missed periods are not caught up.
    pub fn every(mut self, name: &'static str, period_ms: u64) -> Self {
        let due_ms = self.clock.now_ms();
        self.timers.push(Periodic {
            name,
            period_ms,
            due_ms,
        });
        self
    }

    /// One iteration of the loop.  Returns the number of events dispatched, timers included.
    pub async fn turn(&mut self) -> Result<usize, SourceError> {
        let mut events = self
            .source
            .poll(&self.dispatcher, &mut self.state, self.wait)
            .await?;

        let now = self.clock.now_ms();
        for timer in self.timers.iter_mut() {
            if now < timer.due_ms {
                continue;
            }
            timer.due_ms = now + timer.period_ms;

            let roster = self.source.roster();
            if let Err(_e) = self
                .dispatcher
                .dispatch(&mut self.state, Event::Timer(timer.name), roster)
                .await
            {
                warn!("periodic task {} failed", timer.name);
            }
            events += 1;
        }

        self.clock.idle(self.idle).await;

        Ok(events)
    }

    /// Turn until the source fails.  Under normal operation this never returns.
    pub async fn run(&mut self) -> SourceError {
        loop {
            if let Err(e) = self.turn().await {
                error!("event source failed: {:?}", e);
                return e;
            }
        }
    }

    /// The application state.
    pub fn state(&self) -> &D::State {
        &self.state
    }

    /// The application state, mutably.
    pub fn state_mut(&mut self) -> &mut D::State {
        &mut self.state
    }

    /// The event source.
    pub fn source(&mut self) -> &mut S {
        &mut self.source
    }

    /// The clock.
    pub fn clock(&self) -> &K {
        &self.clock
    }
}
