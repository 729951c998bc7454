use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::model::{Poll, PollCollection, PollId};

/// Remaining time of every poll at one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountdownFrame {
    /// Epoch seconds the frame was computed at.
    pub at: u64,
    pub remaining: BTreeMap<PollId, u64>,
    pub active: Vec<PollId>,
    /// Polls that reached zero since the previous tick.
    pub expired: Vec<PollId>,
}

#[derive(Debug, Default)]
struct Tracked {
    remaining: HashMap<PollId, u64>,
    expired: HashSet<PollId>,
}

/// Per-poll remaining time that never goes back up, even if the wall clock
/// does.
#[derive(Debug, Default)]
pub struct CountdownScheduler {
    tracked: Mutex<Tracked>,
}

impl CountdownScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remaining(&self, poll: &Poll, now: u64) -> u64 {
        let mut tracked = self.tracked.lock();
        clamp(&mut tracked, poll, now)
    }

    pub fn tick(&self, collection: &PollCollection, now: u64) -> CountdownFrame {
        let mut tracked = self.tracked.lock();
        let mut frame = CountdownFrame {
            at: now,
            ..CountdownFrame::default()
        };

        for entry in collection.entries() {
            let poll_id = entry.poll.id;
            let remaining = clamp(&mut tracked, &entry.poll, now);
            frame.remaining.insert(poll_id, remaining);

            if remaining > 0 {
                frame.active.push(poll_id);
            } else if tracked.expired.insert(poll_id) {
                info!(poll_id, "poll expired");
                frame.expired.push(poll_id);
            }
        }

        // Forget polls that left the collection.
        tracked
            .remaining
            .retain(|poll_id, _| frame.remaining.contains_key(poll_id));
        tracked
            .expired
            .retain(|poll_id| frame.remaining.contains_key(poll_id));

        frame
    }

    pub fn reset(&self) {
        *self.tracked.lock() = Tracked::default();
    }
}

fn clamp(tracked: &mut Tracked, poll: &Poll, now: u64) -> u64 {
    let computed = poll.time_remaining(now);
    let remaining = match tracked.remaining.get(&poll.id) {
        Some(last) => computed.min(*last),
        None => computed,
    };
    tracked.remaining.insert(poll.id, remaining);
    remaining
}

/// `HH:MM:SS`, with a `{d}d ` prefix once a day or more is left.
pub fn format_countdown(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A running tick loop. Dropping the handle stops it.
#[derive(Debug)]
pub struct CountdownHandle {
    task: JoinHandle<()>,
    frames: watch::Receiver<CountdownFrame>,
}

impl CountdownHandle {
    /// Runs `tick` every `period`, first right away, and publishes each frame.
    /// A tick that takes longer than `period` delays the next one instead of
    /// bunching them up. A zero period is raised to one millisecond.
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = CountdownFrame> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let (sender, frames) = watch::channel(CountdownFrame::default());

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let frame = tick().await;
                if sender.send(frame).is_err() {
                    break;
                }
            }
        });

        debug!(period_ms = period.as_millis() as u64, "countdown started");
        Self { task, frames }
    }

    pub fn frames(&self) -> watch::Receiver<CountdownFrame> {
        self.frames.clone()
    }

    pub fn latest(&self) -> CountdownFrame {
        self.frames.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for CountdownHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
