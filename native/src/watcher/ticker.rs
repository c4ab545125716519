// Recurring timer running on its own thread.

use log::{debug, warn};
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

enum TickerCommand {
    Rearm(Duration),
    Stop,
}

/// Fires immediately, then every `period`, until stopped or dropped.
///
/// Ticks run one at a time on the timer thread; fires missed while a tick
/// overran are skipped.
pub(crate) struct Ticker {
    control: mpsc::Sender<TickerCommand>,
}

impl Ticker {
    pub(crate) fn spawn<F>(name: &str, period: Duration, mut on_tick: F) -> io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (control, commands) = mpsc::channel();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut period = period;
                loop {
                    let started = Instant::now();
                    if !on_tick() {
                        break;
                    }

                    let deadline = next_deadline(started, period, Instant::now());

                    loop {
                        // A period too long to represent waits for a command.
                        let command = match deadline {
                            Some(deadline) => commands
                                .recv_timeout(deadline.saturating_duration_since(Instant::now())),
                            None => commands
                                .recv()
                                .map_err(|_| RecvTimeoutError::Disconnected),
                        };
                        match command {
                            Err(RecvTimeoutError::Timeout) => break,
                            Ok(TickerCommand::Rearm(next)) => {
                                // New period starts with an immediate fire.
                                period = next;
                                break;
                            }
                            Ok(TickerCommand::Stop) | Err(RecvTimeoutError::Disconnected) => {
                                #[cfg(debug_assertions)]
                                debug!("[WATCHER] Timer thread stopped");
                                return;
                            }
                        }
                    }
                }
            })?;

        Ok(Self { control })
    }

    pub(crate) fn rearm(&self, period: Duration) {
        if self.control.send(TickerCommand::Rearm(period)).is_err() {
            warn!("[WATCHER] Timer thread is gone, re-arm ignored");
        }
    }

    pub(crate) fn stop(&self) {
        let _ = self.control.send(TickerCommand::Stop);
    }
}

/// First fire time after `now` on the grid `started + k * period`, skipping
/// fires missed while a tick overran. `None` when it is past `Instant`'s range.
fn next_deadline(started: Instant, period: Duration, now: Instant) -> Option<Instant> {
    let mut deadline = started.checked_add(period)?;
    if deadline <= now {
        let missed = now.duration_since(deadline).as_nanos() / period.as_nanos().max(1) + 1;
        let skip = u32::try_from(missed).ok()?;
        deadline = deadline.checked_add(period.checked_mul(skip)?)?;
    }
    Some(deadline)
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
