// Polling watcher turning repeated enumerations into change events.

pub mod diff;
pub mod events;
mod ticker;

pub use diff::{diff_pass, DiffOutcome, PipeSet};
pub use events::{BatchCallback, WatchBatch, WatchEvent};

use crate::config::{normalize_host, validate_interval, WatchConfig};
use crate::enumerator::{NativeSource, PipeSource};
use crate::error::{PipeError, Result};
use arc_swap::ArcSwap;
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use ticker::Ticker;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Watches the pipe namespace of one host and reports changes.
///
/// The watcher starts stopped. Each start begins a new session with an empty
/// retained state, so the first tick of every session reports all present
/// pipes as created. Events of a tick are delivered as one [`WatchBatch`] on
/// the watcher thread, after the tick's state has been committed and with no
/// watcher lock held, so subscribers may call back into the watcher.
pub struct PipeWatcher {
    shared: Arc<Shared>,
}

struct Shared {
    source: Arc<dyn PipeSource>,
    host: ArcSwap<String>,
    read_acls: AtomicBool,
    disposed: AtomicBool,
    // Bumped on every start and stop; ticks of older sessions go quiet.
    generation: AtomicU64,
    lifecycle: Mutex<Lifecycle>,
    // Only touched from the tick path.
    retained: Mutex<Retained>,
    subscribers: Mutex<Vec<BatchCallback>>,
    channels: Mutex<Vec<mpsc::UnboundedSender<Arc<WatchBatch>>>>,
}

struct Lifecycle {
    interval: Duration,
    session: Option<Session>,
}

struct Session {
    id: Uuid,
    ticker: Ticker,
}

#[derive(Default)]
struct Retained {
    generation: u64,
    pipes: PipeSet,
    ticks: u64,
    failures: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PipeWatcher {
    /// Watcher over the live namespace with default settings.
    pub fn native() -> Self {
        Self::new(Arc::new(NativeSource))
    }

    pub fn new(source: Arc<dyn PipeSource>) -> Self {
        Self::build(source, WatchConfig::default())
    }

    /// Create a watcher from validated settings; does not start it.
    pub fn with_config(source: Arc<dyn PipeSource>, config: &WatchConfig) -> Result<Self> {
        config.validate()?;
        let mut config = config.clone();
        config.host = normalize_host(&config.host);
        Ok(Self::build(source, config))
    }

    fn build(source: Arc<dyn PipeSource>, config: WatchConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                host: ArcSwap::from_pointee(config.host),
                read_acls: AtomicBool::new(config.read_acls),
                disposed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                lifecycle: Mutex::new(Lifecycle {
                    interval: config.refresh_interval,
                    session: None,
                }),
                retained: Mutex::new(Retained::default()),
                subscribers: Mutex::new(Vec::new()),
                channels: Mutex::new(Vec::new()),
            }),
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(PipeError::Disposed);
        }
        Ok(())
    }

    pub fn host(&self) -> String {
        self.shared.host.load().to_string()
    }

    /// Change the watched host; a running watcher restarts on the new host.
    pub fn set_host(&self, host: &str) -> Result<()> {
        self.ensure_alive()?;
        let host = normalize_host(host);

        let mut lifecycle = lock(&self.shared.lifecycle);
        if **self.shared.host.load() == host {
            return Ok(());
        }
        if lifecycle.session.is_some() {
            self.stop_locked(&mut lifecycle);
            self.shared.host.store(Arc::new(host));
            self.start_locked(&mut lifecycle)
        } else {
            self.shared.host.store(Arc::new(host));
            Ok(())
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.lifecycle).session.is_some()
    }

    pub fn set_running(&self, running: bool) -> Result<()> {
        if running {
            self.start()
        } else {
            self.stop();
            Ok(())
        }
    }

    /// Start polling; the first tick fires immediately.
    pub fn start(&self) -> Result<()> {
        self.ensure_alive()?;
        let mut lifecycle = lock(&self.shared.lifecycle);
        if lifecycle.session.is_some() {
            return Ok(());
        }
        self.start_locked(&mut lifecycle)
    }

    /// Stop polling and discard retained state.
    ///
    /// Safe to call at any time, including from a subscriber. A tick already
    /// delivering when this is called may still reach the current subscriber.
    pub fn stop(&self) {
        let mut lifecycle = lock(&self.shared.lifecycle);
        self.stop_locked(&mut lifecycle);
    }

    pub fn refresh_interval(&self) -> Duration {
        lock(&self.shared.lifecycle).interval
    }

    /// Change the polling period; a running watcher keeps its retained state.
    pub fn set_refresh_interval(&self, interval: Duration) -> Result<()> {
        self.ensure_alive()?;
        validate_interval(interval)?;

        let mut lifecycle = lock(&self.shared.lifecycle);
        if lifecycle.interval == interval {
            return Ok(());
        }
        lifecycle.interval = interval;
        if let Some(session) = lifecycle.session.as_ref() {
            debug!("[WATCHER] Re-arming timer with period {:?}", interval);
            session.ticker.rearm(interval);
        }
        Ok(())
    }

    pub fn read_acls(&self) -> bool {
        self.shared.read_acls.load(Ordering::SeqCst)
    }

    /// Takes effect on the next tick.
    pub fn set_read_acls(&self, read_acls: bool) -> Result<()> {
        self.ensure_alive()?;
        self.shared.read_acls.store(read_acls, Ordering::SeqCst);
        Ok(())
    }

    /// Id of the running session, if any.
    pub fn session(&self) -> Option<Uuid> {
        lock(&self.shared.lifecycle).session.as_ref().map(|s| s.id)
    }

    /// Register a callback for every non-empty tick batch.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&WatchBatch) + Send + Sync + 'static,
    {
        lock(&self.shared.subscribers).push(Arc::new(callback));
    }

    /// Receive tick batches over a channel, for async consumers.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<Arc<WatchBatch>> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.shared.channels).push(tx);
        rx
    }

    /// Stop for good; later configuration changes fail with `Disposed`.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop();
        lock(&self.shared.subscribers).clear();
        lock(&self.shared.channels).clear();
        debug!("[WATCHER] Disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    fn start_locked(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let id = Uuid::new_v4();
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);

        let ticker = Ticker::spawn("pipe-watcher", lifecycle.interval, move || {
            match weak.upgrade() {
                Some(shared) => shared.tick(generation, id),
                None => false,
            }
        })?;

        info!(
            "[WATCHER] Started session {} on host {} every {:?}",
            id,
            self.host(),
            lifecycle.interval
        );
        lifecycle.session = Some(Session { id, ticker });
        Ok(())
    }

    fn stop_locked(&self, lifecycle: &mut Lifecycle) {
        if let Some(session) = lifecycle.session.take() {
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            session.ticker.stop();
            // An in-flight tick holds this lock; it discards the state
            // itself once it sees the new generation.
            if let Ok(mut retained) = self.shared.retained.try_lock() {
                *retained = Retained::default();
            }
            info!("[WATCHER] Stopped session {}", session.id);
        }
    }
}

impl Shared {
    /// Drop state left behind by session `generation`, if still there.
    fn discard(retained: &mut Retained, generation: u64) {
        if retained.generation == generation {
            *retained = Retained::default();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// One poll-enumerate-diff-deliver cycle. Returns false when the session
    /// is over and the timer should end.
    fn tick(&self, generation: u64, session: Uuid) -> bool {
        if !self.is_current(generation) {
            Self::discard(&mut lock(&self.retained), generation);
            return false;
        }
        let host = self.host.load_full();
        let read_acls = self.read_acls.load(Ordering::SeqCst);
        let started = Instant::now();

        let batch = {
            let mut retained = lock(&self.retained);
            if retained.generation != generation {
                *retained = Retained {
                    generation,
                    ..Retained::default()
                };
            }
            retained.ticks += 1;
            let tick = retained.ticks;

            let outcome = self
                .source
                .pipes(&host, read_acls)
                .and_then(|pass| diff_pass(&retained.pipes, pass));

            if !self.is_current(generation) {
                // `stop` could not clear the state while this tick held it.
                Self::discard(&mut retained, generation);
                return false;
            }

            let events = match outcome {
                Ok(DiffOutcome { next, events }) => {
                    if retained.failures > 0 {
                        info!(
                            "[WATCHER] Host {} reachable again after {} failed ticks",
                            host, retained.failures
                        );
                        retained.failures = 0;
                    }
                    debug!(
                        "[WATCHER] Tick {} on {}: {} pipes, {} events in {:?}",
                        tick,
                        host,
                        next.len(),
                        events.len(),
                        started.elapsed()
                    );
                    retained.pipes = next;
                    events
                }
                Err(e) => {
                    retained.failures += 1;
                    warn!("[WATCHER] Tick {} on {} failed: {}", tick, host, e);
                    if retained.failures == 1 {
                        crate::logging::capture_error("Pipe enumeration", &e.to_string());
                    }
                    vec![WatchEvent::TickFailed {
                        host: host.to_string(),
                        error: Arc::new(e),
                    }]
                }
            };

            WatchBatch {
                session,
                tick,
                host: host.to_string(),
                events,
            }
        };

        if !batch.events.is_empty() {
            self.deliver(generation, batch);
        }
        if !self.is_current(generation) {
            // Stopped while this tick was committing.
            Self::discard(&mut lock(&self.retained), generation);
            return false;
        }
        true
    }

    fn deliver(&self, generation: u64, batch: WatchBatch) {
        let callbacks: Vec<BatchCallback> = lock(&self.subscribers).iter().cloned().collect();
        for callback in callbacks {
            if !self.is_current(generation) {
                return;
            }
            callback(&batch);
        }

        if !self.is_current(generation) {
            return;
        }
        let batch = Arc::new(batch);
        lock(&self.channels).retain(|tx| tx.send(Arc::clone(&batch)).is_ok());
    }
}

impl fmt::Display for PipeWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PipeWatcher,{} running on Host=\"{}\" each {:?}",
            if self.is_running() { "" } else { " not" },
            self.host(),
            self.refresh_interval()
        )
    }
}

impl Drop for PipeWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerator::PipeIter;
    use crate::model::{PipeSnapshot, SecurityInfo};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc as std_mpsc;
    use std::thread;

    /// Replays scripted passes; the last one repeats forever.
    struct ScriptedSource {
        passes: Mutex<VecDeque<Result<Vec<PipeSnapshot>>>>,
        last: Mutex<Vec<PipeSnapshot>>,
        hosts: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(passes: Vec<Result<Vec<PipeSnapshot>>>) -> Arc<Self> {
            Arc::new(Self {
                passes: Mutex::new(passes.into()),
                last: Mutex::new(Vec::new()),
                hosts: Mutex::new(Vec::new()),
            })
        }
    }

    impl PipeSource for ScriptedSource {
        fn pipes(&self, host: &str, _include_security: bool) -> Result<PipeIter<'_>> {
            lock(&self.hosts).push(host.to_string());
            let pipes = match lock(&self.passes).pop_front() {
                Some(Ok(pipes)) => {
                    *lock(&self.last) = pipes.clone();
                    pipes
                }
                Some(Err(e)) => return Err(e),
                None => lock(&self.last).clone(),
            };
            let pipes: Vec<PipeSnapshot> = pipes
                .into_iter()
                .map(|p| {
                    PipeSnapshot::new(
                        host,
                        p.name(),
                        p.max_connections(),
                        p.active_connections(),
                        p.security().clone(),
                    )
                })
                .collect();
            Ok(Box::new(pipes.into_iter().map(Ok)))
        }
    }

    fn pipe(name: &str, max: i32, active: u32) -> PipeSnapshot {
        PipeSnapshot::new(".", name, max, active, SecurityInfo::default())
    }

    fn unavailable() -> PipeError {
        PipeError::NamespaceUnavailable {
            host: ".".to_string(),
            code: 53,
            message: "The network path was not found.".to_string(),
        }
    }

    fn collect_batches(watcher: &PipeWatcher) -> std_mpsc::Receiver<WatchBatch> {
        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);
        watcher.subscribe(move |batch| {
            let _ = lock(&tx).send(batch.clone());
        });
        rx
    }

    fn next_batch(rx: &std_mpsc::Receiver<WatchBatch>) -> WatchBatch {
        rx.recv_timeout(Duration::from_secs(2))
            .expect("batch within timeout")
    }

    fn fast_watcher(source: Arc<ScriptedSource>) -> PipeWatcher {
        let watcher = PipeWatcher::new(source);
        watcher
            .set_refresh_interval(Duration::from_millis(20))
            .unwrap();
        watcher
    }

    #[test]
    fn starts_stopped_with_defaults() {
        let watcher = PipeWatcher::new(ScriptedSource::new(vec![]));
        assert!(!watcher.is_running());
        assert_eq!(watcher.host(), ".");
        assert_eq!(watcher.refresh_interval(), Duration::from_secs(3));
        assert!(watcher.session().is_none());
        assert_eq!(
            watcher.to_string(),
            "PipeWatcher, not running on Host=\".\" each 3s"
        );
    }

    #[test]
    fn end_to_end_scenario() {
        let source = ScriptedSource::new(vec![
            Ok(vec![pipe("foo", 10, 2), pipe("bar", -1, 0)]),
            Ok(vec![pipe("foo", 10, 3), pipe("baz", 1, 0)]),
        ]);
        let watcher = fast_watcher(source);
        let rx = collect_batches(&watcher);
        watcher.start().unwrap();

        let first = next_batch(&rx);
        assert!(first.is_initial());
        assert_eq!(
            first.events,
            vec![
                WatchEvent::Created(pipe("foo", 10, 2)),
                WatchEvent::Created(pipe("bar", -1, 0)),
            ]
        );

        let second = next_batch(&rx);
        assert_eq!(second.tick, 2);
        assert_eq!(
            second.events,
            vec![
                WatchEvent::Updated(pipe("foo", 10, 3)),
                WatchEvent::Created(pipe("baz", 1, 0)),
                WatchEvent::Deleted(pipe("bar", -1, 0)),
            ]
        );

        // Unchanged passes produce no batches.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        watcher.stop();
    }

    #[test]
    fn restart_replays_creations() {
        let source = ScriptedSource::new(vec![Ok(vec![pipe("foo", 1, 0), pipe("bar", 1, 0)])]);
        let watcher = fast_watcher(source);
        let rx = collect_batches(&watcher);

        watcher.start().unwrap();
        let first = next_batch(&rx);
        let first_session = first.session;
        assert_eq!(first.events.len(), 2);
        watcher.stop();
        assert!(!watcher.is_running());

        watcher.start().unwrap();
        let replay = next_batch(&rx);
        assert_ne!(replay.session, first_session);
        assert_eq!(
            replay.events,
            vec![
                WatchEvent::Created(pipe("foo", 1, 0)),
                WatchEvent::Created(pipe("bar", 1, 0)),
            ]
        );
        watcher.stop();
    }

    #[test]
    fn failed_tick_keeps_state_and_recovers() {
        let source = ScriptedSource::new(vec![
            Ok(vec![pipe("foo", 1, 0)]),
            Err(unavailable()),
            Ok(vec![pipe("foo", 1, 0), pipe("bar", 1, 0)]),
        ]);
        let watcher = fast_watcher(source);
        let rx = collect_batches(&watcher);
        watcher.start().unwrap();

        assert_eq!(
            next_batch(&rx).events,
            vec![WatchEvent::Created(pipe("foo", 1, 0))]
        );
        let failed = next_batch(&rx);
        assert!(matches!(
            failed.events.as_slice(),
            [WatchEvent::TickFailed { .. }]
        ));
        assert!(watcher.is_running());

        // foo survived the failure, so only bar is new.
        assert_eq!(
            next_batch(&rx).events,
            vec![WatchEvent::Created(pipe("bar", 1, 0))]
        );
        watcher.stop();
    }

    #[test]
    fn host_change_restarts_on_new_host() {
        let source = ScriptedSource::new(vec![Ok(vec![pipe("foo", 1, 0)])]);
        let watcher = fast_watcher(Arc::clone(&source));
        let rx = collect_batches(&watcher);
        watcher.start().unwrap();
        let first = next_batch(&rx);

        watcher.set_host("server01").unwrap();
        assert!(watcher.is_running());
        assert_eq!(watcher.host(), "server01");

        let replay = loop {
            let batch = next_batch(&rx);
            if batch.host == "server01" {
                break batch;
            }
        };
        assert_ne!(replay.session, first.session);
        assert_eq!(replay.events.len(), 1);
        assert_eq!(replay.events[0].action(), "created");
        assert_eq!(replay.events[0].pipe().unwrap().path(), r"\\server01\foo");
        assert!(lock(&source.hosts).iter().any(|h| h == "server01"));
        watcher.stop();
    }

    #[test]
    fn interval_change_keeps_state() {
        let source = ScriptedSource::new(vec![Ok(vec![pipe("foo", 1, 0)])]);
        let watcher = PipeWatcher::new(source);
        let rx = collect_batches(&watcher);
        watcher.start().unwrap();
        assert_eq!(next_batch(&rx).events.len(), 1);

        watcher
            .set_refresh_interval(Duration::from_millis(10))
            .unwrap();
        assert_eq!(watcher.refresh_interval(), Duration::from_millis(10));
        // Re-armed ticks see the same pipes and stay silent.
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
        watcher.stop();
    }

    #[test]
    fn invalid_interval_is_rejected() {
        let watcher = PipeWatcher::new(ScriptedSource::new(vec![]));
        assert!(matches!(
            watcher.set_refresh_interval(Duration::ZERO),
            Err(PipeError::Configuration(_))
        ));
        assert_eq!(watcher.refresh_interval(), Duration::from_secs(3));
    }

    #[test]
    fn disposed_watcher_rejects_changes() {
        let watcher = PipeWatcher::new(ScriptedSource::new(vec![]));
        watcher.dispose();
        assert!(matches!(watcher.set_host("x"), Err(PipeError::Disposed)));
        assert!(matches!(
            watcher.set_refresh_interval(Duration::from_secs(1)),
            Err(PipeError::Disposed)
        ));
        assert!(matches!(watcher.start(), Err(PipeError::Disposed)));
        watcher.stop();
        assert!(watcher.set_running(false).is_ok());
    }

    #[test]
    fn stop_from_subscriber_does_not_deadlock() {
        let source = ScriptedSource::new(vec![Ok(vec![pipe("foo", 1, 0)])]);
        let watcher = Arc::new(fast_watcher(source));
        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);
        let inner = Arc::downgrade(&watcher);
        watcher.subscribe(move |batch| {
            if let Some(watcher) = inner.upgrade() {
                watcher.stop();
            }
            let _ = lock(&tx).send(batch.tick);
        });

        watcher.start().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        assert!(!watcher.is_running());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn channel_subscribers_receive_batches() {
        let source = ScriptedSource::new(vec![Ok(vec![pipe("foo", 1, 0)])]);
        let watcher = fast_watcher(source);
        let mut rx = watcher.subscribe_channel();
        watcher.start().unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let batch = runtime
            .block_on(async { tokio::time::timeout(Duration::from_secs(2), rx.recv()).await })
            .expect("batch within timeout")
            .expect("channel open");
        assert_eq!(batch.events, vec![WatchEvent::Created(pipe("foo", 1, 0))]);
        watcher.stop();
    }

    /// Lists one pipe after a delay and records how many listings overlap.
    struct SlowSource {
        delay: Duration,
        first_is_fast: bool,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl SlowSource {
        fn new(delay: Duration, first_is_fast: bool) -> Arc<Self> {
            Arc::new(Self {
                delay,
                first_is_fast,
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            })
        }
    }

    impl PipeSource for SlowSource {
        fn pipes(&self, host: &str, _include_security: bool) -> Result<PipeIter<'_>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(running, Ordering::SeqCst);
            if !(self.first_is_fast && call == 1) {
                thread::sleep(self.delay);
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            let pipe = PipeSnapshot::new(host, "foo", 1, 0, SecurityInfo::default());
            Ok(Box::new(std::iter::once(Ok(pipe))))
        }
    }

    #[test]
    fn huge_interval_can_be_rearmed() {
        let source = ScriptedSource::new(vec![Ok(vec![pipe("foo", 1, 0)])]);
        let watcher = PipeWatcher::new(Arc::clone(&source) as Arc<dyn PipeSource>);
        watcher.start().unwrap();
        thread::sleep(Duration::from_millis(30));

        watcher.set_refresh_interval(Duration::MAX).unwrap();
        thread::sleep(Duration::from_millis(30));
        let before = lock(&source.hosts).len();

        watcher
            .set_refresh_interval(Duration::from_millis(10))
            .unwrap();
        thread::sleep(Duration::from_millis(200));
        let after = lock(&source.hosts).len();
        watcher.stop();

        assert!(after >= before + 5, "polled {} then {}", before, after);
    }

    #[test]
    fn slow_ticks_never_overlap() {
        let source = SlowSource::new(Duration::from_millis(40), false);
        let watcher = PipeWatcher::new(Arc::clone(&source) as Arc<dyn PipeSource>);
        watcher
            .set_refresh_interval(Duration::from_millis(5))
            .unwrap();
        watcher.start().unwrap();
        thread::sleep(Duration::from_millis(250));
        watcher.stop();
        thread::sleep(Duration::from_millis(60));

        assert_eq!(source.max_active.load(Ordering::SeqCst), 1);
        let calls = source.calls.load(Ordering::SeqCst);
        assert!((3..=8).contains(&calls), "polled {} times", calls);
    }

    #[test]
    fn restart_waits_for_in_flight_tick() {
        let source = SlowSource::new(Duration::from_millis(60), false);
        let watcher = PipeWatcher::new(Arc::clone(&source) as Arc<dyn PipeSource>);
        watcher
            .set_refresh_interval(Duration::from_millis(10))
            .unwrap();
        let rx = collect_batches(&watcher);

        watcher.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        watcher.stop();
        watcher.start().unwrap();
        let session = watcher.session().unwrap();
        thread::sleep(Duration::from_millis(250));
        watcher.stop();
        thread::sleep(Duration::from_millis(80));

        assert_eq!(source.max_active.load(Ordering::SeqCst), 1);
        assert!(source.calls.load(Ordering::SeqCst) >= 2);
        // The new session still starts from a clean slate.
        let replay = rx
            .try_iter()
            .find(|batch| batch.session == session)
            .expect("batch from the new session");
        assert_eq!(replay.events, vec![WatchEvent::Created(pipe("foo", 1, 0))]);
    }

    #[test]
    fn stop_during_tick_drops_retained_state() {
        let source = SlowSource::new(Duration::from_millis(100), true);
        let watcher = PipeWatcher::new(Arc::clone(&source) as Arc<dyn PipeSource>);
        watcher
            .set_refresh_interval(Duration::from_millis(20))
            .unwrap();
        watcher.start().unwrap();

        // First tick is fast, the second one is still listing at this point.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(source.active.load(Ordering::SeqCst), 1);
        watcher.stop();
        thread::sleep(Duration::from_millis(150));

        let retained = lock(&watcher.shared.retained);
        assert!(retained.pipes.is_empty());
        assert_eq!(retained.ticks, 0);
    }
}
