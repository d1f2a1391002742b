//! The progress session: owns the bar set, the render scheduler thread,
//! and shutdown coordination.

use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crossterm::tty::IsTty;

use crate::bar::{Bar, BarBuilder, BarState};
use crate::sync::SyncRegistry;
use crate::writer::{Frame, FrameWriter};

const DEFAULT_REFRESH: Duration = Duration::from_millis(150);

/// Control messages for the scheduler thread.
pub(crate) enum Event {
    Refresh,
    Cancel,
    Quiesce,
}

/// A progress session.
///
/// Bars added to a session render together, one line per bar, in a single
/// atomic frame per tick. The session terminates on its own once every
/// bar it ever held is terminal, or when its [`CancelToken`] fires.
///
/// ```
/// use desfile::Progress;
///
/// let p = Progress::new();
/// let bar = p.add_bar(100);
/// for _ in 0..100 {
///     bar.increment();
/// }
/// p.wait();
/// ```
pub struct Progress {
    shared: Arc<Shared>,
    tx: Sender<Event>,
    scheduler: Option<thread::JoinHandle<()>>,
    wait_group: Option<WaitGroup>,
}

struct Shared {
    /// Bars still in the render rotation, in render order.
    active: Mutex<Vec<Bar>>,
    /// Every bar ever added; the shutdown report is computed from this.
    roster: Mutex<Vec<Bar>>,
    next_id: AtomicU64,
    added_any: AtomicBool,
}

impl Progress {
    /// A session with default options: stderr output, 150ms refresh.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a session.
    pub fn builder() -> ProgressBuilder {
        ProgressBuilder::default()
    }

    /// Add a bar built from `builder`. Render order is insertion order
    /// unless the builder carries an explicit position.
    pub fn add(&self, builder: BarBuilder) -> Bar {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let position = builder.explicit_position();
        let bar = builder.build(id, self.tx.clone());

        {
            let mut active = self.shared.active.lock().unwrap();
            match position {
                Some(pos) => {
                    let pos = pos.min(active.len());
                    active.insert(pos, bar.clone());
                }
                None => active.push(bar.clone()),
            }
        }
        self.shared.roster.lock().unwrap().push(bar.clone());
        self.shared.added_any.store(true, Ordering::Relaxed);
        let _ = self.tx.send(Event::Refresh);
        bar
    }

    /// Shorthand for [`add`](Self::add) with a plain bar.
    pub fn add_bar(&self, total: i64) -> Bar {
        self.add(BarBuilder::new(total))
    }

    /// Trigger a render outside the periodic schedule. The only way to
    /// get a frame out of a [`manual_refresh`](ProgressBuilder::manual_refresh)
    /// session, other than bar lifecycle transitions.
    pub fn refresh(&self) {
        let _ = self.tx.send(Event::Refresh);
    }

    /// Block until the session terminates: every bar terminal (or the
    /// cancel token fired), the final frame flushed, and the shutdown
    /// notifier served. Also waits out the configured [`WaitGroup`]
    /// first, so caller-owned workers are accounted for.
    pub fn wait(mut self) {
        if let Some(wg) = self.wait_group.take() {
            wg.wait();
        }
        let _ = self.tx.send(Event::Quiesce);
        if let Some(handle) = self.scheduler.take() {
            let _ = handle.join();
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        let _ = self.tx.send(Event::Quiesce);
    }
}

/// Configuration for a [`Progress`] session.
pub struct ProgressBuilder {
    output: Option<Box<dyn Write + Send>>,
    interval: Duration,
    manual: bool,
    force: bool,
    notifier: Option<Sender<Vec<Bar>>>,
    debug: Option<Box<dyn Write + Send>>,
    wait_group: Option<WaitGroup>,
    cancel: Option<CancelToken>,
    width: Option<usize>,
}

impl Default for ProgressBuilder {
    fn default() -> Self {
        ProgressBuilder {
            output: None,
            interval: DEFAULT_REFRESH,
            manual: false,
            force: false,
            notifier: None,
            debug: None,
            wait_group: None,
            cancel: None,
            width: None,
        }
    }
}

impl ProgressBuilder {
    /// Render frames to `w` instead of stderr. A custom sink is assumed
    /// non-interactive, so rendering stays off unless
    /// [`force_auto_refresh`](Self::force_auto_refresh) is also set.
    pub fn output(mut self, w: Box<dyn Write + Send>) -> Self {
        self.output = Some(w);
        self
    }

    /// Tick period of the render loop.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Disable the periodic tick. Frames render only on
    /// [`Progress::refresh`] and on bar lifecycle transitions.
    pub fn manual_refresh(mut self) -> Self {
        self.manual = true;
        self
    }

    /// Render even when the output is not a terminal, and render
    /// immediately on bar state changes instead of waiting out the tick.
    pub fn force_auto_refresh(mut self) -> Self {
        self.force = true;
        self
    }

    /// On termination, `tx` receives every bar that ended neither
    /// completed nor aborted-and-dropped: the running and queued bars a
    /// cancellation left behind, plus aborted bars that kept their line.
    /// Natural completion delivers an empty list.
    pub fn shutdown_notifier(mut self, tx: Sender<Vec<Bar>>) -> Self {
        self.notifier = Some(tx);
        self
    }

    /// Where fatal filler errors are recorded.
    pub fn debug_output(mut self, w: Box<dyn Write + Send>) -> Self {
        self.debug = Some(w);
        self
    }

    /// Make [`Progress::wait`] also wait for `wg` to drain.
    pub fn wait_group(mut self, wg: WaitGroup) -> Self {
        self.wait_group = Some(wg);
        self
    }

    /// Attach an external cancellation signal.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Fixed frame width in columns, instead of probing the terminal.
    pub fn width(mut self, width: usize) -> Self {
        self.width = Some(width);
        self
    }

    /// Spawn the scheduler and hand back the session.
    pub fn build(self) -> Progress {
        let (tx, rx) = mpsc::channel();
        let (out, tty): (Box<dyn Write + Send>, bool) = match self.output {
            Some(w) => (w, false),
            None => {
                let tty = io::stderr().is_tty();
                (Box::new(io::stderr()), tty)
            }
        };
        if let Some(token) = &self.cancel {
            token.register(tx.clone());
        }

        let shared = Arc::new(Shared {
            active: Mutex::new(Vec::new()),
            roster: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            added_any: AtomicBool::new(false),
        });
        let scheduler = Scheduler {
            shared: Arc::clone(&shared),
            rx,
            writer: FrameWriter::new(out),
            registry: SyncRegistry::new(),
            render: tty || self.force,
            manual: self.manual,
            interval: self.interval,
            notifier: self.notifier,
            debug: self.debug,
            cancel: self.cancel,
            width: self.width,
        };
        let handle = thread::spawn(move || scheduler.run());

        Progress {
            shared,
            tx,
            scheduler: Some(handle),
            wait_group: self.wait_group,
        }
    }
}

enum Tick {
    Continue,
    Drained,
    Fatal,
}

enum Wake {
    Event(Event),
    Tick,
    Orphaned,
}

struct Scheduler {
    shared: Arc<Shared>,
    rx: Receiver<Event>,
    writer: FrameWriter<Box<dyn Write + Send>>,
    registry: SyncRegistry,
    render: bool,
    manual: bool,
    interval: Duration,
    notifier: Option<Sender<Vec<Bar>>>,
    debug: Option<Box<dyn Write + Send>>,
    cancel: Option<CancelToken>,
    width: Option<usize>,
}

impl Scheduler {
    fn run(mut self) {
        let mut quiesced = false;
        let mut fatal = false;

        loop {
            let wake = if self.manual {
                match self.rx.recv() {
                    Ok(e) => Wake::Event(e),
                    Err(_) => Wake::Orphaned,
                }
            } else {
                match self.rx.recv_timeout(self.interval) {
                    Ok(e) => Wake::Event(e),
                    Err(RecvTimeoutError::Timeout) => Wake::Tick,
                    Err(RecvTimeoutError::Disconnected) => Wake::Orphaned,
                }
            };

            let mut cancelled = false;
            match wake {
                Wake::Event(Event::Cancel) => cancelled = true,
                Wake::Event(Event::Quiesce) => quiesced = true,
                Wake::Event(Event::Refresh) | Wake::Tick => {}
                Wake::Orphaned => cancelled = true,
            }
            if let Some(token) = &self.cancel {
                cancelled |= token.is_cancelled();
            }
            if cancelled {
                break;
            }

            match self.tick(quiesced) {
                Tick::Continue => {}
                Tick::Drained => return self.terminate(),
                Tick::Fatal => {
                    fatal = true;
                    break;
                }
            }
        }

        // Draining after cancellation: one last frame, then report. A
        // fatal filler skips the flush so the output stops at the last
        // good frame.
        if !fatal {
            let _ = self.final_flush();
        }
        self.terminate();
    }

    /// One scheduler wake: resolve queue dependencies, compose and flush
    /// the frame, retire terminal bars, check for natural drain.
    fn tick(&mut self, quiesced: bool) -> Tick {
        let bars: Vec<Bar> = self.shared.active.lock().unwrap().clone();
        for b in &bars {
            b.resolve_queued();
        }

        let mut retired: HashSet<u64> = HashSet::new();
        if self.render {
            self.registry.rotate();
            let width = self.frame_width();
            let mut frame = Frame::new();

            // bars finishing this tick freeze above the live region
            for b in &bars {
                match b.state() {
                    BarState::Completed | BarState::AbortedKept => {
                        match b.render(&mut self.registry, width) {
                            Ok(line) => {
                                frame.push_frozen(&line, width);
                                retired.insert(b.id());
                            }
                            Err(e) => return self.fatal(b, e),
                        }
                    }
                    BarState::AbortedDropped => {
                        retired.insert(b.id());
                    }
                    BarState::Running | BarState::Queued => {}
                }
            }
            for b in &bars {
                if b.state().is_running() {
                    match b.render(&mut self.registry, width) {
                        Ok(line) => frame.push(&line, width),
                        Err(e) => return self.fatal(b, e),
                    }
                }
            }
            if let Err(e) = self.writer.flush_frame(&frame) {
                self.debug_log(&e);
                return Tick::Fatal;
            }
        } else {
            for b in &bars {
                if b.state().is_terminal() {
                    retired.insert(b.id());
                }
            }
        }

        let empty = {
            let mut active = self.shared.active.lock().unwrap();
            active.retain(|b| !retired.contains(&b.id()));
            active.is_empty()
        };

        if empty && (self.shared.added_any.load(Ordering::Relaxed) || quiesced) {
            Tick::Drained
        } else {
            Tick::Continue
        }
    }

    /// A filler failed: record it, force the bar out of the rotation,
    /// and bring the whole session down. A skipped line would corrupt
    /// the cursor accounting of every later frame, so there is no
    /// partial recovery.
    fn fatal(&mut self, bar: &Bar, err: io::Error) -> Tick {
        self.debug_log(&err);
        bar.abort(true);
        Tick::Fatal
    }

    fn debug_log(&mut self, err: &io::Error) {
        if let Some(dbg) = self.debug.as_mut() {
            let _ = writeln!(dbg, "{}", err);
            let _ = dbg.flush();
        }
    }

    /// The post-cancellation frame: whatever is still visible renders
    /// once more and stays on screen.
    fn final_flush(&mut self) -> io::Result<()> {
        if !self.render {
            return Ok(());
        }
        self.registry.rotate();
        let width = self.frame_width();
        let bars: Vec<Bar> = self.shared.active.lock().unwrap().clone();

        let mut frame = Frame::new();
        for b in &bars {
            match b.state() {
                BarState::Queued | BarState::AbortedDropped => {}
                _ => match b.render(&mut self.registry, width) {
                    Ok(line) => frame.push_frozen(&line, width),
                    Err(e) => {
                        self.debug_log(&e);
                        b.abort(true);
                    }
                },
            }
        }
        self.writer.flush_frame(&frame)
    }

    fn frame_width(&self) -> usize {
        self.width.unwrap_or_else(|| {
            crossterm::terminal::size()
                .map(|(cols, _)| cols as usize)
                .unwrap_or(80)
        })
    }

    /// Deliver the shutdown report and end the session.
    fn terminate(self) {
        let leftover: Vec<Bar> = self
            .shared
            .roster
            .lock()
            .unwrap()
            .iter()
            .filter(|b| {
                !matches!(
                    b.state(),
                    BarState::Completed | BarState::AbortedDropped
                )
            })
            .cloned()
            .collect();
        if let Some(notifier) = &self.notifier {
            let _ = notifier.send(leftover);
        }
    }
}

/// External cancellation signal for a session.
///
/// Cloneable; any clone may fire it, from any thread. Cancelling moves
/// the session into draining at its next wake, at the latest.
///
/// ```
/// use desfile::{CancelToken, Progress};
///
/// let token = CancelToken::new();
/// let p = Progress::builder().cancel_token(token.clone()).build();
/// let _bar = p.add_bar(0); // indeterminate, would never finish
/// token.cancel();
/// p.wait();
/// ```
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    waker: Mutex<Option<Sender<Event>>>,
}

impl CancelToken {
    /// A fresh, unfired token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        if let Some(tx) = &*self.inner.waker.lock().unwrap() {
            let _ = tx.send(Event::Cancel);
        }
    }

    /// Whether the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn register(&self, tx: Sender<Event>) {
        let mut waker = self.inner.waker.lock().unwrap();
        if self.inner.flag.load(Ordering::SeqCst) {
            let _ = tx.send(Event::Cancel);
        }
        *waker = Some(tx);
    }
}

/// Counts caller-owned work that [`Progress::wait`] must also await.
///
/// The session cannot know when worker threads that feed its bars are
/// done with their non-bar work; a wait group handed to the builder
/// closes that gap.
#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<WgInner>,
}

#[derive(Default)]
struct WgInner {
    count: Mutex<usize>,
    drained: Condvar,
}

impl WaitGroup {
    /// An empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `n` more units of work.
    pub fn add(&self, n: usize) {
        *self.inner.count.lock().unwrap() += n;
    }

    /// Mark one unit of work finished.
    pub fn done(&self) {
        let mut count = self.inner.count.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.inner.drained.notify_all();
        }
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        let mut count = self.inner.count.lock().unwrap();
        while *count > 0 {
            count = self.inner.drained.wait(count).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::Statistics;
    use crate::decor::{self, WC};
    use crate::filler::{BarFiller, FillerFn};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn quiet() -> ProgressBuilder {
        Progress::builder()
            .output(Box::new(io::sink()))
            .refresh_interval(Duration::from_millis(5))
    }

    #[test]
    fn natural_completion_reports_nothing_left() {
        let (tx, rx) = mpsc::channel();
        let p = quiet().shutdown_notifier(tx).build();
        let bar = p.add_bar(10);
        bar.increment_by(10);
        p.wait();

        let leftover = rx.recv_timeout(NOTIFY_TIMEOUT).unwrap();
        assert!(leftover.is_empty());
    }

    #[test]
    fn cancellation_delivers_unfinished_bars() {
        let (tx, rx) = mpsc::channel();
        let token = CancelToken::new();
        let p = quiet()
            .shutdown_notifier(tx)
            .cancel_token(token.clone())
            .build();
        let _never1 = p.add_bar(0);
        let _never2 = p.add_bar(0);

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            token.cancel();
        });
        p.wait();
        canceller.join().unwrap();

        let leftover = rx.recv_timeout(NOTIFY_TIMEOUT).unwrap();
        assert_eq!(leftover.len(), 2);
        assert!(leftover.iter().all(|b| b.is_running()));
    }

    #[test]
    fn fatal_filler_shuts_down_the_session() {
        let (tx, rx) = mpsc::channel();
        let debug = SharedBuf::default();
        let errors = Arc::new(AtomicUsize::new(0));

        let p = quiet()
            .force_auto_refresh()
            .width(80)
            .debug_output(Box::new(debug.clone()))
            .shutdown_notifier(tx)
            .build();

        let errors2 = Arc::clone(&errors);
        let bar = p.add(BarBuilder::new(100).middleware(
            move |mut base: Box<dyn BarFiller>| -> Box<dyn BarFiller> {
                Box::new(FillerFn(
                    move |w: &mut dyn Write, width: usize, st: &Statistics| {
                        if st.current >= 22 {
                            errors2.fetch_add(1, Ordering::SeqCst);
                            return Err(io::Error::new(io::ErrorKind::Other, "test error"));
                        }
                        base.fill(w, width, st)
                    },
                ))
            },
        ));

        let worker = {
            let bar = bar.clone();
            thread::spawn(move || {
                while bar.is_running() {
                    bar.increment();
                    thread::sleep(Duration::from_millis(2));
                }
            })
        };

        p.wait();
        worker.join().unwrap();

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(debug.contents().trim(), "test error");
        assert_eq!(bar.state(), BarState::AbortedDropped);

        let leftover = rx.recv_timeout(NOTIFY_TIMEOUT).unwrap();
        assert!(leftover.is_empty());
    }

    #[test]
    fn abort_with_drop_leaves_no_trace() {
        let (tx, rx) = mpsc::channel();
        let p = quiet().force_auto_refresh().shutdown_notifier(tx).build();
        let bar = p.add_bar(100);
        bar.increment_by(10);
        bar.abort(true);
        assert!(bar.aborted());
        p.wait();

        let leftover = rx.recv_timeout(NOTIFY_TIMEOUT).unwrap();
        assert!(leftover.is_empty());
    }

    #[test]
    fn abort_without_drop_is_reported() {
        let (tx, rx) = mpsc::channel();
        let p = quiet().force_auto_refresh().shutdown_notifier(tx).build();
        let bar = p.add_bar(100);
        bar.increment_by(10);
        bar.abort(false);
        p.wait();

        let leftover = rx.recv_timeout(NOTIFY_TIMEOUT).unwrap();
        assert_eq!(leftover.len(), 1);
        assert_eq!(leftover[0].state(), BarState::AbortedKept);
    }

    #[test]
    fn queued_bar_gates_on_dependency() {
        let (tx, rx) = mpsc::channel();
        let p = quiet().force_auto_refresh().shutdown_notifier(tx).build();
        let first = p.add_bar(10);
        let chained = p.add(BarBuilder::new(5).queue_after(&first, false));

        thread::sleep(Duration::from_millis(40));
        assert_eq!(chained.state(), BarState::Queued);

        first.increment_by(10);
        let deadline = Instant::now() + Duration::from_secs(3);
        while !chained.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(chained.is_running());

        chained.increment_by(5);
        p.wait();
        assert!(rx.recv_timeout(NOTIFY_TIMEOUT).unwrap().is_empty());
    }

    #[test]
    fn frames_reach_the_output() {
        let out = SharedBuf::default();
        let (tx, rx) = mpsc::channel();
        let p = Progress::builder()
            .output(Box::new(out.clone()))
            .force_auto_refresh()
            .refresh_interval(Duration::from_millis(5))
            .width(48)
            .shutdown_notifier(tx)
            .build();

        let a = p.add(
            BarBuilder::new(10)
                .prepend(decor::name("alpha", WC::sync(0)))
                .append(decor::percentage(WC::fixed(5))),
        );
        let b = p.add(
            BarBuilder::new(10)
                .prepend(decor::name("a-longer-name", WC::sync(0)))
                .append(decor::percentage(WC::fixed(5))),
        );

        thread::sleep(Duration::from_millis(30));
        a.increment_by(10);
        b.increment_by(10);
        p.wait();

        assert!(rx.recv_timeout(NOTIFY_TIMEOUT).unwrap().is_empty());
        let s = out.contents();
        assert!(s.contains("alpha"));
        assert!(s.contains("a-longer-name"));
        assert!(s.contains("100%"));
        assert!(s.contains('#'));
        assert!(s.contains("\x1b["));
    }

    #[test]
    fn explicit_position_renders_first() {
        let out = SharedBuf::default();
        let p = Progress::builder()
            .output(Box::new(out.clone()))
            .force_auto_refresh()
            .refresh_interval(Duration::from_secs(10))
            .width(40)
            .build();

        let first = p.add(BarBuilder::new(1).prepend(decor::name("first", WC::default())));
        let second = p.add(
            BarBuilder::new(1)
                .prepend(decor::name("second", WC::default()))
                .position(0),
        );

        // both adds trigger an immediate frame; the long interval keeps
        // further ticks out of the way while we look at the output
        thread::sleep(Duration::from_millis(100));
        let s = out.contents();
        let second_at = s.rfind("second").unwrap();
        let first_at = s.rfind("first").unwrap();
        assert!(second_at < first_at);

        first.abort(true);
        second.abort(true);
        p.wait();
    }

    #[test]
    fn manual_mode_renders_on_explicit_trigger() {
        let out = SharedBuf::default();
        let p = Progress::builder()
            .output(Box::new(out.clone()))
            .manual_refresh()
            .force_auto_refresh()
            .width(40)
            .build();

        let bar = p.add_bar(4);
        bar.increment_by(2);
        p.refresh();
        thread::sleep(Duration::from_millis(100));
        assert!(out.contents().contains('|'));

        bar.increment_by(2);
        p.wait();
    }

    #[test]
    fn wait_accounts_for_the_wait_group() {
        let wg = WaitGroup::new();
        wg.add(1);
        let finished = Arc::new(AtomicBool::new(false));

        let p = quiet().wait_group(wg.clone()).build();
        let bar = p.add_bar(1);
        bar.increment();

        let worker = {
            let finished = Arc::clone(&finished);
            let wg = wg.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                finished.store(true, Ordering::SeqCst);
                wg.done();
            })
        };

        p.wait();
        assert!(finished.load(Ordering::SeqCst));
        worker.join().unwrap();
    }
}
