//! A single trackable unit of work: counters, lifecycle state machine,
//! decorator wiring, and the per-tick line renderer.

use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use strum::EnumIs;
use unicode_width::UnicodeWidthStr;

use crate::decor::Decorator;
use crate::filler::{BarFiller, Middleware, StyleFiller};
use crate::iter::BarIter;
use crate::progress::Event;
use crate::reader::ProxyReader;
use crate::style::Style;
use crate::sync::SyncRegistry;

/// Lifecycle of a bar.
///
/// Transitions are monotone: `Queued` may become `Running` or abort,
/// `Running` may complete or abort, and the three terminal states are
/// final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIs)]
pub enum BarState {
    /// Waiting on the bar it was queued after; excluded from rendering.
    Queued,
    /// Live: counted, rendered every tick.
    Running,
    /// Reached its total.
    Completed,
    /// Aborted; its line vanishes from the next frame.
    AbortedDropped,
    /// Aborted; its final line stays on screen.
    AbortedKept,
}

impl BarState {
    /// Whether the state is final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BarState::Completed | BarState::AbortedDropped | BarState::AbortedKept
        )
    }
}

/// Immutable statistics snapshot handed to fillers and decorators.
///
/// All decorators of one bar see the same snapshot within a render, even
/// though the counters may move again immediately afterwards.
#[derive(Debug, Clone, Copy)]
pub struct Statistics {
    /// Creation-ordered bar identity.
    pub id: u64,
    /// Counter value at snapshot time.
    pub current: i64,
    /// Target value; zero or negative means indeterminate.
    pub total: i64,
    /// The bar reached its total.
    pub completed: bool,
    /// The bar was aborted, dropped or kept.
    pub aborted: bool,
    /// A refill watermark is set (resumed work).
    pub refill: bool,
    /// Time since the bar started running, frozen at its terminal
    /// transition.
    pub time_elapsed: Duration,
}

struct Clock {
    state: BarState,
    started: Option<Instant>,
    stopped: Option<Instant>,
}

struct RenderChain {
    prepend: Vec<Box<dyn Decorator>>,
    append: Vec<Box<dyn Decorator>>,
    filler: Box<dyn BarFiller>,
}

pub(crate) struct BarInner {
    id: u64,
    total: i64,
    current: AtomicI64,
    refill: AtomicI64,
    finished: AtomicBool,
    clock: Mutex<Clock>,
    done: Condvar,
    chain: Mutex<RenderChain>,
    after: Option<(Bar, bool)>,
    nudge: Mutex<Sender<Event>>,
    created: Instant,
}

/// A progress bar handle. Cheap to clone; every clone addresses the same
/// bar, so it can be moved freely into worker threads.
#[derive(Clone)]
pub struct Bar {
    inner: Arc<BarInner>,
}

impl Bar {
    /// Creation-ordered identity, also the default render order.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The target value. Zero or negative means indeterminate.
    pub fn total(&self) -> i64 {
        self.inner.total
    }

    /// Counter value right now. Another thread may move it immediately.
    pub fn current(&self) -> i64 {
        self.inner.current.load(Ordering::Relaxed)
    }

    /// Advance by one step.
    pub fn increment(&self) {
        self.increment_by(1);
    }

    /// Advance by `n` steps. Clamped to the total; once `current` reaches
    /// a positive total the bar completes and its waiters wake. No effect
    /// on a terminal bar.
    pub fn increment_by(&self, n: i64) {
        if self.inner.finished.load(Ordering::Relaxed) {
            return;
        }
        if self.inner.bump(n) {
            self.inner.finish(BarState::Completed);
        }
    }

    /// Set the counter outright. The only sanctioned way to move a counter
    /// backwards. Clamped to `[0, total]` for determinate bars; completes
    /// the bar when it lands on the total.
    pub fn set_current(&self, v: i64) {
        if self.inner.finished.load(Ordering::Relaxed) {
            return;
        }
        let v = if self.inner.total > 0 {
            v.clamp(0, self.inner.total)
        } else {
            v.max(0)
        };
        self.inner.current.store(v, Ordering::Relaxed);
        if self.inner.total > 0 && v == self.inner.total {
            self.inner.finish(BarState::Completed);
        }
    }

    /// Advance by `n` and feed the measured duration to every decorator
    /// tracking a moving average. The derived per-unit sample is discarded
    /// when it isn't finite. No effect on a terminal bar.
    pub fn ewma_increment_by(&self, n: i64, dur: Duration) {
        if self.inner.finished.load(Ordering::Relaxed) {
            return;
        }
        let reached = self.inner.bump(n);
        if n > 0 {
            let mut chain = self.inner.chain.lock().unwrap();
            let RenderChain {
                prepend, append, ..
            } = &mut *chain;
            for d in prepend.iter_mut().chain(append.iter_mut()) {
                d.ewma_update(n, dur);
            }
        }
        if reached {
            self.inner.finish(BarState::Completed);
        }
    }

    /// Abort the bar. `drop` decides whether its line vanishes from the
    /// next frame or stays frozen on screen. Idempotent: a second call,
    /// or an abort after completion, is a no-op.
    pub fn abort(&self, drop: bool) {
        let state = if drop {
            BarState::AbortedDropped
        } else {
            BarState::AbortedKept
        };
        self.inner.finish(state);
    }

    /// Block until the bar reaches a terminal state. Any number of
    /// threads may wait; all of them wake on the terminal transition.
    pub fn wait(&self) {
        let mut clock = self.inner.clock.lock().unwrap();
        while !clock.state.is_terminal() {
            clock = self.inner.done.wait(clock).unwrap();
        }
    }

    /// The bar is live: neither queued nor terminal.
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// The bar reached its total.
    pub fn completed(&self) -> bool {
        self.state().is_completed()
    }

    /// The bar was aborted, dropped or kept.
    pub fn aborted(&self) -> bool {
        matches!(
            self.state(),
            BarState::AbortedDropped | BarState::AbortedKept
        )
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BarState {
        self.inner.clock.lock().unwrap().state
    }

    /// Mark `n` units as already present before this run (a resumed
    /// download, say). Surfaced to fillers as [`Statistics::refill`].
    pub fn set_refill(&self, n: i64) {
        self.inner.refill.store(n.max(0), Ordering::Relaxed);
    }

    /// Wrap a readable stream so that every byte read advances this bar.
    /// With `with_timing`, each read's wall-clock duration also feeds the
    /// bar's moving-average decorators.
    pub fn wrap_read<R: Read>(&self, stream: R, with_timing: bool) -> ProxyReader<R> {
        ProxyReader::new(self.clone(), stream, with_timing)
    }

    /// Wrap an iterator so that every yielded item advances this bar.
    pub fn wrap_iter<I: Iterator>(&self, iter: I) -> BarIter<I> {
        BarIter::new(self.clone(), iter)
    }

    /// Move a queued bar along once its dependency has resolved. Called
    /// by the scheduler at the start of every tick.
    pub(crate) fn resolve_queued(&self) {
        if !self.state().is_queued() {
            return;
        }
        let Some((dep, drop_on_abort)) = &self.inner.after else {
            return;
        };
        match dep.state() {
            BarState::Completed => self.inner.start(),
            BarState::AbortedDropped | BarState::AbortedKept => self.abort(*drop_on_abort),
            _ => {}
        }
    }

    /// Render this bar's line for the current tick. Decorator fragments
    /// are padded through the registry; the filler gets whatever width is
    /// left. A filler failure propagates and is fatal to the session.
    pub(crate) fn render(&self, reg: &mut SyncRegistry, width: usize) -> io::Result<String> {
        let mut chain = self.inner.chain.lock().unwrap();
        let stats = self.inner.snapshot();

        let mut left = String::new();
        for d in chain.prepend.iter_mut() {
            let raw = d.decor(&stats);
            left.push_str(&d.wc().apply(raw, reg));
        }
        let mut right = String::new();
        for d in chain.append.iter_mut() {
            let raw = d.decor(&stats);
            right.push_str(&d.wc().apply(raw, reg));
        }

        let room = width.saturating_sub(left.as_str().width() + right.as_str().width());
        let mut body = Vec::new();
        chain.filler.fill(&mut body, room, &stats)?;

        let mut line = left;
        line.push_str(&String::from_utf8_lossy(&body));
        line.push_str(&right);
        Ok(line)
    }

    #[cfg(test)]
    pub(crate) fn detached(total: i64) -> Bar {
        let (tx, _rx) = std::sync::mpsc::channel();
        BarBuilder::new(total).build(0, tx)
    }
}

impl fmt::Debug for Bar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bar")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("current", &self.current())
            .field("total", &self.total())
            .finish()
    }
}

impl BarInner {
    /// CAS-advance `current` by `n`, clamped to `[0, total]` for
    /// determinate bars. Returns whether the total was reached.
    fn bump(&self, n: i64) -> bool {
        let mut cur = self.current.load(Ordering::Relaxed);
        loop {
            let mut next = cur.saturating_add(n);
            if next < 0 {
                next = 0;
            }
            if self.total > 0 && next > self.total {
                next = self.total;
            }
            match self
                .current
                .compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return self.total > 0 && next == self.total,
                Err(seen) => cur = seen,
            }
        }
    }

    /// One-shot terminal transition; wakes waiters and nudges the
    /// scheduler. Later calls with any terminal state are no-ops.
    fn finish(&self, terminal: BarState) {
        {
            let mut clock = self.clock.lock().unwrap();
            if clock.state.is_terminal() {
                return;
            }
            let now = Instant::now();
            clock.state = terminal;
            clock.stopped = Some(now);
            if clock.started.is_none() {
                clock.started = Some(now);
            }
            self.finished.store(true, Ordering::Relaxed);
            self.done.notify_all();
        }
        let _ = self.nudge.lock().unwrap().send(Event::Refresh);
    }

    /// `Queued` -> `Running`; starts the bar's clock.
    fn start(&self) {
        {
            let mut clock = self.clock.lock().unwrap();
            if !clock.state.is_queued() {
                return;
            }
            clock.state = BarState::Running;
            clock.started = Some(Instant::now());
        }
        let _ = self.nudge.lock().unwrap().send(Event::Refresh);
    }

    fn snapshot(&self) -> Statistics {
        let clock = self.clock.lock().unwrap();
        let started = clock.started.unwrap_or(self.created);
        let end = clock.stopped.unwrap_or_else(Instant::now);
        Statistics {
            id: self.id,
            current: self.current.load(Ordering::Relaxed),
            total: self.total,
            completed: clock.state.is_completed(),
            aborted: matches!(
                clock.state,
                BarState::AbortedDropped | BarState::AbortedKept
            ),
            refill: self.refill.load(Ordering::Relaxed) > 0,
            time_elapsed: end.saturating_duration_since(started),
        }
    }
}

/// Everything a bar is born with. Consumed by [`Progress::add`](crate::Progress::add).
///
/// ```
/// use desfile::{BarBuilder, Progress, Style};
/// use desfile::decor::{self, WC};
///
/// let p = Progress::new();
/// let bar = p.add(
///     BarBuilder::new(64)
///         .style(Style::Block)
///         .prepend(decor::name("copying", WC::fixed(10)))
///         .append(decor::on_complete(decor::percentage(WC::fixed(5)), "done")),
/// );
/// for _ in 0..64 {
///     bar.increment();
/// }
/// p.wait();
/// ```
pub struct BarBuilder {
    total: i64,
    prepend: Vec<Box<dyn Decorator>>,
    append: Vec<Box<dyn Decorator>>,
    filler: Box<dyn BarFiller>,
    middleware: Vec<Middleware>,
    after: Option<(Bar, bool)>,
    position: Option<usize>,
}

impl BarBuilder {
    /// A bar aiming for `total` steps; zero or negative means
    /// indeterminate (never auto-completes).
    pub fn new(total: i64) -> Self {
        BarBuilder {
            total,
            prepend: Vec::new(),
            append: Vec::new(),
            filler: Box::new(StyleFiller::new(Style::default())),
            middleware: Vec::new(),
            after: None,
            position: None,
        }
    }

    /// Add a decorator to the left of the bar. Order of calls is the
    /// column order.
    pub fn prepend(mut self, d: Box<dyn Decorator>) -> Self {
        self.prepend.push(d);
        self
    }

    /// Add a decorator to the right of the bar.
    pub fn append(mut self, d: Box<dyn Decorator>) -> Self {
        self.append.push(d);
        self
    }

    /// Use the stock filler with the given fill pattern.
    pub fn style(mut self, style: Style) -> Self {
        self.filler = Box::new(StyleFiller::new(style));
        self
    }

    /// Replace the filler wholesale.
    pub fn filler(mut self, f: Box<dyn BarFiller>) -> Self {
        self.filler = f;
        self
    }

    /// Wrap the filler. Middlewares apply in the order given; the last
    /// one added becomes the outermost layer. The chain is preserved
    /// exactly as constructed.
    pub fn middleware<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Box<dyn BarFiller>) -> Box<dyn BarFiller> + 'static,
    {
        self.middleware.push(Box::new(f));
        self
    }

    /// Keep this bar `Queued` until `dep` is terminal. When `dep`
    /// completes, this bar starts running; when `dep` aborts, this bar
    /// aborts without ever starting, dropped or kept according to
    /// `drop_if_dependency_aborts`.
    pub fn queue_after(mut self, dep: &Bar, drop_if_dependency_aborts: bool) -> Self {
        self.after = Some((dep.clone(), drop_if_dependency_aborts));
        self
    }

    /// Render position among live bars; defaults to insertion order.
    pub fn position(mut self, pos: usize) -> Self {
        self.position = Some(pos);
        self
    }

    pub(crate) fn explicit_position(&self) -> Option<usize> {
        self.position
    }

    pub(crate) fn build(self, id: u64, nudge: Sender<Event>) -> Bar {
        let mut filler = self.filler;
        for m in self.middleware {
            filler = m(filler);
        }
        let state = if self.after.is_some() {
            BarState::Queued
        } else {
            BarState::Running
        };
        let now = Instant::now();
        Bar {
            inner: Arc::new(BarInner {
                id,
                total: self.total,
                current: AtomicI64::new(0),
                refill: AtomicI64::new(0),
                finished: AtomicBool::new(false),
                clock: Mutex::new(Clock {
                    state,
                    started: (state == BarState::Running).then_some(now),
                    stopped: None,
                }),
                done: Condvar::new(),
                chain: Mutex::new(RenderChain {
                    prepend: self.prepend,
                    append: self.append,
                    filler,
                }),
                after: self.after,
                nudge: Mutex::new(nudge),
                created: now,
            }),
        }
    }
}
