//! Decorators: the text columns rendered on either side of the bar.
//!
//! A decorator produces one fragment of a bar's line from the tick's
//! statistics snapshot. Its [`WC`] declares how the fragment is padded:
//! to a fixed minimum width, or synchronized with every decorator across
//! all bars that shares the same group key, so columns stay aligned even
//! though bars render independently.

use std::time::Duration;

use unicode_width::UnicodeWidthStr;

use crate::bar::Statistics;
use crate::ewma::MovingAverage;
use crate::format;
use crate::sync::SyncRegistry;

/// One renderable column fragment.
pub trait Decorator: Send {
    /// Produce the fragment's text for this snapshot.
    fn decor(&mut self, stats: &Statistics) -> String;

    /// The width configuration declared at construction.
    fn wc(&self) -> WC;

    /// Receive an instrumentation sample from
    /// [`Bar::ewma_increment_by`](crate::Bar::ewma_increment_by).
    /// Decorators that don't track speed ignore it.
    fn ewma_update(&mut self, _n: i64, _dur: Duration) {}
}

/// Width configuration of a decorator.
#[derive(Debug, Clone, Copy, Default)]
pub struct WC {
    width: usize,
    sync: Option<u32>,
    left: bool,
    spacer: Option<char>,
}

impl WC {
    /// Pad to at least `width` columns.
    pub fn fixed(width: usize) -> Self {
        WC {
            width,
            ..Default::default()
        }
    }

    /// Synchronize width with every decorator sharing `key`.
    pub fn sync(key: u32) -> Self {
        WC {
            sync: Some(key),
            ..Default::default()
        }
    }

    /// Left-align within the padded width. The default is right-aligned.
    pub fn left_aligned(mut self) -> Self {
        self.left = true;
        self
    }

    /// Emit `c` in front of the fragment, outside the padded width.
    pub fn with_spacer(mut self, c: char) -> Self {
        self.spacer = Some(c);
        self
    }

    /// Pad `s` according to this config, consulting the registry for the
    /// group maximum resolved from the previous tick and recording this
    /// tick's natural width.
    pub(crate) fn apply(&self, s: String, reg: &mut SyncRegistry) -> String {
        let natural = s.as_str().width();
        let mut target = self.width.max(natural);
        if let Some(key) = self.sync {
            reg.observe(key, natural);
            target = target.max(reg.resolved(key));
        }

        let mut out = String::with_capacity(target + 1);
        if let Some(c) = self.spacer {
            out.push(c);
        }
        let pad = target - natural;
        if self.left {
            out.push_str(&s);
            out.extend(std::iter::repeat(' ').take(pad));
        } else {
            out.extend(std::iter::repeat(' ').take(pad));
            out.push_str(&s);
        }
        out
    }
}

/// How a numeric value is rendered by counting and speed decorators.
/// Picked once at construction, never dispatched per render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Unit {
    /// Plain number.
    #[default]
    Raw,
    /// Decimal byte sizes: `1.23kB`, `45.6MB`.
    Base1000,
    /// Binary byte sizes: `1.20KiB`, `45.6MiB`.
    Base1024,
}

impl Unit {
    fn format(self, v: f64) -> String {
        match self {
            Unit::Raw => format!("{:.0}", v),
            Unit::Base1000 => {
                format::format_scaled(v, 1000.0, &["B", "kB", "MB", "GB", "TB", "PB", "EB"])
            }
            Unit::Base1024 => {
                format::format_scaled(v, 1024.0, &["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"])
            }
        }
    }

    fn format_speed(self, v: f64) -> String {
        format!("{}/s", self.format(v))
    }
}

struct Name {
    label: String,
    wc: WC,
}

impl Decorator for Name {
    fn decor(&mut self, _stats: &Statistics) -> String {
        self.label.clone()
    }

    fn wc(&self) -> WC {
        self.wc
    }
}

/// A static label.
pub fn name(label: impl Into<String>, wc: WC) -> Box<dyn Decorator> {
    Box::new(Name {
        label: label.into(),
        wc,
    })
}

struct Any<F> {
    f: F,
    wc: WC,
}

impl<F> Decorator for Any<F>
where
    F: FnMut(&Statistics) -> String + Send,
{
    fn decor(&mut self, stats: &Statistics) -> String {
        (self.f)(stats)
    }

    fn wc(&self) -> WC {
        self.wc
    }
}

/// A decorator backed by a closure over the statistics snapshot.
pub fn any<F>(f: F, wc: WC) -> Box<dyn Decorator>
where
    F: FnMut(&Statistics) -> String + Send + 'static,
{
    Box::new(Any { f, wc })
}

struct Percentage {
    wc: WC,
}

impl Decorator for Percentage {
    fn decor(&mut self, stats: &Statistics) -> String {
        if stats.total <= 0 {
            return String::new();
        }
        let pct = stats.current.clamp(0, stats.total) * 100 / stats.total;
        format!("{}%", pct)
    }

    fn wc(&self) -> WC {
        self.wc
    }
}

/// Completion percentage. Empty for indeterminate bars.
pub fn percentage(wc: WC) -> Box<dyn Decorator> {
    Box::new(Percentage { wc })
}

struct Elapsed {
    wc: WC,
}

impl Decorator for Elapsed {
    fn decor(&mut self, stats: &Statistics) -> String {
        format::format_time(stats.time_elapsed.as_secs())
    }

    fn wc(&self) -> WC {
        self.wc
    }
}

/// Time since the bar started running, frozen at its final value once the
/// bar reaches a terminal state.
pub fn elapsed(wc: WC) -> Box<dyn Decorator> {
    Box::new(Elapsed { wc })
}

struct Counters {
    unit: Unit,
    wc: WC,
}

impl Decorator for Counters {
    fn decor(&mut self, stats: &Statistics) -> String {
        let cur = self.unit.format(stats.current as f64);
        if stats.total > 0 {
            format!("{}/{}", cur, self.unit.format(stats.total as f64))
        } else {
            cur
        }
    }

    fn wc(&self) -> WC {
        self.wc
    }
}

/// `current/total` counters, or just `current` for indeterminate bars.
pub fn counters(unit: Unit, wc: WC) -> Box<dyn Decorator> {
    Box::new(Counters { unit, wc })
}

struct MovingAverageSpeed {
    unit: Unit,
    average: MovingAverage,
    msg: String,
    wc: WC,
}

impl Decorator for MovingAverageSpeed {
    fn decor(&mut self, stats: &Statistics) -> String {
        if !stats.completed {
            let per_unit = self.average.value();
            let rate = if per_unit > 0.0 { 1.0 / per_unit } else { 0.0 };
            self.msg = self.unit.format_speed(rate);
        }
        self.msg.clone()
    }

    fn wc(&self) -> WC {
        self.wc
    }

    fn ewma_update(&mut self, n: i64, dur: Duration) {
        if n <= 0 {
            return;
        }
        // non-finite samples are dropped inside the average
        self.average.add(dur.as_secs_f64() / n as f64);
    }
}

/// Speed from an exponentially weighted moving average of measured
/// iteration durations. Only meaningful on bars driven through
/// [`Bar::ewma_increment_by`](crate::Bar::ewma_increment_by) or a timing
/// proxy reader. `age` is the decay window in samples; pass `0.0` for the
/// default. The last value is redisplayed, not recomputed, once the bar
/// completes.
pub fn ewma_speed(unit: Unit, age: f64, wc: WC) -> Box<dyn Decorator> {
    Box::new(MovingAverageSpeed {
        unit,
        average: MovingAverage::with_age(age),
        msg: unit.format_speed(0.0),
        wc,
    })
}

struct AverageSpeed {
    unit: Unit,
    msg: String,
    wc: WC,
}

impl Decorator for AverageSpeed {
    fn decor(&mut self, stats: &Statistics) -> String {
        if !stats.completed {
            let secs = stats.time_elapsed.as_secs_f64();
            let rate = if secs > 0.0 {
                stats.current as f64 / secs
            } else {
                0.0
            };
            self.msg = self.unit.format_speed(rate);
        }
        self.msg.clone()
    }

    fn wc(&self) -> WC {
        self.wc
    }
}

/// Cumulative average speed: `current` over time elapsed since the bar
/// started. Freezes like [`ewma_speed`] on completion.
pub fn average_speed(unit: Unit, wc: WC) -> Box<dyn Decorator> {
    Box::new(AverageSpeed {
        unit,
        msg: unit.format_speed(0.0),
        wc,
    })
}

struct OnComplete {
    inner: Box<dyn Decorator>,
    msg: String,
}

impl Decorator for OnComplete {
    fn decor(&mut self, stats: &Statistics) -> String {
        if stats.completed {
            self.msg.clone()
        } else {
            self.inner.decor(stats)
        }
    }

    fn wc(&self) -> WC {
        self.inner.wc()
    }

    fn ewma_update(&mut self, n: i64, dur: Duration) {
        self.inner.ewma_update(n, dur);
    }
}

/// Swap `inner`'s output for a fixed message once the bar completes.
/// Inherits `inner`'s width config, so the column stays aligned.
pub fn on_complete(inner: Box<dyn Decorator>, msg: impl Into<String>) -> Box<dyn Decorator> {
    Box::new(OnComplete {
        inner,
        msg: msg.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(current: i64, total: i64, completed: bool) -> Statistics {
        Statistics {
            id: 0,
            current,
            total,
            completed,
            aborted: false,
            refill: false,
            time_elapsed: Duration::from_secs(8),
        }
    }

    #[test]
    fn percentage_text() {
        let mut d = percentage(WC::default());
        assert_eq!(d.decor(&stats(22, 100, false)), "22%");
        assert_eq!(d.decor(&stats(100, 100, true)), "100%");
        assert_eq!(d.decor(&stats(5, 0, false)), "");
    }

    #[test]
    fn counters_text() {
        let mut d = counters(Unit::Base1024, WC::default());
        assert_eq!(d.decor(&stats(2048, 4096, false)), "2.00KiB/4.00KiB");
        let mut d = counters(Unit::Raw, WC::default());
        assert_eq!(d.decor(&stats(7, 0, false)), "7");
    }

    #[test]
    fn fixed_width_pads_right_aligned() {
        let mut reg = SyncRegistry::new();
        let wc = WC::fixed(5);
        assert_eq!(wc.apply("42%".into(), &mut reg), "  42%");
        assert_eq!(wc.apply("42%".into(), &mut reg).len(), 5);
    }

    #[test]
    fn sync_groups_align_across_members() {
        let mut reg = SyncRegistry::new();
        let wc = WC::sync(3);

        // warm-up tick establishes the group maximum
        reg.rotate();
        wc.apply("ab".into(), &mut reg);
        wc.apply("abcdef".into(), &mut reg);

        reg.rotate();
        let a = wc.apply("ab".into(), &mut reg);
        let b = wc.apply("abcdef".into(), &mut reg);
        assert_eq!(a.len(), b.len());
        assert_eq!(a, "    ab");

        // unchanged content renders identically on the next tick
        reg.rotate();
        assert_eq!(wc.apply("ab".into(), &mut reg), a);
        assert_eq!(wc.apply("abcdef".into(), &mut reg), b);
    }

    #[test]
    fn single_member_group_pads_against_itself() {
        let mut reg = SyncRegistry::new();
        let wc = WC::sync(9);
        reg.rotate();
        assert_eq!(wc.apply("solo".into(), &mut reg), "solo");
        reg.rotate();
        assert_eq!(wc.apply("solo".into(), &mut reg), "solo");
    }

    #[test]
    fn spacer_and_left_alignment() {
        let mut reg = SyncRegistry::new();
        let wc = WC::fixed(4).left_aligned().with_spacer(' ');
        assert_eq!(wc.apply("ab".into(), &mut reg), " ab  ");
    }

    #[test]
    fn on_complete_swaps_message() {
        let mut d = on_complete(percentage(WC::fixed(5)), "done");
        assert_eq!(d.decor(&stats(50, 100, false)), "50%");
        assert_eq!(d.decor(&stats(100, 100, true)), "done");
    }

    #[test]
    fn ewma_speed_freezes_on_completion() {
        let mut d = ewma_speed(Unit::Raw, 0.0, WC::default());
        // 10 units taking 1s each -> 1 unit per second
        for _ in 0..5 {
            d.ewma_update(10, Duration::from_secs(10));
        }
        let live = d.decor(&stats(50, 100, false));
        assert_eq!(live, "1/s");

        let frozen = d.decor(&stats(100, 100, true));
        assert_eq!(frozen, live);
        // later samples must not disturb the frozen message
        d.ewma_update(10, Duration::from_secs(1));
        assert_eq!(d.decor(&stats(100, 100, true)), frozen);
    }

    #[test]
    fn ewma_speed_discards_degenerate_samples() {
        let mut d = ewma_speed(Unit::Raw, 0.0, WC::default());
        d.ewma_update(0, Duration::from_secs(1));
        assert_eq!(d.decor(&stats(1, 100, false)), "0/s");
    }

    #[test]
    fn average_speed_from_elapsed() {
        let mut d = average_speed(Unit::Raw, WC::default());
        // stats() uses 8s elapsed
        assert_eq!(d.decor(&stats(16, 100, false)), "2/s");
    }
}
