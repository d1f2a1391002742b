//! Bar fillers: the pluggable renderers for the bar segment of a line.

use std::io::{self, Write};

use crate::bar::Statistics;
use crate::style::Style;

/// Renders the bar segment of one line from a statistics snapshot.
///
/// A filler may fail; a failure is fatal to the owning
/// [`Progress`](crate::Progress) session, since skipping a line would
/// desynchronize the frame writer's cursor accounting for every frame
/// after it.
pub trait BarFiller: Send {
    /// Write the bar segment, at most `width` columns wide, to `w`.
    fn fill(&mut self, w: &mut dyn Write, width: usize, stats: &Statistics) -> io::Result<()>;
}

/// Adapts a closure into a [`BarFiller`].
///
/// Useful together with [`BarBuilder::middleware`](crate::BarBuilder::middleware)
/// to wrap the stock filler with extra behavior:
///
/// ```
/// use std::io::Write;
/// use desfile::{BarBuilder, BarFiller, FillerFn, Progress, Statistics};
///
/// let p = Progress::new();
/// let bar = p.add(BarBuilder::new(10).middleware(
///     |mut base: Box<dyn BarFiller>| -> Box<dyn BarFiller> {
///         Box::new(FillerFn(
///             move |w: &mut dyn Write, width: usize, stats: &Statistics| {
///                 // intercept or augment here, then delegate
///                 base.fill(w, width, stats)
///             },
///         ))
///     },
/// ));
/// for _ in 0..10 {
///     bar.increment();
/// }
/// p.wait();
/// ```
pub struct FillerFn<F>(pub F);

impl<F> BarFiller for FillerFn<F>
where
    F: FnMut(&mut dyn Write, usize, &Statistics) -> io::Result<()> + Send,
{
    fn fill(&mut self, w: &mut dyn Write, width: usize, stats: &Statistics) -> io::Result<()> {
        (self.0)(w, width, stats)
    }
}

/// A filler middleware: wraps a base filler and owns the delegation.
pub(crate) type Middleware = Box<dyn FnOnce(Box<dyn BarFiller>) -> Box<dyn BarFiller>>;

/// The stock filler: `|` + filled cells + one ramp cell + background + `|`.
pub struct StyleFiller {
    background: char,
    ramp: Vec<char>,
}

impl StyleFiller {
    /// Build a filler from a fill pattern.
    pub fn new(style: Style) -> Self {
        let (background, ramp) = style.cells();
        StyleFiller { background, ramp }
    }
}

impl BarFiller for StyleFiller {
    fn fill(&mut self, w: &mut dyn Write, width: usize, stats: &Statistics) -> io::Result<()> {
        let limit = width.saturating_sub(2);
        if limit == 0 {
            return Ok(());
        }

        let fraction = if stats.total > 0 {
            (stats.current as f64 / stats.total as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let m = self.ramp.len();
        let n = (limit as f64 * fraction * m as f64) as usize;
        let filled = n / m;
        let full = *self.ramp.last().unwrap();

        let mut cells = full.to_string().repeat(filled);
        if filled < limit {
            cells.push(self.ramp[n % m]);
        }
        let used = (filled + 1).min(limit);
        for _ in used..limit {
            cells.push(self.background);
        }

        write!(w, "|{}|", cells)
    }
}
