#![warn(missing_docs)]

//! desfile renders many concurrently-updating progress bars in one
//! terminal frame: one line per bar, top to bottom, redrawn atomically on
//! every tick so the output never tears, no matter how many threads are
//! hammering the counters.
//!
//! desfile means parade in Spanish: a column of marchers advancing in
//! step, which is also a fair description of the output.
//!
//! # Progress and bars
//!
//! A [`Progress`] session owns the render loop; [`Bar`]s are cheap
//! cloneable handles you move into worker threads:
//!
//! ```
//! use desfile::Progress;
//!
//! let p = Progress::new();
//! let bar = p.add_bar(300);
//!
//! std::thread::scope(|t| {
//!     for _ in 0..3 {
//!         t.spawn(|| {
//!             for _ in 0..100 {
//!                 // ... a unit of work ...
//!                 bar.increment();
//!             }
//!         });
//!     }
//! });
//! p.wait();
//! ```
//!
//! # Decorators and column alignment
//!
//! Decorators render the text on either side of the bar. A decorator
//! sharing a sync group key with decorators on other bars is padded to
//! the group's widest member, so columns line up across bars that know
//! nothing about each other:
//!
//! ```
//! use desfile::{BarBuilder, Progress};
//! use desfile::decor::{self, WC};
//!
//! let p = Progress::new();
//! let bars: Vec<_> = ["fetch", "unpack", "install"]
//!     .into_iter()
//!     .map(|label| {
//!         p.add(
//!             BarBuilder::new(20)
//!                 .prepend(decor::name(label, WC::sync(0)))
//!                 .append(decor::percentage(WC::fixed(5))),
//!         )
//!     })
//!     .collect();
//! for bar in &bars {
//!     for _ in 0..20 {
//!         bar.increment();
//!     }
//! }
//! p.wait();
//! ```
//!
//! # Sequencing, cancellation, instrumentation
//!
//! * [`BarBuilder::queue_after`] keeps a bar parked until another bar
//!   finishes, so phases render as one group but run in order.
//! * A [`CancelToken`] drains the whole session early; the
//!   [`shutdown_notifier`](ProgressBuilder::shutdown_notifier) reports
//!   which bars never finished.
//! * [`Bar::wrap_read`] instruments any [`std::io::Read`] so byte counts
//!   (and optionally per-read timings, for the
//!   [`decor::ewma_speed`] decorator) flow into the bar automatically.
//!
//! # Behaviors
//!
//! - Counter updates are lock-free and never wait on the render loop.
//! - A bar reaching its total completes itself and wakes its waiters.
//! - Finished bars leave their last line frozen on screen; bars aborted
//!   with `drop` vanish from the next frame.
//! - A filler error is fatal to the session: the output stops at the
//!   last good frame rather than rendering a torn one.

pub mod bar;
pub mod decor;
pub mod filler;
pub mod iter;
pub mod progress;
pub mod reader;
pub mod style;

mod ewma;
mod format;
mod sync;
mod writer;

#[doc(inline)]
pub use bar::{Bar, BarBuilder, BarState, Statistics};
#[doc(inline)]
pub use filler::{BarFiller, FillerFn, StyleFiller};
#[doc(inline)]
pub use iter::BarIter;
#[doc(inline)]
pub use progress::{CancelToken, Progress, ProgressBuilder, WaitGroup};
#[doc(inline)]
pub use reader::ProxyReader;
#[doc(inline)]
pub use style::Style;
