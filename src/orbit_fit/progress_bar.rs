//! Progress reporting over the orbit-fit queue (feature `progress`).
//!
//! Components
//! -----------------
//! * [`IterTimer`] – exponential moving average of the time between two completed fits.
//! * [`fmt_dur`] – compact formatter for [`Duration`] values (`"253µs"`, `"42ms"`, `"3.14s"`).
//! * [`FitProgress`] – an `indicatif` bar shared by the fit workers.
//!
//! The EMA update rule is `ema ← α·dt + (1–α)·ema` with `α ∈ (0,1]`; the first tick
//! initializes the average.
use std::sync::Mutex;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

pub struct IterTimer {
    last: Instant,
    ema_ns: f64,
    alpha: f64,
    count: u64,
}

impl IterTimer {
    pub fn new(alpha: f64) -> Self {
        Self {
            last: Instant::now(),
            ema_ns: 0.0,
            alpha,
            count: 0,
        }
    }

    #[inline]
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let dt = now.duration_since(self.last);
        self.last = now;
        self.count += 1;

        let dt_ns = dt.as_nanos() as f64;
        self.ema_ns = if self.count == 1 {
            dt_ns
        } else {
            self.alpha * dt_ns + (1.0 - self.alpha) * self.ema_ns
        };
        dt
    }

    #[inline]
    pub fn avg(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.ema_ns as u64)
        }
    }
}

#[inline]
pub fn fmt_dur(d: Duration) -> String {
    let us = d.as_micros();
    if us < 1_000 {
        format!("{us}µs")
    } else if d.as_millis() < 1_000 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.2}s", d.as_secs_f32())
    }
}

/// Progress bar over a batch of orbit fits, safe to tick from the worker threads.
pub struct FitProgress {
    bar: ProgressBar,
    timer: Mutex<IterTimer>,
}

impl FitProgress {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new((total as u64).max(1));
        let style = ProgressStyle::with_template(
            "{bar:40.cyan/blue} {pos}/{len} ({percent:>3}%) | {per_sec} | ETA {eta_precise} | {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(200));
        FitProgress {
            bar,
            timer: Mutex::new(IterTimer::new(0.2)),
        }
    }

    /// One more trajectory fitted.
    pub fn tick(&self) {
        if let Ok(mut timer) = self.timer.lock() {
            let last = timer.tick();
            self.bar.set_message(format!(
                "last: {}, avg: {}",
                fmt_dur(last),
                fmt_dur(timer.avg())
            ));
        }
        self.bar.inc(1);
    }

    pub fn finish(&self) {
        self.bar.disable_steady_tick();
        self.bar.finish_and_clear();
    }
}
