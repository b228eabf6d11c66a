//! Tempo state and timer bookkeeping for the interval, beat and keepalive drivers.
//!
//! The engine never sleeps. It hands out `TimerHandle`s for the host to schedule and
//! accepts a firing only if the handle is still the live one for its kind.

use std::time::Duration;

/// Keepalive driver period, and the idle time after which a keepalive is sent.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(3000);

/// Tempo as set by the server's config-change message. Zero means not yet known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TempoState {
    pub bpm: u16,
    pub bpi: u16,
    /// Beat within the current interval; `None` until the first interval starts.
    pub current_beat: Option<u16>,
}

impl TempoState {
    pub fn interval_duration(&self) -> Option<Duration> {
        interval_duration(self.bpm, self.bpi)
    }

    pub fn beat_duration(&self) -> Option<Duration> {
        seconds_per_beat(self.bpm).map(Duration::from_secs_f64)
    }
}

fn seconds_per_beat(bpm: u16) -> Option<f64> {
    (bpm != 0).then(|| 60.0 / f64::from(bpm))
}

/// Length of one interval: `60 / bpm * bpi` seconds. `None` if either is zero.
pub fn interval_duration(bpm: u16, bpi: u16) -> Option<Duration> {
    if bpi == 0 {
        return None;
    }
    seconds_per_beat(bpm).map(|spb| Duration::from_secs_f64(spb * f64::from(bpi)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Interval,
    Beat,
    Keepalive,
}

/// One scheduled firing. Generations never repeat within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    pub kind: TimerKind,
    pub generation: u64,
}

/// The live handle for each timer kind.
#[derive(Debug, Default)]
pub struct Timers {
    next_generation: u64,
    interval: Option<TimerHandle>,
    beat: Option<TimerHandle>,
    keepalive: Option<TimerHandle>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<TimerHandle> {
        match kind {
            TimerKind::Interval => &mut self.interval,
            TimerKind::Beat => &mut self.beat,
            TimerKind::Keepalive => &mut self.keepalive,
        }
    }

    /// Make a new live handle for `kind`. The caller must cancel any previous handle
    /// (see `disarm`) if it was still scheduled.
    pub fn arm(&mut self, kind: TimerKind) -> TimerHandle {
        self.next_generation += 1;
        let handle = TimerHandle {
            kind,
            generation: self.next_generation,
        };
        *self.slot(kind) = Some(handle);
        handle
    }

    pub fn disarm(&mut self, kind: TimerKind) -> Option<TimerHandle> {
        self.slot(kind).take()
    }

    /// Disarm every kind; returns the handles that were live so they can be cancelled.
    pub fn disarm_all(&mut self) -> Vec<TimerHandle> {
        [TimerKind::Interval, TimerKind::Beat, TimerKind::Keepalive]
            .into_iter()
            .filter_map(|k| self.disarm(k))
            .collect()
    }

    pub fn is_live(&self, handle: TimerHandle) -> bool {
        self.live(handle.kind) == Some(handle)
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.live(kind).is_some()
    }

    fn live(&self, kind: TimerKind) -> Option<TimerHandle> {
        match kind {
            TimerKind::Interval => self.interval,
            TimerKind::Beat => self.beat,
            TimerKind::Keepalive => self.keepalive,
        }
    }
}
