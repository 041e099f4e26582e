//! Persistence seam for sample series.
//!
//! A recorder receives the full series collected so far and overwrites its
//! destination with it. Writing the same series twice leaves the same
//! contents behind, so the periodic flush and the final flush need no
//! coordination.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::convert::Infallible;
use core::fmt;
use core::time::Duration;

use crate::sample::Sample;

/// Minimum time between two periodic flushes of a running series.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

pub const CHARGE_COLUMNS: [&str; 5] = ["time", "voltage", "current", "charge", "status"];
pub const DISCHARGE_COLUMNS: [&str; 6] = [
    "time",
    "voltage",
    "current",
    "charge",
    "resistance",
    "status",
];

/// Which half of a cycle a series belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PhaseKind {
    Charge,
    Discharge,
}

impl PhaseKind {
    /// Short tag used in destination names.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            PhaseKind::Charge => "chg",
            PhaseKind::Discharge => "dis",
        }
    }

    /// Column set of the persisted table.
    #[must_use]
    pub const fn columns(self) -> &'static [&'static str] {
        match self {
            PhaseKind::Charge => &CHARGE_COLUMNS,
            PhaseKind::Discharge => &DISCHARGE_COLUMNS,
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseKind::Charge => f.write_str("charge"),
            PhaseKind::Discharge => f.write_str("discharge"),
        }
    }
}

/// Identifies one series: a phase of a 1-based cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SeriesId {
    pub phase: PhaseKind,
    pub cycle: u32,
}

impl SeriesId {
    #[must_use]
    pub const fn new(phase: PhaseKind, cycle: u32) -> Self {
        Self { phase, cycle }
    }

    #[must_use]
    pub const fn charge(cycle: u32) -> Self {
        Self::new(PhaseKind::Charge, cycle)
    }

    #[must_use]
    pub const fn discharge(cycle: u32) -> Self {
        Self::new(PhaseKind::Discharge, cycle)
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.phase.label(), self.cycle)
    }
}

/// Durable sink for sample series.
pub trait Recorder {
    type Error;
    /// Human-readable destination, printed when a phase ends.
    type Location: fmt::Display;

    /// Destination that `series` is written to.
    fn location(&self, series: SeriesId) -> Self::Location;

    /// Replaces the destination's contents with `samples`.
    fn write_series(&mut self, series: SeriesId, samples: &[Sample]) -> Result<(), Self::Error>;
}

impl<T> Recorder for &mut T
where
    T: Recorder + ?Sized,
{
    type Error = T::Error;
    type Location = T::Location;

    fn location(&self, series: SeriesId) -> Self::Location {
        (**self).location(series)
    }

    fn write_series(&mut self, series: SeriesId, samples: &[Sample]) -> Result<(), Self::Error> {
        (**self).write_series(series, samples)
    }
}

/// Keeps series in memory, counting how often each one was written.
#[derive(Clone, Debug, Default)]
pub struct MemoryRecorder {
    series: BTreeMap<SeriesId, Vec<Sample>>,
    writes: BTreeMap<SeriesId, usize>,
}

impl MemoryRecorder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            series: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Last contents written for `series`.
    #[must_use]
    pub fn series(&self, series: SeriesId) -> Option<&[Sample]> {
        self.series.get(&series).map(Vec::as_slice)
    }

    /// Number of writes received for `series`.
    #[must_use]
    pub fn writes(&self, series: SeriesId) -> usize {
        self.writes.get(&series).copied().unwrap_or(0)
    }

    /// Every series written so far, in cycle order.
    pub fn iter(&self) -> impl Iterator<Item = (SeriesId, &[Sample])> {
        self.series
            .iter()
            .map(|(series, samples)| (*series, samples.as_slice()))
    }
}

impl Recorder for MemoryRecorder {
    type Error = Infallible;
    type Location = MemoryLocation;

    fn location(&self, series: SeriesId) -> MemoryLocation {
        MemoryLocation(series)
    }

    fn write_series(&mut self, series: SeriesId, samples: &[Sample]) -> Result<(), Infallible> {
        self.series.insert(series, samples.to_vec());
        *self.writes.entry(series).or_insert(0) += 1;
        Ok(())
    }
}

/// Location reported by [`MemoryRecorder`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryLocation(pub SeriesId);

impl fmt::Display for MemoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory:{}", self.0)
    }
}
