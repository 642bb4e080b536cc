use crate::Frame;

use super::interpolate::{Framed, Interpolate};

pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 64;

/// Why a snapshot lookup could not produce a state.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum SnapshotMiss {
    #[error("snapshot ring is empty")]
    Empty,
    #[error("frame {query} has aged out of the ring (oldest valid {oldest_valid})")]
    AgedOut { query: f64, oldest_valid: Frame },
    #[error("frame {query} is newer than every snapshot (latest valid {from}); extrapolation unsupported")]
    Extrapolation { query: f64, from: Frame },
    #[error("frame {query} is older than every snapshot (oldest valid {to}); extrapolation unsupported")]
    InverseExtrapolation { query: f64, to: Frame },
    #[error("no valid snapshot for frame {query}")]
    NoValidSnapshot { query: f64 },
}

/// The pair of ring entries that bracket a query.
#[derive(Debug)]
pub enum Bracket<'a, S> {
    Exact(&'a S),
    Between { from: &'a S, to: &'a S, t: f32 },
}

/// Fixed-capacity ring of snapshots keyed by the frame embedded in each one.
#[derive(Debug)]
pub struct SnapshotRing<S> {
    slots: Vec<Option<S>>,
    capacity: usize,
    latest_frame: Option<Frame>,
}

impl<S: Framed> SnapshotRing<S> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "snapshot ring needs at least one slot");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            capacity,
            latest_frame: None,
        }
    }

    /// Stores `snapshot` in the slot for its own frame. Returns `true` when
    /// that frame was not already present.
    pub fn set(&mut self, snapshot: S) -> bool {
        let frame = snapshot.frame();
        let index = self.index(frame);
        let is_new = !self.slots[index]
            .as_ref()
            .is_some_and(|s| s.frame() == frame);

        self.slots[index] = Some(snapshot);
        self.latest_frame = Some(self.latest_frame.map_or(frame, |latest| latest.max(frame)));
        is_new
    }

    /// Exact lookup; `None` when the slot is empty or owned by another frame.
    pub fn get_frame(&self, frame: Frame) -> Option<&S> {
        self.slots[self.index(frame)]
            .as_ref()
            .filter(|s| s.frame() == frame)
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.latest_frame
    }

    pub fn latest(&self) -> Option<&S> {
        self.latest_frame.and_then(|frame| self.get_frame(frame))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.latest_frame = None;
    }

    fn index(&self, frame: Frame) -> usize {
        frame as usize % self.capacity
    }

    /// Finds the nearest valid snapshots at or below and at or above the
    /// (possibly fractional) frame `query`.
    pub fn lookup(&self, query: f64) -> Result<Bracket<'_, S>, SnapshotMiss> {
        let Some(latest) = self.latest_frame else {
            return Err(SnapshotMiss::Empty);
        };
        if !query.is_finite() {
            return Err(SnapshotMiss::NoValidSnapshot { query });
        }

        let capacity = self.capacity as Frame;
        let oldest_valid = latest.saturating_sub(capacity.saturating_add(1));
        if query < oldest_valid as f64 {
            return Err(SnapshotMiss::AgedOut {
                query,
                oldest_valid,
            });
        }

        // Frames older than this share a slot with a newer frame.
        let oldest_resident = latest.saturating_sub(capacity - 1).max(oldest_valid);

        let below = {
            let start = query.floor().min(latest as f64) as Frame;
            if start < oldest_resident {
                None
            } else {
                (oldest_resident..=start)
                    .rev()
                    .find_map(|frame| self.get_frame(frame))
            }
        };

        let above = {
            let start = query.ceil();
            if start > latest as f64 {
                None
            } else {
                (start as Frame..=latest).find_map(|frame| self.get_frame(frame))
            }
        };

        match (below, above) {
            (Some(from), Some(to)) if from.frame() == to.frame() => Ok(Bracket::Exact(from)),
            (Some(from), Some(to)) => {
                let span = (to.frame() - from.frame()) as f64;
                let t = ((query - from.frame() as f64) / span) as f32;
                Ok(Bracket::Between { from, to, t })
            }
            (Some(from), None) => Err(SnapshotMiss::Extrapolation {
                query,
                from: from.frame(),
            }),
            (None, Some(to)) => Err(SnapshotMiss::InverseExtrapolation {
                query,
                to: to.frame(),
            }),
            (None, None) => Err(SnapshotMiss::NoValidSnapshot { query }),
        }
    }
}

impl<S: Framed + Interpolate + Clone> SnapshotRing<S> {
    /// Writes the state at `query` into `out`. On a miss `out` is left
    /// untouched, a warning is logged and `false` is returned.
    pub fn get(&self, query: f64, out: &mut S) -> bool {
        match self.lookup(query) {
            Ok(Bracket::Exact(snapshot)) => {
                out.clone_from(snapshot);
                true
            }
            Ok(Bracket::Between { from, to, t }) => {
                S::interpolate(from, to, t, out);
                true
            }
            Err(miss) => {
                log::warn!("Snapshot lookup failed: {}", miss);
                false
            }
        }
    }
}
