//! Line-movement detection.
//!
//! Pure differencing between the previously stored snapshot of a line and the
//! one just fetched. It never reads history and never writes; the caller
//! persists whatever it returns together with the new snapshot.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{LineMovement, Market, MovementDirection, OddsSnapshot, TrackedLine};

#[derive(Debug, Clone, Copy, Default)]
pub struct LineMovementDetector;

impl LineMovementDetector {
    pub fn new() -> Self {
        Self
    }

    /// Compare `current` against the previous snapshot for the same key.
    ///
    /// The first observation of a key is a baseline and yields nothing.
    pub fn detect(
        &self,
        previous: Option<&OddsSnapshot>,
        current: &OddsSnapshot,
        detected_at: DateTime<Utc>,
    ) -> Vec<LineMovement> {
        let Some(previous) = previous else {
            return Vec::new();
        };

        let tracked = match current.market {
            Market::Spread => TrackedLine::Spread,
            Market::Total => TrackedLine::Total,
            Market::Moneyline | Market::TeamTotal => return Vec::new(),
        };
        let (Some(before), Some(after)) = (tracked.value(previous), tracked.value(current)) else {
            return Vec::new();
        };

        let delta = after - before;
        if delta == 0.0 || !delta.is_finite() {
            return Vec::new();
        }

        let direction = match (tracked, delta > 0.0) {
            // Home spread rising means the home side gets more points: money on the away side
            (TrackedLine::Spread, true) => MovementDirection::TowardAway,
            (TrackedLine::Spread, false) => MovementDirection::TowardHome,
            (TrackedLine::Total, true) => MovementDirection::TotalUp,
            (TrackedLine::Total, false) => MovementDirection::TotalDown,
        };

        vec![LineMovement {
            id: Uuid::new_v4(),
            game_id: current.game_id,
            sportsbook_id: current.sportsbook_id,
            sportsbook_name: current.sportsbook_name.clone(),
            market: current.market,
            period: current.period,
            tracked,
            previous_value: before,
            new_value: after,
            direction,
            magnitude: delta.abs(),
            detected_at,
            snapshot_id: current.id,
        }]
    }
}
