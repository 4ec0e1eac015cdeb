//! Turn progress of every band in the current dispatch round.
//!
//! Workers in a pipelined round report each completed turn. The ledger
//! answers with the minimum completed turn across the ring, which the
//! worker uses to discard snapshot history nobody can still ask for. A
//! worker that has run `depth` or more turns ahead of that minimum is held
//! (bounded wait) until the slowest band catches up, so history never grows
//! past the pipeline depth.
//!
//! Progress is scoped to a round epoch. Reports carrying any other epoch
//! are stale (a reassigned band or an aborted round). They are answered
//! with a minimum of zero and the `stale` flag, which disables collection on
//! the reporter and tells a stalled reporter its round is gone.

use std::time::Duration;

use ringlife_types::wire::{ReportTurnRequest, ReportTurnResponse};
use tokio::sync::watch;
use tracing::debug;

/// Progress of one dispatch round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RoundProgress {
    epoch: u64,
    completed: Vec<u64>,
}

impl RoundProgress {
    fn min_completed(&self) -> u64 {
        self.completed.iter().copied().min().unwrap_or(0)
    }
}

/// Shared per-round progress tracker.
///
/// Owned by the broker; in-process workers hold an [`std::sync::Arc`] to it
/// directly, remote workers reach it through `POST /broker/report-turn`.
#[derive(Debug)]
pub struct TurnLedger {
    progress: watch::Sender<RoundProgress>,
}

impl Default for TurnLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnLedger {
    /// Create an empty ledger (epoch 0, no bands).
    pub fn new() -> Self {
        let (progress, _) = watch::channel(RoundProgress::default());
        Self { progress }
    }

    /// Start tracking a new round of `bands` bands, all at turn 0.
    pub fn begin_round(&self, epoch: u64, bands: usize) {
        self.progress.send_modify(|p| {
            p.epoch = epoch;
            p.completed = vec![0; bands];
        });
        debug!(epoch, bands, "turn ledger reset for new round");
    }

    /// Epoch of the round currently tracked.
    pub fn epoch(&self) -> u64 {
        self.progress.borrow().epoch
    }

    /// Minimum completed turn across the current round.
    pub fn min_completed(&self) -> u64 {
        self.progress.borrow().min_completed()
    }

    /// Record that band `index` completed `turn` in round `epoch`.
    ///
    /// Progress never moves backwards. Returns the new round minimum, or
    /// `None` when the report is stale or names an unknown band.
    pub fn record(&self, epoch: u64, index: usize, turn: u64) -> Option<u64> {
        let mut accepted = false;
        self.progress.send_if_modified(|p| {
            if p.epoch != epoch {
                return false;
            }
            let Some(slot) = p.completed.get_mut(index) else {
                return false;
            };
            accepted = true;
            if turn > *slot {
                *slot = turn;
                true
            } else {
                false
            }
        });
        accepted.then(|| self.min_completed())
    }

    /// Record a report and hold the reply while the reporter is too far ahead.
    ///
    /// Returns as soon as `turn - min < depth`, when the round changes, or
    /// after `max_wait`, whichever comes first. The reporter re-reports if
    /// it is still out of bounds.
    pub async fn report(&self, req: ReportTurnRequest, max_wait: Duration) -> ReportTurnResponse {
        let Some(min) = self.record(req.epoch, req.index, req.turn) else {
            return ReportTurnResponse::STALE;
        };
        if within_depth(req.turn, min, req.depth) {
            return ReportTurnResponse {
                min_completed: min,
                stale: false,
            };
        }

        debug!(
            epoch = req.epoch,
            index = req.index,
            turn = req.turn,
            min,
            "reporter ahead of pipeline depth, holding reply"
        );
        let mut rx = self.progress.subscribe();
        let ledger_alive = match tokio::time::timeout(
            max_wait,
            rx.wait_for(|p| {
                p.epoch != req.epoch || within_depth(req.turn, p.min_completed(), req.depth)
            }),
        )
        .await
        {
            Ok(Ok(_)) | Err(_) => true,
            Ok(Err(_)) => false,
        };

        let current = self.progress.borrow();
        if ledger_alive && current.epoch == req.epoch {
            ReportTurnResponse {
                min_completed: current.min_completed(),
                stale: false,
            }
        } else {
            ReportTurnResponse::STALE
        }
    }
}

/// Whether a band at `turn` may keep running given the round minimum.
pub const fn within_depth(turn: u64, min: u64, depth: u64) -> bool {
    turn.saturating_sub(min) < depth
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn report(epoch: u64, index: usize, turn: u64, depth: u64) -> ReportTurnRequest {
        ReportTurnRequest {
            epoch,
            index,
            turn,
            depth,
        }
    }

    #[test]
    fn minimum_tracks_slowest_band() {
        let ledger = TurnLedger::new();
        ledger.begin_round(1, 3);
        assert_eq!(ledger.record(1, 0, 2), Some(0));
        assert_eq!(ledger.record(1, 1, 1), Some(0));
        assert_eq!(ledger.record(1, 2, 3), Some(1));
        assert_eq!(ledger.record(1, 1, 2), Some(2));
        assert_eq!(ledger.min_completed(), 2);
    }

    #[test]
    fn progress_never_moves_backwards() {
        let ledger = TurnLedger::new();
        ledger.begin_round(4, 1);
        ledger.record(4, 0, 5);
        assert_eq!(ledger.record(4, 0, 3), Some(5));
    }

    #[test]
    fn stale_and_unknown_reports_are_ignored() {
        let ledger = TurnLedger::new();
        ledger.begin_round(2, 2);
        assert_eq!(ledger.record(1, 0, 9), None);
        assert_eq!(ledger.record(2, 7, 9), None);
        assert_eq!(ledger.min_completed(), 0);
        assert_eq!(ledger.epoch(), 2);
    }

    #[tokio::test]
    async fn report_within_depth_returns_immediately() {
        let ledger = TurnLedger::new();
        ledger.begin_round(1, 2);
        let res = ledger.report(report(1, 0, 2, 3), Duration::from_secs(5)).await;
        assert_eq!(res.min_completed, 0);
        assert!(!res.stale);
    }

    #[tokio::test]
    async fn stale_report_gets_zero_minimum() {
        let ledger = TurnLedger::new();
        ledger.begin_round(5, 2);
        let res = ledger.report(report(4, 0, 1, 3), Duration::from_secs(5)).await;
        assert_eq!(res.min_completed, 0);
        assert!(res.stale);
    }

    #[tokio::test]
    async fn report_ahead_of_depth_waits_for_slowest_band() {
        let ledger = Arc::new(TurnLedger::new());
        ledger.begin_round(1, 2);

        let fast = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.report(report(1, 0, 3, 2), Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        assert!(!fast.is_finished());

        ledger.record(1, 1, 2);
        let res = fast.await.unwrap();
        assert_eq!(res.min_completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn held_report_times_out_with_current_minimum() {
        let ledger = TurnLedger::new();
        ledger.begin_round(1, 2);
        let res = ledger.report(report(1, 0, 4, 2), Duration::from_millis(50)).await;
        assert_eq!(res.min_completed, 0);
        assert!(!res.stale);
    }

    #[tokio::test]
    async fn new_round_releases_held_reports() {
        let ledger = Arc::new(TurnLedger::new());
        ledger.begin_round(1, 2);
        let held = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.report(report(1, 0, 5, 2), Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        ledger.begin_round(2, 2);
        assert!(held.await.unwrap().stale);
    }
}
