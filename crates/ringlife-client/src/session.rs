//! A client run that survives the loss of its broker.
//!
//! While a `BreakWorld` call is in flight the session refreshes a backup
//! snapshot from `CurrentState` on a fixed interval (never more often than
//! the configured minimum gap). If the broker stops answering, the session
//! probes the alternate brokers with a fixed backoff and resumes the run on
//! the first one that answers, from the backup, with the turns still owed.
//! Running out of attempts is a [`ClientError::FailoverTimeout`].

use std::time::Duration;

use reqwest::Client;
use ringlife_core::config::ClientConfig;
use ringlife_core::http::{self, LinkError};
use ringlife_types::Grid;
use ringlife_types::wire::{BreakWorldRequest, BreakWorldResponse, Role};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::broker::BrokerClient;
use crate::error::ClientError;

/// A grid at a known global turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Turns completed since the session's run started.
    pub turn: u64,
    /// The grid after `turn` turns.
    pub grid: Grid,
    /// Live cells in `grid`.
    pub alive: usize,
}

#[derive(Debug)]
struct Backup {
    /// Turns completed before the current `BreakWorld` call started.
    base: u64,
    refreshed: Option<Instant>,
}

/// Settings the session needs from [`ClientConfig`].
#[derive(Debug, Clone, Copy)]
struct Timing {
    failover_attempts: u32,
    failover_backoff: Duration,
    checkpoint_interval: Duration,
    checkpoint_min_gap: Duration,
}

/// A connection to a broker plus the alternates to fail over to.
#[derive(Debug)]
pub struct Session {
    http: Client,
    timing: Timing,
    broker: RwLock<BrokerClient>,
    alternates: RwLock<Vec<String>>,
    backup: Mutex<Backup>,
    progress: watch::Sender<Option<Checkpoint>>,
}

impl Session {
    /// Connect to the first configured broker; the others are alternates.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let (first, rest) = config.brokers.split_first().ok_or(ClientError::NoBrokers)?;
        let http = http::client()?;
        Ok(Self {
            broker: RwLock::new(BrokerClient::new(http.clone(), first.clone())),
            http,
            timing: Timing {
                failover_attempts: config.failover_attempts.max(1),
                failover_backoff: config.failover_backoff(),
                checkpoint_interval: config.checkpoint_interval().max(Duration::from_millis(1)),
                checkpoint_min_gap: config.checkpoint_min_gap(),
            },
            alternates: RwLock::new(rest.to_vec()),
            backup: Mutex::new(Backup {
                base: 0,
                refreshed: None,
            }),
            progress: watch::channel(None).0,
        })
    }

    /// The broker currently in use.
    pub async fn broker(&self) -> BrokerClient {
        self.broker.read().await.clone()
    }

    /// Brokers this session would fail over to, in order.
    pub async fn alternates(&self) -> Vec<String> {
        self.alternates.read().await.clone()
    }

    /// Follow the latest backup snapshot.
    pub fn progress(&self) -> watch::Receiver<Option<Checkpoint>> {
        self.progress.subscribe()
    }

    /// Advance `req.grid` by `req.turns` turns, failing over as needed.
    ///
    /// The returned `completed_turns` counts every turn of the run, across
    /// brokers. It is short of `req.turns` only if the run was paused.
    pub async fn run(&self, req: BreakWorldRequest) -> Result<BreakWorldResponse, ClientError> {
        let total = req.turns;
        self.start(&req.grid).await;
        self.discover().await;

        let mut request = req;
        loop {
            let broker = self.broker().await;
            match self.run_with_checkpoints(&broker, &request).await {
                Ok(mut res) => {
                    let base = self.backup.lock().await.base;
                    res.completed_turns = base.saturating_add(res.completed_turns);
                    self.publish(Checkpoint {
                        turn: res.completed_turns,
                        grid: res.grid.clone(),
                        alive: res.alive_cells.len(),
                    });
                    info!(broker = broker.addr(), completed_turns = res.completed_turns, "run finished");
                    return Ok(res);
                }
                Err(e @ LinkError::Connection { .. }) => {
                    warn!(broker = broker.addr(), error = %e, "broker unreachable, failing over");
                    self.fail_over(broker.addr(), e).await?;
                    request = self.resume(&request, total).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Refresh the backup from the broker, unless the last refresh is
    /// younger than the minimum gap. Returns the backup either way.
    pub async fn checkpoint(&self) -> Result<Option<Checkpoint>, ClientError> {
        let mut backup = self.backup.lock().await;
        if backup
            .refreshed
            .is_some_and(|at| at.elapsed() < self.timing.checkpoint_min_gap)
        {
            return Ok(self.progress.borrow().clone());
        }

        let state = self.broker().await.current_state().await?;
        backup.refreshed = Some(Instant::now());
        if let Some(grid) = state.grid {
            let checkpoint = Checkpoint {
                turn: backup.base.saturating_add(state.completed_turns),
                grid,
                alive: state.alive_count,
            };
            debug!(turn = checkpoint.turn, alive = checkpoint.alive, "backup refreshed");
            self.publish(checkpoint);
        }
        Ok(self.progress.borrow().clone())
    }

    async fn start(&self, grid: &Grid) {
        let mut backup = self.backup.lock().await;
        backup.base = 0;
        backup.refreshed = None;
        self.publish(Checkpoint {
            turn: 0,
            grid: grid.clone(),
            alive: grid.alive_count(),
        });
    }

    fn publish(&self, checkpoint: Checkpoint) {
        self.progress.send_replace(Some(checkpoint));
    }

    /// Learn standby brokers from the current broker.
    async fn discover(&self) {
        let broker = self.broker().await;
        match broker.addresses().await {
            Ok(addresses) => {
                let mut alternates = self.alternates.write().await;
                for addr in addresses.brokers {
                    if addr != broker.addr() && !alternates.contains(&addr) {
                        alternates.push(addr);
                    }
                }
                debug!(alternates = ?*alternates, "alternate brokers");
            }
            Err(e) => debug!(error = %e, "could not list alternate brokers"),
        }
    }

    async fn run_with_checkpoints(
        &self,
        broker: &BrokerClient,
        req: &BreakWorldRequest,
    ) -> Result<BreakWorldResponse, LinkError> {
        let mut ticker = tokio::time::interval(self.timing.checkpoint_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick is immediate; the broker has not published this run yet.
        ticker.tick().await;

        let call = broker.break_world(req);
        tokio::pin!(call);
        loop {
            tokio::select! {
                res = &mut call => return res,
                _ = ticker.tick() => {
                    if let Err(e) = self.checkpoint().await {
                        debug!(error = %e, "backup refresh failed");
                    }
                }
            }
        }
    }

    /// Switch to the first alternate that answers as a broker.
    ///
    /// The failed broker is tried last, in case it comes back on the same
    /// address.
    async fn fail_over(&self, failed: &str, error: LinkError) -> Result<(), ClientError> {
        let mut candidates = self.alternates().await;
        candidates.retain(|addr| addr != failed);
        candidates.push(failed.to_owned());

        let mut last = error;
        for attempt in 1..=self.timing.failover_attempts {
            tokio::time::sleep(self.timing.failover_backoff).await;
            let index = usize::try_from(attempt.saturating_sub(1))
                .unwrap_or(0)
                .checked_rem(candidates.len())
                .unwrap_or(0);
            let Some(addr) = candidates.get(index) else {
                break;
            };
            let candidate = BrokerClient::new(self.http.clone(), addr.clone());
            match candidate.health().await {
                Ok(health) if health.role == Role::Broker => {
                    info!(broker = %addr, attempt, "failed over");
                    let mut alternates = self.alternates.write().await;
                    alternates.retain(|a| a != addr);
                    if failed != addr {
                        alternates.push(failed.to_owned());
                    }
                    *self.broker.write().await = candidate;
                    return Ok(());
                }
                Ok(_) => {
                    warn!(broker = %addr, attempt, "candidate is not a broker");
                }
                Err(e) => {
                    debug!(broker = %addr, attempt, error = %e, "candidate unreachable");
                    last = e;
                }
            }
        }
        Err(ClientError::FailoverTimeout {
            attempts: self.timing.failover_attempts,
            last,
        })
    }

    /// The request that finishes the run from the backup.
    async fn resume(&self, previous: &BreakWorldRequest, total: u64) -> BreakWorldRequest {
        let checkpoint = self.progress.borrow().clone();
        let mut backup = self.backup.lock().await;
        backup.refreshed = None;
        match checkpoint {
            Some(cp) => {
                backup.base = cp.turn;
                info!(from_turn = cp.turn, remaining = total.saturating_sub(cp.turn), "resuming from backup");
                BreakWorldRequest {
                    turns: total.saturating_sub(cp.turn),
                    threads: previous.threads,
                    width: previous.width,
                    height: previous.height,
                    grid: cp.grid,
                }
            }
            None => previous.clone(),
        }
    }
}
