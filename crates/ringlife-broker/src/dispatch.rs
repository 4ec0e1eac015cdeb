//! The `BreakWorld` turn loop.
//!
//! Each iteration:
//!
//! 1. stops if a Pause is pending;
//! 2. repartitions (and re-initializes the ring) only when the set of
//!    workers to use has changed;
//! 3. dispatches one `RunWorld` per band in parallel and waits for all;
//! 4. hands failed bands to survivors, or computes them in-process when
//!    none are left;
//! 5. merges every band interior into the canonical grid;
//! 6. advances the turn counter.
//!
//! A round is normally a single turn. With `round_turns > 1` workers run
//! the pipelined halo exchange for the whole round and the broker merges
//! once at its end. A failure inside such a round cannot be patched band
//! by band (the survivors' results depend on the dead band's halos), so the
//! round is aborted and replayed from the unchanged grid.

use futures::future::join_all;
use ringlife_core::http::LinkError;
use ringlife_core::partition::{Partition, check_interior, ring_neighbours};
use ringlife_core::rule;
use ringlife_types::wire::{BreakWorldRequest, BreakWorldResponse, RunWorldRequest, WorkerInitRequest};
use ringlife_types::{Band, BandSpec, Grid, Row};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::link::WorkerLink;

/// A partition together with the workers assigned to its bands.
#[derive(Debug)]
struct Plan {
    partition: Partition,
    assignees: Vec<WorkerLink>,
}

impl Plan {
    fn len(&self) -> usize {
        self.assignees.len()
    }

    /// Whether this plan was built for exactly these workers.
    fn matches(&self, workers: &[WorkerLink]) -> bool {
        self.assignees.len() == workers.len()
            && self
                .assignees
                .iter()
                .zip(workers)
                .all(|(a, b)| a.addr() == b.addr())
    }
}

/// Dispatch one band and check the shape of what comes back.
///
/// A malformed answer is a protocol error, which the caller treats exactly
/// like a dead worker.
async fn run_band(
    link: WorkerLink,
    epoch: u64,
    spec: BandSpec,
    band: Band,
    width: usize,
    turns: u64,
) -> Result<Vec<Row>, LinkError> {
    let req = RunWorldRequest {
        epoch,
        turns,
        width,
        height: spec.height(),
        band,
    };
    let res = link.run_world(req).await?;
    if res.completed_turns != turns {
        return Err(LinkError::Protocol {
            addr: link.addr().to_owned(),
            message: format!("completed {} of {turns} turns", res.completed_turns),
        });
    }
    check_interior(&spec, width, &res.interior).map_err(|e| LinkError::Protocol {
        addr: link.addr().to_owned(),
        message: e.to_string(),
    })?;
    Ok(res.interior)
}

impl Broker {
    /// Advance `req.grid` by `req.turns` turns across the live workers.
    ///
    /// Returns early with partial progress if paused. Worker failures are
    /// absorbed; the run completes as long as the broker itself survives.
    pub async fn break_world(&self, req: BreakWorldRequest) -> Result<BreakWorldResponse, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        validate_request(&req)?;

        let _run = self.run_lock.lock().await;
        let run_id = Uuid::now_v7();
        let span = info_span!("break_world", %run_id, turns = req.turns, threads = req.threads);
        async {
            info!(width = req.width, height = req.height, "run started");
            self.publish(&req.grid, 0).await;
            self.start_run().await;
            let result = self.run_turns(req.turns, req.threads, req.grid).await;
            let completed = self.world.read().await.completed;
            self.finish_run(completed).await;
            match &result {
                Ok(res) => info!(completed_turns = res.completed_turns, alive = res.alive_cells.len(), "run finished"),
                Err(e) => warn!(error = %e, "run failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_turns(
        &self,
        turns: u64,
        threads: usize,
        mut grid: Grid,
    ) -> Result<BreakWorldResponse, BrokerError> {
        let mut completed: u64 = 0;
        let mut plan: Option<Plan> = None;
        let mut round_turns = self.settings.round_turns;
        let mut aborted: u32 = 0;

        while completed < turns {
            if self.pause_requested().await {
                break;
            }

            let mut workers = self.workers.read().await.clone();
            workers.truncate(threads.min(grid.height()));

            if workers.is_empty() {
                if plan.take().is_some() {
                    warn!(completed, "no live workers, computing in-process");
                }
                grid = rule::step_grid(&grid);
                completed = completed.saturating_add(1);
                self.publish(&grid, completed).await;
                continue;
            }

            let current = match plan.take() {
                Some(existing) if existing.matches(&workers) => existing,
                _ => match self.build_plan(workers, &grid, round_turns).await? {
                    Some(fresh) => fresh,
                    None => continue,
                },
            };

            let round = round_turns.min(turns.saturating_sub(completed));
            if round <= 1 {
                grid = self.single_turn(&current, &grid).await?;
                completed = completed.saturating_add(1);
            } else if let Some(next) = self.pipelined_round(&current, &grid, round).await? {
                grid = next;
                completed = completed.saturating_add(round);
            } else {
                aborted = aborted.saturating_add(1);
                if aborted >= self.settings.max_round_retries {
                    warn!(aborted, "falling back to single-turn rounds");
                    round_turns = 1;
                }
                continue;
            }
            self.publish(&grid, completed).await;
            debug!(completed, "turn merged");
            plan = Some(current);
        }

        Ok(BreakWorldResponse {
            completed_turns: completed,
            alive_cells: grid.alive_cells(),
            grid,
        })
    }

    /// Partition the grid over `workers` and initialize the ring.
    ///
    /// Returns `None` if any worker failed to initialize; it has been
    /// removed and the caller should try again with the survivors.
    async fn build_plan(
        &self,
        workers: Vec<WorkerLink>,
        grid: &Grid,
        max_turns: u64,
    ) -> Result<Option<Plan>, BrokerError> {
        let partition = Partition::new(grid.height(), workers.len())?;
        let count = partition.len();
        let addr_of = |i: usize| workers.get(i).map(|w| w.addr().to_owned()).unwrap_or_default();

        let inits = partition.bands().iter().zip(&workers).map(|(spec, link)| {
            let (predecessor, successor) = ring_neighbours(spec.index, count);
            let req = WorkerInitRequest {
                index: spec.index,
                ring_size: count,
                predecessor: addr_of(predecessor),
                successor: addr_of(successor),
                broker: self.settings.advertise.clone(),
                turns: max_turns,
                width: grid.width(),
                height: spec.height(),
            };
            async move { (link, link.init(req).await) }
        });

        let mut healthy = true;
        for (link, result) in join_all(inits).await {
            if let Err(e) = result {
                self.mark_dead(link.addr(), &e).await;
                healthy = false;
            }
        }
        if !healthy {
            return Ok(None);
        }

        info!(
            bands = count,
            heights = ?partition.bands().iter().map(BandSpec::height).collect::<Vec<_>>(),
            "repartitioned"
        );
        Ok(Some(Plan {
            partition,
            assignees: workers,
        }))
    }

    fn begin_round(&self, bands: usize) -> u64 {
        let epoch = self.next_epoch();
        self.ledger.begin_round(epoch, bands);
        epoch
    }

    /// One turn, one self-contained `RunWorld` per band.
    ///
    /// Failed bands go through reassignment waves. `assignee` is the
    /// indirection table from original band to the plan worker currently
    /// responsible for it. Each wave hands the outstanding bands, in
    /// ascending order, to distinct surviving workers in plan order; bands
    /// left over wait for the next wave. With no survivors the remaining
    /// bands are computed in-process.
    async fn single_turn(&self, plan: &Plan, grid: &Grid) -> Result<Grid, BrokerError> {
        let bands = plan.partition.cut(grid)?;
        let specs = plan.partition.bands();
        let width = grid.width();
        let epoch = self.begin_round(plan.len());

        let calls = plan
            .assignees
            .iter()
            .zip(specs.iter().zip(&bands))
            .map(|(link, (spec, band))| {
                run_band(link.clone(), epoch, *spec, band.clone(), width, 1)
            });
        let first = join_all(calls).await;

        let mut interiors: Vec<Option<Vec<Row>>> = vec![None; plan.len()];
        let mut alive = vec![true; plan.len()];
        let mut assignee: Vec<usize> = (0..plan.len()).collect();
        let mut pending = Vec::new();
        for (index, result) in first.into_iter().enumerate() {
            match result {
                Ok(rows) => store(&mut interiors, index, rows),
                Err(e) => {
                    self.mark_dead(e.addr(), &e).await;
                    mark(&mut alive, index, false);
                    pending.push(index);
                }
            }
        }

        while !pending.is_empty() {
            let survivors: Vec<usize> = (0..plan.len())
                .filter(|&i| alive.get(i).copied().unwrap_or(false))
                .collect();
            if survivors.is_empty() {
                warn!(bands = ?pending, "no surviving workers, computing bands in-process");
                for index in pending.drain(..) {
                    if let Some(band) = bands.get(index) {
                        store(&mut interiors, index, rule::step_band(band));
                    }
                }
                break;
            }

            let leftover = pending.split_off(survivors.len().min(pending.len()));
            let wave: Vec<(usize, usize)> = pending.iter().copied().zip(survivors).collect();
            let calls = wave.iter().filter_map(|&(index, worker)| {
                let link = plan.assignees.get(worker)?.clone();
                let spec = *specs.get(index)?;
                let band = bands.get(index)?.clone();
                if let Some(slot) = assignee.get_mut(index) {
                    *slot = worker;
                }
                info!(band = index, worker = link.addr(), "band reassigned");
                Some(run_band(link, self.next_epoch(), spec, band, width, 1))
            });
            let results = join_all(calls).await;

            pending = leftover;
            for (&(index, worker), result) in wave.iter().zip(results) {
                match result {
                    Ok(rows) => store(&mut interiors, index, rows),
                    Err(e) => {
                        self.mark_dead(e.addr(), &e).await;
                        mark(&mut alive, worker, false);
                        pending.push(index);
                    }
                }
            }
            pending.sort_unstable();
        }
        debug!(assignment = ?assignee, "turn assignment");

        merge_all(&plan.partition, grid, interiors)
    }

    /// A pipelined round of `turns` turns. `None` means the round was
    /// aborted and must be replayed.
    async fn pipelined_round(
        &self,
        plan: &Plan,
        grid: &Grid,
        turns: u64,
    ) -> Result<Option<Grid>, BrokerError> {
        let bands = plan.partition.cut(grid)?;
        let width = grid.width();
        let epoch = self.begin_round(plan.len());
        debug!(epoch, turns, bands = plan.len(), "pipelined round dispatched");

        let mut tasks = JoinSet::new();
        for (index, ((link, spec), band)) in plan
            .assignees
            .iter()
            .zip(plan.partition.bands())
            .zip(bands)
            .enumerate()
        {
            let link = link.clone();
            let spec = *spec;
            tasks.spawn(async move { (index, run_band(link, epoch, spec, band, width, turns).await) });
        }

        let mut interiors: Vec<Option<Vec<Row>>> = vec![None; plan.len()];
        let mut failed = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(rows))) => store(&mut interiors, index, rows),
                Ok((index, Err(e))) if !failed => {
                    warn!(epoch, band = index, error = %e, "pipelined round failed, stopping ring");
                    failed = true;
                    self.stop_ring(plan).await;
                }
                Ok((index, Err(e))) => debug!(band = index, error = %e, "stopped band returned"),
                Err(e) if !failed => {
                    warn!(epoch, error = %e, "round task failed, stopping ring");
                    failed = true;
                    self.stop_ring(plan).await;
                }
                Err(e) => debug!(error = %e, "round task ended after stop"),
            }
        }

        if failed {
            return Ok(None);
        }
        merge_all(&plan.partition, grid, interiors).map(Some)
    }

    /// Stop every worker of the plan. Those that do not answer are removed;
    /// a worker that failed only because a neighbour died stays in.
    async fn stop_ring(&self, plan: &Plan) {
        let stops = plan
            .assignees
            .iter()
            .map(|link| async move { (link, link.stop().await) });
        for (link, result) in join_all(stops).await {
            if let Err(e) = result {
                self.mark_dead(link.addr(), &e).await;
            }
        }
    }
}

fn store(interiors: &mut [Option<Vec<Row>>], index: usize, rows: Vec<Row>) {
    if let Some(slot) = interiors.get_mut(index) {
        *slot = Some(rows);
    }
}

fn mark(flags: &mut [bool], index: usize, value: bool) {
    if let Some(flag) = flags.get_mut(index) {
        *flag = value;
    }
}

fn merge_all(
    partition: &Partition,
    grid: &Grid,
    interiors: Vec<Option<Vec<Row>>>,
) -> Result<Grid, BrokerError> {
    let mut next = grid.clone();
    for (spec, rows) in partition.bands().iter().zip(interiors) {
        let rows = rows.ok_or_else(|| {
            BrokerError::InvalidRequest(format!("band {} was never computed", spec.index))
        })?;
        partition.merge(&mut next, spec, rows)?;
    }
    Ok(next)
}

fn validate_request(req: &BreakWorldRequest) -> Result<(), BrokerError> {
    if req.threads == 0 {
        return Err(BrokerError::InvalidRequest("threads must be at least 1".to_owned()));
    }
    if req.grid.width() != req.width || req.grid.height() != req.height {
        return Err(BrokerError::InvalidRequest(format!(
            "grid is {}x{}, request says {}x{}",
            req.grid.width(),
            req.grid.height(),
            req.width,
            req.height
        )));
    }
    Ok(())
}
