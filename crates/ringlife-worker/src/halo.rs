//! Halo readiness gate: one bounded counting semaphore per edge.
//!
//! A delivered halo row is stored first and posted second; the engine waits
//! on both edges before applying the rule to a turn. Each semaphore holds at
//! most `capacity` posts, so a sender that runs too far ahead of the
//! receiver blocks in [`HaloGate::post`] instead of piling up rows.

use ringlife_types::Edge;
use tokio::sync::{AcquireError, Semaphore};

/// A counting semaphore with an upper bound on outstanding posts.
///
/// Built from two semaphores: `items` counts posts not yet consumed and
/// `space` counts free capacity.
#[derive(Debug)]
pub struct BoundedSemaphore {
    items: Semaphore,
    space: Semaphore,
}

impl BoundedSemaphore {
    /// Create a semaphore with no posts and room for `capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Semaphore::new(0),
            space: Semaphore::new(capacity.clamp(1, Semaphore::MAX_PERMITS)),
        }
    }

    /// Add one post, waiting for capacity if the semaphore is full.
    pub async fn post(&self) -> Result<(), AcquireError> {
        self.space.acquire().await?.forget();
        self.items.add_permits(1);
        Ok(())
    }

    /// Consume one post, waiting until one is available.
    pub async fn wait(&self) -> Result<(), AcquireError> {
        self.items.acquire().await?.forget();
        self.space.add_permits(1);
        Ok(())
    }

    /// Posts waiting to be consumed.
    pub fn pending(&self) -> usize {
        self.items.available_permits()
    }

    /// Fail every current and future `post` and `wait`.
    pub fn close(&self) {
        self.items.close();
        self.space.close();
    }
}

/// Readiness of the top and bottom halo rows of one round.
#[derive(Debug)]
pub struct HaloGate {
    top: BoundedSemaphore,
    bottom: BoundedSemaphore,
}

impl HaloGate {
    /// Create a gate whose edges each buffer up to `capacity` posts.
    pub fn new(capacity: usize) -> Self {
        Self {
            top: BoundedSemaphore::new(capacity),
            bottom: BoundedSemaphore::new(capacity),
        }
    }

    const fn edge(&self, edge: Edge) -> &BoundedSemaphore {
        match edge {
            Edge::Top => &self.top,
            Edge::Bottom => &self.bottom,
        }
    }

    /// Signal that the next halo row for `edge` has been stored.
    pub async fn post(&self, edge: Edge) -> Result<(), AcquireError> {
        self.edge(edge).post().await
    }

    /// Wait until both edges of the next turn are ready.
    ///
    /// Not cancel-safe: dropping this future after one edge was consumed
    /// loses that post. The engine only abandons a wait when it abandons
    /// the whole round.
    pub async fn wait_both(&self) -> Result<(), AcquireError> {
        tokio::try_join!(self.top.wait(), self.bottom.wait())?;
        Ok(())
    }

    /// Posts waiting on `edge`.
    pub fn pending(&self, edge: Edge) -> usize {
        self.edge(edge).pending()
    }

    /// Release every waiter with an error.
    pub fn close(&self) {
        self.top.close();
        self.bottom.close();
    }
}
