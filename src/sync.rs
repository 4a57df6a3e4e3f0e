//! Data-parallel gradient synchronization
//!
//! Training runs as N independent workers, each owning a replica of the
//! model parameters. After every backward pass the workers meet at an
//! all-reduce barrier and leave with the mean gradient; a worker that never
//! arrives stalls its peers, and a worker that panics aborts the run at
//! join. Within a worker, restart rounds are strictly sequential.

use nalgebra::DVector;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

struct BusShared {
    barrier: Barrier,
    slots: Mutex<Vec<Option<DVector<f64>>>>,
}

/// Creates the per-worker handles for one synchronization group
pub struct GradientBus;

impl GradientBus {
    /// One [`WorkerLink`] per worker, all joined to the same barrier
    pub fn links(world_size: usize) -> Vec<WorkerLink> {
        assert!(world_size > 0, "world size must be positive");

        let shared = Arc::new(BusShared {
            barrier: Barrier::new(world_size),
            slots: Mutex::new(vec![None; world_size]),
        });

        (0..world_size)
            .map(|rank| WorkerLink {
                rank,
                world_size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// One worker's endpoint of the gradient bus
pub struct WorkerLink {
    rank: usize,
    world_size: usize,
    shared: Arc<BusShared>,
}

impl WorkerLink {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Exchange this worker's gradient for the element-wise mean across all
    /// workers
    ///
    /// Blocks until every worker of the group has called in; this is the
    /// implicit synchronization point of each training step. Reusable
    /// across steps.
    pub fn all_reduce(&self, gradient: &DVector<f64>) -> DVector<f64> {
        {
            let mut slots = self.shared.slots.lock().unwrap();
            slots[self.rank] = Some(gradient.clone());
        }

        self.shared.barrier.wait();

        let mean = {
            let slots = self.shared.slots.lock().unwrap();
            let mut sum = DVector::zeros(gradient.len());
            for slot in slots.iter() {
                sum += slot.as_ref().unwrap();
            }
            sum / self.world_size as f64
        };

        // Second barrier: nobody may start the next deposit until everyone
        // has read this step's slots.
        self.shared.barrier.wait();

        mean
    }
}

/// Rescale a gradient so its norm does not exceed `max_norm`
///
/// Returns the pre-clip norm. Applied before every optimizer step to keep
/// exploding gradients from destabilizing training.
pub fn clip_gradient_norm(gradient: &mut DVector<f64>, max_norm: f64) -> f64 {
    let norm = gradient.norm();
    if norm > max_norm && norm > 0.0 {
        *gradient *= max_norm / norm;
    }
    norm
}

/// Run one closure per worker on its own thread, honoring the barrier
/// contract
///
/// Results come back in rank order. A panicking worker propagates the panic
/// at join, aborting the whole run.
pub fn run_data_parallel<T, F>(world_size: usize, worker: F) -> Vec<T>
where
    F: Fn(WorkerLink) -> T + Sync,
    T: Send,
{
    let links = GradientBus::links(world_size);
    let worker = &worker;

    thread::scope(|scope| {
        let handles: Vec<_> = links
            .into_iter()
            .map(|link| scope.spawn(move || worker(link)))
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    })
}
