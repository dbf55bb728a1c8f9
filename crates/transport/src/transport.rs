//! Transport implementation: endpoint table, delivery heap, worker pool.

use chainmesh_telemetry::EventJournal;
use chainmesh_types::{Error, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Worker threads servicing the delivery heap.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Link parameters applied to every send. Hot-updatable via
/// [`Transport::set_params`].
#[derive(Debug, Clone, Copy)]
pub struct NetworkParams {
    pub latency: Duration,
    /// Probability in `[0, 1)` that a send is dropped.
    pub drop_rate: f64,
}

impl Default for NetworkParams {
    fn default() -> Self {
        NetworkParams {
            latency: Duration::from_millis(50),
            drop_rate: 0.01,
        }
    }
}

type DeliverFn = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// One scheduled delivery. Ordered by (deadline, insertion sequence) so that
/// equal deadlines preserve send order.
struct Delivery {
    deliver_at: Instant,
    seq: u64,
    to: String,
    data: Vec<u8>,
}

impl PartialEq for Delivery {
    fn eq(&self, other: &Self) -> bool {
        self.deliver_at == other.deliver_at && self.seq == other.seq
    }
}

impl Eq for Delivery {}

impl PartialOrd for Delivery {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delivery {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deliver_at
            .cmp(&other.deliver_at)
            .then(self.seq.cmp(&other.seq))
    }
}

struct HeapState {
    heap: BinaryHeap<Reverse<Delivery>>,
    next_seq: u64,
}

#[derive(Default)]
struct Counters {
    pending: usize,
    inflight: usize,
}

/// Serial queue guaranteeing in-order delivery per destination. `busy` marks
/// that some worker is draining it.
#[derive(Default)]
struct DestQueue {
    busy: bool,
    ready: VecDeque<Delivery>,
}

struct Shared {
    endpoints: Mutex<HashMap<String, DeliverFn>>,
    params: Mutex<NetworkParams>,
    rng: Mutex<ChaCha8Rng>,
    queue: Mutex<HeapState>,
    queue_cv: Condvar,
    dest_queues: Mutex<HashMap<String, DestQueue>>,
    counters: Mutex<Counters>,
    idle_cv: Condvar,
    running: AtomicBool,
    journal: Option<Arc<EventJournal>>,
}

/// Simulated lossy, latency-bearing transport between named mailboxes.
pub struct Transport {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Transport {
    /// Create a transport with its own worker pool. `seed` fixes the drop
    /// pattern; `journal` (when given) records drop observations.
    pub fn new(seed: u64, params: NetworkParams, journal: Option<Arc<EventJournal>>) -> Transport {
        let shared = Arc::new(Shared {
            endpoints: Mutex::new(HashMap::new()),
            params: Mutex::new(params),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            queue: Mutex::new(HeapState {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            queue_cv: Condvar::new(),
            dest_queues: Mutex::new(HashMap::new()),
            counters: Mutex::new(Counters::default()),
            idle_cv: Condvar::new(),
            running: AtomicBool::new(true),
            journal,
        });

        let workers = (0..DEFAULT_WORKER_COUNT)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("transport-{}", i))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn transport worker")
            })
            .collect();

        info!(workers = DEFAULT_WORKER_COUNT, "transport started");
        Transport {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Register a mailbox. Fails with `InvalidState` if the address is taken.
    pub fn register_endpoint(
        &self,
        address: &str,
        deliver: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> Result<()> {
        let mut endpoints = self.shared.endpoints.lock().unwrap();
        if endpoints.contains_key(address) {
            return Err(Error::invalid_state(format!(
                "endpoint {address} already registered"
            )));
        }
        endpoints.insert(address.to_string(), Arc::new(deliver));
        debug!(address, "endpoint registered");
        Ok(())
    }

    /// Remove a mailbox. Fails with `NotFound` if absent.
    pub fn unregister_endpoint(&self, address: &str) -> Result<()> {
        let mut endpoints = self.shared.endpoints.lock().unwrap();
        if endpoints.remove(address).is_none() {
            return Err(Error::not_found(format!("endpoint {address} not registered")));
        }
        debug!(address, "endpoint unregistered");
        Ok(())
    }

    /// Enqueue a delivery to `to`, applying the configured latency and drop
    /// probability. Never blocks.
    pub fn send(&self, from: &str, to: &str, data: &[u8]) -> Result<()> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(Error::invalid_state("transport is shut down"));
        }
        if !self.shared.endpoints.lock().unwrap().contains_key(to) {
            return Err(Error::not_found(format!("destination endpoint {to} not found")));
        }

        let params = *self.shared.params.lock().unwrap();
        let draw: f64 = self.shared.rng.lock().unwrap().gen();
        if draw < params.drop_rate {
            if let Some(journal) = &self.shared.journal {
                journal.log_network_drop(from, to, "unknown", data.len(), "random_drop");
            }
            debug!(from, to, size = data.len(), "packet dropped by network");
            return Err(Error::network_drop("packet dropped by network"));
        }

        // Count before enqueue so drain waiters never observe a queued task
        // with a zero pending count.
        self.shared.counters.lock().unwrap().pending += 1;
        {
            let mut queue = self.shared.queue.lock().unwrap();
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.heap.push(Reverse(Delivery {
                deliver_at: Instant::now() + params.latency,
                seq,
                to: to.to_string(),
                data: data.to_vec(),
            }));
        }
        self.shared.queue_cv.notify_one();
        Ok(())
    }

    /// Hot-update latency/drop rate for subsequent sends.
    pub fn set_params(&self, params: NetworkParams) {
        *self.shared.params.lock().unwrap() = params;
    }

    /// Block until no deliveries are pending or in flight.
    pub fn wait_for_pending_deliveries(&self) {
        let mut counters = self.shared.counters.lock().unwrap();
        while counters.pending > 0 || counters.inflight > 0 {
            counters = self.shared.idle_cv.wait(counters).unwrap();
        }
    }

    /// Stop the worker pool and discard undelivered tasks. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            let discarded = {
                let mut queue = self.shared.queue.lock().unwrap();
                let n = queue.heap.len();
                queue.heap.clear();
                n
            };
            {
                // Subtract exactly the discarded tasks: a task popped by a
                // worker but not yet counted in-flight still owns one pending
                // slot and will release it itself.
                let mut counters = self.shared.counters.lock().unwrap();
                counters.pending = counters.pending.saturating_sub(discarded);
                if counters.pending == 0 && counters.inflight == 0 {
                    self.shared.idle_cv.notify_all();
                }
            }
            if discarded > 0 {
                warn!(discarded, "transport shut down with undelivered tasks");
            }
        }
        self.shared.queue_cv.notify_all();
        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        // Wait for the earliest task to come due.
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if !shared.running.load(Ordering::Acquire) {
                    return;
                }
                let next_deadline = queue.heap.peek().map(|Reverse(d)| d.deliver_at);
                match next_deadline {
                    None => {
                        queue = shared.queue_cv.wait(queue).unwrap();
                    }
                    Some(deadline) => {
                        let now = Instant::now();
                        if deadline <= now {
                            break;
                        }
                        let (guard, _) = shared
                            .queue_cv
                            .wait_timeout(queue, deadline - now)
                            .unwrap();
                        queue = guard;
                    }
                }
            }
            let task = queue.heap.pop().expect("peeked task vanished").0;
            // More tasks may already be due; hand one to another worker.
            if !queue.heap.is_empty() {
                shared.queue_cv.notify_one();
            }
            task
        };

        {
            let mut counters = shared.counters.lock().unwrap();
            counters.pending -= 1;
            counters.inflight += 1;
        }

        // Per-destination serialization: enqueue, and drain only if no other
        // worker currently owns this destination.
        let dest = task.to.clone();
        let should_drain = {
            let mut queues = shared.dest_queues.lock().unwrap();
            let dq = queues.entry(dest.clone()).or_default();
            dq.ready.push_back(task);
            if dq.busy {
                false
            } else {
                dq.busy = true;
                true
            }
        };
        if should_drain {
            drain_destination(&shared, &dest);
        }
    }
}

/// Deliver every ready task for `dest`, in order, then release the queue.
fn drain_destination(shared: &Arc<Shared>, dest: &str) {
    loop {
        let task = {
            let mut queues = shared.dest_queues.lock().unwrap();
            let dq = queues.get_mut(dest).expect("destination queue vanished");
            match dq.ready.pop_front() {
                Some(task) => task,
                None => {
                    queues.remove(dest);
                    break;
                }
            }
        };

        // Copy the callback out so it runs without the endpoint lock held;
        // a handler re-registering endpoints must not deadlock.
        let deliver = shared.endpoints.lock().unwrap().get(&task.to).cloned();
        if let Some(deliver) = deliver {
            deliver(&task.data);
        }

        let mut counters = shared.counters.lock().unwrap();
        counters.inflight -= 1;
        if counters.pending == 0 && counters.inflight == 0 {
            shared.idle_cv.notify_all();
        }
    }
}
