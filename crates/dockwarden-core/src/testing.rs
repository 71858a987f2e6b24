//! In-memory engine for exercising the control loops.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use dockwarden_engine::{
    ContainerSnapshot, ContainerState, Engine, EngineError, HealthState, ImageRef, ListOptions,
    Result,
};
use dockwarden_error::CommonError;

/// Builds a running snapshot with no health reporting.
pub fn snapshot(id: &str, name: &str, image: &str, image_id: &str) -> ContainerSnapshot {
    ContainerSnapshot {
        id: id.to_string(),
        name: name.to_string(),
        image: ImageRef::new(image),
        image_id: image_id.to_string(),
        state: ContainerState::Running,
        health: HealthState::None,
        labels: HashMap::new(),
        created_at: DateTime::UNIX_EPOCH,
    }
}

/// Scriptable [`Engine`] with a call log and a recreate-concurrency
/// high-water mark.
pub struct MockEngine {
    containers: Mutex<Vec<ContainerSnapshot>>,
    digests: Mutex<HashMap<String, VecDeque<String>>>,
    calls: Mutex<Vec<String>>,
    pulled: Mutex<Vec<String>>,
    failing_pulls: Mutex<HashSet<String>>,
    list_fails: Mutex<bool>,
    recreate_delay: Mutex<Duration>,
    recreates_in_flight: AtomicUsize,
    max_recreates_in_flight: AtomicUsize,
}

impl MockEngine {
    pub fn new(containers: Vec<ContainerSnapshot>) -> Arc<Self> {
        Arc::new(Self {
            containers: Mutex::new(containers),
            digests: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            pulled: Mutex::new(Vec::new()),
            failing_pulls: Mutex::new(HashSet::new()),
            list_fails: Mutex::new(false),
            recreate_delay: Mutex::new(Duration::ZERO),
            recreates_in_flight: AtomicUsize::new(0),
            max_recreates_in_flight: AtomicUsize::new(0),
        })
    }

    /// Replaces the container set, as if the engine state changed.
    pub fn set_containers(&self, containers: Vec<ContainerSnapshot>) {
        *self.containers.lock().unwrap() = containers;
    }

    /// Scripts the digest sequence for an image. Each `image_digest` call
    /// consumes one entry; the last entry repeats forever.
    pub fn set_digests(&self, image: &str, digests: &[&str]) {
        self.digests.lock().unwrap().insert(
            image.to_string(),
            digests.iter().map(|d| (*d).to_string()).collect(),
        );
    }

    /// Makes pulls of `image` fail.
    pub fn fail_pull(&self, image: &str) {
        self.failing_pulls.lock().unwrap().insert(image.to_string());
    }

    /// Makes `list` fail until cleared.
    pub fn fail_list(&self, fail: bool) {
        *self.list_fails.lock().unwrap() = fail;
    }

    /// Holds each recreate open for `delay`, to make overlap observable.
    pub fn set_recreate_delay(&self, delay: Duration) {
        *self.recreate_delay.lock().unwrap() = delay;
    }

    /// Number of calls to the named operation.
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == operation)
            .count()
    }

    /// Images pulled, in order.
    pub fn pulled_images(&self) -> Vec<String> {
        self.pulled.lock().unwrap().clone()
    }

    /// Highest number of recreates observed in flight at once.
    pub fn max_concurrent_recreates(&self) -> usize {
        self.max_recreates_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, operation: &str) {
        self.calls.lock().unwrap().push(operation.to_string());
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn ping(&self) -> Result<()> {
        self.record("ping");
        Ok(())
    }

    async fn list(&self, opts: ListOptions) -> Result<Vec<ContainerSnapshot>> {
        self.record("list");
        if *self.list_fails.lock().unwrap() {
            return Err(CommonError::internal("list failure injected").into());
        }
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .iter()
            .filter(|c| opts.include_stopped || c.is_running())
            .cloned()
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerSnapshot> {
        self.record("inspect");
        self.containers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| CommonError::not_found(format!("container {id}")).into())
    }

    async fn stop(&self, _id: &str, _timeout: Duration) -> Result<()> {
        self.record("stop");
        Ok(())
    }

    async fn start(&self, _id: &str) -> Result<()> {
        self.record("start");
        Ok(())
    }

    async fn restart(&self, _id: &str, _timeout: Duration) -> Result<()> {
        self.record("restart");
        Ok(())
    }

    async fn remove(&self, _id: &str, _remove_volumes: bool) -> Result<()> {
        self.record("remove");
        Ok(())
    }

    async fn recreate(&self, id: &str, _timeout: Duration) -> Result<String> {
        self.record("recreate");

        let in_flight = self.recreates_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_recreates_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.recreate_delay.lock().unwrap();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        let new_id = format!("{id}-new");
        {
            let mut containers = self.containers.lock().unwrap();
            if let Some(container) = containers.iter_mut().find(|c| c.id == id) {
                container.id = new_id.clone();
                container.image_id = format!("{}-new", container.image_id);
            }
        }

        self.recreates_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(new_id)
    }

    async fn pull(&self, image: &ImageRef) -> Result<()> {
        self.record("pull");
        self.pulled.lock().unwrap().push(image.as_str().to_string());
        if self.failing_pulls.lock().unwrap().contains(image.as_str()) {
            return Err(EngineError::PullFailed {
                image: image.to_string(),
                reason: "pull failure injected".to_string(),
            });
        }
        Ok(())
    }

    async fn image_digest(&self, image: &ImageRef) -> Result<String> {
        self.record("image_digest");
        let mut digests = self.digests.lock().unwrap();
        if let Some(queue) = digests.get_mut(image.as_str()) {
            if queue.len() > 1 {
                return Ok(queue.pop_front().expect("non-empty queue"));
            }
            if let Some(last) = queue.front() {
                return Ok(last.clone());
            }
        }
        Ok(format!("sha256:unchanged-{image}"))
    }

    async fn remove_image(&self, _image_id: &str) -> Result<()> {
        self.record("remove_image");
        Ok(())
    }
}
