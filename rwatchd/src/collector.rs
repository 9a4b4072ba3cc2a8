//! Measurement collection controller.
//!
//! Each tracked measurement owns a small state machine: an optional bounded
//! history backfill and an optional open-ended live subscription, both
//! feeding the traceroute store. Commands arrive over a bounded channel and
//! are dispatched by a single controller task; per-measurement mutexes keep
//! start/stop decisions and worker exits consistent.

use crate::state::ApplicationState;
use dashmap::DashMap;
use parking_lot::Mutex;
use rwatch_atlas::{Probe, TracerouteResult};
use rwatch_config::{ATLAS_DEBUG_MEASUREMENTS, LOG_TRACEROUTE_PROGRESS};
use rwatch_utils::progress::ProgressCounter;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

const REQUEST_CHANNEL_BUFFER: usize = 64;
const PROGRESS_LOG_PERIOD: Duration = Duration::from_secs(3);

/// Controller-level failures surfaced to the REST layer.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ControllerError {
    /// The measurement is already being collected in the requested mode.
    #[error("specified measurement ID is already being collected")]
    MeasurementAlreadyInUse,
    /// The measurement has never been tracked.
    #[error("specified measurement ID does not exist")]
    MeasurementDoesNotExist,
    /// Stop requested for a measurement without a live subscription.
    #[error("specified measurement ID not being used for live collection")]
    NotUsingLiveCollection,
    /// The controller task is gone; only happens during shutdown.
    #[error("collection controller is not running")]
    ControllerUnavailable,
}

#[derive(Clone, Copy, Debug)]
enum CollectionAction {
    CollectHistory,
    StartLiveCollection,
    StopLiveCollection,
}

/// A queued command for the controller task. Opaque outside this module;
/// values only travel from the tracker to the controller.
#[derive(Clone, Copy, Debug)]
pub struct CollectionMessage {
    action: CollectionAction,
    target: u64,
}

/// Mutable collection state of one measurement, guarded by the
/// per-measurement mutex.
#[derive(Default)]
pub struct CollectionState {
    /// Destination seen in this measurement's results.
    pub destination_ip: Option<IpAddr>,
    /// A history worker is currently draining the backfill.
    pub collecting_history: bool,
    /// A live worker currently holds a stream subscription.
    pub performing_live: bool,
    /// The live worker should exit after the message it is processing.
    pub request_stop_live: bool,
    /// Earliest result timestamp observed.
    pub oldest_data: Option<i64>,
    /// Latest result timestamp observed.
    pub latest_data: Option<i64>,
}

impl CollectionState {
    fn update_from_result(&mut self, result: &TracerouteResult) {
        let timestamp = result.timestamp;

        self.oldest_data = Some(match self.oldest_data {
            Some(oldest) => oldest.min(timestamp),
            None => timestamp,
        });
        self.latest_data = Some(match self.latest_data {
            Some(latest) => latest.max(timestamp),
            None => timestamp,
        });

        if self.destination_ip.is_none() {
            self.destination_ip = result.destination_addr();
        }
    }
}

/// Tracking entry for one measurement id.
pub struct MeasurementInfo {
    /// Measurement id on the platform.
    pub id: u64,
    /// Guarded mutable state.
    pub state: Mutex<CollectionState>,
}

/// Concurrent registry of tracked measurements plus the command channel
/// feeding the controller task.
pub struct MeasurementTracker {
    tracked: DashMap<u64, Arc<MeasurementInfo>>,
    request_tx: mpsc::Sender<CollectionMessage>,
}

impl MeasurementTracker {
    /// Create the tracker and the command stream consumed by
    /// [`run_collection_controller`].
    pub fn new() -> (Self, mpsc::Receiver<CollectionMessage>) {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_BUFFER);
        let tracker = Self { tracked: DashMap::new(), request_tx };
        (tracker, request_rx)
    }

    fn get_or_create(&self, measurement_id: u64) -> Arc<MeasurementInfo> {
        self.tracked
            .entry(measurement_id)
            .or_insert_with(|| {
                Arc::new(MeasurementInfo {
                    id: measurement_id,
                    state: Mutex::new(CollectionState::default()),
                })
            })
            .clone()
    }

    /// True when the measurement has been tracked at some point.
    pub fn contains(&self, measurement_id: u64) -> bool {
        self.tracked.contains_key(&measurement_id)
    }

    /// Snapshot every tracked measurement for the listing endpoint.
    pub fn snapshot<T>(&self, mut project: impl FnMut(u64, &CollectionState) -> T) -> Vec<T> {
        self.tracked
            .iter()
            .map(|entry| {
                let state = entry.state.lock();
                project(entry.id, &state)
            })
            .collect()
    }

    async fn send(&self, action: CollectionAction, target: u64) -> Result<(), ControllerError> {
        self.request_tx
            .send(CollectionMessage { action, target })
            .await
            .map_err(|_| ControllerError::ControllerUnavailable)
    }

    /// Request a history backfill. Fails when one is already running.
    pub async fn collect_history(&self, measurement_id: u64) -> Result<(), ControllerError> {
        let info = self.get_or_create(measurement_id);
        if info.state.lock().collecting_history {
            return Err(ControllerError::MeasurementAlreadyInUse);
        }

        self.send(CollectionAction::CollectHistory, measurement_id).await
    }

    /// Request a live subscription. Fails when one is already running.
    pub async fn enable_live_collection(&self, measurement_id: u64) -> Result<(), ControllerError> {
        let info = self.get_or_create(measurement_id);
        if info.state.lock().performing_live {
            return Err(ControllerError::MeasurementAlreadyInUse);
        }

        self.send(CollectionAction::StartLiveCollection, measurement_id).await
    }

    /// Ask the live worker to exit after its current message.
    pub async fn disable_live_collection(&self, measurement_id: u64) -> Result<(), ControllerError> {
        let info = self.get_or_create(measurement_id);
        if !info.state.lock().performing_live {
            return Err(ControllerError::NotUsingLiveCollection);
        }

        self.send(CollectionAction::StopLiveCollection, measurement_id).await
    }
}

/// Remove a measurement's stored routes. Ongoing collection, if any, keeps
/// running.
pub fn drop_measurement_data(
    state: &ApplicationState,
    measurement_id: u64,
) -> Result<(), ControllerError> {
    if !state.measurements.contains(measurement_id) {
        return Err(ControllerError::MeasurementDoesNotExist);
    }

    state.traceroute_data.write().drop_measurement_data(measurement_id);
    Ok(())
}

/// Push one result into the shared state: the route graph under the store
/// write lock, then the per-destination probe usage under the probe lock.
/// Probes the catalog has not seen yet get a minimal bootstrap entry from
/// the result itself, so the probe endpoints work before the first catalog
/// refresh completes.
fn ingest_result(state: &ApplicationState, result: &TracerouteResult) {
    state.traceroute_data.write().append_result(result);

    // Some results carry only the platform-observed address.
    let source = result
        .source_addr()
        .or_else(|| result.from.as_deref().and_then(|raw| raw.parse().ok()));

    // ASN lookup happens before taking the probe lock.
    let source_asn = source.and_then(|addr| state.lookup_asn(addr));

    let mut probe_data = state.probe_data.write();

    if let Some(destination) = result.destination_addr() {
        probe_data.register_usage(destination, result.prb_id, result.timestamp);
    }

    if result.prb_id != 0 && probe_data.get(result.prb_id).is_none() {
        if let Some(source) = source {
            probe_data.upsert(bootstrap_probe(result.prb_id, source, source_asn));
        }
    }
}

fn bootstrap_probe(probe_id: u64, source: IpAddr, asn: Option<u32>) -> Probe {
    let mut probe = Probe {
        id: probe_id,
        ipv4: None,
        ipv6: None,
        country_code: None,
        asn4: None,
        asn6: None,
        geometry: None,
    };

    match source {
        IpAddr::V4(_) => {
            probe.ipv4 = Some(source);
            probe.asn4 = asn;
        }
        IpAddr::V6(_) => {
            probe.ipv6 = Some(source);
            probe.asn6 = asn;
        }
    }

    probe
}

/// The controller task: preloads any configured debug measurements, then
/// dispatches commands until the channel closes at shutdown.
pub async fn run_collection_controller(
    state: Arc<ApplicationState>,
    mut requests: mpsc::Receiver<CollectionMessage>,
) -> anyhow::Result<()> {
    for &measurement_id in ATLAS_DEBUG_MEASUREMENTS.iter() {
        info!("Loading debug measurement ID {measurement_id}");

        match rwatch_atlas::cached_history_results(measurement_id).await {
            Ok(results) => handle_incoming_messages(&state, measurement_id, results).await,
            Err(e) => warn!("Unable to load debug measurement {measurement_id}: {e}"),
        }
    }
    info!("Finished adding debug measurements");

    while let Some(message) = requests.recv().await {
        handle_action(&state, message);
    }

    anyhow::bail!("measurement request channel closed unexpectedly")
}

fn handle_action(state: &Arc<ApplicationState>, message: CollectionMessage) {
    let info = state.measurements.get_or_create(message.target);
    let mut guard = info.state.lock();

    match message.action {
        CollectionAction::CollectHistory => {
            if guard.collecting_history {
                return;
            }

            info!("Collecting history on measurement {}", info.id);
            guard.collecting_history = true;
            drop(guard);
            tokio::spawn(history_worker(state.clone(), info));
        }
        CollectionAction::StartLiveCollection => {
            guard.request_stop_live = false;
            if guard.performing_live {
                return;
            }

            info!("Starting live collection on measurement {}", info.id);
            guard.performing_live = true;
            drop(guard);
            tokio::spawn(live_worker(state.clone(), info));
        }
        CollectionAction::StopLiveCollection => {
            info!("Requesting to stop live collection on measurement {}", info.id);
            guard.request_stop_live = guard.performing_live;
        }
    }
}

/// Drain one statistics-period of historical results into the store, then
/// exit. Fetch errors terminate the worker; the operator may re-issue the
/// request.
async fn history_worker(state: Arc<ApplicationState>, info: Arc<MeasurementInfo>) {
    let mut results = match rwatch_atlas::fresh_history_results(info.id).await {
        Ok(results) => results,
        Err(e) => {
            warn!("Encountered error when trying to fetch measurement history: {e}");
            info.state.lock().collecting_history = false;
            return;
        }
    };

    while let Some(result) = results.recv().await {
        info.state.lock().update_from_result(&result);
        ingest_result(&state, &result);
    }

    info.state.lock().collecting_history = false;
    info!("Finished collecting history on measurement {}", info.id);
}

/// Consume the live stream until the upstream closes or a stop is
/// requested. The stop flag is checked under the lock after every message.
async fn live_worker(state: Arc<ApplicationState>, info: Arc<MeasurementInfo>) {
    let mut results = match rwatch_atlas::live_results(info.id).await {
        Ok(results) => results,
        Err(e) => {
            warn!("Encountered error when subscribing to live results: {e}");
            info.state.lock().performing_live = false;
            return;
        }
    };

    while let Some(result) = results.recv().await {
        ingest_result(&state, &result);

        let mut guard = info.state.lock();
        guard.update_from_result(&result);

        if guard.request_stop_live {
            guard.request_stop_live = false;
            guard.performing_live = false;
            info!("Stopped live collection on measurement {}", info.id);
            return;
        }
    }

    info.state.lock().performing_live = false;
    info!("Exiting live collection worker for measurement {}", info.id);
}

/// Ingest a stream of results outside any worker flags, logging progress
/// periodically when enabled. Used for the startup debug preload.
async fn handle_incoming_messages(
    state: &Arc<ApplicationState>,
    measurement_id: u64,
    mut results: mpsc::Receiver<TracerouteResult>,
) {
    let log_progress = *LOG_TRACEROUTE_PROGRESS;
    let counter = ProgressCounter::new(PROGRESS_LOG_PERIOD);
    let info = state.measurements.get_or_create(measurement_id);

    loop {
        if log_progress {
            counter.periodic(|count| {
                info!("[Traceroute Progress] Parsed a total of {count} traceroute messages");
            });
        }

        tokio::select! {
            result = results.recv() => {
                let Some(result) = result else { break };

                info.state.lock().update_from_result(&result);
                counter.increment();
                ingest_result(state, &result);
            }
            // Waiting for a message can outlast the progress interval; wake
            // up so the periodic log still fires while idle.
            _ = tokio::time::sleep(PROGRESS_LOG_PERIOD) => {}
        }
    }

    info!(
        "[Traceroute Progress] Exited after parsing a total of {} traceroute messages",
        counter.count()
    );
}

#[cfg(test)]
mod tests {
    use super::{bootstrap_probe, ControllerError, MeasurementTracker};

    #[test]
    fn bootstrap_probes_carry_the_observed_family() {
        let v4 = bootstrap_probe(10, "192.0.2.7".parse().expect("address"), Some(3333));
        assert_eq!(v4.ipv4, "192.0.2.7".parse().ok());
        assert_eq!(v4.asn4, Some(3333));
        assert!(v4.ipv6.is_none() && v4.asn6.is_none());

        let v6 = bootstrap_probe(11, "2001:db8::9".parse().expect("address"), Some(4444));
        assert_eq!(v6.ipv6, "2001:db8::9".parse().ok());
        assert_eq!(v6.asn6, Some(4444));
        assert!(v6.ipv4.is_none() && v6.asn4.is_none());
    }

    #[tokio::test]
    async fn history_requests_are_idempotent() {
        let (tracker, mut requests) = MeasurementTracker::new();

        tracker.collect_history(42).await.expect("first request accepted");
        assert!(requests.recv().await.is_some());

        // Simulate the controller having started the worker.
        tracker.get_or_create(42).state.lock().collecting_history = true;

        assert_eq!(
            tracker.collect_history(42).await,
            Err(ControllerError::MeasurementAlreadyInUse)
        );
    }

    #[tokio::test]
    async fn live_start_and_stop_guards() {
        let (tracker, _requests) = MeasurementTracker::new();

        assert_eq!(
            tracker.disable_live_collection(7).await,
            Err(ControllerError::NotUsingLiveCollection)
        );

        tracker.enable_live_collection(7).await.expect("start accepted");
        tracker.get_or_create(7).state.lock().performing_live = true;

        assert_eq!(
            tracker.enable_live_collection(7).await,
            Err(ControllerError::MeasurementAlreadyInUse)
        );
        tracker.disable_live_collection(7).await.expect("stop accepted");
    }

    #[tokio::test]
    async fn timestamps_track_the_observed_range() {
        let (tracker, _requests) = MeasurementTracker::new();
        let info = tracker.get_or_create(9);

        let result = |timestamp| rwatch_atlas::TracerouteResult {
            af: Some(4),
            dst_addr: Some("151.101.0.1".to_string()),
            dst_name: Some("151.101.0.1".to_string()),
            src_addr: Some("192.0.2.7".to_string()),
            from: None,
            msm_id: 9,
            prb_id: 1,
            timestamp,
            endtime: None,
            proto: None,
            result: Vec::new(),
            size: None,
        };

        {
            let mut state = info.state.lock();
            state.update_from_result(&result(500));
            state.update_from_result(&result(100));
            state.update_from_result(&result(300));
        }

        let state = info.state.lock();
        assert_eq!(state.oldest_data, Some(100));
        assert_eq!(state.latest_data, Some(500));
        assert_eq!(state.destination_ip, "151.101.0.1".parse().ok());
    }
}
