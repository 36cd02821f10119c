//! Capture convergence for spp_pcap

use super::{ConvergenceReport, Executor, Operation, Toggle};
use crate::crd::{CaptureState, ObservedSummary, PcapSpec, WorkerKind};
use crate::endpoint::{ControlEndpoint, PcapInfo};
use crate::Error;

/// Operation that moves the observed capture state toward `desired`, if any
pub fn plan(desired: CaptureState, observed: &PcapInfo) -> Option<Operation> {
    match (observed.status.as_str(), desired) {
        ("idle", CaptureState::Running) => Some(Operation::Capture(Toggle::Start)),
        ("running", CaptureState::Idle) => Some(Operation::Capture(Toggle::Stop)),
        _ => None,
    }
}

/// Flatten live state for status
pub fn summarize(observed: &PcapInfo) -> ObservedSummary {
    ObservedSummary {
        client_id: Some(observed.client_id),
        status: Some(observed.status.clone()),
        ..Default::default()
    }
}

/// Converge one running spp_pcap to its desired capture state
pub async fn converge(
    endpoint: &dyn ControlEndpoint,
    spec: &PcapSpec,
) -> Result<ConvergenceReport, Error> {
    let sec_id = spec.name.sec_id;
    let mut executor = Executor::new(endpoint, WorkerKind::Pcap, sec_id);

    let Some(observed) = endpoint.observe_pcap(sec_id).await else {
        return Ok(executor.finish(None, false));
    };

    let Some(op) = plan(spec.status, &observed) else {
        return Ok(executor.finish(Some(summarize(&observed)), true));
    };

    executor.apply(op).await;
    let after = endpoint.observe_pcap(sec_id).await;
    let ready = after.is_some();
    Ok(executor.finish(after.as_ref().map(summarize), ready))
}
