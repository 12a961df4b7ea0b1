//! The acquisition state machine.
//!
//! One background event loop owns all coordinator state. Callers hold a
//! cloneable [`CoordinatorHandle`] that enqueues commands; the loop is the
//! sole mutator, so no lock guards the machine. Asynchronous work (the
//! permission prompt, the position fix, the address lookup) runs as spawned
//! tasks that report back into the same loop, tagged with the generation
//! current at dispatch. Starting over, cancelling, or resetting bumps the
//! generation, so a completion from an abandoned attempt is recognized and
//! dropped instead of aborted mid-flight.
//!
//! Results reach the caller on the event stream: exactly one
//! [`CoordinatorEvent::Committed`] per successful attempt and a
//! [`CoordinatorEvent::Failed`] per user-visible failure. State and marker
//! updates are broadcast for presentation only.

use crate::geocode::GeocodingClient;
use crate::permission::{PermissionGate, PermissionOutcome};
use crate::position::{FixOptions, PositionError, PositionProvider};
use crate::session::{MapSelectionSession, NoSelection};
use crate::types::{Coordinate, ErrorKind, Location, FALLBACK_ADDRESS};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{Id, JoinError, JoinSet};

/// Where the coordinator currently is in an acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    RequestingPermission,
    Locating,
    MapPicking,
    Confirming,
    Located,
    Failed(ErrorKind),
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::RequestingPermission => write!(f, "requesting-permission"),
            Self::Locating => write!(f, "locating"),
            Self::MapPicking => write!(f, "map-picking"),
            Self::Confirming => write!(f, "confirming"),
            Self::Located => write!(f, "located"),
            Self::Failed(kind) => write!(f, "failed ({kind:?})"),
        }
    }
}

/// What the coordinator tells its caller.
///
/// `Committed` is the sole success channel and `Failed` the sole failure
/// channel. `StateChanged` and `SelectionChanged` exist for presentation:
/// the latter carries the coordinate a map widget should render as the
/// provisional marker, or `None` when there is nothing to render.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    StateChanged(CoordinatorState),
    SelectionChanged(Option<Coordinate>),
    Committed(Location),
    Failed(ErrorKind),
}

/// The services an acquisition runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub permissions: PermissionGate,
    pub positions: Arc<dyn PositionProvider>,
    pub geocoder: GeocodingClient,
}

#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Options passed to every position fix.
    pub fix: FixOptions,
}

/// Start a coordinator on the current runtime.
///
/// Returns the command handle and the event stream. The loop runs until
/// every handle clone is dropped; an operation still in flight at that
/// point is dropped with it.
pub fn spawn(
    collaborators: Collaborators,
    config: CoordinatorConfig,
) -> (CoordinatorHandle, UnboundedReceiver<CoordinatorEvent>) {
    let (commands, inbox) = mpsc::unbounded_channel();
    let (events, events_rx) = mpsc::unbounded_channel();
    let coordinator = LocationCoordinator {
        collaborators,
        config,
        inbox,
        events,
        ops: JoinSet::new(),
        current_op: None,
        state: CoordinatorState::Idle,
        generation: 0,
        session: None,
        marker: None,
    };
    tokio::spawn(coordinator.run());
    (CoordinatorHandle { commands }, events_rx)
}

// ─── Handle ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    StartAutoLocate,
    StartMapPick,
    Tap(Coordinate),
    ConfirmTap,
    CancelMapPick,
    Reset,
}

/// Caller-side entry point; all methods enqueue and return immediately.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: UnboundedSender<Command>,
}

impl CoordinatorHandle {
    /// Acquire the device position: permission, fix, then address.
    pub fn start_auto_locate(&self) {
        self.send(Command::StartAutoLocate);
    }

    /// Open a map-picking round.
    pub fn start_map_pick(&self) {
        self.send(Command::StartMapPick);
    }

    /// Forward a tap from the map widget. Ignored outside a picking round.
    pub fn tap(&self, coordinate: Coordinate) {
        self.send(Command::Tap(coordinate));
    }

    /// Confirm the pending tap and resolve its address.
    pub fn confirm_tap(&self) {
        self.send(Command::ConfirmTap);
    }

    /// Abandon the current picking round, including an in-flight confirm.
    pub fn cancel_map_pick(&self) {
        self.send(Command::CancelMapPick);
    }

    /// Abandon whatever is in progress and return to idle.
    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::debug!("coordinator loop is gone; {command:?} dropped");
        }
    }
}

// ─── Event loop ──────────────────────────────────────────────────

#[derive(Debug)]
enum OpOutcome {
    Permission(PermissionOutcome),
    Fix(Result<Coordinate, PositionError>),
    Address {
        coordinate: Coordinate,
        address: String,
    },
}

/// What the current generation's dispatched task is doing, so a task that
/// dies without delivering its outcome can still be accounted for.
#[derive(Debug, Clone, Copy)]
enum OpKind {
    Permission,
    Fix,
    Address(Coordinate),
}

struct LocationCoordinator {
    collaborators: Collaborators,
    config: CoordinatorConfig,
    inbox: UnboundedReceiver<Command>,
    events: UnboundedSender<CoordinatorEvent>,
    ops: JoinSet<(u64, OpOutcome)>,
    /// Task id and role of the current generation's dispatched operation.
    current_op: Option<(Id, OpKind)>,
    state: CoordinatorState,
    generation: u64,
    session: Option<MapSelectionSession>,
    /// Last selection broadcast to the caller, to emit changes only.
    marker: Option<Coordinate>,
}

impl LocationCoordinator {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.inbox.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(joined) = self.ops.join_next_with_id(), if !self.ops.is_empty() => {
                    match joined {
                        Ok((id, (generation, outcome))) => {
                            self.handle_completion(id, generation, outcome)
                        }
                        Err(err) => self.handle_op_failure(err),
                    }
                }
            }
        }
        log::debug!("all coordinator handles dropped; event loop stopped");
    }

    fn handle_command(&mut self, command: Command) {
        log::debug!("command {command:?} in state {}", self.state);
        match command {
            Command::StartAutoLocate => self.start_auto_locate(),
            Command::StartMapPick => self.start_map_pick(),
            Command::Tap(coordinate) => self.tap(coordinate),
            Command::ConfirmTap => self.confirm_tap(),
            Command::CancelMapPick => self.cancel_map_pick(),
            Command::Reset => self.reset(),
        }
    }

    /// Apply a finished operation, unless a newer attempt has superseded it.
    fn handle_completion(&mut self, id: Id, generation: u64, outcome: OpOutcome) {
        if self.current_op.map(|(current, _)| current) == Some(id) {
            self.current_op = None;
        }
        if generation != self.generation {
            log::debug!(
                "dropping completion from attempt {generation} (current {})",
                self.generation
            );
            return;
        }
        match (outcome, self.state) {
            (OpOutcome::Permission(outcome), CoordinatorState::RequestingPermission) => {
                match outcome {
                    PermissionOutcome::Granted => {
                        self.set_state(CoordinatorState::Locating);
                        self.request_fix();
                    }
                    PermissionOutcome::Denied => self.fail(ErrorKind::PermissionDenied),
                    PermissionOutcome::Blocked => self.fail(ErrorKind::PermissionBlocked),
                }
            }
            (OpOutcome::Fix(Ok(coordinate)), CoordinatorState::Locating) => {
                self.lookup_address(coordinate);
            }
            (OpOutcome::Fix(Err(err)), CoordinatorState::Locating) => {
                log::warn!("position fix failed: {err}");
                self.fail(ErrorKind::PositionUnavailable);
            }
            (
                OpOutcome::Address {
                    coordinate,
                    address,
                },
                CoordinatorState::Locating | CoordinatorState::Confirming,
            ) => {
                self.commit(coordinate, address);
            }
            (outcome, state) => {
                log::warn!("completion {outcome:?} does not apply in state {state}");
            }
        }
    }

    /// A dispatched task died (panicked) instead of delivering its outcome.
    ///
    /// The payload is gone, so the generation check cannot apply; the task id
    /// recorded at dispatch identifies whether the current attempt lost its
    /// operation. A lost address lookup still commits on the coordinate kept
    /// here, with the fallback address, since geocoding may never sink an
    /// acquisition.
    fn handle_op_failure(&mut self, err: JoinError) {
        let current = match self.current_op {
            Some((id, kind)) if id == err.id() => kind,
            _ => {
                log::warn!("abandoned acquisition task failed: {err}");
                return;
            }
        };
        self.current_op = None;
        log::error!("acquisition task failed: {err}");
        match current {
            OpKind::Permission => self.fail(ErrorKind::PermissionDenied),
            OpKind::Fix => self.fail(ErrorKind::PositionUnavailable),
            OpKind::Address(coordinate) => self.commit(coordinate, FALLBACK_ADDRESS.to_string()),
        }
    }

    // ── Commands ─────────────────────────────────────────────────

    fn start_auto_locate(&mut self) {
        self.begin_attempt();
        self.set_state(CoordinatorState::RequestingPermission);
        let permissions = self.collaborators.permissions.clone();
        self.dispatch(OpKind::Permission, async move {
            OpOutcome::Permission(permissions.check_or_request().await)
        });
    }

    fn start_map_pick(&mut self) {
        self.begin_attempt();
        self.session = Some(MapSelectionSession::new());
        self.set_state(CoordinatorState::MapPicking);
    }

    fn tap(&mut self, coordinate: Coordinate) {
        if self.state != CoordinatorState::MapPicking {
            log::debug!("tap outside a picking round ignored");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            log::warn!("picking state without a session; tap dropped");
            return;
        };
        if session.on_tap(coordinate) {
            self.sync_marker();
        }
    }

    fn confirm_tap(&mut self) {
        if self.state != CoordinatorState::MapPicking {
            log::debug!("confirm outside a picking round ignored");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            log::warn!("picking state without a session; confirm dropped");
            return;
        };
        match session.confirm() {
            Ok(coordinate) => {
                self.sync_marker();
                self.set_state(CoordinatorState::Confirming);
                self.lookup_address(coordinate);
            }
            // Recoverable: prompt the user, stay in the round.
            Err(NoSelection) => self.emit(CoordinatorEvent::Failed(ErrorKind::NoSelection)),
        }
    }

    fn cancel_map_pick(&mut self) {
        match self.state {
            CoordinatorState::MapPicking | CoordinatorState::Confirming => {
                // End the round through the session so its pending pick is
                // discarded before the object itself is dropped.
                if let Some(session) = self.session.as_mut() {
                    session.cancel();
                }
                self.sync_marker();
                self.begin_attempt();
                self.set_state(CoordinatorState::Idle);
            }
            _ => log::debug!("cancel ignored in state {}", self.state),
        }
    }

    fn reset(&mut self) {
        self.begin_attempt();
        self.set_state(CoordinatorState::Idle);
    }

    /// Supersede any in-flight work and discard the picking session.
    fn begin_attempt(&mut self) {
        self.generation += 1;
        self.current_op = None;
        self.session = None;
        self.sync_marker();
    }

    // ── Dispatched operations ────────────────────────────────────

    fn request_fix(&mut self) {
        let provider = self.collaborators.positions.clone();
        let options = self.config.fix;
        self.dispatch(OpKind::Fix, async move {
            // Outer bound so a provider that ignores its timeout cannot
            // wedge the machine in `Locating`.
            let result =
                match tokio::time::timeout(options.timeout, provider.current_position(&options))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(PositionError::Timeout(options.timeout)),
                };
            OpOutcome::Fix(result)
        });
    }

    fn lookup_address(&mut self, coordinate: Coordinate) {
        let geocoder = self.collaborators.geocoder.clone();
        self.dispatch(OpKind::Address(coordinate), async move {
            let address = geocoder.reverse_geocode(coordinate).await;
            OpOutcome::Address {
                coordinate,
                address,
            }
        });
    }

    fn dispatch<F>(&mut self, kind: OpKind, op: F)
    where
        F: Future<Output = OpOutcome> + Send + 'static,
    {
        let generation = self.generation;
        let handle = self.ops.spawn(async move { (generation, op.await) });
        self.current_op = Some((handle.id(), kind));
    }

    // ── Outcomes ─────────────────────────────────────────────────

    fn commit(&mut self, coordinate: Coordinate, address: String) {
        if address == FALLBACK_ADDRESS {
            log::info!("committing without a resolved address: {}", ErrorKind::GeocodeDegraded);
        }
        let location = Location::new(coordinate, address);
        log::info!("location committed: {location}");
        self.set_state(CoordinatorState::Located);
        self.emit(CoordinatorEvent::Committed(location));
    }

    fn fail(&mut self, kind: ErrorKind) {
        self.set_state(CoordinatorState::Failed(kind));
        self.emit(CoordinatorEvent::Failed(kind));
        self.set_state(CoordinatorState::Idle);
    }

    fn set_state(&mut self, next: CoordinatorState) {
        if self.state == next {
            return;
        }
        log::debug!("state {} -> {next}", self.state);
        self.state = next;
        self.emit(CoordinatorEvent::StateChanged(next));
    }

    /// Broadcast the pending selection whenever its visible value changes.
    fn sync_marker(&mut self) {
        let visible = self.session.as_ref().and_then(|session| session.pending());
        if visible != self.marker {
            self.marker = visible;
            self.emit(CoordinatorEvent::SelectionChanged(visible));
        }
    }

    fn emit(&self, event: CoordinatorEvent) {
        if self.events.send(event).is_err() {
            log::trace!("no event subscriber; event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::{AddressLookup, GeocodeError};
    use crate::sim::{Latch, SimLookup, SimPermissions, SimPositions};
    use async_trait::async_trait;

    struct Harness {
        handle: CoordinatorHandle,
        events: UnboundedReceiver<CoordinatorEvent>,
        positions: Arc<SimPositions>,
        lookup: Arc<SimLookup>,
    }

    fn harness(
        permissions: SimPermissions,
        positions: SimPositions,
        lookup: SimLookup,
    ) -> Harness {
        let positions = Arc::new(positions);
        let lookup = Arc::new(lookup);
        let collaborators = Collaborators {
            permissions: PermissionGate::new(Arc::new(permissions)),
            positions: positions.clone(),
            geocoder: GeocodingClient::new(lookup.clone()),
        };
        let (handle, events) = spawn(collaborators, CoordinatorConfig::default());
        Harness {
            handle,
            events,
            positions,
            lookup,
        }
    }

    fn coord(latitude: f64, longitude: f64) -> Coordinate {
        Coordinate::new(latitude, longitude).unwrap()
    }

    async fn next(events: &mut UnboundedReceiver<CoordinatorEvent>) -> CoordinatorEvent {
        events.recv().await.expect("event stream closed")
    }

    /// Collect events up to and including the given state announcement.
    async fn until_state(
        events: &mut UnboundedReceiver<CoordinatorEvent>,
        state: CoordinatorState,
    ) -> Vec<CoordinatorEvent> {
        let mut seen = Vec::new();
        loop {
            let event = next(events).await;
            let done = event == CoordinatorEvent::StateChanged(state);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    /// Collect events up to and including the first commit.
    async fn until_commit(
        events: &mut UnboundedReceiver<CoordinatorEvent>,
    ) -> (Vec<CoordinatorEvent>, Location) {
        let mut seen = Vec::new();
        loop {
            let event = next(events).await;
            seen.push(event.clone());
            if let CoordinatorEvent::Committed(location) = event {
                return (seen, location);
            }
        }
    }

    fn commits(events: &[CoordinatorEvent]) -> Vec<Location> {
        events
            .iter()
            .filter_map(|event| match event {
                CoordinatorEvent::Committed(location) => Some(location.clone()),
                _ => None,
            })
            .collect()
    }

    struct PanickingProvider;

    #[async_trait]
    impl PositionProvider for PanickingProvider {
        async fn current_position(
            &self,
            _opts: &FixOptions,
        ) -> Result<Coordinate, PositionError> {
            panic!("sensor backend crashed")
        }
    }

    struct PanickingLookup;

    #[async_trait]
    impl AddressLookup for PanickingLookup {
        async fn lookup(&self, _coordinate: Coordinate) -> Result<String, GeocodeError> {
            panic!("lookup backend crashed")
        }
    }

    #[tokio::test]
    async fn test_auto_locate_commits_resolved_location() {
        let mut h = harness(
            SimPermissions::granted(),
            SimPositions::new([Ok(coord(37.0, -122.0))]),
            SimLookup::returning("1 Main St"),
        );

        h.handle.start_auto_locate();
        let (events, location) = until_commit(&mut h.events).await;

        assert_eq!(
            events,
            vec![
                CoordinatorEvent::StateChanged(CoordinatorState::RequestingPermission),
                CoordinatorEvent::StateChanged(CoordinatorState::Locating),
                CoordinatorEvent::StateChanged(CoordinatorState::Located),
                CoordinatorEvent::Committed(location.clone()),
            ],
        );
        assert_eq!(location.coordinate(), coord(37.0, -122.0));
        assert_eq!(location.address(), "1 Main St");
    }

    #[tokio::test]
    async fn test_denied_reports_and_returns_to_idle() {
        let mut h = harness(
            SimPermissions::prompt_denies(),
            SimPositions::new([Ok(coord(1.0, 1.0))]),
            SimLookup::returning("unused"),
        );

        h.handle.start_auto_locate();
        let events = until_state(&mut h.events, CoordinatorState::Idle).await;

        assert_eq!(
            events,
            vec![
                CoordinatorEvent::StateChanged(CoordinatorState::RequestingPermission),
                CoordinatorEvent::StateChanged(CoordinatorState::Failed(
                    ErrorKind::PermissionDenied
                )),
                CoordinatorEvent::Failed(ErrorKind::PermissionDenied),
                CoordinatorEvent::StateChanged(CoordinatorState::Idle),
            ],
        );
        assert_eq!(h.positions.calls(), 0);
    }

    #[tokio::test]
    async fn test_blocked_never_requests_a_fix() {
        let mut h = harness(
            SimPermissions::blocked(),
            SimPositions::new([Ok(coord(1.0, 1.0))]),
            SimLookup::returning("unused"),
        );

        h.handle.start_auto_locate();
        let events = until_state(&mut h.events, CoordinatorState::Idle).await;

        assert!(events.contains(&CoordinatorEvent::Failed(ErrorKind::PermissionBlocked)));
        assert_eq!(commits(&events), vec![]);
        assert_eq!(h.positions.calls(), 0);
        assert_eq!(h.lookup.calls(), 0);
    }

    #[tokio::test]
    async fn test_position_failure_fails_the_attempt() {
        let mut h = harness(
            SimPermissions::granted(),
            SimPositions::new([Err(PositionError::Sensor("no signal".into()))]),
            SimLookup::returning("unused"),
        );

        h.handle.start_auto_locate();
        let events = until_state(&mut h.events, CoordinatorState::Idle).await;

        assert!(events.contains(&CoordinatorEvent::Failed(ErrorKind::PositionUnavailable)));
        assert_eq!(commits(&events), vec![]);
        assert_eq!(h.lookup.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_provider_times_out() {
        let latch = Latch::new();
        let mut h = harness(
            SimPermissions::granted(),
            SimPositions::new([Ok(coord(1.0, 1.0))]).gated(latch),
            SimLookup::returning("unused"),
        );

        h.handle.start_auto_locate();
        let events = until_state(&mut h.events, CoordinatorState::Idle).await;

        assert!(events.contains(&CoordinatorEvent::Failed(ErrorKind::PositionUnavailable)));
        assert_eq!(commits(&events), vec![]);
    }

    #[tokio::test]
    async fn test_crashed_provider_fails_the_attempt() {
        let collaborators = Collaborators {
            permissions: PermissionGate::new(Arc::new(SimPermissions::granted())),
            positions: Arc::new(PanickingProvider),
            geocoder: GeocodingClient::new(Arc::new(SimLookup::returning("unused"))),
        };
        let (handle, mut events) = spawn(collaborators, CoordinatorConfig::default());

        handle.start_auto_locate();
        let seen = until_state(&mut events, CoordinatorState::Idle).await;

        assert!(seen.contains(&CoordinatorEvent::Failed(ErrorKind::PositionUnavailable)));
        assert_eq!(commits(&seen), vec![]);
    }

    #[tokio::test]
    async fn test_crashed_lookup_still_commits_the_fallback() {
        let collaborators = Collaborators {
            permissions: PermissionGate::new(Arc::new(SimPermissions::granted())),
            positions: Arc::new(SimPositions::new([Ok(coord(4.0, 5.0))])),
            geocoder: GeocodingClient::new(Arc::new(PanickingLookup)),
        };
        let (handle, mut events) = spawn(collaborators, CoordinatorConfig::default());

        handle.start_auto_locate();
        let (seen, location) = until_commit(&mut events).await;

        assert_eq!(location.coordinate(), coord(4.0, 5.0));
        assert_eq!(location.address(), FALLBACK_ADDRESS);
        assert_eq!(commits(&seen).len(), 1);
    }

    #[tokio::test]
    async fn test_double_start_commits_only_latest_fix() {
        let latch = Latch::new();
        let mut h = harness(
            SimPermissions::granted(),
            SimPositions::new([Ok(coord(1.0, 1.0)), Ok(coord(2.0, 2.0))]).gated(latch.clone()),
            SimLookup::returning("Somewhere"),
        );

        h.handle.start_auto_locate();
        until_state(&mut h.events, CoordinatorState::Locating).await;

        // Restart before the first fix resolves; its result must be stale.
        h.handle.start_auto_locate();
        until_state(&mut h.events, CoordinatorState::Locating).await;

        latch.release(2);
        let (mut events, location) = until_commit(&mut h.events).await;
        assert_eq!(location.coordinate(), coord(2.0, 2.0));

        h.handle.reset();
        events.extend(until_state(&mut h.events, CoordinatorState::Idle).await);
        assert_eq!(commits(&events).len(), 1);
        assert_eq!(h.positions.calls(), 2);
    }

    #[tokio::test]
    async fn test_restart_during_address_lookup_commits_only_latest() {
        let latch = Latch::new();
        let mut h = harness(
            SimPermissions::granted(),
            SimPositions::new([Ok(coord(1.0, 1.0)), Ok(coord(2.0, 2.0))]),
            SimLookup::returning("Somewhere").gated(latch.clone()),
        );

        h.handle.start_auto_locate();
        until_state(&mut h.events, CoordinatorState::Locating).await;
        // The first fix is in; restart once its address lookup is in flight.
        while h.lookup.calls() == 0 {
            tokio::task::yield_now().await;
        }
        h.handle.start_auto_locate();
        until_state(&mut h.events, CoordinatorState::Locating).await;

        latch.release(2);
        let (mut events, location) = until_commit(&mut h.events).await;
        assert_eq!(location.coordinate(), coord(2.0, 2.0));
        assert_eq!(location.address(), "Somewhere");

        h.handle.reset();
        events.extend(until_state(&mut h.events, CoordinatorState::Idle).await);
        assert_eq!(commits(&events).len(), 1);
        assert_eq!(h.positions.calls(), 2);
    }

    #[tokio::test]
    async fn test_map_pick_commits_confirmed_tap() {
        let mut h = harness(
            SimPermissions::granted(),
            SimPositions::new([]),
            SimLookup::returning("1 Main St"),
        );

        h.handle.start_map_pick();
        h.handle.tap(coord(37.0, -122.0));
        h.handle.confirm_tap();
        let (events, location) = until_commit(&mut h.events).await;

        assert_eq!(
            events,
            vec![
                CoordinatorEvent::StateChanged(CoordinatorState::MapPicking),
                CoordinatorEvent::SelectionChanged(Some(coord(37.0, -122.0))),
                CoordinatorEvent::SelectionChanged(None),
                CoordinatorEvent::StateChanged(CoordinatorState::Confirming),
                CoordinatorEvent::StateChanged(CoordinatorState::Located),
                CoordinatorEvent::Committed(location.clone()),
            ],
        );
        assert_eq!(location.coordinate(), coord(37.0, -122.0));
        assert_eq!(location.address(), "1 Main St");
        assert_eq!(h.positions.calls(), 0);
    }

    #[tokio::test]
    async fn test_map_pick_falls_back_when_geocode_fails() {
        let mut h = harness(
            SimPermissions::granted(),
            SimPositions::new([]),
            SimLookup::failing(),
        );

        h.handle.start_map_pick();
        h.handle.tap(coord(10.0, 20.0));
        h.handle.confirm_tap();
        let (_, location) = until_commit(&mut h.events).await;

        assert_eq!(location.coordinate(), coord(10.0, 20.0));
        assert_eq!(location.address(), FALLBACK_ADDRESS);
    }

    #[tokio::test]
    async fn test_confirm_without_tap_prompts_and_stays_in_round() {
        let mut h = harness(
            SimPermissions::granted(),
            SimPositions::new([]),
            SimLookup::returning("2 Oak Ave"),
        );

        h.handle.start_map_pick();
        h.handle.confirm_tap();
        assert_eq!(
            next(&mut h.events).await,
            CoordinatorEvent::StateChanged(CoordinatorState::MapPicking)
        );
        assert_eq!(
            next(&mut h.events).await,
            CoordinatorEvent::Failed(ErrorKind::NoSelection)
        );

        // The round is still open: a tap and confirm go through.
        h.handle.tap(coord(3.0, 4.0));
        h.handle.confirm_tap();
        let (_, location) = until_commit(&mut h.events).await;
        assert_eq!(location.coordinate(), coord(3.0, 4.0));
    }

    #[tokio::test]
    async fn test_tap_replaces_previous_selection() {
        let mut h = harness(
            SimPermissions::granted(),
            SimPositions::new([]),
            SimLookup::returning("3 Pine Rd"),
        );

        h.handle.start_map_pick();
        h.handle.tap(coord(1.0, 1.0));
        h.handle.tap(coord(2.0, 2.0));
        h.handle.confirm_tap();
        let (events, location) = until_commit(&mut h.events).await;

        assert!(events.contains(&CoordinatorEvent::SelectionChanged(Some(coord(1.0, 1.0)))));
        assert!(events.contains(&CoordinatorEvent::SelectionChanged(Some(coord(2.0, 2.0)))));
        assert_eq!(location.coordinate(), coord(2.0, 2.0));
    }

    #[tokio::test]
    async fn test_cancel_map_pick_discards_selection() {
        let mut h = harness(
            SimPermissions::granted(),
            SimPositions::new([]),
            SimLookup::returning("unused"),
        );

        h.handle.start_map_pick();
        h.handle.tap(coord(5.0, 6.0));
        h.handle.cancel_map_pick();
        let events = until_state(&mut h.events, CoordinatorState::Idle).await;

        assert_eq!(
            events,
            vec![
                CoordinatorEvent::StateChanged(CoordinatorState::MapPicking),
                CoordinatorEvent::SelectionChanged(Some(coord(5.0, 6.0))),
                CoordinatorEvent::SelectionChanged(None),
                CoordinatorEvent::StateChanged(CoordinatorState::Idle),
            ],
        );
        assert_eq!(h.lookup.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_confirming_prevents_commit() {
        let latch = Latch::new();
        let mut h = harness(
            SimPermissions::granted(),
            SimPositions::new([]),
            SimLookup::returning("5 Elm St").gated(latch.clone()),
        );

        h.handle.start_map_pick();
        h.handle.tap(coord(5.0, 6.0));
        h.handle.confirm_tap();
        until_state(&mut h.events, CoordinatorState::Confirming).await;

        h.handle.cancel_map_pick();
        let mut events = until_state(&mut h.events, CoordinatorState::Idle).await;
        latch.release(1);

        // A fresh round commits a different point; only that one may land.
        h.handle.start_map_pick();
        h.handle.tap(coord(7.0, 8.0));
        h.handle.confirm_tap();
        latch.release(1);
        let (tail, location) = until_commit(&mut h.events).await;
        events.extend(tail);

        assert_eq!(location.coordinate(), coord(7.0, 8.0));
        assert_eq!(commits(&events).len(), 1);
    }

    #[tokio::test]
    async fn test_start_auto_from_picking_clears_selection() {
        let mut h = harness(
            SimPermissions::granted(),
            SimPositions::new([Ok(coord(59.3293, 18.0686))]),
            SimLookup::returning("Gamla Stan"),
        );

        h.handle.start_map_pick();
        h.handle.tap(coord(1.0, 1.0));
        until_state(&mut h.events, CoordinatorState::MapPicking).await;
        assert_eq!(
            next(&mut h.events).await,
            CoordinatorEvent::SelectionChanged(Some(coord(1.0, 1.0)))
        );

        h.handle.start_auto_locate();
        assert_eq!(next(&mut h.events).await, CoordinatorEvent::SelectionChanged(None));
        let (events, location) = until_commit(&mut h.events).await;

        assert_eq!(location.coordinate(), coord(59.3293, 18.0686));
        assert_eq!(location.address(), "Gamla Stan");
        assert_eq!(commits(&events).len(), 1);
    }

    #[tokio::test]
    async fn test_reset_after_commit_allows_new_attempt() {
        let mut h = harness(
            SimPermissions::granted(),
            SimPositions::new([Ok(coord(1.0, 1.0))]),
            SimLookup::returning("First St"),
        );

        h.handle.start_auto_locate();
        let (_, first) = until_commit(&mut h.events).await;
        assert_eq!(first.coordinate(), coord(1.0, 1.0));

        h.handle.reset();
        until_state(&mut h.events, CoordinatorState::Idle).await;

        h.handle.start_map_pick();
        h.handle.tap(coord(2.0, 2.0));
        h.handle.confirm_tap();
        let (_, second) = until_commit(&mut h.events).await;
        assert_eq!(second.coordinate(), coord(2.0, 2.0));
    }

    #[tokio::test]
    async fn test_tap_outside_picking_round_is_ignored() {
        let mut h = harness(
            SimPermissions::granted(),
            SimPositions::new([]),
            SimLookup::returning("unused"),
        );

        h.handle.tap(coord(9.0, 9.0));
        h.handle.start_map_pick();
        assert_eq!(
            next(&mut h.events).await,
            CoordinatorEvent::StateChanged(CoordinatorState::MapPicking)
        );

        // The early tap was not stored: confirming now has nothing to take.
        h.handle.confirm_tap();
        assert_eq!(
            next(&mut h.events).await,
            CoordinatorEvent::Failed(ErrorKind::NoSelection)
        );
    }
}
