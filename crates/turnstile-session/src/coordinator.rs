//! The auth session coordinator: one identity validation at a time.
//!
//! ```text
//!            dequeue Connect, checks pass, start_session() == true
//!   ┌──────┐ ───────────────────────────────────────────→ ┌────────────────┐
//!   │ Idle │                                              │ Authenticating │
//!   └──────┘ ←─────────────────────────────────────────── └────────────────┘
//!      ↑ │      status change for the pending key, or deadline reached
//!      └─┘
//!   Disconnect, failed checks
//! ```
//!
//! Everything happens inside [`AuthCoordinator::tick`]. The "resolving"
//! step is the moment the pending entry is moved out of the slot: from
//! then on the state is already `Idle` and the entry is owned by the code
//! deciding its fate, so nothing else can observe or resolve it twice.

use std::mem;
use std::time::Instant;

use turnstile_protocol::{HandshakeMessage, IdentityKey};
use turnstile_transport::ConnectionId;

use crate::{
    AdmissionConfig, AuthStatus, ConnectRequest, ConnectionOperation, EventSender,
    IdentityValidator, OperationKind, OperationQueue, PeerLink, QueueHandle,
    RejectReason, SessionError, SessionEvent, SessionRoster, SessionUser,
    StatusChange, StatusReceiver,
};

// ---------------------------------------------------------------------------
// PendingAuth / AuthState
// ---------------------------------------------------------------------------

/// The single in-flight authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuth {
    generation: u64,
    peer: ConnectionId,
    request: ConnectRequest,
    identity_key: IdentityKey,
    deadline: Instant,
}

impl PendingAuth {
    pub(crate) fn new(
        generation: u64,
        peer: ConnectionId,
        request: ConnectRequest,
        identity_key: IdentityKey,
        deadline: Instant,
    ) -> Self {
        Self {
            generation,
            peer,
            request,
            identity_key,
            deadline,
        }
    }

    /// Monotonic number distinguishing this attempt from every other one,
    /// even a later attempt by the same peer with the same identity.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn peer(&self) -> ConnectionId {
        self.peer
    }

    pub fn request(&self) -> &ConnectRequest {
        &self.request
    }

    pub fn identity_key(&self) -> IdentityKey {
        self.identity_key
    }

    /// When the attempt times out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Coordinator state. At most one [`PendingAuth`] exists because it can
/// only live inside `Authenticating`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    Authenticating(PendingAuth),
}

impl AuthState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn pending(&self) -> Option<&PendingAuth> {
        match self {
            Self::Idle => None,
            Self::Authenticating(pending) => Some(pending),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthCoordinator
// ---------------------------------------------------------------------------

/// Owns the operation queue, the auth slot and the roster, and drives the
/// identity validator.
///
/// Independent instances share nothing, so tests can run as many as they
/// like side by side.
pub struct AuthCoordinator<V: IdentityValidator> {
    config: AdmissionConfig,
    validator: V,
    statuses: StatusReceiver,
    events: EventSender,
    queue: OperationQueue,
    state: AuthState,
    roster: SessionRoster,
    /// Generation handed to the most recent `PendingAuth`.
    generation: u64,
}

impl<V: IdentityValidator> AuthCoordinator<V> {
    /// Creates an idle coordinator with an empty roster.
    ///
    /// `statuses` is the receiving end of the channel `validator` reports
    /// verdicts on; see [`status_channel`](crate::status_channel).
    pub fn new(
        config: AdmissionConfig,
        validator: V,
        statuses: StatusReceiver,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            validator,
            statuses,
            events,
            queue: OperationQueue::new(),
            state: AuthState::Idle,
            roster: SessionRoster::new(),
            generation: 0,
        }
    }

    /// Producer handle for the operation queue.
    pub fn queue_handle(&self) -> QueueHandle {
        self.queue.handle()
    }

    /// Appends an operation to the queue.
    pub fn enqueue(&self, op: ConnectionOperation) {
        self.queue.enqueue(op);
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn roster(&self) -> &SessionRoster {
        &self.roster
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Operations waiting behind the current one.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn validator(&self) -> &V {
        &self.validator
    }

    pub fn validator_mut(&mut self) -> &mut V {
        &mut self.validator
    }

    /// Runs one scheduling tick.
    ///
    /// In order:
    /// 1. applies every verdict the validator has reported so far,
    /// 2. times out the pending attempt if `now` is past its deadline,
    /// 3. if idle, takes at most one operation off the queue.
    ///
    /// A verdict and a deadline landing in the same tick therefore
    /// resolve in favour of the verdict.
    pub fn tick(&mut self, now: Instant, link: &impl PeerLink) {
        while let Ok(change) = self.statuses.try_recv() {
            self.on_status_change(change, now, link);
        }

        let expired = self
            .state
            .pending()
            .filter(|pending| now >= pending.deadline)
            .map(PendingAuth::generation);
        if let Some(generation) = expired {
            self.on_timer_fired(generation, link);
        }

        if let Some(op) = self.queue.try_dequeue_if_idle(&self.state) {
            self.process(op, now, link);
        }
    }

    /// Applies one validator verdict.
    ///
    /// Verdicts for any identity other than the pending one are
    /// informational (a ticket canceled by someone who already left, a
    /// status refresh for an admitted user) and change nothing.
    pub fn on_status_change(
        &mut self,
        change: StatusChange,
        now: Instant,
        link: &impl PeerLink,
    ) {
        let StatusChange {
            identity_key,
            owner_key,
            status,
        } = change;

        let pending = match mem::replace(&mut self.state, AuthState::Idle) {
            AuthState::Authenticating(pending) if pending.identity_key == identity_key => {
                pending
            }
            other => {
                self.state = other;
                match status {
                    AuthStatus::TicketCanceled => {
                        tracing::info!(%identity_key, "identity ticket canceled");
                    }
                    _ => {
                        tracing::debug!(%identity_key, %status, "identity status changed");
                    }
                }
                return;
            }
        };

        match status {
            AuthStatus::Ok => self.admit(pending, owner_key, now, link),
            AuthStatus::TicketCanceled => {
                tracing::warn!(
                    peer = %pending.peer,
                    %identity_key,
                    "identity ticket canceled while authenticating"
                );
            }
            status => {
                reject(
                    link,
                    pending.peer,
                    RejectReason::ValidationFailed {
                        identity_key,
                        status,
                    },
                );
            }
        }
    }

    /// Times out the pending attempt if it is still generation
    /// `generation`. Returns whether anything happened.
    ///
    /// `tick` calls this when the deadline passes. It is public so an
    /// external timer can deliver its firing as a message instead; a
    /// firing for an attempt that already resolved is a no-op.
    pub fn on_timer_fired(&mut self, generation: u64, link: &impl PeerLink) -> bool {
        let pending = match mem::replace(&mut self.state, AuthState::Idle) {
            AuthState::Authenticating(pending) if pending.generation == generation => pending,
            other => {
                self.state = other;
                tracing::debug!(generation, "stale auth timer ignored");
                return false;
            }
        };

        tracing::warn!(
            peer = %pending.peer,
            identity_key = %pending.identity_key,
            generation,
            "identity validation timed out"
        );
        reject(link, pending.peer, RejectReason::TimedOut);
        self.validator.end_session(pending.identity_key);
        true
    }

    /// Tears everything down: the pending attempt is rejected, every
    /// admitted user's validator session is ended, and the roster is
    /// emptied. Queued operations are left where they are and will never
    /// be processed.
    pub fn shutdown(&mut self, link: &impl PeerLink) {
        if let AuthState::Authenticating(pending) = mem::replace(&mut self.state, AuthState::Idle)
        {
            reject(link, pending.peer, RejectReason::ShuttingDown);
            self.validator.end_session(pending.identity_key);
        }

        let users = self.roster.drain();
        tracing::info!(
            users = users.len(),
            abandoned = self.queue.len(),
            "shutting down admission"
        );
        for user in users {
            self.validator.end_session(user.identity_key);
            self.emit(SessionEvent::UserExited(user));
        }
    }

    // -- Operation processing ---------------------------------------------

    fn process(&mut self, op: ConnectionOperation, now: Instant, link: &impl PeerLink) {
        let (peer, kind) = op.into_parts();
        tracing::debug!(%peer, %kind, remaining = self.queue.len(), "processing operation");
        match kind {
            OperationKind::Connect(request) => self.begin(peer, request, now, link),
            OperationKind::Disconnect => self.dispose(peer),
        }
    }

    /// `Idle → Authenticating`, if every precondition holds.
    fn begin(
        &mut self,
        peer: ConnectionId,
        request: ConnectRequest,
        now: Instant,
        link: &impl PeerLink,
    ) {
        if !link.status(peer).is_connected() {
            tracing::warn!(%peer, "peer disconnected before authentication started");
            return;
        }
        if let Some(user) = self.roster.get_by_peer(peer) {
            tracing::warn!(
                %peer,
                identity_key = %user.identity_key,
                "duplicate connect from admitted peer dropped"
            );
            return;
        }

        let count = self.roster.len();
        if count >= self.config.max_players {
            let max = self.config.max_players;
            return reject(link, peer, RejectReason::ServerFull { count, max });
        }
        if request.version != self.config.required_version {
            let reason = RejectReason::VersionMismatch {
                client: request.version,
                server: self.config.required_version.clone(),
            };
            return reject(link, peer, reason);
        }
        if request.ticket.is_empty() {
            let reason = RejectReason::Malformed("empty identity ticket".into());
            return reject(link, peer, reason);
        }
        let identity_key = match IdentityKey::from_wire(&request.identity_key) {
            Ok(key) => key,
            Err(e) => return reject(link, peer, RejectReason::Malformed(e.to_string())),
        };
        if self.roster.contains(identity_key) {
            return reject(link, peer, RejectReason::IdentityInUse(identity_key));
        }

        tracing::info!(
            %peer,
            %identity_key,
            display_name = %request.display_name,
            "authorizing identity"
        );
        if !self.validator.start_session(&request.ticket, identity_key) {
            return reject(link, peer, RejectReason::ValidatorStartFailed);
        }

        self.generation += 1;
        let deadline = now + self.config.auth_timeout;
        self.state = AuthState::Authenticating(PendingAuth::new(
            self.generation,
            peer,
            request,
            identity_key,
            deadline,
        ));
    }

    /// Validation succeeded: put the user in the roster and tell them.
    fn admit(
        &mut self,
        pending: PendingAuth,
        owner_key: IdentityKey,
        now: Instant,
        link: &impl PeerLink,
    ) {
        let PendingAuth {
            peer,
            request,
            identity_key,
            ..
        } = pending;

        if !link.status(peer).is_connected() {
            tracing::warn!(%peer, %identity_key, "peer disconnected while authorizing");
            self.validator.end_session(identity_key);
            return;
        }

        let user = SessionUser {
            peer,
            identity_key,
            owner_key,
            display_name: request.display_name,
            joined_at: now,
        };
        match self.roster.add(user.clone()) {
            Ok(_) => {
                tracing::info!(
                    %peer,
                    %identity_key,
                    %owner_key,
                    users = self.roster.len(),
                    "identity accepted"
                );
                link.send(peer, HandshakeMessage::ConnectionAccepted);
                self.emit(SessionEvent::UserJoined(user));
            }
            Err(e) => {
                tracing::error!(%peer, error = %e, "roster invariant violated, rejecting");
                self.validator.end_session(identity_key);
                // `add` only fails on a duplicate identity or a duplicate peer.
                let reason = match e {
                    SessionError::DuplicateIdentity(key) => RejectReason::IdentityInUse(key),
                    _ => RejectReason::AlreadyAdmitted,
                };
                reject(link, peer, reason);
            }
        }
    }

    /// Handles a disconnect: drop the user, if there is one.
    fn dispose(&mut self, peer: ConnectionId) {
        match self.roster.remove_by_peer(peer) {
            Some(user) => {
                tracing::info!(
                    %peer,
                    identity_key = %user.identity_key,
                    "finishing identity session"
                );
                self.validator.end_session(user.identity_key);
                self.emit(SessionEvent::UserExited(user));
            }
            None => {
                tracing::debug!(%peer, "disconnected peer had no session user");
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

fn reject(link: &impl PeerLink, peer: ConnectionId, reason: RejectReason) {
    tracing::warn!(%peer, %reason, "rejecting connection");
    link.send(peer, HandshakeMessage::rejected(&reason));
}

#[cfg(test)]
mod tests {
    //! State-machine tests. End-to-end admission scenarios live in
    //! `tests/admission.rs`.

    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::time::Duration;

    use turnstile_transport::PeerStatus;

    use super::*;
    use crate::{event_channel, status_channel, EventReceiver, StatusSender};

    // -- Helpers ----------------------------------------------------------

    #[derive(Default)]
    struct RecordingValidator {
        refuse: bool,
        started: Vec<IdentityKey>,
        ended: Vec<IdentityKey>,
    }

    impl IdentityValidator for RecordingValidator {
        fn start_session(&mut self, _ticket: &[u8], identity_key: IdentityKey) -> bool {
            self.started.push(identity_key);
            !self.refuse
        }

        fn end_session(&mut self, identity_key: IdentityKey) {
            self.ended.push(identity_key);
        }
    }

    #[derive(Default)]
    struct TestLink {
        sent: RefCell<Vec<(ConnectionId, HandshakeMessage)>>,
        gone: RefCell<HashSet<ConnectionId>>,
    }

    impl TestLink {
        fn drop_peer(&self, peer: ConnectionId) {
            self.gone.borrow_mut().insert(peer);
        }

        fn take(&self) -> Vec<(ConnectionId, HandshakeMessage)> {
            mem::take(&mut *self.sent.borrow_mut())
        }
    }

    impl PeerLink for TestLink {
        fn send(&self, peer: ConnectionId, message: HandshakeMessage) {
            self.sent.borrow_mut().push((peer, message));
        }

        fn status(&self, peer: ConnectionId) -> PeerStatus {
            if self.gone.borrow().contains(&peer) {
                PeerStatus::Disconnected
            } else {
                PeerStatus::Connected
            }
        }
    }

    struct Harness {
        coordinator: AuthCoordinator<RecordingValidator>,
        verdicts: StatusSender,
        events: EventReceiver,
        link: TestLink,
        now: Instant,
    }

    fn harness() -> Harness {
        let (verdicts, statuses) = status_channel();
        let (events_tx, events) = event_channel();
        Harness {
            coordinator: AuthCoordinator::new(
                AdmissionConfig::default(),
                RecordingValidator::default(),
                statuses,
                events_tx,
            ),
            verdicts,
            events,
            link: TestLink::default(),
            now: Instant::now(),
        }
    }

    fn peer(id: u64) -> ConnectionId {
        ConnectionId::new(id)
    }

    fn connect(id: u64, key: u64) -> ConnectionOperation {
        ConnectionOperation::connect(
            peer(id),
            ConnectRequest {
                version: "1.0".into(),
                ticket: vec![0xAA; 4],
                identity_key: IdentityKey(key).to_wire().to_vec(),
                display_name: format!("user-{key}"),
            },
        )
    }

    impl Harness {
        fn tick(&mut self) {
            self.coordinator.tick(self.now, &self.link);
        }

        fn advance(&mut self, by: Duration) {
            self.now += by;
        }

        fn verdict(&self, key: u64, status: AuthStatus) {
            self.verdicts
                .send(StatusChange {
                    identity_key: IdentityKey(key),
                    owner_key: IdentityKey(key),
                    status,
                })
                .unwrap();
        }

        fn pending_generation(&self) -> u64 {
            self.coordinator.state().pending().expect("should be pending").generation()
        }
    }

    // =====================================================================
    // Idle → Authenticating
    // =====================================================================

    #[test]
    fn test_tick_connect_starts_validation_and_sets_deadline() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));

        h.tick();

        let pending = h.coordinator.state().pending().expect("authenticating");
        assert_eq!(pending.peer(), peer(1));
        assert_eq!(pending.identity_key(), IdentityKey(100));
        assert_eq!(pending.deadline(), h.now + Duration::from_secs(5));
        assert_eq!(h.coordinator.validator().started, vec![IdentityKey(100)]);
        assert!(h.link.take().is_empty(), "nothing is sent until a verdict");
    }

    #[test]
    fn test_tick_processes_one_operation_per_tick() {
        let mut h = harness();
        h.coordinator.enqueue(ConnectionOperation::disconnect(peer(1)));
        h.coordinator.enqueue(ConnectionOperation::disconnect(peer(2)));

        h.tick();

        assert_eq!(h.coordinator.queued(), 1);
    }

    #[test]
    fn test_tick_connect_from_disconnected_peer_is_dropped_silently() {
        let mut h = harness();
        h.link.drop_peer(peer(1));
        h.coordinator.enqueue(connect(1, 100));

        h.tick();

        assert!(h.coordinator.state().is_idle());
        assert!(h.coordinator.validator().started.is_empty());
        assert!(h.link.take().is_empty());
    }

    #[test]
    fn test_tick_validator_refuses_start_rejects() {
        let mut h = harness();
        h.coordinator.validator_mut().refuse = true;
        h.coordinator.enqueue(connect(1, 100));

        h.tick();

        assert!(h.coordinator.state().is_idle());
        assert_eq!(
            h.link.take(),
            vec![(peer(1), HandshakeMessage::rejected("failed to start auth session"))]
        );
    }

    #[test]
    fn test_tick_malformed_identity_key_rejects_and_continues() {
        let mut h = harness();
        let bad = ConnectionOperation::connect(
            peer(1),
            ConnectRequest {
                version: "1.0".into(),
                ticket: vec![1],
                identity_key: vec![1, 2, 3],
                display_name: "short".into(),
            },
        );
        h.coordinator.enqueue(bad);
        h.coordinator.enqueue(connect(2, 200));

        h.tick();
        h.tick();

        let sent = h.link.take();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            (p, HandshakeMessage::ConnectionRejected { reason }) => {
                assert_eq!(*p, peer(1));
                assert!(reason.starts_with("malformed handshake"), "{reason}");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(h.coordinator.state().pending().unwrap().peer(), peer(2));
    }

    #[test]
    fn test_tick_empty_ticket_rejects() {
        let mut h = harness();
        let op = ConnectionOperation::connect(
            peer(1),
            ConnectRequest {
                version: "1.0".into(),
                ticket: Vec::new(),
                identity_key: IdentityKey(1).to_wire().to_vec(),
                display_name: "x".into(),
            },
        );
        h.coordinator.enqueue(op);

        h.tick();

        assert!(h.coordinator.validator().started.is_empty());
        assert!(matches!(
            h.link.take().as_slice(),
            [(_, HandshakeMessage::ConnectionRejected { .. })]
        ));
    }

    // =====================================================================
    // Verdicts
    // =====================================================================

    #[test]
    fn test_status_ok_admits_and_sends_accepted() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.tick();

        h.verdict(100, AuthStatus::Ok);
        h.tick();

        assert!(h.coordinator.state().is_idle());
        assert_eq!(h.coordinator.roster().len(), 1);
        assert_eq!(h.link.take(), vec![(peer(1), HandshakeMessage::ConnectionAccepted)]);
        match h.events.try_recv().unwrap() {
            SessionEvent::UserJoined(user) => {
                assert_eq!(user.identity_key, IdentityKey(100));
                assert_eq!(user.display_name, "user-100");
                assert_eq!(user.joined_at, h.now);
            }
            other => panic!("expected UserJoined, got {other:?}"),
        }
    }

    #[test]
    fn test_status_ok_for_peer_already_in_roster_rejects_as_admitted() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.tick();
        h.coordinator
            .roster
            .add(SessionUser {
                peer: peer(1),
                identity_key: IdentityKey(999),
                owner_key: IdentityKey(999),
                display_name: "squatter".into(),
                joined_at: h.now,
            })
            .unwrap();

        h.verdict(100, AuthStatus::Ok);
        h.tick();

        assert!(h.coordinator.state().is_idle());
        assert_eq!(h.coordinator.validator().ended, vec![IdentityKey(100)]);
        assert_eq!(
            h.link.take(),
            vec![(peer(1), HandshakeMessage::rejected("connection already admitted"))]
        );
    }

    #[test]
    fn test_status_ok_for_identity_already_in_roster_rejects_in_use() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.tick();
        h.coordinator
            .roster
            .add(SessionUser {
                peer: peer(2),
                identity_key: IdentityKey(100),
                owner_key: IdentityKey(100),
                display_name: "twin".into(),
                joined_at: h.now,
            })
            .unwrap();

        h.verdict(100, AuthStatus::Ok);
        h.tick();

        assert_eq!(
            h.link.take(),
            vec![(peer(1), HandshakeMessage::rejected("identity already in session (ID-100)"))]
        );
    }

    #[test]
    fn test_status_ok_records_owner_key() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.tick();

        h.verdicts
            .send(StatusChange {
                identity_key: IdentityKey(100),
                owner_key: IdentityKey(7),
                status: AuthStatus::Ok,
            })
            .unwrap();
        h.tick();

        let user = h.coordinator.roster().get(IdentityKey(100)).unwrap();
        assert_eq!(user.owner_key, IdentityKey(7));
    }

    #[test]
    fn test_status_for_other_identity_changes_nothing() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.tick();
        let generation = h.pending_generation();

        h.verdict(999, AuthStatus::TicketCanceled);
        h.verdict(998, AuthStatus::Ok);
        h.tick();

        assert_eq!(h.pending_generation(), generation);
        assert!(h.coordinator.roster().is_empty());
        assert!(h.link.take().is_empty());
    }

    #[test]
    fn test_status_ticket_canceled_returns_to_idle_without_message() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.tick();

        h.verdict(100, AuthStatus::TicketCanceled);
        h.tick();

        assert!(h.coordinator.state().is_idle());
        assert!(h.link.take().is_empty());
        assert!(h.coordinator.roster().is_empty());
    }

    #[test]
    fn test_status_failure_rejects_with_status() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.tick();

        h.verdict(100, AuthStatus::Banned);
        h.tick();

        assert!(h.coordinator.state().is_idle());
        assert_eq!(
            h.link.take(),
            vec![(
                peer(1),
                HandshakeMessage::rejected("identity validation failed (ID-100): banned")
            )]
        );
    }

    #[test]
    fn test_status_while_idle_is_ignored() {
        let mut h = harness();

        h.verdict(100, AuthStatus::Ok);
        h.tick();

        assert!(h.coordinator.state().is_idle());
        assert!(h.coordinator.roster().is_empty());
    }

    // =====================================================================
    // Timeout
    // =====================================================================

    #[test]
    fn test_deadline_not_reached_keeps_waiting() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.tick();

        h.advance(Duration::from_millis(4_999));
        h.tick();

        assert!(!h.coordinator.state().is_idle());
        assert!(h.coordinator.validator().ended.is_empty());
    }

    #[test]
    fn test_deadline_reached_rejects_and_ends_session() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.tick();

        h.advance(Duration::from_secs(5));
        h.tick();

        assert!(h.coordinator.state().is_idle());
        assert_eq!(h.coordinator.validator().ended, vec![IdentityKey(100)]);
        assert_eq!(
            h.link.take(),
            vec![(peer(1), HandshakeMessage::rejected("authentication timed out"))]
        );
    }

    #[test]
    fn test_verdict_and_deadline_same_tick_verdict_wins() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.tick();

        h.verdict(100, AuthStatus::Ok);
        h.advance(Duration::from_secs(6));
        h.tick();

        assert_eq!(h.coordinator.roster().len(), 1);
        assert!(h.coordinator.validator().ended.is_empty());
        assert_eq!(h.link.take(), vec![(peer(1), HandshakeMessage::ConnectionAccepted)]);
    }

    #[test]
    fn test_on_timer_fired_stale_generation_is_noop() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.coordinator.enqueue(connect(1, 100));
        h.tick();
        let first = h.pending_generation();

        // First attempt resolves, the identical second one starts.
        h.verdict(100, AuthStatus::TicketCanceled);
        h.tick();
        let second = h.pending_generation();
        assert_ne!(first, second);

        assert!(!h.coordinator.on_timer_fired(first, &h.link));
        assert_eq!(h.pending_generation(), second);

        assert!(h.coordinator.on_timer_fired(second, &h.link));
        assert!(h.coordinator.state().is_idle());
    }

    #[test]
    fn test_on_timer_fired_while_idle_is_noop() {
        let mut h = harness();
        assert!(!h.coordinator.on_timer_fired(1, &h.link));
        assert!(h.link.take().is_empty());
    }

    // =====================================================================
    // Disconnect
    // =====================================================================

    #[test]
    fn test_disconnect_admitted_user_ends_session_and_emits_exit() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.tick();
        h.verdict(100, AuthStatus::Ok);
        h.tick();
        let _joined = h.events.try_recv().unwrap();

        h.coordinator.enqueue(ConnectionOperation::disconnect(peer(1)));
        h.tick();

        assert!(h.coordinator.roster().is_empty());
        assert_eq!(h.coordinator.validator().ended, vec![IdentityKey(100)]);
        assert!(matches!(
            h.events.try_recv().unwrap(),
            SessionEvent::UserExited(user) if user.peer == peer(1)
        ));
    }

    #[test]
    fn test_disconnect_waits_behind_pending_authentication() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.coordinator.enqueue(ConnectionOperation::disconnect(peer(1)));
        h.tick();

        h.tick();
        h.tick();
        assert_eq!(h.coordinator.queued(), 1, "disconnect must wait");

        h.verdict(100, AuthStatus::Ok);
        h.tick();
        assert!(h.coordinator.roster().is_empty(), "admitted then disposed in one tick");
        assert_eq!(h.coordinator.validator().ended, vec![IdentityKey(100)]);
    }

    // =====================================================================
    // Duplicate connects
    // =====================================================================

    #[test]
    fn test_duplicate_connect_from_admitted_peer_is_dropped() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.tick();
        h.verdict(100, AuthStatus::Ok);
        h.tick();
        h.link.take();

        h.coordinator.enqueue(connect(1, 100));
        h.tick();

        assert!(h.coordinator.state().is_idle());
        assert!(h.link.take().is_empty(), "joined peer must not be rejected");
        assert_eq!(h.coordinator.validator().started.len(), 1);
    }

    #[test]
    fn test_identity_already_in_session_is_rejected_before_validation() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.tick();
        h.verdict(100, AuthStatus::Ok);
        h.tick();
        h.link.take();

        h.coordinator.enqueue(connect(2, 100));
        h.tick();

        assert_eq!(h.coordinator.validator().started.len(), 1);
        assert_eq!(
            h.link.take(),
            vec![(peer(2), HandshakeMessage::rejected("identity already in session (ID-100)"))]
        );
    }

    // =====================================================================
    // shutdown()
    // =====================================================================

    #[test]
    fn test_shutdown_rejects_pending_and_ends_every_session() {
        let mut h = harness();
        h.coordinator.enqueue(connect(1, 100));
        h.tick();
        h.verdict(100, AuthStatus::Ok);
        h.tick();
        h.coordinator.enqueue(connect(2, 200));
        h.tick();
        h.link.take();
        let _joined = h.events.try_recv().unwrap();

        h.coordinator.shutdown(&h.link);

        assert!(h.coordinator.state().is_idle());
        assert!(h.coordinator.roster().is_empty());
        let mut ended = h.coordinator.validator().ended.clone();
        ended.sort();
        assert_eq!(ended, vec![IdentityKey(100), IdentityKey(200)]);
        assert_eq!(
            h.link.take(),
            vec![(peer(2), HandshakeMessage::rejected("server shutting down"))]
        );
        assert!(matches!(h.events.try_recv().unwrap(), SessionEvent::UserExited(_)));
    }
}
