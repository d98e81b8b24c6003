//! The data-connection lifecycle state machine.

use std::net::SocketAddr;

/// The direction a data connection is open for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `RETR`: server sends file bytes to the client.
    Retrieve,
    /// `STOR`/`STOU`/`APPE`: server receives file bytes from the client.
    Store,
    /// `LIST`/`NLST`: server sends a directory listing to the client.
    List,
}

/// The data connection's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// No data connection set up yet.
    Idle,
    /// A local endpoint is listening, waiting for the client to connect in (post-`PASV`).
    BoundPassive,
    /// A connect-back to the client's advertised endpoint is in flight (post-`PORT`).
    ConnectingActive,
    /// The data connection is open but no transfer has started streaming yet.
    Open,
    /// A file transfer is in progress.
    Transferring,
    /// The data side has signalled end-of-data; the control side has not yet replied `226`.
    PreEnd,
    /// The channel is tearing down.
    Closing,
    /// An abort was observed; further blocks are discarded until `Closing` completes.
    Aborted,
}

/// Tracks one data connection across its `IDLE -> ... -> {CLOSING, ABORTED}` lifecycle (§4.4).
///
/// A session owns exactly one `TransferController`; it is reset to `Idle` once a transfer's
/// teardown completes, ready for the next `PORT`/`PASV`.
#[derive(Debug)]
pub struct TransferController {
    state: TransferState,
    direction: Option<Direction>,
    /// Bound/advertised endpoint: the listening address for `PASV`, the client's address for
    /// `PORT`.
    endpoint: Option<SocketAddr>,
}

impl TransferController {
    /// A fresh controller, in `Idle`.
    pub fn new() -> Self {
        TransferController {
            state: TransferState::Idle,
            direction: None,
            endpoint: None,
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Whether a transfer is in flight; a second transfer verb while this holds must be
    /// rejected with `425` rather than disturbing the running one.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            TransferState::Open | TransferState::Transferring | TransferState::PreEnd | TransferState::Closing
        )
    }

    /// `PASV`: binds a local listener, entering `BoundPassive`.
    pub fn bind_passive(&mut self, endpoint: SocketAddr) {
        self.state = TransferState::BoundPassive;
        self.endpoint = Some(endpoint);
        self.direction = None;
    }

    /// `PORT`: records the client's advertised endpoint; the connect-back itself happens when a
    /// transfer verb arrives, via [`Self::begin_active_connect`].
    pub fn set_active_endpoint(&mut self, endpoint: SocketAddr) {
        self.state = TransferState::Idle;
        self.endpoint = Some(endpoint);
        self.direction = None;
    }

    /// A transfer verb arrived while a `PORT` endpoint is on file: move to `ConnectingActive`.
    pub fn begin_active_connect(&mut self, direction: Direction) {
        self.state = TransferState::ConnectingActive;
        self.direction = Some(direction);
    }

    /// The data socket (active connect-back or passive accept) is established.
    pub fn channel_opened(&mut self, direction: Direction) {
        self.state = TransferState::Open;
        self.direction = Some(direction);
    }

    /// The transfer's first byte is about to move; called right after the control channel's
    /// `150` reply has been queued, per the reply-before-data ordering guarantee.
    pub fn start_transferring(&mut self) {
        self.state = TransferState::Transferring;
    }

    /// The sending side emitted its EOF block.
    pub fn signal_pre_end(&mut self) {
        self.state = TransferState::PreEnd;
    }

    /// The data socket has fully closed after a clean end-of-transfer.
    pub fn channel_closed(&mut self) {
        self.state = TransferState::Idle;
        self.direction = None;
        self.endpoint = None;
    }

    /// `ABOR`, or an I/O fault observed while `Transferring`: mark `Aborted`. Any block arriving
    /// after this point must be discarded until `Closing` completes.
    pub fn abort(&mut self) {
        self.state = TransferState::Aborted;
    }

    /// The (possibly aborted) data socket is being torn down.
    pub fn begin_closing(&mut self) {
        self.state = TransferState::Closing;
    }

    /// Teardown finished; back to a clean slate for the next `PORT`/`PASV`.
    pub fn reset(&mut self) {
        self.state = TransferState::Idle;
        self.direction = None;
        self.endpoint = None;
    }

    /// The endpoint recorded by the most recent `PORT`/`PASV`.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    /// The direction of the in-flight (or most recently finished) transfer.
    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }
}

impl Default for TransferController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passive_then_transfer_then_clean_close() {
        let mut ctl = TransferController::new();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        ctl.bind_passive(addr);
        assert_eq!(ctl.state(), TransferState::BoundPassive);
        ctl.channel_opened(Direction::Retrieve);
        assert_eq!(ctl.state(), TransferState::Open);
        assert!(ctl.is_busy());
        ctl.start_transferring();
        ctl.signal_pre_end();
        assert_eq!(ctl.state(), TransferState::PreEnd);
        ctl.channel_closed();
        assert_eq!(ctl.state(), TransferState::Idle);
        assert!(!ctl.is_busy());
    }

    #[test]
    fn abort_while_transferring_then_close() {
        let mut ctl = TransferController::new();
        ctl.channel_opened(Direction::Store);
        ctl.start_transferring();
        ctl.abort();
        assert_eq!(ctl.state(), TransferState::Aborted);
        ctl.begin_closing();
        ctl.reset();
        assert_eq!(ctl.state(), TransferState::Idle);
    }

    #[test]
    fn second_transfer_while_busy_is_rejected_by_the_dispatcher() {
        let mut ctl = TransferController::new();
        ctl.channel_opened(Direction::List);
        ctl.start_transferring();
        assert!(ctl.is_busy());
    }
}
