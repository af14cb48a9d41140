/// Handshake lifecycle states (spec §3 "Lifecycle", §4.12). This core is
/// server-focused; the client states exist only because the handshake
/// driver's state machine is symmetric in shape.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConnState {
    ServerInitial,
    ServerHandshake,
    ClientInitial,
    ClientHandshake,
    Confirmed,
    Draining,
    Closed,
}

impl ConnState {
    pub fn is_draining_or_closed(self) -> bool {
        matches!(self, ConnState::Draining | ConnState::Closed)
    }
}
