use herald_domain::domain_event::{EventKind, EventPayload};
use herald_macros::event;

#[event]
struct Heartbeat {}

#[event(kind = "system")]
struct NodeJoined {
    node: String,
}

fn main() {
    assert_eq!(Heartbeat::EVENT_TYPE, "Heartbeat");
    assert_eq!(Heartbeat::KIND, EventKind::Domain);
    assert_eq!(NodeJoined::EVENT_TYPE, "NodeJoined");
    assert_eq!(NodeJoined::KIND, EventKind::System);

    let _ = NodeJoined { node: "n1".into() }.clone();
}
