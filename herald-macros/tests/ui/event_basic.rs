use herald_domain::domain_event::{Event, EventKind, EventPayload};
use herald_macros::event;

#[event(event_type = "user.registered", kind = "integration")]
#[derive(PartialEq)]
struct UserRegistered {
    user_id: String,
    #[serde(default)]
    referrer: Option<String>,
}

fn main() {
    assert_eq!(UserRegistered::EVENT_TYPE, "user.registered");
    assert_eq!(UserRegistered::KIND, EventKind::Integration);

    let payload = UserRegistered {
        user_id: "u1".into(),
        referrer: None,
    };
    let event = Event::from_payload(&payload).unwrap();
    assert_eq!(event.event_type(), "user.registered");
    assert_eq!(event.decode::<UserRegistered>().unwrap(), payload);
}
