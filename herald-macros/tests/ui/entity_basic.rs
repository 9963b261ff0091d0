use herald_domain::entity::Entity;
use herald_macros::entity;

#[entity]
#[derive(Clone)]
struct Account {
    name: String,
    balance: i64,
}

fn main() {
    let mut account = Account::new("acc-1".to_string());
    account.name = "alice".into();
    account.set_version(3);

    assert_eq!(account.id(), "acc-1");
    assert_eq!(account.version(), 3);
    assert_eq!(account.balance, 0);
    assert!(account.uncommitted_events().is_empty());
    assert!(!account.is_deleted());

    let cloned = account.clone();
    assert!(format!("{cloned:?}").contains("alice"));

    let json = serde_json::to_value(&account).unwrap();
    assert!(json.get("uncommitted_events").is_none());
    assert_eq!(json["deleted"], false);
}
