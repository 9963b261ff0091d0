use herald_domain::entity::Entity;
use herald_macros::entity;
use std::fmt;

#[entity(debug = false)]
struct Secret {
    token: String,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret").field("id", &self.id).finish_non_exhaustive()
    }
}

fn main() {
    let secret = Secret::new("s-1".to_string());
    assert!(secret.token.is_empty());
    assert!(!format!("{secret:?}").contains("token"));
}
