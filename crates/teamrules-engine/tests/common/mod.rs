#![allow(dead_code)]

use teamrules_core::model::{Actor, Record};
use teamrules_engine::app_state::AppState;
use teamrules_engine::store::MemoryStore;

pub const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/teamrules.yaml");

pub fn state() -> AppState {
    AppState::load(FIXTURE).expect("fixture config must load")
}

pub fn alice() -> Actor {
    Actor::user("u-alice", "alice@example.com")
}

pub fn bob() -> Actor {
    Actor::user("u-bob", "bob@example.com")
}

pub fn carol() -> Actor {
    Actor::user("u-carol", "carol@example.com")
}

/// Team created by `creator` whose members are `members`, seeded without
/// authorization.
pub fn seed_team(store: &MemoryStore, team: &str, creator: &Actor, members: &[&Actor]) {
    let creator_id = creator.id.clone().unwrap_or_default();
    store
        .seed(
            "teams",
            Record::new(team)
                .with_attr("name", team)
                .with_attr("creatorId", creator_id),
        )
        .expect("seed team");
    for m in members {
        let id = m.id.clone().unwrap_or_default();
        let email = m.email.clone().unwrap_or_default();
        store
            .seed(
                "memberships",
                Record::new(format!("{team}-{id}"))
                    .with_attr("userId", id)
                    .with_attr("userEmail", email)
                    .with_link("teams", team),
            )
            .expect("seed membership");
    }
}

pub fn seed_invite(store: &MemoryStore, id: &str, team: &str, email: &str) {
    store
        .seed(
            "invites",
            Record::new(id).with_attr("userEmail", email).with_link("teams", team),
        )
        .expect("seed invite");
}

pub fn seed_todo(store: &MemoryStore, id: &str, team: &str) {
    store
        .seed(
            "todos",
            Record::new(id)
                .with_attr("text", "write tests")
                .with_attr("done", false)
                .with_link("teams", team),
        )
        .expect("seed todo");
}
