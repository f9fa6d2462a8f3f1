#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use teamrules::prelude::*;

const CONFIG: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../teamrules.yaml");

#[tokio::test]
async fn demo_config_founds_a_team() {
    let state = teamrules::load(CONFIG).expect("demo config must load");
    let store = state.store();
    let alice = Actor::user("u-alice", "alice@example.com");

    store
        .transact(
            &alice,
            vec![
                (
                    "teams".to_string(),
                    Mutation::create(Record::new("t1").with_attr("name", "core").with_attr("creatorId", "u-alice")),
                ),
                (
                    "memberships".to_string(),
                    Mutation::create(
                        Record::new("m1")
                            .with_attr("userId", "u-alice")
                            .with_attr("userEmail", "alice@example.com")
                            .with_link("teams", "t1"),
                    ),
                ),
            ],
        )
        .await
        .unwrap();

    let team = store.view(&alice, "teams", &RecordId::from("t1")).await.unwrap();
    assert_eq!(team.field("creatorId"), serde_json::json!("u-alice"));

    let err = store
        .view(&Actor::anonymous(), "teams", &RecordId::from("t1"))
        .await
        .unwrap_err();
    assert!(matches!(err, PermError::NotAllowed));
}
