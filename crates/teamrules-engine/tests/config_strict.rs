#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use teamrules_engine::app_state::AppState;
use teamrules_engine::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
policy:
  path: "perms.json"
schema:
  entities:
    teams:
      atrs: [name] # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
}

#[test]
fn unsupported_version() {
    let bad = r#"
version: 2
policy:
  path: "perms.json"
schema:
  entities:
    teams: {}
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "UNSUPPORTED_VERSION");
}

#[test]
fn empty_policy_path_rejected() {
    let bad = r#"
version: 1
policy:
  path: "  "
schema:
  entities:
    teams: {}
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
}

#[test]
fn ok_minimal_config() {
    let ok = r#"
version: 1
policy:
  path: "perms.json"
schema:
  entities:
    teams: {}
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.version, 1);
    assert!(cfg.policy.fail_fast);
    assert!(cfg.schema.entities["teams"].attrs.is_empty());
    assert!(cfg.schema.links.is_empty());
}

#[test]
fn fixture_config_loads_with_its_manifest() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/teamrules.yaml");
    let state = AppState::load(path).expect("fixture must load");

    assert!(state.load_errors().is_empty());
    let policy = state.authorizer().policy();
    assert_eq!(
        policy.entity_names(),
        vec!["drawings", "invites", "memberships", "teams", "todos"]
    );
    let ops: Vec<&str> = policy
        .permitted_ops("invites")
        .into_iter()
        .map(|op| op.as_str())
        .collect();
    assert_eq!(ops, vec!["view", "create", "delete"]);
}

#[test]
fn policy_over_unknown_entity_fails_fast() {
    let cfg = config::load_from_str(
        r#"
version: 1
policy:
  path: "perms.json"
schema:
  entities:
    teams: {}
"#,
    )
    .unwrap();
    let doc = config::load_policy_yaml(
        r#"
ghosts:
  allow:
    view: "true"
"#,
    )
    .unwrap();

    let err = AppState::new(cfg, &doc).err().expect("must fail");
    assert_eq!(err.client_code().as_str(), "CONFIG");
}

#[test]
fn lenient_config_quarantines_instead_of_failing() {
    let cfg = config::load_from_str(
        r#"
version: 1
policy:
  path: "perms.yaml"
  fail_fast: false
schema:
  entities:
    teams: { attrs: [name] }
    notes: { attrs: [body] }
"#,
    )
    .unwrap();
    let doc = config::load_policy_yaml(
        r#"
teams:
  allow:
    view: "true"
notes:
  bind: ["isOwner"]
  allow:
    view: "isOwner"
"#,
    )
    .unwrap();

    let state = AppState::new(cfg, &doc).expect("lenient load succeeds");
    assert!(!state.load_errors().is_empty());
    assert!(state.authorizer().policy().is_quarantined("notes"));
    assert!(!state.authorizer().policy().is_quarantined("teams"));
}
