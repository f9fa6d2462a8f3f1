//! Manifest parsing against the shipped permissions file.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]


use teamrules_core::document::PolicyDocument;
use teamrules_core::expr::parse_expr;
use teamrules_core::OperationKind;

#[test]
fn parse_shipped_manifest() {
    let doc = PolicyDocument::from_json_str(&vector_loader::load("perms.json")).unwrap();
    let names: Vec<&str> = doc.entities.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["drawings", "invites", "memberships", "teams", "todos"]);

    let memberships = doc.get("memberships").unwrap();
    let aliases: Vec<&str> = memberships.bind_pairs().map(|(a, _)| a).collect();
    assert_eq!(aliases, vec!["isMember", "isInviteeOrCreator", "isUser"]);
    assert_eq!(memberships.allow.rule(OperationKind::Update), Some("false"));
    assert_eq!(memberships.allow.rule(OperationKind::Create), Some("isInviteeOrCreator"));
}

#[test]
fn every_shipped_expression_parses() {
    let doc = PolicyDocument::from_json_str(&vector_loader::load("perms.json")).unwrap();
    for (entity, policy) in &doc.entities {
        for (alias, src) in policy.bind_pairs() {
            parse_expr(src).unwrap_or_else(|e| panic!("{entity}.{alias}: {e}"));
        }
        for op in OperationKind::ALL {
            if let Some(src) = policy.allow.rule(op) {
                parse_expr(src).unwrap_or_else(|e| panic!("{entity}.{op}: {e}"));
            }
        }
    }
}

#[test]
fn missing_sections_default_to_empty() {
    let doc = PolicyDocument::from_json_str(r#"{"notes": {}}"#).unwrap();
    let notes = doc.get("notes").unwrap();
    assert!(notes.bind.is_empty());
    for op in OperationKind::ALL {
        assert_eq!(notes.allow.rule(op), None);
    }
}
