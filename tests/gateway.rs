mod common;

use crate::common::*;
use polling_chat_lib::libs::gateway::errors::{ErrorKind, GatewayError};
use polling_chat_lib::libs::gateway::wire::{self, GatewayRequest, GatewayResponse, RequestEnvelope};
use polling_chat_lib::libs::gateway::{IdentityProvider, StaticIdentityProvider};
use polling_chat_lib::libs::sync::api::{ChatApi, InProcessApi, LoopbackTransport, Session, WireApi};
use polling_chat_lib::libs::users::{UserError, SEARCH_LIMIT};
use std::sync::Arc;

fn identity(names: &[&str]) -> Arc<StaticIdentityProvider> {
    let provider = Arc::new(StaticIdentityProvider::new());
    for name in names {
        provider.issue(format!("{}-token", name), user(name));
    }
    provider
}

#[test]
fn list_friends_carries_summaries_sorted_by_name() {
    let backend = TestBackend::with_users(&["alice", "bob", "carol"]);
    let gateway = backend.gateway();

    gateway.send_request(&user("carol"), &user("alice")).unwrap();
    gateway.send_request(&user("bob"), &user("alice")).unwrap();
    assert_eq!(
        gateway.list_requests(&user("alice")).unwrap(),
        vec![user("bob"), user("carol")]
    );
    gateway.accept(&user("alice"), &user("carol")).unwrap();
    gateway.accept(&user("alice"), &user("bob")).unwrap();

    gateway.send_message(&user("carol"), &user("alice"), "ping").unwrap();
    gateway.send_message(&user("carol"), &user("alice"), "ping again").unwrap();

    let friends = gateway.list_friends(&user("alice")).unwrap();
    let names: Vec<&str> = friends.iter().map(|f| f.user.as_str()).collect();
    assert_eq!(names, vec!["bob", "carol"]);
    assert_eq!(friends[0].last_message, None);
    assert_eq!(friends[1].last_message.as_deref(), Some("ping again"));
    assert_eq!(friends[1].unread_count, 2);

    assert_eq!(gateway.check_notification(&user("alice"), &user("carol")).unwrap(), 2);
    gateway.get_conversation(&user("alice"), &user("carol")).unwrap();
    assert_eq!(gateway.check_notification(&user("alice"), &user("carol")).unwrap(), 0);
}

#[test]
fn retried_operations_converge() {
    let backend = TestBackend::with_users(&["alice", "bob"]);
    let gateway = backend.gateway();

    gateway.send_request(&user("alice"), &user("bob")).unwrap();
    let retry = gateway.send_request(&user("alice"), &user("bob")).unwrap_err();
    assert_eq!(retry.kind(), ErrorKind::Conflict);
    assert!(!retry.is_retryable());

    gateway.accept(&user("bob"), &user("alice")).unwrap();
    let again = gateway.accept(&user("bob"), &user("alice")).unwrap_err();
    assert_eq!(again.kind(), ErrorKind::Conflict);

    assert_eq!(gateway.check_notification(&user("bob"), &user("alice")).unwrap(), 0);
    assert_eq!(gateway.check_notification(&user("bob"), &user("alice")).unwrap(), 0);
}

#[test]
fn frames_without_known_credential_are_unauthorized() {
    let backend = TestBackend::with_users(&["alice"]);
    let gateway = backend.gateway();
    let provider = identity(&["alice"]);

    let envelope = RequestEnvelope {
        credential: "forged".to_string(),
        request: GatewayRequest::ListFriends,
    };
    let reply = gateway.handle_frame(provider.as_ref(), &wire::encode(&envelope).unwrap());
    match wire::decode::<GatewayResponse>(&reply).unwrap() {
        GatewayResponse::Error(body) => assert_eq!(body.kind, ErrorKind::Unauthorized),
        other => panic!("expected an error response, got {:?}", other),
    }

    let garbage = gateway.handle_frame(provider.as_ref(), &[0xff, 0xff, 0xff]);
    match wire::decode::<GatewayResponse>(&garbage).unwrap() {
        GatewayResponse::Error(body) => assert_eq!(body.kind, ErrorKind::Protocol),
        other => panic!("expected an error response, got {:?}", other),
    }
}

#[test]
fn registration_works_without_a_session() {
    let backend = TestBackend::new();
    let gateway = backend.gateway();
    let provider = identity(&[]);

    let register = RequestEnvelope {
        credential: String::new(),
        request: GatewayRequest::Register {
            username: user("dave"),
            credential_hash: b"hash".to_vec(),
        },
    };
    let reply = gateway.handle(provider.as_ref(), register.clone());
    assert_eq!(reply, GatewayResponse::Ack);

    match gateway.handle(provider.as_ref(), register) {
        GatewayResponse::Error(body) => assert_eq!(body.kind, ErrorKind::Conflict),
        other => panic!("expected a conflict, got {:?}", other),
    }
}

#[test]
fn wire_api_matches_in_process_api() {
    let backend = TestBackend::with_users(&["alice", "bob"]);
    let gateway = backend.gateway();
    let provider: Arc<dyn IdentityProvider> = identity(&["alice", "bob"]);

    let alice = WireApi::new(
        LoopbackTransport::new(Arc::clone(&gateway), Arc::clone(&provider)),
        &Session::new(user("alice"), "alice-token"),
    );
    let bob = InProcessApi::new(Arc::clone(&gateway), user("bob"));

    alice.send_request(&user("bob")).unwrap();
    assert_eq!(bob.list_requests().unwrap(), vec![user("alice")]);
    bob.accept(&user("alice")).unwrap();

    alice.send_message(&user("bob"), "hi").unwrap();
    assert_eq!(bob.check_notification(&user("alice")).unwrap(), 1);

    let conversation = bob.get_conversation(&user("alice")).unwrap();
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation[0].sender, user("alice"));
    assert_eq!(conversation[0].content, "hi");

    let friends = alice.list_friends().unwrap();
    assert_eq!(friends.len(), 1);
    assert_eq!(friends[0].last_message.as_deref(), Some("hi"));

    // remote errors come back with their kind intact
    let err = alice.send_message(&user("bob"), "  ").unwrap_err();
    assert!(matches!(err, GatewayError::Remote { kind: ErrorKind::Validation, .. }));
    let err = alice.accept(&user("bob")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn revoked_credentials_stop_working() {
    let backend = TestBackend::with_users(&["alice"]);
    let gateway = backend.gateway();
    let provider = identity(&["alice"]);
    let dyn_provider: Arc<dyn IdentityProvider> = provider.clone();

    let alice = WireApi::new(
        LoopbackTransport::new(Arc::clone(&gateway), dyn_provider),
        &Session::new(user("alice"), "alice-token"),
    );
    assert!(alice.list_friends().unwrap().is_empty());

    assert!(provider.revoke("alice-token"));
    let err = alice.list_friends().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[test]
fn user_directory_search_and_avatars() {
    let backend = TestBackend::with_users(&["alice", "alicia", "bob"]);
    let gateway = backend.gateway();

    assert_eq!(
        gateway.search_users("ali").unwrap(),
        vec![user("alice"), user("alicia")]
    );
    let blank = gateway.search_users("  ").unwrap_err();
    assert_eq!(blank.kind(), ErrorKind::Validation);

    for i in 0..30 {
        backend.add_user(&format!("member{}", i));
    }
    assert_eq!(gateway.search_users("member").unwrap().len(), SEARCH_LIMIT);

    assert!(gateway.avatar(&user("bob")).unwrap().is_empty());
    gateway.set_avatar(&user("bob"), &[1, 2, 3]).unwrap();
    assert_eq!(gateway.avatar(&user("bob")).unwrap(), vec![1, 2, 3]);

    let empty = gateway.set_avatar(&user("bob"), &[]).unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::Validation);
    let missing = gateway.avatar(&user("ghost")).unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);
    let missing = gateway.set_avatar(&user("ghost"), &[9]).unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);
}

#[test]
fn credentials_can_be_rotated() {
    let backend = TestBackend::with_users(&["alice"]);
    let gateway = backend.gateway();
    let users = gateway.users();

    users.update_credential(&user("alice"), b"rotated").unwrap();
    assert!(matches!(
        users.update_credential(&user("ghost"), b"rotated"),
        Err(UserError::NotFound(_))
    ));
    assert!(matches!(
        users.update_credential(&user("alice"), b""),
        Err(UserError::Validation(_))
    ));
    assert!(users.exists(&user("alice")).unwrap());
    assert!(matches!(
        users.register(&user(" "), b"x".to_vec()),
        Err(UserError::Validation(_))
    ));
}
