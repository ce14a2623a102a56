//! End-to-end behavior of the chat service over in-memory stores: the
//! rules around direct conversations, unread counters, reactions, edits,
//! deletion, mentions, search, and group management.

mod common;

use chat_service::error::AppError;
use chat_service::models::conversation::{ConversationContext, ContextKind};
use chat_service::models::message::MessageType;
use chat_service::services::chat::SendMessage;
use chat_service::services::identity::Role;
use chat_service::storage::{MessageStore, PageQuery};
use common::{drain, event_types, harness};
use uuid::Uuid;

fn text(conversation_id: Uuid, content: &str) -> SendMessage {
    SendMessage {
        conversation_id,
        content: content.to_string(),
        message_type: MessageType::Text,
        attachment_id: None,
        reply_to: None,
    }
}

#[tokio::test]
async fn direct_conversation_is_unique_per_pair() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[
        (alice, "Alice", Role::Agent),
        (bob, "Bob", Role::AffiliateManager),
    ]);

    let first = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    let second = h
        .chat
        .open_direct(bob, alice, ConversationContext::default())
        .await
        .unwrap();
    assert_eq!(first.id, second.id);

    // the direct title is the peer's name
    assert_eq!(first.title.as_deref(), Some("Bob"));
    assert_eq!(second.title.as_deref(), Some("Alice"));
}

#[tokio::test]
async fn concurrent_direct_opens_converge() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)]);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let chat = h.chat.clone();
        handles.push(tokio::spawn(async move {
            chat.open_direct(alice, bob, ConversationContext::default())
                .await
                .unwrap()
                .id
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn capability_matrix_gates_direct_conversations() {
    let affiliate = Uuid::new_v4();
    let lead = Uuid::new_v4();
    let h = harness(&[
        (affiliate, "Aff", Role::AffiliateManager),
        (lead, "Lead", Role::LeadManager),
    ]);

    // lead managers may message anyone
    h.chat
        .open_direct(lead, affiliate, ConversationContext::default())
        .await
        .unwrap();

    // but an affiliate manager and an unknown user cannot talk
    let err = h
        .chat
        .open_direct(affiliate, Uuid::new_v4(), ConversationContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound("user")));

    let err = h
        .chat
        .open_direct(affiliate, affiliate, ConversationContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn sending_updates_unread_preview_and_fans_out() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)]);

    let conv = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    let mut alice_rx = h.registry.subscribe(alice).await;
    let mut bob_rx = h.registry.subscribe(bob).await;

    h.chat.send_message(alice, text(conv.id, "hello bob")).await.unwrap();
    h.chat.send_message(alice, text(conv.id, "are you there")).await.unwrap();

    // sender stays at zero, recipient accumulates
    let alice_view = h.chat.get_conversation(alice, conv.id).await.unwrap();
    let bob_view = h.chat.get_conversation(bob, conv.id).await.unwrap();
    assert_eq!(alice_view.unread_count, 0);
    assert_eq!(bob_view.unread_count, 2);
    assert_eq!(h.chat.total_unread(bob).await.unwrap(), 2);

    // preview reflects the newest message's plaintext
    let preview = bob_view.last_message.unwrap();
    assert_eq!(preview.content, "are you there");
    assert_eq!(preview.sender_id, alice);

    // both sides see new_message; only bob sees unread updates
    let alice_events = event_types(&drain(&mut alice_rx));
    assert_eq!(alice_events, vec!["new_message", "new_message"]);
    let bob_events = event_types(&drain(&mut bob_rx));
    assert_eq!(
        bob_events,
        vec![
            "new_message",
            "unread_count_updated",
            "new_message",
            "unread_count_updated"
        ]
    );
}

#[tokio::test]
async fn messages_are_stored_encrypted_but_served_decoded() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)]);

    let conv = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    let sent = h
        .chat
        .send_message(alice, text(conv.id, "secret plans"))
        .await
        .unwrap();
    assert!(sent.encrypted);
    assert_eq!(sent.content, "secret plans");

    let page = h
        .chat
        .page_messages(bob, conv.id, PageQuery::default())
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].content, "secret plans");
}

#[tokio::test]
async fn mark_read_zeroes_unread_and_notifies() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)]);

    let conv = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    h.chat.send_message(alice, text(conv.id, "one")).await.unwrap();
    h.chat.send_message(alice, text(conv.id, "two")).await.unwrap();

    let mut alice_rx = h.registry.subscribe(alice).await;
    let mut bob_rx = h.registry.subscribe(bob).await;
    h.chat.mark_conversation_read(bob, conv.id).await.unwrap();

    assert_eq!(
        h.chat.get_conversation(bob, conv.id).await.unwrap().unread_count,
        0
    );
    assert_eq!(h.chat.total_unread(bob).await.unwrap(), 0);

    let alice_events = drain(&mut alice_rx);
    assert_eq!(event_types(&alice_events), vec!["messages_read"]);
    assert_eq!(alice_events[0]["message_ids"].as_array().unwrap().len(), 2);

    let bob_events = drain(&mut bob_rx);
    assert_eq!(event_types(&bob_events), vec!["unread_count_updated"]);
    assert_eq!(bob_events[0]["unread_count"], 0);

    // marking again is a no-op for the other side
    h.chat.mark_conversation_read(bob, conv.id).await.unwrap();
    assert!(drain(&mut alice_rx).is_empty());
}

#[tokio::test]
async fn paging_records_read_receipts_without_touching_unread() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)]);

    let conv = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    h.chat.send_message(alice, text(conv.id, "one")).await.unwrap();
    h.chat.send_message(alice, text(conv.id, "two")).await.unwrap();

    let mut alice_rx = h.registry.subscribe(alice).await;
    let page = h
        .chat
        .page_messages(bob, conv.id, PageQuery::default())
        .await
        .unwrap();
    assert_eq!(page.len(), 2);

    // fetching a page leaves receipts behind for the sender to see
    let alice_events = drain(&mut alice_rx);
    assert_eq!(event_types(&alice_events), vec!["messages_read"]);
    assert_eq!(alice_events[0]["message_ids"].as_array().unwrap().len(), 2);

    // but the unread counter is only zeroed by the explicit read call
    assert_eq!(
        h.chat.get_conversation(bob, conv.id).await.unwrap().unread_count,
        2
    );

    // a second fetch finds everything already read
    let page = h
        .chat
        .page_messages(bob, conv.id, PageQuery::default())
        .await
        .unwrap();
    assert!(drain(&mut alice_rx).is_empty());
    assert!(page
        .iter()
        .all(|m| m.read_by.iter().any(|r| r.user_id == bob)));
}

#[tokio::test]
async fn reactions_toggle_per_user_and_emoji() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)]);

    let conv = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    let message = h.chat.send_message(alice, text(conv.id, "react to me")).await.unwrap();

    let after_add = h.chat.toggle_reaction(bob, message.id, "👍").await.unwrap();
    assert_eq!(after_add.reactions.len(), 1);

    // same emoji from another user coexists
    let after_alice = h.chat.toggle_reaction(alice, message.id, "👍").await.unwrap();
    assert_eq!(after_alice.reactions.len(), 2);

    // toggling again removes only bob's
    let after_remove = h.chat.toggle_reaction(bob, message.id, "👍").await.unwrap();
    assert_eq!(after_remove.reactions.len(), 1);
    assert_eq!(after_remove.reactions[0].user_id, alice);
}

#[tokio::test]
async fn edit_keeps_original_once_and_refreshes_preview() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)]);

    let conv = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    let message = h.chat.send_message(alice, text(conv.id, "first")).await.unwrap();

    let edited = h.chat.edit_message(alice, message.id, "second").await.unwrap();
    assert!(edited.is_edited);
    assert_eq!(edited.content, "second");

    // the first edit captures the original body
    let stored = h.messages.get(message.id).await.unwrap().unwrap();
    let original = stored.original_body.expect("first edit captures the original");
    assert_eq!(h.codec.decode(&original), "first");

    h.chat.edit_message(alice, message.id, "third").await.unwrap();

    // later edits leave the captured original untouched
    let stored = h.messages.get(message.id).await.unwrap().unwrap();
    assert_eq!(h.codec.decode(&stored.original_body.unwrap()), "first");

    // the preview follows the newest content
    let view = h.chat.get_conversation(bob, conv.id).await.unwrap();
    assert_eq!(view.last_message.unwrap().content, "third");

    // only the sender may edit
    let err = h.chat.edit_message(bob, message.id, "nope").await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn deletion_is_sender_or_admin_only_and_hides_the_message() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let admin = Uuid::new_v4();
    let h = harness(&[
        (alice, "Alice", Role::Agent),
        (bob, "Bob", Role::Agent),
        (admin, "Root", Role::Admin),
    ]);

    let conv = h
        .chat
        .create_group(alice, "team", &[bob, admin], ConversationContext::default())
        .await
        .unwrap();
    let first = h.chat.send_message(alice, text(conv.id, "one")).await.unwrap();
    let second = h.chat.send_message(alice, text(conv.id, "two")).await.unwrap();

    let err = h.chat.delete_message(bob, first.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    h.chat.delete_message(alice, first.id).await.unwrap();
    h.chat.delete_message(admin, second.id).await.unwrap();

    // double delete conflicts
    let err = h.chat.delete_message(alice, first.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // tombstoned messages keep their place in the page, bodies hidden
    let page = h
        .chat
        .page_messages(bob, conv.id, PageQuery::default())
        .await
        .unwrap();
    let first_view = page.iter().find(|m| m.id == first.id).unwrap();
    assert!(first_view.is_deleted);
    assert_eq!(first_view.content, "");
    let second_view = page.iter().find(|m| m.id == second.id).unwrap();
    assert!(second_view.is_deleted);
    assert_eq!(second_view.content, "");
}

#[tokio::test]
async fn deleted_messages_stay_counted_in_pages() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)]);

    let conv = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    let sent = h.chat.send_message(alice, text(conv.id, "Hello")).await.unwrap();
    h.chat.delete_message(alice, sent.id).await.unwrap();

    let page = h
        .chat
        .page_messages(bob, conv.id, PageQuery::default())
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert!(page[0].is_deleted);
    assert_eq!(page[0].content, "");

    // search never surfaces tombstones
    let hits = h.chat.search_messages(bob, conv.id, "hello", 50).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn mentions_notify_only_mentioned_participants() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let carol = Uuid::new_v4();
    let outsider = Uuid::new_v4();
    let h = harness(&[
        (alice, "Alice", Role::Agent),
        (bob, "Bob", Role::Agent),
        (carol, "Carol", Role::Agent),
        (outsider, "Eve", Role::Agent),
    ]);

    let conv = h
        .chat
        .create_group(alice, "team", &[bob, carol], ConversationContext::default())
        .await
        .unwrap();
    let mut bob_rx = h.registry.subscribe(bob).await;
    let mut carol_rx = h.registry.subscribe(carol).await;
    let mut outsider_rx = h.registry.subscribe(outsider).await;

    let content = format!("hey @[Bob]({bob}) and @[Eve]({outsider}), ship it");
    let sent = h.chat.send_message(alice, text(conv.id, &content)).await.unwrap();

    // only bob is a mentioned participant
    assert_eq!(sent.mentions, vec![bob]);
    let bob_events = event_types(&drain(&mut bob_rx));
    assert!(bob_events.contains(&"user_mentioned".to_string()));
    let carol_events = event_types(&drain(&mut carol_rx));
    assert!(!carol_events.contains(&"user_mentioned".to_string()));
    assert!(drain(&mut outsider_rx).is_empty());
}

#[tokio::test]
async fn search_spans_plain_and_encrypted_rows() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)]);

    let conv = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    h.chat.send_message(alice, text(conv.id, "quarterly Report draft")).await.unwrap();
    h.chat.send_message(bob, text(conv.id, "unrelated chatter")).await.unwrap();
    let deleted = h
        .chat
        .send_message(alice, text(conv.id, "old report to remove"))
        .await
        .unwrap();
    h.chat.delete_message(alice, deleted.id).await.unwrap();

    let hits = h.chat.search_messages(bob, conv.id, "report", 50).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, "quarterly Report draft");

    // empty query matches nothing instead of everything
    assert!(h
        .chat
        .search_messages(bob, conv.id, "  ", 50)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn search_truncates_to_the_requested_limit() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)]);

    let conv = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    h.chat.send_message(alice, text(conv.id, "report one")).await.unwrap();
    h.chat.send_message(alice, text(conv.id, "report two")).await.unwrap();
    h.chat.send_message(alice, text(conv.id, "report three")).await.unwrap();

    // the newest matches win when the limit cuts the merged results
    let hits = h.chat.search_messages(bob, conv.id, "report", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].content, "report three");
    assert_eq!(hits[1].content, "report two");
}

#[tokio::test]
async fn search_all_covers_every_conversation_of_the_user() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let carol = Uuid::new_v4();
    let h = harness(&[
        (alice, "Alice", Role::Agent),
        (bob, "Bob", Role::Agent),
        (carol, "Carol", Role::Agent),
    ]);

    let with_bob = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    let with_carol = h
        .chat
        .open_direct(alice, carol, ConversationContext::default())
        .await
        .unwrap();
    h.chat.send_message(alice, text(with_bob.id, "invoice for march")).await.unwrap();
    h.chat.send_message(carol, text(with_carol.id, "new invoice arrived")).await.unwrap();
    // bob and carol never talk; bob must not see carol's conversation
    h.chat.send_message(carol, text(with_carol.id, "second invoice")).await.unwrap();

    let alice_hits = h.chat.search_all_messages(alice, "invoice", 50).await.unwrap();
    assert_eq!(alice_hits.len(), 3);

    let bob_hits = h.chat.search_all_messages(bob, "invoice", 50).await.unwrap();
    assert_eq!(bob_hits.len(), 1);
}

#[tokio::test]
async fn reply_previews_hydrate_the_parent() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)]);

    let conv = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    let parent = h.chat.send_message(alice, text(conv.id, "original question")).await.unwrap();

    let reply = h
        .chat
        .send_message(
            bob,
            SendMessage {
                conversation_id: conv.id,
                content: "the answer".into(),
                message_type: MessageType::Text,
                attachment_id: None,
                reply_to: Some(parent.id),
            },
        )
        .await
        .unwrap();
    let preview = reply.reply_to.unwrap();
    assert_eq!(preview.message_id, parent.id);
    assert_eq!(preview.content, "original question");

    // replying across conversations is rejected
    let other = h
        .chat
        .create_group(alice, "side", &[bob], ConversationContext::default())
        .await
        .unwrap();
    let err = h
        .chat
        .send_message(
            bob,
            SendMessage {
                conversation_id: other.id,
                content: "cross reply".into(),
                message_type: MessageType::Text,
                attachment_id: None,
                reply_to: Some(parent.id),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn group_lifecycle_posts_system_messages_and_updates() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let carol = Uuid::new_v4();
    let dave = Uuid::new_v4();
    let h = harness(&[
        (alice, "Alice", Role::LeadManager),
        (bob, "Bob", Role::Agent),
        (carol, "Carol", Role::Agent),
        (dave, "Dave", Role::Agent),
    ]);

    let conv = h
        .chat
        .create_group(alice, "deal room", &[bob, carol], ConversationContext {
            kind: ContextKind::Lead,
            related_entity: Some(Uuid::new_v4()),
        })
        .await
        .unwrap();
    assert_eq!(conv.participants.len(), 3);

    // creation leaves a system message behind
    let page = h
        .chat
        .page_messages(bob, conv.id, PageQuery::default())
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].message_type, MessageType::System);
    assert!(page[0].content.contains("created the group"));

    // system messages are immutable even for their author
    let err = h.chat.edit_message(alice, page[0].id, "tweak").await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // only the creator or an admin manages the group
    let err = h.chat.rename_group(bob, conv.id, "hijacked").await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let renamed = h.chat.rename_group(alice, conv.id, "closed deals").await.unwrap();
    assert_eq!(renamed.title.as_deref(), Some("closed deals"));

    let mut dave_rx = h.registry.subscribe(dave).await;
    let added = h
        .chat
        .add_group_participants(alice, conv.id, &[dave])
        .await
        .unwrap();
    assert_eq!(added.participants.len(), 4);
    assert!(event_types(&drain(&mut dave_rx)).contains(&"group_updated".to_string()));

    // removal keeps the group above two participants and spares the creator
    let err = h
        .chat
        .remove_group_participant(alice, conv.id, alice)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let mut removed_rx = h.registry.subscribe(dave).await;
    let after_remove = h
        .chat
        .remove_group_participant(alice, conv.id, dave)
        .await
        .unwrap();
    assert_eq!(after_remove.participants.len(), 3);
    // the removed member still learns about it
    assert!(event_types(&drain(&mut removed_rx)).contains(&"group_updated".to_string()));

    h.chat.remove_group_participant(alice, conv.id, carol).await.unwrap();
    let err = h
        .chat
        .remove_group_participant(alice, conv.id, bob)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn context_kind_filters_conversation_lists() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)]);

    h.chat
        .open_direct(alice, bob, ConversationContext {
            kind: ContextKind::Order,
            related_entity: Some(Uuid::new_v4()),
        })
        .await
        .unwrap();
    h.chat
        .create_group(alice, "support desk", &[bob], ConversationContext {
            kind: ContextKind::Support,
            related_entity: None,
        })
        .await
        .unwrap();

    let all = h.chat.list_conversations(alice, None).await.unwrap();
    assert_eq!(all.len(), 2);
    let orders = h
        .chat
        .list_conversations(alice, Some(ContextKind::Order))
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].context.kind, ContextKind::Order);
}

#[tokio::test]
async fn closed_conversations_keep_history_but_reject_sends() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)]);

    let conv = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    h.chat.send_message(alice, text(conv.id, "before closing")).await.unwrap();

    h.chat.close_conversation(bob, conv.id).await.unwrap();

    let err = h.chat.send_message(alice, text(conv.id, "too late")).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    let err = h.chat.close_conversation(bob, conv.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // hidden from listings, but history is still readable
    assert!(h.chat.list_conversations(alice, None).await.unwrap().is_empty());
    let page = h
        .chat
        .page_messages(alice, conv.id, PageQuery::default())
        .await
        .unwrap();
    assert_eq!(page.len(), 1);

    // a group is closed by its manager only
    let group = h
        .chat
        .create_group(alice, "ops", &[bob], ConversationContext::default())
        .await
        .unwrap();
    let err = h.chat.close_conversation(bob, group.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    h.chat.close_conversation(alice, group.id).await.unwrap();
}

#[tokio::test]
async fn typing_indicator_reaches_peers_once() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let h = harness(&[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)]);

    let conv = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    let mut bob_rx = h.registry.subscribe(bob).await;

    h.chat.typing_start(alice, conv.id).await.unwrap();
    h.chat.typing_start(alice, conv.id).await.unwrap();
    assert_eq!(event_types(&drain(&mut bob_rx)), vec!["user_typing"]);

    h.chat.typing_stop(alice, conv.id).await.unwrap();
    assert_eq!(event_types(&drain(&mut bob_rx)), vec!["user_stop_typing"]);

    // stopping when not typing stays silent
    h.chat.typing_stop(alice, conv.id).await.unwrap();
    assert!(drain(&mut bob_rx).is_empty());
}

#[tokio::test]
async fn attachments_hydrate_from_metadata_and_track_usage() {
    use chat_service::services::attachments::AttachmentMeta;
    use common::{harness_with_attachments, FixedAttachments};
    use std::sync::atomic::Ordering;

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let attachment_id = Uuid::new_v4();
    let mut attachments = FixedAttachments::default();
    attachments.metas.insert(
        attachment_id,
        AttachmentMeta {
            owner_id: alice,
            filename: "report.pdf".into(),
            mimetype: "application/pdf".into(),
            size: 4096,
            url: "/files/report.pdf".into(),
        },
    );
    let h = harness_with_attachments(
        &[(alice, "Alice", Role::Agent), (bob, "Bob", Role::Agent)],
        attachments,
    );

    let conv = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();
    let sent = h
        .chat
        .send_message(
            alice,
            SendMessage {
                conversation_id: conv.id,
                content: "here is the report".into(),
                message_type: MessageType::File,
                attachment_id: Some(attachment_id),
                reply_to: None,
            },
        )
        .await
        .unwrap();
    let attachment = sent.attachment.unwrap();
    assert_eq!(attachment.filename, "report.pdf");
    assert_eq!(h.attachments.usages.load(Ordering::SeqCst), 1);

    // bob does not own the attachment
    let err = h
        .chat
        .send_message(
            bob,
            SendMessage {
                conversation_id: conv.id,
                content: "".into(),
                message_type: MessageType::File,
                attachment_id: Some(attachment_id),
                reply_to: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    // unknown attachment ids are rejected
    let err = h
        .chat
        .send_message(
            alice,
            SendMessage {
                conversation_id: conv.id,
                content: "".into(),
                message_type: MessageType::File,
                attachment_id: Some(Uuid::new_v4()),
                reply_to: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound("attachment")));
}

#[tokio::test]
async fn non_participants_are_locked_out() {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let eve = Uuid::new_v4();
    let h = harness(&[
        (alice, "Alice", Role::Agent),
        (bob, "Bob", Role::Agent),
        (eve, "Eve", Role::Agent),
    ]);

    let conv = h
        .chat
        .open_direct(alice, bob, ConversationContext::default())
        .await
        .unwrap();

    let err = h.chat.send_message(eve, text(conv.id, "hi")).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    let err = h
        .chat
        .page_messages(eve, conv.id, PageQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    let err = h.chat.get_conversation(eve, conv.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}
