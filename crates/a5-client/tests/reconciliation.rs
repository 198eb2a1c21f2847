use std::cell::RefCell;
use std::collections::HashSet;

use a5_client::{
    ClientError, SubscriptionManager, SubscriptionState, Transcript, TranscriptChange, Transport,
    TransportError,
};
use a5_types::events::{ChannelEvent, GatewayCommand, GatewayFrame};
use a5_types::models::{MessageId, MessageSnapshot, Role};
use chrono::Utc;
use uuid::Uuid;

/// Records every command and tracks which chats it is subscribed to,
/// the way the server would.
#[derive(Default)]
struct RecordingTransport {
    sent: RefCell<Vec<GatewayCommand>>,
    active: RefCell<HashSet<Uuid>>,
}

impl Transport for RecordingTransport {
    fn send(&self, command: GatewayCommand) -> Result<(), TransportError> {
        match &command {
            GatewayCommand::Subscribe { chat_id } => {
                self.active.borrow_mut().insert(*chat_id);
            }
            GatewayCommand::Unsubscribe { chat_id } => {
                self.active.borrow_mut().remove(chat_id);
            }
            GatewayCommand::SendMessage { .. } => {}
        }
        self.sent.borrow_mut().push(command);
        Ok(())
    }
}

struct ClosedTransport;

impl Transport for ClosedTransport {
    fn send(&self, _command: GatewayCommand) -> Result<(), TransportError> {
        Err(TransportError::Closed)
    }
}

fn snapshot(id: i64, role: Role, content: &str) -> MessageSnapshot {
    MessageSnapshot {
        id: MessageId::durable(id),
        content: content.into(),
        role,
        timestamp: Utc::now(),
        model: None,
    }
}

fn contents(transcript: &Transcript) -> Vec<(Role, &str)> {
    transcript
        .messages()
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect()
}

fn chunk(id: i64, content: &str) -> ChannelEvent {
    ChannelEvent::StreamChunk {
        message_id: MessageId::durable(id),
        content: content.into(),
    }
}

#[test]
fn duplicate_confirmation_is_idempotent() {
    let mut t = Transcript::new();
    let confirmed = ChannelEvent::UserMessageConfirmed {
        message: snapshot(1, Role::User, "hello"),
    };

    assert_eq!(t.apply(confirmed.clone()), TranscriptChange::Appended(0));
    let after_first = t.messages().to_vec();
    assert_eq!(t.apply(confirmed), TranscriptChange::Ignored);
    assert_eq!(t.messages(), after_first.as_slice());
}

#[test]
fn chunks_accumulate_despite_interleaving() {
    let mut t = Transcript::new();
    for event in [
        chunk(10, "The "),
        chunk(20, "Other"),
        chunk(10, "quick "),
        chunk(20, " one"),
        chunk(10, "fox"),
    ] {
        t.apply(event);
    }

    assert_eq!(t.get(&MessageId::durable(10)).unwrap().content, "The quick fox");
    assert_eq!(t.get(&MessageId::durable(20)).unwrap().content, "Other one");
    assert_eq!(t.len(), 2);
}

#[test]
fn empty_final_keeps_streamed_content() {
    let mut t = Transcript::new();
    t.apply(chunk(5, "hello "));
    t.apply(chunk(5, "world"));

    let mut finished = snapshot(5, Role::Assistant, "");
    finished.model = Some("gpt-4o".into());
    assert_eq!(
        t.apply(ChannelEvent::Final { message: finished }),
        TranscriptChange::Replaced(0)
    );

    let message = t.get(&MessageId::durable(5)).unwrap();
    assert_eq!(message.content, "hello world");
    assert_eq!(message.model.as_deref(), Some("gpt-4o"));
}

#[test]
fn non_empty_final_replaces_streamed_content() {
    let mut t = Transcript::new();
    t.apply(chunk(5, "hel"));
    t.apply(ChannelEvent::Final {
        message: snapshot(5, Role::Assistant, "hello"),
    });
    assert_eq!(t.get(&MessageId::durable(5)).unwrap().content, "hello");
}

#[test]
fn optimistic_send_is_replaced_by_its_confirmation() {
    let mut t = Transcript::new();
    t.local_send("ping");
    assert_eq!(t.pending_count(), 1);

    let change = t.apply(ChannelEvent::UserMessageConfirmed {
        message: snapshot(7, Role::User, "ping"),
    });

    assert_eq!(change, TranscriptChange::Replaced(0));
    assert_eq!(contents(&t), vec![(Role::User, "ping")]);
    assert_eq!(t.messages()[0].id, MessageId::durable(7));
    assert_eq!(t.pending_count(), 0);
}

#[test]
fn final_before_chunks_creates_and_late_chunk_is_ignored() {
    let mut t = Transcript::new();
    assert_eq!(
        t.apply(ChannelEvent::Final {
            message: snapshot(9, Role::Assistant, "done"),
        }),
        TranscriptChange::Appended(0)
    );
    assert_eq!(t.apply(chunk(9, "done")), TranscriptChange::Ignored);

    assert_eq!(contents(&t), vec![(Role::Assistant, "done")]);
}

#[test]
fn chunk_for_unknown_id_creates_assistant_message() {
    let mut t = Transcript::new();
    assert_eq!(t.apply(chunk(3, "Hi")), TranscriptChange::Appended(0));
    let message = &t.messages()[0];
    assert_eq!(message.role, Role::Assistant);
    assert!(message.model.is_none());
}

fn failure() -> (MessageId, ChannelEvent) {
    let error = MessageSnapshot::generation_failed();
    (error.id.clone(), ChannelEvent::Error { message: error })
}

#[test]
fn retry_replaces_error_with_fresh_optimistic_send() {
    let transport = RecordingTransport::default();
    let chat = Uuid::new_v4();
    let mut manager = SubscriptionManager::new(&transport);
    manager.select(chat, vec![snapshot(1, Role::User, "why?")]).unwrap();

    let (error_id, event) = failure();
    manager.handle_frame(GatewayFrame::Event {
        chat_id: chat,
        event,
    });
    assert!(manager.retry(&error_id).unwrap());

    let t = manager.transcript();
    assert_eq!(contents(t), vec![(Role::User, "why?"), (Role::User, "why?")]);
    assert!(t.messages()[1].id.is_optimistic());
    assert!(t.get(&error_id).is_none());
    assert_eq!(
        transport.sent.borrow().last(),
        Some(&GatewayCommand::SendMessage {
            chat_id: chat,
            content: "why?".into(),
            model_id: None,
        })
    );
}

#[test]
fn retry_after_assistant_message_does_nothing() {
    let transport = RecordingTransport::default();
    let chat = Uuid::new_v4();
    let mut manager = SubscriptionManager::new(&transport);
    manager.select(chat, vec![snapshot(2, Role::Assistant, "earlier")]).unwrap();
    let (error_id, event) = failure();
    manager.handle_frame(GatewayFrame::Event {
        chat_id: chat,
        event,
    });
    let sent_before = transport.sent.borrow().len();

    assert!(!manager.retry(&error_id).unwrap());
    assert_eq!(manager.transcript().len(), 2);
    assert_eq!(transport.sent.borrow().len(), sent_before);
}

#[test]
fn retry_on_a_durable_answer_changes_nothing() {
    let transport = RecordingTransport::default();
    let chat = Uuid::new_v4();
    let mut manager = SubscriptionManager::new(&transport);
    manager
        .select(
            chat,
            vec![
                snapshot(1, Role::User, "why?"),
                snapshot(2, Role::Assistant, "because"),
            ],
        )
        .unwrap();
    let sent_before = transport.sent.borrow().len();

    assert!(!manager.retry(&MessageId::durable(2)).unwrap());
    assert_eq!(
        contents(manager.transcript()),
        vec![(Role::User, "why?"), (Role::Assistant, "because")]
    );
    assert_eq!(manager.transcript().pending_count(), 0);
    assert_eq!(transport.sent.borrow().len(), sent_before);
}

#[test]
fn switching_chats_keeps_exactly_one_subscription() {
    let transport = RecordingTransport::default();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let mut manager = SubscriptionManager::new(&transport);

    manager.select(a, Vec::new()).unwrap();
    manager.handle_frame(GatewayFrame::ConfirmSubscription { chat_id: a });
    assert_eq!(manager.state(), SubscriptionState::Subscribed(a));

    manager.select(b, vec![snapshot(1, Role::User, "in b")]).unwrap();

    let active = transport.active.borrow();
    assert_eq!(active.len(), 1);
    assert!(active.contains(&b));
    assert_eq!(manager.state(), SubscriptionState::Subscribing(b));
    assert_eq!(contents(manager.transcript()), vec![(Role::User, "in b")]);

    // Teardown precedes the new subscription
    let sent = transport.sent.borrow();
    assert_eq!(sent[1], GatewayCommand::Unsubscribe { chat_id: a });
    assert_eq!(sent[2], GatewayCommand::Subscribe { chat_id: b });
}

#[test]
fn selecting_the_active_chat_is_a_no_op() {
    let transport = RecordingTransport::default();
    let chat = Uuid::new_v4();
    let mut manager = SubscriptionManager::new(&transport);

    manager.select(chat, vec![snapshot(1, Role::User, "kept")]).unwrap();
    manager.select(chat, Vec::new()).unwrap();

    assert_eq!(transport.sent.borrow().len(), 1);
    assert_eq!(manager.transcript().len(), 1);
}

#[test]
fn rejected_subscription_returns_to_unsubscribed() {
    let transport = RecordingTransport::default();
    let chat = Uuid::new_v4();
    let mut manager = SubscriptionManager::new(&transport);

    manager.select(chat, Vec::new()).unwrap();
    manager.handle_frame(GatewayFrame::RejectSubscription { chat_id: chat });

    assert_eq!(manager.state(), SubscriptionState::Unsubscribed);
    assert!(matches!(
        manager.send("hello", None),
        Err(ClientError::NoConversation)
    ));
}

#[test]
fn events_for_other_chats_are_dropped() {
    let transport = RecordingTransport::default();
    let (selected, stale) = (Uuid::new_v4(), Uuid::new_v4());
    let mut manager = SubscriptionManager::new(&transport);
    manager.select(selected, Vec::new()).unwrap();

    let change = manager.handle_frame(GatewayFrame::Event {
        chat_id: stale,
        event: chunk(1, "ghost"),
    });
    assert_eq!(change, TranscriptChange::Ignored);
    assert!(manager.transcript().is_empty());

    let change = manager.handle_frame(GatewayFrame::Event {
        chat_id: selected,
        event: chunk(2, "real"),
    });
    assert_eq!(change, TranscriptChange::Appended(0));
}

#[test]
fn send_trims_and_refuses_blank_content() {
    let transport = RecordingTransport::default();
    let chat = Uuid::new_v4();
    let mut manager = SubscriptionManager::new(&transport);

    assert!(matches!(
        manager.send("hi", None),
        Err(ClientError::NoConversation)
    ));

    manager.select(chat, Vec::new()).unwrap();
    assert!(matches!(manager.send("   ", None), Err(ClientError::EmptyMessage)));

    let change = manager.send("  hi  ", Some("gpt-4o".into())).unwrap();
    assert_eq!(change, TranscriptChange::Appended(0));
    assert_eq!(manager.transcript().messages()[0].content, "hi");
    assert_eq!(
        transport.sent.borrow().last(),
        Some(&GatewayCommand::SendMessage {
            chat_id: chat,
            content: "hi".into(),
            model_id: Some("gpt-4o".into()),
        })
    );
}

#[test]
fn full_turn_converges_to_durable_messages() {
    let transport = RecordingTransport::default();
    let chat = Uuid::new_v4();
    let mut manager = SubscriptionManager::new(&transport);
    manager.select(chat, Vec::new()).unwrap();
    manager.handle_frame(GatewayFrame::ConfirmSubscription { chat_id: chat });

    manager.send("ping", None).unwrap();
    for event in [
        ChannelEvent::UserMessageConfirmed {
            message: snapshot(1, Role::User, "ping"),
        },
        chunk(2, "po"),
        chunk(2, "ng"),
        ChannelEvent::Final {
            message: snapshot(2, Role::Assistant, "pong"),
        },
    ] {
        manager.handle_frame(GatewayFrame::Event {
            chat_id: chat,
            event,
        });
    }

    let t = manager.transcript();
    assert_eq!(contents(t), vec![(Role::User, "ping"), (Role::Assistant, "pong")]);
    assert!(t.messages().iter().all(|m| !m.id.is_optimistic()));
    assert_eq!(t.pending_count(), 0);
}

#[test]
fn stream_before_confirmation_keeps_user_first() {
    let mut t = Transcript::new();
    t.local_send("ping");

    assert_eq!(t.apply(chunk(2, "po")), TranscriptChange::Appended(1));
    assert_eq!(
        t.apply(ChannelEvent::UserMessageConfirmed {
            message: snapshot(1, Role::User, "ping"),
        }),
        TranscriptChange::Replaced(0)
    );
    assert_eq!(t.apply(chunk(2, "ng")), TranscriptChange::Updated(1));
    t.apply(ChannelEvent::Final {
        message: snapshot(2, Role::Assistant, "pong"),
    });

    assert_eq!(contents(&t), vec![(Role::User, "ping"), (Role::Assistant, "pong")]);
    assert_eq!(t.messages()[0].id, MessageId::durable(1));
    assert_eq!(t.pending_count(), 0);
}

#[test]
fn final_without_content_on_the_wire_keeps_streamed_text() {
    let transport = RecordingTransport::default();
    let chat = Uuid::new_v4();
    let mut manager = SubscriptionManager::new(&transport);
    manager.select(chat, Vec::new()).unwrap();

    let frame: GatewayFrame = serde_json::from_value(serde_json::json!({
        "type": "event",
        "chat_id": chat,
        "event": {
            "type": "final",
            "message": {
                "id": "4",
                "role": "assistant",
                "timestamp": Utc::now(),
                "model": "gpt-4o"
            }
        }
    }))
    .unwrap();

    manager.handle_frame(GatewayFrame::Event {
        chat_id: chat,
        event: chunk(4, "kept"),
    });
    assert_eq!(manager.handle_frame(frame), TranscriptChange::Replaced(0));

    let late = GatewayFrame::Event {
        chat_id: chat,
        event: chunk(4, "!"),
    };
    assert_eq!(manager.handle_frame(late), TranscriptChange::Ignored);

    let message = &manager.transcript().messages()[0];
    assert_eq!(message.content, "kept");
    assert_eq!(message.model.as_deref(), Some("gpt-4o"));
}

#[test]
fn reconnect_resubscribes_on_the_new_transport() {
    let chat = Uuid::new_v4();
    let (first, second) = (RecordingTransport::default(), RecordingTransport::default());
    let mut manager = SubscriptionManager::new(&first);
    manager.select(chat, vec![snapshot(1, Role::User, "before")]).unwrap();
    manager.handle_frame(GatewayFrame::ConfirmSubscription { chat_id: chat });

    manager.reconnect(&second).unwrap();

    assert_eq!(manager.state(), SubscriptionState::Subscribing(chat));
    assert_eq!(*second.sent.borrow(), vec![GatewayCommand::Subscribe { chat_id: chat }]);
    assert_eq!(contents(manager.transcript()), vec![(Role::User, "before")]);

    manager.handle_frame(GatewayFrame::ConfirmSubscription { chat_id: chat });
    manager.send("after", None).unwrap();
    assert_eq!(second.sent.borrow().len(), 2);
    assert_eq!(first.sent.borrow().len(), 1);
}

#[test]
fn dropped_cable_recovers_after_reconnect() {
    let chat = Uuid::new_v4();
    let (up, back) = (RecordingTransport::default(), RecordingTransport::default());
    let down = ClosedTransport;
    let mut manager: SubscriptionManager<&dyn Transport> = SubscriptionManager::new(&up);
    manager.select(chat, Vec::new()).unwrap();
    manager.handle_frame(GatewayFrame::ConfirmSubscription { chat_id: chat });

    assert!(matches!(
        manager.reconnect(&down),
        Err(ClientError::Transport(TransportError::Closed))
    ));
    assert!(matches!(
        manager.send("lost", None),
        Err(ClientError::Transport(TransportError::Closed))
    ));
    assert_eq!(manager.selected(), Some(chat));

    manager.reconnect(&back).unwrap();
    assert_eq!(manager.state(), SubscriptionState::Subscribing(chat));
    assert_eq!(back.sent.borrow()[0], GatewayCommand::Subscribe { chat_id: chat });
}

#[test]
fn resubscribe_and_deselect() {
    let transport = RecordingTransport::default();
    let chat = Uuid::new_v4();
    let mut manager = SubscriptionManager::new(&transport);

    manager.resubscribe().unwrap();
    assert!(transport.sent.borrow().is_empty());

    manager.select(chat, vec![snapshot(1, Role::User, "x")]).unwrap();
    manager.handle_frame(GatewayFrame::ConfirmSubscription { chat_id: chat });
    manager.resubscribe().unwrap();
    assert_eq!(manager.state(), SubscriptionState::Subscribing(chat));

    manager.deselect().unwrap();
    assert_eq!(manager.state(), SubscriptionState::Unsubscribed);
    assert!(manager.transcript().is_empty());
    assert!(transport.active.borrow().is_empty());
}

#[test]
fn closed_transport_surfaces_as_error() {
    let mut manager = SubscriptionManager::new(ClosedTransport);
    assert!(matches!(
        manager.select(Uuid::new_v4(), Vec::new()),
        Err(ClientError::Transport(TransportError::Closed))
    ));
    assert_eq!(manager.state(), SubscriptionState::Unsubscribed);
}
