//! Update dispatcher: turns one fetched batch into `(handler, event)` pairs.
//!
//! Classification is pure with respect to handler execution: nothing runs
//! here, the caller decides whether the pairs go to a worker pool or run
//! inline. The only side effect is consuming next-step and reply entries.

use std::collections::BTreeMap;
use std::sync::Arc;

use botloop_core::{Event, EventKind, Update};

use crate::handler::Handler;
use crate::registry::HandlerRegistry;

/// Which path selected a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    NextStep,
    Reply,
    Generic,
}

/// One scheduled handler invocation.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub update_id: i64,
    pub route: Route,
    pub handler: Handler,
    pub event: Arc<Event>,
}

impl Dispatch {
    /// Task label for logs: `<handler>#<update_id>`.
    pub fn label(&self) -> String {
        format!("{}#{}", self.handler.name(), self.update_id)
    }
}

/// Result of classifying a batch.
#[derive(Debug, Default)]
pub struct Classified {
    /// Highest update id in the batch, for offset advancement.
    pub max_update_id: Option<i64>,
    pub dispatches: Vec<Dispatch>,
}

struct Pending {
    update_id: i64,
    event: Arc<Event>,
}

pub struct UpdateDispatcher {
    registry: Arc<HandlerRegistry>,
}

impl UpdateDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn process(&self, batch: Vec<Update>) -> Classified {
        let mut classified = Classified::default();
        if batch.is_empty() {
            return classified;
        }

        // Buckets iterate in EventKind declaration order: messages first.
        let mut buckets: BTreeMap<EventKind, Vec<Pending>> = BTreeMap::new();
        for update in batch {
            classified.max_update_id = Some(
                classified
                    .max_update_id
                    .map_or(update.update_id, |max| max.max(update.update_id)),
            );
            buckets.entry(update.kind()).or_default().push(Pending {
                update_id: update.update_id,
                event: Arc::new(update.event),
            });
        }

        for (kind, items) in buckets {
            if kind == EventKind::Message {
                self.route_messages(items, &mut classified.dispatches);
            } else {
                for item in items {
                    self.route_generic(kind, item, &mut classified.dispatches);
                }
            }
        }

        tracing::debug!(
            "📨 Classified batch up to #{:?} into {} dispatches",
            classified.max_update_id,
            classified.dispatches.len()
        );
        classified
    }

    fn route_messages(&self, items: Vec<Pending>, out: &mut Vec<Dispatch>) {
        // Next-step handlers consume the message entirely.
        let mut remaining = Vec::with_capacity(items.len());
        for item in items {
            let chat_id = match item.event.message() {
                Some(m) => m.chat.id,
                None => {
                    remaining.push(item);
                    continue;
                }
            };
            match self.registry.next_step().pop(chat_id) {
                Some(handlers) => {
                    tracing::debug!("➡️ Message #{} consumed by next-step handlers of chat {}", item.update_id, chat_id);
                    push_all(handlers, &item, Route::NextStep, out);
                }
                None => remaining.push(item),
            }
        }

        // Reply handlers fire but the message still goes through generic routing.
        for item in &remaining {
            let replied_to = item
                .event
                .message()
                .and_then(|m| m.reply_to_message.as_ref())
                .map(|original| original.message_id);
            if let Some(original_id) = replied_to {
                if let Some(handlers) = self.registry.reply().pop(original_id) {
                    tracing::debug!("↩️ Message #{} triggered reply handlers of message {}", item.update_id, original_id);
                    push_all(handlers, item, Route::Reply, out);
                }
            }
        }

        for item in remaining {
            self.route_generic(EventKind::Message, item, out);
        }
    }

    fn route_generic(&self, kind: EventKind, item: Pending, out: &mut Vec<Dispatch>) {
        let matched = self
            .registry
            .handlers_for(kind)
            .into_iter()
            .find(|record| record.filters.matches(&item.event));
        match matched {
            Some(record) => out.push(Dispatch {
                update_id: item.update_id,
                route: Route::Generic,
                handler: record.handler.clone(),
                event: item.event,
            }),
            None => tracing::trace!("No {} handler matched update #{}", kind, item.update_id),
        }
    }
}

fn push_all(handlers: Vec<Handler>, item: &Pending, route: Route, out: &mut Vec<Dispatch>) {
    for handler in handlers {
        out.push(Dispatch {
            update_id: item.update_id,
            route,
            handler,
            event: item.event.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::Filters;
    use botloop_core::{CallbackQuery, Message, User};

    fn noop(name: &str) -> Handler {
        Handler::new(name, |_, _| Ok(()))
    }

    fn msg(update_id: i64, message_id: i64, chat_id: i64, text: &str) -> Update {
        Update::new(update_id, Event::Message(Message::text(message_id, chat_id, text)))
    }

    fn names(classified: &Classified) -> Vec<(String, Route)> {
        classified
            .dispatches
            .iter()
            .map(|d| (d.handler.name().to_string(), d.route))
            .collect()
    }

    fn dispatcher() -> UpdateDispatcher {
        UpdateDispatcher::new(Arc::new(HandlerRegistry::new()))
    }

    #[test]
    fn test_first_match_wins() {
        let d = dispatcher();
        d.registry().register(EventKind::Message, Filters::new().commands(["start", "help"]), noop("h1"));
        d.registry().register(EventKind::Message, Filters::new().func(|_| true), noop("h2"));

        let out = d.process(vec![msg(1, 10, 5, "/start")]);
        assert_eq!(names(&out), vec![("h1".to_string(), Route::Generic)]);

        let out = d.process(vec![msg(2, 11, 5, "hello")]);
        assert_eq!(names(&out), vec![("h2".to_string(), Route::Generic)]);
    }

    #[test]
    fn test_next_step_consumes_message() {
        let d = dispatcher();
        d.registry().register(EventKind::Message, Filters::new(), noop("generic"));
        d.registry().register_next_step(5, noop("step"));

        let out = d.process(vec![msg(1, 10, 5, "Ann")]);
        assert_eq!(names(&out), vec![("step".to_string(), Route::NextStep)]);
        assert!(!d.registry().next_step().contains(5));

        // One-shot: the next message in that chat is routed normally.
        let out = d.process(vec![msg(2, 11, 5, "again")]);
        assert_eq!(names(&out), vec![("generic".to_string(), Route::Generic)]);
    }

    #[test]
    fn test_next_step_only_first_message_of_chat_in_batch() {
        let d = dispatcher();
        d.registry().register(EventKind::Message, Filters::new(), noop("generic"));
        d.registry().register_next_step(5, noop("step_a"));
        d.registry().register_next_step(5, noop("step_b"));

        let out = d.process(vec![msg(1, 10, 5, "one"), msg(2, 11, 5, "two")]);
        assert_eq!(
            names(&out),
            vec![
                ("step_a".to_string(), Route::NextStep),
                ("step_b".to_string(), Route::NextStep),
                ("generic".to_string(), Route::Generic),
            ]
        );
        assert_eq!(out.dispatches[2].update_id, 2);
    }

    #[test]
    fn test_reply_handler_runs_and_message_still_routed() {
        let d = dispatcher();
        d.registry().register(EventKind::Message, Filters::new(), noop("generic"));
        d.registry().register_reply(77, noop("on_reply"));

        let original = Message::text(77, 5, "What is your name?");
        let reply = Message::text(78, 5, "Bob").replying_to(original);
        let out = d.process(vec![Update::new(3, Event::Message(reply))]);
        assert_eq!(
            names(&out),
            vec![
                ("on_reply".to_string(), Route::Reply),
                ("generic".to_string(), Route::Generic),
            ]
        );
        assert!(!d.registry().reply().contains(77));
    }

    #[test]
    fn test_next_step_takes_precedence_over_reply() {
        let d = dispatcher();
        d.registry().register_next_step(5, noop("step"));
        d.registry().register_reply(77, noop("on_reply"));

        let reply = Message::text(78, 5, "Bob").replying_to(Message::text(77, 5, "?"));
        let out = d.process(vec![Update::new(3, Event::Message(reply))]);
        assert_eq!(names(&out), vec![("step".to_string(), Route::NextStep)]);
        // The reply registration is untouched because the message was consumed.
        assert!(d.registry().reply().contains(77));
    }

    #[test]
    fn test_other_kinds_use_their_own_lists() {
        let d = dispatcher();
        d.registry().register(EventKind::Message, Filters::new().any_content(), noop("messages"));
        d.registry().register(
            EventKind::CallbackQuery,
            Filters::new().func(|e| matches!(e, Event::CallbackQuery(q) if q.data.as_deref() == Some("ok"))),
            noop("cb_ok"),
        );
        d.registry().register(EventKind::CallbackQuery, Filters::new(), noop("cb_any"));
        d.registry().register(EventKind::EditedMessage, Filters::new(), noop("edits"));
        d.registry().register_next_step(5, noop("step"));

        let query = |id: i64, data: &str| {
            Update::new(
                id,
                Event::CallbackQuery(CallbackQuery {
                    id: id.to_string(),
                    from: User { id: 5, is_bot: false, first_name: "u".into(), last_name: None, username: None },
                    message: None,
                    data: Some(data.into()),
                    chat_instance: None,
                }),
            )
        };
        let edited = Update::new(12, Event::EditedMessage(Message::text(3, 5, "fixed")));

        let out = d.process(vec![query(10, "ok"), query(11, "nope"), edited]);
        assert_eq!(
            names(&out),
            vec![
                ("edits".to_string(), Route::Generic),
                ("cb_ok".to_string(), Route::Generic),
                ("cb_any".to_string(), Route::Generic),
            ]
        );
        // Next-step handlers only apply to new messages.
        assert!(d.registry().next_step().contains(5));
        assert_eq!(out.max_update_id, Some(12));
    }

    #[test]
    fn test_unmatched_and_empty_batches() {
        let d = dispatcher();
        let out = d.process(vec![msg(4, 1, 1, "nobody listens")]);
        assert!(out.dispatches.is_empty());
        assert_eq!(out.max_update_id, Some(4));

        let out = d.process(Vec::new());
        assert!(out.max_update_id.is_none());
    }

    #[test]
    fn test_arrival_order_kept_within_kind() {
        let d = dispatcher();
        d.registry().register(EventKind::Message, Filters::new(), noop("generic"));
        let out = d.process(vec![msg(9, 1, 1, "a"), msg(7, 2, 2, "b"), msg(8, 3, 3, "c")]);
        let ids: Vec<i64> = out.dispatches.iter().map(|d| d.update_id).collect();
        assert_eq!(ids, vec![9, 7, 8]);
        assert_eq!(out.max_update_id, Some(9));
        assert_eq!(out.dispatches[0].label(), "generic#9");
    }
}
