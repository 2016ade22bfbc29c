//! Update data model: one fetched event and its payload kinds.
//!
//! Only the fields the engine routes on are typed. Everything else a payload
//! carries stays in a flattened JSON map, so the wire format of each kind is
//! not pinned down here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One fetched event: a monotonically increasing id plus exactly one payload.
///
/// Serializes as `{"update_id": 7, "message": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(flatten)]
    pub event: Event,
}

impl Update {
    pub fn new(update_id: i64, event: Event) -> Self {
        Self { update_id, event }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

/// The payload of an update. Variants are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Message(Message),
    EditedMessage(Message),
    ChannelPost(Message),
    EditedChannelPost(Message),
    InlineQuery(InlineQuery),
    ChosenInlineResult(ChosenInlineResult),
    CallbackQuery(CallbackQuery),
    ShippingQuery(ShippingQuery),
    PreCheckoutQuery(PreCheckoutQuery),
    Poll(Poll),
    PollAnswer(PollAnswer),
    MyChatMember(ChatMemberUpdated),
    ChatMember(ChatMemberUpdated),
    ChatJoinRequest(ChatJoinRequest),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Message(_) => EventKind::Message,
            Event::EditedMessage(_) => EventKind::EditedMessage,
            Event::ChannelPost(_) => EventKind::ChannelPost,
            Event::EditedChannelPost(_) => EventKind::EditedChannelPost,
            Event::InlineQuery(_) => EventKind::InlineQuery,
            Event::ChosenInlineResult(_) => EventKind::ChosenInlineResult,
            Event::CallbackQuery(_) => EventKind::CallbackQuery,
            Event::ShippingQuery(_) => EventKind::ShippingQuery,
            Event::PreCheckoutQuery(_) => EventKind::PreCheckoutQuery,
            Event::Poll(_) => EventKind::Poll,
            Event::PollAnswer(_) => EventKind::PollAnswer,
            Event::MyChatMember(_) => EventKind::MyChatMember,
            Event::ChatMember(_) => EventKind::ChatMember,
            Event::ChatJoinRequest(_) => EventKind::ChatJoinRequest,
        }
    }

    /// The message, for message-like kinds (messages, edits, channel posts).
    pub fn message(&self) -> Option<&Message> {
        match self {
            Event::Message(m)
            | Event::EditedMessage(m)
            | Event::ChannelPost(m)
            | Event::EditedChannelPost(m) => Some(m),
            _ => None,
        }
    }

    /// The user who caused the event, when the payload names one.
    pub fn sender(&self) -> Option<&User> {
        match self {
            Event::Message(m)
            | Event::EditedMessage(m)
            | Event::ChannelPost(m)
            | Event::EditedChannelPost(m) => m.from.as_ref(),
            Event::InlineQuery(q) => Some(&q.from),
            Event::ChosenInlineResult(r) => Some(&r.from),
            Event::CallbackQuery(q) => Some(&q.from),
            Event::ShippingQuery(q) => Some(&q.from),
            Event::PreCheckoutQuery(q) => Some(&q.from),
            Event::Poll(_) => None,
            Event::PollAnswer(a) => a.user.as_ref(),
            Event::MyChatMember(u) | Event::ChatMember(u) => Some(&u.from),
            Event::ChatJoinRequest(r) => Some(&r.from),
        }
    }
}

/// Payload-free tag of an [`Event`]; keys the per-kind handler lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    EditedMessage,
    ChannelPost,
    EditedChannelPost,
    InlineQuery,
    ChosenInlineResult,
    CallbackQuery,
    ShippingQuery,
    PreCheckoutQuery,
    Poll,
    PollAnswer,
    MyChatMember,
    ChatMember,
    ChatJoinRequest,
}

impl EventKind {
    pub const ALL: [EventKind; 14] = [
        EventKind::Message,
        EventKind::EditedMessage,
        EventKind::ChannelPost,
        EventKind::EditedChannelPost,
        EventKind::InlineQuery,
        EventKind::ChosenInlineResult,
        EventKind::CallbackQuery,
        EventKind::ShippingQuery,
        EventKind::PreCheckoutQuery,
        EventKind::Poll,
        EventKind::PollAnswer,
        EventKind::MyChatMember,
        EventKind::ChatMember,
        EventKind::ChatJoinRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::EditedMessage => "edited_message",
            EventKind::ChannelPost => "channel_post",
            EventKind::EditedChannelPost => "edited_channel_post",
            EventKind::InlineQuery => "inline_query",
            EventKind::ChosenInlineResult => "chosen_inline_result",
            EventKind::CallbackQuery => "callback_query",
            EventKind::ShippingQuery => "shipping_query",
            EventKind::PreCheckoutQuery => "pre_checkout_query",
            EventKind::Poll => "poll",
            EventKind::PollAnswer => "poll_answer",
            EventKind::MyChatMember => "my_chat_member",
            EventKind::ChatMember => "chat_member",
            EventKind::ChatJoinRequest => "chat_join_request",
        }
    }

    /// Kinds whose payload is a [`Message`].
    pub fn is_message_like(&self) -> bool {
        matches!(
            self,
            EventKind::Message
                | EventKind::EditedMessage
                | EventKind::ChannelPost
                | EventKind::EditedChannelPost
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Content fields checked, in order, when a message has no text.
const CONTENT_FIELDS: &[&str] = &[
    "photo",
    "audio",
    "document",
    "animation",
    "sticker",
    "video",
    "video_note",
    "voice",
    "contact",
    "location",
    "venue",
    "dice",
    "poll",
    "invoice",
    "successful_payment",
    "new_chat_members",
    "left_chat_member",
    "new_chat_title",
    "new_chat_photo",
    "delete_chat_photo",
    "group_chat_created",
    "pinned_message",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<Message>>,
    /// Untyped content fields (photo, document, location, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Text message in a private chat; mostly useful for tests and replays.
    pub fn text(message_id: i64, chat_id: i64, text: &str) -> Self {
        Self {
            message_id,
            from: Some(User {
                id: chat_id,
                is_bot: false,
                first_name: "user".into(),
                last_name: None,
                username: None,
            }),
            chat: Chat {
                id: chat_id,
                chat_type: "private".into(),
                title: None,
                username: None,
            },
            date: 0,
            text: Some(text.to_string()),
            caption: None,
            reply_to_message: None,
            extra: Map::new(),
        }
    }

    pub fn replying_to(mut self, original: Message) -> Self {
        self.reply_to_message = Some(Box::new(original));
        self
    }

    /// `"text"` when text is present, else the first known content field, else `"unknown"`.
    pub fn content_type(&self) -> &str {
        if self.text.is_some() {
            return "text";
        }
        CONTENT_FIELDS
            .iter()
            .find(|field| self.extra.contains_key(**field))
            .copied()
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub offset: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChosenInlineResult {
    pub result_id: String,
    pub from: User,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub inline_message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub chat_instance: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingQuery {
    pub id: String,
    pub from: User,
    pub invoice_payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: User,
    pub currency: String,
    pub total_amount: i64,
    pub invoice_payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub total_voter_count: i64,
    #[serde(default)]
    pub is_closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollAnswer {
    pub poll_id: String,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub option_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub from: User,
    #[serde(default)]
    pub date: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatJoinRequest {
    pub chat: Chat,
    pub from: User,
    #[serde(default)]
    pub date: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_wire_shape() {
        let json = r#"{
            "update_id": 42,
            "message": {
                "message_id": 7,
                "from": {"id": 1, "is_bot": false, "first_name": "An"},
                "chat": {"id": 1, "type": "private"},
                "date": 1700000000,
                "text": "/start"
            }
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();
        assert_eq!(update.update_id, 42);
        assert_eq!(update.kind(), EventKind::Message);
        let msg = update.event.message().unwrap();
        assert_eq!(msg.text.as_deref(), Some("/start"));
        assert_eq!(msg.chat.chat_type, "private");

        let back = serde_json::to_value(&update).unwrap();
        assert!(back.get("message").is_some());
        assert_eq!(back["update_id"], 42);
    }

    #[test]
    fn test_content_type_from_extra_fields() {
        let json = r#"{
            "message_id": 3,
            "chat": {"id": 5, "type": "group"},
            "photo": [{"file_id": "abc"}],
            "caption": "look"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.content_type(), "photo");
        assert_eq!(Message::text(1, 1, "hi").content_type(), "text");

        let bare: Message =
            serde_json::from_str(r#"{"message_id": 1, "chat": {"id": 1, "type": "private"}}"#).unwrap();
        assert_eq!(bare.content_type(), "unknown");
    }

    #[test]
    fn test_callback_query_kind() {
        let json = r#"{
            "update_id": 9,
            "callback_query": {"id": "q1", "from": {"id": 2, "first_name": "B"}, "data": "yes"}
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();
        assert_eq!(update.kind(), EventKind::CallbackQuery);
        assert!(update.event.message().is_none());
        assert_eq!(update.event.sender().map(|u| u.id), Some(2));
    }

    #[test]
    fn test_event_kind_names_round_trip_serde() {
        for kind in EventKind::ALL {
            let encoded = serde_json::to_string(&kind).unwrap();
            assert_eq!(encoded, format!("\"{}\"", kind.as_str()));
        }
        assert!(EventKind::ChannelPost.is_message_like());
        assert!(!EventKind::Poll.is_message_like());
    }
}
