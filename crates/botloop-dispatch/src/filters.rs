//! Handler filters: named predicates over an event.
//!
//! A handler matches only when every configured filter holds. Unset or empty
//! filters are skipped. Filters that read message text or chat evaluate false
//! on kinds that carry no message.

use std::sync::Arc;

use botloop_core::{BotError, Event, Result};
use regex::{Regex, RegexBuilder};

/// Arbitrary predicate filter.
pub type Predicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct Filters {
    commands: Vec<String>,
    regexp: Option<Regex>,
    func: Option<Predicate>,
    /// `None` means "not chosen": message-like handlers then default to text only.
    content_types: Option<Vec<String>>,
    chat_types: Vec<String>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message must be one of these commands (`/start`, `/help@my_bot` → `help`).
    pub fn commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands = commands.into_iter().map(Into::into).collect();
        self
    }

    /// Message text must contain a match of `regex`.
    pub fn regexp(mut self, regex: Regex) -> Self {
        self.regexp = Some(regex);
        self
    }

    /// Compile `pattern` case-insensitively and use it as the text filter.
    pub fn try_regexp(self, pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| BotError::Filter(format!("invalid pattern '{pattern}': {e}")))?;
        Ok(self.regexp(regex))
    }

    pub fn func<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.func = Some(Arc::new(predicate));
        self
    }

    pub fn content_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.content_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Accept every content type, overriding the text-only default.
    pub fn any_content(mut self) -> Self {
        self.content_types = Some(Vec::new());
        self
    }

    pub fn chat_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chat_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Fill in `content_types = ["text"]` when the caller left it unset.
    pub fn with_text_default(mut self) -> Self {
        if self.content_types.is_none() {
            self.content_types = Some(vec!["text".to_string()]);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
            && self.regexp.is_none()
            && self.func.is_none()
            && self.content_types.as_ref().is_none_or(|t| t.is_empty())
            && self.chat_types.is_empty()
    }

    /// Pure check of every configured filter against `event`.
    pub fn matches(&self, event: &Event) -> bool {
        let message = event.message();

        if let Some(types) = self.content_types.as_ref().filter(|t| !t.is_empty()) {
            match message {
                Some(m) => {
                    let content = m.content_type();
                    if !types.iter().any(|t| t == content) {
                        return false;
                    }
                }
                None => return false,
            }
        }

        if !self.chat_types.is_empty() {
            match message {
                Some(m) if self.chat_types.iter().any(|t| *t == m.chat.chat_type) => {}
                _ => return false,
            }
        }

        if !self.commands.is_empty() {
            let command = message
                .and_then(|m| m.text.as_deref())
                .and_then(extract_command);
            match command {
                Some(cmd) if self.commands.iter().any(|c| c == cmd) => {}
                _ => return false,
            }
        }

        if let Some(regex) = &self.regexp {
            match message.and_then(|m| m.text.as_deref()) {
                Some(text) if regex.is_match(text) => {}
                _ => return false,
            }
        }

        if let Some(func) = &self.func {
            if !func(event) {
                return false;
            }
        }

        true
    }
}

impl std::fmt::Debug for Filters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filters")
            .field("commands", &self.commands)
            .field("regexp", &self.regexp.as_ref().map(Regex::as_str))
            .field("func", &self.func.is_some())
            .field("content_types", &self.content_types)
            .field("chat_types", &self.chat_types)
            .finish()
    }
}

/// Command name of a `/command@bot args` text, without slash or bot suffix.
pub fn extract_command(text: &str) -> Option<&str> {
    if !text.starts_with('/') {
        return None;
    }
    let token = text.split_whitespace().next().unwrap_or("/");
    let token = token.split('@').next().unwrap_or(token);
    Some(&token[1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use botloop_core::{CallbackQuery, Message, User};

    fn text(t: &str) -> Event {
        Event::Message(Message::text(1, 10, t))
    }

    fn callback(data: &str) -> Event {
        Event::CallbackQuery(CallbackQuery {
            id: "q".into(),
            from: User {
                id: 10,
                is_bot: false,
                first_name: "u".into(),
                last_name: None,
                username: None,
            },
            message: None,
            data: Some(data.into()),
            chat_instance: None,
        })
    }

    #[test]
    fn test_extract_command() {
        assert_eq!(extract_command("/start"), Some("start"));
        assert_eq!(extract_command("/help@my_bot now"), Some("help"));
        assert_eq!(extract_command("/"), Some(""));
        assert_eq!(extract_command("hello /start"), None);
    }

    #[test]
    fn test_commands_filter() {
        let filters = Filters::new().commands(["start", "help"]);
        assert!(filters.matches(&text("/start")));
        assert!(filters.matches(&text("/help me")));
        assert!(!filters.matches(&text("/Start")));
        assert!(!filters.matches(&text("hello")));
        assert!(!filters.matches(&callback("/start")));
    }

    #[test]
    fn test_regexp_is_case_insensitive() {
        let filters = Filters::new().try_regexp(r"^hel+o").unwrap();
        assert!(filters.matches(&text("HELLO there")));
        assert!(!filters.matches(&text("oh hello")));
        assert!(Filters::new().try_regexp("(").is_err());
    }

    #[test]
    fn test_content_and_chat_types() {
        let mut photo = Message::text(2, 10, "x");
        photo.text = None;
        photo.extra.insert("photo".into(), serde_json::json!([]));
        let photo = Event::Message(photo);

        let text_only = Filters::new().with_text_default();
        assert!(text_only.matches(&text("hi")));
        assert!(!text_only.matches(&photo));

        let any = Filters::new().any_content().with_text_default();
        assert!(any.matches(&photo));

        let groups = Filters::new().chat_types(["group", "supergroup"]);
        assert!(!groups.matches(&text("hi")));
        assert!(Filters::new().chat_types(["private"]).matches(&text("hi")));
    }

    #[test]
    fn test_all_filters_must_hold() {
        let filters = Filters::new()
            .commands(["start"])
            .func(|e| e.sender().is_some_and(|u| u.id == 10));
        assert!(filters.matches(&text("/start")));

        let wrong_user = Filters::new()
            .commands(["start"])
            .func(|e| e.sender().is_some_and(|u| u.id == 99));
        assert!(!wrong_user.matches(&text("/start")));
    }

    #[test]
    fn test_empty_filters_match_everything() {
        let filters = Filters::new().commands(Vec::<String>::new());
        assert!(filters.is_empty());
        assert!(filters.matches(&text("anything")));
        assert!(filters.matches(&callback("data")));
    }

    #[test]
    fn test_func_on_non_message_kind() {
        let filters = Filters::new().func(|e| matches!(e, Event::CallbackQuery(q) if q.data.as_deref() == Some("yes")));
        assert!(filters.matches(&callback("yes")));
        assert!(!filters.matches(&callback("no")));
    }
}
