use aria_core::message::Message;

/// Append-only conversation history with deterministic truncation.
///
/// When the estimated token count exceeds the budget, whole messages are
/// dropped oldest-first. System messages and the original user task are
/// always retained; a message is never split.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn token_estimate(&self) -> u32 {
        self.messages.iter().map(|m| m.token_estimate()).sum()
    }

    pub fn truncate_to(&mut self, max_tokens: u32) {
        while self.token_estimate() > max_tokens {
            let first_user = self.messages.iter().position(|m| m.is_user());
            let droppable = self
                .messages
                .iter()
                .enumerate()
                .position(|(i, m)| !m.is_system() && first_user != Some(i));
            match droppable {
                Some(index) => {
                    self.messages.remove(index);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use aria_core::tool::ToolOutput;

    use super::*;

    fn filler(len: usize) -> String {
        "x".repeat(len)
    }

    #[test]
    fn within_budget_nothing_is_dropped() {
        let mut conv = Conversation::new();
        conv.push(Message::system("be helpful"));
        conv.push(Message::user("task"));
        conv.push(Message::assistant("answer"));
        conv.truncate_to(10_000);
        assert_eq!(conv.messages().len(), 3);
    }

    #[test]
    fn drops_oldest_non_system_first() {
        let mut conv = Conversation::new();
        conv.push(Message::system("sys"));
        conv.push(Message::user("the original task"));
        conv.push(Message::assistant(filler(4000)));
        conv.push(Message::assistant(filler(4000)));
        conv.push(Message::assistant("recent"));

        conv.truncate_to(1200);

        // System and the original task survive; the oldest filler goes first.
        assert!(conv.messages()[0].is_system());
        assert!(conv.messages()[1].is_user());
        let remaining_fillers = conv
            .messages()
            .iter()
            .filter(|m| matches!(m, Message::Assistant { text } if text.len() == 4000))
            .count();
        assert!(remaining_fillers < 2);
    }

    #[test]
    fn original_task_is_never_dropped() {
        let mut conv = Conversation::new();
        conv.push(Message::system("sys"));
        conv.push(Message::user(filler(8000)));
        conv.truncate_to(100);
        assert_eq!(conv.messages().len(), 2);
        assert!(conv.messages()[1].is_user());
    }

    #[test]
    fn later_user_messages_are_droppable() {
        let mut conv = Conversation::new();
        conv.push(Message::user("original task"));
        conv.push(Message::user(filler(8000)));
        conv.truncate_to(200);
        assert_eq!(conv.messages().len(), 1);
        assert!(matches!(
            &conv.messages()[0],
            Message::User { text } if text == "original task"
        ));
    }

    #[test]
    fn truncation_is_deterministic() {
        let build = || {
            let mut conv = Conversation::new();
            conv.push(Message::system("sys"));
            conv.push(Message::user("task"));
            for i in 0..10 {
                conv.push(Message::tool_call("t", format!("call-{i}"), serde_json::json!({"i": i})));
                conv.push(Message::tool_result(
                    "t",
                    format!("call-{i}"),
                    ToolOutput::Success(serde_json::json!({"blob": filler(400)})),
                ));
            }
            conv.truncate_to(500);
            conv
        };
        let a = build();
        let b = build();
        let render = |c: &Conversation| serde_json::to_string(c.messages()).expect("serialize");
        assert_eq!(render(&a), render(&b));
        assert!(a.token_estimate() <= 500 || a.messages().len() == 2);
    }
}
