//! End-of-run messages
//!
//! Components queue messages while the run progresses; they are printed
//! once, sorted by priority, when the process exits.

use parking_lot::Mutex;

/// Message priority, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub priority: Priority,
    /// Still shown when the run fails
    pub on_crash: bool,
}

/// Collects messages for the user
#[derive(Debug, Default)]
pub struct Reporter {
    messages: Mutex<Vec<Message>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message that is shown even if the run fails
    pub fn add_message(&self, text: impl Into<String>, priority: Priority) {
        self.add_message_with(text, priority, true);
    }

    pub fn add_message_with(&self, text: impl Into<String>, priority: Priority, on_crash: bool) {
        self.messages.lock().push(Message {
            text: text.into(),
            priority,
            on_crash,
        });
    }

    /// Snapshot of the queued messages, in insertion order
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    /// Render the queued messages, or `None` if there is nothing to show
    pub fn render(&self, crashed: bool) -> Option<String> {
        let mut messages: Vec<Message> = self
            .messages
            .lock()
            .iter()
            .filter(|m| !crashed || m.on_crash)
            .cloned()
            .collect();
        if messages.is_empty() {
            return None;
        }
        messages.sort_by_key(|m| m.priority);

        let mut out = String::from("\nIMPORTANT NOTES:\n");
        for message in &messages {
            let mut lines = message.text.trim_end().lines();
            if let Some(first) = lines.next() {
                out.push_str(" - ");
                out.push_str(first);
                out.push('\n');
            }
            for line in lines {
                if !line.is_empty() {
                    out.push_str("   ");
                    out.push_str(line);
                }
                out.push('\n');
            }
        }
        Some(out)
    }

    /// Print and drain the queued messages
    pub fn print_messages(&self, crashed: bool) {
        if let Some(text) = self.render(crashed) {
            println!("{}", text);
        }
        self.messages.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_by_priority_and_stable() {
        let reporter = Reporter::new();
        reporter.add_message("low", Priority::Low);
        reporter.add_message("high one", Priority::High);
        reporter.add_message("medium", Priority::Medium);
        reporter.add_message("high two", Priority::High);

        let text = reporter.render(false).unwrap();
        let order: Vec<&str> = text
            .lines()
            .filter_map(|l| l.strip_prefix(" - "))
            .collect();
        assert_eq!(order, ["high one", "high two", "medium", "low"]);
    }

    #[test]
    fn test_crash_drops_success_only_messages() {
        let reporter = Reporter::new();
        reporter.add_message_with("The dry run was successful.", Priority::High, false);
        reporter.add_message("Keep me", Priority::Low);

        let text = reporter.render(true).unwrap();
        assert!(!text.contains("dry run"));
        assert!(text.contains("Keep me"));
    }

    #[test]
    fn test_multiline_messages_are_indented() {
        let reporter = Reporter::new();
        reporter.add_message("first\nsecond\n\nthird", Priority::Medium);
        let text = reporter.render(false).unwrap();
        assert!(text.contains(" - first\n   second\n\n   third\n"));
    }

    #[test]
    fn test_empty_renders_nothing() {
        assert!(Reporter::new().render(false).is_none());
    }
}
