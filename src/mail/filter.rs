use regex::{Regex, RegexBuilder};

/// Header fields the automation filter looks at.
#[derive(Debug, Clone, Default)]
pub struct MailHeaders {
    pub from: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub list_unsubscribe: String,
    pub precedence: String,
    pub auto_submitted: String,
}

/// Drops notification and bulk mail before it reaches the classifier.
#[derive(Debug, Clone)]
pub struct AutomationFilter {
    sender_patterns: Vec<Regex>,
    automation_email: String,
}

impl AutomationFilter {
    pub fn new(patterns: &[String], automation_email: &str) -> Result<Self, regex::Error> {
        let sender_patterns = patterns
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            sender_patterns,
            automation_email: automation_email.trim().to_ascii_lowercase(),
        })
    }

    /// Returns why a message counts as automated, or `None` for human mail.
    pub fn automated_reason(&self, sender: &str, headers: &MailHeaders) -> Option<&'static str> {
        if sender.eq_ignore_ascii_case(&self.automation_email) {
            return Some("self-sent");
        }
        if self.sender_patterns.iter().any(|re| re.is_match(sender)) {
            return Some("sender pattern");
        }
        if !headers.list_unsubscribe.trim().is_empty() {
            return Some("list-unsubscribe");
        }
        let precedence = headers.precedence.trim().to_ascii_lowercase();
        if matches!(precedence.as_str(), "bulk" | "list" | "junk") {
            return Some("precedence");
        }
        let auto_submitted = headers.auto_submitted.trim().to_ascii_lowercase();
        if !auto_submitted.is_empty() && auto_submitted != "no" {
            return Some("auto-submitted");
        }
        None
    }
}
