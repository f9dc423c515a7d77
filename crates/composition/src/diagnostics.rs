use std::fmt;

/// Warnings and errors collected while composing.
#[derive(Debug, Default)]
pub struct Diagnostics {
    messages: Vec<(Severity, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Fatal,
}

impl Diagnostics {
    pub(crate) fn push_fatal(&mut self, message: String) {
        self.messages.push((Severity::Fatal, message));
    }

    pub(crate) fn push_warning(&mut self, message: String) {
        self.messages.push((Severity::Warning, message));
    }

    pub fn any_fatal(&self) -> bool {
        self.messages
            .iter()
            .any(|(severity, _)| *severity == Severity::Fatal)
    }

    pub fn iter_messages(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|(_, message)| message.as_str())
    }

    pub fn iter_fatal(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .filter(|(severity, _)| *severity == Severity::Fatal)
            .map(|(_, message)| message.as_str())
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for message in self.iter_messages() {
            if !first {
                f.write_str("\n")?;
            }
            f.write_str(message)?;
            first = false;
        }
        Ok(())
    }
}
