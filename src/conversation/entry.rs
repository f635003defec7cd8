//! The canonical unit of threading.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub sender_email: String,
    pub sender_name: String,
    /// Local-time string in `DD/MM/YYYY HH:MM TZ` form — the human-facing
    /// canonical representation, not a machine timestamp.
    pub sender_datetime: String,
    pub content: String,
    pub order: u32,
}

impl ConversationEntry {
    pub fn normalized_content(&self) -> String {
        self.content.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// `H(sender_email + "|" + normalized_content)`.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.sender_email.as_bytes());
        hasher.update(b"|");
        hasher.update(self.normalized_content().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(email: &str, content: &str) -> ConversationEntry {
        ConversationEntry {
            sender_email: email.to_owned(),
            sender_name: "Someone".to_owned(),
            sender_datetime: "03/06/2025 09:00 BST".to_owned(),
            content: content.to_owned(),
            order: 1,
        }
    }

    #[test]
    fn fingerprint_ignores_whitespace_differences() {
        let a = entry("js@client.example", "Hello   there\n\nteam");
        let b = entry("js@client.example", "Hello there team");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_sender() {
        let a = entry("js@client.example", "same body");
        let b = entry("other@client.example", "same body");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
