//! Inbound address matching.
//!
//! Decides whether a channel message is directed at the bot: any of its
//! nicknames followed by `:` or `,`, case-insensitively, anywhere in the
//! text. "parrot: hello" addresses us, "parroting along" does not.

use regex::Regex;

pub struct AddressMatcher {
    configured_nick: String,
    effective_nick: String,
    pattern: Regex,
}

impl AddressMatcher {
    pub fn new(configured_nick: &str) -> Result<Self, regex::Error> {
        let pattern = compile(configured_nick, configured_nick)?;
        Ok(Self {
            configured_nick: configured_nick.to_string(),
            effective_nick: configured_nick.to_string(),
            pattern,
        })
    }

    /// Recompile for a changed effective nick. Compilation happens only on
    /// an actual change; the common path is a string comparison.
    pub fn refresh(&mut self, effective_nick: &str) {
        if effective_nick == self.effective_nick {
            return;
        }
        match compile(&self.configured_nick, effective_nick) {
            Ok(pattern) => {
                self.pattern = pattern;
                self.effective_nick = effective_nick.to_string();
            }
            Err(e) => {
                // Keep matching on the previous pattern; nicks are escaped,
                // so this is unreachable in practice.
                tracing::warn!(error = %e, nick = %effective_nick, "failed to recompile address pattern");
            }
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

fn compile(configured: &str, effective: &str) -> Result<Regex, regex::Error> {
    // The literal "parrot" stays an alternative whatever the bot was
    // renamed to, matching the original bot's behavior.
    let mut alternatives = vec![regex::escape(configured)];
    if effective != configured {
        alternatives.push(regex::escape(effective));
    }
    if configured != "parrot" && effective != "parrot" {
        alternatives.push("parrot".to_string());
    }
    Regex::new(&format!("(?i:{})(?::|,)", alternatives.join("|")))
}
