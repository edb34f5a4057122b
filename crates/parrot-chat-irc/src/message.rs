//! IRC line parsing.
//!
//! Minimal RFC 1459 message model: optional prefix, command, parameters
//! with an optional trailing parameter. No IRCv3 tag support; nothing in
//! this system uses tags.

/// A parsed IRC protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message source (`nick!user@host` or a server name), without the
    /// leading `:`.
    pub prefix: Option<String>,
    /// Command or numeric reply code, as sent.
    pub command: String,
    /// Parameters, with the trailing parameter unprefixed.
    pub params: Vec<String>,
}

impl Message {
    /// Parse one protocol line. Returns `None` for blank or malformed lines.
    pub fn parse(line: &str) -> Option<Message> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return None;
        }

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, remainder) = stripped.split_once(' ')?;
            rest = remainder.trim_start_matches(' ');
            Some(prefix.to_string())
        } else {
            None
        };

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, remainder)) => (command, remainder.trim_start_matches(' ')),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, remainder)) => {
                    params.push(param.to_string());
                    rest = remainder.trim_start_matches(' ');
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Some(Message {
            prefix,
            command: command.to_string(),
            params,
        })
    }

    /// The nick portion of the prefix, if the prefix is a user source.
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split('!').next().unwrap_or(prefix);
        if nick.is_empty() { None } else { Some(nick) }
    }
}
