//! Line-oriented command protocol
//!
//! Request:  `<tag>:<VERB> <args>`
//! Response: `<tag>:FULFILLED <payload>` or `<tag>:FAILED <message>`
use crate::error::Result;
use crate::protocol_error;

pub const FULFILLED: &str = "FULFILLED";
pub const FAILED: &str = "FAILED";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String },
    SetEx { key: String, ttl_seconds: u32, value: String },
    Peers,
    Filter,
    AddPeer { address: String },
    Disconnect { address: String },
}

impl Command {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim_end_matches(['\r', '\n']);
        let (verb, rest) = match text.split_once(' ') {
            Some((verb, rest)) => (verb, rest),
            None => (text, ""),
        };
        match verb.to_ascii_uppercase().as_str() {
            "GET" => Ok(Command::Get {
                key: single_arg(verb, rest)?,
            }),
            "SET" => {
                let (key, value) = rest
                    .split_once(' ')
                    .ok_or_else(|| protocol_error!("SET requires a key and a value"))?;
                Ok(Command::Set {
                    key: non_empty(verb, key)?,
                    value: value.to_string(),
                })
            }
            "SETEX" => {
                let mut parts = rest.splitn(3, ' ');
                let key = non_empty(verb, parts.next().unwrap_or_default())?;
                let ttl_seconds = parts
                    .next()
                    .unwrap_or_default()
                    .parse::<u32>()
                    .map_err(|e| protocol_error!("SETEX ttl is not a number: {}", e))?;
                let value = parts
                    .next()
                    .ok_or_else(|| protocol_error!("SETEX requires a value"))?;
                Ok(Command::SetEx {
                    key,
                    ttl_seconds,
                    value: value.to_string(),
                })
            }
            "PEERS" => Ok(Command::Peers),
            "FILTER" => Ok(Command::Filter),
            "ADDPEER" => Ok(Command::AddPeer {
                address: single_arg(verb, rest)?,
            }),
            "DISCONNECT" => Ok(Command::Disconnect {
                address: single_arg(verb, rest)?,
            }),
            _ => Err(protocol_error!("Unknown command: {}", verb)),
        }
    }

    pub fn render(&self) -> String {
        match self {
            Command::Get { key } => format!("GET {}", key),
            Command::Set { key, value } => format!("SET {} {}", key, value),
            Command::SetEx {
                key,
                ttl_seconds,
                value,
            } => format!("SETEX {} {} {}", key, ttl_seconds, value),
            Command::Peers => "PEERS".to_string(),
            Command::Filter => "FILTER".to_string(),
            Command::AddPeer { address } => format!("ADDPEER {}", address),
            Command::Disconnect { address } => format!("DISCONNECT {}", address),
        }
    }
}

fn non_empty(verb: &str, arg: &str) -> Result<String> {
    if arg.is_empty() {
        Err(protocol_error!("{} requires an argument", verb))
    } else {
        Ok(arg.to_string())
    }
}

fn single_arg(verb: &str, rest: &str) -> Result<String> {
    let arg = rest.trim();
    if arg.contains(' ') {
        return Err(protocol_error!("{} takes a single argument", verb));
    }
    non_empty(verb, arg)
}

/// A tagged request line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub tag: String,
    pub command: Command,
}

impl Request {
    pub fn new(tag: impl Into<String>, command: Command) -> Self {
        Self {
            tag: tag.into(),
            command,
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let (tag, rest) = line
            .trim_end_matches(['\r', '\n'])
            .split_once(':')
            .ok_or_else(|| protocol_error!("Request is missing its tag"))?;
        if tag.is_empty() || tag.contains(' ') {
            return Err(protocol_error!("Invalid request tag: {:?}", tag));
        }
        Ok(Self {
            tag: tag.to_string(),
            command: Command::parse(rest)?,
        })
    }

    pub fn render(&self) -> String {
        tagged(&self.tag, &self.command.render())
    }
}

/// Prefix a raw command line with its tag
pub fn tagged(tag: &str, command: &str) -> String {
    format!("{}:{}", tag, command)
}

pub fn fulfilled(tag: &str, payload: &str) -> String {
    format!("{}:{} {}", tag, FULFILLED, payload)
}

pub fn failed(tag: &str, message: &str) -> String {
    format!("{}:{} {}", tag, FAILED, message)
}

/// A parsed response line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response<'a> {
    pub tag: &'a str,
    pub fulfilled: bool,
    pub payload: &'a str,
}

impl<'a> Response<'a> {
    pub fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (head, payload) = match line.split_once(' ') {
            Some((head, payload)) => (head, payload),
            None => (line, ""),
        };
        let (tag, status) = head.rsplit_once(':')?;
        Some(Self {
            tag,
            fulfilled: status == FULFILLED,
            payload,
        })
    }
}

/// Value carried by a `GET` response ("<key>:<value>") for `key`.
/// None for failed responses, a different key or an empty value.
pub fn parse_get_response(line: &str, key: &str) -> Option<String> {
    let response = Response::parse(line)?;
    if !response.fulfilled {
        return None;
    }
    let value = response.payload.strip_prefix(key)?.strip_prefix(':')?;
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Keys travel as a single protocol token
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(protocol_error!("Key must not be empty"));
    }
    if key.chars().any(char::is_whitespace) {
        return Err(protocol_error!("Key must not contain whitespace: {:?}", key));
    }
    Ok(())
}

/// Values take the rest of a line, so they may not span lines
pub fn validate_value(value: &str) -> Result<()> {
    if value.contains(['\n', '\r']) {
        return Err(protocol_error!("Value must not contain line breaks"));
    }
    Ok(())
}

/// Addresses carried by a peer-list response ("<tag> a1,a2,...")
pub fn parse_peer_list(line: &str) -> Vec<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    match line.split_once(' ') {
        Some((_, list)) => list
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_verb() {
        assert_eq!(
            Command::parse("GET a").unwrap(),
            Command::Get {
                key: "a".to_string()
            }
        );
        assert_eq!(
            Command::parse("SET a hello world").unwrap(),
            Command::Set {
                key: "a".to_string(),
                value: "hello world".to_string()
            }
        );
        assert_eq!(
            Command::parse("setex a 30 v").unwrap(),
            Command::SetEx {
                key: "a".to_string(),
                ttl_seconds: 30,
                value: "v".to_string()
            }
        );
        assert_eq!(Command::parse("PEERS").unwrap(), Command::Peers);
        assert_eq!(Command::parse("FILTER\r\n").unwrap(), Command::Filter);
        assert_eq!(
            Command::parse("DISCONNECT 10.0.0.1:5454").unwrap(),
            Command::Disconnect {
                address: "10.0.0.1:5454".to_string()
            }
        );
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(Command::parse("GET").is_err());
        assert!(Command::parse("GET a b").is_err());
        assert!(Command::parse("SET a").is_err());
        assert!(Command::parse("SETEX a soon v").is_err());
        assert!(Command::parse("FLY away").is_err());
    }

    #[test]
    fn request_carries_tag() {
        let request = Request::parse("7f:GET some:key").unwrap();
        assert_eq!(request.tag, "7f");
        assert_eq!(
            request.command,
            Command::Get {
                key: "some:key".to_string()
            }
        );
        assert_eq!(request.render(), "7f:GET some:key");
        assert!(Request::parse("GET a").is_err());
    }

    #[test]
    fn get_response_values() {
        assert_eq!(
            parse_get_response("7f:FULFILLED a:1", "a"),
            Some("1".to_string())
        );
        assert_eq!(
            parse_get_response("7f:FULFILLED a:b:c", "a"),
            Some("b:c".to_string())
        );
        assert_eq!(parse_get_response("7f:FULFILLED a:", "a"), None);
        assert_eq!(parse_get_response("7f:FAILED boom", "a"), None);
        assert_eq!(parse_get_response("", "a"), None);
    }

    #[test]
    fn get_response_with_colon_keys() {
        assert_eq!(
            parse_get_response("7f:FULFILLED user:42:alice", "user:42"),
            Some("alice".to_string())
        );
        assert_eq!(parse_get_response("7f:FULFILLED a:b:", "a:b"), None);
        // answer for some other key
        assert_eq!(parse_get_response("7f:FULFILLED ab:1", "a"), None);
    }

    #[test]
    fn keys_and_values_must_fit_one_line() {
        assert!(validate_key("user:42").is_ok());
        assert!(validate_key("a b").is_err());
        assert!(validate_key("a\nb").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_value("hello world").is_ok());
        assert!(validate_value("").is_ok());
        assert!(validate_value("a\nb").is_err());
        assert!(validate_value("a\r").is_err());
    }

    #[test]
    fn peer_list_addresses() {
        assert_eq!(
            parse_peer_list("7f:FULFILLED 10.0.0.1:5454, 10.0.0.2:5454,\n"),
            vec!["10.0.0.1:5454".to_string(), "10.0.0.2:5454".to_string()]
        );
        assert!(parse_peer_list("7f:FULFILLED").is_empty());
    }
}
