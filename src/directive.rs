//! Textual config surface.
//!
//! ```text
//! gitea_ip_limit {
//!     gitea_url https://git.example.com
//!     trust_authorization yes
//!     verify_cooldown 30s
//!     limit 100
//!     window 5m
//! }
//! ```
//!
//! One subdirective per line, one argument each. `#` starts a comment and
//! arguments containing spaces can be double-quoted.

use thiserror::Error;

use crate::config::{GateConfig, parse_bool, parse_duration};

pub const DIRECTIVE_NAME: &str = "gitea_ip_limit";

const SUBDIRECTIVES: [&str; 9] = [
    "gitea_url",
    "verify_path",
    "cookie_name",
    "trust_authorization",
    "verify_cooldown",
    "limit",
    "window",
    "trusted_for",
    "timeout",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("line {line}: expected `gitea_ip_limit`, found {found:?}")]
    UnexpectedToken { line: usize, found: String },
    #[error("line {line}: unknown subdirective: {name}")]
    UnknownSubdirective { line: usize, name: String },
    #[error("line {line}: {name} needs an argument")]
    MissingArgument { line: usize, name: String },
    #[error("line {line}: {name} takes a single argument, got extra {extra:?}")]
    ExtraArgument {
        line: usize,
        name: String,
        extra: String,
    },
    #[error("line {line}: invalid {name}: {reason}")]
    InvalidValue {
        line: usize,
        name: String,
        reason: String,
    },
    #[error("line {line}: unterminated quoted string")]
    UnterminatedQuote { line: usize },
    #[error("block opened on line {line} is never closed")]
    UnclosedBlock { line: usize },
}

#[derive(Debug, Clone)]
struct Token {
    text: String,
    line: usize,
    quoted: bool,
}

impl Token {
    fn is(&self, punct: &str) -> bool {
        !self.quoted && self.text == punct
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, DirectiveError> {
    let mut tokens = Vec::new();

    for (idx, raw_line) in input.lines().enumerate() {
        let line = idx + 1;
        let mut chars = raw_line.chars().peekable();

        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
            } else if c == '#' {
                break;
            } else if c == '"' {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                text.push(escaped);
                            }
                        }
                        _ => text.push(c),
                    }
                }
                if !closed {
                    return Err(DirectiveError::UnterminatedQuote { line });
                }
                tokens.push(Token {
                    text,
                    line,
                    quoted: true,
                });
            } else {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    text.push(c);
                    chars.next();
                }
                tokens.push(Token {
                    text,
                    line,
                    quoted: false,
                });
            }
        }
    }

    Ok(tokens)
}

/// Parse a `gitea_ip_limit` block into an (unvalidated) [`GateConfig`].
///
/// Settings that are not mentioned keep their defaults.
pub fn parse(input: &str) -> Result<GateConfig, DirectiveError> {
    let tokens = tokenize(input)?;
    let mut config = GateConfig::default();
    let mut iter = tokens.into_iter().peekable();

    let Some(head) = iter.next() else {
        return Ok(config);
    };
    if !head.is(DIRECTIVE_NAME) {
        return Err(DirectiveError::UnexpectedToken {
            line: head.line,
            found: head.text,
        });
    }

    // bare `gitea_ip_limit` with no block keeps every default
    if let Some(open) = iter.next_if(|t| t.is("{") && t.line == head.line) {
        loop {
            let Some(name) = iter.next() else {
                return Err(DirectiveError::UnclosedBlock { line: open.line });
            };
            if name.is("}") {
                break;
            }

            let mut args = Vec::new();
            while let Some(arg) = iter.next_if(|t| t.line == name.line && !t.is("}")) {
                args.push(arg);
            }
            apply(&mut config, &name, args)?;
        }
    }

    if let Some(extra) = iter.next() {
        return Err(DirectiveError::UnexpectedToken {
            line: extra.line,
            found: extra.text,
        });
    }

    Ok(config)
}

fn apply(config: &mut GateConfig, name: &Token, args: Vec<Token>) -> Result<(), DirectiveError> {
    let line = name.line;
    let key = name.text.as_str();
    if !SUBDIRECTIVES.contains(&key) {
        return Err(DirectiveError::UnknownSubdirective {
            line,
            name: key.to_string(),
        });
    }

    let mut args = args.into_iter();
    let value = args
        .next()
        .ok_or_else(|| DirectiveError::MissingArgument {
            line,
            name: key.to_string(),
        })?
        .text;
    if let Some(extra) = args.next() {
        return Err(DirectiveError::ExtraArgument {
            line,
            name: key.to_string(),
            extra: extra.text,
        });
    }

    let invalid = |reason: String| DirectiveError::InvalidValue {
        line,
        name: key.to_string(),
        reason,
    };
    let duration = |text: &str| parse_duration(text).map_err(invalid);

    match key {
        "gitea_url" => config.gitea_url = value,
        "verify_path" => config.verify_path = value,
        "cookie_name" => config.cookie_name = value,
        "trust_authorization" => {
            let flag = parse_bool(&value)
                .ok_or_else(|| invalid(format!("{:?} is not a boolean", value)))?;
            config.trust_authorization = Some(flag);
        }
        "verify_cooldown" => config.verify_cooldown = Some(duration(&value)?),
        "limit" => {
            config.limit = value
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;
        }
        "window" => config.window = duration(&value)?,
        "trusted_for" => config.trusted_for = duration(&value)?,
        "timeout" => config.timeout = duration(&value)?,
        _ => {
            return Err(DirectiveError::UnknownSubdirective {
                line,
                name: key.to_string(),
            });
        }
    }
    Ok(())
}
