//! Reader for rendered packages layer Dockerfiles.
//!
//! Only the parts layer matching depends on are interpreted: the base image
//! named by `FROM` and the labels set by `LABEL`. `ADD` is kept for
//! inspection; any other instruction is carried through as-is.

use std::collections::BTreeMap;

use layerpack_core::error::{LayerError, Result};

/// One logical line of a Dockerfile.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    From { image: String },
    Add { sources: Vec<String>, dest: String },
    Label { pairs: Vec<(String, String)> },
    Other { keyword: String, args: String },
}

/// A parsed Dockerfile.
#[derive(Debug, Clone)]
pub struct Dockerfile {
    pub instructions: Vec<Instruction>,
}

impl Dockerfile {
    /// Parse Dockerfile text. The first instruction must be `FROM`.
    pub fn parse(content: &str) -> Result<Self> {
        let mut instructions = Vec::new();

        for (number, line) in logical_lines(content) {
            let (keyword, args) = match line.split_once(char::is_whitespace) {
                Some((keyword, args)) => (keyword, args.trim()),
                None => (line.as_str(), ""),
            };
            if !keyword.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(line_error(number, format!("not an instruction: '{}'", keyword)));
            }

            let instruction = match keyword.to_ascii_uppercase().as_str() {
                "FROM" => match args.split_whitespace().next() {
                    Some(image) => Instruction::From {
                        image: image.to_string(),
                    },
                    None => return Err(line_error(number, "FROM needs an image")),
                },
                "ADD" => {
                    let mut words = split_words(args).map_err(|e| line_error(number, e))?;
                    let dest = match words.pop() {
                        Some(dest) if !words.is_empty() => dest,
                        _ => return Err(line_error(number, "ADD needs a source and a destination")),
                    };
                    Instruction::Add {
                        sources: words,
                        dest,
                    }
                }
                "LABEL" => Instruction::Label {
                    pairs: parse_label_pairs(args).map_err(|e| line_error(number, e))?,
                },
                upper => Instruction::Other {
                    keyword: upper.to_string(),
                    args: args.to_string(),
                },
            };
            instructions.push(instruction);
        }

        match instructions.first() {
            Some(Instruction::From { .. }) => Ok(Self { instructions }),
            Some(_) => Err(LayerError::Template(
                "Dockerfile must start with FROM".to_string(),
            )),
            None => Err(LayerError::Template(
                "Dockerfile has no instructions".to_string(),
            )),
        }
    }

    /// Image named by the first `FROM`.
    pub fn base_image(&self) -> Option<&str> {
        self.instructions.iter().find_map(|i| match i {
            Instruction::From { image } => Some(image.as_str()),
            _ => None,
        })
    }

    /// Labels set anywhere in the file; a later value replaces an earlier one.
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Label { pairs } => Some(pairs),
                _ => None,
            })
            .flatten()
            .cloned()
            .collect()
    }
}

fn line_error(number: usize, message: impl std::fmt::Display) -> LayerError {
    LayerError::Template(format!("Dockerfile line {}: {}", number, message))
}

/// Non-empty, non-comment lines with `\` continuations joined, paired with
/// the physical line number they start on.
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if pending.is_none() && (trimmed.is_empty() || trimmed.starts_with('#')) {
            continue;
        }

        let (start, mut text) = pending.take().unwrap_or((idx + 1, String::new()));
        match trimmed.strip_suffix('\\') {
            Some(head) => {
                text.push_str(head);
                text.push(' ');
                pending = Some((start, text));
            }
            None => {
                text.push_str(trimmed);
                lines.push((start, text.trim().to_string()));
            }
        }
    }

    if let Some((start, text)) = pending {
        lines.push((start, text.trim().to_string()));
    }
    lines
}

/// `key=value` pairs; values may be double-quoted.
fn parse_label_pairs(args: &str) -> std::result::Result<Vec<(String, String)>, String> {
    let words = split_words(args)?;
    if words.is_empty() {
        return Err("LABEL needs at least one key=value".to_string());
    }
    words
        .into_iter()
        .map(|word| match word.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(format!("expected key=value, got '{}'", word)),
        })
        .collect()
}

/// Whitespace-separated words. Double quotes group a run (and are
/// dropped); inside quotes `\` escapes the next character.
fn split_words(args: &str) -> std::result::Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut word: Option<String> = None;
    let mut quoted = false;
    let mut chars = args.chars();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' => quoted = false,
                '\\' => {
                    let escaped = chars.next().ok_or("dangling escape")?;
                    word.get_or_insert_with(String::new).push(escaped);
                }
                _ => word.get_or_insert_with(String::new).push(c),
            }
        } else if c == '"' {
            quoted = true;
            word.get_or_insert_with(String::new);
        } else if c.is_whitespace() {
            words.extend(word.take());
        } else {
            word.get_or_insert_with(String::new).push(c);
        }
    }

    if quoted {
        return Err("unterminated quote".to_string());
    }
    words.extend(word);
    Ok(words)
}
