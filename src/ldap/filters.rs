use std::fmt;

use regex::Regex;

use crate::ber::Packet;
use crate::directory::Entry;
use crate::{Error, Result};

// Wire tag numbers of the Filter CHOICE.
const FILTER_AND: u8 = 0;
const FILTER_OR: u8 = 1;
const FILTER_NOT: u8 = 2;
const FILTER_EQ: u8 = 3;
const FILTER_SUBSTRING: u8 = 4;
const FILTER_GTE: u8 = 5;
const FILTER_LTE: u8 = 6;
const FILTER_PRESENT: u8 = 7;
const FILTER_APPROX: u8 = 8;
const FILTER_EXTENSIBLE: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubPartKind {
    Initial,
    Any,
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubPart {
    pub kind: SubPartKind,
    pub value: String,
}

/// A search filter tree. Equality and ordering are structural and
/// lexicographic over the variant's fields, with children compared in their
/// current order; both parsers sort the children of boolean combinators so
/// semantically equal filters produce identical trees.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal { attribute: String, value: String },
    Substring { attribute: String, parts: Vec<SubPart> },
    GreaterOrEqual { attribute: String, value: String },
    LessOrEqual { attribute: String, value: String },
    Present(String),
    Approx { attribute: String, value: String },
    Extensible,
}

impl Filter {
    /// Decodes a filter from its wire form. The wire protocol requires at
    /// least two children under And/Or and exactly one under Not.
    pub fn parse_ber(packet: &Packet) -> Result<Filter> {
        match packet.tag {
            FILTER_AND | FILTER_OR => {
                if packet.children().len() < 2 {
                    return Err(Error::Protocol(
                        "and/or filter requires at least two children".to_string(),
                    ));
                }
                let mut children = Vec::with_capacity(packet.children().len());
                for child in packet.children() {
                    children.push(Filter::parse_ber(child)?);
                }
                children.sort();
                Ok(if packet.tag == FILTER_AND {
                    Filter::And(children)
                } else {
                    Filter::Or(children)
                })
            }
            FILTER_NOT => {
                let [child] = packet.children() else {
                    return Err(Error::Protocol(
                        "not filter requires exactly one child".to_string(),
                    ));
                };
                Ok(Filter::Not(Box::new(Filter::parse_ber(child)?)))
            }
            FILTER_EQ | FILTER_GTE | FILTER_LTE | FILTER_APPROX => {
                let [attr, value] = packet.children() else {
                    return Err(Error::Protocol(
                        "attribute assertion requires a name and a value".to_string(),
                    ));
                };
                let attribute = attr.read_string()?;
                let value = value.read_string()?;
                Ok(match packet.tag {
                    FILTER_EQ => Filter::Equal { attribute, value },
                    FILTER_GTE => Filter::GreaterOrEqual { attribute, value },
                    FILTER_LTE => Filter::LessOrEqual { attribute, value },
                    _ => Filter::Approx { attribute, value },
                })
            }
            FILTER_SUBSTRING => {
                let [attr, subs] = packet.children() else {
                    return Err(Error::Protocol(
                        "substring filter requires a name and a part list".to_string(),
                    ));
                };
                let attribute = attr.read_string()?;
                let total = subs.children().len();
                let mut parts = Vec::with_capacity(total);
                for (index, sub) in subs.children().iter().enumerate() {
                    let kind = match sub.tag {
                        0 => SubPartKind::Initial,
                        1 => SubPartKind::Any,
                        2 => SubPartKind::Final,
                        other => {
                            return Err(Error::Protocol(format!(
                                "unknown substring part tag {other}"
                            )))
                        }
                    };
                    if kind == SubPartKind::Initial && index != 0 {
                        return Err(Error::Protocol(
                            "substring initial part must come first".to_string(),
                        ));
                    }
                    if kind == SubPartKind::Final && index != total - 1 {
                        return Err(Error::Protocol(
                            "substring final part must come last".to_string(),
                        ));
                    }
                    parts.push(SubPart {
                        kind,
                        value: sub.read_string()?,
                    });
                }
                Ok(Filter::Substring { attribute, parts })
            }
            FILTER_PRESENT => Ok(Filter::Present(packet.read_string()?)),
            FILTER_EXTENSIBLE => Ok(Filter::Extensible),
            other => Err(Error::Protocol(format!("unknown filter tag {other}"))),
        }
    }

    /// Evaluates the filter against an entry. Equality is byte-exact and
    /// case-sensitive; ordering comparisons use lexicographic byte order.
    pub fn matches(&self, entry: &Entry) -> Result<bool> {
        match self {
            Filter::And(children) => {
                for child in children {
                    if !child.matches(entry)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Or(children) => {
                for child in children {
                    if child.matches(entry)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Filter::Not(child) => Ok(!child.matches(entry)?),
            Filter::Equal { attribute, value } => Ok(entry
                .attr_values(attribute)
                .is_some_and(|values| values.iter().any(|v| v == value))),
            Filter::GreaterOrEqual { attribute, value } => Ok(entry
                .attr_values(attribute)
                .is_some_and(|values| values.iter().any(|v| v.as_str() >= value.as_str()))),
            Filter::LessOrEqual { attribute, value } => Ok(entry
                .attr_values(attribute)
                .is_some_and(|values| values.iter().any(|v| v.as_str() <= value.as_str()))),
            Filter::Substring { attribute, parts } => {
                let Some(values) = entry.attr_values(attribute) else {
                    return Ok(false);
                };
                let matcher = Regex::new(&substring_pattern(parts))
                    .map_err(|e| Error::Protocol(format!("invalid substring pattern: {e}")))?;
                Ok(values.iter().any(|v| matcher.is_match(v)))
            }
            Filter::Present(attribute) => Ok(entry.has_attr(attribute)),
            Filter::Approx { .. } | Filter::Extensible => {
                Err(Error::Other("filter type not supported".to_string()))
            }
        }
    }

    /// True if any node in the tree is an Approx or Extensible assertion,
    /// which no backend can translate.
    pub fn contains_unsupported(&self) -> bool {
        match self {
            Filter::And(children) | Filter::Or(children) => {
                children.iter().any(Filter::contains_unsupported)
            }
            Filter::Not(child) => child.contains_unsupported(),
            Filter::Approx { .. } | Filter::Extensible => true,
            _ => false,
        }
    }
}

/// The regex source for a substring assertion: `Initial` anchors at the
/// start, `Final` at the end, and every non-initial literal demands at least
/// one preceding character.
pub fn substring_pattern(parts: &[SubPart]) -> String {
    let mut pattern = String::new();
    for part in parts {
        match part.kind {
            SubPartKind::Initial => {
                pattern.push('^');
                pattern.push_str(&regex::escape(&part.value));
            }
            SubPartKind::Any => {
                pattern.push_str(".+");
                pattern.push_str(&regex::escape(&part.value));
            }
            SubPartKind::Final => {
                pattern.push_str(".+");
                pattern.push_str(&regex::escape(&part.value));
                pattern.push('$');
            }
        }
    }
    pattern
}

/// Parses a filter from its textual form.
pub fn parse_filter(input: &str) -> Result<Filter> {
    let trimmed = input.trim_start();
    let Some(body) = trimmed.strip_prefix('(') else {
        return Err(Error::Protocol(
            "search filter does not begin with (".to_string(),
        ));
    };
    let close = find_closing_paren(body)?;
    let body = &body[..close];

    if let Some(rest) = body.strip_prefix('&') {
        return Ok(Filter::And(parse_filter_list(rest)?));
    }
    if let Some(rest) = body.strip_prefix('|') {
        return Ok(Filter::Or(parse_filter_list(rest)?));
    }
    if let Some(rest) = body.strip_prefix('!') {
        let mut children = parse_filter_list(rest)?.into_iter();
        return match (children.next(), children.next()) {
            (Some(child), None) => Ok(Filter::Not(Box::new(child))),
            _ => Err(Error::Protocol(
                "not filter takes exactly one subexpression".to_string(),
            )),
        };
    }

    parse_item(body)
}

/// Finds the `)` matching an already-consumed `(`. A backslash escapes the
/// following character, so escaped parentheses do not affect the balance.
fn find_closing_paren(body: &str) -> Result<usize> {
    let mut balance = 1;
    let mut escape = false;
    for (index, ch) in body.char_indices() {
        if !escape {
            if ch == '(' {
                balance += 1;
            } else if ch == ')' {
                balance -= 1;
                if balance == 0 {
                    return Ok(index);
                }
            }
        }
        escape = ch == '\\' && !escape;
    }
    Err(Error::Protocol(
        "search filter's parentheses aren't balanced".to_string(),
    ))
}

fn parse_filter_list(input: &str) -> Result<Vec<Filter>> {
    let mut filters = Vec::new();
    let mut rest = input.trim_start();
    while !rest.is_empty() {
        if !rest.starts_with('(') {
            return Err(Error::Protocol(
                "expected ( in composite filter".to_string(),
            ));
        }
        filters.push(parse_filter(rest)?);
        let close = find_closing_paren(&rest[1..])?;
        rest = rest[1 + close + 1..].trim_start();
    }
    filters.sort();
    Ok(filters)
}

fn parse_item(body: &str) -> Result<Filter> {
    let eq = body.find('=').ok_or_else(|| {
        Error::Protocol("search filter is missing or has invalid attribute name".to_string())
    })?;
    if eq == 0 {
        return Err(Error::Protocol(
            "search filter is missing or has invalid attribute name".to_string(),
        ));
    }

    let attribute = &body[..eq];
    let value = &body[eq + 1..];

    if value == "*" {
        return Ok(Filter::Present(attribute.to_string()));
    }

    if !value.contains('*') {
        let qualifier = body.as_bytes()[eq - 1];
        if matches!(qualifier, b'~' | b'<' | b'>') {
            // The qualifier is the single ASCII byte ending the attribute.
            let stripped = &attribute[..attribute.len() - 1];
            if stripped.is_empty() {
                return Err(Error::Protocol(
                    "search filter is missing or has invalid attribute name".to_string(),
                ));
            }
            return Ok(match qualifier {
                b'~' => Filter::Approx {
                    attribute: stripped.to_string(),
                    value: value.to_string(),
                },
                b'<' => Filter::LessOrEqual {
                    attribute: stripped.to_string(),
                    value: value.to_string(),
                },
                _ => Filter::GreaterOrEqual {
                    attribute: stripped.to_string(),
                    value: value.to_string(),
                },
            });
        }
        return Ok(Filter::Equal {
            attribute: attribute.to_string(),
            value: value.to_string(),
        });
    }

    // Substring: split on stars keeping non-empty literals. The literal
    // before the first star (when the value doesn't begin with one) is the
    // initial part, the literal after the last star the final part.
    let literals: Vec<&str> = value.split('*').collect();
    let last = literals.len() - 1;
    let mut parts = Vec::new();
    for (index, literal) in literals.iter().enumerate() {
        if literal.is_empty() {
            continue;
        }
        let kind = if index == 0 {
            SubPartKind::Initial
        } else if index == last {
            SubPartKind::Final
        } else {
            SubPartKind::Any
        };
        parts.push(SubPart {
            kind,
            value: (*literal).to_string(),
        });
    }
    Ok(Filter::Substring {
        attribute: attribute.to_string(),
        parts,
    })
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(children) => {
                write!(f, "(&")?;
                for child in children {
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            Filter::Or(children) => {
                write!(f, "(|")?;
                for child in children {
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            Filter::Not(child) => write!(f, "(!{child})"),
            Filter::Equal { attribute, value } => write!(f, "({attribute}={value})"),
            Filter::GreaterOrEqual { attribute, value } => write!(f, "({attribute}>={value})"),
            Filter::LessOrEqual { attribute, value } => write!(f, "({attribute}<={value})"),
            Filter::Approx { attribute, value } => write!(f, "({attribute}~={value})"),
            Filter::Present(attribute) => write!(f, "({attribute}=*)"),
            Filter::Substring { attribute, parts } => {
                write!(f, "({attribute}=")?;
                if !matches!(
                    parts.first(),
                    Some(SubPart { kind: SubPartKind::Initial, .. })
                ) {
                    write!(f, "*")?;
                }
                for (index, part) in parts.iter().enumerate() {
                    if index > 0 {
                        write!(f, "*")?;
                    }
                    write!(f, "{}", part.value)?;
                }
                if !matches!(
                    parts.last(),
                    Some(SubPart { kind: SubPartKind::Final, .. })
                ) {
                    write!(f, "*")?;
                }
                write!(f, ")")
            }
            Filter::Extensible => write!(f, "(extensibleMatch)"),
        }
    }
}
