use std::collections::HashSet;
use std::iter::Peekable;

use regex::Regex;

use crate::ldap::filters::{self, Filter};
use crate::{Error, Result};

/// Access levels, totally ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    None,
    Disclose,
    Auth,
    Compare,
    Search,
    Read,
    SelfWrite,
    Write,
    Manage,
}

impl Level {
    fn parse(token: &str) -> Result<Level> {
        Ok(match token {
            "none" => Level::None,
            "disclose" => Level::Disclose,
            "auth" => Level::Auth,
            "compare" => Level::Compare,
            "search" => Level::Search,
            "read" => Level::Read,
            "selfwrite" => Level::SelfWrite,
            "write" => Level::Write,
            "manage" => Level::Manage,
            other => {
                return Err(Error::Operations(format!("unknown access level \"{other}\"")))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Stop,
    Continue,
    Break,
}

impl Control {
    fn parse(token: &str) -> Result<Control> {
        Ok(match token {
            "stop" => Control::Stop,
            "continue" => Control::Continue,
            "break" => Control::Break,
            other => {
                return Err(Error::Operations(format!("unknown ACE control \"{other}\"")))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnScope {
    Base,
    One,
    Subtree,
    Children,
    Regex,
}

/// Whom an ACE applies to.
#[derive(Debug, Clone)]
pub enum Who {
    All,
    Anonymous,
    Users,
    Self_,
    Dn { scope: DnScope, pattern: Regex },
    DnAttr(String),
    Group { dn: String, member_attr: String },
}

/// One `by <who> <level> [control]` clause.
#[derive(Debug, Clone)]
pub struct Ace {
    pub who: Who,
    pub level: Level,
    pub control: Control,
}

/// Which directory entries a rule applies to.
#[derive(Debug, Clone)]
pub enum What {
    All,
    Dn { scope: DnScope, pattern: Regex },
    Filter(Filter),
    Attrs(HashSet<String>),
}

/// One parsed access directive: `to <what> [by <who> <level> [control]]*`.
#[derive(Debug, Clone)]
pub struct AccessRule {
    pub what: What,
    pub aces: Vec<Ace>,
}

impl AccessRule {
    pub fn parse(input: &str) -> Result<AccessRule> {
        let mut tokens = input.split_whitespace().peekable();

        match tokens.next() {
            Some("to") => {}
            _ => {
                return Err(Error::Operations(format!(
                    "access directive doesn't start with \"to\": {input}"
                )))
            }
        }

        let what_token = tokens.next().ok_or_else(|| {
            Error::Operations("access directive is missing a <what> clause".to_string())
        })?;
        let what = parse_what(what_token)?;

        let mut aces = Vec::new();
        while let Some(token) = tokens.next() {
            if token != "by" {
                return Err(Error::Operations(format!(
                    "expected \"by\", found \"{token}\""
                )));
            }
            aces.push(Ace::parse(&mut tokens)?);
        }

        Ok(AccessRule { what, aces })
    }
}

fn parse_what(token: &str) -> Result<What> {
    if token == "*" {
        return Ok(What::All);
    }
    let (selector, value) = split_selector(token)?;
    if selector == "filter" {
        let filter =
            filters::parse_filter(value).map_err(|e| Error::Operations(e.to_string()))?;
        return Ok(What::Filter(filter));
    }
    if selector == "attrs" {
        let attrs: HashSet<String> = value
            .split(',')
            .map(|a| a.trim().to_ascii_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        if attrs.is_empty() {
            return Err(Error::Operations(format!("empty attrs list in \"{token}\"")));
        }
        return Ok(What::Attrs(attrs));
    }
    if selector == "dn" || selector.starts_with("dn.") {
        let (scope, pattern) = dn_scope_pattern(selector, value)?;
        return Ok(What::Dn { scope, pattern });
    }
    Err(Error::Operations(format!(
        "unknown <what> selector \"{selector}\""
    )))
}

impl Ace {
    fn parse<'a, I>(tokens: &mut Peekable<I>) -> Result<Ace>
    where
        I: Iterator<Item = &'a str>,
    {
        let who_token = tokens.next().ok_or_else(|| {
            Error::Operations(
                "ACE must consist of a <who> <access> [control] triplet".to_string(),
            )
        })?;
        let who = parse_who(who_token)?;

        let level_token = tokens.next().ok_or_else(|| {
            Error::Operations(
                "ACE must consist of a <who> <access> [control] triplet".to_string(),
            )
        })?;
        let level = Level::parse(level_token)?;

        let control = match tokens.peek() {
            Some(&"by") | None => Control::Break,
            Some(_) => {
                let token = tokens.next().ok_or_else(|| {
                    Error::Operations("end of tokens while parsing ACE".to_string())
                })?;
                Control::parse(token)?
            }
        };

        Ok(Ace { who, level, control })
    }
}

fn parse_who(token: &str) -> Result<Who> {
    match token {
        "*" => return Ok(Who::All),
        "anonymous" => return Ok(Who::Anonymous),
        "users" => return Ok(Who::Users),
        "self" => return Ok(Who::Self_),
        _ => {}
    }
    let (selector, value) = split_selector(token)?;
    if selector == "dnattr" {
        return Ok(Who::DnAttr(value.to_ascii_lowercase()));
    }
    if selector == "group" || selector.starts_with("group/") {
        let member_attr = match selector.strip_prefix("group/") {
            Some(attr) if !attr.is_empty() => attr,
            Some(_) => {
                return Err(Error::Operations(format!(
                    "empty member attribute in \"{token}\""
                )))
            }
            None => "member",
        };
        return Ok(Who::Group {
            dn: value.to_string(),
            member_attr: member_attr.to_string(),
        });
    }
    if selector == "dn" || selector.starts_with("dn.") {
        let (scope, pattern) = dn_scope_pattern(selector, value)?;
        return Ok(Who::Dn { scope, pattern });
    }
    Err(Error::Operations(format!(
        "unknown <who> selector \"{token}\""
    )))
}

fn split_selector(token: &str) -> Result<(&str, &str)> {
    let eq = token.find('=').ok_or_else(|| {
        Error::Operations(format!("expected selector=value, found \"{token}\""))
    })?;
    let (selector, value) = (&token[..eq], &token[eq + 1..]);
    if value.is_empty() {
        return Err(Error::Operations(format!("empty value in \"{token}\"")));
    }
    Ok((selector, value))
}

/// Translates a DN scope selector to an anchored regex over normalized
/// root-first DN identifiers. Matching is always whole-string.
fn dn_scope_pattern(selector: &str, pattern: &str) -> Result<(DnScope, Regex)> {
    let (scope, translated) = match selector {
        "dn.exact" | "dn.base" => (DnScope::Base, format!("^{pattern}$")),
        "dn.regex" | "dn" => (DnScope::Regex, pattern.to_string()),
        "dn.one" => (DnScope::One, format!("^{pattern},?[^,]+")),
        "dn.subtree" => (DnScope::Subtree, format!("^{pattern},?.+")),
        "dn.children" => (DnScope::Children, format!("^{pattern},.+")),
        other => {
            return Err(Error::Operations(format!("unknown dn scope \"{other}\"")))
        }
    };
    let anchored = format!("^(?:{translated})$");
    let regex = Regex::new(&anchored)
        .map_err(|e| Error::Operations(format!("invalid dn pattern \"{pattern}\": {e}")))?;
    Ok((scope, regex))
}
