use crate::ber::{tag, Class, Packet};
use crate::directory::Entry;
use crate::ldap::filters::Filter;
use crate::{Error, Result};

/// LDAPv3 protocol operation tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
    BindRequest = 0,
    BindResponse = 1,
    UnbindRequest = 2,
    SearchRequest = 3,
    SearchResEntry = 4,
    SearchResDone = 5,
    ModifyRequest = 6,
    ModifyResponse = 7,
    AddRequest = 8,
    AddResponse = 9,
    DelRequest = 10,
    DelResponse = 11,
    ModDnRequest = 12,
    ModDnResponse = 13,
    CompareRequest = 14,
    CompareResponse = 15,
    AbandonRequest = 16,
    SearchResRef = 19,
    ExtendedRequest = 23,
    ExtendedResponse = 24,
    IntermediateResponse = 25,
}

/// The response tag used when an operation fails: SearchRequest errors end
/// the result stream with SearchResDone, every other operation answers with
/// the tag one above its request tag.
pub fn error_response_tag(request_tag: u8) -> u8 {
    if request_tag == MessageTag::SearchRequest as u8 {
        MessageTag::SearchResDone as u8
    } else {
        request_tag + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    Success = 0,
    OperationsError = 1,
    ProtocolError = 2,
    TimeLimitExceeded = 3,
    SizeLimitExceeded = 4,
    CompareFalse = 5,
    CompareTrue = 6,
    AuthMethodNotSupported = 7,
    StrongerAuthRequired = 8,
    Referral = 10,
    AdminLimitExceeded = 11,
    UnavailableCriticalExtension = 12,
    ConfidentialityRequired = 13,
    SaslBindInProgress = 14,
    NoSuchAttribute = 16,
    UndefinedAttributeType = 17,
    InappropriateMatching = 18,
    ConstraintViolation = 19,
    AttributeOrValueExists = 20,
    InvalidAttributeSyntax = 21,
    NoSuchObject = 32,
    AliasProblem = 33,
    InvalidDnSyntax = 34,
    AliasDereferencingProblem = 36,
    InappropriateAuthentication = 48,
    InvalidCredentials = 49,
    InsufficientAccessRights = 50,
    Busy = 51,
    Unavailable = 52,
    UnwillingToPerform = 53,
    LoopDetect = 54,
    NamingViolation = 64,
    ObjectClassViolation = 65,
    NotAllowedOnNonLeaf = 66,
    NotAllowedOnRdn = 67,
    EntryAlreadyExists = 68,
    ObjectClassModsProhibited = 69,
    AffectsMultipleDsas = 71,
    Other = 80,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Bind(BindRequest),
    Unbind,
    Search(SearchRequest),
    Add(AddRequest),
    Modify(ModifyRequest),
    Delete(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindRequest {
    pub version: i64,
    pub dn: String,
    pub credentials: BindCredentials,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindCredentials {
    Simple(String),
    Sasl {
        mechanism: String,
        credentials: Option<Vec<u8>>,
    },
}

const BIND_CREDENTIALS_SIMPLE: u8 = 0;
const BIND_CREDENTIALS_SASL: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base = 0,
    One = 1,
    Sub = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerefAliases {
    Never = 0,
    Searching = 1,
    Finding = 2,
    Always = 3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub deref_aliases: DerefAliases,
    pub size_limit: i64,
    pub time_limit: i64,
    pub types_only: bool,
    pub filter: Filter,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddRequest {
    pub entry: Entry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOp {
    Add = 0,
    Delete = 1,
    Replace = 2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Modification {
    pub op: ModifyOp,
    pub attribute: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModifyRequest {
    pub dn: String,
    pub modifications: Vec<Modification>,
}

/// Splits a request envelope into its message id and operation body. The
/// envelope must be a universal constructed sequence holding an INTEGER
/// message id followed by an application-tagged body.
pub fn split_envelope(envelope: &Packet) -> Result<(u64, &Packet)> {
    if envelope.class != Class::Universal
        || envelope.tag != tag::SEQUENCE
        || !envelope.is_constructed()
    {
        return Err(Error::Protocol(
            "request envelope is not a sequence".to_string(),
        ));
    }
    let children = envelope.children();
    if children.len() < 2 {
        return Err(Error::Protocol(
            "request envelope is missing its operation".to_string(),
        ));
    }
    expect_universal(&children[0], tag::INTEGER)?;
    let message_id = children[0].read_u64();
    let body = &children[1];
    if body.class != Class::Application {
        return Err(Error::Protocol(
            "request body is not application-tagged".to_string(),
        ));
    }
    Ok((message_id, body))
}

/// Parses an operation body into a typed request, validating the BER shape
/// at every position.
pub fn parse_request(body: &Packet) -> Result<Request> {
    match body.tag {
        t if t == MessageTag::BindRequest as u8 => Ok(Request::Bind(parse_bind(body)?)),
        t if t == MessageTag::UnbindRequest as u8 => Ok(Request::Unbind),
        t if t == MessageTag::SearchRequest as u8 => Ok(Request::Search(parse_search(body)?)),
        t if t == MessageTag::AddRequest as u8 => Ok(Request::Add(parse_add(body)?)),
        t if t == MessageTag::ModifyRequest as u8 => Ok(Request::Modify(parse_modify(body)?)),
        t if t == MessageTag::DelRequest as u8 => Ok(Request::Delete(body.read_string()?)),
        other => Err(Error::Protocol(format!(
            "unsupported operation tag {other}"
        ))),
    }
}

fn expect_universal(packet: &Packet, expected: u8) -> Result<()> {
    if packet.class == Class::Universal && packet.tag == expected {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "expected universal tag {expected}, found class {:?} tag {}",
            packet.class, packet.tag
        )))
    }
}

fn parse_bind(body: &Packet) -> Result<BindRequest> {
    let [version, dn, credentials] = body.children() else {
        return Err(Error::Protocol(
            "bind request must have version, name and credentials".to_string(),
        ));
    };
    expect_universal(version, tag::INTEGER)?;
    expect_universal(dn, tag::OCTET_STRING)?;

    if credentials.class != Class::Context {
        return Err(Error::Protocol(
            "bind credentials are not context-tagged".to_string(),
        ));
    }
    let credentials = match credentials.tag {
        BIND_CREDENTIALS_SIMPLE => BindCredentials::Simple(credentials.read_string()?),
        BIND_CREDENTIALS_SASL => {
            let children = credentials.children();
            if children.is_empty() || children.len() > 2 {
                return Err(Error::Protocol(
                    "sasl credentials must hold a mechanism and optional credentials".to_string(),
                ));
            }
            BindCredentials::Sasl {
                mechanism: children[0].read_string()?,
                credentials: children.get(1).map(|c| c.data().to_vec()),
            }
        }
        other => {
            return Err(Error::Protocol(format!(
                "unknown bind credentials tag {other}"
            )))
        }
    };

    Ok(BindRequest {
        version: version.read_i64(),
        dn: dn.read_string()?,
        credentials,
    })
}

fn parse_search(body: &Packet) -> Result<SearchRequest> {
    let [base, scope, deref, size_limit, time_limit, types_only, filter, attributes] =
        body.children()
    else {
        return Err(Error::Protocol(
            "search request must have exactly eight fields".to_string(),
        ));
    };

    expect_universal(base, tag::OCTET_STRING)?;

    expect_universal(scope, tag::ENUMERATED)?;
    let scope = match scope.read_u64() {
        0 => SearchScope::Base,
        1 => SearchScope::One,
        2 => SearchScope::Sub,
        other => return Err(Error::Protocol(format!("search scope {other} out of range"))),
    };

    expect_universal(deref, tag::ENUMERATED)?;
    let deref_aliases = match deref.read_u64() {
        0 => DerefAliases::Never,
        1 => DerefAliases::Searching,
        2 => DerefAliases::Finding,
        3 => DerefAliases::Always,
        other => {
            return Err(Error::Protocol(format!(
                "deref aliases {other} out of range"
            )))
        }
    };

    expect_universal(size_limit, tag::INTEGER)?;
    expect_universal(time_limit, tag::INTEGER)?;
    expect_universal(types_only, tag::BOOLEAN)?;

    expect_universal(attributes, tag::SEQUENCE)?;
    let mut attrs = Vec::with_capacity(attributes.children().len());
    for attr in attributes.children() {
        expect_universal(attr, tag::OCTET_STRING)?;
        attrs.push(attr.read_string()?);
    }

    Ok(SearchRequest {
        base: base.read_string()?,
        scope,
        deref_aliases,
        size_limit: size_limit.read_i64(),
        time_limit: time_limit.read_i64(),
        types_only: types_only.read_bool(),
        filter: Filter::parse_ber(filter)?,
        attributes: attrs,
    })
}

fn parse_add(body: &Packet) -> Result<AddRequest> {
    let [dn, attributes] = body.children() else {
        return Err(Error::Protocol(
            "add request must have a name and an attribute list".to_string(),
        ));
    };
    expect_universal(dn, tag::OCTET_STRING)?;
    let mut entry = Entry::new(dn.read_string()?);

    expect_universal(attributes, tag::SEQUENCE)?;
    for attribute in attributes.children() {
        expect_universal(attribute, tag::SEQUENCE)?;
        let [name, values] = attribute.children() else {
            return Err(Error::Protocol(
                "add attribute must have a name and a value set".to_string(),
            ));
        };
        expect_universal(name, tag::OCTET_STRING)?;
        expect_universal(values, tag::SET)?;
        let name = name.read_string()?;
        for value in values.children() {
            expect_universal(value, tag::OCTET_STRING)?;
            entry.append_value(name.clone(), value.read_string()?);
        }
    }
    Ok(AddRequest { entry })
}

fn parse_modify(body: &Packet) -> Result<ModifyRequest> {
    let [dn, changes] = body.children() else {
        return Err(Error::Protocol(
            "modify request must have a name and a change list".to_string(),
        ));
    };
    expect_universal(dn, tag::OCTET_STRING)?;
    expect_universal(changes, tag::SEQUENCE)?;

    let mut modifications = Vec::with_capacity(changes.children().len());
    for change in changes.children() {
        modifications.push(parse_modification(change)?);
    }
    Ok(ModifyRequest {
        dn: dn.read_string()?,
        modifications,
    })
}

fn parse_modification(change: &Packet) -> Result<Modification> {
    expect_universal(change, tag::SEQUENCE)?;
    let [op, partial] = change.children() else {
        return Err(Error::Protocol(
            "modification must have an operation and a partial attribute".to_string(),
        ));
    };
    expect_universal(op, tag::ENUMERATED)?;
    let op = match op.read_u64() {
        0 => ModifyOp::Add,
        1 => ModifyOp::Delete,
        2 => ModifyOp::Replace,
        other => {
            return Err(Error::Protocol(format!(
                "modification operation {other} out of range"
            )))
        }
    };

    expect_universal(partial, tag::SEQUENCE)?;
    let [name, values] = partial.children() else {
        return Err(Error::Protocol(
            "partial attribute must have a name and a value set".to_string(),
        ));
    };
    expect_universal(name, tag::OCTET_STRING)?;
    expect_universal(values, tag::SET)?;
    let mut parsed = Vec::with_capacity(values.children().len());
    for value in values.children() {
        expect_universal(value, tag::OCTET_STRING)?;
        parsed.push(value.read_string()?);
    }

    Ok(Modification {
        op,
        attribute: name.read_string()?,
        values: parsed,
    })
}

/// Builds the `{resultCode, matchedDN, diagnosticMessage}` body under the
/// given response tag.
pub fn build_ldap_result(
    code: ResultCode,
    matched_dn: &str,
    message: &str,
    response_tag: u8,
) -> Packet {
    Packet::constructed(
        Class::Application,
        response_tag,
        vec![
            Packet::enumerated(code as i64),
            Packet::octet_string(matched_dn),
            Packet::octet_string(message),
        ],
    )
}

/// Builds one SearchResEntry: the DN followed by a sequence of
/// `(name, SET of values)` attribute pairs.
pub fn build_search_entry(entry: &Entry) -> Packet {
    let mut attributes = Vec::with_capacity(entry.attributes.len());
    for (name, values) in &entry.attributes {
        attributes.push(Packet::sequence(vec![
            Packet::octet_string(name),
            Packet::set(values.iter().map(Packet::octet_string).collect()),
        ]));
    }
    Packet::constructed(
        Class::Application,
        MessageTag::SearchResEntry as u8,
        vec![
            Packet::octet_string(&entry.dn),
            Packet::sequence(attributes),
        ],
    )
}

/// Wraps a response body in the message envelope.
pub fn build_envelope(message_id: u64, response: Packet) -> Packet {
    Packet::sequence(vec![Packet::integer(message_id as i64), response])
}
