use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::access::policy::{self, AccessPolicy, AccessQuery};
use crate::access::rules::{AccessRule, Level};
use crate::crypto::passwords;
use crate::directory::Entry;
use crate::ldap::protocol::{
    self, AddRequest, BindCredentials, BindRequest, MessageTag, Modification, ModifyOp,
    ModifyRequest, Request, ResultCode, SearchRequest,
};
use crate::server::codec::LdapCodec;
use crate::server::session::Session;
use crate::storage::StorageBackend;
use crate::{Error, Result};

type LdapFramed = Framed<TcpStream, LdapCodec>;

/// The per-connection loop: read one envelope, dispatch, answer. The loop
/// ends on unbind, end-of-stream, a malformed envelope, or after sending an
/// error result.
pub async fn handle_connection(
    socket: TcpStream,
    storage: Arc<dyn StorageBackend>,
    policy: Arc<AccessPolicy>,
    no_authentication: bool,
) -> Result<()> {
    let peer_addr = socket.peer_addr()?;
    info!("handling connection from {}", peer_addr);

    let mut framed = Framed::new(socket, LdapCodec);
    let mut session = Session::new();

    while let Some(frame) = framed.next().await {
        let envelope = match frame {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("error reading from {}: {}", peer_addr, e);
                break;
            }
        };

        let (message_id, body) = match protocol::split_envelope(&envelope) {
            Ok(parts) => parts,
            Err(e) => {
                error!("malformed request envelope from {}: {}", peer_addr, e);
                break;
            }
        };
        let request_tag = body.tag;

        if request_tag == MessageTag::UnbindRequest as u8 {
            debug!("client unbind, closing connection");
            break;
        }

        // The ruleset snapshot taken here serves the whole request; a
        // concurrent refresh never changes a dispatch in flight.
        let rules = policy.snapshot();

        match dispatch(
            body,
            message_id,
            &mut session,
            storage.as_ref(),
            &rules,
            no_authentication,
            &mut framed,
        )
        .await
        {
            Ok(()) => {}
            Err(e) => {
                warn!(
                    "operation tag {} from {} failed: {}",
                    request_tag, peer_addr, e
                );
                let response = protocol::build_ldap_result(
                    e.result_code(),
                    "",
                    &e.to_string(),
                    protocol::error_response_tag(request_tag),
                );
                if let Err(send_err) = framed
                    .send(protocol::build_envelope(message_id, response))
                    .await
                {
                    error!("failed to send error response: {}", send_err);
                }
                break;
            }
        }
    }

    info!("connection closed for {}", peer_addr);
    Ok(())
}

async fn dispatch(
    body: &crate::ber::Packet,
    message_id: u64,
    session: &mut Session,
    storage: &dyn StorageBackend,
    rules: &[AccessRule],
    no_authentication: bool,
    framed: &mut LdapFramed,
) -> Result<()> {
    match protocol::parse_request(body)? {
        Request::Bind(request) => {
            let response =
                handle_bind(request, session, storage, rules, no_authentication).await?;
            framed
                .send(protocol::build_envelope(message_id, response))
                .await
        }
        Request::Search(request) => {
            handle_search(request, message_id, session, storage, rules, framed).await
        }
        Request::Add(request) => {
            let response = handle_add(request, session, storage, rules).await?;
            framed
                .send(protocol::build_envelope(message_id, response))
                .await
        }
        Request::Modify(request) => {
            let response = handle_modify(request, session, storage, rules).await?;
            framed
                .send(protocol::build_envelope(message_id, response))
                .await
        }
        Request::Delete(dn) => {
            let response = handle_delete(&dn, session, storage, rules).await?;
            framed
                .send(protocol::build_envelope(message_id, response))
                .await
        }
        Request::Unbind => Ok(()),
    }
}

async fn handle_bind(
    request: BindRequest,
    session: &mut Session,
    storage: &dyn StorageBackend,
    rules: &[AccessRule],
    no_authentication: bool,
) -> Result<crate::ber::Packet> {
    let BindRequest { dn, credentials, .. } = request;

    let password = match credentials {
        BindCredentials::Simple(password) => password,
        BindCredentials::Sasl { mechanism, .. } => {
            debug!("rejecting sasl bind with mechanism {}", mechanism);
            session.reset();
            return Err(Error::AuthMethodNotSupported);
        }
    };

    if no_authentication {
        session.bind(dn.clone());
        return Ok(protocol::build_ldap_result(
            ResultCode::Success,
            &dn,
            "",
            MessageTag::BindResponse as u8,
        ));
    }

    // A missing entry answers InvalidCredentials, never NoSuchObject, so a
    // bind cannot probe which DNs exist.
    let Some(entry) = storage.find_entry(&dn).await? else {
        session.reset();
        return Err(Error::InvalidCredentials);
    };

    let attrs = ["userPassword".to_string()];
    let query = AccessQuery {
        entry: &entry,
        attrs: &attrs,
        filter: None,
        bound_dn: session.bound_dn(),
        level: Level::Auth,
    };
    if !policy::check(rules, &query, storage).await {
        session.reset();
        return Err(Error::InvalidCredentials);
    }

    let authenticated = entry.attr_values("userPassword").is_some_and(|values| {
        values.iter().any(|stored| match passwords::check(&password, stored) {
            Ok(matched) => matched,
            Err(e) => {
                warn!("unusable userPassword value for {}: {}", dn, e);
                false
            }
        })
    });

    if authenticated {
        session.bind(dn.clone());
        info!("successful bind for {}", dn);
        Ok(protocol::build_ldap_result(
            ResultCode::Success,
            &dn,
            "",
            MessageTag::BindResponse as u8,
        ))
    } else {
        session.reset();
        Err(Error::InvalidCredentials)
    }
}

async fn handle_search(
    request: SearchRequest,
    message_id: u64,
    session: &Session,
    storage: &dyn StorageBackend,
    rules: &[AccessRule],
    framed: &mut LdapFramed,
) -> Result<()> {
    let mut entries = storage.find_entries(&request).await?;

    while let Some(entry) = entries.next().await {
        let entry = entry?;
        let query = AccessQuery {
            entry: &entry,
            attrs: &request.attributes,
            filter: Some(&request.filter),
            bound_dn: session.bound_dn(),
            level: Level::Search,
        };
        if !policy::check(rules, &query, storage).await {
            debug!("access denied for {}, skipping", entry.dn);
            continue;
        }
        let projected = project_entry(&entry, &request.attributes);
        framed
            .send(protocol::build_envelope(
                message_id,
                protocol::build_search_entry(&projected),
            ))
            .await?;
    }

    framed
        .send(protocol::build_envelope(
            message_id,
            protocol::build_ldap_result(
                ResultCode::Success,
                "",
                "",
                MessageTag::SearchResDone as u8,
            ),
        ))
        .await
}

/// Applies the requested attribute projection: an empty list or `*` keeps
/// everything, `1.1` keeps nothing but the DN.
fn project_entry(entry: &Entry, attributes: &[String]) -> Entry {
    match attributes.first().map(String::as_str) {
        None | Some("*") => entry.clone(),
        Some("1.1") => Entry::new(entry.dn.clone()),
        Some(_) => {
            let mut projected = Entry::new(entry.dn.clone());
            for (name, values) in &entry.attributes {
                if attributes.iter().any(|a| a.eq_ignore_ascii_case(name)) {
                    projected.attributes.insert(name.clone(), values.clone());
                }
            }
            projected
        }
    }
}

async fn handle_add(
    request: AddRequest,
    session: &Session,
    storage: &dyn StorageBackend,
    rules: &[AccessRule],
) -> Result<crate::ber::Packet> {
    let attrs: Vec<String> = request.entry.attributes.keys().cloned().collect();
    require_write_access(&request.entry, &attrs, session, storage, rules).await?;

    storage.save_entry(&request.entry, true).await?;
    Ok(protocol::build_ldap_result(
        ResultCode::Success,
        "",
        "",
        MessageTag::AddResponse as u8,
    ))
}

async fn handle_modify(
    request: ModifyRequest,
    session: &Session,
    storage: &dyn StorageBackend,
    rules: &[AccessRule],
) -> Result<crate::ber::Packet> {
    let mut entry = storage
        .find_entry(&request.dn)
        .await?
        .ok_or_else(|| Error::NoSuchObject(request.dn.clone()))?;

    let attrs: Vec<String> = request
        .modifications
        .iter()
        .map(|m| m.attribute.clone())
        .collect();
    require_write_access(&entry, &attrs, session, storage, rules).await?;

    for modification in &request.modifications {
        apply_modification(&mut entry, modification)?;
    }
    storage.save_entry(&entry, false).await?;

    Ok(protocol::build_ldap_result(
        ResultCode::Success,
        "",
        "",
        MessageTag::ModifyResponse as u8,
    ))
}

async fn handle_delete(
    dn: &str,
    session: &Session,
    storage: &dyn StorageBackend,
    rules: &[AccessRule],
) -> Result<crate::ber::Packet> {
    let entry = storage
        .find_entry(dn)
        .await?
        .ok_or_else(|| Error::NoSuchObject(dn.to_string()))?;

    let attrs: Vec<String> = entry.attributes.keys().cloned().collect();
    require_write_access(&entry, &attrs, session, storage, rules).await?;

    storage.delete_entry(dn).await?;
    Ok(protocol::build_ldap_result(
        ResultCode::Success,
        "",
        "",
        MessageTag::DelResponse as u8,
    ))
}

async fn require_write_access(
    entry: &Entry,
    attrs: &[String],
    session: &Session,
    storage: &dyn StorageBackend,
    rules: &[AccessRule],
) -> Result<()> {
    let query = AccessQuery {
        entry,
        attrs,
        filter: None,
        bound_dn: session.bound_dn(),
        level: Level::Write,
    };
    if policy::check(rules, &query, storage).await {
        Ok(())
    } else {
        Err(Error::InsufficientAccess)
    }
}

/// Applies one modification in place. `Add` appends values; `Delete` with an
/// empty value list removes the whole attribute, otherwise each listed value
/// must be present and is removed; `Replace` overwrites, an empty list
/// removing the attribute.
fn apply_modification(entry: &mut Entry, modification: &Modification) -> Result<()> {
    let Modification { op, attribute, values } = modification;
    match op {
        ModifyOp::Add => {
            for value in values {
                entry.append_value(attribute.clone(), value.clone());
            }
        }
        ModifyOp::Delete => {
            if values.is_empty() {
                if entry.remove_attr(attribute).is_none() {
                    return Err(Error::NoSuchAttribute(attribute.clone()));
                }
            } else {
                let Some(stored) = entry.attr_values_mut(attribute) else {
                    return Err(Error::NoSuchAttribute(attribute.clone()));
                };
                for value in values {
                    let Some(position) = stored.iter().position(|v| v == value) else {
                        return Err(Error::NoSuchAttribute(format!("{attribute}: {value}")));
                    };
                    stored.remove(position);
                }
                if entry
                    .attr_values(attribute)
                    .is_some_and(|remaining| remaining.is_empty())
                {
                    entry.remove_attr(attribute);
                }
            }
        }
        ModifyOp::Replace => {
            entry.set_attr(attribute.clone(), values.clone());
        }
    }
    Ok(())
}
