use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{error, info, warn};

use crate::access::rules::{AccessRule, Control, Level, What, Who};
use crate::directory::{dn_storage_id, Entry};
use crate::ldap::filters::Filter;
use crate::storage::StorageBackend;

/// The active access ruleset: a single immutable snapshot behind an atomic
/// pointer. Readers clone a reference and keep it for the whole request; the
/// refresher builds a replacement off to the side and publishes it in one
/// swap, so no reader is ever blocked.
#[derive(Default)]
pub struct AccessPolicy {
    rules: ArcSwap<Vec<AccessRule>>,
}

impl AccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<Vec<AccessRule>> {
        self.rules.load_full()
    }

    pub fn install(&self, rules: Vec<AccessRule>) {
        self.rules.store(Arc::new(rules));
    }

    /// Rebuilds the ruleset from the backend. Rules that fail to parse are
    /// logged and dropped; a backend failure keeps the previous snapshot.
    pub async fn refresh_from(&self, backend: &dyn StorageBackend) {
        let raw = match backend.access_rules().await {
            Ok(raw) => raw,
            Err(e) => {
                error!("error updating access ruleset: {}", e);
                return;
            }
        };

        let mut rules = Vec::with_capacity(raw.len());
        for text in raw {
            match AccessRule::parse(&text) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!("skipping unparsable access rule {:?}: {}", text, e),
            }
        }

        info!("refreshed access ruleset, {} entries", rules.len());
        self.install(rules);
    }
}

/// Fetches the ruleset at startup and again every `period_secs` seconds.
/// A non-positive period runs exactly once.
pub async fn refresh_task(
    policy: Arc<AccessPolicy>,
    backend: Arc<dyn StorageBackend>,
    period_secs: i64,
) {
    loop {
        policy.refresh_from(backend.as_ref()).await;
        if period_secs > 0 {
            tokio::time::sleep(Duration::from_secs(period_secs as u64)).await;
        } else {
            break;
        }
    }
}

/// One access question: may `bound_dn` act on `entry` at `level`? The
/// requested attributes and the request's filter feed rule selection.
pub struct AccessQuery<'a> {
    pub entry: &'a Entry,
    pub attrs: &'a [String],
    pub filter: Option<&'a Filter>,
    pub bound_dn: Option<&'a str>,
    pub level: Level,
}

/// Walks the ruleset and decides Allow (true) or Deny (false).
///
/// A rule is selected when its `what` matches the target entry; within a
/// selected rule the ACEs run in source order. A matching ACE whose level
/// covers the required one allows; otherwise its control decides: `stop`
/// denies outright, `break` moves to the next rule, `continue` to the next
/// ACE. No allow anywhere means deny.
pub async fn check(
    rules: &[AccessRule],
    query: &AccessQuery<'_>,
    backend: &dyn StorageBackend,
) -> bool {
    let entry_id =
        dn_storage_id(&query.entry.dn).unwrap_or_else(|_| query.entry.dn.clone());
    let requester_id = query
        .bound_dn
        .filter(|dn| !dn.is_empty())
        .map(|dn| dn_storage_id(dn).unwrap_or_else(|_| dn.to_string()));

    for rule in rules {
        if !rule_selects(rule, query, &entry_id) {
            continue;
        }
        for ace in &rule.aces {
            if !who_matches(&ace.who, query, &entry_id, requester_id.as_deref(), backend).await
            {
                continue;
            }
            if ace.level >= query.level {
                return true;
            }
            match ace.control {
                Control::Stop => return false,
                Control::Break => break,
                Control::Continue => continue,
            }
        }
    }
    false
}

fn rule_selects(rule: &AccessRule, query: &AccessQuery<'_>, entry_id: &str) -> bool {
    match &rule.what {
        What::All => true,
        What::Dn { pattern, .. } => pattern.is_match(entry_id),
        What::Filter(filter) => {
            query.filter == Some(filter) || filter.matches(query.entry).unwrap_or(false)
        }
        What::Attrs(attrs) => query
            .attrs
            .iter()
            .any(|a| attrs.contains(&a.to_ascii_lowercase())),
    }
}

async fn who_matches(
    who: &Who,
    query: &AccessQuery<'_>,
    entry_id: &str,
    requester_id: Option<&str>,
    backend: &dyn StorageBackend,
) -> bool {
    match who {
        Who::All => true,
        Who::Anonymous => requester_id.is_none(),
        Who::Users => requester_id.is_some(),
        Who::Self_ => requester_id == Some(entry_id),
        Who::Dn { pattern, .. } => requester_id.is_some_and(|id| pattern.is_match(id)),
        Who::DnAttr(attr) => {
            let Some(id) = requester_id else {
                return false;
            };
            query
                .entry
                .attr_values(attr)
                .is_some_and(|values| values.iter().any(|v| dn_matches_id(v, id)))
        }
        Who::Group { dn, member_attr } => {
            let Some(id) = requester_id else {
                return false;
            };
            match backend.find_entry(dn).await {
                Ok(Some(group)) => group
                    .attr_values(member_attr)
                    .is_some_and(|values| values.iter().any(|v| dn_matches_id(v, id))),
                Ok(None) => false,
                Err(e) => {
                    warn!("group lookup for {} failed: {}", dn, e);
                    false
                }
            }
        }
    }
}

fn dn_matches_id(value: &str, id: &str) -> bool {
    match dn_storage_id(value) {
        Ok(normalized) => normalized == id,
        Err(_) => value == id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::filters::parse_filter;
    use crate::storage::memory::MemoryBackend;
    use crate::storage::StorageBackend;

    fn ruleset(texts: &[&str]) -> Vec<AccessRule> {
        texts
            .iter()
            .map(|t| AccessRule::parse(t).unwrap())
            .collect()
    }

    fn person(dn: &str) -> Entry {
        let mut entry = Entry::new(dn);
        entry.append_value("objectClass", "person");
        entry
    }

    async fn decide(
        rules: &[AccessRule],
        entry: &Entry,
        bound_dn: Option<&str>,
        level: Level,
    ) -> bool {
        let backend = MemoryBackend::new();
        let query = AccessQuery {
            entry,
            attrs: &[],
            filter: None,
            bound_dn,
            level,
        };
        check(rules, &query, &backend).await
    }

    #[tokio::test]
    async fn test_anonymous_auth_then_all_read() {
        // Anonymous matches the auth ACE first; Auth < Read and the default
        // Break control abandons the rest of the rule, so anonymous reads
        // are denied. A bound user skips that ACE and reaches All/Read.
        let rules = ruleset(&["to * by anonymous auth by * read"]);
        let entry = person("dc=example,dc=com");

        assert!(!decide(&rules, &entry, Some(""), Level::Read).await);
        assert!(decide(&rules, &entry, Some("cn=u"), Level::Read).await);
        assert!(decide(&rules, &entry, Some(""), Level::Auth).await);
    }

    #[tokio::test]
    async fn test_deny_when_no_rule_allows() {
        let rules = ruleset(&["to * by * read"]);
        let entry = person("dc=example,dc=com");
        assert!(!decide(&rules, &entry, Some("cn=u"), Level::Write).await);
        assert!(decide(&rules, &entry, Some("cn=u"), Level::Read).await);
    }

    #[tokio::test]
    async fn test_monotonic_in_level() {
        let rules = ruleset(&[
            "to * by self write by users search by * disclose",
            "to dn.subtree=dc=com,dc=example by users read",
        ]);
        let entry = person("cn=someone,dc=example,dc=com");

        let levels = [
            Level::None,
            Level::Disclose,
            Level::Auth,
            Level::Compare,
            Level::Search,
            Level::Read,
            Level::SelfWrite,
            Level::Write,
            Level::Manage,
        ];
        for requester in [None, Some("cn=other,dc=example,dc=com"), Some("cn=someone,dc=example,dc=com")] {
            let mut previous_allowed = true;
            for level in levels {
                let allowed = decide(&rules, &entry, requester, level).await;
                // Once denied at some level, every stronger level is denied.
                assert!(
                    previous_allowed || !allowed,
                    "monotonicity violated for {requester:?} at {level:?}"
                );
                previous_allowed = allowed;
            }
        }
    }

    #[tokio::test]
    async fn test_stop_control_denies_immediately() {
        let rules = ruleset(&[
            "to * by users none stop by * read",
            "to * by * read",
        ]);
        let entry = person("dc=example,dc=com");

        // A bound user hits the stop ACE and is denied despite later rules.
        assert!(!decide(&rules, &entry, Some("cn=u"), Level::Read).await);
        // Anonymous skips the users ACE, falls through to All/Read.
        assert!(decide(&rules, &entry, None, Level::Read).await);
    }

    #[tokio::test]
    async fn test_continue_control_tries_next_ace() {
        let rules = ruleset(&["to * by users disclose continue by users read"]);
        let entry = person("dc=example,dc=com");
        assert!(decide(&rules, &entry, Some("cn=u"), Level::Read).await);
    }

    #[tokio::test]
    async fn test_break_moves_to_next_rule() {
        let rules = ruleset(&[
            "to * by users disclose by users manage",
            "to * by users read",
        ]);
        let entry = person("dc=example,dc=com");
        // The first matching ACE breaks out of rule one; rule two allows.
        assert!(decide(&rules, &entry, Some("cn=u"), Level::Read).await);
        assert!(!decide(&rules, &entry, Some("cn=u"), Level::Write).await);
    }

    #[tokio::test]
    async fn test_self_who() {
        let rules = ruleset(&["to * by self write"]);
        let entry = person("cn=me,dc=example,dc=com");
        assert!(decide(&rules, &entry, Some("cn=me,dc=example,dc=com"), Level::Write).await);
        // DN comparison is over normalized identifiers.
        assert!(decide(&rules, &entry, Some("CN=me, dc=example, dc=com"), Level::Write).await);
        assert!(!decide(&rules, &entry, Some("cn=other,dc=example,dc=com"), Level::Write).await);
    }

    #[tokio::test]
    async fn test_dn_who_scopes() {
        let rules = ruleset(&["to * by dn.children=dc=com,dc=example write"]);
        let entry = person("dc=example,dc=com");
        assert!(decide(&rules, &entry, Some("cn=in,dc=example,dc=com"), Level::Write).await);
        assert!(!decide(&rules, &entry, Some("dc=example,dc=com"), Level::Write).await);
        assert!(!decide(&rules, &entry, Some("cn=out,dc=other"), Level::Write).await);
    }

    #[tokio::test]
    async fn test_dnattr_who() {
        let rules = ruleset(&["to * by dnattr=manager write"]);
        let mut entry = person("cn=doc,dc=example,dc=com");
        entry.append_value("manager", "cn=boss,dc=example,dc=com");

        assert!(decide(&rules, &entry, Some("cn=boss,dc=example,dc=com"), Level::Write).await);
        assert!(!decide(&rules, &entry, Some("cn=peon,dc=example,dc=com"), Level::Write).await);
    }

    #[tokio::test]
    async fn test_group_who_resolves_through_backend() {
        let backend = MemoryBackend::new();
        let mut group = Entry::new("cn=admins,dc=example,dc=com");
        group.append_value("objectClass", "groupOfNames");
        group.append_value("member", "cn=root,dc=example,dc=com");
        backend.save_entry(&group, true).await.unwrap();

        let rules = ruleset(&["to * by group=cn=admins,dc=example,dc=com manage"]);
        let entry = person("dc=example,dc=com");

        async fn allowed(
            rules: &[AccessRule],
            entry: &Entry,
            backend: &MemoryBackend,
            dn: &str,
        ) -> bool {
            let query = AccessQuery {
                entry,
                attrs: &[],
                filter: None,
                bound_dn: Some(dn),
                level: Level::Write,
            };
            check(rules, &query, backend).await
        }
        assert!(allowed(&rules, &entry, &backend, "cn=root,dc=example,dc=com").await);
        assert!(!allowed(&rules, &entry, &backend, "cn=guest,dc=example,dc=com").await);
    }

    #[tokio::test]
    async fn test_filter_what_selects_by_identity_and_by_evaluation() {
        let rules = ruleset(&["to filter=(objectClass=secret) by users read"]);

        // Identity: the request carries a structurally equal filter even
        // though the entry itself doesn't match it.
        let entry = person("cn=plain,dc=example,dc=com");
        let request_filter = parse_filter("(objectClass=secret)").unwrap();
        let backend = MemoryBackend::new();
        let query = AccessQuery {
            entry: &entry,
            attrs: &[],
            filter: Some(&request_filter),
            bound_dn: Some("cn=u"),
            level: Level::Read,
        };
        assert!(check(&rules, &query, &backend).await);

        // Evaluation: the entry matches the rule filter directly.
        let mut secret = Entry::new("cn=hidden,dc=example,dc=com");
        secret.append_value("objectClass", "secret");
        assert!(decide(&rules, &secret, Some("cn=u"), Level::Read).await);

        // Neither: rule is not selected, deny.
        assert!(!decide(&rules, &entry, Some("cn=u"), Level::Read).await);
    }

    #[tokio::test]
    async fn test_attrs_what_selects_on_intersection() {
        let rules = ruleset(&["to attrs=userPassword by self write"]);
        let entry = person("cn=me,dc=example,dc=com");
        let backend = MemoryBackend::new();

        let attrs = ["userPassword".to_string()];
        let query = AccessQuery {
            entry: &entry,
            attrs: &attrs,
            filter: None,
            bound_dn: Some("cn=me,dc=example,dc=com"),
            level: Level::Write,
        };
        assert!(check(&rules, &query, &backend).await);

        let other_attrs = ["mail".to_string()];
        let query = AccessQuery {
            entry: &entry,
            attrs: &other_attrs,
            filter: None,
            bound_dn: Some("cn=me,dc=example,dc=com"),
            level: Level::Write,
        };
        assert!(!check(&rules, &query, &backend).await);
    }

    #[tokio::test]
    async fn test_refresh_skips_bad_rules_and_publishes_atomically() {
        let backend = MemoryBackend::new();
        let mut acl = Entry::new("cn=acl,dc=example,dc=com");
        acl.append_value("olcAccess", "to * by * read");
        acl.append_value("olcAccess", "not a rule at all");
        acl.append_value("olcAccess", "to * by self write");
        backend.save_entry(&acl, true).await.unwrap();

        let policy = AccessPolicy::new();
        assert!(policy.snapshot().is_empty());
        policy.refresh_from(&backend).await;
        assert_eq!(policy.snapshot().len(), 2);
    }
}
