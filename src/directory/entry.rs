use std::collections::BTreeMap;

use crate::{Error, Result};

/// One directory entry: a distinguished name plus its attributes. Attribute
/// names compare ASCII case-insensitively but keep their stored spelling;
/// value order and duplicates are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub dn: String,
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Self {
        Entry {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn append_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        // Reuse the stored spelling when the attribute already exists under
        // a different case.
        let key = self
            .attributes
            .keys()
            .find(|key| key.eq_ignore_ascii_case(&name))
            .cloned()
            .unwrap_or(name);
        self.attributes.entry(key).or_default().push(value.into());
    }

    pub fn attr_values(&self, name: &str) -> Option<&Vec<String>> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values)
    }

    pub fn attr_values_mut(&mut self, name: &str) -> Option<&mut Vec<String>> {
        self.attributes
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr_values(name).is_some()
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<Vec<String>> {
        let key = self
            .attributes
            .keys()
            .find(|key| key.eq_ignore_ascii_case(name))?
            .clone();
        self.attributes.remove(&key)
    }

    /// Replaces the attribute's values outright; an empty list removes it.
    pub fn set_attr(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        self.remove_attr(&name);
        if !values.is_empty() {
            self.attributes.insert(name, values);
        }
    }
}

/// Splits a DN into normalized `attr=value` RDNs, leaf first. Attribute names
/// are lowercased and both sides trimmed; a backslash escapes the following
/// character so values may contain commas. An RDN without `=` or without a
/// value fails with `InvalidDnSyntax`, as does an empty DN.
pub fn dn_to_rdns(dn: &str) -> Result<Vec<String>> {
    let mut rdns = Vec::new();
    for part in split_unescaped_commas(dn) {
        let eq = part
            .find('=')
            .ok_or_else(|| Error::InvalidDnSyntax(dn.to_string()))?;
        let name = part[..eq].trim().to_ascii_lowercase();
        let value = part[eq + 1..].trim();
        if value.is_empty() {
            return Err(Error::InvalidDnSyntax(dn.to_string()));
        }
        rdns.push(format!("{name}={value}"));
    }
    if rdns.is_empty() {
        return Err(Error::InvalidDnSyntax(dn.to_string()));
    }
    Ok(rdns)
}

/// The storage identifier for a DN: its normalized RDNs joined root-first.
/// Applying this to a stored identifier yields the natural leaf-first DN
/// again, so the same function maps in both directions.
pub fn dn_storage_id(dn: &str) -> Result<String> {
    let rdns = dn_to_rdns(dn)?;
    Ok(rdns.into_iter().rev().collect::<Vec<_>>().join(","))
}

fn split_unescaped_commas(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escape = false;
    for ch in input.chars() {
        if escape {
            current.push(ch);
            escape = false;
        } else if ch == '\\' {
            escape = true;
        } else if ch == ',' {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
