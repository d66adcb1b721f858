use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mongodb::bson::{doc, Bson, Document, Regex as BsonRegex};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOptions, ReplaceOptions};
use mongodb::{Client, Collection};
use tracing::info;

use crate::directory::{dn_storage_id, Entry};
use crate::ldap::filters::{substring_pattern, Filter};
use crate::ldap::protocol::{SearchRequest, SearchScope};
use crate::storage::{EntryStream, StorageBackend};
use crate::{Error, Result};

/// The document-store adaptor. Entries live in one collection keyed by
/// their normalized root-first DN identifier; entries carrying `olcAccess`
/// values are mirrored into a second collection that the access refresher
/// reads back.
pub struct MongoBackend {
    collection: Collection<Document>,
    ace_collection: Collection<Document>,
}

impl MongoBackend {
    pub async fn connect(
        uri: &str,
        database: &str,
        collection: &str,
        ace_collection: &str,
    ) -> Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| Error::Operations(format!("error connecting to {uri}: {e}")))?;
        let database = client.database(database);
        Ok(Self {
            collection: database.collection(collection),
            ace_collection: database.collection(ace_collection),
        })
    }
}

#[async_trait]
impl StorageBackend for MongoBackend {
    async fn find_entry(&self, dn: &str) -> Result<Option<Entry>> {
        let id = dn_storage_id(dn)?;
        let found = self
            .collection
            .find_one(doc! { "_id": id.as_str() }, None)
            .await
            .map_err(|e| Error::Operations(format!("error finding {dn}: {e}")))?;
        found.map(document_to_entry).transpose()
    }

    async fn find_entries(&self, request: &SearchRequest) -> Result<EntryStream> {
        let base_id = dn_storage_id(&request.base)?;
        let mut pattern = format!("^{}", regex::escape(&base_id));
        match request.scope {
            SearchScope::Base => pattern.push('$'),
            SearchScope::One => pattern.push_str(",[^,]+$"),
            SearchScope::Sub => pattern.push_str("(,.+)?$"),
        }

        let mut query = doc! {
            "_id": Bson::RegularExpression(BsonRegex { pattern, options: String::new() }),
        };
        filter_to_document(&request.filter, &mut query)?;

        let mut options = FindOptions::default();
        if request.size_limit > 0 {
            options.limit = Some(request.size_limit);
        }
        if request.time_limit > 0 {
            options.max_time = Some(Duration::from_secs(request.time_limit as u64));
        }
        if let Some(first) = request.attributes.first() {
            if first == "1.1" {
                options.projection = Some(doc! { "_id": 1 });
            } else if first != "*" {
                let mut projection = Document::new();
                for attribute in &request.attributes {
                    projection.insert(attribute.clone(), 1);
                }
                options.projection = Some(projection);
            }
        }

        info!("executing search for {}", query);

        let cursor = self
            .collection
            .find(query, options)
            .await
            .map_err(|e| Error::Operations(format!("error starting search: {e}")))?;
        let stream = cursor.map(|item| {
            item.map_err(|e| Error::Operations(format!("error fetching next document: {e}")))
                .and_then(document_to_entry)
        });
        Ok(Box::pin(stream))
    }

    async fn save_entry(&self, entry: &Entry, insert: bool) -> Result<()> {
        let id = dn_storage_id(&entry.dn)?;
        let document = entry_to_document(&id, entry);

        if insert {
            self.collection.insert_one(&document, None).await.map_err(|e| {
                if is_duplicate_key(&e) {
                    Error::AlreadyExists(entry.dn.clone())
                } else {
                    Error::Operations(format!(
                        "error inserting document for dn {}: {e}",
                        entry.dn
                    ))
                }
            })?;
        } else {
            let options = ReplaceOptions::builder().upsert(true).build();
            self.collection
                .replace_one(doc! { "_id": id.as_str() }, &document, options)
                .await
                .map_err(|e| {
                    Error::Operations(format!(
                        "error updating document for dn {}: {e}",
                        entry.dn
                    ))
                })?;
        }

        if let Some(rules) = entry.attr_values("olcAccess") {
            let ace_document = doc! { "_id": id.as_str(), "olcAccess": rules.clone() };
            let options = ReplaceOptions::builder().upsert(true).build();
            self.ace_collection
                .replace_one(doc! { "_id": id.as_str() }, ace_document, options)
                .await
                .map_err(|e| {
                    Error::Operations(format!(
                        "error updating ACE entry for dn {}: {e}",
                        entry.dn
                    ))
                })?;
        }
        Ok(())
    }

    async fn delete_entry(&self, dn: &str) -> Result<()> {
        let id = dn_storage_id(dn)?;
        let pattern = format!("^{}(,.+)?$", regex::escape(&id));
        let query = doc! {
            "_id": Bson::RegularExpression(BsonRegex { pattern, options: String::new() }),
        };
        self.collection
            .delete_many(query.clone(), None)
            .await
            .map_err(|e| Error::Operations(format!("error deleting sub-tree {dn}: {e}")))?;
        self.ace_collection
            .delete_many(query, None)
            .await
            .map_err(|e| Error::Operations(format!("error deleting sub-tree {dn}: {e}")))?;
        Ok(())
    }

    async fn access_rules(&self) -> Result<Vec<String>> {
        let mut cursor = self
            .ace_collection
            .aggregate(vec![doc! { "$unwind": "$olcAccess" }], None)
            .await
            .map_err(|e| Error::Operations(format!("error reading access rules: {e}")))?;

        let mut rules = Vec::new();
        while let Some(document) = cursor
            .try_next()
            .await
            .map_err(|e| Error::Operations(format!("error reading access rules: {e}")))?
        {
            if let Ok(rule) = document.get_str("olcAccess") {
                rules.push(rule.to_string());
            }
        }
        Ok(rules)
    }
}

fn document_to_entry(document: Document) -> Result<Entry> {
    let id = document
        .get_str("_id")
        .map_err(|_| Error::Operations("search result is missing its _id".to_string()))?;
    // The stored identifier is the root-first form; normalizing it again
    // reverses it back into the natural leaf-first DN.
    let mut entry = Entry::new(dn_storage_id(id)?);

    for (key, value) in document {
        if key == "_id" {
            continue;
        }
        match value {
            Bson::String(s) => entry.append_value(key, s),
            Bson::Array(values) => {
                for item in values {
                    if let Bson::String(s) = item {
                        entry.append_value(key.clone(), s);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(entry)
}

fn entry_to_document(id: &str, entry: &Entry) -> Document {
    let mut document = doc! { "_id": id };
    for (name, values) in &entry.attributes {
        if values.len() > 1 {
            document.insert(name.clone(), values.clone());
        } else if let Some(value) = values.first() {
            document.insert(name.clone(), value.clone());
        }
    }
    document
}

/// Translates a filter tree into query operators. Approx and extensible
/// assertions have no translation.
fn filter_to_document(filter: &Filter, out: &mut Document) -> Result<()> {
    match filter {
        Filter::And(children) | Filter::Or(children) => {
            let mut array = Vec::with_capacity(children.len());
            for child in children {
                let mut sub = Document::new();
                filter_to_document(child, &mut sub)?;
                array.push(Bson::Document(sub));
            }
            let operator = if matches!(filter, Filter::And(_)) { "$and" } else { "$or" };
            out.insert(operator, array);
        }
        Filter::Not(child) => {
            let mut sub = Document::new();
            filter_to_document(child, &mut sub)?;
            out.insert("$not", sub);
        }
        Filter::Equal { attribute, value } => {
            out.insert(attribute.clone(), value.clone());
        }
        Filter::Substring { attribute, parts } => {
            out.insert(
                attribute.clone(),
                Bson::RegularExpression(BsonRegex {
                    pattern: substring_pattern(parts),
                    options: String::new(),
                }),
            );
        }
        Filter::GreaterOrEqual { attribute, value } => {
            out.insert(attribute.clone(), doc! { "$gte": value.clone() });
        }
        Filter::LessOrEqual { attribute, value } => {
            out.insert(attribute.clone(), doc! { "$lte": value.clone() });
        }
        Filter::Present(attribute) => {
            out.insert(attribute.clone(), doc! { "$exists": true });
        }
        Filter::Approx { .. } | Filter::Extensible => {
            return Err(Error::UnavailableCriticalExtension(
                "approx and extensible filters are not supported".to_string(),
            ));
        }
    }
    Ok(())
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    matches!(
        &*error.kind,
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000
    )
}
