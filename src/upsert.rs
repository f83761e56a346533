use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::KiraError;
use crate::normalize::EntityAttributes;
use crate::resolver::ResolutionDisposition;
use crate::store::{EntityHandle, EntityStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CreationStatus {
    Reused,
    Created,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub entity: Option<EntityHandle>,
    pub status: CreationStatus,
    pub description_written: bool,
    pub aliases_written: bool,
}

impl UpsertOutcome {
    fn skipped() -> Self {
        Self {
            entity: None,
            status: CreationStatus::Skipped,
            description_written: false,
            aliases_written: false,
        }
    }
}

pub struct EntityUpserter<'a, S: EntityStore + ?Sized> {
    store: &'a S,
    language: &'a str,
}

impl<'a, S: EntityStore + ?Sized> EntityUpserter<'a, S> {
    pub fn new(store: &'a S, language: &'a str) -> Self {
        Self { store, language }
    }

    pub fn upsert(
        &self,
        disposition: &ResolutionDisposition,
        attrs: &EntityAttributes,
    ) -> Result<UpsertOutcome, KiraError> {
        match disposition {
            ResolutionDisposition::Ambiguous(candidates) => {
                warn!(
                    label = %attrs.label,
                    candidates = ?candidates,
                    "more than one entity carries this label, skipping"
                );
                Ok(UpsertOutcome::skipped())
            }
            ResolutionDisposition::Unique(id) => {
                let handle = self.store.resolve_handle(id)?;
                info!(label = %attrs.label, entity = %handle, "reusing existing entity");
                self.bind(handle, attrs)
            }
            ResolutionDisposition::NotFound => {
                let handle = self.store.create_entity()?;
                self.store.set_label(&handle, self.language, &attrs.label)?;
                info!(label = %attrs.label, entity = %handle, "created entity");
                let mut outcome = self.finish(handle, attrs)?;
                outcome.status = CreationStatus::Created;
                Ok(outcome)
            }
        }
    }

    pub fn bind(
        &self,
        handle: EntityHandle,
        attrs: &EntityAttributes,
    ) -> Result<UpsertOutcome, KiraError> {
        self.finish(handle, attrs)
    }

    fn finish(
        &self,
        handle: EntityHandle,
        attrs: &EntityAttributes,
    ) -> Result<UpsertOutcome, KiraError> {
        let description_written = self.apply_description(&handle, &attrs.description)?;
        let aliases_written = self.apply_aliases(&handle, &attrs.aliases)?;
        Ok(UpsertOutcome {
            entity: Some(handle),
            status: CreationStatus::Reused,
            description_written,
            aliases_written,
        })
    }

    fn apply_description(
        &self,
        handle: &EntityHandle,
        description: &str,
    ) -> Result<bool, KiraError> {
        let descriptions = self.store.get_descriptions(handle)?;
        if descriptions.get(self.language).map(String::as_str) == Some(description) {
            debug!(entity = %handle, "description already set");
            return Ok(false);
        }
        self.store.set_description(
            handle,
            self.language,
            description,
            "Setting new description",
        )?;
        Ok(true)
    }

    /// Only the first alias is checked; when it is missing the language's
    /// alias list is replaced by `aliases`.
    fn apply_aliases(&self, handle: &EntityHandle, aliases: &[String]) -> Result<bool, KiraError> {
        let Some(first) = aliases.first() else {
            return Ok(false);
        };
        let existing = self.store.get_aliases(handle)?;
        let present = existing
            .get(self.language)
            .is_some_and(|values| values.contains(first));
        if present {
            debug!(entity = %handle, alias = %first, "alias already set");
            return Ok(false);
        }
        self.store
            .set_aliases(handle, self.language, aliases, "Setting new alias")?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityId;
    use crate::store::{MemoryStore, StoredEntity};

    fn attrs() -> EntityAttributes {
        EntityAttributes {
            label: "Escherichia coli K-12".to_string(),
            description: "bacterial strain".to_string(),
            aliases: vec!["K-12".to_string()],
        }
    }

    #[test]
    fn not_found_creates_and_labels() {
        let store = MemoryStore::new();
        let upserter = EntityUpserter::new(&store, "en");
        let outcome = upserter
            .upsert(&ResolutionDisposition::NotFound, &attrs())
            .unwrap();

        assert_eq!(outcome.status, CreationStatus::Created);
        let id = outcome.entity.as_ref().and_then(|h| h.id()).unwrap().clone();
        let entity = store.entity(&id).unwrap();
        assert_eq!(entity.labels["en"], "Escherichia coli K-12");
        assert_eq!(entity.descriptions["en"], "bacterial strain");
        assert_eq!(entity.aliases["en"], vec!["K-12".to_string()]);
    }

    #[test]
    fn unique_reuses_without_label_write() {
        let store = MemoryStore::new();
        let id: EntityId = "Q77".parse().unwrap();
        let mut seeded = StoredEntity::labelled("en", "Escherichia coli K-12");
        seeded
            .descriptions
            .insert("en".to_string(), "bacterial strain".to_string());
        seeded
            .aliases
            .insert("en".to_string(), vec!["EcK12".to_string(), "K-12".to_string()]);
        store.insert(id.clone(), seeded);

        let upserter = EntityUpserter::new(&store, "en");
        let outcome = upserter
            .upsert(&ResolutionDisposition::Unique(id.clone()), &attrs())
            .unwrap();

        assert_eq!(outcome.status, CreationStatus::Reused);
        assert!(!outcome.description_written);
        assert!(!outcome.aliases_written);
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.entity_count(), 1);
    }

    #[test]
    fn missing_alias_replaces_language_list() {
        let store = MemoryStore::new();
        let id: EntityId = "Q78".parse().unwrap();
        let mut seeded = StoredEntity::labelled("en", "Escherichia coli K-12");
        seeded
            .aliases
            .insert("en".to_string(), vec!["EcK12".to_string()]);
        store.insert(id.clone(), seeded);

        let upserter = EntityUpserter::new(&store, "en");
        let outcome = upserter
            .upsert(&ResolutionDisposition::Unique(id.clone()), &attrs())
            .unwrap();

        assert!(outcome.aliases_written);
        assert_eq!(store.entity(&id).unwrap().aliases["en"], vec!["K-12".to_string()]);
    }

    #[test]
    fn ambiguous_touches_nothing() {
        let store = MemoryStore::new();
        let upserter = EntityUpserter::new(&store, "en");
        let candidates = vec!["Q1".parse().unwrap(), "Q2".parse().unwrap()];
        let outcome = upserter
            .upsert(&ResolutionDisposition::Ambiguous(candidates), &attrs())
            .unwrap();

        assert_eq!(outcome.status, CreationStatus::Skipped);
        assert!(outcome.entity.is_none());
        assert_eq!(store.write_count(), 0);
    }
}
