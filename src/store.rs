use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::info;

use crate::domain::{Claim, ClaimValue, EntityId, Property};
use crate::error::KiraError;
use crate::query::{LabelQuery, QueryError};

/// A bound entity. `Pending` stands for an entity a dry run would create.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityHandle {
    Existing(EntityId),
    Pending(u64),
}

impl EntityHandle {
    pub fn id(&self) -> Option<&EntityId> {
        match self {
            EntityHandle::Existing(id) => Some(id),
            EntityHandle::Pending(_) => None,
        }
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityHandle::Existing(id) => write!(f, "{id}"),
            EntityHandle::Pending(n) => write!(f, "new#{n}"),
        }
    }
}

impl From<&EntityHandle> for ClaimValue {
    fn from(handle: &EntityHandle) -> Self {
        match handle {
            EntityHandle::Existing(id) => ClaimValue::Item(id.clone()),
            EntityHandle::Pending(n) => ClaimValue::PendingItem(*n),
        }
    }
}

impl Serialize for EntityHandle {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub trait EntityStore: Send + Sync {
    fn create_entity(&self) -> Result<EntityHandle, KiraError>;
    fn resolve_handle(&self, id: &EntityId) -> Result<EntityHandle, KiraError>;
    fn set_label(&self, handle: &EntityHandle, language: &str, value: &str)
    -> Result<(), KiraError>;
    fn get_descriptions(&self, handle: &EntityHandle) -> Result<BTreeMap<String, String>, KiraError>;
    fn set_description(
        &self,
        handle: &EntityHandle,
        language: &str,
        value: &str,
        summary: &str,
    ) -> Result<(), KiraError>;
    fn get_aliases(&self, handle: &EntityHandle)
    -> Result<BTreeMap<String, Vec<String>>, KiraError>;
    fn set_aliases(
        &self,
        handle: &EntityHandle,
        language: &str,
        aliases: &[String],
        summary: &str,
    ) -> Result<(), KiraError>;
    fn get_claims(&self, handle: &EntityHandle, property: Property)
    -> Result<Vec<Claim>, KiraError>;
    fn add_claim(&self, handle: &EntityHandle, claim: &Claim, summary: &str)
    -> Result<(), KiraError>;
}

impl<T: EntityStore + ?Sized> EntityStore for &T {
    fn create_entity(&self) -> Result<EntityHandle, KiraError> {
        (**self).create_entity()
    }

    fn resolve_handle(&self, id: &EntityId) -> Result<EntityHandle, KiraError> {
        (**self).resolve_handle(id)
    }

    fn set_label(
        &self,
        handle: &EntityHandle,
        language: &str,
        value: &str,
    ) -> Result<(), KiraError> {
        (**self).set_label(handle, language, value)
    }

    fn get_descriptions(&self, handle: &EntityHandle) -> Result<BTreeMap<String, String>, KiraError> {
        (**self).get_descriptions(handle)
    }

    fn set_description(
        &self,
        handle: &EntityHandle,
        language: &str,
        value: &str,
        summary: &str,
    ) -> Result<(), KiraError> {
        (**self).set_description(handle, language, value, summary)
    }

    fn get_aliases(
        &self,
        handle: &EntityHandle,
    ) -> Result<BTreeMap<String, Vec<String>>, KiraError> {
        (**self).get_aliases(handle)
    }

    fn set_aliases(
        &self,
        handle: &EntityHandle,
        language: &str,
        aliases: &[String],
        summary: &str,
    ) -> Result<(), KiraError> {
        (**self).set_aliases(handle, language, aliases, summary)
    }

    fn get_claims(
        &self,
        handle: &EntityHandle,
        property: Property,
    ) -> Result<Vec<Claim>, KiraError> {
        (**self).get_claims(handle, property)
    }

    fn add_claim(&self, handle: &EntityHandle, claim: &Claim, summary: &str) -> Result<(), KiraError> {
        (**self).add_claim(handle, claim, summary)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoredEntity {
    pub labels: BTreeMap<String, String>,
    pub descriptions: BTreeMap<String, String>,
    pub aliases: BTreeMap<String, Vec<String>>,
    pub claims: Vec<Claim>,
}

impl StoredEntity {
    pub fn labelled(language: &str, label: &str) -> Self {
        let mut entity = Self::default();
        entity
            .labels
            .insert(language.to_string(), label.to_string());
        entity
    }

    pub fn with_claim(mut self, claim: Claim) -> Self {
        self.claims.push(claim);
        self
    }

    pub fn claims_for(&self, property: Property) -> impl Iterator<Item = &Claim> {
        self.claims
            .iter()
            .filter(move |claim| claim.property == property)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    entities: BTreeMap<EntityId, StoredEntity>,
    writes: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: EntityId, entity: StoredEntity) {
        self.lock().entities.insert(id, entity);
    }

    pub fn entity(&self, id: &EntityId) -> Option<StoredEntity> {
        self.lock().entities.get(id).cloned()
    }

    pub fn entity_count(&self) -> usize {
        self.lock().entities.len()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub fn snapshot(&self) -> BTreeMap<EntityId, StoredEntity> {
        self.lock().entities.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_entity<T>(
        &self,
        handle: &EntityHandle,
        apply: impl FnOnce(&mut StoredEntity) -> T,
    ) -> Result<T, KiraError> {
        let id = existing(handle)?;
        let mut state = self.lock();
        let entity = state
            .entities
            .get_mut(id)
            .ok_or_else(|| KiraError::EntityNotFound(id.to_string()))?;
        Ok(apply(entity))
    }

    fn with_entity_mut<T>(
        &self,
        handle: &EntityHandle,
        apply: impl FnOnce(&mut StoredEntity) -> T,
    ) -> Result<T, KiraError> {
        let value = self.with_entity(handle, apply)?;
        self.lock().writes += 1;
        Ok(value)
    }
}

fn existing(handle: &EntityHandle) -> Result<&EntityId, KiraError> {
    handle
        .id()
        .ok_or_else(|| KiraError::StoreWrite(format!("{handle} is not a stored entity")))
}

impl EntityStore for MemoryStore {
    fn create_entity(&self) -> Result<EntityHandle, KiraError> {
        let mut state = self.lock();
        let id = loop {
            state.next_id += 1;
            let candidate = EntityId::builtin_numeric(state.next_id);
            if !state.entities.contains_key(&candidate) {
                break candidate;
            }
        };
        state.entities.insert(id.clone(), StoredEntity::default());
        state.writes += 1;
        Ok(EntityHandle::Existing(id))
    }

    fn resolve_handle(&self, id: &EntityId) -> Result<EntityHandle, KiraError> {
        if self.lock().entities.contains_key(id) {
            Ok(EntityHandle::Existing(id.clone()))
        } else {
            Err(KiraError::EntityNotFound(id.to_string()))
        }
    }

    fn set_label(
        &self,
        handle: &EntityHandle,
        language: &str,
        value: &str,
    ) -> Result<(), KiraError> {
        self.with_entity_mut(handle, |entity| {
            entity
                .labels
                .insert(language.to_string(), value.to_string());
        })
    }

    fn get_descriptions(&self, handle: &EntityHandle) -> Result<BTreeMap<String, String>, KiraError> {
        self.with_entity(handle, |entity| entity.descriptions.clone())
    }

    fn set_description(
        &self,
        handle: &EntityHandle,
        language: &str,
        value: &str,
        _summary: &str,
    ) -> Result<(), KiraError> {
        self.with_entity_mut(handle, |entity| {
            entity
                .descriptions
                .insert(language.to_string(), value.to_string());
        })
    }

    fn get_aliases(
        &self,
        handle: &EntityHandle,
    ) -> Result<BTreeMap<String, Vec<String>>, KiraError> {
        self.with_entity(handle, |entity| entity.aliases.clone())
    }

    fn set_aliases(
        &self,
        handle: &EntityHandle,
        language: &str,
        aliases: &[String],
        _summary: &str,
    ) -> Result<(), KiraError> {
        self.with_entity_mut(handle, |entity| {
            entity
                .aliases
                .insert(language.to_string(), aliases.to_vec());
        })
    }

    fn get_claims(
        &self,
        handle: &EntityHandle,
        property: Property,
    ) -> Result<Vec<Claim>, KiraError> {
        self.with_entity(handle, |entity| {
            entity.claims_for(property).cloned().collect()
        })
    }

    fn add_claim(
        &self,
        handle: &EntityHandle,
        claim: &Claim,
        _summary: &str,
    ) -> Result<(), KiraError> {
        if let ClaimValue::PendingItem(_) = claim.value {
            return Err(KiraError::StoreWrite(format!(
                "{} targets an entity that was never created",
                claim.property
            )));
        }
        self.with_entity_mut(handle, |entity| entity.claims.push(claim.clone()))
    }
}

impl LabelQuery for MemoryStore {
    fn find_by_label(&self, label: &str, language: &str) -> Result<Vec<EntityId>, QueryError> {
        Ok(self
            .lock()
            .entities
            .iter()
            .filter(|(_, entity)| entity.labels.get(language).map(String::as_str) == Some(label))
            .map(|(id, _)| id.clone())
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum PlannedMutation {
    CreateEntity {
        entity: EntityHandle,
    },
    SetLabel {
        entity: EntityHandle,
        language: String,
        value: String,
    },
    SetDescription {
        entity: EntityHandle,
        language: String,
        value: String,
        summary: String,
    },
    SetAliases {
        entity: EntityHandle,
        language: String,
        aliases: Vec<String>,
        summary: String,
    },
    AddClaim {
        entity: EntityHandle,
        claim: Claim,
        summary: String,
    },
}

impl fmt::Display for PlannedMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannedMutation::CreateEntity { entity } => write!(f, "create {entity}"),
            PlannedMutation::SetLabel {
                entity,
                language,
                value,
            } => write!(f, "{entity}: label@{language} = {value:?}"),
            PlannedMutation::SetDescription {
                entity,
                language,
                value,
                ..
            } => write!(f, "{entity}: description@{language} = {value:?}"),
            PlannedMutation::SetAliases {
                entity,
                language,
                aliases,
                ..
            } => write!(f, "{entity}: aliases@{language} = {aliases:?}"),
            PlannedMutation::AddClaim { entity, claim, .. } => {
                write!(f, "{entity}: {} -> {}", claim.property, claim.value)
            }
        }
    }
}

#[derive(Debug, Default)]
struct Overlay {
    next_pending: u64,
    entities: BTreeMap<String, StoredEntity>,
    planned: Vec<PlannedMutation>,
}

pub struct DryRunStore<'a, S: EntityStore + ?Sized> {
    inner: &'a S,
    overlay: Mutex<Overlay>,
}

impl<'a, S: EntityStore + ?Sized> DryRunStore<'a, S> {
    pub fn new(inner: &'a S) -> Self {
        Self {
            inner,
            overlay: Mutex::new(Overlay::default()),
        }
    }

    pub fn planned(&self) -> Vec<PlannedMutation> {
        self.lock().planned.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Overlay> {
        self.overlay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(
        &self,
        handle: &EntityHandle,
        mutation: PlannedMutation,
        apply: impl FnOnce(&mut StoredEntity),
    ) {
        info!(mutation = %mutation, "dry run: mutation not sent");
        let mut overlay = self.lock();
        apply(overlay.entities.entry(handle.to_string()).or_default());
        overlay.planned.push(mutation);
    }

    fn overlay_entity(&self, handle: &EntityHandle) -> Option<StoredEntity> {
        self.lock().entities.get(&handle.to_string()).cloned()
    }
}

impl<S: EntityStore + ?Sized> EntityStore for DryRunStore<'_, S> {
    fn create_entity(&self) -> Result<EntityHandle, KiraError> {
        let handle = {
            let mut overlay = self.lock();
            overlay.next_pending += 1;
            EntityHandle::Pending(overlay.next_pending)
        };
        self.record(
            &handle,
            PlannedMutation::CreateEntity {
                entity: handle.clone(),
            },
            |_| {},
        );
        Ok(handle)
    }

    fn resolve_handle(&self, id: &EntityId) -> Result<EntityHandle, KiraError> {
        self.inner.resolve_handle(id)
    }

    fn set_label(
        &self,
        handle: &EntityHandle,
        language: &str,
        value: &str,
    ) -> Result<(), KiraError> {
        let mutation = PlannedMutation::SetLabel {
            entity: handle.clone(),
            language: language.to_string(),
            value: value.to_string(),
        };
        self.record(handle, mutation, |entity| {
            entity
                .labels
                .insert(language.to_string(), value.to_string());
        });
        Ok(())
    }

    fn get_descriptions(&self, handle: &EntityHandle) -> Result<BTreeMap<String, String>, KiraError> {
        let mut descriptions = match handle {
            EntityHandle::Existing(_) => self.inner.get_descriptions(handle)?,
            EntityHandle::Pending(_) => BTreeMap::new(),
        };
        if let Some(entity) = self.overlay_entity(handle) {
            descriptions.extend(entity.descriptions);
        }
        Ok(descriptions)
    }

    fn set_description(
        &self,
        handle: &EntityHandle,
        language: &str,
        value: &str,
        summary: &str,
    ) -> Result<(), KiraError> {
        let mutation = PlannedMutation::SetDescription {
            entity: handle.clone(),
            language: language.to_string(),
            value: value.to_string(),
            summary: summary.to_string(),
        };
        self.record(handle, mutation, |entity| {
            entity
                .descriptions
                .insert(language.to_string(), value.to_string());
        });
        Ok(())
    }

    fn get_aliases(
        &self,
        handle: &EntityHandle,
    ) -> Result<BTreeMap<String, Vec<String>>, KiraError> {
        let mut aliases = match handle {
            EntityHandle::Existing(_) => self.inner.get_aliases(handle)?,
            EntityHandle::Pending(_) => BTreeMap::new(),
        };
        if let Some(entity) = self.overlay_entity(handle) {
            aliases.extend(entity.aliases);
        }
        Ok(aliases)
    }

    fn set_aliases(
        &self,
        handle: &EntityHandle,
        language: &str,
        aliases: &[String],
        summary: &str,
    ) -> Result<(), KiraError> {
        let mutation = PlannedMutation::SetAliases {
            entity: handle.clone(),
            language: language.to_string(),
            aliases: aliases.to_vec(),
            summary: summary.to_string(),
        };
        self.record(handle, mutation, |entity| {
            entity
                .aliases
                .insert(language.to_string(), aliases.to_vec());
        });
        Ok(())
    }

    fn get_claims(
        &self,
        handle: &EntityHandle,
        property: Property,
    ) -> Result<Vec<Claim>, KiraError> {
        let mut claims = match handle {
            EntityHandle::Existing(_) => self.inner.get_claims(handle, property)?,
            EntityHandle::Pending(_) => Vec::new(),
        };
        if let Some(entity) = self.overlay_entity(handle) {
            claims.extend(entity.claims_for(property).cloned());
        }
        Ok(claims)
    }

    fn add_claim(
        &self,
        handle: &EntityHandle,
        claim: &Claim,
        summary: &str,
    ) -> Result<(), KiraError> {
        let mutation = PlannedMutation::AddClaim {
            entity: handle.clone(),
            claim: claim.clone(),
            summary: summary.to_string(),
        };
        self.record(handle, mutation, |entity| entity.claims.push(claim.clone()));
        Ok(())
    }
}
