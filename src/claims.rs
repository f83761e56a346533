use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{Claim, ClaimValue, Property, ValueKind};
use crate::error::KiraError;
use crate::store::{EntityHandle, EntityStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClaimOutcome {
    Added,
    AlreadyPresent,
    Skipped,
}

pub struct ClaimUpserter<'a, S: EntityStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: EntityStore + ?Sized> ClaimUpserter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn add_reference_claim(
        &self,
        entity: Option<&EntityHandle>,
        property: Property,
        target: &EntityHandle,
        summary: &str,
    ) -> Result<ClaimOutcome, KiraError> {
        let claim = Claim::new(property, ClaimValue::from(target));
        self.apply(entity, claim, summary, |existing, claim| {
            existing.iter().any(|other| other.value == claim.value)
        })
    }

    /// First writer wins: no-op when `property` has any claim at all.
    pub fn add_literal_claim(
        &self,
        entity: Option<&EntityHandle>,
        property: Property,
        value: &str,
        summary: &str,
    ) -> Result<ClaimOutcome, KiraError> {
        let claim = Claim::new(property, ClaimValue::String(value.to_string()));
        self.apply(entity, claim, summary, |existing, _| !existing.is_empty())
    }

    pub fn add_identifier_claim(
        &self,
        entity: Option<&EntityHandle>,
        property: Property,
        value: &str,
        summary: &str,
    ) -> Result<ClaimOutcome, KiraError> {
        let claim_value = match property.value_kind() {
            ValueKind::String => ClaimValue::String(value.to_string()),
            _ => ClaimValue::ExternalId(value.to_string()),
        };
        let claim = Claim::new(property, claim_value);
        self.apply(entity, claim, summary, |existing, _| {
            existing
                .iter()
                .any(|other| other.value.as_text() == Some(value))
        })
    }

    fn apply(
        &self,
        entity: Option<&EntityHandle>,
        claim: Claim,
        summary: &str,
        is_present: impl Fn(&[Claim], &Claim) -> bool,
    ) -> Result<ClaimOutcome, KiraError> {
        let Some(entity) = entity else {
            info!(
                property = %claim.property,
                value = %claim.value,
                "no bound entity, claim not written"
            );
            return Ok(ClaimOutcome::Skipped);
        };

        let existing = self.store.get_claims(entity, claim.property)?;
        if is_present(&existing, &claim) {
            debug!(
                entity = %entity,
                property = %claim.property,
                value = %claim.value,
                "claim already present"
            );
            return Ok(ClaimOutcome::AlreadyPresent);
        }

        self.store.add_claim(entity, &claim, summary)?;
        info!(
            entity = %entity,
            property = %claim.property,
            value = %claim.value,
            "claim added"
        );
        Ok(ClaimOutcome::Added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityId;
    use crate::store::{MemoryStore, StoredEntity};

    fn item(id: &str) -> EntityHandle {
        EntityHandle::Existing(id.parse().unwrap())
    }

    fn store_with_entity() -> (MemoryStore, EntityHandle) {
        let store = MemoryStore::new();
        let id: EntityId = "Q100".parse().unwrap();
        store.insert(id.clone(), StoredEntity::labelled("en", "Escherichia coli K-12"));
        (store, EntityHandle::Existing(id))
    }

    #[test]
    fn reference_claim_is_added_once() {
        let (store, handle) = store_with_entity();
        let claims = ClaimUpserter::new(&store);
        let target = item("Q855769");

        let first = claims
            .add_reference_claim(Some(&handle), Property::InstanceOf, &target, "add instance of strain")
            .unwrap();
        let second = claims
            .add_reference_claim(Some(&handle), Property::InstanceOf, &target, "add instance of strain")
            .unwrap();

        assert_eq!(first, ClaimOutcome::Added);
        assert_eq!(second, ClaimOutcome::AlreadyPresent);
        assert_eq!(store.get_claims(&handle, Property::InstanceOf).unwrap().len(), 1);
    }

    #[test]
    fn reference_claims_with_distinct_targets_coexist() {
        let (store, handle) = store_with_entity();
        let claims = ClaimUpserter::new(&store);
        for target in ["Q7187", "Q20747295"] {
            let target = item(target);
            claims
                .add_reference_claim(Some(&handle), Property::SubclassOf, &target, "add subclass")
                .unwrap();
        }
        assert_eq!(store.get_claims(&handle, Property::SubclassOf).unwrap().len(), 2);
    }

    #[test]
    fn literal_claim_first_write_wins() {
        let (store, handle) = store_with_entity();
        let claims = ClaimUpserter::new(&store);
        claims
            .add_literal_claim(Some(&handle), Property::TaxonName, "Escherichia coli K-12", "adding taxon name")
            .unwrap();
        let outcome = claims
            .add_literal_claim(Some(&handle), Property::TaxonName, "E. coli", "adding taxon name")
            .unwrap();

        assert_eq!(outcome, ClaimOutcome::AlreadyPresent);
        let stored = store.get_claims(&handle, Property::TaxonName).unwrap();
        assert_eq!(
            stored,
            vec![Claim::new(
                Property::TaxonName,
                ClaimValue::String("Escherichia coli K-12".to_string())
            )]
        );
    }

    #[test]
    fn identifier_claims_compare_values_exactly() {
        let (store, handle) = store_with_entity();
        let claims = ClaimUpserter::new(&store);
        claims
            .add_identifier_claim(Some(&handle), Property::TaxonomyId, "562", "adding taxonomy ID")
            .unwrap();
        let same = claims
            .add_identifier_claim(Some(&handle), Property::TaxonomyId, "562", "adding taxonomy ID")
            .unwrap();
        let other = claims
            .add_identifier_claim(Some(&handle), Property::TaxonomyId, "83333", "adding taxonomy ID")
            .unwrap();

        assert_eq!(same, ClaimOutcome::AlreadyPresent);
        assert_eq!(other, ClaimOutcome::Added);
        assert_eq!(store.get_claims(&handle, Property::TaxonomyId).unwrap().len(), 2);
    }

    #[test]
    fn missing_entity_is_a_no_op() {
        let store = MemoryStore::new();
        let claims = ClaimUpserter::new(&store);
        let target = item("Q1");
        let outcome = claims
            .add_reference_claim(None, Property::FoundInTaxon, &target, "add found in taxon")
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::Skipped);
        assert_eq!(store.write_count(), 0);
    }
}
