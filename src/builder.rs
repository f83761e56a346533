use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::claims::{ClaimOutcome, ClaimUpserter};
use crate::config::ItemCatalog;
use crate::domain::{EntityId, EntityKind, Property, WellKnownItem};
use crate::error::KiraError;
use crate::normalize::{EntityAttributes, normalize, normalize_taxonomy_id};
use crate::query::LabelQuery;
use crate::record::Record;
use crate::resolver::{EntityResolver, ResolutionDisposition};
use crate::store::{EntityHandle, EntityStore};
use crate::upsert::{CreationStatus, EntityUpserter, UpsertOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    Built,
    Aborted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Links {
    pub strain: Option<EntityHandle>,
    pub gene: Option<EntityHandle>,
    pub protein: Option<EntityHandle>,
}

impl Links {
    pub fn from_record(record: &Record) -> Result<Self, KiraError> {
        Ok(Self {
            strain: record.strain_entity()?.map(EntityHandle::Existing),
            gene: record.gene_entity()?.map(EntityHandle::Existing),
            protein: record.protein_entity()?.map(EntityHandle::Existing),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimReport {
    pub property: Property,
    pub value: Option<String>,
    pub outcome: ClaimOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildOutcome {
    pub kind: EntityKind,
    pub label: String,
    pub state: BuildState,
    pub status: CreationStatus,
    pub entity: Option<EntityHandle>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<EntityId>,
    pub description_written: bool,
    pub aliases_written: bool,
    pub claims: Vec<ClaimReport>,
}

impl BuildOutcome {
    pub fn is_built(&self) -> bool {
        self.state == BuildState::Built
    }

    pub fn claims_added(&self) -> usize {
        self.claims
            .iter()
            .filter(|report| report.outcome == ClaimOutcome::Added)
            .count()
    }
}

pub struct EntityBuilder<'a, Q: LabelQuery + ?Sized, S: EntityStore + ?Sized> {
    resolver: EntityResolver<'a, Q>,
    upserter: EntityUpserter<'a, S>,
    claims: ClaimUpserter<'a, S>,
    items: &'a ItemCatalog,
    bound: HashMap<(EntityKind, String), EntityHandle>,
}

impl<'a, Q: LabelQuery + ?Sized, S: EntityStore + ?Sized> EntityBuilder<'a, Q, S> {
    pub fn new(
        resolver: EntityResolver<'a, Q>,
        store: &'a S,
        language: &'a str,
        items: &'a ItemCatalog,
    ) -> Self {
        Self {
            resolver,
            upserter: EntityUpserter::new(store, language),
            claims: ClaimUpserter::new(store),
            items,
            bound: HashMap::new(),
        }
    }

    pub fn build(
        &mut self,
        kind: EntityKind,
        record: &Record,
        links: &Links,
    ) -> Result<BuildOutcome, KiraError> {
        let attrs = normalize(record, kind)?;
        // Parse everything taken from the record before the first write.
        let parent_taxon = match kind {
            EntityKind::Strain => record.parent_taxon_id()?,
            _ => None,
        };

        let key = (kind, attrs.label.clone());
        let (upserted, candidates) = match self.bound.get(&key) {
            Some(handle) => {
                info!(%kind, label = %attrs.label, entity = %handle, "label bound earlier in this run");
                (self.upserter.bind(handle.clone(), &attrs)?, Vec::new())
            }
            None => {
                let disposition = self.resolver.resolve(&attrs.label)?;
                let candidates = match &disposition {
                    ResolutionDisposition::Ambiguous(candidates) => candidates.clone(),
                    _ => Vec::new(),
                };
                (self.upserter.upsert(&disposition, &attrs)?, candidates)
            }
        };

        let Some(entity) = upserted.entity.clone() else {
            warn!(%kind, label = %attrs.label, "record needs manual review, no claims written");
            return Ok(outcome(kind, attrs, upserted, BuildState::Aborted, candidates, Vec::new()));
        };
        self.bound.insert(key, entity.clone());

        let claims = match kind {
            EntityKind::Strain => self.strain_claims(&entity, &attrs, record, parent_taxon.as_ref())?,
            EntityKind::Gene => self.gene_claims(&entity, links)?,
            EntityKind::Protein => self.protein_claims(&entity, record, links)?,
        };
        Ok(outcome(kind, attrs, upserted, BuildState::Built, candidates, claims))
    }

    pub fn add_encodes(
        &self,
        gene: Option<&EntityHandle>,
        protein: Option<&EntityHandle>,
    ) -> Result<ClaimReport, KiraError> {
        self.reference(gene, Property::Encodes, protein, "add encodes protein")
    }

    fn strain_claims(
        &self,
        entity: &EntityHandle,
        attrs: &EntityAttributes,
        record: &Record,
        parent_taxon: Option<&EntityId>,
    ) -> Result<Vec<ClaimReport>, KiraError> {
        let mut reports = vec![
            self.instance_of(entity, WellKnownItem::BacterialStrain, "add instance of strain")?,
            self.literal(entity, Property::TaxonName, &attrs.label, "adding taxon name")?,
        ];
        let parent_taxon = parent_taxon.cloned().map(EntityHandle::Existing);
        reports.push(self.reference(
            Some(entity),
            Property::ParentTaxon,
            parent_taxon.as_ref(),
            "adding parent taxon",
        )?);
        let taxonomy_id = record.taxonomy_id().and_then(normalize_taxonomy_id);
        reports.push(self.identifier(
            entity,
            Property::TaxonomyId,
            taxonomy_id.as_deref(),
            "adding taxonomy ID",
        )?);
        Ok(reports)
    }

    fn gene_claims(
        &self,
        entity: &EntityHandle,
        links: &Links,
    ) -> Result<Vec<ClaimReport>, KiraError> {
        let mut reports = vec![
            self.instance_of(entity, WellKnownItem::Gene, "add instance of gene")?,
            self.subclass_of(entity, WellKnownItem::Gene, "add subclass of gene")?,
            self.subclass_of(
                entity,
                WellKnownItem::ProteinCodingGene,
                "add subclass of protein coding gene",
            )?,
            self.reference(
                Some(entity),
                Property::FoundInTaxon,
                links.strain.as_ref(),
                "add found in taxon",
            )?,
        ];
        if links.protein.is_some() {
            reports.push(self.add_encodes(Some(entity), links.protein.as_ref())?);
        }
        Ok(reports)
    }

    fn protein_claims(
        &self,
        entity: &EntityHandle,
        record: &Record,
        links: &Links,
    ) -> Result<Vec<ClaimReport>, KiraError> {
        Ok(vec![
            self.instance_of(entity, WellKnownItem::Protein, "add instance of protein")?,
            self.subclass_of(entity, WellKnownItem::Protein, "add subclass of protein")?,
            self.reference(
                Some(entity),
                Property::FoundInTaxon,
                links.strain.as_ref(),
                "add found in taxon",
            )?,
            self.reference(
                Some(entity),
                Property::EncodedBy,
                links.gene.as_ref(),
                "add encoded by gene",
            )?,
            self.identifier(
                entity,
                Property::ProteinAccession,
                record.protein_accession(),
                "adding protein accession",
            )?,
            // Asserted for every protein; nothing in the record backs it.
            self.instance_item(
                entity,
                Property::ConfersResistanceTo,
                WellKnownItem::AntibioticResistance,
                "add antibiotic resistance",
            )?,
        ])
    }

    fn instance_of(
        &self,
        entity: &EntityHandle,
        item: WellKnownItem,
        summary: &str,
    ) -> Result<ClaimReport, KiraError> {
        self.instance_item(entity, Property::InstanceOf, item, summary)
    }

    fn subclass_of(
        &self,
        entity: &EntityHandle,
        item: WellKnownItem,
        summary: &str,
    ) -> Result<ClaimReport, KiraError> {
        self.instance_item(entity, Property::SubclassOf, item, summary)
    }

    fn instance_item(
        &self,
        entity: &EntityHandle,
        property: Property,
        item: WellKnownItem,
        summary: &str,
    ) -> Result<ClaimReport, KiraError> {
        let target = EntityHandle::Existing(self.items.id(item));
        let outcome = self
            .claims
            .add_reference_claim(Some(entity), property, &target, summary)?;
        Ok(ClaimReport {
            property,
            value: Some(target.to_string()),
            outcome,
        })
    }

    fn reference(
        &self,
        entity: Option<&EntityHandle>,
        property: Property,
        target: Option<&EntityHandle>,
        summary: &str,
    ) -> Result<ClaimReport, KiraError> {
        let Some(target) = target else {
            info!(%property, "no target entity, claim not written");
            return Ok(ClaimReport {
                property,
                value: None,
                outcome: ClaimOutcome::Skipped,
            });
        };
        let outcome = self
            .claims
            .add_reference_claim(entity, property, target, summary)?;
        Ok(ClaimReport {
            property,
            value: Some(target.to_string()),
            outcome,
        })
    }

    fn literal(
        &self,
        entity: &EntityHandle,
        property: Property,
        value: &str,
        summary: &str,
    ) -> Result<ClaimReport, KiraError> {
        let outcome = self
            .claims
            .add_literal_claim(Some(entity), property, value, summary)?;
        Ok(ClaimReport {
            property,
            value: Some(value.to_string()),
            outcome,
        })
    }

    fn identifier(
        &self,
        entity: &EntityHandle,
        property: Property,
        value: Option<&str>,
        summary: &str,
    ) -> Result<ClaimReport, KiraError> {
        let Some(value) = value else {
            info!(%property, "no identifier in record, claim not written");
            return Ok(ClaimReport {
                property,
                value: None,
                outcome: ClaimOutcome::Skipped,
            });
        };
        let outcome = self
            .claims
            .add_identifier_claim(Some(entity), property, value, summary)?;
        Ok(ClaimReport {
            property,
            value: Some(value.to_string()),
            outcome,
        })
    }
}

fn outcome(
    kind: EntityKind,
    attrs: EntityAttributes,
    upserted: UpsertOutcome,
    state: BuildState,
    candidates: Vec<EntityId>,
    claims: Vec<ClaimReport>,
) -> BuildOutcome {
    BuildOutcome {
        kind,
        label: attrs.label,
        state,
        status: upserted.status,
        entity: upserted.entity,
        candidates,
        description_written: upserted.description_written,
        aliases_written: upserted.aliases_written,
        claims,
    }
}
