use kira_kb_enricher::builder::{BuildState, EntityBuilder, Links};
use kira_kb_enricher::claims::ClaimOutcome;
use kira_kb_enricher::config::ItemCatalog;
use kira_kb_enricher::domain::{Claim, ClaimValue, EntityId, EntityKind, Property};
use kira_kb_enricher::record::Record;
use kira_kb_enricher::resolver::{EntityResolver, RetryPolicy};
use kira_kb_enricher::store::{EntityHandle, EntityStore, MemoryStore, StoredEntity};
use kira_kb_enricher::upsert::CreationStatus;

fn strain_record() -> Record {
    Record {
        organism: Some("Escherichia coli K-12".to_string()),
        parent_taxon: Some("http://www.wikidata.org/entity/Q1234".to_string()),
        taxonomy_id: Some("taxon:562".to_string()),
        ..Record::default()
    }
}

fn gene_record() -> Record {
    Record {
        gene: Some("blaTEM-1".to_string()),
        ..strain_record()
    }
}

fn protein_record() -> Record {
    Record {
        protein: Some("class A beta-lactamase TEM-1".to_string()),
        protein_accession: Some("WP_000027057.1".to_string()),
        ..gene_record()
    }
}

fn id(value: &str) -> EntityId {
    value.parse().unwrap()
}

fn builder<'a>(
    store: &'a MemoryStore,
    items: &'a ItemCatalog,
) -> EntityBuilder<'a, MemoryStore, MemoryStore> {
    let resolver = EntityResolver::new(store, "en", RetryPolicy::immediate(1));
    EntityBuilder::new(resolver, store, "en", items)
}

#[test]
fn strain_is_created_with_all_four_claims() {
    let store = MemoryStore::new();
    let items = ItemCatalog::default();
    let outcome = builder(&store, &items)
        .build(EntityKind::Strain, &strain_record(), &Links::default())
        .unwrap();

    assert_eq!(outcome.state, BuildState::Built);
    assert_eq!(outcome.status, CreationStatus::Created);
    assert_eq!(store.entity_count(), 1);

    let strain_id = outcome.entity.as_ref().and_then(EntityHandle::id).unwrap();
    let entity = store.entity(strain_id).unwrap();
    assert_eq!(entity.labels["en"], "Escherichia coli K-12");
    assert_eq!(entity.descriptions["en"], "bacterial strain");
    assert_eq!(entity.aliases["en"], vec!["K-12".to_string()]);
    assert_eq!(
        entity.claims,
        vec![
            Claim::new(Property::InstanceOf, ClaimValue::Item(id("Q855769"))),
            Claim::new(
                Property::TaxonName,
                ClaimValue::String("Escherichia coli K-12".to_string())
            ),
            Claim::new(Property::ParentTaxon, ClaimValue::Item(id("Q1234"))),
            Claim::new(
                Property::TaxonomyId,
                ClaimValue::ExternalId("562".to_string())
            ),
        ]
    );
}

#[test]
fn second_run_writes_nothing() {
    let store = MemoryStore::new();
    let items = ItemCatalog::default();
    builder(&store, &items)
        .build(EntityKind::Strain, &strain_record(), &Links::default())
        .unwrap();
    let after_first = store.snapshot();
    let writes = store.write_count();

    let outcome = builder(&store, &items)
        .build(EntityKind::Strain, &strain_record(), &Links::default())
        .unwrap();

    assert_eq!(outcome.status, CreationStatus::Reused);
    assert!(!outcome.description_written);
    assert!(!outcome.aliases_written);
    assert_eq!(outcome.claims_added(), 0);
    assert!(
        outcome
            .claims
            .iter()
            .all(|report| report.outcome == ClaimOutcome::AlreadyPresent)
    );
    assert_eq!(store.write_count(), writes);
    assert_eq!(store.snapshot(), after_first);
}

#[test]
fn existing_label_is_reused_and_completed() {
    let store = MemoryStore::new();
    store.insert(
        id("Q500"),
        StoredEntity::labelled("en", "Escherichia coli K-12"),
    );
    let items = ItemCatalog::default();

    let outcome = builder(&store, &items)
        .build(EntityKind::Strain, &strain_record(), &Links::default())
        .unwrap();

    assert_eq!(outcome.status, CreationStatus::Reused);
    assert_eq!(outcome.entity, Some(EntityHandle::Existing(id("Q500"))));
    assert_eq!(store.entity_count(), 1);
    assert!(outcome.description_written);
    assert_eq!(outcome.claims_added(), 4);
}

#[test]
fn ambiguous_label_aborts_without_mutation() {
    let store = MemoryStore::new();
    for existing in ["Q10", "Q11"] {
        store.insert(
            id(existing),
            StoredEntity::labelled("en", "Escherichia coli K-12"),
        );
    }
    let items = ItemCatalog::default();

    let outcome = builder(&store, &items)
        .build(EntityKind::Strain, &strain_record(), &Links::default())
        .unwrap();

    assert_eq!(outcome.state, BuildState::Aborted);
    assert_eq!(outcome.status, CreationStatus::Skipped);
    assert_eq!(outcome.entity, None);
    assert_eq!(outcome.candidates, vec![id("Q10"), id("Q11")]);
    assert!(outcome.claims.is_empty());
    assert_eq!(store.write_count(), 0);
}

#[test]
fn gene_without_strain_skips_found_in_taxon() {
    let store = MemoryStore::new();
    let items = ItemCatalog::default();

    let outcome = builder(&store, &items)
        .build(EntityKind::Gene, &gene_record(), &Links::default())
        .unwrap();

    assert_eq!(outcome.state, BuildState::Built);
    let found_in = outcome
        .claims
        .iter()
        .find(|report| report.property == Property::FoundInTaxon)
        .unwrap();
    assert_eq!(found_in.outcome, ClaimOutcome::Skipped);
    let gene = outcome.entity.as_ref().unwrap();
    assert!(store.get_claims(gene, Property::FoundInTaxon).unwrap().is_empty());
    assert_eq!(store.get_claims(gene, Property::SubclassOf).unwrap().len(), 2);
}

#[test]
fn strain_gene_protein_are_linked() {
    let store = MemoryStore::new();
    let items = ItemCatalog::default();
    let mut builder = builder(&store, &items);
    let record = protein_record();

    let strain = builder
        .build(EntityKind::Strain, &record, &Links::default())
        .unwrap();
    let mut links = Links {
        strain: strain.entity.clone(),
        ..Links::default()
    };
    let gene = builder.build(EntityKind::Gene, &record, &links).unwrap();
    links.gene = gene.entity.clone();
    let protein = builder.build(EntityKind::Protein, &record, &links).unwrap();
    let encodes = builder
        .add_encodes(gene.entity.as_ref(), protein.entity.as_ref())
        .unwrap();

    let strain_id = strain.entity.as_ref().and_then(EntityHandle::id).unwrap().clone();
    let gene_handle = gene.entity.unwrap();
    let protein_handle = protein.entity.unwrap();
    let gene_id = gene_handle.id().unwrap().clone();
    let protein_id = protein_handle.id().unwrap().clone();

    assert_eq!(encodes.outcome, ClaimOutcome::Added);
    assert_eq!(
        store.get_claims(&gene_handle, Property::Encodes).unwrap(),
        vec![Claim::new(Property::Encodes, ClaimValue::Item(protein_id))]
    );
    assert_eq!(
        store.get_claims(&protein_handle, Property::EncodedBy).unwrap(),
        vec![Claim::new(Property::EncodedBy, ClaimValue::Item(gene_id))]
    );
    assert_eq!(
        store.get_claims(&protein_handle, Property::FoundInTaxon).unwrap(),
        vec![Claim::new(Property::FoundInTaxon, ClaimValue::Item(strain_id))]
    );
    assert_eq!(
        store
            .get_claims(&protein_handle, Property::ProteinAccession)
            .unwrap(),
        vec![Claim::new(
            Property::ProteinAccession,
            ClaimValue::ExternalId("WP_000027057.1".to_string())
        )]
    );
    assert_eq!(
        store
            .get_claims(&protein_handle, Property::ConfersResistanceTo)
            .unwrap(),
        vec![Claim::new(
            Property::ConfersResistanceTo,
            ClaimValue::Item(id("Q12147416"))
        )]
    );
    assert_eq!(
        store.entity(protein_handle.id().unwrap()).unwrap().descriptions["en"],
        "microbial protein found in Escherichia coli K-12"
    );
}

#[test]
fn taxon_name_keeps_first_value() {
    let store = MemoryStore::new();
    store.insert(
        id("Q700"),
        StoredEntity::labelled("en", "Escherichia coli K-12").with_claim(Claim::new(
            Property::TaxonName,
            ClaimValue::String("Escherichia coli str. K-12".to_string()),
        )),
    );
    let items = ItemCatalog::default();

    let outcome = builder(&store, &items)
        .build(EntityKind::Strain, &strain_record(), &Links::default())
        .unwrap();

    let taxon_name = outcome
        .claims
        .iter()
        .find(|report| report.property == Property::TaxonName)
        .unwrap();
    assert_eq!(taxon_name.outcome, ClaimOutcome::AlreadyPresent);
    assert_eq!(
        store
            .get_claims(&EntityHandle::Existing(id("Q700")), Property::TaxonName)
            .unwrap(),
        vec![Claim::new(
            Property::TaxonName,
            ClaimValue::String("Escherichia coli str. K-12".to_string())
        )]
    );
}
