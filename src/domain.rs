use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts either a bare id (`Q1234`) or an entity URI ending in one
    /// (`http://www.wikidata.org/entity/Q1234`).
    pub fn from_uri(value: &str) -> Result<Self, KiraError> {
        let last = value
            .trim()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();
        last.parse()
            .map_err(|_| KiraError::InvalidEntityId(value.to_string()))
    }

    pub(crate) fn builtin(value: &'static str) -> Self {
        Self(value.to_string())
    }

    pub(crate) fn builtin_numeric(n: u64) -> Self {
        Self(format!("Q{n}"))
    }

    pub fn numeric_id(&self) -> u64 {
        self.0[1..].parse().unwrap_or(0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let mut chars = normalized.chars();
        let is_valid = chars.next() == Some('Q')
            && normalized.len() > 1
            && chars.all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(KiraError::InvalidEntityId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for EntityId {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Property {
    #[serde(rename = "instance-of")]
    InstanceOf,
    #[serde(rename = "subclass-of")]
    SubclassOf,
    #[serde(rename = "has-taxon-name")]
    TaxonName,
    #[serde(rename = "parent-taxon")]
    ParentTaxon,
    #[serde(rename = "taxonomy-identifier")]
    TaxonomyId,
    #[serde(rename = "found-in-taxon")]
    FoundInTaxon,
    #[serde(rename = "encodes")]
    Encodes,
    #[serde(rename = "encoded-by")]
    EncodedBy,
    #[serde(rename = "protein-accession-identifier")]
    ProteinAccession,
    #[serde(rename = "confers-resistance-to")]
    ConfersResistanceTo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Item,
    String,
    ExternalId,
}

impl Property {
    pub const ALL: [Property; 10] = [
        Property::InstanceOf,
        Property::SubclassOf,
        Property::TaxonName,
        Property::ParentTaxon,
        Property::TaxonomyId,
        Property::FoundInTaxon,
        Property::Encodes,
        Property::EncodedBy,
        Property::ProteinAccession,
        Property::ConfersResistanceTo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Property::InstanceOf => "instance-of",
            Property::SubclassOf => "subclass-of",
            Property::TaxonName => "has-taxon-name",
            Property::ParentTaxon => "parent-taxon",
            Property::TaxonomyId => "taxonomy-identifier",
            Property::FoundInTaxon => "found-in-taxon",
            Property::Encodes => "encodes",
            Property::EncodedBy => "encoded-by",
            Property::ProteinAccession => "protein-accession-identifier",
            Property::ConfersResistanceTo => "confers-resistance-to",
        }
    }

    pub fn default_id(&self) -> &'static str {
        match self {
            Property::InstanceOf => "P31",
            Property::SubclassOf => "P279",
            Property::TaxonName => "P225",
            Property::ParentTaxon => "P171",
            Property::TaxonomyId => "P685",
            Property::FoundInTaxon => "P703",
            Property::Encodes => "P688",
            Property::EncodedBy => "P702",
            Property::ProteinAccession => "P637",
            Property::ConfersResistanceTo => "P682",
        }
    }

    pub fn value_kind(&self) -> ValueKind {
        match self {
            Property::TaxonName => ValueKind::String,
            Property::TaxonomyId | Property::ProteinAccession => ValueKind::ExternalId,
            _ => ValueKind::Item,
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WellKnownItem {
    BacterialStrain,
    Gene,
    ProteinCodingGene,
    Protein,
    AntibioticResistance,
}

impl WellKnownItem {
    pub const ALL: [WellKnownItem; 5] = [
        WellKnownItem::BacterialStrain,
        WellKnownItem::Gene,
        WellKnownItem::ProteinCodingGene,
        WellKnownItem::Protein,
        WellKnownItem::AntibioticResistance,
    ];

    pub fn default_id(&self) -> &'static str {
        match self {
            WellKnownItem::BacterialStrain => "Q855769",
            WellKnownItem::Gene => "Q7187",
            WellKnownItem::ProteinCodingGene => "Q20747295",
            WellKnownItem::Protein => "Q8054",
            WellKnownItem::AntibioticResistance => "Q12147416",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum ClaimValue {
    Item(EntityId),
    String(String),
    ExternalId(String),
    /// An item a dry run would create; never sent to a live store.
    PendingItem(u64),
}

impl ClaimValue {
    pub fn as_item(&self) -> Option<&EntityId> {
        match self {
            ClaimValue::Item(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ClaimValue::String(value) | ClaimValue::ExternalId(value) => Some(value),
            ClaimValue::Item(_) | ClaimValue::PendingItem(_) => None,
        }
    }
}

impl fmt::Display for ClaimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimValue::Item(id) => write!(f, "{id}"),
            ClaimValue::String(value) => write!(f, "{value:?}"),
            ClaimValue::ExternalId(value) => write!(f, "{value}"),
            ClaimValue::PendingItem(n) => write!(f, "new#{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    pub property: Property,
    pub value: ClaimValue,
}

impl Claim {
    pub fn new(property: Property, value: ClaimValue) -> Self {
        Self { property, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Strain,
    Gene,
    Protein,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Strain, EntityKind::Gene, EntityKind::Protein];
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Strain => write!(f, "strain"),
            EntityKind::Gene => write!(f, "gene"),
            EntityKind::Protein => write!(f, "protein"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn kinds_parse_from_cli_names() {
        assert_eq!(<EntityKind as ValueEnum>::from_str("Gene", true), Ok(EntityKind::Gene));
        assert!(<EntityKind as ValueEnum>::from_str("plasmid", true).is_err());
        assert_eq!(EntityKind::Protein.to_string(), "protein");
    }

    #[test]
    fn parse_entity_id_valid() {
        let id: EntityId = " q1234 ".parse().unwrap();
        assert_eq!(id.as_str(), "Q1234");
        assert_eq!(id.numeric_id(), 1234);
    }

    #[test]
    fn parse_entity_id_invalid() {
        assert_matches!("P31".parse::<EntityId>(), Err(KiraError::InvalidEntityId(_)));
        assert_matches!("Q".parse::<EntityId>(), Err(KiraError::InvalidEntityId(_)));
        assert_matches!("Q12a".parse::<EntityId>(), Err(KiraError::InvalidEntityId(_)));
    }

    #[test]
    fn entity_id_from_uri() {
        let id = EntityId::from_uri("http://www.wikidata.org/entity/Q1234").unwrap();
        assert_eq!(id.as_str(), "Q1234");
        let bare = EntityId::from_uri("Q42").unwrap();
        assert_eq!(bare.as_str(), "Q42");
        assert_matches!(
            EntityId::from_uri("https://example.org/entity/"),
            Err(KiraError::InvalidEntityId(_))
        );
    }

    #[test]
    fn property_value_kinds() {
        assert_eq!(Property::TaxonName.value_kind(), ValueKind::String);
        assert_eq!(Property::TaxonomyId.value_kind(), ValueKind::ExternalId);
        assert_eq!(Property::FoundInTaxon.value_kind(), ValueKind::Item);
    }

    #[test]
    fn claim_value_serializes_tagged() {
        let value = ClaimValue::Item("Q7187".parse().unwrap());
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["type"], "item");
        assert_eq!(json["value"], "Q7187");
    }
}
