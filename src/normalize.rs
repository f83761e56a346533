use serde::Serialize;

use crate::domain::EntityKind;
use crate::error::KiraError;
use crate::record::{GENE_COLUMN, ORGANISM_COLUMN, PROTEIN_COLUMN, Record};

pub const STRAIN_DESCRIPTION: &str = "bacterial strain";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityAttributes {
    pub label: String,
    pub description: String,
    pub aliases: Vec<String>,
}

pub fn normalize(record: &Record, kind: EntityKind) -> Result<EntityAttributes, KiraError> {
    let organism = record.organism();
    match kind {
        EntityKind::Strain => {
            let label = required(organism, ORGANISM_COLUMN)?;
            Ok(EntityAttributes {
                label: label.to_string(),
                description: STRAIN_DESCRIPTION.to_string(),
                aliases: strain_alias(label).into_iter().collect(),
            })
        }
        EntityKind::Gene => {
            let label = required(record.gene(), GENE_COLUMN)?;
            let strain = required(organism, ORGANISM_COLUMN)?;
            Ok(EntityAttributes {
                label: label.to_string(),
                description: format!("microbial gene found in {strain}"),
                aliases: Vec::new(),
            })
        }
        EntityKind::Protein => {
            let label = required(record.protein(), PROTEIN_COLUMN)?;
            let strain = required(organism, ORGANISM_COLUMN)?;
            Ok(EntityAttributes {
                label: label.to_string(),
                description: format!("microbial protein found in {strain}"),
                aliases: Vec::new(),
            })
        }
    }
}

pub fn strain_alias(label: &str) -> Option<String> {
    label.split_whitespace().next_back().map(str::to_string)
}

pub fn normalize_taxonomy_id(raw: &str) -> Option<String> {
    let value = raw.rsplit(':').next().unwrap_or_default().trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn required<'a>(value: Option<&'a str>, column: &str) -> Result<&'a str, KiraError> {
    value.ok_or_else(|| KiraError::MissingField(column.to_string()))
}
