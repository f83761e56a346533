use std::fs::File;
use std::io::{Read, Write};

use camino::Utf8Path;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::domain::EntityId;
use crate::error::KiraError;

pub const ORGANISM_COLUMN: &str = "genbank_organism2";
pub const PARENT_TAXON_COLUMN: &str = "parent_taxon";
pub const TAXONOMY_ID_COLUMN: &str = "genbank_tax_id";
pub const GENE_COLUMN: &str = "refseq_gene";
pub const PROTEIN_COLUMN: &str = "product_name";
pub const PROTEIN_ACCESSION_COLUMN: &str = "refseq_protein_accession";
pub const NUCLEOTIDE_ACCESSION_COLUMN: &str = "refseq_nucleotide_accession";
pub const STRAIN_ID_COLUMN: &str = "strain_wd_id";
pub const GENE_ID_COLUMN: &str = "gene_wd_id";
pub const PROTEIN_ID_COLUMN: &str = "protein_wd_id";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, rename = "genbank_organism2")]
    pub organism: Option<String>,
    #[serde(default, rename = "parent_taxon")]
    pub parent_taxon: Option<String>,
    #[serde(default, rename = "genbank_tax_id")]
    pub taxonomy_id: Option<String>,
    #[serde(default, rename = "refseq_gene")]
    pub gene: Option<String>,
    #[serde(default, rename = "product_name")]
    pub protein: Option<String>,
    #[serde(default, rename = "refseq_protein_accession")]
    pub protein_accession: Option<String>,
    #[serde(default, rename = "refseq_nucleotide_accession")]
    pub nucleotide_accession: Option<String>,
    #[serde(default, rename = "strain_wd_id")]
    pub strain_id: Option<String>,
    #[serde(default, rename = "gene_wd_id")]
    pub gene_id: Option<String>,
    #[serde(default, rename = "protein_wd_id")]
    pub protein_id: Option<String>,
}

impl Record {
    pub fn organism(&self) -> Option<&str> {
        present(&self.organism)
    }

    pub fn parent_taxon(&self) -> Option<&str> {
        present(&self.parent_taxon)
    }

    pub fn taxonomy_id(&self) -> Option<&str> {
        present(&self.taxonomy_id)
    }

    pub fn gene(&self) -> Option<&str> {
        present(&self.gene)
    }

    pub fn protein(&self) -> Option<&str> {
        present(&self.protein)
    }

    pub fn protein_accession(&self) -> Option<&str> {
        present(&self.protein_accession)
    }

    pub fn nucleotide_accession(&self) -> Option<&str> {
        present(&self.nucleotide_accession)
    }

    pub fn parent_taxon_id(&self) -> Result<Option<EntityId>, KiraError> {
        self.parent_taxon().map(EntityId::from_uri).transpose()
    }

    pub fn strain_entity(&self) -> Result<Option<EntityId>, KiraError> {
        present(&self.strain_id).map(EntityId::from_uri).transpose()
    }

    pub fn gene_entity(&self) -> Result<Option<EntityId>, KiraError> {
        present(&self.gene_id).map(EntityId::from_uri).transpose()
    }

    pub fn protein_entity(&self) -> Result<Option<EntityId>, KiraError> {
        present(&self.protein_id).map(EntityId::from_uri).transpose()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.trim().is_empty())
}

#[derive(Debug, Clone)]
pub struct Table {
    headers: StringRecord,
    rows: Vec<StringRecord>,
    delimiter: u8,
}

impl Table {
    pub fn read(path: &Utf8Path) -> Result<Self, KiraError> {
        let file = File::open(path.as_std_path())
            .map_err(|err| KiraError::TableRead(format!("{path}: {err}")))?;
        Self::from_reader(file, delimiter_for(path))
    }

    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self, KiraError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|err| KiraError::TableRead(err.to_string()))?
            .clone();
        let mut rows = Vec::new();
        for row in reader.records() {
            let mut row = row.map_err(|err| KiraError::TableRead(err.to_string()))?;
            while row.len() < headers.len() {
                row.push_field("");
            }
            rows.push(row);
        }
        Ok(Self {
            headers,
            rows,
            delimiter,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.headers.iter()
    }

    pub fn record(&self, index: usize) -> Result<Record, KiraError> {
        let row = self
            .rows
            .get(index)
            .ok_or_else(|| KiraError::TableRead(format!("row {index} out of range")))?;
        row.deserialize(Some(&self.headers))
            .map_err(|err| KiraError::TableRead(format!("row {index}: {err}")))
    }

    pub fn get(&self, index: usize, column: &str) -> Option<&str> {
        let position = self.column_position(column)?;
        self.rows
            .get(index)
            .and_then(|row| row.get(position))
            .filter(|value| !value.trim().is_empty())
    }

    pub fn set(&mut self, index: usize, column: &str, value: &str) -> Result<(), KiraError> {
        let position = self.ensure_column(column);
        let row = self
            .rows
            .get(index)
            .ok_or_else(|| KiraError::TableWrite(format!("row {index} out of range")))?;
        let mut updated = StringRecord::with_capacity(row.as_slice().len(), row.len());
        for (i, field) in row.iter().enumerate() {
            updated.push_field(if i == position { value } else { field });
        }
        self.rows[index] = updated;
        Ok(())
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), KiraError> {
        let file = File::create(path.as_std_path())
            .map_err(|err| KiraError::TableWrite(format!("{path}: {err}")))?;
        self.to_writer(file)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), KiraError> {
        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(writer);
        writer
            .write_record(&self.headers)
            .map_err(|err| KiraError::TableWrite(err.to_string()))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|err| KiraError::TableWrite(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| KiraError::TableWrite(err.to_string()))
    }

    fn column_position(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == column)
    }

    fn ensure_column(&mut self, column: &str) -> usize {
        if let Some(position) = self.column_position(column) {
            return position;
        }
        self.headers.push_field(column);
        for row in &mut self.rows {
            row.push_field("");
        }
        self.headers.len() - 1
    }
}

pub fn delimiter_for(path: &Utf8Path) -> u8 {
    match path.extension() {
        Some("tsv") | Some("tab") | Some("txt") => b'\t',
        _ => b',',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_cells_are_absent() {
        let record = Record {
            organism: Some("   ".to_string()),
            gene: Some("blaTEM-1".to_string()),
            ..Record::default()
        };
        assert_eq!(record.organism(), None);
        assert_eq!(record.gene(), Some("blaTEM-1"));
    }

    #[test]
    fn parent_taxon_accepts_entity_uri() {
        let record = Record {
            parent_taxon: Some("http://www.wikidata.org/entity/Q1234".to_string()),
            ..Record::default()
        };
        assert_eq!(record.parent_taxon_id().unwrap().unwrap().as_str(), "Q1234");
    }

    #[test]
    fn set_adds_missing_column() {
        let input = "genbank_organism2,extra\nEscherichia coli K-12,keep\n";
        let mut table = Table::from_reader(input.as_bytes(), b',').unwrap();
        table.set(0, STRAIN_ID_COLUMN, "Q99").unwrap();
        assert_eq!(table.get(0, STRAIN_ID_COLUMN), Some("Q99"));
        assert_eq!(table.get(0, "extra"), Some("keep"));
        assert_eq!(table.record(0).unwrap().strain_id.as_deref(), Some("Q99"));
    }
}
