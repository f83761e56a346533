use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::KiraError;
use crate::record::{GENE_COLUMN, ORGANISM_COLUMN, PROTEIN_COLUMN, Record, TAXONOMY_ID_COLUMN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceDb {
    Nucleotide,
    Protein,
}

impl SequenceDb {
    pub fn eutils_name(&self) -> &'static str {
        match self {
            SequenceDb::Nucleotide => "nuccore",
            SequenceDb::Protein => "protein",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DocumentSummary {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub organism: String,
    #[serde(default)]
    pub taxid: Option<u64>,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub subname: String,
}

pub trait SequenceClient: Send + Sync {
    fn summary(
        &self,
        db: SequenceDb,
        accession: &str,
    ) -> Result<Option<DocumentSummary>, KiraError>;
}

#[derive(Clone)]
pub struct EutilsHttpClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    email: Option<String>,
}

impl EutilsHttpClient {
    pub fn new(email: Option<&str>) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-kbe/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::NcbiHttp(err.to_string()))?,
        );

        let api_key = std::env::var("NCBI_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
            api_key,
            email: email.map(str::to_string),
        })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, KiraError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::NcbiHttp(err.to_string()));
                }
            }
        }
    }
}

impl SequenceClient for EutilsHttpClient {
    fn summary(
        &self,
        db: SequenceDb,
        accession: &str,
    ) -> Result<Option<DocumentSummary>, KiraError> {
        let url = format!("{}/esummary.fcgi", self.base_url);
        let response = self.send_with_retries(|| {
            let mut request = self.client.get(&url).query(&[
                ("db", db.eutils_name()),
                ("id", accession),
                ("retmode", "json"),
                ("tool", "kira-kbe"),
            ]);
            if let Some(key) = &self.api_key {
                request = request.query(&[("api_key", key.as_str())]);
            }
            if let Some(email) = &self.email {
                request = request.query(&[("email", email.as_str())]);
            }
            request
        })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "NCBI request failed".to_string());
            return Err(KiraError::NcbiStatus { status, message });
        }
        let body: Value = response
            .json()
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))?;
        parse_esummary(&body)
    }
}

pub fn parse_esummary(body: &Value) -> Result<Option<DocumentSummary>, KiraError> {
    if let Some(messages) = body.get("esummaryresult") {
        debug!(?messages, "esummary returned no document");
        return Ok(None);
    }
    let result = body
        .get("result")
        .ok_or_else(|| KiraError::NcbiHttp("esummary response without result".to_string()))?;
    let Some(uid) = result
        .get("uids")
        .and_then(Value::as_array)
        .and_then(|uids| uids.first())
        .and_then(Value::as_str)
    else {
        return Ok(None);
    };
    let Some(document) = result.get(uid) else {
        return Ok(None);
    };
    if document.get("error").is_some() {
        return Ok(None);
    }
    serde_json::from_value(document.clone())
        .map(Some)
        .map_err(|err| KiraError::NcbiHttp(format!("esummary document {uid}: {err}")))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SequenceSummary {
    pub gene: Option<String>,
    pub protein: Option<String>,
    pub genome: Option<String>,
    pub organism: Option<String>,
    pub strain: Option<String>,
    pub same_parent_taxon: Option<String>,
    pub taxonomy_id: Option<String>,
}

impl SequenceSummary {
    pub fn from_nucleotide(document: &DocumentSummary) -> Self {
        let definition = parse_nucleotide_definition(&document.title);
        Self {
            gene: definition.gene,
            protein: definition.protein,
            genome: definition.genome,
            ..Self::from_source(document)
        }
    }

    pub fn from_protein(document: &DocumentSummary) -> Self {
        let definition = parse_protein_definition(&document.title);
        Self {
            protein: definition.protein,
            same_parent_taxon: definition.same_parent_taxon,
            ..Self::from_source(document)
        }
    }

    fn from_source(document: &DocumentSummary) -> Self {
        Self {
            organism: non_empty(&document.organism),
            strain: source_qualifier(&document.subtype, &document.subname, "strain"),
            taxonomy_id: document
                .taxid
                .filter(|taxid| *taxid > 0)
                .map(|taxid| taxid.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NucleotideDefinition {
    pub gene: Option<String>,
    pub protein: Option<String>,
    pub genome: Option<String>,
}

/// `"<organism> <gene> gene for <protein>, complete CDS"` or a genome title.
pub fn parse_nucleotide_definition(definition: &str) -> NucleotideDefinition {
    if definition.contains("gene") {
        let (gene, protein) = definition
            .split_once("gene for")
            .or_else(|| definition.split_once("gene"))
            .unwrap_or((definition, ""));
        let protein = match COMPLETE_CDS.find(protein) {
            Some(found) => &protein[..found.start()],
            None => protein,
        };
        return NucleotideDefinition {
            gene: non_empty(gene),
            protein: non_empty(protein),
            genome: None,
        };
    }
    if definition.contains("genome") {
        let genome = definition
            .split(", complete genome")
            .next()
            .unwrap_or_default();
        let genome = genome.split(", whole genome").next().unwrap_or_default();
        return NucleotideDefinition {
            genome: non_empty(genome),
            ..NucleotideDefinition::default()
        };
    }
    NucleotideDefinition::default()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProteinDefinition {
    pub protein: Option<String>,
    pub same_parent_taxon: Option<String>,
}

/// `"MULTISPECIES: <protein> [<taxon>]"`
pub fn parse_protein_definition(definition: &str) -> ProteinDefinition {
    let (name, taxon) = match definition.find('[') {
        Some(start) => match definition[start..].find(']') {
            Some(len) => {
                let end = start + len;
                let name = format!("{}{}", &definition[..start], &definition[end + 1..]);
                (name, non_empty(&definition[start + 1..end]))
            }
            None => (definition[..start].to_string(), None),
        },
        None => (definition.to_string(), None),
    };
    ProteinDefinition {
        protein: non_empty(&name.replace("MULTISPECIES: ", "")),
        same_parent_taxon: taxon,
    }
}

pub fn source_qualifier(subtype: &str, subname: &str, name: &str) -> Option<String> {
    subtype
        .split('|')
        .zip(subname.split('|'))
        .find(|(key, _)| key.trim() == name)
        .and_then(|(_, value)| non_empty(value))
}

pub fn organism_with_strain(organism: &str, strain: Option<&str>) -> String {
    match strain.map(str::trim).filter(|strain| !strain.is_empty()) {
        Some(strain) if !organism.contains(strain) => format!("{} {strain}", organism.trim()),
        _ => organism.trim().to_string(),
    }
}

pub fn enrichment_for(
    record: &Record,
    nucleotide: &SequenceSummary,
    protein: &SequenceSummary,
) -> Vec<(&'static str, String)> {
    let mut fills = Vec::new();
    if record.gene().is_none() {
        if let Some(gene) = &nucleotide.gene {
            fills.push((GENE_COLUMN, gene.clone()));
        }
    }
    if record.protein().is_none() {
        if let Some(name) = protein.protein.as_ref().or(nucleotide.protein.as_ref()) {
            fills.push((PROTEIN_COLUMN, name.clone()));
        }
    }
    if record.organism().is_none() {
        let source = [protein, nucleotide]
            .into_iter()
            .find(|summary| summary.organism.is_some());
        if let Some(summary) = source {
            if let Some(organism) = &summary.organism {
                fills.push((
                    ORGANISM_COLUMN,
                    organism_with_strain(organism, summary.strain.as_deref()),
                ));
            }
        }
    }
    if record.taxonomy_id().is_none() {
        if let Some(taxid) = protein.taxonomy_id.as_ref().or(nucleotide.taxonomy_id.as_ref()) {
            fills.push((TAXONOMY_ID_COLUMN, format!("taxon:{taxid}")));
        }
    }
    fills
}

pub struct CachedSequenceClient<'a, C: SequenceClient + ?Sized> {
    inner: &'a C,
    delay: Duration,
    cache: Mutex<HashMap<(SequenceDb, String), SequenceSummary>>,
}

impl<'a, C: SequenceClient + ?Sized> CachedSequenceClient<'a, C> {
    pub fn new(inner: &'a C, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn nucleotide(&self, accession: &str) -> SequenceSummary {
        self.fetch(SequenceDb::Nucleotide, accession)
    }

    pub fn protein(&self, accession: &str) -> SequenceSummary {
        self.fetch(SequenceDb::Protein, accession)
    }

    fn fetch(&self, db: SequenceDb, accession: &str) -> SequenceSummary {
        let accession = accession.trim();
        if accession.is_empty() {
            return SequenceSummary::default();
        }
        let key = (db, accession.to_string());
        if let Some(cached) = self.lock().get(&key) {
            return cached.clone();
        }

        thread::sleep(self.delay);
        let summary = match self.inner.summary(db, accession) {
            Ok(Some(document)) => match db {
                SequenceDb::Nucleotide => SequenceSummary::from_nucleotide(&document),
                SequenceDb::Protein => SequenceSummary::from_protein(&document),
            },
            Ok(None) => {
                warn!(accession, db = db.eutils_name(), "no sequence record found");
                SequenceSummary::default()
            }
            Err(err) => {
                warn!(accession, db = db.eutils_name(), error = %err, "sequence fetch failed");
                return SequenceSummary::default();
            }
        };
        self.lock().insert(key, summary.clone());
        summary
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(SequenceDb, String), SequenceSummary>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

static COMPLETE_CDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i),\s*complete cds").unwrap());

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gene_for_definition() {
        let parsed = parse_nucleotide_definition(
            "Klebsiella pneumoniae blaKPC-2 gene for carbapenem-hydrolyzing class A beta-lactamase KPC-2, complete CDS",
        );
        assert_eq!(parsed.gene.as_deref(), Some("Klebsiella pneumoniae blaKPC-2"));
        assert_eq!(
            parsed.protein.as_deref(),
            Some("carbapenem-hydrolyzing class A beta-lactamase KPC-2")
        );
        assert_eq!(parsed.genome, None);
    }

    #[test]
    fn plain_gene_definition_without_cds_suffix() {
        let parsed = parse_nucleotide_definition("Escherichia coli mcr-1 gene phosphoethanolamine transferase");
        assert_eq!(parsed.gene.as_deref(), Some("Escherichia coli mcr-1"));
        assert_eq!(parsed.protein.as_deref(), Some("phosphoethanolamine transferase"));
    }

    #[test]
    fn genome_definition() {
        let parsed =
            parse_nucleotide_definition("Escherichia coli str. K-12 substr. MG1655, complete genome");
        assert_eq!(
            parsed.genome.as_deref(),
            Some("Escherichia coli str. K-12 substr. MG1655")
        );
        assert_eq!(parsed.gene, None);
    }

    #[test]
    fn protein_definition_extracts_taxon() {
        let parsed =
            parse_protein_definition("MULTISPECIES: class A beta-lactamase TEM-1 [Enterobacteriaceae]");
        assert_eq!(parsed.protein.as_deref(), Some("class A beta-lactamase TEM-1"));
        assert_eq!(parsed.same_parent_taxon.as_deref(), Some("Enterobacteriaceae"));
    }

    #[test]
    fn strain_from_source_pairs() {
        assert_eq!(
            source_qualifier("strain|substrain", "K-12|MG1655", "strain").as_deref(),
            Some("K-12")
        );
        assert_eq!(source_qualifier("serovar", "Typhimurium", "strain"), None);
    }

    #[test]
    fn organism_strain_is_not_repeated() {
        assert_eq!(
            organism_with_strain("Escherichia coli", Some("K-12")),
            "Escherichia coli K-12"
        );
        assert_eq!(
            organism_with_strain("Escherichia coli K-12", Some("K-12")),
            "Escherichia coli K-12"
        );
    }

    #[test]
    fn esummary_document_is_read() {
        let body = json!({
            "header": {"type": "esummary"},
            "result": {
                "uids": ["1"],
                "1": {
                    "title": "class A beta-lactamase TEM-1 [Escherichia coli]",
                    "organism": "Escherichia coli",
                    "taxid": 562,
                    "subtype": "strain",
                    "subname": "K-12"
                }
            }
        });
        let document = parse_esummary(&body).unwrap().unwrap();
        let summary = SequenceSummary::from_protein(&document);
        assert_eq!(summary.protein.as_deref(), Some("class A beta-lactamase TEM-1"));
        assert_eq!(summary.strain.as_deref(), Some("K-12"));
        assert_eq!(summary.taxonomy_id.as_deref(), Some("562"));
    }

    #[test]
    fn esummary_error_is_absent() {
        let body = json!({"esummaryresult": ["Invalid uid XYZ at position=0"]});
        assert_eq!(parse_esummary(&body).unwrap(), None);
    }
}
