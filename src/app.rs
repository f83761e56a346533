use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::builder::{BuildOutcome, BuildState, ClaimReport, EntityBuilder, Links};
use crate::claims::ClaimOutcome;
use crate::config::ResolvedConfig;
use crate::domain::{EntityId, EntityKind};
use crate::error::KiraError;
use crate::ncbi::{CachedSequenceClient, SequenceClient, enrichment_for};
use crate::query::LabelQuery;
use crate::record::{GENE_ID_COLUMN, PROTEIN_ID_COLUMN, STRAIN_ID_COLUMN, Table};
use crate::resolver::{EntityResolver, ResolutionDisposition};
use crate::store::{DryRunStore, EntityStore, PlannedMutation};
use crate::upsert::CreationStatus;

#[derive(Debug, Clone)]
pub struct UpsertOptions {
    pub kinds: Vec<EntityKind>,
    pub dry_run: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            kinds: EntityKind::ALL.to_vec(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KindError {
    pub kind: EntityKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowReport {
    pub row: usize,
    pub outcomes: Vec<BuildOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encodes: Option<ClaimReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<KindError>,
}

impl RowReport {
    fn new(row: usize) -> Self {
        Self {
            row,
            outcomes: Vec::new(),
            encodes: None,
            errors: Vec::new(),
        }
    }

    pub fn outcome(&self, kind: EntityKind) -> Option<&BuildOutcome> {
        self.outcomes.iter().find(|outcome| outcome.kind == kind)
    }

    pub fn entity_id(&self, kind: EntityKind) -> Option<&EntityId> {
        self.outcome(kind)
            .filter(|outcome| outcome.is_built())
            .and_then(|outcome| outcome.entity.as_ref())
            .and_then(|handle| handle.id())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub dry_run: bool,
    pub rows: Vec<RowReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned: Vec<PlannedMutation>,
}

impl RunReport {
    pub fn count_status(&self, status: CreationStatus) -> usize {
        self.outcomes().filter(|outcome| outcome.status == status).count()
    }

    pub fn aborted(&self) -> usize {
        self.outcomes()
            .filter(|outcome| outcome.state == BuildState::Aborted)
            .count()
    }

    pub fn claims_added(&self) -> usize {
        let built: usize = self.outcomes().map(BuildOutcome::claims_added).sum();
        let encodes = self
            .rows
            .iter()
            .filter_map(|row| row.encodes.as_ref())
            .filter(|report| report.outcome == ClaimOutcome::Added)
            .count();
        built + encodes
    }

    pub fn failed(&self) -> usize {
        self.rows.iter().map(|row| row.errors.len()).sum()
    }

    pub fn apply_to(&self, table: &mut Table) -> Result<(), KiraError> {
        for row in &self.rows {
            for (kind, column) in [
                (EntityKind::Strain, STRAIN_ID_COLUMN),
                (EntityKind::Gene, GENE_ID_COLUMN),
                (EntityKind::Protein, PROTEIN_ID_COLUMN),
            ] {
                if let Some(id) = row.entity_id(kind) {
                    table.set(row.row, column, id.as_str())?;
                }
            }
        }
        Ok(())
    }

    fn outcomes(&self) -> impl Iterator<Item = &BuildOutcome> {
        self.rows.iter().flat_map(|row| row.outcomes.iter())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichRow {
    pub row: usize,
    pub filled: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichReport {
    pub started_at: String,
    pub rows: Vec<EnrichRow>,
}

impl EnrichReport {
    pub fn cells_filled(&self) -> usize {
        self.rows.iter().map(|row| row.filled.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResult {
    pub label: String,
    pub language: String,
    pub resolution: ResolutionDisposition,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<Q: LabelQuery, S: EntityStore, C: SequenceClient> {
    config: ResolvedConfig,
    query: Q,
    store: S,
    sequences: C,
}

impl<Q: LabelQuery, S: EntityStore, C: SequenceClient> App<Q, S, C> {
    pub fn new(config: ResolvedConfig, query: Q, store: S, sequences: C) -> Self {
        Self {
            config,
            query,
            store,
            sequences,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn resolve(&self, label: &str) -> Result<ResolveResult, KiraError> {
        let resolver = self.resolver();
        let resolution = resolver.resolve(label)?;
        Ok(ResolveResult {
            label: label.to_string(),
            language: self.config.language.clone(),
            resolution,
        })
    }

    pub fn upsert(
        &self,
        table: &Table,
        options: &UpsertOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, KiraError> {
        let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        sink.event(ProgressEvent {
            message: format!(
                "phase=Upsert; rows={} kinds={} dry_run={}",
                table.len(),
                kinds_label(&options.kinds),
                options.dry_run
            ),
            elapsed: None,
        });

        if options.dry_run {
            let store = DryRunStore::new(&self.store);
            let rows = self.upsert_rows(&store, table, &options.kinds, sink)?;
            return Ok(RunReport {
                started_at,
                dry_run: true,
                rows,
                planned: store.planned(),
            });
        }

        let rows = self.upsert_rows(&self.store, table, &options.kinds, sink)?;
        Ok(RunReport {
            started_at,
            dry_run: false,
            rows,
            planned: Vec::new(),
        })
    }

    pub fn enrich(&self, table: &mut Table, sink: &dyn ProgressSink) -> Result<EnrichReport, KiraError> {
        let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let client = CachedSequenceClient::new(&self.sequences, self.config.ncbi_delay);
        let mut rows = Vec::new();

        for index in 0..table.len() {
            let start = Instant::now();
            let record = table.record(index)?;
            let nucleotide = record
                .nucleotide_accession()
                .map(|accession| client.nucleotide(accession))
                .unwrap_or_default();
            let protein = record
                .protein_accession()
                .map(|accession| client.protein(accession))
                .unwrap_or_default();

            let fills = enrichment_for(&record, &nucleotide, &protein);
            let mut filled = Vec::new();
            for (column, value) in fills {
                table.set(index, column, &value)?;
                filled.push(column.to_string());
            }

            sink.event(ProgressEvent {
                message: format!("row {index}: filled {}", filled.len()),
                elapsed: Some(start.elapsed()),
            });
            rows.push(EnrichRow { row: index, filled });
        }

        Ok(EnrichReport { started_at, rows })
    }

    fn resolver(&self) -> EntityResolver<'_, Q> {
        EntityResolver::new(&self.query, &self.config.language, self.config.retry)
    }

    fn upsert_rows<St: EntityStore + ?Sized>(
        &self,
        store: &St,
        table: &Table,
        kinds: &[EntityKind],
        sink: &dyn ProgressSink,
    ) -> Result<Vec<RowReport>, KiraError> {
        let mut builder = EntityBuilder::new(
            self.resolver(),
            store,
            &self.config.language,
            &self.config.items,
        );
        let mut reports = Vec::with_capacity(table.len());

        for index in 0..table.len() {
            let start = Instant::now();
            let report = self.upsert_row(&mut builder, table, index, kinds)?;
            sink.event(ProgressEvent {
                message: row_summary(&report),
                elapsed: Some(start.elapsed()),
            });
            reports.push(report);
        }

        Ok(reports)
    }

    fn upsert_row<St: EntityStore + ?Sized>(
        &self,
        builder: &mut EntityBuilder<'_, Q, St>,
        table: &Table,
        index: usize,
        kinds: &[EntityKind],
    ) -> Result<RowReport, KiraError> {
        let mut report = RowReport::new(index);
        let record = table.record(index).and_then(|record| {
            let links = Links::from_record(&record)?;
            Ok((record, links))
        });
        let (record, mut links) = match record {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(row = index, error = %err, "row skipped");
                report.errors.extend(kinds.iter().map(|kind| KindError {
                    kind: *kind,
                    message: err.to_string(),
                }));
                return Ok(report);
            }
        };

        let mut gene_built_here = false;
        for kind in EntityKind::ALL.into_iter().filter(|kind| kinds.contains(kind)) {
            match builder.build(kind, &record, &links) {
                Ok(outcome) => {
                    let entity = outcome.entity.clone().filter(|_| outcome.is_built());
                    let slot = match kind {
                        EntityKind::Strain => &mut links.strain,
                        EntityKind::Gene => &mut links.gene,
                        EntityKind::Protein => &mut links.protein,
                    };
                    if slot.is_none() {
                        *slot = entity;
                    }
                    if kind == EntityKind::Gene && outcome.is_built() {
                        gene_built_here = links.protein.is_none();
                    }
                    report.outcomes.push(outcome);
                }
                Err(err) if err.is_record_scoped() => {
                    warn!(row = index, %kind, error = %err, "record skipped");
                    report.errors.push(KindError {
                        kind,
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        // The gene was built before its protein existed.
        if gene_built_here && links.protein.is_some() {
            match builder.add_encodes(links.gene.as_ref(), links.protein.as_ref()) {
                Ok(claim) => report.encodes = Some(claim),
                Err(err) if err.is_record_scoped() => {
                    warn!(row = index, error = %err, "encodes claim not written");
                    report.errors.push(KindError {
                        kind: EntityKind::Gene,
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            row = index,
            built = report.outcomes.iter().filter(|o| o.is_built()).count(),
            errors = report.errors.len(),
            "row processed"
        );
        Ok(report)
    }
}

fn kinds_label(kinds: &[EntityKind]) -> String {
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn row_summary(report: &RowReport) -> String {
    let mut parts = Vec::new();
    for outcome in &report.outcomes {
        let entity = outcome
            .entity
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        parts.push(format!(
            "{} {:?} {entity} (+{} claims)",
            outcome.kind,
            outcome.status,
            outcome.claims_added()
        ));
    }
    for error in &report.errors {
        parts.push(format!("{} error: {}", error.kind, error.message));
    }
    format!("row {}: {}", report.row, parts.join("; "))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::ncbi::{DocumentSummary, SequenceDb};
    use crate::output::JsonOutput;
    use crate::store::MemoryStore;

    #[derive(Default)]
    struct MockSequences {
        calls: Mutex<usize>,
    }

    impl SequenceClient for MockSequences {
        fn summary(
            &self,
            db: SequenceDb,
            _accession: &str,
        ) -> Result<Option<DocumentSummary>, KiraError> {
            *self.calls.lock().unwrap() += 1;
            let title = match db {
                SequenceDb::Nucleotide => {
                    "Escherichia coli blaTEM-1 gene for class A beta-lactamase TEM-1, complete CDS"
                }
                SequenceDb::Protein => "MULTISPECIES: class A beta-lactamase TEM-1 [Enterobacteriaceae]",
            };
            Ok(Some(DocumentSummary {
                title: title.to_string(),
                organism: "Escherichia coli".to_string(),
                taxid: Some(562),
                subtype: "strain".to_string(),
                subname: "K-12".to_string(),
            }))
        }
    }

    fn app() -> App<MemoryStore, MemoryStore, MockSequences> {
        let mut config = ResolvedConfig::default();
        config.ncbi_delay = Duration::ZERO;
        App::new(config, MemoryStore::new(), MemoryStore::new(), MockSequences::default())
    }

    #[test]
    fn enrich_fills_only_empty_cells() {
        let input = "refseq_nucleotide_accession,refseq_protein_accession,refseq_gene,product_name\n\
                     NG_050145.1,WP_000027057.1,,\n\
                     NG_050145.1,WP_000027057.1,blaTEM-1b,\n";
        let mut table = Table::from_reader(input.as_bytes(), b',').unwrap();
        let app = app();

        let report = app.enrich(&mut table, &JsonOutput).unwrap();

        assert_eq!(table.get(0, "refseq_gene"), Some("Escherichia coli blaTEM-1"));
        assert_eq!(table.get(1, "refseq_gene"), Some("blaTEM-1b"));
        assert_eq!(table.get(0, "product_name"), Some("class A beta-lactamase TEM-1"));
        assert_eq!(table.get(0, "genbank_organism2"), Some("Escherichia coli K-12"));
        assert_eq!(table.get(0, "genbank_tax_id"), Some("taxon:562"));
        assert_eq!(report.rows[1].filled.len(), 3);
        // Two accessions, fetched once each.
        assert_eq!(*app.sequences.calls.lock().unwrap(), 2);
    }
}
