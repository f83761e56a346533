use std::time::Duration;

use assert_matches::assert_matches;
use kira_kb_enricher::config::{Config, ConfigLoader, RetryEntry};
use kira_kb_enricher::domain::{Property, WellKnownItem};
use kira_kb_enricher::error::KiraError;

#[test]
fn file_overrides_defaults() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-kb.json");
    std::fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "language": "EN",
            "api_endpoint": "https://wikibase.example.org/w/api.php",
            "retry": {"max_attempts": 7, "base_delay_ms": 10},
            "properties": {"confers-resistance-to": "p1234"},
            "items": {"antibiotic-resistance": "http://www.wikidata.org/entity/Q999"},
            "ncbi": {"delay_ms": 100}
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();

    assert_eq!(resolved.language, "en");
    assert_eq!(resolved.api_endpoint, "https://wikibase.example.org/w/api.php");
    assert_eq!(resolved.retry.max_attempts, 7);
    assert_eq!(resolved.retry.base_delay, Duration::from_millis(10));
    assert_eq!(resolved.retry.max_delay, Duration::from_secs(8));
    assert_eq!(resolved.properties.id(Property::ConfersResistanceTo), "P1234");
    assert_eq!(resolved.properties.id(Property::FoundInTaxon), "P703");
    assert_eq!(
        resolved.items.id(WellKnownItem::AntibioticResistance).as_str(),
        "Q999"
    );
    assert_eq!(resolved.ncbi_delay, Duration::from_millis(100));
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(KiraError::ConfigRead(_))
    );
}

#[test]
fn invalid_json_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-kb.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(KiraError::ConfigParse(_))
    );
}

#[test]
fn zero_attempts_rejected() {
    let config = Config {
        retry: Some(RetryEntry {
            max_attempts: Some(0),
            base_delay_ms: None,
            max_delay_ms: None,
        }),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(KiraError::ConfigParse(_))
    );
}

#[test]
fn item_override_must_be_an_entity() {
    let mut config = Config::default();
    config
        .items
        .insert(WellKnownItem::Gene, "P31".to_string());
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(KiraError::InvalidEntityId(_))
    );
}
