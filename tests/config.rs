use std::collections::HashMap;
use std::time::Duration;

use assert_matches::assert_matches;

use kira_snp_harvester::config::{Config, ConfigLoader};
use kira_snp_harvester::error::HarvestError;

#[test]
fn flags_override_env_override_file() {
    let file: Config = serde_json::from_str(
        r#"{"allele":"R","page_size":100,"timeout_secs":30,"output_dir":"data"}"#,
    )
    .unwrap();
    let vars: HashMap<&str, &str> = [("KIRA_SNP_ALLELE", "K"), ("KIRA_SNP_PAGE_SIZE", "200")]
        .into_iter()
        .collect();
    let env = ConfigLoader::from_vars(|name| vars.get(name).map(|v| v.to_string())).unwrap();
    let flags = Config {
        page_size: Some(300),
        ..Config::default()
    };

    let resolved = ConfigLoader::resolve_config(file.overlay(env).overlay(flags)).unwrap();
    assert_eq!(resolved.dataset.allele.as_str(), "K");
    assert_eq!(resolved.page_size, 300);
    assert_eq!(resolved.eutils.timeout, Duration::from_secs(30));
    assert_eq!(resolved.output_dir.as_str(), "data");
}

#[test]
fn unknown_fields_are_rejected() {
    let parsed = serde_json::from_str::<Config>(r#"{"allele":"Y","retries":3}"#);
    assert!(parsed.is_err());
}

#[test]
fn explicit_term_wins_over_default() {
    let config = Config {
        term: Some("rs334[RS]".to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.term, "rs334[RS]");
}

#[test]
fn invalid_allele_is_reported() {
    let config = Config {
        allele: Some("c/t".to_string()),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(HarvestError::InvalidAllele(_))
    );
}

#[test]
fn backoff_bounds_come_from_config() {
    let config = Config {
        backoff_base_ms: Some(100),
        backoff_max_ms: Some(250),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.backoff.delay(1), Duration::from_millis(100));
    assert_eq!(resolved.backoff.delay(2), Duration::from_millis(200));
    assert_eq!(resolved.backoff.delay(3), Duration::from_millis(250));
}
