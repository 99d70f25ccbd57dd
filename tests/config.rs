use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_spatial_features::config::{ConfigLoader, FallbackPolicy, IndexPolicy, SourceConfig};
use kira_spatial_features::error::FeatureError;

#[test]
fn resolve_reads_explicit_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-sf.json");
    std::fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "source": {"path": "/srv/palate/binary"},
            "store": {"fallback": "zero_fill", "index_policy": "reject"}
        }"#,
    )
    .unwrap();

    let config = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(
        config.source,
        SourceConfig::Path {
            path: Utf8PathBuf::from("/srv/palate/binary")
        }
    );
    assert_eq!(config.store.fallback, FallbackPolicy::ZeroFill);
    assert_eq!(config.store.index_policy, IndexPolicy::Reject);
    assert!(!config.store.strict_names);
}

#[test]
fn resolve_missing_explicit_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, FeatureError::ConfigRead(_));
}

#[test]
fn parse_rejects_unknown_schema_and_bad_json() {
    let err = ConfigLoader::parse(r#"{"schema_version": 2, "source": {"url": "http://x"}}"#)
        .unwrap_err();
    assert_matches!(err, FeatureError::ConfigParse(_));

    let err = ConfigLoader::parse(r#"{"store": {}}"#).unwrap_err();
    assert_matches!(err, FeatureError::ConfigParse(_));
}
