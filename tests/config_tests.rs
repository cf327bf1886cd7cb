//! Configuration loading and environment overrides.


use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use systest::context;
use systest::settings::{self, HarnessConfig, LogFormat};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[systest::test]
fn defaults_are_usable() {
    let cfg = HarnessConfig::default();
    assert!(cfg.namespace.is_empty());
    assert_eq!(cfg.cluster_size, 10);
    assert_eq!(cfg.preset, "fastnet");
    assert_eq!(cfg.log_format, LogFormat::Text);
    assert!(cfg.install_signal_handler);
    assert_eq!(cfg.probe.attempts, 10);
    assert_eq!(cfg.probe.poll_interval(), Duration::from_millis(200));
    assert_eq!(cfg.bootstrap_duration(), Duration::from_secs(30));
}

#[systest::test]
fn toml_file_overrides_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
image = "registry.local/peer:v2"
cluster_size = 4
test_timeout_secs = 120
log_format = "json"

[node_selector]
pool = "tests"

[probe]
attempts = 3
"#
    )
    .unwrap();

    let cfg = HarnessConfig::load(Some(file.path())).unwrap();
    assert_eq!(cfg.image, "registry.local/peer:v2");
    assert_eq!(cfg.cluster_size, 4);
    assert_eq!(cfg.test_timeout(), Duration::from_secs(120));
    assert_eq!(cfg.log_format, LogFormat::Json);
    assert_eq!(cfg.node_selector.get("pool").map(String::as_str), Some("tests"));
    assert_eq!(cfg.probe.attempts, 3);
    // Unset fields keep their defaults.
    assert_eq!(cfg.probe.dial_timeout_ms, 5_000);
    assert_eq!(cfg.preset, "fastnet");
}

#[systest::test]
fn malformed_file_is_reported_with_its_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "cluster_size = \"many\"").unwrap();
    let err = HarnessConfig::load(Some(file.path())).unwrap_err();
    assert!(format!("{err:#}").contains("parse config"), "{err:#}");
}

#[systest::test]
fn environment_overrides_apply() {
    let mut cfg = HarnessConfig::default();
    cfg.apply_env(lookup(&[
        ("SYSTEST_IMAGE", "peer:dev"),
        ("SYSTEST_NAMESPACE", "test-abcd"),
        ("SYSTEST_SIZE", "20"),
        ("SYSTEST_BOOTSTRAP_SECS", "5"),
        ("SYSTEST_NODE_SELECTOR", "smth=101, else=102"),
        ("SYSTEST_LOG_FORMAT", "JSON"),
    ]))
    .unwrap();

    assert_eq!(cfg.image, "peer:dev");
    assert_eq!(cfg.namespace, "test-abcd");
    assert_eq!(cfg.cluster_size, 20);
    assert_eq!(cfg.bootstrap_duration(), Duration::from_secs(5));
    assert_eq!(cfg.node_selector.len(), 2);
    assert_eq!(cfg.node_selector["else"], "102");
    assert_eq!(cfg.log_format, LogFormat::Json);
}

#[systest::test]
fn invalid_environment_values_fail() {
    let mut cfg = HarnessConfig::default();
    let err = cfg.apply_env(lookup(&[("SYSTEST_SIZE", "ten")])).unwrap_err();
    assert!(format!("{err:#}").contains("SYSTEST_SIZE"), "{err:#}");

    let err = cfg
        .apply_env(lookup(&[("SYSTEST_LOG_FORMAT", "xml")]))
        .unwrap_err();
    assert!(err.to_string().contains("xml"));
}

#[systest::test]
fn key_values_parse() {
    let parsed = settings::parse_key_values("smth=101,else=102").unwrap();
    assert_eq!(parsed["smth"], "101");
    assert_eq!(parsed["else"], "102");
    assert!(settings::parse_key_values("  ").unwrap().is_empty());
    assert!(settings::parse_key_values("novalue").is_err());
}

#[systest::test]
fn random_namespaces_have_the_test_prefix() {
    for _ in 0..20 {
        let ns = context::random_namespace();
        assert_eq!(ns.len(), 9);
        let suffix = ns.strip_prefix("test-").unwrap();
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase()), "{ns}");
    }
}
