use super::*;

const CONFIG: &str = r#"
[database]
url = "sqlite::memory:"
max_connections = 1
acquire_timeout = 5

[scraper]
retry_attempts = 2
retry_delay_ms = 100
retry_max_delay_ms = 1000
request_timeout = 30
step_timeout = 10
user_agent = "TenderBot-Test/1.0"
max_items_per_source = 25

[scheduler]
interval_secs = 600
fail_on = "any_source"

[relevance]
keywords = ["software", "cloud"]

[[sources]]
name = "portal"
url = "https://portal.example.gov.au/open"
wait_for = "table.results"

[sources.extract]
format = "html"
row = "table.results tr"
title = "td.title a"

[[sources]]
name = "feed"
url = "https://feed.example.gov.au/api"
fetch = "http"
enabled = false

[sources.extract]
format = "json"
items = "/items"
title = "/name"
"#;

#[test]
fn test_load_explicit_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_fixture(dir.path(), "tenderbot.toml", CONFIG);

    let config = AppConfig::load(Some(&path))?;

    assert_eq!(config.scraper.max_items_per_source, 25);
    assert_eq!(config.scheduler.fail_on, FailurePolicy::AnySource);
    assert_eq!(config.relevance.keywords, vec!["software", "cloud"]);
    assert_eq!(config.sources.len(), 2);

    let active = config.active_sources(&[])?;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name, "portal");

    assert!(config.active_sources(&["nope".to_string()]).is_err());
    // Naming only disabled sources leaves nothing to run.
    assert!(config.active_sources(&["feed".to_string()]).is_err());

    Ok(())
}

#[test]
fn test_invalid_file_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let broken = CONFIG.replace("row = \"table.results tr\"", "row = \"table[[\"");
    let path = write_fixture(dir.path(), "tenderbot.toml", &broken);

    let err = AppConfig::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("invalid CSS selector"));

    Ok(())
}

#[test]
fn test_shipped_default_config_is_valid() -> anyhow::Result<()> {
    let config = AppConfig::load(Some(Path::new("config/default.toml")))?;

    let names: Vec<_> = config.active_sources(&[])?.into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["austender", "qtenders", "tendersvic"]);

    Ok(())
}
