use offline_shell_cache::config::OfflineConfig;
use offline_shell_cache::{Generation, OfflineError};
use std::io::Write;

fn write_config(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_sample_config() {
    let config = OfflineConfig::from_file("offline_shell_cache.yaml");
    assert!(config.is_ok(), "Failed to load sample config: {:?}", config.err());

    let config = config.unwrap();
    assert_eq!(config.generation(), Generation::from("handtap-v6"));
    assert_eq!(config.media.path, "./assets/hand-loop.mp4");
    assert_eq!(config.listen_address, "127.0.0.1:3000");
    assert!(config.metrics_endpoint.unwrap().enabled);
}

#[test]
fn test_load_minimal_config() {
    let file = write_config(
        r#"
scope: "http://app.test/hand/"
"#,
    );

    let config = OfflineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.cache_prefix, "handtap");
    assert_eq!(config.version, "v6");
    assert_eq!(config.fetch_timeout_secs, 10);
    assert_eq!(config.max_concurrent_installs, 4);
    assert!(config.navigation_preload);
    assert!(config.offline_fallback.is_none());
    assert_eq!(
        config.media_url().unwrap().as_str(),
        "http://app.test/hand/assets/hand-loop.mp4"
    );
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
cache_prefix: hand-launch
version: v1
scope: "https://hand.example.com/app/"
shell_document: ./shell.html
media:
  path: ./media/loop.webm?cachebust=1
  content_type: video/webm
  cache_control: "public, max-age=60"
offline_fallback: ./offline.html
precache:
  - ./
  - ./style.css
fetch_timeout_secs: 3
max_concurrent_installs: 2
navigation_preload: false
persistence_dir: /var/cache/hand
listen_address: "0.0.0.0:8081"
metrics_endpoint:
  enabled: true
  address: "127.0.0.1:9191"
"#,
    );

    let config = OfflineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.generation().as_str(), "hand-launch-v1");
    assert_eq!(config.media.content_type, "video/webm");
    assert_eq!(
        config.media_url().unwrap().as_str(),
        "https://hand.example.com/app/media/loop.webm"
    );
    assert_eq!(
        config.install_paths(),
        vec![
            "./",
            "./style.css",
            "./shell.html",
            "./media/loop.webm?cachebust=1",
            "./offline.html",
        ]
    );
    assert_eq!(config.persistence_dir.as_deref(), Some("/var/cache/hand"));
}

#[test]
fn test_invalid_configs_rejected() {
    let cases = [
        "version: \"\"\n",
        "cache_prefix: \"bad/prefix\"\n",
        "scope: \"ftp://app.test/\"\n",
        "scope: \"not a url\"\n",
        "fetch_timeout_secs: 0\n",
        "max_concurrent_installs: 0\n",
        "listen_address: \"nowhere\"\n",
        "precache:\n  - \"https://cdn.example.com/icon.png\"\n",
        "metrics_endpoint:\n  enabled: true\n  address: \"bad\"\n",
    ];

    for yaml in cases {
        let file = write_config(yaml);
        let result = OfflineConfig::from_file(file.path());
        assert!(
            matches!(result, Err(OfflineError::ConfigError(_))),
            "accepted invalid config: {}",
            yaml
        );
    }
}

#[test]
fn test_load_nonexistent_file() {
    let config = OfflineConfig::from_file("nonexistent.yaml");
    assert!(matches!(config, Err(OfflineError::ConfigError(_))));
}

#[test]
fn test_malformed_yaml() {
    let file = write_config("precache: [unterminated\n");
    assert!(OfflineConfig::from_file(file.path()).is_err());
}
