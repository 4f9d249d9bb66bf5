//! Integration tests: config loading, policy construction, authentication, forwarding verdicts.

use secure_tunnel::{
    AuditLogger, Config, ConfigError, ServerPolicy, SessionDispatcher, Verdict,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write_config(dir: &Path, forwarding: &str) -> std::path::PathBuf {
    let base = dir.join("sandbox");
    fs::create_dir_all(&base).unwrap();
    let raw = format!(
        r#"
[server]
host = "127.0.0.1"
port = 2022
username = "admin"
password = "s3cret"

[forwarding]
{forwarding}

[directories]
base_directory = "{base}"
"#,
        base = base.display()
    );
    let path = dir.join("config.toml");
    fs::write(&path, raw).unwrap();
    path
}

fn dispatcher(config_path: &Path) -> SessionDispatcher {
    let config = Config::load(config_path).unwrap();
    let policy = ServerPolicy::from_config(&config).unwrap();
    SessionDispatcher::new(
        Arc::new(policy),
        Arc::new(AuditLogger::disabled()),
        "127.0.0.1:51000",
    )
}

#[test]
fn missing_config_file_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let err = Config::load(&tmp.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
}

#[test]
fn defaults_fill_optional_groups() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(tmp.path(), "");
    let config = Config::load(&path).unwrap();
    assert!(config.forwarding.allow_local_forwarding);
    assert_eq!(config.forwarding.allowed_ports, "1024-65535");
    assert_eq!(config.logging.log_level, "info");
    assert!(config.audit.enabled);

    let policy = ServerPolicy::from_config(&config).unwrap();
    assert_eq!(policy.approved_roots, vec![policy.sandbox_root.clone()]);
}

#[test]
fn authentication_is_exact_match_only() {
    let tmp = TempDir::new().unwrap();
    let mut d = dispatcher(&write_config(tmp.path(), ""));

    for (user, pass) in [
        ("Admin", "s3cret"),
        ("admin", "S3cret"),
        ("admin ", "s3cret"),
        ("admin", "s3cret "),
        ("admin", ""),
        ("", "s3cret"),
    ] {
        assert!(!d.on_password_auth(user, pass), "{user:?}/{pass:?}");
    }
    assert!(!d.is_authenticated());
    assert!(d.on_password_auth("admin", "s3cret"));
    assert!(d.on_session_requested().is_some());
}

#[test]
fn all_switches_off_denies_every_forward() {
    let tmp = TempDir::new().unwrap();
    let mut d = dispatcher(&write_config(
        tmp.path(),
        "allow_local_forwarding = false\nallow_remote_forwarding = false\nallow_socks = false",
    ));
    d.on_password_auth("admin", "s3cret");

    assert_eq!(
        d.on_local_forward_requested("localhost", 5432, "127.0.0.1", 50001),
        Verdict::Denied
    );
    assert_eq!(d.on_remote_forward_requested("localhost", 8080), Verdict::Denied);
    assert_eq!(d.on_remote_forward_requested("127.0.0.1", 2022), Verdict::Denied);
}

#[test]
fn malformed_port_range_denies_remote_forwards() {
    let tmp = TempDir::new().unwrap();
    let mut d = dispatcher(&write_config(tmp.path(), "allowed_ports = \"high-low\""));
    d.on_password_auth("admin", "s3cret");

    for port in [1024, 8080, 65535] {
        assert_eq!(d.on_remote_forward_requested("localhost", port), Verdict::Denied);
    }
    // Local forwarding is unaffected by the remote rules.
    assert_eq!(
        d.on_local_forward_requested("db.internal", 5432, "127.0.0.1", 50001),
        Verdict::Approved
    );
}

#[test]
fn remote_forward_host_list_is_configurable() {
    let tmp = TempDir::new().unwrap();
    let mut d = dispatcher(&write_config(
        tmp.path(),
        "allowed_hosts = \"0.0.0.0\"\nallowed_ports = \"8000-8100\"",
    ));
    d.on_password_auth("admin", "s3cret");

    assert_eq!(d.on_remote_forward_requested("0.0.0.0", 8050), Verdict::Approved);
    assert_eq!(d.on_remote_forward_requested("localhost", 8050), Verdict::Denied);
    assert_eq!(d.on_remote_forward_requested("0.0.0.0", 8101), Verdict::Denied);
}

#[test]
fn base_outside_allowed_directories_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let other = TempDir::new().unwrap();
    let path = write_config(tmp.path(), "");
    let mut raw = fs::read_to_string(&path).unwrap();
    raw.push_str(&format!("allowed_directories = \"{}\"\n", other.path().display()));
    fs::write(&path, raw).unwrap();

    let config = Config::load(&path).unwrap();
    assert!(matches!(
        ServerPolicy::from_config(&config),
        Err(ConfigError::Invalid(_))
    ));
}
