//! Integration tests: sandboxed shell sessions driven through the public engine API.

use secure_tunnel::{
    AuditConfig, AuditLogger, Credentials, ForwardingRules, ServerPolicy, ShellEngine, ShellState,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn policy(base: &Path, roots: &[&Path]) -> Arc<ServerPolicy> {
    let roots: Vec<_> = roots.iter().map(|p| p.to_path_buf()).collect();
    Arc::new(
        ServerPolicy::new(
            Credentials {
                username: "admin".into(),
                password: "secret".into(),
            },
            ForwardingRules::default(),
            base,
            &roots,
        )
        .unwrap(),
    )
}

fn engine(policy: Arc<ServerPolicy>) -> ShellEngine {
    let mut e = ShellEngine::new(
        policy,
        Arc::new(AuditLogger::disabled()),
        "admin",
        "127.0.0.1:40000",
    );
    e.start();
    e
}

fn run(e: &mut ShellEngine, line: &str) -> String {
    let mut input = line.as_bytes().to_vec();
    input.push(b'\r');
    String::from_utf8_lossy(&e.feed(&input).output).into_owned()
}

#[test]
fn traversal_out_of_root_is_denied_and_cwd_kept() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir(&data).unwrap();
    let mut e = engine(policy(&data, &[&data]));
    let before = e.session().cwd().to_path_buf();

    let out = run(&mut e, "cd ../etc");
    assert!(out.contains("cd: permission denied"));
    assert_eq!(e.session().cwd(), before);

    let out = run(&mut e, "pwd");
    assert!(out.contains(&format!("{}\r\n", before.display())));
}

#[test]
fn sibling_with_shared_prefix_is_not_approved() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let data2 = tmp.path().join("data2");
    fs::create_dir(&data).unwrap();
    fs::create_dir(&data2).unwrap();
    fs::write(data2.join("secret.txt"), "nope").unwrap();
    let mut e = engine(policy(&data, &[&data]));

    let out = run(&mut e, &format!("cat {}", data2.join("secret.txt").display()));
    assert!(out.contains("cat: permission denied"));
    assert!(!out.contains("nope"));
}

#[test]
fn mkdir_then_ls_lists_sorted_entries() {
    let tmp = TempDir::new().unwrap();
    let mut e = engine(policy(tmp.path(), &[tmp.path()]));
    fs::write(tmp.path().join("zeta.txt"), "12345").unwrap();

    run(&mut e, "mkdir sub");
    let out = run(&mut e, "ls");
    let sub = out.find("sub/\r\n").expect("sub listed");
    let zeta = out.find("zeta.txt  (5 bytes)\r\n").expect("zeta listed");
    assert!(sub < zeta);
}

#[test]
fn rm_missing_file_reports_not_found() {
    let tmp = TempDir::new().unwrap();
    let mut e = engine(policy(tmp.path(), &[tmp.path()]));
    let out = run(&mut e, "rm missing.txt");
    assert!(out.contains("rm: not found: missing.txt"));
    assert_eq!(e.state(), ShellState::Reading);
}

#[cfg(unix)]
#[test]
fn symlink_pointing_outside_is_denied() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("root");
    let outside = tmp.path().join("outside");
    fs::create_dir(&root).unwrap();
    fs::create_dir(&outside).unwrap();
    fs::write(outside.join("loot"), "x").unwrap();
    std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

    let mut e = engine(policy(&root, &[&root]));
    assert!(run(&mut e, "ls link").contains("ls: permission denied"));
    assert!(run(&mut e, "rm link/loot").contains("rm: permission denied"));
    assert!(outside.join("loot").exists());
}

#[test]
fn second_approved_root_is_reachable() {
    let tmp = TempDir::new().unwrap();
    let home = tmp.path().join("home");
    let shared = tmp.path().join("shared");
    fs::create_dir(&home).unwrap();
    fs::create_dir(&shared).unwrap();
    let mut e = engine(policy(&home, &[&home, &shared]));

    let out = run(&mut e, &format!("cd {}", shared.display()));
    assert!(!out.contains("denied"));
    assert_eq!(e.session().cwd(), shared.canonicalize().unwrap());

    run(&mut e, "cd");
    assert_eq!(e.session().cwd(), home.canonicalize().unwrap());
}

#[test]
fn path_violations_are_audited() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir(&root).unwrap();
    let audit = Arc::new(AuditLogger::new(
        AuditConfig {
            enabled: true,
            log_path: "audit.log".into(),
            max_size_mb: 10,
        },
        tmp.path().to_path_buf(),
    ));
    let mut e = ShellEngine::new(policy(&root, &[&root]), audit, "admin", "peer");
    e.start();
    run(&mut e, "cat ../../etc/passwd");

    let log = fs::read_to_string(tmp.path().join("audit.log")).unwrap();
    assert!(log.contains("\"path_violation\""));
    assert!(log.contains("\"cat\""));
}

#[tokio::test]
async fn full_session_over_a_stream() {
    let tmp = TempDir::new().unwrap();
    let e = ShellEngine::new(
        policy(tmp.path(), &[tmp.path()]),
        Arc::new(AuditLogger::disabled()),
        "admin",
        "peer",
    );
    let (mut client, mut server) = tokio::io::duplex(8192);
    let task = tokio::spawn(async move { e.run(&mut server).await });

    client
        .write_all(b"mkdir box\r\ncd box\r\ntouch a.txt\r\nls\r\nquit\r\n")
        .await
        .unwrap();
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    task.await.unwrap().unwrap();

    let out = String::from_utf8_lossy(&out);
    assert!(out.contains("a.txt  (0 bytes)\r\n"));
    assert!(out.contains("Goodbye!\r\n"));
    assert!(tmp.path().join("box").join("a.txt").is_file());
}

#[cfg(unix)]
#[test]
fn rm_of_a_symlink_keeps_the_target() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("real.txt"), "data").unwrap();
    std::os::unix::fs::symlink(tmp.path().join("real.txt"), tmp.path().join("alias")).unwrap();
    let mut e = engine(policy(tmp.path(), &[tmp.path()]));

    let out = run(&mut e, "rm alias");
    assert!(out.contains("removed"));
    assert!(tmp.path().join("real.txt").is_file());
    assert!(fs::symlink_metadata(tmp.path().join("alias")).is_err());
}

#[test]
fn flooding_without_newline_stays_bounded() {
    let tmp = TempDir::new().unwrap();
    let mut e = engine(policy(tmp.path(), &[tmp.path()]));
    let flood = vec![b'x'; 1 << 20];
    let echoed = e.feed(&flood).output.len();
    assert!(echoed <= secure_tunnel::shell::MAX_LINE_BYTES + 1);
    let out = run(&mut e, "");
    assert!(out.len() < secure_tunnel::shell::MAX_LINE_BYTES + 256);
}
