use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
    time::{SystemTime, UNIX_EPOCH},
};

fn bin_path() -> PathBuf {
    let exe = std::env::current_exe().expect("failed to locate test binary");
    let target_dir = exe
        .parent()
        .and_then(|p| p.parent())
        .expect("unexpected test binary path");
    let candidate = target_dir.join("strata.exe");
    if candidate.exists() {
        candidate
    } else {
        target_dir.join("strata")
    }
}

fn make_temp_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("strata_cli_bin_test_{}_{}", tag, nanos));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn db_url(root: &Path) -> String {
    let db_path = root.join("test.db");
    format!("sqlite:{}", db_path.to_string_lossy().replace('\\', "/"))
}

fn run(root: &Path, args: &[&str]) -> (bool, String) {
    let output = Command::new(bin_path())
        .current_dir(root)
        .env_remove("DATABASE_URL")
        .args(args)
        .output()
        .expect("failed to run strata");
    (
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
    )
}

#[test]
fn cli_main_runs_init() {
    let root = make_temp_dir("init");
    let (ok, stdout) = run(&root, &["init"]);
    assert!(ok, "{}", stdout);
    assert!(root.join("models.json").exists());
    let (ok, stdout) = run(&root, &["init"]);
    assert!(ok);
    assert!(stdout.contains("already exists"));
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn cli_main_syncs_the_starter_manifest() {
    let root = make_temp_dir("sync");
    let url = db_url(&root);
    assert!(run(&root, &["init"]).0);

    let (ok, stdout) = run(&root, &["sync", "--database", &url, "--dry-run"]);
    assert!(ok, "{}", stdout);
    assert!(stdout.contains("CREATE TABLE \"partner\""), "{}", stdout);

    let (ok, stdout) = run(&root, &["sync", "--database", &url]);
    assert!(ok, "{}", stdout);
    assert!(stdout.contains("[OK] Sync completed"), "{}", stdout);
    assert!(root.join("test.db").exists());

    let (ok, stdout) = run(&root, &["sync", "--database", &url]);
    assert!(ok);
    assert!(stdout.contains("already up to date"), "{}", stdout);

    let (ok, stdout) = run(&root, &["diff", "--database", &url]);
    assert!(ok);
    assert!(stdout.contains("[OK] Schema diff complete."));
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn cli_main_fails_on_a_broken_manifest() {
    let root = make_temp_dir("broken");
    fs::write(
        root.join("models.json"),
        r#"{"models":[{"name":"A","fields":[{"name":"B","type":"many2one","relation":"Nope"}]}]}"#,
    )
    .unwrap();
    let url = db_url(&root);
    let (ok, _) = run(&root, &["sync", "--database", &url]);
    assert!(!ok);
    let _ = fs::remove_dir_all(&root);
}
