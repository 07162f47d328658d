#![cfg(unix)]

use std::io::{Read as _, Write as _};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc;
use std::time::Duration;

use brix_harness::fsutil;

struct CiCheckout {
    root: PathBuf,
    tool_log: PathBuf,
    runner_marker: PathBuf,
}

fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt as _;
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("chmod script");
}

/// Lay out a minimal brix checkout whose prebuilt tool is a shell script.
/// The script logs `argv0|argv` per invocation, recreates the catalog on
/// `catalog import` (flagging a stale database if one exists), and
/// "builds" by copying itself to the build output path.
fn setup_checkout(tag: &str, build_exit: u8) -> CiCheckout {
    let root = fsutil::create_temp_dir(&format!("brix_ci_{tag}")).expect("create checkout");
    let tool_log = root.join("tool.log");
    let runner_marker = root.join("runner.log");

    std::fs::write(root.join("catalog.json"), b"{ \"version\": 1, \"packages\": {} }\n")
        .expect("write catalog definition");
    std::fs::write(
        root.join("toolchain.json5"),
        b"{\n  // structured descriptor for phase 2\n  \"compiler_id\": \"gnu\"\n}\n",
    )
    .expect("write toolchain descriptor");

    std::fs::create_dir_all(root.join("_prebuilt")).expect("create prebuilt dir");
    write_script(
        &root.join("_prebuilt/brix"),
        &format!(
            r#"log="{log}"
printf '%s|%s\n' "$0" "$*" >> "$log"
catalog=""
out=""
for a in "$@"; do
  case "$a" in
    --catalog=*) catalog="${{a#--catalog=}}" ;;
    --out=*) out="${{a#--out=}}" ;;
  esac
done
if [ "$1" = catalog ] && [ "$2" = import ]; then
  if [ -e "$catalog" ]; then printf 'stale-catalog\n' >> "$log"; fi
  mkdir -p "$(dirname "$catalog")"
  : > "$catalog"
fi
if [ "$1" = build ]; then
  if [ "{build_exit}" != 0 ]; then exit {build_exit}; fi
  mkdir -p "$out"
  cp "$0" "$out/brix"
fi
exit 0"#,
            log = tool_log.display(),
            build_exit = build_exit,
        ),
    );

    write_script(
        &root.join("runner.sh"),
        &format!(
            "printf '%s\\n' \"$*\" >> \"{}\"\nexit 0",
            runner_marker.display()
        ),
    );

    CiCheckout {
        root,
        tool_log,
        runner_marker,
    }
}

/// Serve exactly one HTTP request with the given status and body, and
/// hand the request line back for inspection.
fn serve_artifact_once(status_line: &str, body: Vec<u8>) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let (tx, rx) = mpsc::channel();

    let status_line = status_line.to_string();
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

        let mut buf = Vec::new();
        let mut tmp = [0u8; 4096];
        for _ in 0..64 {
            match stream.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => {
                    buf.extend_from_slice(&tmp[..n]);
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let head = String::from_utf8_lossy(&buf)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        let _ = tx.send(head);

        let mut resp = format!(
            "HTTP/1.1 {status_line}\r\n\
Content-Type: application/octet-stream\r\n\
Content-Length: {}\r\n\
Connection: close\r\n\
\r\n",
            body.len()
        )
        .into_bytes();
        resp.extend_from_slice(&body);
        stream.write_all(&resp).expect("write response");
        let _ = stream.flush();
    });

    (format!("http://{addr}"), rx)
}

fn run_ci(checkout: &CiCheckout, extra: &[&str]) -> std::process::Output {
    run_ci_with_mode(checkout, "skip", extra)
}

fn run_ci_with_mode(checkout: &CiCheckout, mode: &str, extra: &[&str]) -> std::process::Output {
    let exe = env!("CARGO_BIN_EXE_brix-ci");
    let mut args = vec![
        "--bootstrap-with".to_string(),
        mode.to_string(),
        "-T".to_string(),
        ":gcc".to_string(),
        "--project-root".to_string(),
        checkout.root.display().to_string(),
        "--test-runner".to_string(),
        checkout.root.join("runner.sh").display().to_string(),
        "-j2".to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    Command::new(exe)
        .args(&args)
        .current_dir(&checkout.root)
        .output()
        .expect("run brix-ci")
}

fn tool_invocations(checkout: &CiCheckout) -> Vec<(String, String)> {
    let text = std::fs::read_to_string(&checkout.tool_log).unwrap_or_default();
    text.lines()
        .map(|line| {
            let (argv0, args) = line.split_once('|').expect("log line shape");
            (argv0.to_string(), args.to_string())
        })
        .collect()
}

#[test]
fn full_pipeline_runs_both_phases_then_delegates() {
    let checkout = setup_checkout("full", 0);
    let json5 = checkout.root.join("toolchain.json5");
    let out = run_ci(
        &checkout,
        &["--toolchain-json5", json5.to_str().unwrap()],
    );
    assert!(
        out.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );

    let calls = tool_invocations(&checkout);
    assert_eq!(calls.len(), 4, "{calls:#?}");
    assert!(calls[0].1.starts_with("catalog import"));
    assert!(calls[1].1.starts_with("build "));
    assert!(calls[2].1.starts_with("catalog import"));
    assert!(calls[3].1.starts_with("build "));

    // Phase 1 uses the baseline, phase 2 the freshly built executable.
    assert!(calls[0].0.contains("_prebuilt"), "{}", calls[0].0);
    assert!(calls[1].0.contains("_prebuilt"), "{}", calls[1].0);
    assert!(calls[2].0.contains("_build"), "{}", calls[2].0);
    assert!(calls[3].0.contains("_build"), "{}", calls[3].0);

    // The catalog database never survives into an import.
    assert!(
        !calls.iter().any(|(_, args)| args.contains("stale-catalog")),
        "{calls:#?}"
    );

    // Phase 1 gets the legacy reference; phase 2 gets a normalized copy
    // of the structured descriptor, not the raw json5 path.
    assert!(calls[1].1.contains("--toolchain=:gcc"), "{}", calls[1].1);
    assert!(calls[3].1.contains("toolchain.json"), "{}", calls[3].1);
    assert!(!calls[3].1.contains("toolchain.json5"), "{}", calls[3].1);

    // Both builds point at this run's private catalog and scratch repo.
    for (_, args) in [&calls[1], &calls[3]] {
        assert!(args.contains("--catalog="), "{args}");
        assert!(args.contains("_ci-repo"), "{args}");
        assert!(args.contains("-j2"), "{args}");
    }

    let runner = std::fs::read_to_string(&checkout.runner_marker).expect("runner ran");
    assert!(runner.contains("--basetemp="), "{runner}");
    assert!(runner.contains("-n2"), "{runner}");
    assert!(runner.contains("tests/"), "{runner}");

    fsutil::rm_rf(&checkout.root);
}

#[test]
fn build_only_stops_after_phase_one() {
    let checkout = setup_checkout("build_only", 0);
    let out = run_ci(&checkout, &["--build-only"]);
    assert!(
        out.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );

    let calls = tool_invocations(&checkout);
    assert_eq!(calls.len(), 2, "{calls:#?}");
    assert!(calls[0].1.starts_with("catalog import"));
    assert!(calls[1].1.starts_with("build "));
    assert!(
        !checkout.runner_marker.exists(),
        "test suite must not run under --build-only"
    );

    fsutil::rm_rf(&checkout.root);
}

#[test]
fn phase_two_never_runs_after_a_phase_one_failure() {
    let checkout = setup_checkout("phase1_fail", 1);
    let json5 = checkout.root.join("toolchain.json5");
    let out = run_ci(
        &checkout,
        &["--toolchain-json5", json5.to_str().unwrap()],
    );
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("command failed"), "{stderr}");

    let calls = tool_invocations(&checkout);
    assert_eq!(calls.len(), 2, "no second import or build: {calls:#?}");
    assert!(!checkout.runner_marker.exists());

    fsutil::rm_rf(&checkout.root);
}

#[test]
fn structured_descriptor_is_required_without_build_only() {
    let checkout = setup_checkout("missing_json5", 0);
    let out = run_ci(&checkout, &[]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("--toolchain-json5"), "{stderr}");
    assert!(
        !checkout.tool_log.exists(),
        "validation happens before any tool invocation"
    );

    fsutil::rm_rf(&checkout.root);
}

#[test]
fn download_mode_fetches_and_installs_the_prebuilt_artifact() {
    let checkout = setup_checkout("download", 0);
    let prebuilt = checkout.root.join("_prebuilt/brix");
    let body = std::fs::read(&prebuilt).expect("read fake tool");
    std::fs::remove_file(&prebuilt).expect("remove fake tool");
    std::fs::remove_dir(checkout.root.join("_prebuilt")).expect("remove prebuilt dir");

    let (base_url, requests) = serve_artifact_once("200 OK", body.clone());
    let out = run_ci_with_mode(
        &checkout,
        "download",
        &["--build-only", "--release-base-url", &base_url],
    );
    assert!(
        out.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );

    // The request names this platform's release artifact.
    let request = requests.recv().expect("request line");
    let artifact = match std::env::consts::OS {
        "linux" => "brix-linux-x64",
        "macos" => "brix-macos-x64",
        other => panic!("no release artifact for {other}"),
    };
    assert!(request.starts_with(&format!("GET /{artifact} ")), "{request}");

    // The artifact lands byte for byte at the prebuilt path, executable,
    // with the parent directory recreated on the way.
    assert_eq!(std::fs::read(&prebuilt).expect("read artifact"), body);
    use std::os::unix::fs::PermissionsExt as _;
    let mode = std::fs::metadata(&prebuilt)
        .expect("stat artifact")
        .permissions()
        .mode();
    assert_ne!(mode & 0o111, 0, "mode {mode:o}");

    // The downloaded executable then drives phase 1.
    let calls = tool_invocations(&checkout);
    assert_eq!(calls.len(), 2, "{calls:#?}");
    assert!(calls[0].1.starts_with("catalog import"));
    assert!(calls[1].1.starts_with("build "));

    fsutil::rm_rf(&checkout.root);
}

#[test]
fn failed_download_leaves_no_artifact_behind() {
    let checkout = setup_checkout("download_fail", 0);
    let prebuilt = checkout.root.join("_prebuilt/brix");
    std::fs::remove_file(&prebuilt).expect("remove fake tool");

    let (base_url, _requests) =
        serve_artifact_once("500 Internal Server Error", b"boom".to_vec());
    let out = run_ci_with_mode(
        &checkout,
        "download",
        &["--build-only", "--release-base-url", &base_url],
    );
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("GET "), "{stderr}");
    assert!(!prebuilt.exists(), "no partial artifact after a failed fetch");
    assert!(
        !checkout.tool_log.exists(),
        "no tool invocation after a failed fetch"
    );

    fsutil::rm_rf(&checkout.root);
}

#[test]
fn skip_mode_requires_the_prebuilt_artifact() {
    let checkout = setup_checkout("skip_missing", 0);
    std::fs::remove_file(checkout.root.join("_prebuilt/brix")).expect("remove prebuilt");
    let out = run_ci(&checkout, &["--build-only"]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("no prebuilt brix executable"), "{stderr}");

    fsutil::rm_rf(&checkout.root);
}
