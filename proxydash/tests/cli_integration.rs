//! CLI Integration Tests
//!
//! Runs the proxydash binary against a throwaway config home and a stub
//! management API.

use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use tempfile::TempDir;

/// One canned response: (path, status line, extra headers, body).
type Route = (&'static str, &'static str, &'static str, &'static str);

fn run_proxydash(args: &[&str], home: &Path) -> std::process::Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_proxydash"));
    cmd.args(args)
        .env("PROXYDASH_HOME", home)
        .env_remove("PROXYDASH_KEY")
        .env_remove("PROXYDASH_PROFILE")
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.output().expect("Failed to run proxydash command")
}

fn stdout_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn handle_connection(mut stream: TcpStream, routes: &[Route]) {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).unwrap_or(0);
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);
        if raw.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let request = String::from_utf8_lossy(&raw);
    let path = request.split_whitespace().nth(1).unwrap_or("/");
    let (status, headers, body) = routes
        .iter()
        .find(|(p, ..)| *p == path)
        .map(|(_, status, headers, body)| (*status, *headers, *body))
        .unwrap_or(("404 Not Found", "", "{}"));

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n{headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

/// Serve `routes` on an ephemeral port for the rest of the test process.
fn spawn_stub_api(routes: &'static [Route]) -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind stub api");
    let port = listener.local_addr().expect("stub addr").port();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            handle_connection(stream, routes);
        }
    });
    port
}

fn add_profile(home: &Path, name: &str, port: u16) {
    let port = port.to_string();
    let output = run_proxydash(
        &[
            "profiles", "add", "127.0.0.1", "--name", name, "--port", &port, "--key", "examplekey",
            "--no-test",
        ],
        home,
    );
    assert!(output.status.success(), "add failed: {}", stderr_of(&output));
}

#[test]
fn test_profiles_ls_with_no_profiles() {
    let home = TempDir::new().unwrap();
    let output = run_proxydash(&["profiles", "ls"], home.path());

    assert!(output.status.success());
    assert!(stdout_of(&output).contains("No profiles saved"));
}

#[test]
fn test_profiles_add_list_use_remove() {
    let home = TempDir::new().unwrap();
    add_profile(home.path(), "Mac", 6171);
    add_profile(home.path(), "Phone", 6172);

    let config = fs::read_to_string(home.path().join("config.toml")).unwrap();
    assert!(config.contains("name = \"Mac\""));
    assert!(config.contains("name = \"Phone\""));

    // Newest profile is listed first and is the default.
    let ls = stdout_of(&run_proxydash(&["profiles", "ls"], home.path()));
    let mac = ls.find("Mac").unwrap();
    let phone = ls.find("* Phone").unwrap();
    assert!(phone < mac);
    assert!(!ls.contains("examplekey"));

    let output = run_proxydash(&["profiles", "use", "Mac"], home.path());
    assert!(output.status.success());
    let ls = stdout_of(&run_proxydash(&["profiles", "list"], home.path()));
    assert!(ls.contains("* Mac"));

    let output = run_proxydash(&["profiles", "rm", "Mac", "-y"], home.path());
    assert!(output.status.success(), "{}", stderr_of(&output));
    let ls = stdout_of(&run_proxydash(&["profiles", "ls"], home.path()));
    assert!(!ls.contains("Mac"));
    assert!(ls.contains("Phone"));
}

#[test]
fn test_profiles_add_rejects_duplicate_name() {
    let home = TempDir::new().unwrap();
    add_profile(home.path(), "Mac", 6171);

    let output = run_proxydash(
        &[
            "profiles", "add", "10.0.0.2", "--name", "Mac", "--key", "k", "--no-test",
        ],
        home.path(),
    );
    assert!(!output.status.success());
    assert!(stderr_of(&output).contains("already exists"));
}

#[test]
fn test_profiles_rm_unknown_profile_fails() {
    let home = TempDir::new().unwrap();
    let output = run_proxydash(&["profiles", "rm", "nope", "-y"], home.path());
    assert!(!output.status.success());
    assert!(stderr_of(&output).contains("not found"));
}

#[test]
fn test_profiles_add_checks_connection_and_records_platform() {
    static ROUTES: &[Route] = &[(
        "/v1/outbound",
        "200 OK",
        "x-system: macOS 14.4\r\nx-surge-version: 5.7.0\r\nx-surge-build: 2801\r\n",
        "{}",
    )];
    let port = spawn_stub_api(ROUTES).to_string();
    let home = TempDir::new().unwrap();

    let output = run_proxydash(
        &[
            "profiles", "add", "127.0.0.1", "--name", "Mac", "--port", &port, "--key", "k",
        ],
        home.path(),
    );
    assert!(output.status.success(), "{}", stderr_of(&output));
    assert!(stdout_of(&output).contains("macos 5.7.0"));

    let config = fs::read_to_string(home.path().join("config.toml")).unwrap();
    assert!(config.contains("platform = \"macos\""));
}

#[test]
fn test_profiles_add_fails_when_api_rejects_key() {
    static ROUTES: &[Route] = &[("/v1/outbound", "401 Unauthorized", "", "{}")];
    let port = spawn_stub_api(ROUTES).to_string();
    let home = TempDir::new().unwrap();

    let output = run_proxydash(
        &[
            "profiles", "add", "127.0.0.1", "--name", "Mac", "--port", &port, "--key", "bad",
        ],
        home.path(),
    );
    assert!(!output.status.success());
    assert!(stderr_of(&output).contains("Could not connect"));
    assert!(!home.path().join("config.toml").exists());
}

#[test]
fn test_profiles_add_validates_fields_before_connecting() {
    // Nothing listens here, so reaching the network would fail differently.
    let port = {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        listener.local_addr().expect("addr").port().to_string()
    };
    let home = TempDir::new().unwrap();

    let output = run_proxydash(
        &[
            "profiles", "add", "127.0.0.1", "--name", "Mac", "--port", &port, "--key", "",
        ],
        home.path(),
    );
    assert!(!output.status.success());
    let stderr = stderr_of(&output);
    assert!(stderr.contains("empty API key"), "{}", stderr);
    assert!(!stderr.contains("Could not connect"));

    let output = run_proxydash(
        &[
            "profiles", "add", "http://x", "--name", "Mac", "--port", &port, "--key", "k",
        ],
        home.path(),
    );
    assert!(!output.status.success());
    let stderr = stderr_of(&output);
    assert!(stderr.contains("bare hostname"), "{}", stderr);
    assert!(!stderr.contains("Could not connect"));
}

#[test]
fn test_requests_without_profiles_fails() {
    let home = TempDir::new().unwrap();
    let output = run_proxydash(&["requests", "--once"], home.path());
    assert!(!output.status.success());
    assert!(stderr_of(&output).contains("No profiles saved"));
}

#[test]
fn test_requests_once_prints_feed() {
    static ROUTES: &[Route] = &[(
        "/v1/requests/recent",
        "200 OK",
        "",
        r#"{"requests":[{"id":12,"method":"GET","URL":"https://example.com/","policyName":"DIRECT","completed":1},{"id":11,"method":"CONNECT","remoteHost":"10.0.0.2:443","failed":true}]}"#,
    )];
    let port = spawn_stub_api(ROUTES);
    let home = TempDir::new().unwrap();
    add_profile(home.path(), "Mac", port);

    let output = run_proxydash(&["requests", "--once"], home.path());
    assert!(output.status.success(), "{}", stderr_of(&output));

    let out = stdout_of(&output);
    let first = out.find("https://example.com/").unwrap();
    let second = out.find("10.0.0.2:443").unwrap();
    assert!(first < second);
    assert!(out.contains("Completed"));
    assert!(out.contains("Failed"));
}

#[test]
fn test_requests_once_rejects_malformed_batch() {
    static ROUTES: &[Route] = &[(
        "/v1/requests/recent",
        "200 OK",
        "",
        r#"{"requests":[{"id":12},{"method":"GET"}]}"#,
    )];
    let port = spawn_stub_api(ROUTES);
    let home = TempDir::new().unwrap();
    add_profile(home.path(), "Mac", port);

    let output = run_proxydash(&["requests", "--once"], home.path());
    assert!(!output.status.success());
    assert!(stderr_of(&output).contains("position 1"));
}

#[test]
fn test_traffic_prints_sorted_policies() {
    static ROUTES: &[Route] = &[(
        "/v1/traffic",
        "200 OK",
        "",
        r#"{"startTime":1600000000,"interface":{"en0":{"in":4096,"out":1024}},"connector":{"DIRECT":{"in":10,"out":10},"Proxy":{"in":5000,"out":100}}}"#,
    )];
    let port = spawn_stub_api(ROUTES);
    let home = TempDir::new().unwrap();
    add_profile(home.path(), "Mac", port);

    let output = run_proxydash(&["traffic"], home.path());
    assert!(output.status.success(), "{}", stderr_of(&output));

    let out = stdout_of(&output);
    assert!(out.contains("en0"));
    assert!(out.contains("2020-09-13T12:26:40Z"));
    let proxy = out.find("Proxy").unwrap();
    let direct = out.find("DIRECT").unwrap();
    assert!(proxy < direct);
}

#[test]
fn test_traffic_reports_server_errors() {
    static ROUTES: &[Route] = &[("/v1/traffic", "500 Internal Server Error", "", "{}")];
    let port = spawn_stub_api(ROUTES);
    let home = TempDir::new().unwrap();
    add_profile(home.path(), "Mac", port);

    let output = run_proxydash(&["traffic", "--profile", "Mac"], home.path());
    assert!(!output.status.success());
    assert!(stderr_of(&output).contains("HTTP 500"));
}
