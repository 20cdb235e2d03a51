//! Loopback stand-ins for a TLS server and the attestation service.
#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use openssl::pkey::PKey;
use openssl::ssl::{SslAcceptor, SslMethod};
use openssl::x509::X509;

pub const LEAF_PEM: &str = include_str!("../fixtures/leaf.pem");
pub const INTERMEDIATE_PEM: &str = include_str!("../fixtures/intermediate.pem");
pub const LEAF_KEY: &str = include_str!("../fixtures/leaf.key");

pub const LEAF_SHA256: &str = "bdde29270fbaf8e3df6c40bf71fc4fde6b5bdea3528c052328e479106d534928";
pub const INTERMEDIATE_SHA256: &str =
    "8f0dba213d83c7fc31aa6388bc5568cf615b295893d3f49585955905c356b200";

/// Serves `chain` (leaf first) on `bind_ip` until the test process exits.
pub fn spawn_tls_server(bind_ip: &str, chain: &[&str]) -> u16 {
    let key = PKey::private_key_from_pem(LEAF_KEY.as_bytes()).unwrap();
    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    acceptor.set_private_key(&key).unwrap();
    acceptor
        .set_certificate(&X509::from_pem(chain[0].as_bytes()).unwrap())
        .unwrap();
    for extra in &chain[1..] {
        acceptor
            .add_extra_chain_cert(X509::from_pem(extra.as_bytes()).unwrap())
            .unwrap();
    }
    acceptor.check_private_key().unwrap();
    let acceptor = acceptor.build();

    let listener = TcpListener::bind((bind_ip, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let acceptor = acceptor.clone();
            thread::spawn(move || {
                if let Ok(mut tls) = acceptor.accept(stream) {
                    let mut buf = [0u8; 1];
                    let _ = tls.read(&mut buf);
                    let _ = tls.shutdown();
                }
            });
        }
    });
    port
}

/// Accepts connections and answers each with `reply` as raw bytes.
pub fn spawn_raw_server(reply: &'static [u8]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(reply);
        }
    });
    port
}

/// Accepts connections and never answers.
pub fn spawn_silent_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming() {
            held.push(stream);
        }
    });
    port
}

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Minimal HTTP/1.1 responder. `handler` maps the request path to a
/// status code and body. Returns the base URL.
pub fn spawn_api<F>(handler: F) -> String
where
    F: Fn(&str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handler = std::sync::Arc::new(handler);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let handler = handler.clone();
            thread::spawn(move || {
                let path = read_request_path(&mut stream);
                let (status, body) = handler(&path);
                let response = format!(
                    "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            });
        }
    });
    format!("http://127.0.0.1:{}", port)
}

/// Answers every request with `body` and no `Content-Length`, so the
/// client only learns the size by reading until the connection closes.
pub fn spawn_unsized_api(body: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            read_request_path(&mut stream);
            let head = "HTTP/1.1 200 Mock\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n";
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(body.as_bytes());
        }
    });
    format!("http://127.0.0.1:{}", port)
}

/// Like [`spawn_api`] but waits before answering.
pub fn spawn_slow_api(delay: Duration) -> String {
    spawn_api(move |_| {
        thread::sleep(delay);
        (200, "{}".to_string())
    })
}

fn read_request_path(stream: &mut std::net::TcpStream) -> String {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    let request = String::from_utf8_lossy(&request);
    request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string()
}

/// Attestation body exposing the leaf PEM only.
pub fn leaf_body(leaf_pem: &str) -> String {
    serde_json::json!({
        "certificate": { "pem": leaf_pem, "cn": "localhost" },
        "meta": { "observed": "2026-10-18T00:00:00Z" }
    })
    .to_string()
}

/// Attestation body with a chain array of precomputed digests.
pub fn chain_body(digests: &[&str]) -> String {
    let chain: Vec<serde_json::Value> = digests
        .iter()
        .map(|d| serde_json::json!({ "pem": { "hashes": { "sha256": d, "sha1": "ignored" } } }))
        .collect();
    serde_json::json!({ "certificate": { "pem": LEAF_PEM }, "chain": chain }).to_string()
}

/// Flips one base64 character in the middle of the PEM body.
pub fn tamper_one_byte(pem: &str) -> String {
    let mut lines: Vec<String> = pem.lines().map(str::to_string).collect();
    let middle = lines.len() / 2;
    let line = &mut lines[middle];
    let replacement = if line.as_bytes()[10] == b'A' { "B" } else { "A" };
    line.replace_range(10..11, replacement);
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
