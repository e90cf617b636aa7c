//! End-to-end smoke test for opencawt-node.
//!
//! Starts a real `opencawt-node` process against a throwaway config and
//! sled db dir, waits for `/diagnostics` to answer, then drives one signed
//! agent registration over the real HTTP surface.
//!
//! Run with:
//!   cargo test -p opencawt-node --test smoke

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

struct NodeGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn wait_for_diagnostics(client: &reqwest::Client, base_url: &str, token: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client
            .get(format!("{base_url}/diagnostics"))
            .bearer_auth(token)
            .send()
            .await
        {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    false
}

#[tokio::test]
async fn node_boots_and_serves_signed_http_traffic() {
    let data_dir = std::env::temp_dir().join(format!("opencawt_node_smoke_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&data_dir);
    std::fs::create_dir_all(&data_dir).unwrap();

    let port = free_port();
    let system_api_key = "smoke-system-key";
    let worker_token = "smoke-worker-token";

    let mut config = opencawt_core::config::Config::default();
    config.api_port = port;
    config.db_path = data_dir.join("db").to_str().unwrap().to_string();
    config.system_api_key = system_api_key.to_string();
    config.worker_token = worker_token.to_string();
    config.engine_tick_ms = 50;
    config.seal_sweep_interval_secs = 1;

    let config_path = data_dir.join("config.json");
    std::fs::write(&config_path, serde_json::to_string(&config).unwrap()).unwrap();

    let node_bin = env!("CARGO_BIN_EXE_opencawt-node");
    let child = Command::new(node_bin)
        .args(["--config", config_path.to_str().unwrap()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn opencawt-node");

    let _guard = NodeGuard { child, data_dir };

    let base_url = format!("http://127.0.0.1:{port}");
    let http = reqwest::Client::new();
    assert!(
        wait_for_diagnostics(&http, &base_url, system_api_key, Duration::from_secs(10)).await,
        "opencawt-node did not become ready within 10 seconds"
    );

    // An unauthenticated diagnostics call is rejected.
    let unauthed = http.get(format!("{base_url}/diagnostics")).send().await.unwrap();
    assert_eq!(unauthed.status(), reqwest::StatusCode::UNAUTHORIZED);

    // Drive one signed mutation through the real listener end to end.
    let agent = opencawt_crypto::KeyPair::generate();
    let timestamp = chrono::Utc::now().timestamp();
    let body = serde_json::json!({ "displayName": "smoke agent" });
    let body_bytes = serde_json::to_vec(&body).unwrap();
    let body_sha256 = opencawt_crypto::canonical::sha256_hex_bytes(&body_bytes);
    let signing_string = opencawt_crypto::build_signing_string("POST", "/agents", timestamp, "smoke-nonce", &body_sha256);
    let signature = agent.sign(signing_string.as_bytes());

    let register = http
        .post(format!("{base_url}/agents"))
        .header("x-agent-id", &agent.agent_id)
        .header("x-timestamp", timestamp.to_string())
        .header("x-nonce", "smoke-nonce")
        .header("x-body-sha256", &body_sha256)
        .header("x-signature", signature)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(register.status(), reqwest::StatusCode::CREATED);
    let registered: serde_json::Value = register.json().await.unwrap();
    assert_eq!(registered["agentId"], agent.agent_id);

    let fetched = http
        .get(format!("{base_url}/agents/{}", agent.agent_id))
        .send()
        .await
        .unwrap();
    assert_eq!(fetched.status(), reqwest::StatusCode::OK);

    let diagnostics = http
        .get(format!("{base_url}/diagnostics"))
        .bearer_auth(system_api_key)
        .send()
        .await
        .unwrap();
    assert_eq!(diagnostics.status(), reqwest::StatusCode::OK);
}
