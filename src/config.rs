use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Role this node plays in the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Serves inference from a local backend; identified by its DID.
    Hoster,
    /// Bridges overlay traffic into ordinary HTTP infrastructure; identified as "gateway".
    Gateway,
}

impl NodeRole {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "gateway" => NodeRole::Gateway,
            _ => NodeRole::Hoster,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub backend_config: BackendConfig,
    pub p2p_config: P2pConfig,
    /// JSON file holding externally managed settings (active backend, base URLs).
    pub settings_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub ollama_base_url: String,
    pub vllm_base_url: String,
    pub vllm_api_key: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            ollama_base_url: "http://127.0.0.1:11434".to_string(),
            vllm_base_url: "http://127.0.0.1:8000".to_string(),
            vllm_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    pub role: NodeRole,
    pub listen_port: u16,
    pub bootstrap_peers: Vec<String>, // EndpointId or EndpointId@ip:port
    /// Where payloads addressed to this node are POSTed.
    pub relay_url: String,
    /// Hex-encoded ed25519 secret key provisioned by the key manager.
    pub key_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let api_port = env::var("API_PORT")
            .unwrap_or_else(|_| "8716".to_string())
            .parse()
            .unwrap_or(8716);

        let defaults = BackendConfig::default();
        let ollama_base_url = env::var("OLLAMA_API_BASE")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.ollama_base_url);
        let vllm_base_url = env::var("VLLM_API_BASE")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.vllm_base_url);
        let vllm_api_key = env::var("VLLM_API_KEY").ok().filter(|s| !s.trim().is_empty());

        let role = NodeRole::parse(&env::var("NODE_ROLE").unwrap_or_default());

        let listen_port = env::var("P2P_PORT")
            .unwrap_or_else(|_| "31001".to_string())
            .parse()
            .unwrap_or(31001);

        // Iroh bootstrap peers (EndpointId@ip:port format)
        let bootstrap_peers = env::var("BOOTSTRAP_PEERS")
            .unwrap_or_else(|_| String::new())
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.trim().to_string())
            .collect();

        // By default payloads addressed to us go to our own tunnel ingress
        let relay_url = env::var("RELAY_URL")
            .unwrap_or_else(|_| format!("http://{}:{}/tunnel/message", api_host, api_port));

        let key_path = env::var("NODE_KEY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/node_key"));

        let settings_path = env::var("SETTINGS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/settings.json"));

        Ok(Self {
            api_host,
            api_port,
            backend_config: BackendConfig {
                ollama_base_url,
                vllm_base_url,
                vllm_api_key,
            },
            p2p_config: P2pConfig {
                role,
                listen_port,
                bootstrap_peers,
                relay_url,
                key_path,
            },
            settings_path,
        })
    }
}
