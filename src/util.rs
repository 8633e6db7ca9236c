const CONSUL_HTTP_ADDR: &str = "CONSUL_HTTP_ADDR";

/// Consul address from the environment, normalized to carry a scheme
pub fn consul_addr_from_env() -> Option<String> {
    let addr_from_env = std::env::var(CONSUL_HTTP_ADDR).ok()?;
    normalize_address(&addr_from_env)
}

const CONSUL_HTTP_TOKEN: &str = "CONSUL_HTTP_TOKEN";

pub fn consul_token_from_env() -> Option<String> {
    let token_from_env = std::env::var(CONSUL_HTTP_TOKEN);
    token_from_env.ok().filter(|token| !token.is_empty())
}

/// Adds `http://` to bare `host:port` addresses and strips trailing slashes
pub fn normalize_address(address: &str) -> Option<String> {
    let address = address.trim().trim_end_matches('/');
    if address.is_empty() {
        return None;
    }
    if address.starts_with("http://") || address.starts_with("https://") {
        Some(address.to_string())
    } else {
        Some(format!("http://{address}"))
    }
}
