//! Environment prefixes partition everything: directory documents, the
//! registration channel and every private channel. An absent or empty
//! prefix means the unprefixed namespace.

pub const GATEWAY_CHANNEL: &str = "gateway";
pub const DIRECTORY_STORE_NAME: &str = "service";

pub fn normalize(prefix: Option<String>) -> Option<String> {
    prefix.filter(|p| !p.trim().is_empty())
}

pub fn scoped(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{p}-{name}"),
        _ => name.to_string(),
    }
}

/// Shared registration channel, e.g. `dev-gateway`.
pub fn gateway_channel(prefix: Option<&str>) -> String {
    scoped(prefix, GATEWAY_CHANNEL)
}

/// KV key of the directory document, e.g. `dev-service`.
pub fn directory_key(prefix: Option<&str>) -> String {
    scoped(prefix, DIRECTORY_STORE_NAME)
}

/// Point-to-point channel of one approved agent, e.g. `dev-<uuid>`.
pub fn private_channel(prefix: Option<&str>, agent_id: &str) -> String {
    scoped(prefix, agent_id)
}

/// Inverse of [`directory_key`]: `Some(prefix)` for a directory document key.
pub fn prefix_of_directory_key(key: &str) -> Option<Option<String>> {
    if key == DIRECTORY_STORE_NAME {
        return Some(None);
    }
    key.strip_suffix(DIRECTORY_STORE_NAME)
        .and_then(|rest| rest.strip_suffix('-'))
        .filter(|p| !p.is_empty())
        .map(|p| Some(p.to_string()))
}
