/// Janus configuration defaults module.
///
/// Default value helpers shared between serde deserialization in
/// `models.rs` and the fallback construction in `mod.rs`.

/// Default tenant file path when `CONFIG_PATH` is not set.
pub(crate) fn default_config_path() -> std::path::PathBuf {
    std::path::PathBuf::from("tenants.json")
}

/// Default externally visible base URL.
pub(crate) fn default_proxy_base_url() -> String {
    format!(
        "http://localhost:{}",
        crate::server::constants::DEFAULT_PORT
    )
}
