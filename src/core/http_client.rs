use std::time::Duration;

use memget_core::models::settings::{DownloadSettings, ProxySettings};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

pub fn proxy_url(proxy: &ProxySettings) -> Option<String> {
    if !proxy.enabled || proxy.host.is_empty() {
        return None;
    }
    let scheme = match proxy.proxy_type.as_str() {
        "socks5" => "socks5",
        "https" => "https",
        _ => "http",
    };
    if !proxy.username.is_empty() {
        Some(format!(
            "{}://{}:{}@{}:{}",
            scheme, proxy.username, proxy.password, proxy.host, proxy.port
        ))
    } else {
        Some(format!("{}://{}:{}", scheme, proxy.host, proxy.port))
    }
}

pub fn apply_proxy(
    builder: reqwest::ClientBuilder,
    proxy: &ProxySettings,
) -> reqwest::ClientBuilder {
    let Some(url) = proxy_url(proxy) else {
        return builder;
    };
    match reqwest::Proxy::all(&url) {
        Ok(p) => builder.proxy(p),
        Err(e) => {
            tracing::warn!("[http] invalid proxy URL: {}", e);
            builder
        }
    }
}

/// Client for media fetches. The overall request timeout is left to the
/// caller; only connect and per-read stalls are bounded here.
pub fn build_client(
    download: &DownloadSettings,
    proxy: &ProxySettings,
) -> anyhow::Result<reqwest::Client> {
    let builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(download.request_timeout_secs.min(30)))
        .read_timeout(Duration::from_secs(download.stall_timeout_secs))
        .redirect(reqwest::redirect::Policy::limited(10));
    Ok(apply_proxy(builder, proxy).build()?)
}
