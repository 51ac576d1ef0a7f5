pub mod retry;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use std::path::Path;
use tracing::info;

use crate::models::common::Config;

const ENV_PREFIX: &str = "SCANNER";

/// Lowercase, 0x-prefixed hex form used for every address written to storage.
pub fn hex_address(address: Address) -> String {
    format!("{address:#x}")
}

pub fn load_config<P: AsRef<Path>>(file_name: P) -> Result<Config> {
    let config_path = file_name.as_ref();
    info!("Config path: {}", config_path.to_string_lossy());

    // The file is optional so a deployment can be configured from the environment alone
    let config = config::Config::builder()
        .add_source(
            File::from(config_path)
                .format(FileFormat::Yaml)
                .required(false),
        )
        .add_source(
            // SCANNER_RPC_URL, SCANNER_METRICS__ENABLED, ...
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("token_markers"),
        )
        .build()
        .context("failed to read config sources")?;

    config
        .try_deserialize::<Config>()
        .context("failed to parse config")
}

/// Gateways in front of RPC nodes answer errors with HTML pages; keep the first text line.
pub(crate) fn strip_html(error: &str) -> String {
    if error.contains("<!doctype html>") || error.contains("<html>") {
        error
            .lines()
            .map(|line| line.trim())
            .find(|line| {
                !line.starts_with('<')
                    && !line.ends_with('>')
                    && !line.is_empty()
                    && *line != "html"
                    && *line != "body"
            })
            .unwrap_or(error)
            .to_string()
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_hex_address_is_lowercase() {
        let addr = address!("0xAbCdEf0000000000000000000000000000000001");
        assert_eq!(hex_address(addr), "0xabcdef0000000000000000000000000000000001");
    }

    #[test]
    fn test_strip_html_extracts_gateway_text() {
        let page = "<!doctype html>\n<html>\n<body>\n502 Bad Gateway\n</body>\n</html>";
        assert_eq!(strip_html(page), "502 Bad Gateway");
        assert_eq!(strip_html("connection refused"), "connection refused");
    }
}
