/* This file is part of covertun.
 *
 * covertun is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * covertun is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with covertun.  If not, see <http://www.gnu.org/licenses/>.
 */

use std::path::Path;

use anyhow::{Context, Result};
use serde_derive::Deserialize;

use crate::cipher::Method;

fn parse_method(value: &str) -> Result<Method> {
    match value {
        "aes" => Ok(Method::Aes),
        "dummy" => Ok(Method::Dummy),
        other => Err(anyhow::anyhow!("unknown encryption method '{other}'")),
    }
}

#[derive(Deserialize, Default)]
struct StructuredConfig {
    listen_addr: Option<String>,
    relay_addr: Option<String>,
    method: Option<String>,
    key: Option<String>,
    log_level: Option<String>,
}

impl StructuredConfig {
    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents).context("failed to parse config file")
    }
}

pub struct ClientConfig {
    pub listen_addr: String,
    pub relay_addr: String,
    pub method: Method,
    pub key: String,
    pub log_level: String,
}

impl ClientConfig {
    pub fn load(config_path: Option<&Path>, overrides: ClientOverrides) -> Result<Self> {
        let file = config_path.map(StructuredConfig::from_file)
            .transpose()?.unwrap_or_default();

        let listen_addr = overrides.listen_addr.or(file.listen_addr)
            .unwrap_or_else(|| "127.0.0.1:1080".to_string());
        let relay_addr = overrides.relay_addr.or(file.relay_addr)
            .context("relay_addr must be set via --relay or the config file")?;
        let method = parse_method(
            overrides.method.or(file.method).as_deref().unwrap_or("aes")
        )?;
        let key = overrides.key.or(file.key)
            .context("key must be set via --key or the config file")?;
        let log_level = overrides.log_level.or(file.log_level)
            .unwrap_or_else(|| "info".to_string());

        Ok(ClientConfig { listen_addr, relay_addr, method, key, log_level })
    }
}

#[derive(Default)]
pub struct ClientOverrides {
    pub listen_addr: Option<String>,
    pub relay_addr: Option<String>,
    pub method: Option<String>,
    pub key: Option<String>,
    pub log_level: Option<String>,
}

pub struct ServerConfig {
    pub listen_addr: String,
    pub method: Method,
    pub key: String,
    pub log_level: String,
}

impl ServerConfig {
    pub fn load(config_path: Option<&Path>, overrides: ServerOverrides) -> Result<Self> {
        let file = config_path.map(StructuredConfig::from_file)
            .transpose()?.unwrap_or_default();

        let listen_addr = overrides.listen_addr.or(file.listen_addr)
            .unwrap_or_else(|| "0.0.0.0:8388".to_string());
        let method = parse_method(
            overrides.method.or(file.method).as_deref().unwrap_or("aes")
        )?;
        let key = overrides.key.or(file.key)
            .context("key must be set via --key or the config file")?;
        let log_level = overrides.log_level.or(file.log_level)
            .unwrap_or_else(|| "info".to_string());

        Ok(ServerConfig { listen_addr, method, key, log_level })
    }
}

#[derive(Default)]
pub struct ServerOverrides {
    pub listen_addr: Option<String>,
    pub method: Option<String>,
    pub key: Option<String>,
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn client_config_merges_file_and_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"
            listen_addr = "127.0.0.1:1090"
            relay_addr = "10.0.0.1:8388"
            key = "from-file"
        "#).unwrap();

        let overrides = ClientOverrides {
            key: Some("from-cli".to_string()),
            ..Default::default()
        };
        let config = ClientConfig::load(Some(file.path()), overrides).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:1090");
        assert_eq!(config.relay_addr, "10.0.0.1:8388");
        assert_eq!(config.key, "from-cli", "CLI overrides must win over the file");
        assert_eq!(config.method, Method::Aes);
    }

    #[test]
    fn missing_relay_addr_is_an_error() {
        let overrides = ClientOverrides {
            key: Some("k".to_string()),
            ..Default::default()
        };
        assert!(ClientConfig::load(None, overrides).is_err());
    }

    #[test]
    fn dummy_method_parses() {
        let overrides = ClientOverrides {
            key: Some("k".to_string()),
            relay_addr: Some("127.0.0.1:1".to_string()),
            method: Some("dummy".to_string()),
            ..Default::default()
        };
        let config = ClientConfig::load(None, overrides).unwrap();
        assert_eq!(config.method, Method::Dummy);
    }
}
