//! Process-level settings: where the shared store lives and which port to bind

use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_PORT: u16 = 8081;
const DEFAULT_DATA_DIR: &str = ".conclave-data";
const AGENTS_FILE: &str = "agents.json";

/// Backing for the shared key-value store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    /// One JSON file per key in a directory shared by every instance
    #[default]
    File,
    /// In-process only; single-node mode
    Memory,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(format!("Unknown store kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub store: StoreKind,
    pub agents_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(DEFAULT_DATA_DIR);
        Self {
            port: DEFAULT_PORT,
            agents_file: data_dir.join(AGENTS_FILE),
            data_dir,
            store: StoreKind::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("CONCLAVE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
        let agents_file = std::env::var("CONCLAVE_AGENTS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join(AGENTS_FILE));
        let store = std::env::var("CONCLAVE_STORE")
            .ok()
            .and_then(|raw| raw.parse::<StoreKind>().ok())
            .unwrap_or_default();
        let port = std::env::var("CONCLAVE_PORT")
            .ok()
            .and_then(|raw| raw.trim().parse::<u16>().ok())
            .filter(|port| *port > 0)
            .unwrap_or(DEFAULT_PORT);

        Self {
            port,
            data_dir,
            store,
            agents_file,
        }
    }

    /// Directory of the file store, below the data directory
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_kind_parsing() {
        assert_eq!("file".parse::<StoreKind>(), Ok(StoreKind::File));
        assert_eq!(" Memory ".parse::<StoreKind>(), Ok(StoreKind::Memory));
        assert!("redis".parse::<StoreKind>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8081);
        assert_eq!(config.store, StoreKind::File);
        assert_eq!(config.agents_file, PathBuf::from(".conclave-data/agents.json"));
        assert_eq!(config.store_dir(), PathBuf::from(".conclave-data/store"));
    }
}
