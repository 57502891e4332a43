//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável cobre a porta serial, o
//! leitor e o consumidor.

use crate::protocol::UnknownKeyPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Erros ao salvar a configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro ao serializar config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Erro ao escrever {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Porta serial da sonda.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Nome da porta (ex: "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: if cfg!(windows) { "COM3" } else { "/dev/ttyUSB0" }.into(),
            baud_rate: 115_200,
        }
    }
}

/// Parâmetros da thread de leitura.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Timeout de cada leitura de linha (ms)
    pub read_timeout_ms: u64,
    /// Tamanho máximo de cada leitura crua em modo foto (bytes)
    pub chunk_size: usize,
    /// Tempo máximo para receber o `PHOTO_END` (segundos)
    pub photo_timeout_secs: f64,
    /// Capacidade da fila de comandos
    pub command_queue: usize,
    /// Capacidade da fila de eventos de foto
    pub photo_queue: usize,
    /// Política para chaves desconhecidas: "retain" ou "clear_on_frame"
    pub unknown_keys: UnknownKeyPolicy,
    /// Máximo de chaves desconhecidas distintas guardadas
    pub max_unknown_keys: usize,
    /// Pausa inicial após erro de leitura (ms), dobra a cada erro seguido
    pub error_backoff_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 200,
            chunk_size: 64,
            photo_timeout_secs: 5.0,
            command_queue: 32,
            photo_queue: 8,
            unknown_keys: UnknownKeyPolicy::Retain,
            max_unknown_keys: 32,
            error_backoff_ms: 250,
        }
    }
}

impl ReaderConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn photo_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.photo_timeout_secs).unwrap_or(Duration::from_secs(5))
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Configuração do consumidor (estação).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Intervalo de polling do mailbox (ms)
    pub poll_interval_ms: u64,
    /// Diretório onde as fotos recebidas são gravadas
    pub photo_dir: PathBuf,
    /// Quantidade de frames guardados no histórico da missão
    pub history_size: usize,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 400,
            photo_dir: PathBuf::from("photos"),
            history_size: 300,
        }
    }
}

impl StationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Configuração raiz.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub reader: ReaderConfig,
    pub station: StationConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML. Cai nos padrões se o arquivo
    /// não existir ou estiver inválido.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.serial.port.trim().is_empty() {
            errors.push("Porta serial não pode ser vazia".into());
        }
        if self.serial.baud_rate == 0 {
            errors.push("Baud rate não pode ser 0".into());
        }

        let r = &self.reader;
        if r.read_timeout_ms == 0 || r.read_timeout_ms > 5_000 {
            errors.push(format!(
                "Timeout de leitura inválido: {} ms (1–5000)",
                r.read_timeout_ms
            ));
        }
        if r.chunk_size == 0 {
            errors.push("chunk_size não pode ser 0".into());
        }
        if !(r.photo_timeout_secs > 0.0 && r.photo_timeout_secs <= 600.0) {
            errors.push(format!(
                "Timeout de foto inválido: {} (0–600 s)",
                r.photo_timeout_secs
            ));
        }
        if r.command_queue == 0 || r.photo_queue == 0 {
            errors.push("Filas de comando/foto precisam de capacidade > 0".into());
        }
        if r.error_backoff_ms < 10 || r.error_backoff_ms > 10_000 {
            errors.push(format!(
                "Backoff de erro inválido: {} ms (10–10000)",
                r.error_backoff_ms
            ));
        }
        if r.max_unknown_keys > 1024 {
            errors.push(format!(
                "max_unknown_keys muito alto: {} (máx. 1024)",
                r.max_unknown_keys
            ));
        }

        if self.station.poll_interval_ms < 10 || self.station.poll_interval_ms > 60_000 {
            errors.push(format!(
                "Intervalo de polling inválido: {} ms (10–60000)",
                self.station.poll_interval_ms
            ));
        }

        errors
    }
}
