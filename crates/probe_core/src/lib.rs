//! # Probe Core
//!
//! Crate compartilhada que define os tipos de telemetria da sonda, o
//! protocolo de fio (texto + foto binária no mesmo stream), a máquina de
//! estados da captura de foto, a configuração TOML e a sessão de missão.
//!
//! ## Módulos
//! - [`types`] – `TelemetryFrame`, `Field`, `PhotoBlob`
//! - [`protocol`] – Sentinelas, parsing de linhas e montagem de frames
//! - [`photo`] – Modo do leitor e captura de foto com timeout
//! - [`config`] – Configuração unificada via TOML
//! - [`session`] – Relógio e histórico da missão (lado do consumidor)

pub mod types;
pub mod protocol;
pub mod photo;
pub mod config;
pub mod session;

// Re-exports convenientes
pub use types::{Field, PhotoBlob, TelemetryFrame};
pub use protocol::{FrameAssembler, LineError, UnknownKeyPolicy, PHOTO_END, PHOTO_START};
pub use photo::{CaptureOutcome, PhotoCapture, ReaderMode};
pub use config::{AppConfig, ReaderConfig, SerialConfig, StationConfig};
pub use session::MissionSession;
