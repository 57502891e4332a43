//! Erros do link serial.

/// Erros expostos pelo [`crate::ProbeLink`].
///
/// Só a falha de abertura é fatal. Erros de leitura/escrita durante a
/// operação ficam dentro da thread de leitura (log + contador).
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Falha ao abrir {port} @ {baud} baud: {source}")]
    Open {
        port: String,
        baud: u32,
        #[source]
        source: serialport::Error,
    },

    #[error("Falha ao criar thread de leitura: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Link encerrado")]
    Stopped,

    #[error("Fila de comandos cheia, descartando {0:?}")]
    CommandQueueFull(String),

    #[error("Comando inválido: {0:?}")]
    InvalidCommand(String),
}
