//! Máquina de estados da captura de foto.
//!
//! Depois de `PHOTO_START` o leitor para de ler linhas e passa a empurrar
//! blocos crus para cá até achar [`PHOTO_END`]. Como o fio não tem prefixo
//! de tamanho nem checksum, o timeout é a única proteção contra uma
//! transferência travada ou corrompida.

use crate::protocol::PHOTO_END;
use crate::types::PhotoBlob;
use std::time::{Duration, Instant};

/// Modo atual do leitor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReaderMode {
    /// Leitura linha a linha.
    #[default]
    Telemetry,
    /// Acumulando bytes de foto desde `started_at`.
    Capturing { started_at: Instant, buffer: Vec<u8> },
}

/// Resultado de uma captura que saiu do modo foto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Terminador encontrado. `trailing` são os bytes que vieram depois dele
    /// no mesmo bloco e pertencem ao fluxo de telemetria.
    Completed { photo: PhotoBlob, trailing: Vec<u8> },
    /// Timeout estourado, bytes descartados.
    Cancelled { elapsed: Duration, discarded: usize },
}

/// Procura o terminador a partir de `from`. Retorna o índice do início.
pub fn find_terminator(haystack: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(PHOTO_END.len())
        .position(|w| w == PHOTO_END)
        .map(|i| from + i)
}

/// Captura de foto com abandono por timeout.
#[derive(Debug, Clone)]
pub struct PhotoCapture {
    mode: ReaderMode,
    timeout: Duration,
}

impl PhotoCapture {
    pub fn new(timeout: Duration) -> Self {
        Self {
            mode: ReaderMode::Telemetry,
            timeout,
        }
    }

    pub fn mode(&self) -> &ReaderMode {
        &self.mode
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.mode, ReaderMode::Capturing { .. })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Bytes acumulados na captura atual (0 fora do modo foto).
    pub fn buffered(&self) -> usize {
        match &self.mode {
            ReaderMode::Capturing { buffer, .. } => buffer.len(),
            ReaderMode::Telemetry => 0,
        }
    }

    /// Entra em modo foto com buffer vazio. Uma captura em andamento é
    /// descartada e o relógio recomeça.
    pub fn begin(&mut self, now: Instant) {
        self.mode = ReaderMode::Capturing {
            started_at: now,
            buffer: Vec::new(),
        };
    }

    /// Anexa um bloco cru e procura o terminador.
    ///
    /// A busca recomeça `PHOTO_END.len() - 1` bytes antes do bloco novo, então
    /// um terminador partido entre dois blocos é encontrado. Fora do modo foto
    /// não faz nada.
    pub fn push(&mut self, chunk: &[u8]) -> Option<CaptureOutcome> {
        let ReaderMode::Capturing { buffer, .. } = &mut self.mode else {
            return None;
        };
        if chunk.is_empty() {
            return None;
        }

        let scan_from = buffer.len().saturating_sub(PHOTO_END.len() - 1);
        buffer.extend_from_slice(chunk);

        let end = find_terminator(buffer, scan_from)?;
        let trailing = buffer.split_off(end + PHOTO_END.len());
        buffer.truncate(end);
        let photo = PhotoBlob::new(std::mem::take(buffer));

        self.mode = ReaderMode::Telemetry;
        Some(CaptureOutcome::Completed { photo, trailing })
    }

    /// Abandona a captura se o timeout passou desde `started_at`.
    pub fn check_timeout(&mut self, now: Instant) -> Option<CaptureOutcome> {
        let ReaderMode::Capturing { started_at, buffer } = &self.mode else {
            return None;
        };

        let elapsed = now.saturating_duration_since(*started_at);
        if elapsed < self.timeout {
            return None;
        }

        let discarded = buffer.len();
        self.mode = ReaderMode::Telemetry;
        Some(CaptureOutcome::Cancelled { elapsed, discarded })
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
