//! Mailbox de valor único: o último frame completo.
//!
//! A thread de leitura escreve, o consumidor lê no próprio ritmo. Leitura
//! não consome: chamadas repetidas entre duas publicações retornam o mesmo
//! frame. Frames intermediários podem ser pulados, nunca invertidos.

use probe_core::TelemetryFrame;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default)]
struct Slot {
    sequence: u64,
    frame: Option<TelemetryFrame>,
}

/// Slot compartilhado, last-write-wins.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    slot: Arc<RwLock<Slot>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitui o frame atual. Retorna o novo número de sequência (1, 2, …).
    pub fn publish(&self, frame: TelemetryFrame) -> u64 {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.sequence += 1;
        slot.frame = Some(frame);
        slot.sequence
    }

    /// Último frame publicado, `None` antes do primeiro.
    pub fn latest(&self) -> Option<TelemetryFrame> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).frame
    }

    /// Último frame com seu número de sequência.
    pub fn latest_with_sequence(&self) -> Option<(u64, TelemetryFrame)> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        slot.frame.map(|f| (slot.sequence, f))
    }

    /// Quantos frames já foram publicados.
    pub fn sequence(&self) -> u64 {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).sequence
    }
}
