//! Ponta do consumidor: mailbox, comandos, eventos de foto e stop.

use crate::error::LinkError;
use crate::mailbox::Mailbox;
use crate::reader::{LinkStats, PhotoEvent, ReaderLoop, StatsSnapshot, Wiring};
use crate::source::{ByteSource, SerialSource};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use probe_core::{ReaderConfig, SerialConfig, TelemetryFrame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{error, info};

/// Link com a sonda: uma thread de leitura por fonte de bytes.
///
/// `ProbeLink` é `Sync`; pode ser compartilhado por `Arc` e o [`stop`]
/// pode vir de qualquer thread.
///
/// [`stop`]: ProbeLink::stop
pub struct ProbeLink {
    running: Arc<AtomicBool>,
    mailbox: Mailbox,
    stats: Arc<LinkStats>,
    commands: Sender<String>,
    photos: Receiver<PhotoEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ProbeLink {
    /// Abre a porta serial e inicia a leitura. Falha de abertura é fatal.
    pub fn open(serial: &SerialConfig, reader: &ReaderConfig) -> Result<Self, LinkError> {
        let source = SerialSource::open(&serial.port, serial.baud_rate)?;
        Self::spawn(source, reader)
    }

    /// Inicia a thread de leitura sobre uma fonte já aberta.
    pub fn spawn<S>(source: S, cfg: &ReaderConfig) -> Result<Self, LinkError>
    where
        S: ByteSource + 'static,
    {
        let (photo_tx, photo_rx) = bounded::<PhotoEvent>(cfg.photo_queue.max(1));
        let (cmd_tx, cmd_rx) = bounded::<String>(cfg.command_queue.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let mailbox = Mailbox::new();
        let stats = Arc::new(LinkStats::default());

        let reader = ReaderLoop::new(
            source,
            cfg,
            Wiring {
                mailbox: mailbox.clone(),
                stats: stats.clone(),
                running: running.clone(),
                photos: photo_tx,
                commands: cmd_rx,
            },
        );

        let worker = std::thread::Builder::new()
            .name("probe-reader".into())
            .spawn(move || reader.run())
            .map_err(LinkError::Spawn)?;

        Ok(Self {
            running,
            mailbox,
            stats,
            commands: cmd_tx,
            photos: photo_rx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Último frame completo, sem bloquear. `None` antes do primeiro.
    pub fn get_latest(&self) -> Option<TelemetryFrame> {
        self.mailbox.latest()
    }

    /// Último frame com o número de sequência, para detectar frames novos.
    pub fn latest_with_sequence(&self) -> Option<(u64, TelemetryFrame)> {
        self.mailbox.latest_with_sequence()
    }

    /// Enfileira um comando; a thread de leitura escreve `texto\n` no fio.
    ///
    /// Sem confirmação nem retry. Erro de escrita só aparece no log e em
    /// [`StatsSnapshot::command_errors`].
    pub fn send_command(&self, text: &str) -> Result<(), LinkError> {
        if !self.is_running() {
            return Err(LinkError::Stopped);
        }

        let cmd = text.trim_end_matches(['\r', '\n']);
        if cmd.is_empty() || cmd.contains(['\r', '\n']) {
            return Err(LinkError::InvalidCommand(text.to_string()));
        }

        match self.commands.try_send(cmd.to_string()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(cmd)) => Err(LinkError::CommandQueueFull(cmd)),
            Err(TrySendError::Disconnected(_)) => Err(LinkError::Stopped),
        }
    }

    /// Assinatura dos eventos de foto. Cada evento é entregue a um único
    /// receptor; clones competem pela mesma fila.
    pub fn photo_events(&self) -> Receiver<PhotoEvent> {
        self.photos.clone()
    }

    /// Próximo evento de foto pendente, sem bloquear.
    pub fn try_next_photo(&self) -> Option<PhotoEvent> {
        self.photos.try_recv().ok()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Encerra a leitura e espera a thread fechar a fonte.
    ///
    /// A thread percebe a flag depois da leitura em andamento (no máximo um
    /// timeout de leitura). Chamadas repetidas não fazem nada.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("Encerrando link da sonda");
        }

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Thread de leitura terminou em pânico");
            }
        }
    }
}

impl Drop for ProbeLink {
    fn drop(&mut self) {
        self.stop();
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
