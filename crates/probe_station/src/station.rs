//! Loop do consumidor: sessão de missão, mailbox e gravação de fotos.

use crate::console::ConsoleInput;
use probe_core::{MissionSession, PhotoBlob, StationConfig};
use probe_link::{PhotoEvent, ProbeLink};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// O que aconteceu em um tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Sequência do mailbox, quando chegou frame novo desde o último tick.
    pub new_frame: Option<u64>,
    /// Passo gravado no histórico da missão.
    pub sampled: Option<u64>,
    pub photos_saved: Vec<PathBuf>,
    pub photos_cancelled: usize,
}

pub struct Station {
    link: ProbeLink,
    session: MissionSession,
    photos: PhotoSink,
    last_sequence: u64,
}

impl Station {
    pub fn new(link: ProbeLink, cfg: &StationConfig) -> Self {
        Self {
            link,
            session: MissionSession::new(cfg.poll_interval(), cfg.history_size),
            photos: PhotoSink::new(&cfg.photo_dir),
            last_sequence: 0,
        }
    }

    pub fn session(&self) -> &MissionSession {
        &self.session
    }

    pub fn link(&self) -> &ProbeLink {
        &self.link
    }

    /// Aplica uma entrada do console. Retorna `false` quando é hora de sair.
    pub fn handle(&mut self, input: ConsoleInput) -> bool {
        match input {
            ConsoleInput::Start => {
                self.session.start();
                info!("Missão iniciada");
            }
            ConsoleInput::Stop => {
                self.session.stop();
                info!("Missão pausada em {}", self.session.clock_label());
            }
            ConsoleInput::Quit => return false,
            ConsoleInput::Command(cmd) => match self.link.send_command(&cmd) {
                Ok(()) => info!("→ comando {cmd:?}"),
                Err(e) => warn!("Comando {cmd:?} não enviado: {e}"),
            },
        }
        true
    }

    /// Um ciclo de polling.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        let latest = self.link.latest_with_sequence();
        if let Some((seq, frame)) = &latest {
            if *seq != self.last_sequence {
                self.last_sequence = *seq;
                report.new_frame = Some(*seq);
                debug!(
                    "Frame #{seq} | {:.2} °C | {:.0} ppm | flex {:.2} V",
                    frame.temperature_c(),
                    frame.tds_ppm(),
                    frame.flex_voltage()
                );
            }
        }
        report.sampled = self.session.tick(latest.as_ref().map(|(_, f)| f));

        while let Some(event) = self.link.try_next_photo() {
            match event {
                PhotoEvent::Completed(blob) => match self.photos.store(&blob) {
                    Ok(path) => {
                        info!("📷 Foto salva em {} ({} bytes)", path.display(), blob.len());
                        report.photos_saved.push(path);
                    }
                    Err(e) => error!("Falha ao gravar foto ({} bytes): {e}", blob.len()),
                },
                PhotoEvent::Cancelled { elapsed, discarded } => {
                    warn!(
                        "Foto cancelada após {:.1}s ({discarded} bytes descartados)",
                        elapsed.as_secs_f64()
                    );
                    report.photos_cancelled += 1;
                }
            }
        }

        report
    }

    /// Para o link e registra o resumo.
    pub fn shutdown(self) {
        self.link.stop();
        let stats = self.link.stats();
        info!(
            "Encerrado | {} frames | {} fotos ({} canceladas, {} eventos perdidos) | {} linhas descartadas | {} erros de leitura",
            stats.frames,
            stats.photos_completed,
            stats.photos_cancelled,
            stats.photo_events_dropped,
            stats.lines_dropped,
            stats.read_errors
        );
    }
}

// ──────────────────────────────────────────────
// Gravação de fotos
// ──────────────────────────────────────────────

/// Grava fotos como `photo_NNNN.bin`, sem sobrescrever arquivos existentes.
#[derive(Debug)]
pub struct PhotoSink {
    dir: PathBuf,
    next_index: u32,
}

impl PhotoSink {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            next_index: 1,
        }
    }

    pub fn store(&mut self, blob: &PhotoBlob) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = loop {
            let candidate = self.dir.join(format!("photo_{:04}.bin", self.next_index));
            self.next_index += 1;
            if !candidate.exists() {
                break candidate;
            }
        };
        std::fs::write(&path, blob.as_bytes())?;
        Ok(path)
    }
}
