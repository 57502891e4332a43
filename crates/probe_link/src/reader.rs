//! Thread de leitura: demultiplexa telemetria e fotos do mesmo stream.
//!
//! Cada iteração faz uma única leitura limitada por timeout:
//! - **Telemetria**: lê uma linha, checa a sentinela `PHOTO_START` e passa o
//!   resto para o [`FrameAssembler`]. Frames completos vão para o [`Mailbox`].
//! - **Foto**: lê um bloco cru, procura `PHOTO_END` e, com ou sem bytes
//!   novos, avalia o timeout da captura.
//!
//! Todo o estado de parsing pertence a esta thread; só mailbox, canais e a
//! flag de execução cruzam para o consumidor.

use crate::mailbox::Mailbox;
use crate::source::{ByteSource, LineBuffer};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use probe_core::photo::{CaptureOutcome, PhotoCapture};
use probe_core::protocol::{self, FrameAssembler, LineKind};
use probe_core::{PhotoBlob, ReaderConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Maior multiplicador do backoff após erros seguidos.
const MAX_BACKOFF_SHIFT: u32 = 3;

/// Resultado de uma captura, entregue ao consumidor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoEvent {
    /// Foto completa; o consumidor passa a ser dono dos bytes.
    Completed(PhotoBlob),
    /// `PHOTO_END` não chegou dentro do timeout.
    Cancelled { elapsed: Duration, discarded: usize },
}

// ──────────────────────────────────────────────
// Estatísticas
// ──────────────────────────────────────────────

/// Contadores atualizados pela thread de leitura.
#[derive(Debug, Default)]
pub struct LinkStats {
    frames: AtomicU64,
    lines_dropped: AtomicU64,
    photos_completed: AtomicU64,
    photos_cancelled: AtomicU64,
    photo_events_dropped: AtomicU64,
    read_errors: AtomicU64,
    commands_sent: AtomicU64,
    command_errors: AtomicU64,
}

/// Cópia dos contadores em um instante.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub lines_dropped: u64,
    pub photos_completed: u64,
    pub photos_cancelled: u64,
    /// Eventos de foto descartados porque a fila estava cheia.
    pub photo_events_dropped: u64,
    pub read_errors: u64,
    pub commands_sent: u64,
    pub command_errors: u64,
}

impl LinkStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            lines_dropped: self.lines_dropped.load(Ordering::Relaxed),
            photos_completed: self.photos_completed.load(Ordering::Relaxed),
            photos_cancelled: self.photos_cancelled.load(Ordering::Relaxed),
            photo_events_dropped: self.photo_events_dropped.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            command_errors: self.command_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ──────────────────────────────────────────────
// Loop
// ──────────────────────────────────────────────

/// Pontas compartilhadas entre a thread de leitura e o [`crate::ProbeLink`].
pub(crate) struct Wiring {
    pub mailbox: Mailbox,
    pub stats: Arc<LinkStats>,
    pub running: Arc<AtomicBool>,
    pub photos: Sender<PhotoEvent>,
    pub commands: Receiver<String>,
}

pub(crate) struct ReaderLoop<S: ByteSource> {
    source: S,
    assembler: FrameAssembler,
    capture: PhotoCapture,
    /// Bytes já lidos que ainda não foram consumidos (sobra após `PHOTO_END`).
    carry: LineBuffer,
    wiring: Wiring,
    read_timeout: Duration,
    chunk_size: usize,
    error_backoff: Duration,
    consecutive_errors: u32,
}

impl<S: ByteSource> ReaderLoop<S> {
    pub(crate) fn new(source: S, cfg: &ReaderConfig, wiring: Wiring) -> Self {
        Self {
            source,
            assembler: FrameAssembler::new(cfg.unknown_keys, cfg.max_unknown_keys),
            capture: PhotoCapture::new(cfg.photo_timeout()),
            carry: LineBuffer::default(),
            wiring,
            read_timeout: cfg.read_timeout(),
            chunk_size: cfg.chunk_size.max(1),
            error_backoff: cfg.error_backoff(),
            consecutive_errors: 0,
        }
    }

    fn is_running(&self) -> bool {
        self.wiring.running.load(Ordering::Acquire)
    }

    /// Roda até a flag de execução cair, depois fecha a fonte.
    pub(crate) fn run(mut self) {
        info!("Leitor iniciado");
        while self.is_running() {
            self.step();
        }

        // Comandos aceitos antes do stop ainda vão para o fio
        self.flush_commands();
        if self.capture.is_capturing() {
            info!(
                "Captura de foto interrompida pelo encerramento ({} bytes)",
                self.capture.buffered()
            );
        }
        if let Err(e) = self.source.close() {
            warn!("Erro ao fechar a fonte: {e}");
        }
        info!("Leitor encerrado");
    }

    /// Uma iteração do loop.
    pub(crate) fn step(&mut self) {
        self.flush_commands();
        if self.capture.is_capturing() {
            self.step_capturing();
        } else {
            self.step_telemetry();
        }
    }

    // ── Modo telemetria ──

    fn step_telemetry(&mut self) {
        let line = match self.next_line() {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => return self.on_read_error(e),
        };
        self.handle_line(&line);
    }

    /// Próxima linha, consumindo primeiro o que sobrou de uma foto.
    fn next_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        if let Some(line) = self.carry.take_line() {
            return Ok(Some(line));
        }

        let read = self.source.read_line(self.read_timeout);
        if read.is_ok() {
            self.consecutive_errors = 0;
        }
        match read? {
            Some(rest) if !self.carry.is_empty() => {
                // Linha partida entre o bloco do PHOTO_END e a leitura seguinte
                let mut line = self.carry.take_raw(usize::MAX);
                line.extend_from_slice(&rest);
                Ok(Some(line))
            }
            other => Ok(other),
        }
    }

    fn handle_line(&mut self, raw: &[u8]) {
        let text = protocol::decode_line(raw);
        match protocol::classify(&text) {
            LineKind::Blank => {}
            LineKind::PhotoStart => {
                info!("PHOTO_START recebido, entrando em modo foto");
                self.capture.begin(Instant::now());
            }
            LineKind::Data(line) => match self.assembler.feed(line) {
                Ok(Some(frame)) => {
                    let seq = self.wiring.mailbox.publish(frame);
                    LinkStats::bump(&self.wiring.stats.frames);
                    debug!(
                        "Frame #{seq}: {:.2}°C | {:.0} ppm | flex {:.2} V",
                        frame.temperature_c(),
                        frame.tds_ppm(),
                        frame.flex_voltage()
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    LinkStats::bump(&self.wiring.stats.lines_dropped);
                    debug!("Linha descartada: {e}");
                }
            },
        }
    }

    // ── Modo foto ──

    fn step_capturing(&mut self) {
        let chunk = if self.carry.is_empty() {
            match self.source.read_available(self.chunk_size) {
                Ok(chunk) => {
                    self.consecutive_errors = 0;
                    chunk
                }
                Err(e) => {
                    self.on_read_error(e);
                    Vec::new()
                }
            }
        } else {
            self.carry.take_raw(self.chunk_size)
        };

        // Timeout avaliado sempre, tenha chegado byte ou não
        let outcome = self
            .capture
            .push(&chunk)
            .or_else(|| self.capture.check_timeout(Instant::now()));

        match outcome {
            Some(CaptureOutcome::Completed { photo, trailing }) => {
                info!(
                    "Foto recebida: {} bytes ({} bytes de telemetria após PHOTO_END)",
                    photo.len(),
                    trailing.len()
                );
                // A sobra vem antes de qualquer byte ainda no carry
                let rest = self.carry.take_raw(usize::MAX);
                self.carry.push(&trailing);
                self.carry.push(&rest);

                LinkStats::bump(&self.wiring.stats.photos_completed);
                self.emit(PhotoEvent::Completed(photo));
            }
            Some(CaptureOutcome::Cancelled { elapsed, discarded }) => {
                warn!(
                    "Foto abandonada após {:.1}s sem PHOTO_END ({discarded} bytes descartados)",
                    elapsed.as_secs_f64()
                );
                LinkStats::bump(&self.wiring.stats.photos_cancelled);
                self.emit(PhotoEvent::Cancelled { elapsed, discarded });
            }
            None => {}
        }
    }

    /// Entrega um evento de foto sem bloquear. Com a fila cheia o evento é
    /// descartado e contado; a leitura não espera o consumidor.
    fn emit(&self, event: PhotoEvent) {
        match self.wiring.photos.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(ev)) => {
                LinkStats::bump(&self.wiring.stats.photo_events_dropped);
                match ev {
                    PhotoEvent::Completed(photo) => {
                        warn!("Fila de fotos cheia, foto de {} bytes descartada", photo.len())
                    }
                    PhotoEvent::Cancelled { .. } => {
                        debug!("Fila de fotos cheia, cancelamento não entregue")
                    }
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Ninguém escutando eventos de foto");
            }
        }
    }

    // ── Comandos e erros ──

    fn flush_commands(&mut self) {
        while let Ok(cmd) = self.wiring.commands.try_recv() {
            let mut line = Vec::with_capacity(cmd.len() + 1);
            line.extend_from_slice(cmd.as_bytes());
            line.push(b'\n');

            match self.source.write(&line) {
                Ok(()) => {
                    LinkStats::bump(&self.wiring.stats.commands_sent);
                    debug!("→ {cmd}");
                }
                Err(e) => {
                    LinkStats::bump(&self.wiring.stats.command_errors);
                    warn!("Erro ao enviar comando {cmd:?}: {e}");
                }
            }
        }
    }

    fn on_read_error(&mut self, e: std::io::Error) {
        LinkStats::bump(&self.wiring.stats.read_errors);
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);

        let shift = (self.consecutive_errors - 1).min(MAX_BACKOFF_SHIFT);
        let pause = self.error_backoff * (1u32 << shift);
        warn!(
            "Erro de leitura ({} seguidos): {e}. Tentando novamente em {}ms",
            self.consecutive_errors,
            pause.as_millis()
        );
        self.sleep_while_running(pause);
    }

    /// Dorme em fatias curtas para que o stop não espere o backoff inteiro.
    fn sleep_while_running(&self, total: Duration) {
        let slice = Duration::from_millis(20);
        let deadline = Instant::now() + total;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(slice.min(deadline - now));
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::scripted::{ScriptedSource, Step};
    use crossbeam_channel::{bounded, Receiver, Sender};
    use probe_core::{ReaderMode, TelemetryFrame};
    use std::io;

    const SCENARIO: &[u8] = b"Temperature_C:3.2\nTDS_ppm:150\nFlex Voltage:1.1\nGyroX:1\nGyroY:2\nGyroZ:3\nAccelX:0.1\nAccelY:0.2\nAccelZ:0.3\n";

    struct Harness {
        reader: ReaderLoop<ScriptedSource>,
        source: ScriptedSource,
        mailbox: Mailbox,
        stats: Arc<LinkStats>,
        photos: Receiver<PhotoEvent>,
        commands: Sender<String>,
    }

    fn harness(source: ScriptedSource, cfg: ReaderConfig) -> Harness {
        let (photo_tx, photo_rx) = bounded(cfg.photo_queue);
        let (cmd_tx, cmd_rx) = bounded(cfg.command_queue);
        let mailbox = Mailbox::new();
        let stats = Arc::new(LinkStats::default());
        let wiring = Wiring {
            mailbox: mailbox.clone(),
            stats: stats.clone(),
            running: Arc::new(AtomicBool::new(true)),
            photos: photo_tx,
            commands: cmd_rx,
        };
        Harness {
            reader: ReaderLoop::new(source.clone(), &cfg, wiring),
            source,
            mailbox,
            stats,
            photos: photo_rx,
            commands: cmd_tx,
        }
    }

    fn fast_config() -> ReaderConfig {
        ReaderConfig {
            error_backoff_ms: 1,
            ..Default::default()
        }
    }

    impl Harness {
        fn run_steps(&mut self, n: usize) {
            for _ in 0..n {
                self.reader.step();
            }
        }

        fn latest(&self) -> Option<TelemetryFrame> {
            self.mailbox.latest()
        }
    }

    fn assert_scenario_frame(frame: TelemetryFrame) {
        assert_eq!(frame.temperature_c(), 3.2);
        assert_eq!(frame.tds_ppm(), 150.0);
        assert_eq!(frame.flex_voltage(), 1.1);
        assert_eq!(frame.gyro(), [1.0, 2.0, 3.0]);
        assert_eq!(frame.accel(), [0.1, 0.2, 0.3]);
    }

    #[test]
    fn scenario_lines_publish_one_frame() {
        let mut h = harness(ScriptedSource::data(&[SCENARIO]), fast_config());
        assert_eq!(h.latest(), None);
        h.run_steps(9);
        assert_scenario_frame(h.latest().unwrap());
        assert_eq!(h.mailbox.sequence(), 1);
    }

    #[test]
    fn lines_split_across_reads_are_reassembled() {
        let (a, b) = SCENARIO.split_at(23);
        let mut h = harness(ScriptedSource::data(&[a, b]), fast_config());
        h.run_steps(12);
        assert_scenario_frame(h.latest().unwrap());
    }

    #[test]
    fn malformed_lines_are_counted_and_skipped() {
        let mut input = b"garbage without colon\nTDS_ppm: abc\n\xFF\xFE\n\r\n".to_vec();
        input.extend_from_slice(SCENARIO);
        let mut h = harness(ScriptedSource::data(&[&input]), fast_config());
        h.run_steps(14);
        assert_scenario_frame(h.latest().unwrap());
        assert_eq!(h.stats.snapshot().lines_dropped, 3);
    }

    #[test]
    fn full_photo_queue_does_not_stall_telemetry() {
        let cfg = ReaderConfig {
            photo_queue: 1,
            ..fast_config()
        };
        let src = ScriptedSource::data(&[
            b"PHOTO_START\n\x01\x02PHOTO_END",
            b"PHOTO_START\n\x03PHOTO_END",
            SCENARIO,
        ]);
        let mut h = harness(src, cfg);

        // Ninguém consome a fila de fotos
        h.run_steps(20);

        assert_scenario_frame(h.latest().unwrap());
        let stats = h.stats.snapshot();
        assert_eq!(stats.photos_completed, 2);
        assert_eq!(stats.photo_events_dropped, 1);

        // A primeira foto continua na fila, a segunda foi descartada
        assert_eq!(
            h.photos.try_recv(),
            Ok(PhotoEvent::Completed(PhotoBlob::new(vec![0x01, 0x02])))
        );
        assert!(h.photos.try_recv().is_err());
    }

    #[test]
    fn photo_then_telemetry_after_terminator() {
        let photo: Vec<u8> = (0u8..=200).collect();
        let (first, second) = photo.split_at(150);

        let mut tail = second.to_vec();
        tail.extend_from_slice(b"PHOTO_END");
        tail.extend_from_slice(SCENARIO);

        let src = ScriptedSource::new([
            Step::Data(b"PHOTO_START\n".to_vec()),
            Step::Data(first.to_vec()),
            Step::Stall,
            Step::Data(tail),
        ]);
        let mut h = harness(src, fast_config());

        h.run_steps(1);
        assert!(h.reader.capture.is_capturing());

        // Até o terminador: blocos de 64 bytes
        let mut steps = 0;
        while h.reader.capture.is_capturing() {
            h.reader.step();
            steps += 1;
            assert!(steps < 50, "captura não terminou");
        }
        assert_eq!(h.reader.capture.mode(), &ReaderMode::Telemetry);

        match h.photos.try_recv() {
            Ok(PhotoEvent::Completed(blob)) => assert_eq!(blob.as_bytes(), &photo[..]),
            other => panic!("esperava Completed, veio {other:?}"),
        }
        assert!(h.photos.try_recv().is_err());

        h.run_steps(9);
        assert_scenario_frame(h.latest().unwrap());
        assert_eq!(h.stats.snapshot().photos_completed, 1);
    }

    #[test]
    fn terminator_split_across_reads() {
        let src = ScriptedSource::data(&[
            b"PHOTO_START\n",
            b"\x01\x02PHOT",
            b"O_EN",
            b"DGyroX:5\n",
        ]);
        let mut h = harness(src, fast_config());
        h.run_steps(5);

        match h.photos.try_recv() {
            Ok(PhotoEvent::Completed(blob)) => assert_eq!(blob.as_bytes(), &[0x01, 0x02]),
            other => panic!("esperava Completed, veio {other:?}"),
        }
        assert_eq!(h.reader.assembler.pending_value(probe_core::Field::GyroX), Some(5.0));
    }

    #[test]
    fn photo_bytes_in_same_read_as_sentinel_are_kept() {
        let src = ScriptedSource::data(&[b"PHOTO_START\nJPEGDATAPHOTO_END\n"]);
        let mut h = harness(src, fast_config());
        h.run_steps(3);
        match h.photos.try_recv() {
            Ok(PhotoEvent::Completed(blob)) => assert_eq!(blob.as_bytes(), b"JPEGDATA"),
            other => panic!("esperava Completed, veio {other:?}"),
        }
    }

    #[test]
    fn partial_line_after_terminator_joins_next_read() {
        let src = ScriptedSource::data(&[
            b"PHOTO_START\n",
            b"xyzPHOTO_ENDTemperature_C:3.",
            b"2\nTDS_ppm:150\nFlex Voltage:1.1\nGyroX:1\nGyroY:2\nGyroZ:3\nAccelX:0.1\nAccelY:0.2\nAccelZ:0.3\n",
        ]);
        let mut h = harness(src, fast_config());
        h.run_steps(12);
        assert!(matches!(h.photos.try_recv(), Ok(PhotoEvent::Completed(_))));
        assert_scenario_frame(h.latest().unwrap());
    }

    #[test]
    fn stalled_capture_is_cancelled_and_telemetry_resumes() {
        let cfg = ReaderConfig {
            photo_timeout_secs: 0.05,
            ..fast_config()
        };
        let src = ScriptedSource::data(&[b"PHOTO_START\n", b"half a photo"]);
        let mut h = harness(src, cfg);
        h.run_steps(2);
        assert_eq!(h.reader.capture.buffered(), 12);

        // Sem bytes novos: o timeout precisa ser avaliado mesmo assim
        std::thread::sleep(Duration::from_millis(60));
        h.run_steps(1);
        assert!(!h.reader.capture.is_capturing());

        match h.photos.try_recv() {
            Ok(PhotoEvent::Cancelled { discarded, elapsed }) => {
                assert_eq!(discarded, 12);
                assert!(elapsed >= Duration::from_millis(50));
            }
            other => panic!("esperava Cancelled, veio {other:?}"),
        }
        assert!(h.photos.try_recv().is_err());

        h.reader.source = ScriptedSource::data(&[SCENARIO]);
        h.run_steps(9);
        assert_scenario_frame(h.latest().unwrap());
        assert_eq!(h.stats.snapshot().photos_cancelled, 1);
    }

    #[test]
    fn read_errors_do_not_stop_the_loop() {
        let src = ScriptedSource::new([
            Step::Fail(io::ErrorKind::BrokenPipe),
            Step::Fail(io::ErrorKind::Other),
            Step::Data(SCENARIO.to_vec()),
        ]);
        let mut h = harness(src, fast_config());
        h.run_steps(11);
        assert_scenario_frame(h.latest().unwrap());
        let stats = h.stats.snapshot();
        assert_eq!(stats.read_errors, 2);
        assert_eq!(h.reader.consecutive_errors, 0);
    }

    #[test]
    fn commands_are_written_with_newline() {
        let mut h = harness(ScriptedSource::default(), fast_config());
        h.commands.send("SNAP".into()).unwrap();
        h.commands.send("LEFT".into()).unwrap();
        h.run_steps(1);
        assert_eq!(h.source.written_text(), "SNAP\nLEFT\n");
        assert_eq!(h.stats.snapshot().commands_sent, 2);
    }

    #[test]
    fn command_write_failure_is_logged_not_fatal() {
        let src = ScriptedSource::data(&[SCENARIO]).failing_writes();
        let mut h = harness(src, fast_config());
        h.commands.send("RIGHT".into()).unwrap();
        h.run_steps(9);
        assert_eq!(h.stats.snapshot().command_errors, 1);
        assert_scenario_frame(h.latest().unwrap());
    }

    #[test]
    fn run_exits_on_stop_flag_and_closes_source() {
        let h = harness(ScriptedSource::data(&[SCENARIO]), fast_config());
        let running = h.reader.wiring.running.clone();
        let closed = h.source.closed.clone();
        let mailbox = h.mailbox.clone();

        let worker = std::thread::spawn(move || h.reader.run());
        while mailbox.latest().is_none() {
            std::thread::sleep(Duration::from_millis(1));
        }
        running.store(false, Ordering::Release);
        worker.join().unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }
}
