//! Estado da missão do lado do consumidor.
//!
//! Relógio de missão, flag de execução e histórico de amostras ficam num
//! objeto explícito, criado pelo orquestrador e passado a quem precisa.

use crate::types::TelemetryFrame;
use std::collections::VecDeque;
use std::time::Duration;

/// Sessão de missão avançada por ticks do consumidor.
///
/// O relógio anda um intervalo de tick por chamada a [`MissionSession::tick`]
/// enquanto a missão está rodando; cada tick amostra o frame mais recente
/// (sample-and-hold).
#[derive(Debug, Clone)]
pub struct MissionSession {
    running: bool,
    tick_interval: Duration,
    mission_time: Duration,
    history: VecDeque<(u64, TelemetryFrame)>,
    capacity: usize,
    steps: u64,
}

impl MissionSession {
    pub fn new(tick_interval: Duration, capacity: usize) -> Self {
        Self {
            running: false,
            tick_interval,
            mission_time: Duration::ZERO,
            history: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            steps: 0,
        }
    }

    /// Zera o relógio e começa a amostrar. O histórico anterior é mantido.
    pub fn start(&mut self) {
        self.running = true;
        self.mission_time = Duration::ZERO;
    }

    /// Pausa relógio e amostragem.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Avança um tick. Retorna o número do passo gravado, se houve amostra.
    pub fn tick(&mut self, latest: Option<&TelemetryFrame>) -> Option<u64> {
        if !self.running {
            return None;
        }
        self.mission_time += self.tick_interval;

        let frame = latest?;
        self.steps += 1;
        if self.capacity == 0 {
            return Some(self.steps);
        }
        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back((self.steps, *frame));
        Some(self.steps)
    }

    pub fn mission_time(&self) -> Duration {
        self.mission_time
    }

    /// Relógio no formato `MM:SS`.
    pub fn clock_label(&self) -> String {
        let secs = self.mission_time.as_secs();
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }

    /// Amostras `(passo, frame)` da mais antiga para a mais nova.
    pub fn history(&self) -> impl Iterator<Item = &(u64, TelemetryFrame)> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Total de passos amostrados, incluindo os que já saíram do histórico.
    pub fn steps(&self) -> u64 {
        self.steps
    }
}
