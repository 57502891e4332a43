//! Fonte de bytes: a porta serial da sonda.
//!
//! O leitor só enxerga o trait [`ByteSource`]; a implementação real usa o
//! crate `serialport`. Uma leitura de linha pode puxar do driver mais bytes
//! do que a linha; o excedente fica no [`LineBuffer`] e é entregue na
//! próxima leitura, seja de linha ou crua.

use crate::error::LinkError;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Timeout de uma leitura crua quando não há nada esperando no driver.
const RAW_READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Tamanho do buffer de cada `read` no driver.
const READ_SCRATCH: usize = 256;

// ──────────────────────────────────────────────
// Trait
// ──────────────────────────────────────────────

/// Canal tipo serial consumido pelo leitor.
///
/// Timeouts de leitura não são erros: viram `Ok(None)` / `Ok(vec![])`.
pub trait ByteSource: Send {
    /// Lê até `\n` (incluso). `None` se o timeout passou sem linha completa;
    /// bytes parciais ficam guardados para a próxima chamada.
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;

    /// Lê no máximo `max_len` bytes, possivelmente nenhum. Bloqueia por pouco tempo.
    fn read_available(&mut self, max_len: usize) -> io::Result<Vec<u8>>;

    /// Bytes prontos para leitura (buffer interno + driver).
    fn bytes_waiting(&mut self) -> io::Result<usize>;

    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Libera o canal. Operações seguintes falham com `NotConnected`.
    fn close(&mut self) -> io::Result<()>;
}

// ──────────────────────────────────────────────
// Buffer de linhas
// ──────────────────────────────────────────────

/// Bytes já lidos do driver e ainda não entregues.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Remove e retorna a primeira linha completa (com `\n`).
    pub fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let rest = self.pending.split_off(end + 1);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    /// Remove até `max_len` bytes do início, sem olhar para `\n`.
    pub fn take_raw(&mut self, max_len: usize) -> Vec<u8> {
        let n = max_len.min(self.pending.len());
        self.pending.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ──────────────────────────────────────────────
// Porta serial real
// ──────────────────────────────────────────────

/// [`ByteSource`] sobre uma porta `serialport`.
pub struct SerialSource {
    name: String,
    port: Option<Box<dyn SerialPort>>,
    buffer: LineBuffer,
}

impl SerialSource {
    /// Abre a porta em 8N1 sem controle de fluxo.
    pub fn open(path: &str, baud: u32) -> Result<Self, LinkError> {
        let port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(RAW_READ_TIMEOUT)
            .open()
            .map_err(|source| LinkError::Open {
                port: path.to_string(),
                baud,
                source,
            })?;

        info!("Porta serial {path} aberta @ {baud} baud");
        Ok(Self {
            name: path.to_string(),
            port: Some(port),
            buffer: LineBuffer::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "porta serial fechada")
}

/// `read` que trata timeout do driver como zero bytes.
fn read_some(port: &mut dyn SerialPort, buf: &mut [u8]) -> io::Result<usize> {
    match port.read(buf) {
        Ok(n) => Ok(n),
        Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => Ok(0),
        Err(e) => Err(e),
    }
}

impl ByteSource for SerialSource {
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        if let Some(line) = self.buffer.take_line() {
            return Ok(Some(line));
        }

        let port = self.port.as_mut().ok_or_else(not_connected)?;
        let deadline = Instant::now() + timeout;
        let mut scratch = [0u8; READ_SCRATCH];

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            port.set_timeout(deadline - now)?;

            let n = read_some(&mut **port, &mut scratch)?;
            if n > 0 {
                self.buffer.push(&scratch[..n]);
                if let Some(line) = self.buffer.take_line() {
                    return Ok(Some(line));
                }
            }
        }
    }

    fn read_available(&mut self, max_len: usize) -> io::Result<Vec<u8>> {
        if !self.buffer.is_empty() {
            return Ok(self.buffer.take_raw(max_len));
        }

        let port = self.port.as_mut().ok_or_else(not_connected)?;
        port.set_timeout(RAW_READ_TIMEOUT)?;

        let mut chunk = vec![0u8; max_len];
        let n = read_some(&mut **port, &mut chunk)?;
        chunk.truncate(n);
        Ok(chunk)
    }

    fn bytes_waiting(&mut self) -> io::Result<usize> {
        let port = self.port.as_ref().ok_or_else(not_connected)?;
        let in_driver = port.bytes_to_read()? as usize;
        Ok(self.buffer.len() + in_driver)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port.as_mut().ok_or_else(not_connected)?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if self.port.take().is_some() {
            debug!("Porta {} fechada ({} bytes pendentes descartados)", self.name, self.buffer.len());
        }
        self.buffer = LineBuffer::default();
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Fonte roteirizada para testes
// ──────────────────────────────────────────────
