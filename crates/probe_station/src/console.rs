//! Thread de console que lê stdin e envia entradas para o loop via channel.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::io::BufRead;
use tracing::{debug, warn};

/// Entrada digitada pelo operador.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    /// Inicia (ou reinicia) o relógio da missão.
    Start,
    /// Pausa a missão.
    Stop,
    /// Encerra a estação.
    Quit,
    /// Qualquer outra coisa vai para a sonda como está.
    Command(String),
}

/// Interpreta uma linha. Linhas vazias são ignoradas.
pub fn parse_input(line: &str) -> Option<ConsoleInput> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(match line.to_ascii_lowercase().as_str() {
        "start" => ConsoleInput::Start,
        "stop" => ConsoleInput::Stop,
        "quit" | "exit" => ConsoleInput::Quit,
        _ => ConsoleInput::Command(line.to_string()),
    })
}

/// Inicia a thread de console. Retorna o receiver do channel.
///
/// Em EOF a thread termina e o channel desconecta; a estação continua.
pub fn spawn_console_thread<R>(input: R) -> std::io::Result<Receiver<ConsoleInput>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = bounded::<ConsoleInput>(16);

    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || console_loop(input, &tx))?;

    Ok(rx)
}

fn console_loop<R: BufRead>(input: R, tx: &Sender<ConsoleInput>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Erro ao ler stdin: {e}");
                break;
            }
        };
        let Some(entry) = parse_input(&line) else {
            continue;
        };
        let quit = entry == ConsoleInput::Quit;
        if tx.send(entry).is_err() || quit {
            break;
        }
    }
    debug!("Console encerrado");
}
