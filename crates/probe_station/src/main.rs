//! # Probe Station
//!
//! Estação headless: lê telemetria e fotos da sonda pela serial, mantém o
//! relógio da missão e grava as fotos recebidas em disco.
//!
//! ## Uso
//! ```bash
//! probe_station                          # config ao lado do executável
//! probe_station --port /dev/ttyACM0      # sobrescreve a porta da config
//! probe_station --config estacao.toml
//! ```
//!
//! ## Console
//! - `start` / `stop`: inicia e pausa a missão
//! - `quit`: encerra
//! - qualquer outra linha é enviada à sonda como comando

mod console;
mod station;

use probe_core::AppConfig;
use probe_link::ProbeLink;
use station::Station;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, warn};

/// Opções de linha de comando.
#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    port: Option<String>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut parsed = Args::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let value = args.next().ok_or("--config exige um caminho")?;
                    parsed.config = Some(PathBuf::from(value));
                }
                "--port" => {
                    parsed.port = Some(args.next().ok_or("--port exige um nome de porta")?);
                }
                other => return Err(format!("argumento desconhecido: {other}")),
            }
        }
        Ok(parsed)
    }
}

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(2);
        }
    };

    // ── Carregar config ──
    let config_path = args.config.unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    if let Some(port) = args.port {
        config.serial.port = port;
    }

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!("Config inválida: {problem}");
        }
        return ExitCode::from(2);
    }

    // ── Abrir link ──
    let link = match ProbeLink::open(&config.serial, &config.reader) {
        Ok(link) => link,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(1);
        }
    };
    info!(
        "Sonda em {} @ {} baud | fotos em {}",
        config.serial.port,
        config.serial.baud_rate,
        config.station.photo_dir.display()
    );

    let console = match console::spawn_console_thread(std::io::BufReader::new(std::io::stdin())) {
        Ok(rx) => Some(rx),
        Err(e) => {
            warn!("Console indisponível: {e}");
            None
        }
    };

    let interval = config.station.poll_interval();
    let mut station = Station::new(link, &config.station);

    // ── Loop principal ──
    'main: loop {
        let cycle_start = Instant::now();

        if let Some(rx) = &console {
            for input in rx.try_iter() {
                if !station.handle(input) {
                    break 'main;
                }
            }
        }

        let report = station.tick();
        if let Some(step) = report.sampled {
            if step % 25 == 0 {
                info!("Missão {} | {} amostras", station.session().clock_label(), step);
            }
        }

        // Dormir pelo tempo restante do intervalo
        let elapsed = cycle_start.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }

    station.shutdown();
    ExitCode::SUCCESS
}
