//! # Probe Link
//!
//! Leitura da porta serial da sonda em uma thread dedicada.
//!
//! O stream mistura linhas de telemetria e fotos binárias; a thread de
//! leitura separa os dois, publica o último frame num mailbox de valor
//! único e entrega as fotos por um canal. O consumidor (UI, estação) lê o
//! mailbox no próprio ritmo.
//!
//! ```no_run
//! use probe_core::AppConfig;
//! use probe_link::ProbeLink;
//!
//! let config = AppConfig::default();
//! let link = ProbeLink::open(&config.serial, &config.reader)?;
//! link.send_command("SNAP")?;
//! if let Some(frame) = link.get_latest() {
//!     println!("{:.2} °C", frame.temperature_c());
//! }
//! link.stop();
//! # Ok::<(), probe_link::LinkError>(())
//! ```
//!
//! ## Módulos
//! - [`source`] – Trait `ByteSource` e a porta serial real
//! - [`mailbox`] – Slot do último frame
//! - [`reader`] – Loop de leitura, eventos de foto e estatísticas
//! - [`link`] – `ProbeLink`, a ponta do consumidor

pub mod error;
pub mod source;
pub mod mailbox;
pub mod reader;
pub mod link;

pub use error::LinkError;
pub use link::ProbeLink;
pub use mailbox::Mailbox;
pub use reader::{PhotoEvent, StatsSnapshot};
pub use source::{ByteSource, SerialSource};
