//! Protocolo de fio da sonda.
//!
//! O stream serial mistura texto e binário sem prefixo de tamanho:
//!
//! ```text
//! Temperature_C:3.2\n        ← linha de telemetria  <chave>:<valor>\n
//! ...
//! PHOTO_START\n              ← sentinela, entra em modo foto
//! <bytes crus da foto>       ← sem alinhamento de linha
//! PHOTO_END                  ← terminador, procurado como substring
//! TDS_ppm:150\n              ← telemetria continua logo depois
//! ```
//!
//! Este módulo cuida da parte texto: classificação de linhas e montagem de
//! frames. A parte binária fica em [`crate::photo`].

use crate::types::{Field, TelemetryFrame};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Linha que coloca o leitor em modo foto.
pub const PHOTO_START: &str = "PHOTO_START";

/// Terminador da foto, procurado byte a byte.
pub const PHOTO_END: &[u8] = b"PHOTO_END";

/// Erros de uma linha de telemetria. A linha é descartada, o buffer não muda.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LineError {
    #[error("Linha sem ':' ({0:?})")]
    MissingColon(String),

    #[error("Valor inválido para {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("Limite de {limit} chaves desconhecidas atingido, descartando {key:?}")]
    UnknownKeyLimit { key: String, limit: usize },
}

/// O que fazer com chaves que não são um dos 9 campos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownKeyPolicy {
    /// Mantém as chaves entre frames (limitado por `max_unknown_keys`).
    #[default]
    Retain,
    /// Descarta todas as chaves desconhecidas quando um frame completa.
    ClearOnFrame,
}

/// Classificação de uma linha de texto recebida em modo telemetria.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// Só espaços / `\r`.
    Blank,
    PhotoStart,
    /// Candidata a `<chave>:<valor>`, já sem espaços nas pontas.
    Data(&'a str),
}

/// Classifica uma linha (com ou sem `\n` final).
pub fn classify(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        LineKind::Blank
    } else if trimmed == PHOTO_START {
        LineKind::PhotoStart
    } else {
        LineKind::Data(trimmed)
    }
}

/// Decodifica bytes do fio como texto. Sequências UTF-8 inválidas viram U+FFFD.
pub fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// Separa `<chave>:<valor>` no primeiro `:` e converte o valor para `f64`.
pub fn parse_line(line: &str) -> Result<(&str, f64), LineError> {
    let (key, value) = line
        .split_once(':')
        .ok_or_else(|| LineError::MissingColon(line.to_string()))?;
    let key = key.trim();
    let value = value.trim();

    let parsed = value.parse::<f64>().map_err(|_| LineError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })?;

    Ok((key, parsed))
}

// ──────────────────────────────────────────────
// Montagem de frames
// ──────────────────────────────────────────────

/// Acumula linhas `<chave>:<valor>` até ter os 9 campos.
///
/// Repetir uma chave antes do frame completar sobrescreve o valor anterior.
/// Quando o último campo chega, os 9 são removidos do buffer e viram um
/// [`TelemetryFrame`] na mesma chamada.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    fields: [Option<f64>; Field::COUNT],
    unknown: HashMap<String, f64>,
    policy: UnknownKeyPolicy,
    max_unknown_keys: usize,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(UnknownKeyPolicy::Retain, 32)
    }
}

impl FrameAssembler {
    pub fn new(policy: UnknownKeyPolicy, max_unknown_keys: usize) -> Self {
        Self {
            fields: [None; Field::COUNT],
            unknown: HashMap::new(),
            policy,
            max_unknown_keys,
        }
    }

    /// Processa uma linha de dados.
    ///
    /// `Ok(None)` enquanto o conjunto não está completo; `Err` quando a linha
    /// é descartada (o estado não muda).
    pub fn feed(&mut self, line: &str) -> Result<Option<TelemetryFrame>, LineError> {
        let (key, value) = parse_line(line)?;

        match Field::from_wire(key) {
            Some(field) => self.fields[field.index()] = Some(value),
            None => {
                if !self.unknown.contains_key(key) && self.unknown.len() >= self.max_unknown_keys {
                    return Err(LineError::UnknownKeyLimit {
                        key: key.to_string(),
                        limit: self.max_unknown_keys,
                    });
                }
                self.unknown.insert(key.to_string(), value);
                return Ok(None);
            }
        }

        Ok(self.take_frame())
    }

    fn take_frame(&mut self) -> Option<TelemetryFrame> {
        if self.fields.iter().any(Option::is_none) {
            return None;
        }

        let mut values = [0.0; Field::COUNT];
        for (slot, value) in self.fields.iter_mut().zip(values.iter_mut()) {
            *value = slot.take()?;
        }

        if self.policy == UnknownKeyPolicy::ClearOnFrame {
            self.unknown.clear();
        }

        Some(TelemetryFrame::from_values(values))
    }

    /// Quantos dos 9 campos já chegaram para o próximo frame.
    pub fn pending_fields(&self) -> usize {
        self.fields.iter().filter(|v| v.is_some()).count()
    }

    /// Valor pendente de um campo, se já chegou.
    pub fn pending_value(&self, field: Field) -> Option<f64> {
        self.fields[field.index()]
    }

    /// Chaves desconhecidas guardadas no momento.
    pub fn unknown_keys(&self) -> impl Iterator<Item = &str> {
        self.unknown.keys().map(String::as_str)
    }

    pub fn unknown_value(&self, key: &str) -> Option<f64> {
        self.unknown.get(key).copied()
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = "Temperature_C:3.2\nTDS_ppm:150\nFlex Voltage:1.1\nGyroX:1\nGyroY:2\nGyroZ:3\nAccelX:0.1\nAccelY:0.2\nAccelZ:0.3\n";

    fn feed_all<'a>(
        asm: &mut FrameAssembler,
        lines: impl IntoIterator<Item = &'a str>,
    ) -> Vec<TelemetryFrame> {
        lines
            .into_iter()
            .filter_map(|l| match classify(l) {
                LineKind::Data(d) => asm.feed(d).ok().flatten(),
                _ => None,
            })
            .collect()
    }

    fn permutations(items: &[&'static str]) -> Vec<Vec<&'static str>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn scenario_produces_one_frame() {
        let mut asm = FrameAssembler::default();
        let frames = feed_all(&mut asm, SCENARIO.lines());
        assert_eq!(frames.len(), 1);

        let f = frames[0];
        assert_eq!(f.temperature_c(), 3.2);
        assert_eq!(f.tds_ppm(), 150.0);
        assert_eq!(f.flex_voltage(), 1.1);
        assert_eq!(f.gyro(), [1.0, 2.0, 3.0]);
        assert_eq!(f.accel(), [0.1, 0.2, 0.3]);
        assert_eq!(asm.pending_fields(), 0);
    }

    #[test]
    fn any_arrival_order_yields_same_frame() {
        let lines: Vec<&'static str> = SCENARIO.lines().collect();
        let expected = feed_all(&mut FrameAssembler::default(), lines.iter().copied())[0];

        // 9! = 362880, todas as ordens
        for order in permutations(&lines) {
            let mut asm = FrameAssembler::default();
            let frames = feed_all(&mut asm, order.iter().copied());
            assert_eq!(frames, vec![expected], "ordem: {order:?}");
        }
    }

    #[test]
    fn frame_completes_only_on_last_field() {
        let mut asm = FrameAssembler::default();
        let lines: Vec<&str> = SCENARIO.lines().collect();
        for line in &lines[..8] {
            assert_eq!(asm.feed(line), Ok(None));
        }
        assert_eq!(asm.pending_fields(), 8);
        assert!(asm.feed(lines[8]).unwrap().is_some());
    }

    #[test]
    fn duplicate_key_later_value_wins() {
        let mut asm = FrameAssembler::default();
        asm.feed("Temperature_C: 1.0").unwrap();
        asm.feed("Temperature_C: 7.5").unwrap();
        let frames = feed_all(&mut asm, SCENARIO.lines().skip(1));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].temperature_c(), 7.5);
    }

    #[test]
    fn unparsable_value_is_dropped_then_recovered() {
        let mut asm = FrameAssembler::default();
        let err = asm.feed("TDS_ppm: abc").unwrap_err();
        assert!(matches!(err, LineError::InvalidValue { ref key, .. } if key == "TDS_ppm"));
        assert_eq!(asm.pending_value(Field::TdsPpm), None);

        let frames = feed_all(&mut asm, SCENARIO.lines());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].tds_ppm(), 150.0);
    }

    #[test]
    fn malformed_line_leaves_buffer_untouched() {
        let mut asm = FrameAssembler::default();
        asm.feed("GyroX: 4").unwrap();
        assert!(matches!(asm.feed("no colon here"), Err(LineError::MissingColon(_))));
        assert!(matches!(asm.feed("GyroX:"), Err(LineError::InvalidValue { .. })));
        assert_eq!(asm.pending_value(Field::GyroX), Some(4.0));
        assert_eq!(asm.pending_fields(), 1);
    }

    #[test]
    fn value_may_contain_extra_colons_only_first_splits() {
        assert!(matches!(
            parse_line("AccelX: 1:2"),
            Err(LineError::InvalidValue { .. })
        ));
        assert_eq!(parse_line("  AccelX :  -0.25 "), Ok(("AccelX", -0.25)));
        assert_eq!(parse_line("GyroZ:1e2"), Ok(("GyroZ", 100.0)));
    }

    #[test]
    fn unknown_keys_survive_frames_when_retained() {
        let mut asm = FrameAssembler::default();
        asm.feed("Battery: 12.1").unwrap();
        let frames = feed_all(&mut asm, SCENARIO.lines());
        assert_eq!(frames.len(), 1);
        assert_eq!(asm.unknown_value("Battery"), Some(12.1));
        assert_eq!(asm.pending_fields(), 0);
    }

    #[test]
    fn unknown_keys_cleared_on_frame_when_configured() {
        let mut asm = FrameAssembler::new(UnknownKeyPolicy::ClearOnFrame, 32);
        asm.feed("Battery: 12.1").unwrap();
        feed_all(&mut asm, SCENARIO.lines());
        assert_eq!(asm.unknown_keys().count(), 0);
    }

    #[test]
    fn unknown_key_cap_rejects_new_keys_but_updates_old() {
        let mut asm = FrameAssembler::new(UnknownKeyPolicy::Retain, 2);
        asm.feed("A:1").unwrap();
        asm.feed("B:2").unwrap();
        assert!(matches!(
            asm.feed("C:3"),
            Err(LineError::UnknownKeyLimit { limit: 2, .. })
        ));
        asm.feed("A:5").unwrap();
        assert_eq!(asm.unknown_value("A"), Some(5.0));
        assert_eq!(asm.unknown_value("C"), None);
    }

    #[test]
    fn classify_recognises_sentinel_and_blank() {
        assert_eq!(classify("PHOTO_START\r\n"), LineKind::PhotoStart);
        assert_eq!(classify("  \r\n"), LineKind::Blank);
        assert_eq!(classify("GyroX:1\n"), LineKind::Data("GyroX:1"));
        assert_eq!(classify("PHOTO_STARTED"), LineKind::Data("PHOTO_STARTED"));
    }

    #[test]
    fn decode_line_is_lossy() {
        let text = decode_line(b"GyroX:\xFF1\n");
        assert!(text.starts_with("GyroX:"));
        assert!(text.contains('\u{FFFD}'));
    }
}
