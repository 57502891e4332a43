//! Definição de tipos para a telemetria da sonda.
//!
//! Um [`TelemetryFrame`] só existe quando os 9 campos foram observados no
//! stream; o único construtor fica no [`crate::protocol::FrameAssembler`].

use serde::{Deserialize, Serialize};
use std::fmt;

// ──────────────────────────────────────────────
// Campos
// ──────────────────────────────────────────────

/// Campos obrigatórios de um frame, na ordem em que a sonda os envia.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    TemperatureC,
    TdsPpm,
    FlexVoltage,
    GyroX,
    GyroY,
    GyroZ,
    AccelX,
    AccelY,
    AccelZ,
}

impl Field {
    /// Número de campos obrigatórios.
    pub const COUNT: usize = 9;

    /// Todos os campos, indexados por [`Field::index`].
    pub const ALL: [Field; Field::COUNT] = [
        Field::TemperatureC,
        Field::TdsPpm,
        Field::FlexVoltage,
        Field::GyroX,
        Field::GyroY,
        Field::GyroZ,
        Field::AccelX,
        Field::AccelY,
        Field::AccelZ,
    ];

    /// Nome exato da chave no fio (`Flex Voltage` tem espaço).
    pub const fn wire_name(self) -> &'static str {
        match self {
            Field::TemperatureC => "Temperature_C",
            Field::TdsPpm => "TDS_ppm",
            Field::FlexVoltage => "Flex Voltage",
            Field::GyroX => "GyroX",
            Field::GyroY => "GyroY",
            Field::GyroZ => "GyroZ",
            Field::AccelX => "AccelX",
            Field::AccelY => "AccelY",
            Field::AccelZ => "AccelZ",
        }
    }

    /// Resolve uma chave já sem espaços nas pontas. Case-sensitive.
    pub fn from_wire(key: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.wire_name() == key)
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ──────────────────────────────────────────────
// Frame de telemetria
// ──────────────────────────────────────────────

/// Leitura completa dos sensores da sonda.
///
/// Imutável depois de construída. Sem `Default`: um frame zerado não é um
/// frame observado.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Temperatura da água (°C)
    #[serde(rename = "Temperature_C")]
    temperature_c: f64,
    /// Sólidos dissolvidos totais (ppm)
    #[serde(rename = "TDS_ppm")]
    tds_ppm: f64,
    /// Tensão do sensor de flexão (V)
    #[serde(rename = "Flex Voltage")]
    flex_voltage: f64,
    /// Giroscópio X/Y/Z (°/s)
    #[serde(rename = "Gyro")]
    gyro: [f64; 3],
    /// Acelerômetro X/Y/Z (g)
    #[serde(rename = "Accel")]
    accel: [f64; 3],
}

impl TelemetryFrame {
    /// Monta o frame a partir dos 9 valores indexados por [`Field::index`].
    pub(crate) fn from_values(v: [f64; Field::COUNT]) -> Self {
        Self {
            temperature_c: v[Field::TemperatureC.index()],
            tds_ppm: v[Field::TdsPpm.index()],
            flex_voltage: v[Field::FlexVoltage.index()],
            gyro: [
                v[Field::GyroX.index()],
                v[Field::GyroY.index()],
                v[Field::GyroZ.index()],
            ],
            accel: [
                v[Field::AccelX.index()],
                v[Field::AccelY.index()],
                v[Field::AccelZ.index()],
            ],
        }
    }

    pub fn temperature_c(&self) -> f64 {
        self.temperature_c
    }

    pub fn tds_ppm(&self) -> f64 {
        self.tds_ppm
    }

    pub fn flex_voltage(&self) -> f64 {
        self.flex_voltage
    }

    pub fn gyro(&self) -> [f64; 3] {
        self.gyro
    }

    pub fn accel(&self) -> [f64; 3] {
        self.accel
    }

    /// Valor de um campo específico.
    pub fn get(&self, field: Field) -> f64 {
        match field {
            Field::TemperatureC => self.temperature_c,
            Field::TdsPpm => self.tds_ppm,
            Field::FlexVoltage => self.flex_voltage,
            Field::GyroX => self.gyro[0],
            Field::GyroY => self.gyro[1],
            Field::GyroZ => self.gyro[2],
            Field::AccelX => self.accel[0],
            Field::AccelY => self.accel[1],
            Field::AccelZ => self.accel[2],
        }
    }

    /// Pares `(campo, valor)` na ordem do fio.
    pub fn iter(&self) -> impl Iterator<Item = (Field, f64)> + '_ {
        Field::ALL.into_iter().map(|f| (f, self.get(f)))
    }
}

// ──────────────────────────────────────────────
// Foto
// ──────────────────────────────────────────────

/// Bytes crus de uma transferência de foto concluída.
///
/// O conteúdo é entregue como veio do fio, sem checagem de formato.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoBlob {
    bytes: Vec<u8>,
}

impl PhotoBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
