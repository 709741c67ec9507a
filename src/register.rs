use crate::prelude::*;
use crate::modbus::codec::{self, Value};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    U16,
    I16,
    U32,
    I32,
    String,
}

impl RegisterKind {
    /// Fewest words a read must return for this type to decode.
    pub fn min_words(&self) -> usize {
        match self {
            Self::U16 | Self::I16 | Self::String => 1,
            Self::U32 | Self::I32 => 2,
        }
    }
}

impl std::fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::String => "string",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RegisterDescriptor {
    pub name: String,
    pub address: u16,
    pub count: u16,
    #[serde(rename = "type")]
    pub kind: RegisterKind,
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default)]
    pub unit: Option<String>,
}

fn default_gain() -> f64 {
    1.0
}

impl RegisterDescriptor {
    pub fn new(name: &str, address: u16, count: u16, kind: RegisterKind) -> Self {
        Self {
            name: name.to_string(),
            address,
            count,
            kind,
            gain: default_gain(),
            unit: None,
        }
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn unit(&self) -> &str {
        self.unit.as_deref().unwrap_or("")
    }

    pub fn decode(&self, words: &[u16]) -> Result<Value, DeviceError> {
        codec::decode(words, self.kind, self.gain)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.gain > 0.0) {
            bail!("register {} gain must be positive, got {}", self.name, self.gain);
        }
        if (self.count as usize) < self.kind.min_words() {
            bail!(
                "register {} of type {} needs at least {} words, count is {}",
                self.name,
                self.kind,
                self.kind.min_words(),
                self.count
            );
        }
        if self.count > modbus::packet::MAX_REGISTERS {
            bail!("register {} count {} exceeds a single read", self.name, self.count);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RegisterFile {
    registers: Vec<RegisterDescriptor>,
}

/// Named register table, used for one-shot dumps.
#[derive(Clone, Debug)]
pub struct RegisterMap {
    registers: BTreeMap<u16, RegisterDescriptor>,
}

impl RegisterMap {
    pub fn from_file(register_file: &str) -> Result<Self> {
        let content = std::fs::read_to_string(register_file)
            .map_err(|err| anyhow!("Error reading register file {}: {}", register_file, err))?;

        let file: RegisterFile = serde_json::from_str(&content)
            .map_err(|err| anyhow!("Error parsing register file {}: {}", register_file, err))?;

        Self::from_descriptors(file.registers)
    }

    pub fn from_descriptors(descriptors: Vec<RegisterDescriptor>) -> Result<Self> {
        let mut registers = BTreeMap::new();
        for register in descriptors {
            register.validate()?;
            registers.insert(register.address, register);
        }
        Ok(Self { registers })
    }

    /// Registers of a Huawei SUN2000 inverter with an attached power meter.
    pub fn sun2000() -> Self {
        use RegisterKind::*;

        let table = vec![
            RegisterDescriptor::new("model", 30000, 15, String),
            RegisterDescriptor::new("serial_number", 30015, 10, String),
            RegisterDescriptor::new("part_number", 30025, 10, String),
            RegisterDescriptor::new("rated_power", 30073, 2, U32).with_unit("W"),
            RegisterDescriptor::new("max_active_power", 30075, 2, U32).with_unit("W"),
            RegisterDescriptor::new("pv1_voltage", 32016, 1, I16).with_gain(10.0).with_unit("V"),
            RegisterDescriptor::new("pv1_current", 32017, 1, I16).with_gain(100.0).with_unit("A"),
            RegisterDescriptor::new("pv2_voltage", 32018, 1, I16).with_gain(10.0).with_unit("V"),
            RegisterDescriptor::new("pv2_current", 32019, 1, I16).with_gain(100.0).with_unit("A"),
            RegisterDescriptor::new("input_power", 32064, 2, I32).with_unit("W"),
            RegisterDescriptor::new("grid_voltage", 32066, 1, U16).with_gain(10.0).with_unit("V"),
            RegisterDescriptor::new("active_power", 32080, 2, I32).with_unit("W"),
            RegisterDescriptor::new("reactive_power", 32082, 2, I32).with_unit("var"),
            RegisterDescriptor::new("power_factor", 32084, 1, I16).with_gain(1000.0),
            RegisterDescriptor::new("grid_frequency", 32085, 1, U16).with_gain(100.0).with_unit("Hz"),
            RegisterDescriptor::new("efficiency", 32086, 1, U16).with_gain(100.0).with_unit("%"),
            RegisterDescriptor::new("internal_temperature", 32087, 1, I16).with_gain(10.0).with_unit("°C"),
            RegisterDescriptor::new("device_status", 32089, 1, U16),
            RegisterDescriptor::new("accumulated_yield", 32106, 2, U32).with_gain(100.0).with_unit("kWh"),
            RegisterDescriptor::new("daily_yield", 32114, 2, U32).with_gain(100.0).with_unit("kWh"),
            RegisterDescriptor::new("meter_status", 37100, 1, U16),
            RegisterDescriptor::new("meter_voltage", 37101, 2, I32).with_gain(10.0).with_unit("V"),
            RegisterDescriptor::new("meter_current", 37107, 2, I32).with_gain(100.0).with_unit("A"),
            RegisterDescriptor::new("meter_active_power", 37113, 2, I32).with_gain(1000.0).with_unit("kW"),
            RegisterDescriptor::new("meter_frequency", 37118, 1, I16).with_gain(100.0).with_unit("Hz"),
            RegisterDescriptor::new("grid_exported_energy", 37119, 2, I32).with_gain(100.0).with_unit("kWh"),
            RegisterDescriptor::new("grid_accumulated_energy", 37121, 2, U32).with_gain(100.0).with_unit("kWh"),
            RegisterDescriptor::new("storage_soc", 37760, 1, U16).with_gain(10.0).with_unit("%"),
            RegisterDescriptor::new("storage_power", 37765, 2, I32).with_unit("W"),
        ];

        Self {
            registers: table.into_iter().map(|r| (r.address, r)).collect(),
        }
    }

    pub fn get(&self, address: u16) -> Option<&RegisterDescriptor> {
        self.registers.get(&address)
    }

    pub fn by_name(&self, name: &str) -> Option<&RegisterDescriptor> {
        self.registers.values().find(|r| r.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.values()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}
