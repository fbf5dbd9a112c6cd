//! Command implementations for the bmcfw CLI

pub mod checksum;
pub mod components;
pub mod config;
pub mod inspect;

use clap::ValueEnum;

/// Checksum algorithms the engine uses on images and devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Algorithm {
    /// MSB-first CRC-32 (ISL, Altera)
    Crc32,
    /// Infineon CRC-32 over little-endian words
    Crc32Ifx,
    /// CRC-16/0x8005 (TI)
    Crc16,
    /// CRC-8 (PMBus PEC)
    Crc8,
    /// 32-bit additive sum
    Sum,
    /// SHA-256
    Sha256,
}

impl Algorithm {
    /// Name as accepted on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Crc32 => "crc32",
            Algorithm::Crc32Ifx => "crc32-ifx",
            Algorithm::Crc16 => "crc16",
            Algorithm::Crc8 => "crc8",
            Algorithm::Sum => "sum",
            Algorithm::Sha256 => "sha256",
        }
    }
}
