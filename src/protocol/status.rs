// Error/warning status decoding
//
// Status frame: [0x8F, E0, E1, W0, W1]
// E0/E1 hold the error bitmap, W0/W1 the warning bitmap. In each pair the
// controller sends bits 7..0 first and bits 15..8 second, so bit 0 of the
// first byte is condition 0.

use serde::{Serialize, Serializer};
use std::fmt;

use crate::messages::Signal;

/// Fatal controller errors, indexed by bit position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCondition {
    EpromRead,
    HardwareFault,
    RotateFieldEnableNotPresentRun,
    CanTimeout,
    FeedbackSignal,
    MainsVoltageMinLimit,
    MotorTempMaxLimit,
    IgbtTempMaxLimit,
    MainsVoltageMaxLimit,
    CriticalAcCurrent,
    RaceAwayDetected,
    EcodeTimeout,
    WatchdogReset,
    AcCurrentOffsetFault,
    InternalHardwareVoltage,
    BleedResistorOverload,
}

impl ErrorCondition {
    pub const ALL: [ErrorCondition; 16] = [
        ErrorCondition::EpromRead,
        ErrorCondition::HardwareFault,
        ErrorCondition::RotateFieldEnableNotPresentRun,
        ErrorCondition::CanTimeout,
        ErrorCondition::FeedbackSignal,
        ErrorCondition::MainsVoltageMinLimit,
        ErrorCondition::MotorTempMaxLimit,
        ErrorCondition::IgbtTempMaxLimit,
        ErrorCondition::MainsVoltageMaxLimit,
        ErrorCondition::CriticalAcCurrent,
        ErrorCondition::RaceAwayDetected,
        ErrorCondition::EcodeTimeout,
        ErrorCondition::WatchdogReset,
        ErrorCondition::AcCurrentOffsetFault,
        ErrorCondition::InternalHardwareVoltage,
        ErrorCondition::BleedResistorOverload,
    ];

    pub fn from_bit(bit: u32) -> Option<Self> {
        Self::ALL.get(bit as usize).copied()
    }

    pub fn bit(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCondition::EpromRead => "eprom-read-error",
            ErrorCondition::HardwareFault => "hardware-fault",
            ErrorCondition::RotateFieldEnableNotPresentRun => "rotate-field-enable-not-present-run",
            ErrorCondition::CanTimeout => "CAN-timeout",
            ErrorCondition::FeedbackSignal => "feedback-signal-error",
            ErrorCondition::MainsVoltageMinLimit => "mains-voltage-min-limit",
            ErrorCondition::MotorTempMaxLimit => "motor-temp-max-limit",
            ErrorCondition::IgbtTempMaxLimit => "IGBT-temp-max-limit",
            ErrorCondition::MainsVoltageMaxLimit => "mains-voltage-max-limit",
            ErrorCondition::CriticalAcCurrent => "critical-AC-current",
            ErrorCondition::RaceAwayDetected => "race-away-detected",
            ErrorCondition::EcodeTimeout => "ecode-timeout",
            ErrorCondition::WatchdogReset => "watchdog-reset",
            ErrorCondition::AcCurrentOffsetFault => "AC-current-offset-fault",
            ErrorCondition::InternalHardwareVoltage => "internal-hardware-voltage-problem",
            ErrorCondition::BleedResistorOverload => "bleed-resistor-overload",
        }
    }
}

/// Non-fatal controller warnings, indexed by bit position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningCondition {
    ParameterConflict,
    SpecialCpuFault,
    RotateFieldEnableNotPresentNorun,
    AuxiliaryVoltageMinLimit,
    FeedbackSignalProblem,
    Reserved5,
    MotorTemperature,
    IgbtTemperature,
    VoutSaturationMaxLimit,
    Reserved9,
    SpeedActualResolutionLimit,
    CheckEcodeId,
    TripzoneGlitch,
    AdcSequencer,
    AdcMeasurement,
    BleederResistor,
}

impl WarningCondition {
    pub const ALL: [WarningCondition; 16] = [
        WarningCondition::ParameterConflict,
        WarningCondition::SpecialCpuFault,
        WarningCondition::RotateFieldEnableNotPresentNorun,
        WarningCondition::AuxiliaryVoltageMinLimit,
        WarningCondition::FeedbackSignalProblem,
        WarningCondition::Reserved5,
        WarningCondition::MotorTemperature,
        WarningCondition::IgbtTemperature,
        WarningCondition::VoutSaturationMaxLimit,
        WarningCondition::Reserved9,
        WarningCondition::SpeedActualResolutionLimit,
        WarningCondition::CheckEcodeId,
        WarningCondition::TripzoneGlitch,
        WarningCondition::AdcSequencer,
        WarningCondition::AdcMeasurement,
        WarningCondition::BleederResistor,
    ];

    pub fn from_bit(bit: u32) -> Option<Self> {
        Self::ALL.get(bit as usize).copied()
    }

    pub fn bit(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            WarningCondition::ParameterConflict => "parameter-conflict-detected",
            WarningCondition::SpecialCpuFault => "special-CPU-fault",
            WarningCondition::RotateFieldEnableNotPresentNorun => {
                "rotate-field-enable-not-present-norun"
            }
            WarningCondition::AuxiliaryVoltageMinLimit => "auxiliary-voltage-min-limit",
            WarningCondition::FeedbackSignalProblem => "feedback-signal-problem",
            WarningCondition::Reserved5 => "reserved-warning-5",
            WarningCondition::MotorTemperature => "motor-temperature-warning",
            WarningCondition::IgbtTemperature => "IGBT-temperature-warning",
            WarningCondition::VoutSaturationMaxLimit => "Vout-saturation-max-limit",
            WarningCondition::Reserved9 => "reserved-warning-9",
            WarningCondition::SpeedActualResolutionLimit => "speed-actual-resolution-limit",
            WarningCondition::CheckEcodeId => "check-ecode-id",
            WarningCondition::TripzoneGlitch => "tripzone-glitch",
            WarningCondition::AdcSequencer => "ADC-sequencer-problem",
            WarningCondition::AdcMeasurement => "ADC-measurement-problem",
            WarningCondition::BleederResistor => "bleeder-resistor-warning",
        }
    }
}

// Conditions go over the wire by name
impl Serialize for ErrorCondition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl Serialize for WarningCondition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for WarningCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Iterate set bits, lowest first
fn set_bits(bits: u16) -> impl Iterator<Item = u32> {
    (0..u16::BITS).filter(move |bit| bits & (1 << bit) != 0)
}

/// 16-bit error bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorBitmap(pub u16);

impl ErrorBitmap {
    pub fn is_clear(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, condition: ErrorCondition) -> bool {
        self.0 & (1 << condition.bit()) != 0
    }

    /// All named conditions whose bit is set. Bits without a name are skipped.
    pub fn active(&self) -> Vec<ErrorCondition> {
        set_bits(self.0).filter_map(ErrorCondition::from_bit).collect()
    }
}

/// 16-bit warning bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WarningBitmap(pub u16);

impl WarningBitmap {
    pub fn is_clear(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, condition: WarningCondition) -> bool {
        self.0 & (1 << condition.bit()) != 0
    }

    pub fn active(&self) -> Vec<WarningCondition> {
        set_bits(self.0).filter_map(WarningCondition::from_bit).collect()
    }
}

/// Decoded status frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusReport {
    pub errors: ErrorBitmap,
    pub warnings: WarningBitmap,
}

impl StatusReport {
    /// Decode a status payload. Never fails: every bit pattern is valid.
    pub fn decode(payload: [u8; 4]) -> Self {
        Self {
            errors: ErrorBitmap(u16::from_le_bytes([payload[0], payload[1]])),
            warnings: WarningBitmap(u16::from_le_bytes([payload[2], payload[3]])),
        }
    }

    /// Shutdown signal, if any error bit is set
    pub fn shutdown(&self) -> Option<Signal> {
        (!self.errors.is_clear()).then(|| Signal::Shutdown {
            errors: self.errors.active(),
        })
    }

    /// Suspend signal, if any warning bit is set
    pub fn suspend(&self) -> Option<Signal> {
        (!self.warnings.is_clear()).then(|| Signal::Suspend {
            warnings: self.warnings.active(),
        })
    }

    /// Safety signals this report calls for: shutdown before suspend
    pub fn signals(&self) -> Vec<Signal> {
        self.shutdown().into_iter().chain(self.suspend()).collect()
    }
}
