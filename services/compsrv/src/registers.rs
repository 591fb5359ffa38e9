//! Register map and decoders for the Delcos XL compressor controller
//!
//! Addresses and block widths follow the controller's holding-register
//! documentation. Decoders are bit-exact: bitfields are extracted lowest
//! bit first, 32-bit counters are `(hi << 16) | lo` over consecutive word
//! pairs, scaled measurements are fixed-point tenths, and the info block is
//! one ASCII code point per register word.
//!
//! Every decoder checks that the slice it is handed matches the block
//! width; a mismatch is an internal contract violation, never retried.

use serde::Serialize;

use crate::error::{CompSrvError, Result};

/// Register addresses of interest
pub mod register {
    /// Water level, one word ahead of the main analog block
    pub const WATER_LEVEL: u16 = 0x1E;
    /// Analog telemetry block, starting at target speed
    pub const ANALOG: u16 = 0x22;
    /// Status flag block
    pub const STATUS: u16 = 0x30;
    /// Timer block, starting at running hours
    pub const TIMERS: u16 = 0x39;
    /// Error and warning flag block (E4xx/E5xx/A6xx)
    pub const ERRORS: u16 = 0x63;
    /// Compressor info block: software version then serial number
    pub const INFO: u16 = 0xC7;
    /// Remote power on/off command register
    pub const REMOTE_CMD: u16 = 0x12B;
    /// Error/warning reset command register
    pub const RESET: u16 = 0x12D;
}

pub const STATUS_LEN: usize = 3;
pub const ANALOG_LEN: usize = 14;
/// Water-level word plus the analog block
pub const ANALOG_TOTAL_LEN: usize = 15;
pub const TIMERS_LEN: usize = 8;
pub const ERRORS_LEN: usize = 16;
pub const INFO_LEN: usize = 23;
/// First words of the info block hold the software version
pub const INFO_VERSION_LEN: usize = 14;

/// Command word for power on and reset
pub const CMD_ON: u16 = 0xFF01;
/// Command word for power off
pub const CMD_OFF: u16 = 0xFF00;

/// Human-readable name of the register block an address falls into,
/// for protocol fault diagnostics.
pub fn block_name(address: u16) -> &'static str {
    match address {
        register::WATER_LEVEL => "water level",
        register::ANALOG..=0x2F => "analog telemetry",
        register::STATUS..=0x32 => "status",
        register::TIMERS..=0x40 => "timers",
        register::ERRORS..=0x72 => "errors/warnings",
        register::INFO..=0xDD => "compressor info",
        register::REMOTE_CMD => "remote command",
        register::RESET => "reset",
        _ => "unknown",
    }
}

/// Lowest-bit-first flag extractor over one register word.
///
/// Each call to `flag` consumes one bit position; `reserved` consumes a
/// position without producing a value, matching documented gaps in the map.
struct BitReader {
    value: u16,
}

impl BitReader {
    fn new(value: u16) -> Self {
        Self { value }
    }

    fn flag(&mut self) -> bool {
        let bit = self.value & 0x0001 == 0x0001;
        self.value >>= 1;
        bit
    }

    fn reserved(&mut self) {
        self.value >>= 1;
    }
}

/// Compose a 32-bit counter from a `[hi, lo]` register pair
pub fn compose_u32(hi: u16, lo: u16) -> u32 {
    (u32::from(hi) << 16) | u32::from(lo)
}

/// Decode a fixed-point tenths measurement
pub fn tenths(raw: u16) -> f64 {
    f64::from(raw) / 10.0
}

/// Decode a run of registers as an ASCII string, one code point per word
pub fn ascii_string(words: &[u16]) -> String {
    words
        .iter()
        .map(|w| char::from_u32(u32::from(*w)).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

fn check_len(block: &'static str, expected: usize, words: &[u16]) -> Result<()> {
    if words.len() != expected {
        return Err(CompSrvError::DecodeContract {
            block,
            expected,
            actual: words.len(),
        });
    }
    Ok(())
}

/// Decoded status block: word 0 carries operating flags (bit 8 reserved),
/// word 1 is reserved, word 2 carries the start-configuration flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub ready_to_start: bool,
    pub operating: bool,
    pub start_inhibit: bool,
    pub motor_start_phase: bool,
    pub off_load: bool,
    pub on_load: bool,
    pub soft_stop: bool,
    pub run_on_timer: bool,
    pub fault: bool,
    pub warning: bool,
    pub service_required: bool,
    pub min_allowed_speed_achieved: bool,
    pub max_allowed_speed_achieved: bool,

    pub start_by_remote: bool,
    pub start_with_timer_control: bool,
    pub start_with_pressure_requirement: bool,
    pub start_after_de_pressurise: bool,
    pub start_after_power_loss: bool,
    pub start_after_dryer_pre_run: bool,
}

impl StatusSnapshot {
    pub fn decode(words: &[u16]) -> Result<Self> {
        check_len("status", STATUS_LEN, words)?;
        let mut w0 = BitReader::new(words[0]);
        let ready_to_start = w0.flag();
        let operating = w0.flag();
        let start_inhibit = w0.flag();
        let motor_start_phase = w0.flag();
        let off_load = w0.flag();
        let on_load = w0.flag();
        let soft_stop = w0.flag();
        let run_on_timer = w0.flag();
        w0.reserved();
        let fault = w0.flag();
        let warning = w0.flag();
        let service_required = w0.flag();
        let min_allowed_speed_achieved = w0.flag();
        let max_allowed_speed_achieved = w0.flag();

        let mut w2 = BitReader::new(words[2]);
        Ok(Self {
            ready_to_start,
            operating,
            start_inhibit,
            motor_start_phase,
            off_load,
            on_load,
            soft_stop,
            run_on_timer,
            fault,
            warning,
            service_required,
            min_allowed_speed_achieved,
            max_allowed_speed_achieved,
            start_by_remote: w2.flag(),
            start_with_timer_control: w2.flag(),
            start_with_pressure_requirement: w2.flag(),
            start_after_de_pressurise: w2.flag(),
            start_after_power_loss: w2.flag(),
            start_after_dryer_pre_run: w2.flag(),
        })
    }
}

/// Decoded error flags (E4xx and E5xx) from the 16-word error/warning block.
///
/// Words 0, 1 and 6 carry errors; the warning words of the same block are
/// decoded by [`WarningSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSnapshot {
    pub power_supply_failure_e400: bool,
    pub emergency_stop_activated_e401: bool,
    pub high_motor_temperature_m1_e402: bool,
    pub compressor_discharge_temperature_e403: bool,
    pub start_temperature_low_e404: bool,
    pub discharge_over_pressure_e405: bool,
    pub line_pressure_sensor_b1_e406: bool,
    pub discharge_pressure_sensor_b2_e407: bool,
    pub discharge_temperature_sensor_r2_e408: bool,
    pub controller_hardware_e409: bool,
    pub cooling_e410: bool,
    pub oil_pressure_low_e411: bool,
    pub external_fault_e412: bool,
    pub dryer_e413: bool,
    pub condensate_drain_e414: bool,
    pub no_pressure_build_up_e415: bool,
    pub heavy_startup_e416: bool,
    pub pre_adjustment_vsd_e500: bool,
    pub pre_adjustment_e501: bool,
    pub locked_vsd_e502: bool,
    pub write_fault_vsd_e503: bool,
    pub communication_vsd_e504: bool,
    pub stop_pressed_vsd_e505: bool,
    pub stop_input_emvsd_e506: bool,
    pub read_fault_vsd_e507: bool,
    pub stop_input_vsd_e508: bool,
    pub see_vsd_display_e509: bool,
    pub speed_below_min_limit_e510: bool,
}

impl ErrorSnapshot {
    pub fn decode(words: &[u16]) -> Result<Self> {
        check_len("errors", ERRORS_LEN, words)?;
        let mut w0 = BitReader::new(words[0]);
        let power_supply_failure_e400 = w0.flag();
        let emergency_stop_activated_e401 = w0.flag();
        let high_motor_temperature_m1_e402 = w0.flag();
        let compressor_discharge_temperature_e403 = w0.flag();
        let start_temperature_low_e404 = w0.flag();
        let discharge_over_pressure_e405 = w0.flag();
        let line_pressure_sensor_b1_e406 = w0.flag();
        let discharge_pressure_sensor_b2_e407 = w0.flag();
        let discharge_temperature_sensor_r2_e408 = w0.flag();
        let controller_hardware_e409 = w0.flag();
        let cooling_e410 = w0.flag();
        let oil_pressure_low_e411 = w0.flag();
        let external_fault_e412 = w0.flag();
        let dryer_e413 = w0.flag();
        let condensate_drain_e414 = w0.flag();
        let no_pressure_build_up_e415 = w0.flag();

        let mut w1 = BitReader::new(words[1]);
        let heavy_startup_e416 = w1.flag();

        let mut w6 = BitReader::new(words[6]);
        Ok(Self {
            power_supply_failure_e400,
            emergency_stop_activated_e401,
            high_motor_temperature_m1_e402,
            compressor_discharge_temperature_e403,
            start_temperature_low_e404,
            discharge_over_pressure_e405,
            line_pressure_sensor_b1_e406,
            discharge_pressure_sensor_b2_e407,
            discharge_temperature_sensor_r2_e408,
            controller_hardware_e409,
            cooling_e410,
            oil_pressure_low_e411,
            external_fault_e412,
            dryer_e413,
            condensate_drain_e414,
            no_pressure_build_up_e415,
            heavy_startup_e416,
            pre_adjustment_vsd_e500: w6.flag(),
            pre_adjustment_e501: w6.flag(),
            locked_vsd_e502: w6.flag(),
            write_fault_vsd_e503: w6.flag(),
            communication_vsd_e504: w6.flag(),
            stop_pressed_vsd_e505: w6.flag(),
            stop_input_emvsd_e506: w6.flag(),
            read_fault_vsd_e507: w6.flag(),
            stop_input_vsd_e508: w6.flag(),
            see_vsd_display_e509: w6.flag(),
            speed_below_min_limit_e510: w6.flag(),
        })
    }

    /// Whether any error flag is raised
    pub fn any(&self) -> bool {
        self.power_supply_failure_e400
            || self.emergency_stop_activated_e401
            || self.high_motor_temperature_m1_e402
            || self.compressor_discharge_temperature_e403
            || self.start_temperature_low_e404
            || self.discharge_over_pressure_e405
            || self.line_pressure_sensor_b1_e406
            || self.discharge_pressure_sensor_b2_e407
            || self.discharge_temperature_sensor_r2_e408
            || self.controller_hardware_e409
            || self.cooling_e410
            || self.oil_pressure_low_e411
            || self.external_fault_e412
            || self.dryer_e413
            || self.condensate_drain_e414
            || self.no_pressure_build_up_e415
            || self.heavy_startup_e416
            || self.pre_adjustment_vsd_e500
            || self.pre_adjustment_e501
            || self.locked_vsd_e502
            || self.write_fault_vsd_e503
            || self.communication_vsd_e504
            || self.stop_pressed_vsd_e505
            || self.stop_input_emvsd_e506
            || self.read_fault_vsd_e507
            || self.stop_input_vsd_e508
            || self.see_vsd_display_e509
            || self.speed_below_min_limit_e510
    }
}

/// Decoded warning flags (A6xx) from words 8, 9 and 14 of the
/// error/warning block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningSnapshot {
    pub service_due_a600: bool,
    pub discharge_over_pressure_a601: bool,
    pub compressor_discharge_temperature_a602: bool,
    pub line_pressure_high_a606: bool,
    pub full_sd_card_a607: bool,
    pub controller_battery_empty_a616: bool,
    pub dryer_a617: bool,
    pub condensate_drain_a618: bool,
    pub fine_separator_a619: bool,
    pub air_filter_a620: bool,
    pub oil_filter_a621: bool,
    pub oil_level_low_a622: bool,
    pub oil_temperature_high_a623: bool,
    pub external_warning_a624: bool,
    pub motor_lubrication_system_a625: bool,
    pub input_1_a626: bool,
    pub input_2_a627: bool,
    pub input_3_a628: bool,
    pub input_4_a629: bool,
    pub input_5_a630: bool,
    pub input_6_a631: bool,
}

impl WarningSnapshot {
    pub fn decode(words: &[u16]) -> Result<Self> {
        check_len("warnings", ERRORS_LEN, words)?;
        let mut w8 = BitReader::new(words[8]);
        let service_due_a600 = w8.flag();
        let discharge_over_pressure_a601 = w8.flag();
        let compressor_discharge_temperature_a602 = w8.flag();
        w8.reserved();
        w8.reserved();
        w8.reserved();
        let line_pressure_high_a606 = w8.flag();

        let mut w9 = BitReader::new(words[9]);
        let full_sd_card_a607 = w9.flag();

        let mut w14 = BitReader::new(words[14]);
        Ok(Self {
            service_due_a600,
            discharge_over_pressure_a601,
            compressor_discharge_temperature_a602,
            line_pressure_high_a606,
            full_sd_card_a607,
            controller_battery_empty_a616: w14.flag(),
            dryer_a617: w14.flag(),
            condensate_drain_a618: w14.flag(),
            fine_separator_a619: w14.flag(),
            air_filter_a620: w14.flag(),
            oil_filter_a621: w14.flag(),
            oil_level_low_a622: w14.flag(),
            oil_temperature_high_a623: w14.flag(),
            external_warning_a624: w14.flag(),
            motor_lubrication_system_a625: w14.flag(),
            input_1_a626: w14.flag(),
            input_2_a627: w14.flag(),
            input_3_a628: w14.flag(),
            input_4_a629: w14.flag(),
            input_5_a630: w14.flag(),
            input_6_a631: w14.flag(),
        })
    }
}

/// Decoded analog telemetry: the water-level word followed by the 14-word
/// measurement block. Scaled fields are fixed-point tenths on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalogSnapshot {
    pub water_level: u16,
    pub target_speed: u16,
    pub motor_current: f64,
    pub heatsink_temperature: u16,
    pub dclink_voltage: u16,
    pub motor_speed_percentage: u16,
    pub motor_speed_rpm: u16,
    pub motor_input: f64,
    pub compressor_power_consumption: f64,
    pub compressor_volume_percentage: u16,
    pub compressor_volume: f64,
    pub group_volume: f64,
    pub stage_1_output_pressure: u16,
    pub line_pressure: u16,
    pub stage_1_output_temperature: f64,
}

impl AnalogSnapshot {
    pub fn decode(words: &[u16]) -> Result<Self> {
        check_len("analog", ANALOG_TOTAL_LEN, words)?;
        Ok(Self {
            water_level: words[0],
            target_speed: words[1],
            motor_current: tenths(words[2]),
            heatsink_temperature: words[3],
            dclink_voltage: words[4],
            motor_speed_percentage: words[5],
            motor_speed_rpm: words[6],
            motor_input: tenths(words[7]),
            compressor_power_consumption: tenths(words[8]),
            compressor_volume_percentage: words[9],
            compressor_volume: tenths(words[10]),
            group_volume: tenths(words[11]),
            stage_1_output_pressure: words[12],
            line_pressure: words[13],
            stage_1_output_temperature: tenths(words[14]),
        })
    }
}

/// Decoded timer block: running-hour counters are 32-bit values split
/// across consecutive word pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub running_hours: u32,
    pub loaded_hours: u32,
    pub lowest_service_counter: u16,
    pub run_on_timer: u16,
    pub loaded_hours_50_percent: u32,
}

impl TimerSnapshot {
    pub fn decode(words: &[u16]) -> Result<Self> {
        check_len("timers", TIMERS_LEN, words)?;
        Ok(Self {
            running_hours: compose_u32(words[0], words[1]),
            loaded_hours: compose_u32(words[2], words[3]),
            lowest_service_counter: words[4],
            run_on_timer: words[5],
            loaded_hours_50_percent: compose_u32(words[6], words[7]),
        })
    }
}

/// Decoded compressor info block, read once per connection and cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressorInfo {
    pub software_version: String,
    pub serial_number: String,
}

impl CompressorInfo {
    pub fn decode(words: &[u16]) -> Result<Self> {
        check_len("info", INFO_LEN, words)?;
        Ok(Self {
            software_version: ascii_string(&words[..INFO_VERSION_LEN]),
            serial_number: ascii_string(&words[INFO_VERSION_LEN..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_extraction_is_lowest_bit_first() {
        let status = StatusSnapshot::decode(&[0b0000_0000_0000_0011, 0, 0]).expect("decode");
        assert!(status.ready_to_start);
        assert!(status.operating);
        assert!(!status.start_inhibit);
    }

    #[test]
    fn status_word0_reserved_bit_consumes_a_position() {
        // Bit 8 is reserved: bit 9 is fault, bit 12 min speed, bit 13 max speed
        let status = StatusSnapshot::decode(&[1 << 8, 0, 0]).expect("decode");
        assert!(!status.fault);

        let status = StatusSnapshot::decode(&[1 << 9, 0, 0]).expect("decode");
        assert!(status.fault);

        let status = StatusSnapshot::decode(&[1 << 12, 0, 0]).expect("decode");
        assert!(status.min_allowed_speed_achieved);
        assert!(!status.max_allowed_speed_achieved);

        let status = StatusSnapshot::decode(&[0xA000, 0, 0]).expect("decode");
        assert!(!status.min_allowed_speed_achieved);
        assert!(status.max_allowed_speed_achieved); // bit 13
    }

    #[test]
    fn status_word2_start_configuration() {
        let status = StatusSnapshot::decode(&[0, 0, 0b10_0001]).expect("decode");
        assert!(status.start_by_remote);
        assert!(!status.start_with_timer_control);
        assert!(status.start_after_dryer_pre_run);
    }

    #[test]
    fn status_recompose_reproduces_named_bits() {
        // Extracting and OR-ing back shifted bits reproduces the word
        // modulo reserved positions.
        let word = 0b0011_1110_1111_1111u16; // every named bit of word 0
        let status = StatusSnapshot::decode(&[word, 0, 0]).expect("decode");
        let named = [
            status.ready_to_start,
            status.operating,
            status.start_inhibit,
            status.motor_start_phase,
            status.off_load,
            status.on_load,
            status.soft_stop,
            status.run_on_timer,
            false, // reserved bit 8
            status.fault,
            status.warning,
            status.service_required,
            status.min_allowed_speed_achieved,
            status.max_allowed_speed_achieved,
        ];
        let recomposed = named
            .iter()
            .enumerate()
            .fold(0u16, |acc, (bit, set)| acc | (u16::from(*set) << bit));
        assert_eq!(recomposed, word & !(1 << 8));
    }

    #[test]
    fn compose_u32_round_trip() {
        assert_eq!(compose_u32(0x0001, 0x0002), 65538);
        assert_eq!(compose_u32(0xFFFF, 0xFFFF), u32::MAX);
        assert_eq!(compose_u32(0, 0), 0);

        for (hi, lo) in [(0u16, 1u16), (0x1234, 0x5678), (0xFFFF, 0)] {
            let composed = compose_u32(hi, lo);
            assert_eq!((composed >> 16) as u16, hi);
            assert_eq!((composed & 0xFFFF) as u16, lo);
        }
    }

    #[test]
    fn tenths_decode() {
        assert_eq!(tenths(123), 12.3);
        assert_eq!(tenths(0), 0.0);
    }

    #[test]
    fn ascii_decode() {
        let words = [72u16, 101, 108, 108, 111];
        assert_eq!(ascii_string(&words), "Hello");
    }

    #[test]
    fn timer_32bit_fields() {
        let words = [0x0001, 0x0002, 0x0000, 0x0010, 5, 6, 0x0002, 0x0001];
        let timers = TimerSnapshot::decode(&words).expect("decode");
        assert_eq!(timers.running_hours, 65538);
        assert_eq!(timers.loaded_hours, 16);
        assert_eq!(timers.lowest_service_counter, 5);
        assert_eq!(timers.run_on_timer, 6);
        assert_eq!(timers.loaded_hours_50_percent, (2 << 16) | 1);
    }

    #[test]
    fn analog_scaled_fields() {
        let words: Vec<u16> = (1..=15).collect();
        let analog = AnalogSnapshot::decode(&words).expect("decode");
        assert_eq!(analog.water_level, 1);
        assert_eq!(analog.target_speed, 2);
        assert_eq!(analog.motor_current, 0.3);
        assert_eq!(analog.heatsink_temperature, 4);
        assert_eq!(analog.motor_input, 0.8);
        assert_eq!(analog.compressor_power_consumption, 0.9);
        assert_eq!(analog.compressor_volume, 1.1);
        assert_eq!(analog.group_volume, 1.2);
        assert_eq!(analog.line_pressure, 14);
        assert_eq!(analog.stage_1_output_temperature, 1.5);
    }

    #[test]
    fn info_split() {
        let mut words = Vec::new();
        words.extend("SW 3.0.1      ".chars().map(|c| c as u16));
        words.extend("SN0012345".chars().map(|c| c as u16));
        let info = CompressorInfo::decode(&words).expect("decode");
        assert_eq!(info.software_version, "SW 3.0.1      ");
        assert_eq!(info.serial_number, "SN0012345");
    }

    #[test]
    fn error_flags_at_documented_words() {
        let mut words = [0u16; ERRORS_LEN];
        words[0] = 1 << 15; // noPressureBuildUpE415
        words[1] = 1; // heavyStartupE416
        words[6] = 1 << 10; // speedBelowMinLimitE510
        let errors = ErrorSnapshot::decode(&words).expect("decode");
        assert!(errors.no_pressure_build_up_e415);
        assert!(errors.heavy_startup_e416);
        assert!(errors.speed_below_min_limit_e510);
        assert!(errors.any());
        assert!(!errors.power_supply_failure_e400);

        let quiet = ErrorSnapshot::decode(&[0u16; ERRORS_LEN]).expect("decode");
        assert!(!quiet.any());
    }

    #[test]
    fn warning_flags_skip_reserved_bits() {
        let mut words = [0u16; ERRORS_LEN];
        words[8] = 1 << 6; // linePressureHighA606 after three reserved bits
        words[9] = 1;
        words[14] = 1 << 15; // input6A631
        let warnings = WarningSnapshot::decode(&words).expect("decode");
        assert!(warnings.line_pressure_high_a606);
        assert!(warnings.full_sd_card_a607);
        assert!(warnings.input_6_a631);
        assert!(!warnings.service_due_a600);
    }

    #[test]
    fn count_mismatch_is_contract_violation() {
        let err = StatusSnapshot::decode(&[0, 0]).expect_err("short slice");
        assert_eq!(
            err,
            CompSrvError::DecodeContract {
                block: "status",
                expected: STATUS_LEN,
                actual: 2
            }
        );
        assert!(TimerSnapshot::decode(&[0; 7]).is_err());
        assert!(CompressorInfo::decode(&[0; 24]).is_err());
        assert!(AnalogSnapshot::decode(&[0; 14]).is_err());
        assert!(ErrorSnapshot::decode(&[0; 15]).is_err());
    }

    #[test]
    fn block_names_for_diagnostics() {
        assert_eq!(block_name(register::STATUS), "status");
        assert_eq!(block_name(register::REMOTE_CMD), "remote command");
        assert_eq!(block_name(0x2D), "analog telemetry");
        assert_eq!(block_name(0x0001), "unknown");
    }
}
