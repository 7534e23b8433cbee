//! # SCD4x Driver
//!
//! Sensirion SCD40/SCD41 CO2 sensor on a Linux I2C bus.
//!
//! Commands are 16-bit big-endian words. Every 16-bit data word the device
//! sends or receives is followed by a CRC-8 (polynomial 0x31, init 0xFF).

use async_trait::async_trait;
use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;
use std::time::Duration;
use tracing::{debug, info};

use super::{Measurement, SensorConnector, SensorDevice};
use crate::config::SensorConfig;
use crate::error::{ChamberError, Result};

/// Default I2C address of the SCD4x family
pub const SCD4X_ADDRESS: u16 = 0x62;

const CMD_START_PERIODIC_MEASUREMENT: u16 = 0x21B1;
const CMD_STOP_PERIODIC_MEASUREMENT: u16 = 0x3F86;
const CMD_READ_MEASUREMENT: u16 = 0xEC05;
const CMD_GET_DATA_READY_STATUS: u16 = 0xE4B8;
const CMD_GET_SERIAL_NUMBER: u16 = 0x3682;
const CMD_SET_AUTOMATIC_SELF_CALIBRATION: u16 = 0x2416;
const CMD_PERFORM_SELF_TEST: u16 = 0x3639;

/// Execution times from the datasheet
const DELAY_READ: Duration = Duration::from_millis(1);
const DELAY_STOP_PERIODIC: Duration = Duration::from_millis(500);
const DELAY_SET_CONFIG: Duration = Duration::from_millis(1);
const DELAY_SELF_TEST: Duration = Duration::from_secs(10);

/// Low 11 bits of the data-ready word are non-zero when data is pending
const DATA_READY_MASK: u16 = 0x07FF;

/// Sensirion CRC-8 (polynomial 0x31, init 0xFF)
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0x31;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Split a received buffer of `[msb, lsb, crc]` triplets into checked words
pub fn decode_words(buf: &[u8]) -> Result<Vec<u16>> {
    if buf.len() % 3 != 0 {
        return Err(ChamberError::Sensor(format!(
            "response length {} is not a multiple of 3",
            buf.len()
        )));
    }

    buf.chunks_exact(3)
        .map(|chunk| {
            let expected = crc8(&chunk[..2]);
            if expected != chunk[2] {
                return Err(ChamberError::Sensor(format!(
                    "CRC mismatch: expected 0x{:02X}, got 0x{:02X}",
                    expected, chunk[2]
                )));
            }
            Ok(u16::from_be_bytes([chunk[0], chunk[1]]))
        })
        .collect()
}

/// Convert the three measurement words into physical units
pub fn convert_measurement(words: &[u16]) -> Result<Measurement> {
    match words {
        [co2, temperature, humidity] => Ok(Measurement {
            co2_ppm: f64::from(*co2),
            temperature_c: -45.0 + 175.0 * f64::from(*temperature) / 65535.0,
            relative_humidity_pct: 100.0 * f64::from(*humidity) / 65535.0,
        }),
        _ => Err(ChamberError::Sensor(format!(
            "expected 3 measurement words, got {}",
            words.len()
        ))),
    }
}

/// Whether the data-ready status word reports a pending measurement
pub fn data_ready(status: u16) -> bool {
    status & DATA_READY_MASK != 0
}

fn bus_error(e: impl std::fmt::Display) -> ChamberError {
    ChamberError::Sensor(format!("I2C error: {}", e))
}

/// Open SCD4x device
pub struct Scd4x<D: I2CDevice + Send = LinuxI2CDevice> {
    dev: D,
}

impl<D: I2CDevice + Send> Scd4x<D> {
    pub fn new(dev: D) -> Self {
        Self { dev }
    }

    async fn send(&mut self, cmd: u16, delay: Duration) -> Result<()> {
        self.dev.write(&cmd.to_be_bytes()).map_err(bus_error)?;
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn send_with_arg(&mut self, cmd: u16, arg: u16, delay: Duration) -> Result<()> {
        let [c0, c1] = cmd.to_be_bytes();
        let [a0, a1] = arg.to_be_bytes();
        let buffer = [c0, c1, a0, a1, crc8(&[a0, a1])];
        self.dev.write(&buffer).map_err(bus_error)?;
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn read_words(&mut self, cmd: u16, count: usize, delay: Duration) -> Result<Vec<u16>> {
        self.send(cmd, delay).await?;
        let mut buf = vec![0u8; count * 3];
        self.dev.read(&mut buf).map_err(bus_error)?;
        decode_words(&buf)
    }

    pub async fn stop_periodic_measurement(&mut self) -> Result<()> {
        self.send(CMD_STOP_PERIODIC_MEASUREMENT, DELAY_STOP_PERIODIC).await
    }

    /// 48-bit serial number
    pub async fn serial_number(&mut self) -> Result<u64> {
        let words = self.read_words(CMD_GET_SERIAL_NUMBER, 3, DELAY_READ).await?;
        Ok(words.iter().fold(0u64, |acc, w| (acc << 16) | u64::from(*w)))
    }

    pub async fn set_self_calibration(&mut self, enabled: bool) -> Result<()> {
        self.send_with_arg(
            CMD_SET_AUTOMATIC_SELF_CALIBRATION,
            u16::from(enabled),
            DELAY_SET_CONFIG,
        )
        .await
    }

    /// Run the on-chip self test; a non-zero result means a malfunction
    pub async fn self_test(&mut self) -> Result<()> {
        let words = self.read_words(CMD_PERFORM_SELF_TEST, 1, DELAY_SELF_TEST).await?;
        match words.first() {
            Some(0) => Ok(()),
            Some(code) => Err(ChamberError::Sensor(format!(
                "self test failed with code 0x{:04X}",
                code
            ))),
            None => Err(ChamberError::Sensor("empty self test response".to_string())),
        }
    }
}

#[async_trait]
impl<D: I2CDevice + Send> SensorDevice for Scd4x<D> {
    async fn start_periodic_measurement(&mut self) -> Result<()> {
        self.send(CMD_START_PERIODIC_MEASUREMENT, Duration::ZERO).await
    }

    async fn is_data_ready(&mut self) -> Result<bool> {
        let words = self.read_words(CMD_GET_DATA_READY_STATUS, 1, DELAY_READ).await?;
        Ok(words.first().map(|w| data_ready(*w)).unwrap_or(false))
    }

    async fn read_measurement(&mut self) -> Result<Measurement> {
        let words = self.read_words(CMD_READ_MEASUREMENT, 3, DELAY_READ).await?;
        convert_measurement(&words)
    }
}

/// Opens an SCD4x on a Linux I2C bus
#[derive(Debug, Clone)]
pub struct Scd4xConnector {
    bus: String,
    address: u16,
    self_calibration: bool,
    self_test: bool,
}

impl Scd4xConnector {
    pub fn new(config: &SensorConfig) -> Self {
        Self {
            bus: config.i2c_bus.clone(),
            address: config.address,
            self_calibration: config.self_calibration,
            self_test: config.self_test,
        }
    }
}

#[async_trait]
impl SensorConnector for Scd4xConnector {
    async fn connect(&mut self) -> Result<Box<dyn SensorDevice>> {
        debug!("Opening SCD4x at {} address 0x{:02X}", self.bus, self.address);
        let dev = LinuxI2CDevice::new(&self.bus, self.address).map_err(bus_error)?;
        let mut sensor = Scd4x::new(dev);

        // A previous run may have left the sensor measuring, which blocks
        // every configuration command
        sensor.stop_periodic_measurement().await?;

        let serial = sensor.serial_number().await?;
        info!("SCD4x serial number: 0x{:012X}", serial);

        sensor.set_self_calibration(self.self_calibration).await?;
        info!("Automatic self-calibration enabled: {}", self.self_calibration);

        if self.self_test {
            info!("Running SCD4x self test");
            sensor.self_test().await?;
        }

        Ok(Box::new(sensor))
    }
}
