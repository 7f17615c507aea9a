//! Dual H-bridge actuator on Linux sysfs PWM and GPIO.
//!
//! Each motor has one PWM channel for speed and two GPIO lines for direction
//! (IN1/IN2 on an L298N-style driver). The sysfs root is configurable so the
//! driver can run against a scratch directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::differential::{Actuator, Direction, DriveCommand};

/// Where the motor lines live under sysfs.
#[derive(Clone, Debug, PartialEq)]
pub struct SysfsLayout {
    /// Normally `/sys/class`.
    pub root: PathBuf,
    pub pwm_chip: u32,
    pub left_channel: u32,
    pub right_channel: u32,
    /// Direction lines (IN1, IN2) of the left motor.
    pub left_pins: (u32, u32),
    /// Direction lines (IN3, IN4) of the right motor.
    pub right_pins: (u32, u32),
    pub period_ns: u64,
}

impl Default for SysfsLayout {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/sys/class"),
            pwm_chip: 0,
            left_channel: 0,
            right_channel: 1,
            left_pins: (27, 22),
            right_pins: (23, 24),
            period_ns: 1_000_000,
        }
    }
}

impl SysfsLayout {
    fn chip_dir(&self) -> PathBuf {
        self.root.join("pwm").join(format!("pwmchip{}", self.pwm_chip))
    }

    fn channel_dir(&self, channel: u32) -> PathBuf {
        self.chip_dir().join(format!("pwm{}", channel))
    }

    fn gpio_dir(&self, pin: u32) -> PathBuf {
        self.root.join("gpio").join(format!("gpio{}", pin))
    }

    fn pins(&self) -> [u32; 4] {
        [
            self.left_pins.0,
            self.left_pins.1,
            self.right_pins.0,
            self.right_pins.1,
        ]
    }
}

pub struct SysfsActuator {
    layout: SysfsLayout,
    released: bool,
}

impl SysfsActuator {
    /// Export and configure every PWM channel and direction line.
    pub fn open(layout: SysfsLayout) -> Result<Self> {
        if layout.period_ns == 0 {
            return Err(anyhow!("pwm period must be greater than zero"));
        }
        for channel in [layout.left_channel, layout.right_channel] {
            let dir = layout.channel_dir(channel);
            export_if_missing(&layout.chip_dir().join("export"), channel, &dir)?;
            write_attr(&dir.join("period"), layout.period_ns)?;
            write_attr(&dir.join("duty_cycle"), 0)?;
            write_attr(&dir.join("enable"), 1)?;
        }
        for pin in layout.pins() {
            let dir = layout.gpio_dir(pin);
            export_if_missing(&layout.root.join("gpio").join("export"), pin, &dir)?;
            write_attr(&dir.join("direction"), "out")?;
            write_attr(&dir.join("value"), 0)?;
        }
        log::info!(
            "SysfsActuator: pwmchip{} channels {}/{}, direction pins {:?}",
            layout.pwm_chip,
            layout.left_channel,
            layout.right_channel,
            layout.pins()
        );
        Ok(Self {
            layout,
            released: false,
        })
    }

    fn set_motor(&self, channel: u32, pins: (u32, u32), duty: f32, dir: Direction) -> Result<()> {
        let duty_ns = (duty.clamp(0.0, 1.0) as f64 * self.layout.period_ns as f64).round() as u64;
        let (a, b) = match dir {
            Direction::Forward => (1, 0),
            Direction::Reverse => (0, 1),
        };
        write_attr(&self.layout.gpio_dir(pins.0).join("value"), a)?;
        write_attr(&self.layout.gpio_dir(pins.1).join("value"), b)?;
        write_attr(&self.layout.channel_dir(channel).join("duty_cycle"), duty_ns)
    }

    fn zero_outputs(&self) -> Result<()> {
        for channel in [self.layout.left_channel, self.layout.right_channel] {
            write_attr(&self.layout.channel_dir(channel).join("duty_cycle"), 0)?;
        }
        for pin in self.layout.pins() {
            write_attr(&self.layout.gpio_dir(pin).join("value"), 0)?;
        }
        Ok(())
    }
}

impl Actuator for SysfsActuator {
    fn name(&self) -> &str {
        "sysfs"
    }

    fn drive(&mut self, command: &DriveCommand) -> Result<()> {
        if self.released {
            return Err(anyhow!("sysfs actuator already released"));
        }
        self.set_motor(
            self.layout.left_channel,
            self.layout.left_pins,
            command.left_duty,
            command.left_dir,
        )?;
        self.set_motor(
            self.layout.right_channel,
            self.layout.right_pins,
            command.right_duty,
            command.right_dir,
        )
    }

    fn stop(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.zero_outputs()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let mut first_err = self.zero_outputs().err();
        for channel in [self.layout.left_channel, self.layout.right_channel] {
            let result = write_attr(&self.layout.channel_dir(channel).join("enable"), 0).and_then(
                |_| write_attr(&self.layout.chip_dir().join("unexport"), channel),
            );
            if let Err(err) = result {
                first_err.get_or_insert(err);
            }
        }
        for pin in self.layout.pins() {
            if let Err(err) = write_attr(&self.layout.root.join("gpio").join("unexport"), pin) {
                first_err.get_or_insert(err);
            }
        }
        log::info!("SysfsActuator: released pwmchip{}", self.layout.pwm_chip);
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for SysfsActuator {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::warn!("SysfsActuator: release on drop failed: {}", err);
        }
    }
}

fn export_if_missing(export: &Path, index: u32, dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    write_attr(export, index)?;
    if !dir.is_dir() {
        return Err(anyhow!("export of {} did not create {}", index, dir.display()));
    }
    Ok(())
}

fn write_attr(path: &Path, value: impl ToString) -> Result<()> {
    fs::write(path, value.to_string()).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_layout(root: &Path) -> SysfsLayout {
        let layout = SysfsLayout {
            root: root.to_path_buf(),
            period_ns: 1_000,
            ..SysfsLayout::default()
        };
        for channel in [layout.left_channel, layout.right_channel] {
            fs::create_dir_all(layout.channel_dir(channel)).unwrap();
        }
        for pin in layout.pins() {
            fs::create_dir_all(layout.gpio_dir(pin)).unwrap();
        }
        layout
    }

    fn read(path: PathBuf) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn drive_writes_duty_and_direction() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let layout = scratch_layout(tmp.path());
        let mut actuator = SysfsActuator::open(layout.clone())?;
        assert_eq!(read(layout.channel_dir(0).join("enable")), "1");

        actuator.drive(&DriveCommand {
            left_duty: 0.25,
            right_duty: 0.5,
            left_dir: Direction::Forward,
            right_dir: Direction::Reverse,
        })?;
        assert_eq!(read(layout.channel_dir(0).join("duty_cycle")), "250");
        assert_eq!(read(layout.channel_dir(1).join("duty_cycle")), "500");
        assert_eq!(read(layout.gpio_dir(27).join("value")), "1");
        assert_eq!(read(layout.gpio_dir(22).join("value")), "0");
        assert_eq!(read(layout.gpio_dir(23).join("value")), "0");
        assert_eq!(read(layout.gpio_dir(24).join("value")), "1");
        Ok(())
    }

    #[test]
    fn release_zeroes_and_disables_once() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let layout = scratch_layout(tmp.path());
        let mut actuator = SysfsActuator::open(layout.clone())?;
        actuator.drive(&DriveCommand {
            left_duty: 1.0,
            right_duty: 1.0,
            left_dir: Direction::Forward,
            right_dir: Direction::Forward,
        })?;
        actuator.release()?;
        actuator.release()?;
        assert_eq!(read(layout.channel_dir(0).join("duty_cycle")), "0");
        assert_eq!(read(layout.channel_dir(1).join("enable")), "0");
        assert!(actuator.drive(&DriveCommand::IDLE).is_err());
        Ok(())
    }

    #[test]
    fn missing_export_fails_open() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let layout = SysfsLayout {
            root: tmp.path().to_path_buf(),
            ..SysfsLayout::default()
        };
        assert!(SysfsActuator::open(layout).is_err());
        Ok(())
    }
}
