use log::trace;

use crate::drivers::PipelineError;
/// Downstream contract of the actuation mapper.
pub trait ActuatorDriver {
    fn set_actuator_angle(&mut self, index: usize, angle: u8) -> Result<(), PipelineError>;
}
impl<D: ActuatorDriver + ?Sized> ActuatorDriver for Box<D> {
    fn set_actuator_angle(&mut self, index: usize, angle: u8) -> Result<(), PipelineError> {
        (**self).set_actuator_angle(index, angle)
    }
}
/// 12-bit PWM controller, one pulse window per channel.
pub trait PwmBus {
    fn set_channel_pulse(&mut self, channel: u8, on_ticks: u16, off_ticks: u16)
        -> Result<(), PipelineError>;
}
pub const MAX_ANGLE: u8 = 180;
/// Tick counts for 0 and 180 degrees at 50 Hz.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulseRange {
    pub min_ticks: u16,
    pub max_ticks: u16,
}
impl Default for PulseRange {
    fn default() -> Self {
        Self {
            min_ticks: 125,
            max_ticks: 500,
        }
    }
}
impl PulseRange {
    pub fn ticks_for(&self, angle: u8) -> u16 {
        let angle = u32::from(angle.min(MAX_ANGLE));
        let span = u32::from(self.max_ticks.saturating_sub(self.min_ticks));
        self.min_ticks + (span * angle / u32::from(MAX_ANGLE)) as u16
    }
}
/// Hobby servos behind a PWM bus; actuator `i` is wired to `channels[i]`.
pub struct ServoDriver<B: PwmBus> {
    bus: B,
    channels: Vec<u8>,
    pulse: PulseRange,
}
impl<B: PwmBus> ServoDriver<B> {
    pub fn new(bus: B, channels: Vec<u8>) -> Self {
        Self::with_pulse_range(bus, channels, PulseRange::default())
    }
    pub fn with_pulse_range(bus: B, channels: Vec<u8>, pulse: PulseRange) -> Self {
        Self {
            bus,
            channels,
            pulse,
        }
    }
    pub fn bus(&self) -> &B {
        &self.bus
    }
}
impl<B: PwmBus> ActuatorDriver for ServoDriver<B> {
    fn set_actuator_angle(&mut self, index: usize, angle: u8) -> Result<(), PipelineError> {
        let channel = *self
            .channels
            .get(index)
            .ok_or_else(|| PipelineError::Actuator {
                index,
                reason: "no PWM channel wired".into(),
            })?;
        self.bus
            .set_channel_pulse(channel, 0, self.pulse.ticks_for(angle))
    }
}
/// Host stand-in for the PWM chip.
#[derive(Default)]
pub struct LoggingPwmBus {
    commands: u64,
}
impl LoggingPwmBus {
    pub fn commands(&self) -> u64 {
        self.commands
    }
}
impl PwmBus for LoggingPwmBus {
    fn set_channel_pulse(
        &mut self,
        channel: u8,
        on_ticks: u16,
        off_ticks: u16,
    ) -> Result<(), PipelineError> {
        self.commands += 1;
        trace!("pwm ch{channel}: on={on_ticks} off={off_ticks}");
        Ok(())
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[derive(Default)]
    struct RecordingBus {
        pulses: Vec<(u8, u16, u16)>,
    }
    impl PwmBus for RecordingBus {
        fn set_channel_pulse(
            &mut self,
            channel: u8,
            on_ticks: u16,
            off_ticks: u16,
        ) -> Result<(), PipelineError> {
            self.pulses.push((channel, on_ticks, off_ticks));
            Ok(())
        }
    }
    #[test]
    fn angle_maps_onto_pulse_range() {
        let range = PulseRange::default();
        assert_eq!(range.ticks_for(0), 125);
        assert_eq!(range.ticks_for(90), 312);
        assert_eq!(range.ticks_for(180), 500);
        assert_eq!(range.ticks_for(255), 500);
    }
    #[test]
    fn servo_driver_routes_to_wired_channel() {
        let mut driver = ServoDriver::new(RecordingBus::default(), vec![4, 7]);
        driver.set_actuator_angle(1, 180).unwrap();
        driver.set_actuator_angle(0, 0).unwrap();
        assert_eq!(driver.bus().pulses, vec![(7, 0, 500), (4, 0, 125)]);
        assert!(matches!(
            driver.set_actuator_angle(2, 10),
            Err(PipelineError::Actuator { index: 2, .. })
        ));
    }
    #[test]
    fn logging_bus_counts_commands() {
        let mut driver = ServoDriver::new(LoggingPwmBus::default(), vec![0]);
        driver.set_actuator_angle(0, 45).unwrap();
        driver.set_actuator_angle(0, 45).unwrap();
        assert_eq!(driver.bus().commands(), 2);
    }
}
