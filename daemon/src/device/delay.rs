//! DPM-based read delay emulation.
//!
//! Copy-protection checks measure seek-time ratios across the disc; those
//! ratios encode the sector density pattern of the pressed original. The
//! model replays them from the image's density-per-minute data: a seek
//! costs the angular distance travelled (with a 20 ms "head jump" shortcut
//! every full ten rotations), a transfer costs the sectors read divided by
//! the current sectors-per-second rate. Both run on a fixed 12000 RPM
//! spindle.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::image::Disc;

/// Rotations per second at 12000 RPM
const ROTATIONS_PER_SECOND: f64 = 12000.0 / 60.0;

/// Rotations a single sweep may cover before the head jumps
const HEAD_JUMP_ROTATIONS: f64 = 10.0;

/// Cost of one head jump, in microseconds
const HEAD_JUMP_US: i64 = 20_000;

/// Per-device delay accumulator
#[derive(Debug)]
pub struct DelayEmulator {
    current_angle: f64,
    delay_begin: Instant,
    delay_amount_us: i64,
}

impl DelayEmulator {
    pub fn new() -> Self {
        Self {
            current_angle: 0.0,
            delay_begin: Instant::now(),
            delay_amount_us: 0,
        }
    }

    /// Start a delay measurement for an access at `address`
    pub fn begin(
        &mut self,
        disc: &Disc,
        address: i32,
        num_sectors: i32,
        dpm_emulation: bool,
        tr_emulation: bool,
    ) {
        self.delay_begin = Instant::now();
        self.delay_amount_us = 0;
        self.increase(disc, address, num_sectors, dpm_emulation, tr_emulation);
    }

    /// Accumulate delay for an access; a no-op when the image carries no
    /// DPM data for the address
    pub fn increase(
        &mut self,
        disc: &Disc,
        address: i32,
        num_sectors: i32,
        dpm_emulation: bool,
        tr_emulation: bool,
    ) {
        let Some((dpm_angle, dpm_density)) = disc.dpm_data_for_sector(address) else {
            debug!(target: "opticd::delay", address, "no DPM data for sector");
            return;
        };

        if dpm_emulation {
            let mut rotations = (dpm_angle - self.current_angle).abs();
            self.current_angle = dpm_angle;

            debug!(target: "opticd::delay", address, rotations, "seek distance");

            // Long seeks take a shortcut across the spiral instead of
            // following it
            if rotations >= HEAD_JUMP_ROTATIONS {
                while rotations >= HEAD_JUMP_ROTATIONS {
                    rotations -= HEAD_JUMP_ROTATIONS;
                }
                self.delay_amount_us += HEAD_JUMP_US;
            }

            self.delay_amount_us += (rotations / ROTATIONS_PER_SECOND * 1_000_000.0) as i64;
        }

        if tr_emulation {
            let sectors_per_rotation = 360.0 / dpm_density;
            let sectors_per_second = sectors_per_rotation * ROTATIONS_PER_SECOND;

            debug!(
                target: "opticd::delay",
                num_sectors, sectors_per_second, "transfer delay"
            );
            self.delay_amount_us +=
                (num_sectors as f64 / sectors_per_second * 1_000_000.0) as i64;
        }
    }

    /// Sleep off whatever delay remains after compensating for processing
    /// time
    pub fn finalize(&mut self) {
        if self.delay_amount_us == 0 {
            return;
        }

        let elapsed_us = self.delay_begin.elapsed().as_micros() as i64;
        let remaining_us = self.delay_amount_us - elapsed_us;

        debug!(
            target: "opticd::delay",
            calculated = self.delay_amount_us,
            processing = elapsed_us,
            actual = remaining_us,
            "delay finalize"
        );

        if remaining_us > 0 {
            std::thread::sleep(Duration::from_micros(remaining_us as u64));
        }
        self.delay_amount_us = 0;
    }

    /// Pending delay in microseconds (test hook)
    #[cfg(test)]
    fn pending_us(&self) -> i64 {
        self.delay_amount_us
    }
}

impl Default for DelayEmulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{DpmTable, MediumType};

    fn disc_with_dpm() -> Disc {
        let mut disc = Disc::new(MediumType::Cd);
        // Constant density of 1.5 degrees per sector, 1000 blocks of 100
        disc.set_dpm(DpmTable::from_densities(0, 100, vec![1.5; 1000]));
        disc
    }

    #[test]
    fn test_no_dpm_data_is_noop() {
        let disc = Disc::new(MediumType::Cd);
        let mut delay = DelayEmulator::new();
        delay.begin(&disc, 1000, 16, true, true);
        assert_eq!(delay.pending_us(), 0);
    }

    #[test]
    fn test_short_seek_proportional_to_rotations() {
        let disc = disc_with_dpm();
        let mut delay = DelayEmulator::new();

        // From angle 0 to sector 1200: angle = 1200 * 1.5 / 360 = 5 rotations
        delay.begin(&disc, 1200, 0, true, false);
        let expected = (5.0 / ROTATIONS_PER_SECOND * 1_000_000.0) as i64;
        assert!((delay.pending_us() - expected).abs() <= 1);

        // Seeking back to the same spot costs nothing
        delay.begin(&disc, 1200, 0, true, false);
        assert_eq!(delay.pending_us(), 0);
    }

    #[test]
    fn test_long_seek_takes_head_jump() {
        let disc = disc_with_dpm();
        let mut delay = DelayEmulator::new();

        // Sector 6000: 25 rotations away; two jumps reduce it below ten
        delay.begin(&disc, 6000, 0, true, false);
        let residual = 5.0; // 25 - 2*10
        let expected = HEAD_JUMP_US + (residual / ROTATIONS_PER_SECOND * 1_000_000.0) as i64;
        assert!((delay.pending_us() - expected).abs() <= 1);
    }

    #[test]
    fn test_transfer_delay() {
        let disc = disc_with_dpm();
        let mut delay = DelayEmulator::new();

        // 240 sectors per rotation at 1.5 deg/sector, 200 rotations/s
        delay.begin(&disc, 0, 4800, false, true);
        let sectors_per_second = (360.0 / 1.5) * ROTATIONS_PER_SECOND;
        let expected = (4800.0 / sectors_per_second * 1_000_000.0) as i64;
        assert!((delay.pending_us() - expected).abs() <= 1);
    }

    #[test]
    fn test_disabled_emulation_accumulates_nothing() {
        let disc = disc_with_dpm();
        let mut delay = DelayEmulator::new();
        delay.begin(&disc, 3000, 64, false, false);
        assert_eq!(delay.pending_us(), 0);
    }

    #[test]
    fn test_finalize_with_no_delay_returns_immediately() {
        let mut delay = DelayEmulator::new();
        let start = Instant::now();
        delay.finalize();
        assert!(start.elapsed() < Duration::from_millis(5));
    }
}
