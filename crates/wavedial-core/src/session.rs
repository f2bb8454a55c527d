//! Playback-session control state: the tuner context, the reset-key
//! debounce, and the recovery policy around one play attempt.
//!
//! [`Tuner::step`] is the decision half of the playing loop. The firmware
//! owns the I/O half (socket reads, decoder feeding, the poll-interval
//! sleep) and calls `step` once per iteration with the current liveness
//! flag; everything here runs against the [`DialInput`]/[`SelectionStore`]
//! seams and a millisecond clock, so the whole policy is host-testable.

use core::fmt::Debug;

use log::{info, warn};

use crate::input::DialInput;
use crate::selection::SelectionStore;

/// Poll cadence inside an active session. A yield sleep on a device with
/// nothing else to do, not a timing requirement.
pub const POLL_INTERVAL_MS: u64 = 50;
/// Stable-press window for the reset key.
pub const KEY_DEBOUNCE_MS: u64 = 50;
/// Pause after the pre-reset store write so the flash commit lands before
/// the restart cuts power to the controller.
pub const RESET_WRITE_SETTLE_MS: u64 = 50;
/// Settle after a user-initiated switch before reconnecting.
pub const USER_SWITCH_SETTLE_MS: u64 = 500;
/// Fixed delay between Wi-Fi association attempts. Never grows: the device
/// has no fallback behavior and must keep trying.
pub const WIFI_RETRY_DELAY_SECS: u64 = 5;

/// How one playback attempt ended, as seen by the main loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionOutcome {
    /// The listener turned the dial; the new index is already persisted.
    UserSwitch,
    /// Connect, stream, decode, or hardware failure.
    Failed,
}

/// Main-loop recovery policy for a finished session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecoveryAction {
    /// Brief settle, then reconnect to the newly selected station.
    Settle,
    /// Restart the control flow from the top, keeping persisted state, so
    /// the device resumes on the same station.
    SoftReset,
}

pub fn recovery_for(outcome: SessionOutcome) -> RecoveryAction {
    match outcome {
        SessionOutcome::UserSwitch => RecoveryAction::Settle,
        SessionOutcome::Failed => RecoveryAction::SoftReset,
    }
}

/// One decision step of the playing loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionStep {
    /// Keep playing; sleep [`POLL_INTERVAL_MS`] and step again.
    Continue,
    Finished(SessionOutcome),
    /// Confirmed reset press: index 0 is written (best-effort); the caller
    /// must wait [`RESET_WRITE_SETTLE_MS`] and trigger the hard restart.
    HardReset,
}

/// Verdict of one debounce sample.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DebounceVerdict {
    Sampling,
    Confirmed,
    Released,
}

/// Time-windowed confirmation that a sampled key press is stable, not
/// electrical noise.
#[derive(Clone, Copy, Debug)]
pub struct KeyDebounce {
    deadline_ms: u64,
}

impl KeyDebounce {
    pub fn new(now_ms: u64) -> Self {
        Self {
            deadline_ms: now_ms + KEY_DEBOUNCE_MS,
        }
    }

    /// Feed one key sample. Any release inside the window invalidates the
    /// press; holding through the deadline confirms it.
    pub fn sample(&self, key_down: bool, now_ms: u64) -> DebounceVerdict {
        if !key_down {
            DebounceVerdict::Released
        } else if now_ms >= self.deadline_ms {
            DebounceVerdict::Confirmed
        } else {
            DebounceVerdict::Sampling
        }
    }
}

/// What a single input poll asked for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PollIntent {
    None,
    Switch { index: usize },
    ResetRequested,
}

/// The session/loop context: current station, last observed dial position,
/// last key level. Built once at boot and threaded through every session.
#[derive(Debug)]
pub struct Tuner {
    station_count: usize,
    current_index: usize,
    last_position: i32,
    last_key_down: bool,
}

impl Tuner {
    pub fn new(station_count: usize, current_index: usize) -> Self {
        Self {
            station_count,
            current_index,
            last_position: current_index as i32,
            last_key_down: false,
        }
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Re-seat the dial on the station being played, so the first poll after
    /// a resume cannot register a phantom switch.
    pub fn sync_baseline<D: DialInput>(&mut self, dial: &mut D) {
        dial.set_position(self.current_index as i32);
        self.last_position = self.current_index as i32;
    }

    /// Channel change wins over the key within one poll: a confirmed switch
    /// ends the session before the key is ever sampled that iteration.
    fn poll<D: DialInput>(&mut self, dial: &mut D) -> Result<PollIntent, D::Error> {
        let position = dial.position()?;
        if position != self.last_position {
            self.last_position = position;
            self.current_index = position.rem_euclid(self.station_count as i32) as usize;
            return Ok(PollIntent::Switch {
                index: self.current_index,
            });
        }

        let key_down = dial.key_pressed()?;
        let falling = key_down && !self.last_key_down;
        self.last_key_down = key_down;
        if falling {
            return Ok(PollIntent::ResetRequested);
        }
        Ok(PollIntent::None)
    }

    /// One iteration of the playing loop: liveness gate first, then the
    /// mutually exclusive channel-change / reset-key checks.
    pub fn step<D, S, C>(
        &mut self,
        playing: bool,
        dial: &mut D,
        store: &mut S,
        clock: &mut C,
    ) -> SessionStep
    where
        D: DialInput,
        D::Error: Debug,
        S: SelectionStore,
        S::Error: Debug,
        C: FnMut() -> u64,
    {
        if !playing {
            info!("stream stopped playing");
            return SessionStep::Finished(SessionOutcome::Failed);
        }

        let intent = match self.poll(dial) {
            Ok(intent) => intent,
            Err(err) => {
                warn!("dial read failed: {err:?}; treating as no input");
                PollIntent::None
            }
        };

        match intent {
            PollIntent::None => SessionStep::Continue,
            PollIntent::Switch { index } => {
                // Persist before stopping playback: a power cut right after
                // the switch must still resume on the new station.
                if let Err(err) = store.save(index as u8) {
                    warn!("selection save failed: {err:?}");
                    return SessionStep::Finished(SessionOutcome::Failed);
                }
                info!("selection saved: station {index}");
                SessionStep::Finished(SessionOutcome::UserSwitch)
            }
            PollIntent::ResetRequested => {
                let debounce = KeyDebounce::new(clock());
                loop {
                    let key_down = dial.key_pressed().unwrap_or(false);
                    match debounce.sample(key_down, clock()) {
                        DebounceVerdict::Sampling => continue,
                        DebounceVerdict::Released => return SessionStep::Continue,
                        DebounceVerdict::Confirmed => {
                            if let Err(err) = store.save(0) {
                                warn!("selection reset write failed: {err:?}; restarting anyway");
                            } else {
                                info!("reset key confirmed: selection reset to station 0");
                            }
                            return SessionStep::HardReset;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::mock::MockDial;
    use heapless::Vec;

    #[derive(Default)]
    struct MockStore {
        saved: Vec<u8, 8>,
        fail_saves: bool,
    }

    impl SelectionStore for MockStore {
        type Error = ();

        fn load(&mut self) -> Result<Option<u8>, Self::Error> {
            Ok(self.saved.last().copied())
        }

        fn save(&mut self, index: u8) -> Result<(), Self::Error> {
            if self.fail_saves {
                return Err(());
            }
            self.saved.push(index).map_err(|_| ())
        }
    }

    fn ticking_clock() -> impl FnMut() -> u64 {
        let mut now_ms = 0u64;
        move || {
            now_ms += 10;
            now_ms
        }
    }

    #[test]
    fn baseline_resync_suppresses_phantom_switch() {
        let mut tuner = Tuner::new(3, 1);
        let mut dial = MockDial::new();
        let mut store = MockStore::default();
        let mut clock = ticking_clock();

        // Dial left at a stale position from before the resume.
        dial.turn_to(7);
        tuner.sync_baseline(&mut dial);
        assert_eq!(dial.position_value(), 1);

        let step = tuner.step(true, &mut dial, &mut store, &mut clock);
        assert_eq!(step, SessionStep::Continue);
        assert_eq!(tuner.current_index(), 1);
        assert!(store.saved.is_empty());
    }

    #[test]
    fn dial_turn_persists_then_reports_user_switch() {
        let mut tuner = Tuner::new(3, 1);
        let mut dial = MockDial::new();
        let mut store = MockStore::default();
        let mut clock = ticking_clock();

        tuner.sync_baseline(&mut dial);
        dial.turn_to(5);

        let step = tuner.step(true, &mut dial, &mut store, &mut clock);
        assert_eq!(step, SessionStep::Finished(SessionOutcome::UserSwitch));
        assert_eq!(tuner.current_index(), 2); // 5 mod 3
        assert_eq!(store.saved.as_slice(), &[2]);
    }

    #[test]
    fn dial_position_wraps_below_zero() {
        let mut tuner = Tuner::new(4, 0);
        let mut dial = MockDial::new();
        let mut store = MockStore::default();
        let mut clock = ticking_clock();

        tuner.sync_baseline(&mut dial);
        dial.turn_to(-1);

        let step = tuner.step(true, &mut dial, &mut store, &mut clock);
        assert_eq!(step, SessionStep::Finished(SessionOutcome::UserSwitch));
        assert_eq!(tuner.current_index(), 3);
        assert_eq!(store.saved.as_slice(), &[3]);
    }

    #[test]
    fn failed_save_downgrades_switch_to_failure() {
        let mut tuner = Tuner::new(3, 0);
        let mut dial = MockDial::new();
        let mut store = MockStore {
            fail_saves: true,
            ..MockStore::default()
        };
        let mut clock = ticking_clock();

        tuner.sync_baseline(&mut dial);
        dial.turn_to(1);

        let step = tuner.step(true, &mut dial, &mut store, &mut clock);
        assert_eq!(step, SessionStep::Finished(SessionOutcome::Failed));
    }

    #[test]
    fn stalled_stream_fails_without_touching_input() {
        let mut tuner = Tuner::new(3, 0);
        let mut dial = MockDial::new();
        let mut store = MockStore::default();
        let mut clock = ticking_clock();

        let step = tuner.step(false, &mut dial, &mut store, &mut clock);
        assert_eq!(step, SessionStep::Finished(SessionOutcome::Failed));
        assert_eq!(dial.key_samples, 0);
    }

    #[test]
    fn switch_wins_over_key_press_in_the_same_poll() {
        let mut tuner = Tuner::new(3, 0);
        let mut dial = MockDial::new().with_key_script(&[true; 8]);
        let mut store = MockStore::default();
        let mut clock = ticking_clock();

        tuner.sync_baseline(&mut dial);
        dial.turn_to(2);

        let step = tuner.step(true, &mut dial, &mut store, &mut clock);
        assert_eq!(step, SessionStep::Finished(SessionOutcome::UserSwitch));
        assert_eq!(dial.key_samples, 0);
    }

    #[test]
    fn stable_press_writes_zero_then_requests_hard_reset() {
        let mut tuner = Tuner::new(3, 2);
        let mut dial = MockDial::new().with_key_script(&[true; 16]);
        let mut store = MockStore::default();
        let mut clock = ticking_clock();

        tuner.sync_baseline(&mut dial);

        let step = tuner.step(true, &mut dial, &mut store, &mut clock);
        assert_eq!(step, SessionStep::HardReset);
        assert_eq!(store.saved.as_slice(), &[0]);
    }

    #[test]
    fn press_released_inside_window_is_ignored() {
        // Falling edge, then a release two samples into the debounce window.
        let script = [true, true, false, false, false, false];
        let mut tuner = Tuner::new(3, 2);
        let mut dial = MockDial::new().with_key_script(&script);
        let mut store = MockStore::default();
        let mut clock = ticking_clock();

        tuner.sync_baseline(&mut dial);

        let step = tuner.step(true, &mut dial, &mut store, &mut clock);
        assert_eq!(step, SessionStep::Continue);
        assert!(store.saved.is_empty());
        assert_eq!(tuner.current_index(), 2);
    }

    #[test]
    fn reset_write_failure_still_requests_hard_reset() {
        let mut tuner = Tuner::new(3, 1);
        let mut dial = MockDial::new().with_key_script(&[true; 16]);
        let mut store = MockStore {
            fail_saves: true,
            ..MockStore::default()
        };
        let mut clock = ticking_clock();

        tuner.sync_baseline(&mut dial);

        let step = tuner.step(true, &mut dial, &mut store, &mut clock);
        assert_eq!(step, SessionStep::HardReset);
    }

    #[test]
    fn held_key_does_not_retrigger_without_a_new_edge() {
        // Release mid-window, then keep the key down: the stale
        // `last_key_down == true` must block a second reset request until
        // the key is seen up again.
        let script = [true, false, true, true];
        let mut tuner = Tuner::new(3, 0);
        let mut dial = MockDial::new().with_key_script(&script);
        let mut store = MockStore::default();
        let mut clock = ticking_clock();

        tuner.sync_baseline(&mut dial);

        // Edge detected, then released during debounce.
        assert_eq!(
            tuner.step(true, &mut dial, &mut store, &mut clock),
            SessionStep::Continue
        );
        // Key reads down again, but no falling edge was observed.
        assert_eq!(
            tuner.step(true, &mut dial, &mut store, &mut clock),
            SessionStep::Continue
        );
        assert!(store.saved.is_empty());
    }

    #[test]
    fn user_switch_settles_and_failure_soft_resets() {
        assert_eq!(
            recovery_for(SessionOutcome::UserSwitch),
            RecoveryAction::Settle
        );
        assert_eq!(
            recovery_for(SessionOutcome::Failed),
            RecoveryAction::SoftReset
        );
    }

    #[test]
    fn debounce_confirms_only_at_the_deadline() {
        let debounce = KeyDebounce::new(100);
        assert_eq!(debounce.sample(true, 120), DebounceVerdict::Sampling);
        assert_eq!(debounce.sample(true, 149), DebounceVerdict::Sampling);
        assert_eq!(debounce.sample(false, 149), DebounceVerdict::Released);
        assert_eq!(debounce.sample(true, 150), DebounceVerdict::Confirmed);
    }
}
