//! # Acquisition Loop
//!
//! Drives one reading per cycle through the pipeline:
//!
//! ```text
//! Idle -> Reading -> Validating -> Decrypting -> Decoding -> Mapping -> Dispatching -> Idle
//! ```
//!
//! Every stage can leave the cycle early. The error class decides what happens:
//!
//! | Stage        | Failure             | Handling                                  |
//! |--------------|---------------------|-------------------------------------------|
//! | Reading      | link error          | recovery pause, flush and reopen          |
//! | Validating   | frame error         | recovery pause, flush and reopen          |
//! | Decrypting   | decrypt error       | skip cycle                                |
//! | Decoding     | not a notification  | skip cycle silently                       |
//! | Decoding     | decode error        | skip cycle                                |
//! | Mapping      | incomplete reading  | warn, dispatch anyway                     |
//! | Dispatching  | no id / sink error  | fatal                                     |
//!
//! When no reading has been dispatched within the link-health deadline the loop
//! gives up with [`MeterError::LinkHealthTimeout`].

use crate::constants::{CYCLE_PAUSE, LINK_HEALTH_DEADLINE, RECOVERY_PAUSE};
use crate::dlms::apdu::decode;
use crate::dlms::security::Decryptor;
use crate::error::MeterError;
use crate::logging::{log_frame_hex, LogThrottle};
use crate::mbus::envelope::split;
use crate::mbus::serial::MeterLink;
use crate::reading::{from_decoded, Reading};
use crate::sink::ReadingSink;
use crate::util::hex::encode_hex_upper;
use log::{debug, error, info, trace, warn};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

/// Stage of the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Reading,
    Validating,
    Decrypting,
    Decoding,
    Mapping,
    Dispatching,
}

/// How a non-fatal cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The reading was stored under `data_id`.
    Dispatched { data_id: u64, reading: Reading },
    /// Link or framing failure; the link was flushed and reopened.
    Recovered(MeterError),
    /// Decryption or decoding failed, nothing was dispatched.
    Skipped(MeterError),
    /// The APDU was not a data-notification.
    Ignored,
}

/// Timing and output policy of the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub link_deadline: Duration,
    /// Pause after every dispatched reading
    pub cycle_pause: Duration,
    /// Pause before flushing and reopening the link
    pub recovery_pause: Duration,
    /// Print every reading as a table on stdout
    pub print_value: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        LoopSettings {
            link_deadline: LINK_HEALTH_DEADLINE,
            cycle_pause: CYCLE_PAUSE,
            recovery_pause: RECOVERY_PAUSE,
            print_value: false,
        }
    }
}

pub struct AcquisitionLoop<L, S> {
    link: L,
    sink: S,
    decryptor: Decryptor,
    settings: LoopSettings,
    state: CycleState,
    last_dispatch: Instant,
    recovery_log: LogThrottle,
}

impl<L: MeterLink, S: ReadingSink> AcquisitionLoop<L, S> {
    /// The link-health clock starts now.
    pub fn new(link: L, sink: S, decryptor: Decryptor, settings: LoopSettings) -> Self {
        AcquisitionLoop {
            link,
            sink,
            decryptor,
            settings,
            state: CycleState::Idle,
            last_dispatch: Instant::now(),
            recovery_log: LogThrottle::new(Duration::from_secs(60), 5),
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Runs cycles until a fatal error occurs. The error is returned, not
    /// logged; reporting it is up to the caller.
    pub async fn run(&mut self) -> MeterError {
        info!("Application started");
        loop {
            match self.run_cycle().await {
                Ok(outcome) => trace!("cycle finished: {outcome:?}"),
                Err(err) => return err,
            }
        }
    }

    /// Runs one cycle. Only fatal errors are returned as `Err`.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, MeterError> {
        let outcome = self.cycle().await;
        self.enter(CycleState::Idle);
        outcome
    }

    async fn cycle(&mut self) -> Result<CycleOutcome, MeterError> {
        self.enter(CycleState::Reading);
        let deadline = self.settings.link_deadline;
        let remaining = deadline
            .checked_sub(self.last_dispatch.elapsed())
            .ok_or(MeterError::LinkHealthTimeout(deadline))?;

        let window = match timeout(remaining, self.link.read_window()).await {
            Err(_) => return Err(MeterError::LinkHealthTimeout(deadline)),
            Ok(Err(err)) => {
                if self.recovery_log.allow() {
                    warn!("Reading failed, restarting: {err}");
                }
                self.recover().await;
                return Ok(CycleOutcome::Recovered(err));
            }
            Ok(Ok(window)) => window,
        };
        log_frame_hex("window", window.as_bytes());

        self.enter(CycleState::Validating);
        let envelope = match split(&window) {
            Ok(envelope) => envelope,
            Err(err) => {
                if self.recovery_log.allow() {
                    warn!("Wrong M-Bus frame, restarting: {err}");
                }
                self.recover().await;
                return Ok(CycleOutcome::Recovered(err.into()));
            }
        };
        info!("Incoming data ok");
        debug!(
            "mbus start {}, system title {}, frame counter {}, security suite {}",
            envelope.mbus_start_hex(),
            encode_hex_upper(&envelope.system_title),
            envelope.frame_counter_value(),
            envelope.security_control.suite_id()
        );

        self.enter(CycleState::Decrypting);
        let apdu = match self.decryptor.decrypt(&envelope) {
            Ok(apdu) => apdu,
            Err(err) => {
                error!("Decryption failed: {err}");
                return Ok(CycleOutcome::Skipped(err.into()));
            }
        };
        log_frame_hex("apdu", &apdu);

        self.enter(CycleState::Decoding);
        let decoded = match decode(&apdu) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return Ok(CycleOutcome::Ignored),
            Err(err) => {
                error!("Decoding failed: {err}");
                return Ok(CycleOutcome::Skipped(err.into()));
            }
        };

        self.enter(CycleState::Mapping);
        let reading = from_decoded(&decoded);
        let missing = reading.missing();
        if !missing.is_empty() {
            warn!("{}", MeterError::IncompleteReading { missing });
        }
        if self.settings.print_value {
            println!("{reading}");
        }

        self.enter(CycleState::Dispatching);
        let data_id = match self.sink.store(&reading).await {
            Ok(Some(data_id)) => data_id,
            Ok(None) => {
                return Err(MeterError::Dispatch(
                    "sink returned no record identifier".into(),
                ))
            }
            Err(err) => return Err(err.into()),
        };
        info!("Reading stored as data_id {data_id}");
        self.last_dispatch = Instant::now();

        if !self.settings.cycle_pause.is_zero() {
            sleep(self.settings.cycle_pause).await;
        }
        Ok(CycleOutcome::Dispatched { data_id, reading })
    }

    /// Pause, then flush and reopen the link. A failed reopen is retried by
    /// the next cycle's read.
    async fn recover(&mut self) {
        sleep(self.settings.recovery_pause).await;
        if let Err(err) = self.link.recover().await {
            warn!("Reopening the link failed: {err}");
        }
    }

    fn enter(&mut self, state: CycleState) {
        trace!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlms::security::AesKey;
    use crate::mbus::serial_mock::MockSerialPort;
    use crate::sink::DiscardSink;

    fn decryptor() -> Decryptor {
        Decryptor::new(AesKey::from_bytes(&[0u8; 16]).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_window_triggers_recovery() {
        let port = MockSerialPort::new();
        port.queue_rx_data(&[0x10; crate::constants::WINDOW_SIZE]);
        let mut acquisition =
            AcquisitionLoop::new(port.clone(), DiscardSink::default(), decryptor(), LoopSettings::default());

        let started = Instant::now();
        let outcome = acquisition.run_cycle().await.unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::Recovered(MeterError::FrameInvalid(_))
        ));
        assert_eq!(port.recoveries(), 1);
        assert!(started.elapsed() >= RECOVERY_PAUSE);
        assert_eq!(acquisition.state(), CycleState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_is_fatal() {
        let mut acquisition = AcquisitionLoop::new(
            MockSerialPort::new(),
            DiscardSink::default(),
            decryptor(),
            LoopSettings::default(),
        );
        tokio::time::advance(LINK_HEALTH_DEADLINE + Duration::from_secs(1)).await;
        assert!(matches!(
            acquisition.run_cycle().await,
            Err(MeterError::LinkHealthTimeout(_))
        ));
    }
}
