//! Table-driven modem bring-up.
//!
//! ```text
//! ┌─────────────────────────────┬────────┬──────────────────────────────┐
//! │ Stage                       │ Policy │ Probe                        │
//! ├─────────────────────────────┼────────┼──────────────────────────────┤
//! │ Probe                       │ retry  │ AT                -> OK      │
//! │ EchoOff                     │ retry  │ ATE0              -> OK      │
//! │ SimReady                    │ settle │ AT+CPIN?          -> READY   │
//! │ SignalQuality               │ settle │ AT+CSQ            -> rssi!=99│
//! │ CircuitRegistration         │ settle │ AT+CREG?          -> stat==1 │
//! │ PacketRegistration          │ settle │ AT+CGREG?         -> stat==1 │
//! │ ApnTeardown                 │ single │ AT+QIDEACT=1      -> OK      │
//! │ ApnActivation               │ single │ AT+QICSGP, QIACT  -> OK      │
//! └─────────────────────────────┴────────┴──────────────────────────────┘
//! ```
//!
//! The runner walks the rows in order and never starts a stage before the
//! previous one reported `Done`.  Earlier stages are not rolled back when
//! a later one fails.

use core::fmt;

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::at::port::ms;
use crate::at::{AtPort, EchoStatus, command};
use crate::config::ModemConfig;
use crate::error::{Cause, Error, Result};

// ---------------------------------------------------------------------------
// Stage identity
// ---------------------------------------------------------------------------

/// Bring-up stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Stage {
    Probe = 0,
    EchoOff = 1,
    SimReady = 2,
    SignalQuality = 3,
    CircuitRegistration = 4,
    PacketRegistration = 5,
    ApnTeardown = 6,
    ApnActivation = 7,
}

impl Stage {
    /// Number of stages; sizes the table and the report.
    pub const COUNT: usize = 8;

    pub const fn name(self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::EchoOff => "echo off",
            Self::SimReady => "sim",
            Self::SignalQuality => "signal",
            Self::CircuitRegistration => "creg",
            Self::PacketRegistration => "cgreg",
            Self::ApnTeardown => "apn teardown",
            Self::ApnActivation => "apn activation",
        }
    }

    /// Failure reason reported when this stage gives up.
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Probe => "modem not responding",
            Self::EchoOff => "echo off rejected",
            Self::SimReady => "sim card not ready",
            Self::SignalQuality => "no usable signal",
            Self::CircuitRegistration => "circuit domain not registered",
            Self::PacketRegistration => "packet domain not registered",
            Self::ApnTeardown => "apn deactivation failed",
            Self::ApnActivation => "apn activation failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

// ---------------------------------------------------------------------------
// Probe outcome and table rows
// ---------------------------------------------------------------------------

/// What one attempt of a stage concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Stage complete; move on.
    Done,
    /// Try again immediately.
    Retry,
    /// Sleep the settle delay, then try again.
    Settle,
    /// Give up on the whole sequence.
    Abort(Cause),
}

/// Last values parsed from the network queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStatus {
    pub rssi: Option<i32>,
    pub ber: Option<i32>,
    pub circuit: Option<i32>,
    pub packet: Option<i32>,
}

/// Signature of a stage probe.
pub type ProbeFn<A> = fn(&A, &ModemConfig, &mut NetworkStatus) -> Probe;

/// One row of the bring-up table.
pub struct StageDescriptor<A> {
    pub stage: Stage,
    /// Run once instead of up to `stage_retries` times.
    pub single_shot: bool,
    pub probe: ProbeFn<A>,
}

/// Build the bring-up table in execution order.
pub fn build_stage_table<A: AtPort>() -> [StageDescriptor<A>; Stage::COUNT] {
    [
        StageDescriptor {
            stage: Stage::Probe,
            single_shot: false,
            probe: probe_alive::<A>,
        },
        StageDescriptor {
            stage: Stage::EchoOff,
            single_shot: false,
            probe: probe_echo_off::<A>,
        },
        StageDescriptor {
            stage: Stage::SimReady,
            single_shot: false,
            probe: probe_sim::<A>,
        },
        StageDescriptor {
            stage: Stage::SignalQuality,
            single_shot: false,
            probe: probe_signal::<A>,
        },
        StageDescriptor {
            stage: Stage::CircuitRegistration,
            single_shot: false,
            probe: probe_circuit::<A>,
        },
        StageDescriptor {
            stage: Stage::PacketRegistration,
            single_shot: false,
            probe: probe_packet::<A>,
        },
        StageDescriptor {
            stage: Stage::ApnTeardown,
            single_shot: true,
            probe: probe_apn_teardown::<A>,
        },
        StageDescriptor {
            stage: Stage::ApnActivation,
            single_shot: true,
            probe: probe_apn_activation::<A>,
        },
    ]
}

// ---------------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------------

/// Parse the first two integers after `tag` on any line of `body`,
/// e.g. `+CSQ: 20,99` with tag `+CSQ:`.
pub fn parse_pair(body: &str, tag: &str) -> Option<(i32, i32)> {
    let rest = body
        .lines()
        .find_map(|line| line.trim().strip_prefix(tag))?;
    let mut fields = rest.split(',').map(str::trim);
    let first = fields.next()?.parse().ok()?;
    let second = fields.next()?.parse().ok()?;
    Some((first, second))
}

fn ack_or_retry(status: EchoStatus) -> Probe {
    if status == EchoStatus::Ok {
        Probe::Done
    } else {
        Probe::Retry
    }
}

fn probe_alive<A: AtPort>(at: &A, cfg: &ModemConfig, _: &mut NetworkStatus) -> Probe {
    ack_or_retry(at.exec(ms(cfg.probe_timeout_ms), "AT\r\n").status)
}

fn probe_echo_off<A: AtPort>(at: &A, cfg: &ModemConfig, _: &mut NetworkStatus) -> Probe {
    ack_or_retry(at.exec(ms(cfg.command_timeout_ms), "ATE0\r\n").status)
}

fn probe_sim<A: AtPort>(at: &A, cfg: &ModemConfig, _: &mut NetworkStatus) -> Probe {
    match at.exec(ms(cfg.command_timeout_ms), "AT+CPIN?\r\n").into_ok() {
        Ok(body) if body.contains("READY") => Probe::Done,
        _ => Probe::Settle,
    }
}

fn probe_signal<A: AtPort>(at: &A, cfg: &ModemConfig, net: &mut NetworkStatus) -> Probe {
    let Ok(body) = at.exec(ms(cfg.command_timeout_ms), "AT+CSQ\r\n").into_ok() else {
        return Probe::Settle;
    };
    match parse_pair(&body, "+CSQ:") {
        Some((rssi, ber)) => {
            net.rssi = Some(rssi);
            net.ber = Some(ber);
            if rssi == 99 { Probe::Settle } else { Probe::Done }
        }
        None => Probe::Settle,
    }
}

fn registration<A: AtPort>(
    at: &A,
    cfg: &ModemConfig,
    cmd: &str,
    tag: &str,
    slot: &mut Option<i32>,
) -> Probe {
    let Ok(body) = at.exec(ms(cfg.command_timeout_ms), cmd).into_ok() else {
        return Probe::Settle;
    };
    match parse_pair(&body, tag) {
        Some((_mode, stat)) => {
            *slot = Some(stat);
            if stat == 1 { Probe::Done } else { Probe::Settle }
        }
        None => Probe::Settle,
    }
}

fn probe_circuit<A: AtPort>(at: &A, cfg: &ModemConfig, net: &mut NetworkStatus) -> Probe {
    registration(at, cfg, "AT+CREG?\r\n", "+CREG:", &mut net.circuit)
}

fn probe_packet<A: AtPort>(at: &A, cfg: &ModemConfig, net: &mut NetworkStatus) -> Probe {
    registration(at, cfg, "AT+CGREG?\r\n", "+CGREG:", &mut net.packet)
}

fn probe_apn_teardown<A: AtPort>(at: &A, cfg: &ModemConfig, _: &mut NetworkStatus) -> Probe {
    match at.exec(ms(cfg.apn_timeout_ms), "AT+QIDEACT=1\r\n").status.acknowledged() {
        Ok(()) => Probe::Done,
        Err(e) => Probe::Abort(e.into()),
    }
}

fn probe_apn_activation<A: AtPort>(at: &A, cfg: &ModemConfig, _: &mut NetworkStatus) -> Probe {
    let activate = || -> Result<()> {
        let csgp = command(format_args!("AT+QICSGP=1,1,\"{}\"", cfg.apn))?;
        at.exec(ms(cfg.command_timeout_ms), &csgp)
            .status
            .acknowledged()?;
        at.exec(ms(cfg.apn_timeout_ms), "AT+QIACT=1\r\n")
            .status
            .acknowledged()
    };
    match activate() {
        Ok(()) => Probe::Done,
        Err(e) => Probe::Abort(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Attempts spent per stage and the last network readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BringUpReport {
    pub attempts: [u32; Stage::COUNT],
    pub network: NetworkStatus,
}

/// Run every stage in order.
///
/// `delay` is only used between settle-policy attempts.
pub fn run<A: AtPort, D: DelayNs>(
    at: &A,
    delay: &mut D,
    config: &ModemConfig,
) -> Result<BringUpReport> {
    let mut report = BringUpReport::default();

    for row in build_stage_table::<A>() {
        let stage = row.stage;
        let budget = if row.single_shot {
            1
        } else {
            config.stage_retries
        };
        debug!("BRINGUP: {} (up to {} attempts)", stage.name(), budget);

        let mut outcome = Err(Cause::Exhausted);
        for attempt in 1..=budget {
            report.attempts[stage as usize] = attempt;
            match (row.probe)(at, config, &mut report.network) {
                Probe::Done => {
                    outcome = Ok(());
                    break;
                }
                Probe::Abort(cause) => {
                    outcome = Err(cause);
                    break;
                }
                Probe::Retry => {
                    debug!("BRINGUP: {} attempt {}/{} failed", stage.name(), attempt, budget);
                }
                Probe::Settle => {
                    debug!("BRINGUP: {} not ready ({}/{})", stage.name(), attempt, budget);
                    if attempt < budget {
                        delay.delay_ms(config.settle_ms);
                    }
                }
            }
        }

        if let Err(cause) = outcome {
            warn!("BRINGUP: {} ({})", stage, cause);
            return Err(Error::BringUp(stage, cause));
        }
        info!(
            "BRINGUP: {} ok ({} attempt(s))",
            stage.name(),
            report.attempts[stage as usize]
        );
    }

    info!(
        "BRINGUP: network ready (rssi={:?} creg={:?} cgreg={:?})",
        report.network.rssi, report.network.circuit, report.network.packet
    );
    Ok(report)
}
