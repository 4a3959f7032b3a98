//! Integration tests for ModemSession → AtAgent → parser task → framers.
//!
//! Every test runs the real parser task over a `MockModem`, so command
//! completion, prompt detection and notification framing all happen on
//! the byte stream exactly as they would on the UART.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use cellmodem::adapters::delay::TaskDelay;
use cellmodem::at::AtAgent;
use cellmodem::bringup::Stage;
use cellmodem::channel::{ChannelState, Protocol};
use cellmodem::error::{Cause, Error, FrameError};
use cellmodem::session::ModemSession;

use crate::mock_modem::{MockModem, fast_config, field};

type Session = ModemSession<AtAgent<MockModem>, TaskDelay>;

const WAIT: Option<Duration> = Some(Duration::from_secs(1));

fn open(modem: &MockModem) -> Session {
    ModemSession::open_serial(modem.clone(), TaskDelay::new(), fast_config()).unwrap()
}

fn ready(modem: &MockModem) -> Session {
    let session = open(modem);
    session.init().unwrap();
    session
}

// ── Bring-up ──────────────────────────────────────────────────

#[test]
fn bring_up_walks_every_stage_in_order() {
    let modem = MockModem::healthy();
    let session = open(&modem);

    let report = session.init().unwrap();

    assert!(session.is_ready());
    assert_eq!(report.attempts, [1; Stage::COUNT]);
    assert_eq!(report.network.rssi, Some(24));
    assert_eq!(report.network.packet, Some(1));
    assert_eq!(
        modem.commands(),
        [
            "AT",
            "ATE0",
            "AT+CPIN?",
            "AT+CSQ",
            "AT+CREG?",
            "AT+CGREG?",
            "AT+QIDEACT=1",
            "AT+QICSGP=1,1,\"CMNET\"",
            "AT+QIACT=1",
        ]
    );
}

#[test]
fn sim_error_exhausts_its_retry_budget() {
    let modem = MockModem::healthy();
    modem.on("AT+CPIN?", "\r\n+CME ERROR: 10\r\n");
    let session = open(&modem);

    let err = session.init().unwrap_err();

    assert_eq!(err, Error::BringUp(Stage::SimReady, Cause::Exhausted));
    assert_eq!(modem.count("AT+CPIN?"), fast_config().stage_retries as usize);
    assert_eq!(modem.count("AT+CSQ"), 0, "later stages must not run");
    assert!(!session.is_ready());
}

#[test]
fn signal_sentinel_settles_until_a_reading_arrives() {
    let modem = MockModem::healthy();
    let polls = AtomicU32::new(0);
    modem.on_with("AT+CSQ", move |_| {
        if polls.fetch_add(1, Ordering::Relaxed) == 0 {
            "\r\n+CSQ: 99,99\r\n\r\nOK\r\n".to_owned()
        } else {
            "\r\n+CSQ: 18,0\r\n\r\nOK\r\n".to_owned()
        }
    });
    let session = open(&modem);

    let report = session.init().unwrap();

    assert_eq!(report.attempts[Stage::SignalQuality as usize], 2);
    assert_eq!(report.network.rssi, Some(18));
}

#[test]
fn apn_activation_failure_is_not_retried() {
    let modem = MockModem::healthy();
    modem.on("AT+QIACT=1", "\r\nERROR\r\n");
    let session = open(&modem);

    let err = session.init().unwrap_err();

    assert_eq!(err, Error::BringUp(Stage::ApnActivation, Cause::Rejected));
    assert_eq!(modem.count("AT+QIACT=1"), 1);
}

#[test]
fn init_on_a_ready_session_does_not_touch_the_modem() {
    let modem = MockModem::healthy();
    let session = ready(&modem);
    let before = modem.commands().len();

    session.init().unwrap();

    assert_eq!(modem.commands().len(), before);
}

#[test]
fn operations_before_init_fail_not_ready() {
    let modem = MockModem::healthy();
    let session = open(&modem);

    assert_eq!(
        session.connect("example.com", 80, Protocol::Tcp, None),
        Err(Error::NotReady)
    );
    assert_eq!(session.resolve("example.com"), Err(Error::NotReady));
    assert!(modem.commands().is_empty());
}

// ── Channel lifecycle ─────────────────────────────────────────

#[test]
fn connect_opens_the_lowest_free_channel() {
    let modem = MockModem::healthy();
    let session = ready(&modem);

    let a = session.connect("example.com", 80, Protocol::Tcp, None).unwrap();
    let b = session.connect("10.0.0.1", 53, Protocol::Udp, None).unwrap();

    assert_eq!((a, b), (0, 1));
    assert!(session.channels().is_live(a));
    assert!(
        modem
            .commands()
            .contains(&"AT+QIOPEN=1,1,\"UDP\",\"10.0.0.1\",53,0,1".to_owned())
    );
}

#[test]
fn stale_modem_session_is_closed_before_open() {
    let modem = MockModem::healthy();
    modem.on_with("AT+QISTATE=", |cmd| {
        format!(
            "\r\n+QISTATE: {},\"TCP\",\"1.2.3.4\",80,0,2,1,0,0,\"uart1\"\r\n\r\nOK\r\n",
            field(cmd, 1)
        )
    });
    let session = ready(&modem);

    let id = session.connect("example.com", 80, Protocol::Tcp, None).unwrap();

    let cmds = modem.commands();
    let close = cmds.iter().position(|c| c == &format!("AT+QICLOSE={id}"));
    let open = cmds.iter().position(|c| c.starts_with("AT+QIOPEN="));
    assert!(close.is_some() && close < open, "stale close must precede open: {cmds:?}");
}

#[test]
fn rejected_open_releases_the_channel() {
    let modem = MockModem::healthy();
    modem.on("AT+QIOPEN=", "\r\nERROR\r\n");
    let session = ready(&modem);

    let err = session.connect("example.com", 80, Protocol::Tcp, None);

    assert_eq!(err, Err(Error::Rejected));
    assert!(session.channels().allocated_ids().is_empty());
}

#[test]
fn open_error_code_times_out_and_releases() {
    let modem = MockModem::healthy();
    modem.on_with("AT+QIOPEN=", |cmd| {
        format!("\r\nOK\r\n\r\n+QIOPEN: {},565\r\n", field(cmd, 1))
    });
    let session = ready(&modem);

    let err = session.connect("example.com", 80, Protocol::Tcp, None);

    assert_eq!(err, Err(Error::Timeout));
    assert_eq!(session.channels().state(0), ChannelState::Unallocated);
}

#[test]
fn close_escapes_data_mode_and_frees() {
    let modem = MockModem::healthy();
    let session = ready(&modem);
    let id = session.connect("example.com", 80, Protocol::Tcp, None).unwrap();

    session.close(id);

    let cmds = modem.commands();
    let tail = &cmds[cmds.len() - 2..];
    assert_eq!(tail, ["+++".to_owned(), format!("AT+QICLOSE={id}")]);
    assert_eq!(session.channels().state(id), ChannelState::Unallocated);
    let mut buf = [0u8; 4];
    assert_eq!(session.receive(id, &mut buf, WAIT), Err(Error::InvalidChannel));
}

#[test]
fn shutdown_closes_everything_and_drops_readiness() {
    let modem = MockModem::healthy();
    let session = ready(&modem);
    for _ in 0..3 {
        session.connect("example.com", 80, Protocol::Tcp, None).unwrap();
    }

    session.shutdown();

    assert!(session.channels().allocated_ids().is_empty());
    assert_eq!(modem.count("AT+QICLOSE="), 3);
    assert!(!session.is_ready());
}

// ── Data plane ────────────────────────────────────────────────

#[test]
fn send_waits_for_prompt_then_completion() {
    let modem = MockModem::healthy();
    let session = ready(&modem);
    let id = session.connect("example.com", 80, Protocol::Tcp, None).unwrap();

    assert_eq!(session.send(id, b"ping"), Ok(4));

    assert!(modem.commands().contains(&format!("AT+QISEND={id},4")));
    assert_eq!(modem.payloads(), [b"ping".to_vec()]);
}

#[test]
fn refused_send_is_rejected() {
    let modem = MockModem::healthy();
    modem.on("AT+QISEND=", "\r\nERROR\r\n");
    let session = ready(&modem);
    let id = session.connect("example.com", 80, Protocol::Tcp, None).unwrap();

    assert_eq!(session.send(id, b"ping"), Err(Error::Rejected));
    assert!(modem.payloads().is_empty());
}

#[test]
fn send_after_close_is_not_live() {
    let modem = MockModem::healthy();
    let session = ready(&modem);
    let id = session.connect("example.com", 80, Protocol::Tcp, None).unwrap();
    session.close(id);

    assert_eq!(session.send(id, b"ping"), Err(Error::NotLive));
    assert_eq!(modem.count("AT+QISEND="), 0);
}

#[test]
fn incoming_payload_lands_in_its_channel() {
    let modem = MockModem::healthy();
    let session = ready(&modem);
    let a = session.connect("example.com", 80, Protocol::Tcp, None).unwrap();
    let b = session.connect("example.org", 80, Protocol::Tcp, None).unwrap();

    modem.inject(b"\r\n+QIURC: \"recv\",1,3\r\nbbb");
    modem.inject(b"\r\n+QIURC: \"recv\",0,2\r\naa");

    let mut buf = [0u8; 16];
    let n = session.receive(a, &mut buf, WAIT).unwrap();
    assert_eq!(&buf[..n], b"aa");
    let n = session.receive(b, &mut buf, WAIT).unwrap();
    assert_eq!(&buf[..n], b"bbb");
}

#[test]
fn payload_bytes_are_never_parsed_as_lines() {
    let modem = MockModem::healthy();
    let session = ready(&modem);
    let id = session.connect("example.com", 80, Protocol::Tcp, None).unwrap();

    // Status lines and a notification prefix inside a binary payload that
    // spans several staging chunks.
    let mut payload = b"\r\nOK\r\n+QIURC: \"recv\",0,9\r\nERROR\r\n".to_vec();
    payload.extend((0..=255u8).cycle().take(300));
    let mut frame = format!("\r\n+QIURC: \"recv\",{},{}\r\n", id, payload.len()).into_bytes();
    frame.extend(&payload);
    modem.inject(&frame);

    let mut got: Vec<u8> = Vec::new();
    let mut buf = [0u8; 128];
    while got.len() < payload.len() {
        let n = session.receive(id, &mut buf, WAIT).unwrap();
        got.extend(&buf[..n]);
    }
    assert_eq!(got, payload);
    assert_eq!(session.send(id, b"after"), Ok(5), "stream must stay in sync");
}

#[test]
fn payload_for_an_unknown_channel_is_dropped() {
    let modem = MockModem::healthy();
    let session = ready(&modem);
    let id = session.connect("example.com", 80, Protocol::Tcp, None).unwrap();

    modem.inject(b"\r\n+QIURC: \"recv\",4,3\r\nxy\n");
    thread::sleep(Duration::from_millis(100));

    assert_eq!(session.channels().buffered(id), 0);
    assert_eq!(
        session.desync(),
        (Some(Error::Desync(FrameError::Rejected)), 1)
    );
    assert_eq!(session.send(id, b"ok"), Ok(2));
}

#[test]
fn receive_times_out_when_nothing_arrives() {
    let modem = MockModem::healthy();
    let session = ready(&modem);
    let id = session.connect("example.com", 80, Protocol::Tcp, None).unwrap();

    let mut buf = [0u8; 8];
    let err = session.receive(id, &mut buf, Some(Duration::from_millis(50)));

    assert_eq!(err, Err(Error::Timeout));
}

#[test]
fn receive_wakes_when_data_arrives_later() {
    let modem = MockModem::healthy();
    let session = ready(&modem);
    let id = session.connect("example.com", 80, Protocol::Tcp, None).unwrap();

    let late = modem.clone();
    let feeder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        late.inject(b"\r\n+QIURC: \"recv\",0,4\r\nlate");
    });

    let mut buf = [0u8; 8];
    let n = session.receive(id, &mut buf, WAIT).unwrap();
    feeder.join().unwrap();
    assert_eq!(&buf[..n], b"late");
}

// ── Resolver ──────────────────────────────────────────────────

#[test]
fn resolve_returns_the_notified_address() {
    let modem = MockModem::healthy();
    let session = ready(&modem);

    let addr = session.resolve("example.com").unwrap();

    assert_eq!(addr.to_string(), "93.184.216.34");
    assert!(
        modem
            .commands()
            .contains(&"AT+QIDNSGIP=1,\"example.com\"".to_owned())
    );
}

#[test]
fn resolve_error_header_keeps_caller_blocked_until_an_address() {
    let modem = MockModem::healthy();
    modem.on("AT+QIDNSGIP=", "\r\nOK\r\n\r\n+QIURC: \"dnsgip\",565\r\n");
    let session = ready(&modem);

    let late = modem.clone();
    let feeder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        late.inject(b"\r\n+QIURC: \"dnsgip\",\"10.0.0.7\"\r\n");
    });

    let addr = session.resolve("blocked.example").unwrap();
    feeder.join().unwrap();
    assert_eq!(addr.to_string(), "10.0.0.7");
}

#[test]
fn single_line_result_resolves() {
    let modem = MockModem::healthy();
    modem.on(
        "AT+QIDNSGIP=",
        "\r\nOK\r\n\r\n+QIURC: \"dnsgip\",0,1,\"93.184.216.34\"\r\n",
    );
    let session = ready(&modem);

    assert_eq!(
        session.resolve("example.com").map(|a| a.0),
        Ok([93, 184, 216, 34])
    );
}

#[test]
fn late_address_after_timeout_is_not_handed_to_the_next_lookup() {
    let modem = MockModem::healthy();
    modem.on("AT+QIDNSGIP=", "\r\nOK\r\n");
    let session = ready(&modem);

    assert_eq!(session.resolve("slow.example"), Err(Error::Timeout));

    modem.inject(b"\r\n+QIURC: \"dnsgip\",\"10.9.9.9\"\r\n");
    thread::sleep(Duration::from_millis(100));
    modem.on(
        "AT+QIDNSGIP=",
        "\r\nOK\r\n\r\n+QIURC: \"dnsgip\",\"93.184.216.34\"\r\n",
    );

    assert_eq!(
        session.resolve("example.com").map(|a| a.0),
        Ok([93, 184, 216, 34])
    );
}

#[test]
fn rejected_dns_request_fails_fast() {
    let modem = MockModem::healthy();
    modem.on("AT+QIDNSGIP=", "\r\n+CME ERROR: 565\r\n");
    let session = ready(&modem);

    assert_eq!(session.resolve("example.com"), Err(Error::Rejected));
}
