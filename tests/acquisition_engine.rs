//! End-to-end engine scenarios against the mock instrument.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use omdaq::config::DrainMode;
use omdaq::descriptor::{
    ConfigurationDescriptor, DaqMode, ExtendedFeature, FlasherConfig, PulserConfig, PulserMode,
    SelfLcConfig, SupernovaConfig, TriggerMode,
};
use omdaq::link::mock::{MockLinkDriver, MockReply};
use omdaq::link::{ChannelAddress, WirePosition};
use omdaq::protocol::MessageType;
use omdaq::testing::{Event, EventLog, ManualWatchdog, RecordingClock, RecordingProcessor};
use omdaq::{
    AcquisitionEngine, AcquisitionError, AcquisitionState, Collaborators, DataProcessor,
    EngineSettings, ExtendedModePolicy, StreamCategory, TimeoutAction, UtcTime,
};
use tracing_test::traced_test;

struct Harness {
    log: EventLog,
    driver: MockLinkDriver,
    data: Arc<RecordingProcessor>,
    clock: Arc<RecordingClock>,
    watchdog: Arc<ManualWatchdog>,
}

fn harness(driver: MockLinkDriver, settings: EngineSettings) -> (AcquisitionEngine<MockLinkDriver>, Harness) {
    let log = EventLog::new();
    let driver = driver.with_event_log(log.clone());
    let data = Arc::new(RecordingProcessor::new(log.clone()));
    let clock = Arc::new(RecordingClock::new(log.clone()));
    let watchdog = Arc::new(ManualWatchdog::new(log.clone()));
    let collaborators = Collaborators {
        data: data.clone(),
        clock: clock.clone(),
        watchdog: watchdog.clone(),
    };
    let engine = AcquisitionEngine::new(
        ChannelAddress::new(2, 1, WirePosition::B),
        driver.clone(),
        collaborators,
        settings,
    );
    (
        engine,
        Harness {
            log,
            driver,
            data,
            clock,
            watchdog,
        },
    )
}

fn settings(mode: DrainMode) -> EngineSettings {
    EngineSettings {
        drain_mode: mode,
        ..EngineSettings::default()
    }
}

fn supernova() -> SupernovaConfig {
    SupernovaConfig {
        deadtime: 250_000,
        spe: true,
    }
}

/// Engine that has been initialized and configured, with the log cleared.
fn configured(
    mode: DrainMode,
    descriptor: &ConfigurationDescriptor,
) -> (AcquisitionEngine<MockLinkDriver>, Harness) {
    let (mut engine, h) = harness(MockLinkDriver::running(), settings(mode));
    engine.initialize(false).unwrap();
    engine
        .configure(descriptor, &ExtendedModePolicy::disabled())
        .unwrap();
    h.log.clear();
    (engine, h)
}

fn running(mode: DrainMode, descriptor: &ConfigurationDescriptor) -> (AcquisitionEngine<MockLinkDriver>, Harness) {
    let (mut engine, h) = configured(mode, descriptor);
    engine.begin_run().unwrap();
    h.log.clear();
    (engine, h)
}

// Initialization

#[test]
fn fast_path_reuses_running_application() {
    let (mut engine, h) = harness(MockLinkDriver::running(), EngineSettings::default());

    let hardware_id = engine.initialize(false).unwrap();

    assert_eq!(hardware_id, "57bcb2a3c4f1");
    assert_eq!(engine.current_state(), AcquisitionState::Initialized);
    let channel = engine.hardware_channel().unwrap();
    assert_eq!(channel.to_string(), "21B [57bcb2a3c4f1]");

    let state = h.driver.state();
    assert_eq!(state.opens, 1);
    assert_eq!(state.softboots, 0);
    assert_eq!(
        state.requests,
        vec![
            MessageType::GetDomappRelease,
            MessageType::EndRun,
            MessageType::GetDomId
        ]
    );
}

#[test]
fn bootloader_instrument_is_softbooted_into_application() {
    let (mut engine, h) = harness(MockLinkDriver::new(), EngineSettings::default());

    assert_eq!(engine.initialize(false).unwrap(), "57bcb2a3c4f1");

    let state = h.driver.state();
    assert_eq!(state.resets, 1);
    assert_eq!(state.softboots, 1);
    assert_eq!(state.opens, 2);
    assert!(state.application_running);
    drop(state);
    assert_eq!(
        h.log
            .count(|e| matches!(e, Event::SentText(line) if line.contains("gunzip"))),
        2,
        "fpga load and exec lines"
    );
}

#[test]
fn forced_softboot_retries_failed_open() {
    let driver = MockLinkDriver::running();
    driver.state().fail_opens(1);
    let (mut engine, h) = harness(driver, EngineSettings::default());

    engine.initialize(true).unwrap();

    assert_eq!(engine.current_state(), AcquisitionState::Initialized);
    assert_eq!(h.driver.state().opens, 2);
    assert_eq!(h.driver.state().softboots, 1);
    assert_eq!(h.log.count(|e| *e == Event::Sleep(Duration::from_secs(1))), 1);
}

#[test]
fn exhausted_open_attempts_leave_channel_initializing() {
    let driver = MockLinkDriver::running();
    driver.state().fail_opens(2);
    let (mut engine, h) = harness(driver, EngineSettings::default());

    let err = engine.initialize(true).unwrap_err();

    match err {
        AcquisitionError::InitializationExhausted { attempts, last_error, .. } => {
            assert_eq!(attempts, 2);
            assert!(last_error.starts_with("open"));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(engine.current_state(), AcquisitionState::Initializing);
    assert!(engine.hardware_channel().is_none());
}

#[test]
fn watchdog_policy_is_restored_after_initialization() {
    let driver = MockLinkDriver::running();
    driver.state().fail_opens(2);
    let (mut engine, h) = harness(driver, EngineSettings::default());

    assert!(engine.initialize(true).is_err());

    assert_eq!(h.watchdog.action(), TimeoutAction::Fatal);
    assert_eq!(h.watchdog.threshold(), Duration::from_secs(30));
    let events = h.log.without_pings();
    assert_eq!(events[0], Event::SetAction(TimeoutAction::InterruptOnly));
    assert_eq!(events[1], Event::SetThreshold(Duration::from_secs(60)));
    assert!(events.contains(&Event::SetAction(TimeoutAction::Fatal)));
}

#[test]
fn interrupted_backoff_is_acknowledged() {
    let driver = MockLinkDriver::running();
    driver.state().fail_softboots(1);
    let (mut engine, h) = harness(driver, EngineSettings::default());
    h.watchdog.interrupt_sleeps(&[true]);

    engine.initialize(true).unwrap();

    assert_eq!(h.driver.state().softboots, 2);
    assert_eq!(
        h.log
            .count(|e| *e == Event::HandleInterrupted("softboot".to_string())),
        1
    );
}

// Configuration

fn gated_descriptor() -> ConfigurationDescriptor {
    ConfigurationDescriptor::builder()
        .alt_trigger_mode(TriggerMode::Forced)
        .daq_mode(DaqMode::Fadc)
        .self_lc(SelfLcConfig { mode: 2, window: 50 })
        .build()
}

fn initialized() -> (AcquisitionEngine<MockLinkDriver>, Harness) {
    let (mut engine, h) = harness(MockLinkDriver::running(), EngineSettings::default());
    engine.initialize(false).unwrap();
    h.driver.state().requests.clear();
    (engine, h)
}

#[test]
fn enforced_gate_rejects_before_any_command() {
    let (mut engine, h) = initialized();

    let err = engine
        .configure(&gated_descriptor(), &ExtendedModePolicy::disabled())
        .unwrap_err();

    match err {
        AcquisitionError::ExtendedModeViolation { violations } => assert_eq!(
            violations,
            vec![
                ExtendedFeature::AltTriggerMode,
                ExtendedFeature::DaqMode,
                ExtendedFeature::SelfLc
            ]
        ),
        other => panic!("expected violation, got {other:?}"),
    }
    assert!(h.driver.state().requests.is_empty());
    assert_eq!(engine.current_state(), AcquisitionState::Initialized);
}

#[test]
#[traced_test]
fn overridden_gate_logs_each_violation_and_applies() {
    let (mut engine, h) = initialized();

    engine
        .configure(&gated_descriptor(), &ExtendedModePolicy::overridden())
        .unwrap();

    assert!(logs_contain("extended mode disabled"));
    assert!(logs_contain("alternate trigger mode"));
    assert!(logs_contain("self local coincidence"));
    let requests = h.driver.state().requests.clone();
    assert!(requests.contains(&MessageType::SetAltTriggerMode));
    assert!(requests.contains(&MessageType::SetSelfLc));
    assert_eq!(engine.current_state(), AcquisitionState::Configured);
}

#[test]
fn enabled_extended_mode_applies_gated_features() {
    let (mut engine, h) = initialized();

    let report = engine
        .configure(&gated_descriptor(), &ExtendedModePolicy::enabled())
        .unwrap();

    assert!(report.is_complete());
    let requests = h.driver.state().requests.clone();
    let tail: Vec<_> = requests.iter().rev().take(3).rev().copied().collect();
    assert_eq!(
        tail,
        vec![
            MessageType::SetAltTriggerMode,
            MessageType::SetDaqMode,
            MessageType::SetSelfLc
        ]
    );
}

#[test]
fn refused_optional_features_are_reported() {
    let (mut engine, h) = initialized();
    h.driver.state().push_reply(
        MessageType::SetFastMoniInterval,
        MockReply::status(MessageType::SetFastMoniInterval, 2),
    );
    h.driver
        .state()
        .push_reply(MessageType::SetLbmDepth, MockReply::status(MessageType::SetLbmDepth, 2));
    let descriptor = ConfigurationDescriptor::builder()
        .fast_moni_interval(5)
        .pedestal_subtraction(true)
        .lbm_depth(8)
        .build();

    let report = engine
        .configure(&descriptor, &ExtendedModePolicy::disabled())
        .unwrap();

    assert_eq!(
        report.unsupported,
        vec![MessageType::SetFastMoniInterval, MessageType::SetLbmDepth]
    );
    assert_eq!(engine.current_state(), AcquisitionState::Configured);
}

#[test]
fn refused_mandatory_setting_fails_configuration() {
    let (mut engine, h) = initialized();
    h.driver
        .state()
        .push_reply(MessageType::SetHv, MockReply::status(MessageType::SetHv, 4));
    let descriptor = ConfigurationDescriptor::builder().hv(1400).build();

    let err = engine
        .configure(&descriptor, &ExtendedModePolicy::disabled())
        .unwrap_err();

    assert!(matches!(err, AcquisitionError::Protocol(ref e) if e.status_code() == Some(4)));
    assert_eq!(engine.current_state(), AcquisitionState::Initialized);
}

#[test]
fn failed_reconfigure_blocks_run_start() {
    let descriptor = ConfigurationDescriptor::builder().supernova(supernova()).build();
    let (mut engine, h) = configured(DrainMode::Interval, &descriptor);
    h.driver
        .state()
        .push_reply(MessageType::SetHv, MockReply::status(MessageType::SetHv, 4));
    let reconfigured = ConfigurationDescriptor::builder().hv(1400).build();

    assert!(engine
        .configure(&reconfigured, &ExtendedModePolicy::disabled())
        .is_err());

    assert_eq!(engine.current_state(), AcquisitionState::Initialized);
    assert!(matches!(
        engine.begin_run(),
        Err(AcquisitionError::InvalidState { .. })
    ));
    assert!(!h.driver.state().requests.contains(&MessageType::BeginRun));

    engine
        .configure(&reconfigured, &ExtendedModePolicy::disabled())
        .unwrap();
    assert_eq!(engine.current_state(), AcquisitionState::Configured);
}

#[test]
fn rejected_gate_keeps_prior_configuration() {
    let (mut engine, _h) = configured(DrainMode::Interval, &ConfigurationDescriptor::default());

    assert!(engine
        .configure(&gated_descriptor(), &ExtendedModePolicy::disabled())
        .is_err());

    assert_eq!(engine.current_state(), AcquisitionState::Configured);
}

#[test]
fn trigger_mode_leaves_flasher_before_pulser_toggles() {
    let flasher = ConfigurationDescriptor::builder()
        .trigger_mode(TriggerMode::Flasher)
        .build();
    let (mut engine, h) = configured(DrainMode::Interval, &flasher);
    assert!(!h.driver.state().requests.contains(&MessageType::PulserOn));
    h.driver.state().requests.clear();

    let discriminator = ConfigurationDescriptor::builder()
        .trigger_mode(TriggerMode::Discriminator)
        .pulser(PulserConfig {
            mode: PulserMode::Pulser,
            rate: 5,
        })
        .build();
    engine
        .configure(&discriminator, &ExtendedModePolicy::disabled())
        .unwrap();

    let requests = h.driver.state().requests.clone();
    let trigger = requests
        .iter()
        .position(|r| *r == MessageType::SetTriggerMode)
        .unwrap();
    let pulser = requests
        .iter()
        .position(|r| *r == MessageType::PulserOn)
        .unwrap();
    let rate = requests
        .iter()
        .position(|r| *r == MessageType::SetPulserRate)
        .unwrap();
    assert!(trigger < pulser);
    assert!(pulser < rate);
}

#[test]
fn configure_requires_initialization() {
    let (mut engine, _h) = harness(MockLinkDriver::running(), EngineSettings::default());

    let err = engine
        .configure(&ConfigurationDescriptor::default(), &ExtendedModePolicy::disabled())
        .unwrap_err();
    assert!(matches!(err, AcquisitionError::InvalidState { .. }));
}

// Run transitions

#[test]
fn begin_run_resolves_origin_from_calibration() {
    let (mut engine, h) = configured(DrainMode::Polling, &ConfigurationDescriptor::default());

    let origin = engine.begin_run().unwrap();

    let sample = engine.last_calibration().unwrap().clone();
    assert_eq!(origin, UtcTime(sample.dom_rx * 250));
    assert_eq!(engine.current_state(), AcquisitionState::Running(DrainMode::Polling));
    assert_eq!(h.data.payloads(StreamCategory::Tcal).len(), 1);
    assert_eq!(h.clock.measurements()[0].hardware_id, "57bcb2a3c4f1");
    assert_eq!(
        h.data.counters().latest_clock_relationship().unwrap().dom_tick,
        sample.dom_rx
    );
}

#[test]
fn failed_calibration_keeps_channel_configured() {
    let (mut engine, h) = configured(DrainMode::Interval, &ConfigurationDescriptor::default());
    h.driver.state().fail_next_calibration();

    let err = engine.begin_run().unwrap_err();

    assert!(matches!(err, AcquisitionError::Calibration { .. }));
    assert_eq!(engine.current_state(), AcquisitionState::Configured);
    assert_eq!(engine.stats().calibration_failures, 1);
}

#[test]
fn failed_utc_resolution_keeps_channel_configured() {
    let (mut engine, h) = configured(DrainMode::Interval, &ConfigurationDescriptor::default());
    h.data.fail_utc(true);

    let err = engine.begin_run().unwrap_err();

    assert!(err.is_processor_failure());
    assert_eq!(engine.current_state(), AcquisitionState::Configured);
}

#[test]
fn end_run_signals_end_of_stream_on_every_category() {
    let (mut engine, h) = running(DrainMode::Interval, &ConfigurationDescriptor::default());

    engine.end_run().unwrap();

    assert_eq!(h.data.eos_signals(), StreamCategory::ALL.to_vec());
    assert_eq!(engine.current_state(), AcquisitionState::Configured);
}

#[test]
fn pause_run_keeps_streams_open() {
    let (mut engine, h) = running(DrainMode::Polling, &ConfigurationDescriptor::default());

    engine.pause_run().unwrap();

    assert!(h.data.eos_signals().is_empty());
    assert_eq!(engine.current_state(), AcquisitionState::Configured);
    engine.begin_run().unwrap();
}

#[test]
fn flasher_run_lifecycle() {
    let descriptor = ConfigurationDescriptor::builder()
        .trigger_mode(TriggerMode::Flasher)
        .build();
    let (mut engine, h) = configured(DrainMode::Interval, &descriptor);
    let flasher = FlasherConfig {
        brightness: 127,
        width: 20,
        delay: 0,
        mask: 0x0fff,
        rate: 610,
    };

    engine.begin_flasher_run(&flasher).unwrap();
    assert_eq!(
        engine.current_state(),
        AcquisitionState::FlasherRunning(DrainMode::Interval)
    );

    let changed = FlasherConfig {
        brightness: 64,
        ..flasher
    };
    let effective = engine.change_flasher_run(&changed).unwrap();
    assert_eq!(
        effective,
        UtcTime(engine.last_calibration().unwrap().dom_rx * 250)
    );
    engine.end_run().unwrap();

    let requests = h.driver.state().requests.clone();
    assert!(requests.ends_with(&[
        MessageType::BeginFlasherRun,
        MessageType::ChangeFlasherRun,
        MessageType::EndRun
    ]));
}

#[test]
fn flasher_change_requires_flasher_run() {
    let (mut engine, _h) = running(DrainMode::Interval, &ConfigurationDescriptor::default());
    let err = engine
        .change_flasher_run(&FlasherConfig {
            brightness: 1,
            width: 1,
            delay: 0,
            mask: 1,
            rate: 1,
        })
        .unwrap_err();
    assert!(matches!(err, AcquisitionError::InvalidState { .. }));
}

// Interval drain

fn interval_replies(h: &Harness, replies: Vec<MockReply>) {
    h.driver.state().push_replies(MessageType::GetInterval, replies);
}

#[test]
fn interval_cycle_calibrates_after_last_frame_and_before_flush() {
    let descriptor = ConfigurationDescriptor::builder().supernova(supernova()).build();
    let (mut engine, h) = running(DrainMode::Interval, &descriptor);
    interval_replies(
        &h,
        vec![
            MockReply::ok(MessageType::GetData, &b"h1"[..]),
            MockReply::ok(MessageType::GetMoni, &b"m1"[..]),
            MockReply::ok(MessageType::GetData, &b"h2"[..]),
            MockReply::ok(MessageType::GetSupernova, &b"sn"[..]),
        ],
    );

    let idle = engine.run_interval_cycle().unwrap();

    assert!(!idle);
    let events = h.log.snapshot();
    let last_delivered = events
        .iter()
        .rposition(|e| matches!(e, Event::Delivered { .. }))
        .unwrap();
    let calibration = h.log.position(|e| *e == Event::LinkCalibration).unwrap();
    let flush = h.log.position(|e| matches!(e, Event::Batch(_))).unwrap();
    assert!(last_delivered < calibration);
    assert!(calibration < flush);

    let batches = h.data.batches();
    assert_eq!(batches.len(), 1);
    let categories: Vec<_> = batches[0].iter().map(|(c, _)| *c).collect();
    assert_eq!(
        categories,
        vec![
            StreamCategory::Hit,
            StreamCategory::Moni,
            StreamCategory::Hit,
            StreamCategory::Supernova
        ]
    );
    assert_eq!(batches[0][2].1, Bytes::from_static(b"h2"));
    assert_eq!(engine.stats().hit_payloads, 2);
    assert_eq!(engine.stats().batch_high_water, 4);
    assert!(h.driver.state().is_drained());
}

#[test]
fn interval_cycle_without_supernova_ends_on_moni() {
    let (mut engine, h) = running(DrainMode::Interval, &ConfigurationDescriptor::default());
    interval_replies(
        &h,
        vec![
            MockReply::ok(MessageType::GetData, &b"h1"[..]),
            MockReply::ok(MessageType::GetMoni, &b"m1"[..]),
        ],
    );

    assert!(!engine.run_interval_cycle().unwrap());
    assert!(h.driver.state().is_drained());
    assert_eq!(h.data.batches()[0].len(), 2);
}

#[test]
fn interval_cycle_with_supernova_reads_past_moni() {
    let descriptor = ConfigurationDescriptor::builder().supernova(supernova()).build();
    let (mut engine, h) = running(DrainMode::Interval, &descriptor);
    interval_replies(
        &h,
        vec![
            MockReply::ok(MessageType::GetMoni, &b"m1"[..]),
            MockReply::ok(MessageType::GetData, &b"h1"[..]),
            MockReply::empty(MessageType::GetSupernova),
        ],
    );

    engine.run_interval_cycle().unwrap();

    let categories: Vec<_> = h.data.batches()[0].iter().map(|(c, _)| *c).collect();
    assert_eq!(categories, vec![StreamCategory::Moni, StreamCategory::Hit]);
}

#[test]
fn idle_interval_cycle_skips_flush() {
    let (mut engine, h) = running(DrainMode::Interval, &ConfigurationDescriptor::default());
    interval_replies(&h, vec![MockReply::empty(MessageType::GetMoni)]);

    assert!(engine.run_interval_cycle().unwrap());
    assert!(h.data.batches().is_empty());
    assert_eq!(h.log.count(|e| *e == Event::LinkCalibration), 1);
    assert_eq!(engine.stats().idle_cycles, 1);
}

#[test]
fn interval_cycle_rejects_unexpected_frame() {
    let (mut engine, h) = running(DrainMode::Interval, &ConfigurationDescriptor::default());
    let (facility, subtype) = MessageType::GetDomId.wire_kind();
    interval_replies(&h, vec![MockReply::wire(facility, subtype, vec![0u8; 8])]);

    let err = engine.run_interval_cycle().unwrap_err();

    match err {
        AcquisitionError::UnexpectedFrame { facility: f, subtype: s } => {
            assert_eq!((f, s), (facility, subtype))
        }
        other => panic!("expected unexpected frame, got {other:?}"),
    }
    assert!(h.data.batches().is_empty());
}

#[test]
fn interval_batch_overflow_is_an_error() {
    let (mut engine, h) = {
        let (mut engine, h) = harness(
            MockLinkDriver::running(),
            EngineSettings {
                interval_batch_capacity: 2,
                ..settings(DrainMode::Interval)
            },
        );
        engine.initialize(false).unwrap();
        engine
            .configure(&ConfigurationDescriptor::default(), &ExtendedModePolicy::disabled())
            .unwrap();
        engine.begin_run().unwrap();
        (engine, h)
    };
    interval_replies(
        &h,
        vec![
            MockReply::ok(MessageType::GetData, &b"h1"[..]),
            MockReply::ok(MessageType::GetData, &b"h2"[..]),
            MockReply::ok(MessageType::GetData, &b"h3"[..]),
            MockReply::ok(MessageType::GetMoni, &b"m1"[..]),
        ],
    );

    let err = engine.run_interval_cycle().unwrap_err();

    assert!(matches!(err, AcquisitionError::BatchOverflow { capacity: 2 }));
    assert!(h.data.batches().is_empty());
}

#[test]
fn failed_batch_flush_propagates() {
    let (mut engine, h) = running(DrainMode::Interval, &ConfigurationDescriptor::default());
    h.data.fail_batches(true);
    interval_replies(&h, vec![MockReply::ok(MessageType::GetMoni, &b"m1"[..])]);

    assert!(engine.run_interval_cycle().unwrap_err().is_processor_failure());
}

#[test]
fn calibration_failure_during_drain_is_tolerated() {
    let (mut engine, h) = running(DrainMode::Interval, &ConfigurationDescriptor::default());
    h.driver.state().fail_next_calibration();
    interval_replies(&h, vec![MockReply::ok(MessageType::GetMoni, &b"m1"[..])]);

    assert!(!engine.run_interval_cycle().unwrap());
    assert_eq!(h.data.batches().len(), 1);
    assert_eq!(engine.stats().calibration_failures, 1);
}

#[test]
fn drain_requires_matching_mode() {
    let (mut engine, _h) = running(DrainMode::Polling, &ConfigurationDescriptor::default());
    assert!(matches!(
        engine.run_interval_cycle(),
        Err(AcquisitionError::InvalidState { .. })
    ));
}

// Polling drain

#[test]
fn polling_cycle_reads_due_streams() {
    let descriptor = ConfigurationDescriptor::builder().supernova(supernova()).build();
    let (mut engine, h) = {
        let (mut engine, h) = harness(
            MockLinkDriver::running(),
            EngineSettings {
                hit_pipeline_depth: 3,
                ..settings(DrainMode::Polling)
            },
        );
        engine.initialize(false).unwrap();
        engine
            .configure(&descriptor, &ExtendedModePolicy::disabled())
            .unwrap();
        engine.begin_run().unwrap();
        h.log.clear();
        (engine, h)
    };
    {
        let mut state = h.driver.state();
        for payload in [&b"a"[..], b"", b"b"] {
            state.push_reply(
                MessageType::GetData,
                MockReply::ok(MessageType::GetData, Bytes::copy_from_slice(payload)),
            );
        }
        state.push_reply(MessageType::GetMoni, MockReply::ok(MessageType::GetMoni, &b"m"[..]));
        state.push_reply(MessageType::GetSupernova, MockReply::empty(MessageType::GetSupernova));
        state.push_reply(
            MessageType::GetSupernova,
            MockReply::ok(MessageType::GetSupernova, &b"s"[..]),
        );
    }

    assert!(!engine.run_polling_cycle(0).unwrap());

    assert_eq!(
        h.data.payloads(StreamCategory::Hit),
        vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]
    );
    assert_eq!(h.data.payloads(StreamCategory::Moni), vec![Bytes::from_static(b"m")]);
    assert_eq!(
        h.data.payloads(StreamCategory::Supernova),
        vec![Bytes::from_static(b"s")]
    );
    assert_eq!(h.log.count(|e| *e == Event::Sleep(Duration::from_millis(50))), 1);
    assert!(h.driver.state().is_drained());

    // Nothing is due one millisecond later.
    assert!(engine.run_polling_cycle(1_000_000).unwrap());
    assert_eq!(engine.stats().idle_cycles, 1);
}

#[test]
fn polling_processor_failure_propagates() {
    let (mut engine, h) = running(DrainMode::Polling, &ConfigurationDescriptor::default());
    h.data.fail_category(StreamCategory::Moni);
    h.driver
        .state()
        .push_reply(MessageType::GetMoni, MockReply::ok(MessageType::GetMoni, &b"m"[..]));

    assert!(engine.run_polling_cycle(0).unwrap_err().is_processor_failure());
}

// Close

#[test]
fn close_is_idempotent() {
    let (mut engine, h) = running(DrainMode::Interval, &ConfigurationDescriptor::default());

    engine.close();
    engine.close();
    assert_eq!(engine.current_state(), AcquisitionState::Closed);
    drop(engine);

    assert_eq!(h.driver.state().releases, 1);
    let err = AcquisitionError::InvalidState {
        operation: "begin run",
        state: AcquisitionState::Closed,
    };
    assert_eq!(err.to_string(), "Cannot begin run while closed");
}
