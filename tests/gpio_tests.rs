use std::sync::Arc;
use std::time::Duration;

use pinwatch::{
    DriveMode, GpioConfig, GpioCore, GpioError, MockGpioBackend, PinCallback, PinEvent, PinState,
    TransitionFilter,
};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

fn sample_config() -> GpioConfig {
    GpioConfig::from_json(
        r#"
        {
            "driver": "mock",
            "numbering_scheme": "logical",
            "pins": {
                "output_pins": [17, 27],
                "input_pins": [4, 22]
            },
            "poll_interval_ms": 1,
            "broadcast_capacity": 16,
            "event_history_capacity": 2
        }
        "#,
    )
    .expect("valid sample config")
}

fn mock_core() -> (Arc<GpioCore>, Arc<MockGpioBackend>) {
    let core = Arc::new(GpioCore::new(Arc::new(sample_config())));
    let mock = Arc::new(MockGpioBackend::default());
    core.init_with_backend(mock.clone()).expect("mock driver");
    (core, mock)
}

fn channel_callback() -> (PinCallback, mpsc::UnboundedReceiver<PinEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: PinCallback = Arc::new(move |event: &PinEvent| {
        let _ = tx.send(event.clone());
    });
    (callback, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<PinEvent>) -> PinEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("event in time")
        .expect("callback alive")
}

#[tokio::test]
async fn output_pin_reports_external_toggles() {
    let (core, mock) = mock_core();
    let (callback, mut rx) = channel_callback();

    let handle = core
        .watch(17, DriveMode::Output, TransitionFilter::Any, callback)
        .await
        .expect("watch accepted")
        .expect("hardware available");

    // baseline forces the relay off, i.e. the line high
    assert_eq!(mock.value(17), Some(true));

    mock.drive_external(17, false);
    let event = next_event(&mut rx).await;
    assert_eq!(event.pin, 17);
    assert_eq!(event.current.state, PinState::On);
    assert_eq!(event.previous.state, PinState::Off);
    assert_eq!(event.current.mode, DriveMode::Output);

    mock.drive_external(17, true);
    let event = next_event(&mut rx).await;
    assert_eq!(event.current.state, PinState::Off);
    assert_eq!(event.previous.state, PinState::On);

    core.unwatch(handle).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn invalid_pin_is_rejected_without_polling() {
    let (core, mock) = mock_core();
    let (callback, mut rx) = channel_callback();

    let err = core
        .watch(99, DriveMode::Input, TransitionFilter::Any, callback)
        .await
        .unwrap_err();

    assert!(matches!(err, GpioError::InvalidPin(99)));
    assert!(!core.is_watching(99));
    assert!(core.watched_pins().is_empty());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(mock.reads(99), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn header_pin_outside_the_config_is_invalid() {
    let (core, _mock) = mock_core();
    let (callback, _rx) = channel_callback();

    let err = core
        .watch(5, DriveMode::Input, TransitionFilter::Any, callback)
        .await
        .unwrap_err();
    assert!(matches!(err, GpioError::InvalidPin(5)));
}

#[tokio::test]
async fn alternate_modes_cannot_be_watched() {
    let (core, _mock) = mock_core();
    let (callback, _rx) = channel_callback();

    let err = core
        .watch(4, DriveMode::Alt2, TransitionFilter::Any, callback)
        .await
        .unwrap_err();
    assert!(matches!(err, GpioError::UnsupportedDriveMode(DriveMode::Alt2)));
    assert!(!core.is_watching(4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_watches_on_one_pin_admit_one() {
    let (core, _mock) = mock_core();

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let core = core.clone();
            tokio::spawn(async move {
                let (callback, _rx) = channel_callback();
                core.watch(4, DriveMode::Input, TransitionFilter::Any, callback)
                    .await
            })
        })
        .collect();

    let mut accepted = Vec::new();
    let mut rejected = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(Some(handle)) => accepted.push(handle),
            Err(GpioError::AlreadyWatching(4)) => rejected += 1,
            other => panic!("unexpected watch outcome: {other:?}"),
        }
    }

    assert_eq!(accepted.len(), 1);
    assert_eq!(rejected, 7);
    core.unwatch(accepted[0]).await;
}

#[tokio::test]
async fn pin_can_be_watched_again_after_unwatch() {
    let (core, mock) = mock_core();
    let (callback, _rx) = channel_callback();

    let first = core
        .watch(4, DriveMode::Input, TransitionFilter::Any, callback.clone())
        .await
        .unwrap()
        .unwrap();
    core.unwatch(first).await;
    assert!(!core.is_watching(4));

    let second = core
        .watch(4, DriveMode::Input, TransitionFilter::OnOnly, callback)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(first, second);

    // the stale handle must not stop the new generator
    core.unwatch(first).await;
    assert!(core.is_watching(4));

    let reads = mock.reads(4);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(mock.reads(4) > reads);

    core.unwatch(second).await;
}

#[tokio::test]
async fn steady_input_produces_no_events() {
    let (core, mock) = mock_core();
    let (callback, mut rx) = channel_callback();
    mock.drive_external(22, false);

    let handle = core
        .watch(22, DriveMode::Input, TransitionFilter::Any, callback)
        .await
        .unwrap()
        .unwrap();

    // input baseline is read, not forced
    assert_eq!(mock.value(22), Some(false));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(mock.reads(22) > 5);
    assert!(rx.try_recv().is_err());

    core.unwatch(handle).await;
}

#[tokio::test]
async fn first_event_waits_a_full_poll_interval() {
    let mut config = sample_config();
    config.poll_interval_ms = 200;
    let core = GpioCore::new(Arc::new(config));
    let mock = Arc::new(MockGpioBackend::default());
    core.init_with_backend(mock.clone()).unwrap();
    let (callback, mut rx) = channel_callback();

    let handle = core
        .watch(4, DriveMode::Input, TransitionFilter::Any, callback)
        .await
        .unwrap()
        .unwrap();
    mock.drive_external(4, false);

    let early = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(early.is_err());

    let event = next_event(&mut rx).await;
    assert_eq!(event.current.state, PinState::On);

    core.unwatch(handle).await;
}

#[tokio::test]
async fn no_callbacks_after_unwatch_returns() {
    let (core, mock) = mock_core();
    let (callback, mut rx) = channel_callback();

    let handle = core
        .watch(4, DriveMode::Input, TransitionFilter::Any, callback)
        .await
        .unwrap()
        .unwrap();
    mock.drive_external(4, false);
    next_event(&mut rx).await;

    core.unwatch(handle).await;
    let reads = mock.reads(4);
    mock.drive_external(4, true);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(rx.try_recv().is_err());
    assert_eq!(mock.reads(4), reads);
}

#[tokio::test]
async fn hardware_gate_turns_operations_into_no_ops() {
    let core = GpioCore::new(Arc::new(sample_config()));
    let (callback, _rx) = channel_callback();

    assert!(!core.is_allowed_to_execute());
    let outcome = core
        .watch(17, DriveMode::Output, TransitionFilter::Any, callback.clone())
        .await
        .unwrap();
    assert!(outcome.is_none());
    assert!(!core.set_pin_state(17, PinState::On));
    assert!(!core.toggle_pin(17));
    assert!(core.pin_status(17).is_none());
    assert!(core.watch_configured_pins(callback).await.is_empty());
    core.shutdown().await;
}

#[tokio::test]
async fn init_twice_keeps_the_driver() {
    let core = GpioCore::new(Arc::new(sample_config()));
    let mock = Arc::new(MockGpioBackend::default());

    let first = core.init_with_backend(mock.clone()).unwrap();
    let second = core.init_with_backend(mock.clone()).unwrap();
    let third = core.init().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(mock.init_count(), 1);
}

#[tokio::test]
async fn writes_toggles_and_timed_writes() {
    let (core, mock) = mock_core();

    assert!(core.set_pin_state(27, PinState::On));
    assert_eq!(mock.value(27), Some(false));
    assert_eq!(mock.mode(27), Some(DriveMode::Output));

    assert!(core.toggle_pin(27));
    assert_eq!(mock.value(27), Some(true));

    let status = core.pin_status(27).unwrap();
    assert_eq!(status.state, PinState::Off);
    assert_eq!(status.physical, Some(13));

    assert!(core.set_pin_state_for(27, PinState::On, Duration::from_millis(20)));
    assert_eq!(mock.value(27), Some(false));
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while mock.value(27) != Some(true) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("relay returned to off");
}

#[tokio::test]
async fn input_pins_cannot_be_written() {
    let (core, _mock) = mock_core();
    let (callback, _rx) = channel_callback();

    let handle = core
        .watch(4, DriveMode::Input, TransitionFilter::Any, callback)
        .await
        .unwrap()
        .unwrap();

    assert!(!core.set_pin_state(4, PinState::On));
    assert!(!core.toggle_pin(4));

    core.unwatch(handle).await;
}

#[tokio::test]
async fn write_failures_keep_the_generator_alive() {
    let (core, mock) = mock_core();
    let (callback, mut rx) = channel_callback();

    let handle = core
        .watch(17, DriveMode::Output, TransitionFilter::OnOnly, callback)
        .await
        .unwrap()
        .unwrap();

    mock.fail_writes(true);
    assert!(!core.set_pin_state(17, PinState::On));
    mock.fail_writes(false);
    assert!(core.is_watching(17));

    assert!(core.set_pin_state(17, PinState::On));
    let event = next_event(&mut rx).await;
    assert_eq!(event.current.state, PinState::On);

    core.unwatch(handle).await;
}

#[tokio::test]
async fn events_are_recorded_and_broadcast() {
    let (core, mock) = mock_core();
    let (callback, mut rx) = channel_callback();
    let mut stream = core.event_stream();
    let mut subscriber = core.subscribe_events();

    let handle = core
        .watch(4, DriveMode::Input, TransitionFilter::Any, callback)
        .await
        .unwrap()
        .unwrap();

    for level in [false, true, false] {
        mock.drive_external(4, level);
        let event = next_event(&mut rx).await;
        assert_eq!(event.current.digital, level);
    }
    core.unwatch(handle).await;

    let history = core.get_events(4, None).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].current.digital);
    assert!(!history[1].current.digital);
    assert_eq!(core.get_events(4, Some(1)).unwrap().len(), 1);
    assert_eq!(
        core.get_last_event(4).unwrap().unwrap().current.state,
        PinState::On
    );
    assert!(core.get_last_event(22).unwrap().is_none());
    assert!(matches!(
        core.get_events(99, None),
        Err(GpioError::InvalidPin(99))
    ));

    let first = tokio::time::timeout(EVENT_TIMEOUT, stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.pin, 4);
    assert_eq!(first.current.state, PinState::On);
    assert_eq!(subscriber.recv().await.unwrap().pin, 4);
}

#[tokio::test]
async fn configured_pins_are_watched_and_shutdown_releases_relays() {
    let (core, mock) = mock_core();
    let (callback, mut rx) = channel_callback();

    let handles = core.watch_configured_pins(callback).await;
    assert_eq!(handles.len(), 4);
    assert_eq!(core.watched_pins(), vec![4, 17, 22, 27]);
    assert_eq!(mock.mode(22), Some(DriveMode::Input));
    assert_eq!(mock.mode(27), Some(DriveMode::Output));

    assert!(core.set_pin_state(27, PinState::On));
    let event = next_event(&mut rx).await;
    assert_eq!(event.pin, 27);

    core.shutdown().await;

    assert!(core.watched_pins().is_empty());
    assert_eq!(mock.value(27), Some(true));
    assert!(!core.is_allowed_to_execute());
    assert!(!core.set_pin_state(27, PinState::On));
}

#[test]
fn timed_write_needs_a_runtime() {
    let core = GpioCore::new(Arc::new(sample_config()));
    let mock = Arc::new(MockGpioBackend::default());
    core.init_with_backend(mock.clone()).unwrap();

    assert!(!core.set_pin_state_for(17, PinState::On, Duration::from_millis(5)));
    assert!(mock.writes(17).is_empty());
    assert_ne!(mock.value(17), Some(false));
}

#[tokio::test]
async fn listeners_receive_their_own_transitions() {
    let (core, mock) = mock_core();
    let (callback, mut rx) = channel_callback();
    let (on_callback, mut on_rx) = channel_callback();
    let (off_callback, mut off_rx) = channel_callback();

    let gated = GpioCore::new(Arc::new(sample_config()));
    assert!(!gated
        .add_listener(4, TransitionFilter::OnOnly, on_callback.clone())
        .unwrap());
    assert!(matches!(
        core.add_listener(4, TransitionFilter::OnOnly, on_callback.clone()),
        Err(GpioError::NotWatching(4))
    ));

    let handle = core
        .watch(4, DriveMode::Input, TransitionFilter::Any, callback)
        .await
        .unwrap()
        .unwrap();
    assert!(core
        .add_listener(4, TransitionFilter::OnOnly, on_callback.clone())
        .unwrap());
    assert!(core
        .add_listener(4, TransitionFilter::OffOnly, off_callback)
        .unwrap());
    assert!(matches!(
        core.add_listener(4, TransitionFilter::OnOnly, on_callback),
        Err(GpioError::DuplicateListener {
            pin: 4,
            filter: TransitionFilter::OnOnly
        })
    ));

    for level in [false, true, false] {
        mock.drive_external(4, level);
        next_event(&mut rx).await;
    }

    let on: Vec<PinEvent> = [next_event(&mut on_rx).await, next_event(&mut on_rx).await].into();
    assert!(on.iter().all(|e| e.current.state == PinState::On));
    assert!(on.iter().all(|e| e.filter == TransitionFilter::OnOnly));
    let off = next_event(&mut off_rx).await;
    assert_eq!(off.current.state, PinState::Off);
    assert_eq!(off.filter, TransitionFilter::OffOnly);

    assert!(core.remove_listener(4, TransitionFilter::OffOnly));
    assert!(!core.remove_listener(4, TransitionFilter::OffOnly));
    mock.drive_external(4, true);
    next_event(&mut rx).await;

    core.unwatch(handle).await;
    assert!(on_rx.try_recv().is_err());
    assert!(off_rx.try_recv().is_err());
}


#[tokio::test]
async fn core_can_be_initialized_again_after_shutdown() {
    let (core, mock) = mock_core();
    core.shutdown().await;
    assert!(!core.is_allowed_to_execute());

    core.init_with_backend(mock.clone()).unwrap();

    assert!(core.is_allowed_to_execute());
    assert!(core.set_pin_state(17, PinState::On));
    assert_eq!(mock.value(17), Some(false));
}
