// Live dashboard: one producer thread per sensor, newest value wins

pub mod display;
pub mod sensor;

use crate::cli::LiveArgs;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::types::CancelToken;
use crate::video::FrameSize;
use anyhow::Result;
use crossbeam::queue::ArrayQueue;
use display::Dashboard;
use sensor::{CameraSensor, CounterSensor, Sensor};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const SENSOR_DELAYS: [Duration; 3] = [
    Duration::from_millis(10),
    Duration::from_millis(100),
    Duration::from_secs(1),
];

/// Pause after a sensor had nothing to give.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Single-slot buffer holding only the most recent value.
pub struct LatestSlot<T>(Arc<ArrayQueue<T>>);

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self(Arc::new(ArrayQueue::new(1)))
    }

    /// Stores `value`, discarding whatever was still unread.
    pub fn replace(&self, value: T) {
        self.0.force_push(value);
    }

    pub fn take(&self) -> Option<T> {
        self.0.pop()
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for LatestSlot<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

pub fn spawn_producer<S>(
    name: &str,
    mut sensor: S,
    slot: LatestSlot<S::Output>,
    cancel: CancelToken,
) -> std::io::Result<JoinHandle<()>>
where
    S: Sensor + 'static,
    S::Output: 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new().name(name.to_string()).spawn(move || {
        while !cancel.is_cancelled() {
            match sensor.get() {
                Ok(Some(value)) => slot.replace(value),
                Ok(None) => thread::sleep(IDLE_BACKOFF),
                Err(e) => {
                    tracing::warn!("{}: read failed: {:#}", thread_name, e);
                    thread::sleep(IDLE_BACKOFF);
                }
            }
        }
        sensor.release();
        tracing::debug!("{} stopped", thread_name);
    })
}

fn validate_frequency(frequency: f64) -> PipelineResult<f64> {
    if frequency.is_finite() && frequency > 0.0 {
        Ok(frequency)
    } else {
        Err(PipelineError::InvalidConfiguration(format!(
            "display frequency must be a positive number of Hz, got {}",
            frequency
        )))
    }
}

pub fn run_live(args: &LiveArgs) -> Result<()> {
    let resolution: FrameSize = args.resolution.parse()?;
    let frequency = validate_frequency(args.frequency)?;
    let camera = CameraSensor::open(args.camera, resolution)?;

    let cancel = CancelToken::new();
    let camera_slot = LatestSlot::new();
    let sensor_slots: Vec<LatestSlot<u64>> =
        SENSOR_DELAYS.iter().map(|_| LatestSlot::new()).collect();

    let mut handles = vec![spawn_producer(
        "camera",
        camera,
        camera_slot.clone(),
        cancel.clone(),
    )?];
    for (i, (delay, slot)) in SENSOR_DELAYS.iter().zip(&sensor_slots).enumerate() {
        let spawned = spawn_producer(
            &format!("sensor-{}", i + 1),
            CounterSensor::new(*delay),
            slot.clone(),
            cancel.clone(),
        );
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                cancel.cancel();
                join_all(handles);
                return Err(e.into());
            }
        }
    }
    tracing::info!(
        "Live display started: camera {} at {}, refresh {} Hz",
        args.camera,
        resolution,
        frequency
    );

    let result = Dashboard::open(sensor_slots.len(), frequency)
        .and_then(|mut dashboard| dashboard.run(&camera_slot, &sensor_slots, &cancel));

    cancel.cancel();
    join_all(handles);
    tracing::info!("Live display stopped");
    result
}

fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("A producer thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_latest_slot_keeps_newest_value() {
        let slot = LatestSlot::new();
        assert_eq!(slot.take(), None);

        slot.replace(1);
        slot.replace(2);
        slot.replace(3);
        assert_eq!(slot.take(), Some(3));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_latest_slot_clones_share_storage() {
        let slot = LatestSlot::new();
        let producer_side = slot.clone();
        producer_side.replace("frame");
        assert_eq!(slot.take(), Some("frame"));
    }

    #[test]
    fn test_producer_stops_on_cancel() {
        let slot = LatestSlot::new();
        let cancel = CancelToken::new();
        let handle = spawn_producer(
            "sensor-test",
            CounterSensor::new(Duration::from_millis(1)),
            slot.clone(),
            cancel.clone(),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let first = loop {
            if let Some(value) = slot.take() {
                break value;
            }
            assert!(Instant::now() < deadline, "producer never published");
            thread::sleep(Duration::from_millis(1));
        };
        assert!(first >= 1);

        cancel.cancel();
        handle.join().unwrap();
    }

    /// A camera that has gone away: every read comes back empty.
    struct Unplugged(Arc<AtomicUsize>);

    impl Sensor for Unplugged {
        type Output = u64;

        fn get(&mut self) -> Result<Option<u64>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[test]
    fn test_producer_backs_off_on_empty_reads() {
        let polls = Arc::new(AtomicUsize::new(0));
        let slot = LatestSlot::new();
        let cancel = CancelToken::new();
        let handle = spawn_producer(
            "camera-test",
            Unplugged(polls.clone()),
            slot.clone(),
            cancel.clone(),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        cancel.cancel();
        handle.join().unwrap();

        // Roughly one poll per back-off period, not a busy loop.
        assert!(polls.load(Ordering::SeqCst) <= 20);
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_frequency_must_be_positive() {
        assert_eq!(validate_frequency(30.0).unwrap(), 30.0);
        assert!(matches!(
            validate_frequency(0.0),
            Err(PipelineError::InvalidConfiguration(_))
        ));
        assert!(validate_frequency(-5.0).is_err());
        assert!(validate_frequency(f64::NAN).is_err());
        assert!(validate_frequency(f64::INFINITY).is_err());
    }
}
