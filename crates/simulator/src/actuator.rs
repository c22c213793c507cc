use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use common::config::DriveSide;
use common::MotorGeometry;

use crate::DeviceKey;

/// One tick's worth of work for an actuator.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Signed displacement for this frame: chassis units for wheel motors,
    /// degrees for arms.
    Displacement(f64),
    /// Text the speaker displays for this frame.
    Text(String),
}

/// FIFO of per-tick jobs for a single actuator.
///
/// Connection handlers produce, the update loop consumes one job per tick.
/// Every operation is a single critical section, so `replace` is never seen
/// half done by the consumer.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, job: Job) {
        self.lock().push_back(job);
    }

    pub fn dequeue(&self) -> Option<Job> {
        self.lock().pop_front()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Appends `jobs` after whatever is already queued.
    pub fn extend(&self, jobs: impl IntoIterator<Item = Job>) {
        self.lock().extend(jobs);
    }

    /// Drops every pending job and queues `jobs` in their place.
    pub fn replace(&self, jobs: impl IntoIterator<Item = Job>) {
        let mut queue = self.lock();
        queue.clear();
        queue.extend(jobs);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorKind {
    /// A tacho motor; drives one side of the chassis when `side` is set.
    Motor {
        side: Option<DriveSide>,
        geometry: MotorGeometry,
    },
    Arm,
    Speaker,
}

#[derive(Debug)]
pub struct Actuator {
    pub key: DeviceKey,
    pub kind: ActuatorKind,
    pub driver: String,
    pub max_speed: Option<f64>,
    /// Overrides the world-wide coasting subtraction.
    pub coasting_subtraction: Option<f64>,
    queue: JobQueue,
}

impl Actuator {
    pub fn new(key: DeviceKey, kind: ActuatorKind, driver: String) -> Self {
        Self {
            key,
            kind,
            driver,
            max_speed: None,
            coasting_subtraction: None,
            queue: JobQueue::new(),
        }
    }

    pub fn with_limits(mut self, max_speed: Option<f64>, coasting_subtraction: Option<f64>) -> Self {
        self.max_speed = max_speed;
        self.coasting_subtraction = coasting_subtraction;
        self
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Conversion used for motor commands; `None` for the speaker.
    pub fn geometry(&self) -> Option<MotorGeometry> {
        match self.kind {
            ActuatorKind::Motor { geometry, .. } => Some(geometry),
            ActuatorKind::Arm => Some(MotorGeometry::Arm),
            ActuatorKind::Speaker => None,
        }
    }

    /// Clamps `speed` to the configured maximum, keeping its sign.
    pub fn limit_speed(&self, speed: f64) -> f64 {
        match self.max_speed {
            Some(max) if speed.abs() > max => max.copysign(speed),
            _ => speed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::BrickId;

    fn motor() -> Actuator {
        Actuator::new(
            DeviceKey::new(BrickId(0), "ev3-ports:outA"),
            ActuatorKind::Motor {
                side: Some(DriveSide::Left),
                geometry: MotorGeometry::wheel(56.0),
            },
            "lego-ev3-l-motor".into(),
        )
    }

    #[test]
    fn queue_is_fifo() {
        let queue = JobQueue::new();
        queue.enqueue(Job::Displacement(1.0));
        queue.enqueue(Job::Displacement(2.0));
        assert_eq!(queue.dequeue(), Some(Job::Displacement(1.0)));
        assert_eq!(queue.dequeue(), Some(Job::Displacement(2.0)));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn clear_empties_until_next_enqueue() {
        let queue = JobQueue::new();
        queue.replace((0..10).map(|i| Job::Displacement(i as f64)));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(), None);
        assert_eq!(queue.dequeue(), None);

        queue.enqueue(Job::Text("hi".into()));
        assert_eq!(queue.dequeue(), Some(Job::Text("hi".into())));
    }

    #[test]
    fn replace_discards_previous_jobs() {
        let queue = JobQueue::new();
        queue.replace(std::iter::repeat(Job::Displacement(1.0)).take(5));
        queue.replace(vec![Job::Displacement(-1.0)]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue(), Some(Job::Displacement(-1.0)));
    }

    #[test]
    fn concurrent_replace_is_never_partially_observed() {
        use std::sync::Arc;
        use std::thread;

        let queue = Arc::new(JobQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for round in 0..200 {
                    let value = round as f64;
                    queue.replace(std::iter::repeat(Job::Displacement(value)).take(50));
                }
            })
        };

        // Batches never stack up: a replace drops the previous batch first.
        // Values taken by the consumer only ever move forward.
        let mut last_seen = -1.0;
        for _ in 0..1_000 {
            assert!(queue.len() <= 50);
            if let Some(Job::Displacement(value)) = queue.dequeue() {
                assert!(value >= last_seen);
                last_seen = value;
            }
        }
        producer.join().unwrap();
        assert!(queue.len() <= 50);
        queue.replace(vec![Job::Displacement(199.0)]);
        assert_eq!(queue.dequeue(), Some(Job::Displacement(199.0)));
    }

    #[test]
    fn speed_limit_keeps_sign() {
        let motor = motor().with_limits(Some(100.0), None);
        assert_eq!(motor.limit_speed(250.0), 100.0);
        assert_eq!(motor.limit_speed(-250.0), -100.0);
        assert_eq!(motor.limit_speed(40.0), 40.0);
    }

    #[test]
    fn speaker_has_no_geometry() {
        let speaker = Actuator::new(
            DeviceKey::new(BrickId(0), "ev3-ports:speaker"),
            ActuatorKind::Speaker,
            "ev3-speaker".into(),
        );
        assert!(speaker.geometry().is_none());
        assert_eq!(motor().geometry(), Some(MotorGeometry::wheel(56.0)));
    }
}
