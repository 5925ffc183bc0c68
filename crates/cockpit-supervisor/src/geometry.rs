use crate::supervisor::SupervisorEvent;
use cockpit_core::Debouncer;
use std::sync::mpsc::Sender;
use std::time::Duration;

/// Turns container drag/resize notifications into geometry sync requests.
/// Every move syncs immediately; a release also arms one final sync after
/// `settle`, coalescing rapid releases.
pub struct GeometrySync {
    events: Sender<SupervisorEvent>,
    final_sync: Debouncer,
}

impl GeometrySync {
    pub fn new(events: Sender<SupervisorEvent>, settle: Duration) -> std::io::Result<Self> {
        let final_events = events.clone();
        let final_sync = Debouncer::start("geometry-sync", settle, move || {
            let _ = final_events.send(SupervisorEvent::GeometrySync { final_sync: true });
        })?;
        Ok(Self { events, final_sync })
    }

    pub fn drag_moved(&self) {
        let _ = self.events.send(SupervisorEvent::GeometrySync { final_sync: false });
    }

    pub fn drag_released(&self) {
        self.drag_moved();
        self.final_sync.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn release_schedules_a_single_final_sync() {
        let (tx, rx) = mpsc::channel();
        let sync = GeometrySync::new(tx, Duration::from_millis(40)).expect("geometry sync");
        sync.drag_moved();
        sync.drag_released();
        sync.drag_released();

        let mut moves = 0;
        let mut finals = 0;
        while let Ok(event) = rx.recv_timeout(Duration::from_millis(300)) {
            match event {
                SupervisorEvent::GeometrySync { final_sync: true } => finals += 1,
                SupervisorEvent::GeometrySync { final_sync: false } => moves += 1,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(moves, 3);
        assert_eq!(finals, 1);
    }
}
