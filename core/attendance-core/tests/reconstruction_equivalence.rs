//! The offline reconstructor must land on the live engine's numbers for any
//! log the engine produced.

use attendance_core::{
    reconstruct_day, reconstruct_logged_day, AttendanceConfig, BatchFilter, EventFilter,
    EventStore, InMemoryRoster, MemoryEventStore, PresenceEngine, Sighting,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use classeye_daemon_protocol::Student;

const IDS: [&str; 4] = ["S1", "S2", "S3", "S4"];

fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .expect("time")
}

fn engine(config: AttendanceConfig) -> PresenceEngine<InMemoryRoster> {
    let roster = InMemoryRoster::new(vec![
        Student::new("S1", "Asha", "B1"),
        Student::new("S2", "Bea", "B1, B2"),
        Student::new("S3", "Cy", "B2"),
        Student::new("S4", "Dev", "B1"),
    ]);
    PresenceEngine::new(config, roster)
}

/// Small deterministic generator so runs are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

/// Each student flips between visible and hidden in runs of random length.
fn flickering_run(
    engine: &mut PresenceEngine<InMemoryRoster>,
    store: &MemoryEventStore,
    from: NaiveDateTime,
    to: NaiveDateTime,
    step: Duration,
    seed: u64,
) {
    let mut rng = Lcg(seed);
    let mut visible = [false; IDS.len()];
    let mut remaining = [0u64; IDS.len()];
    let mut now = from;

    while now <= to {
        let mut frame = Vec::new();
        for (i, student_id) in IDS.iter().enumerate() {
            if remaining[i] == 0 {
                visible[i] = !visible[i];
                remaining[i] = 1 + rng.next() % 120;
            }
            remaining[i] -= 1;
            if visible[i] {
                frame.push(Sighting {
                    student_id: student_id.to_string(),
                    name: String::new(),
                    confidence: 20.0 + (rng.next() % 40) as f64,
                });
            }
        }
        let events = engine.tick(now, &frame);
        store.append_all(&events).expect("append");
        now += step;
    }
}

#[test]
fn default_window_matches_after_everyone_leaves() {
    for seed in [1, 7, 42, 2026] {
        let config = AttendanceConfig::default();
        let mut engine = engine(config.clone());
        let store = MemoryEventStore::new();

        flickering_run(&mut engine, &store, at(8, 45), at(10, 15), Duration::seconds(1), seed);
        let mut now = at(10, 15);
        while engine.present_count() > 0 {
            now += Duration::seconds(1);
            store.append_all(&engine.tick(now, &[])).expect("append");
        }

        let events = store.read_all(&EventFilter::default()).expect("read");
        let window = engine.sessions().resolve(now);
        let rebuilt = reconstruct_day(
            &events,
            window,
            engine.roster(),
            &BatchFilter::All,
            config.min_in_class_seconds(),
        );

        assert_eq!(rebuilt, engine.evaluate(now), "seed {seed}");
    }
}

#[test]
fn sub_second_ticks_match() {
    let config = AttendanceConfig::default();
    let mut engine = engine(config.clone());
    let store = MemoryEventStore::new();

    flickering_run(
        &mut engine,
        &store,
        at(9, 0),
        at(9, 30),
        Duration::milliseconds(250),
        99,
    );
    let mut now = at(9, 30);
    while engine.present_count() > 0 {
        now += Duration::milliseconds(250);
        store.append_all(&engine.tick(now, &[])).expect("append");
    }

    let events = store.read_all(&EventFilter::default()).expect("read");
    let rebuilt = reconstruct_day(
        &events,
        engine.sessions().resolve(now),
        engine.roster(),
        &BatchFilter::All,
        config.min_in_class_seconds(),
    );
    assert_eq!(rebuilt, engine.evaluate(now));
}

#[test]
fn manual_session_matches_with_students_still_inside() {
    let config = AttendanceConfig {
        active_batch: "B1".to_string(),
        ..AttendanceConfig::default()
    };
    let mut engine = engine(config.clone());
    let store = MemoryEventStore::new();

    store
        .append(&engine.start_session(at(13, 0)))
        .expect("append");
    flickering_run(&mut engine, &store, at(13, 0), at(13, 50), Duration::seconds(1), 5);

    let close = engine.end_session(at(13, 50)).expect("close");
    if let Some(event) = &close.event {
        store.append(event).expect("append");
    }

    let filter = BatchFilter::parse("B1");
    let live: Vec<_> = close
        .verdicts
        .into_iter()
        .filter(|v| v.student_id != "S3")
        .collect();

    let events = store
        .read_all(&EventFilter::on(at(0, 0).date()))
        .expect("read");
    let rebuilt = reconstruct_logged_day(
        config.schedule(),
        at(0, 0).date(),
        &events,
        engine.roster(),
        &filter,
        config.min_in_class_seconds(),
    );

    assert_eq!(rebuilt, live);
}
