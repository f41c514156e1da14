use chrono::NaiveDate;
use itinerary_core::db::open_db_in_memory;
use itinerary_core::position::GroupOrder;
use itinerary_core::{
    Collection, InsertAt, NewScheduleItem, NewTrip, PositionError, PositionManager,
    SqliteTripRepository, TripRepository,
};
use rusqlite::{params, Connection};
use uuid::Uuid;

struct Fixture {
    conn: Connection,
    trip: Uuid,
    day_a: Uuid,
    day_b: Uuid,
    a: Vec<Uuid>,
    b: Vec<Uuid>,
}

fn insert_items(manager: &PositionManager<'_>, trip: Uuid, day: Uuid, count: usize) -> Vec<Uuid> {
    let payload = NewScheduleItem::default().validate().unwrap();
    (0..count)
        .map(|_| {
            let item = Uuid::new_v4();
            manager
                .insert_entity(Collection::Items, trip, day, InsertAt::Append, |conn, seq_no| {
                    itinerary_core::repo::schedule_item_repo::insert_item_row(
                        conn, item, day, seq_no, &payload,
                    )
                    .map_err(PositionError::from)
                })
                .unwrap();
            item
        })
        .collect()
}

fn fixture() -> Fixture {
    let conn = open_db_in_memory().unwrap();
    let start = NaiveDate::from_ymd_opt(2026, 5, 10).unwrap();
    let repo = SqliteTripRepository::try_new(&conn).unwrap();
    let trip = repo
        .create_trip(&NewTrip {
            title: "Islands".to_string(),
            start_date: start,
            end_date: start + chrono::Days::new(1),
        })
        .unwrap()
        .trip_uuid;
    let days = repo.list_days(trip).unwrap();
    let (day_a, day_b) = (days[0].day_uuid, days[1].day_uuid);

    let manager = PositionManager::with_defaults(&conn);
    let a = insert_items(&manager, trip, day_a, 3);
    let b = insert_items(&manager, trip, day_b, 2);
    drop(manager);
    Fixture {
        conn,
        trip,
        day_a,
        day_b,
        a,
        b,
    }
}

fn rows(conn: &Connection, day: Uuid) -> Vec<(Uuid, i64)> {
    let mut stmt = conn
        .prepare("SELECT item_uuid, seq_no FROM schedule_items WHERE day_uuid = ?1 ORDER BY seq_no;")
        .unwrap();
    stmt.query_map(params![day.to_string()], |row| {
        let id: String = row.get(0)?;
        Ok((Uuid::parse_str(&id).unwrap(), row.get(1)?))
    })
    .unwrap()
    .collect::<Result<_, _>>()
    .unwrap()
}

#[test]
fn moving_item_across_days_keeps_both_dense() {
    let f = fixture();
    let manager = PositionManager::with_defaults(&f.conn);

    let outcome = manager
        .batch_reorder(
            Collection::Items,
            f.trip,
            vec![GroupOrder::new(f.day_b, vec![f.a[1], f.b[0], f.b[1]])],
        )
        .unwrap();

    assert_eq!(rows(&f.conn, f.day_a), vec![(f.a[0], 1), (f.a[2], 2)]);
    assert_eq!(
        rows(&f.conn, f.day_b),
        vec![(f.a[1], 1), (f.b[0], 2), (f.b[1], 3)]
    );
    assert_eq!(outcome.groups.len(), 2);
    let moved = outcome
        .changes
        .iter()
        .find(|change| change.entity == f.a[1])
        .unwrap();
    assert_eq!(moved.from.group, f.day_a);
    assert_eq!(moved.to.group, f.day_b);
    assert_eq!(moved.to.ordinal, 1);
}

#[test]
fn reordering_both_days_in_one_request() {
    let f = fixture();
    let manager = PositionManager::with_defaults(&f.conn);

    manager
        .batch_reorder(
            Collection::Items,
            f.trip,
            vec![
                GroupOrder::new(f.day_a, vec![f.b[1], f.a[0]]),
                GroupOrder::new(f.day_b, vec![f.a[2], f.b[0], f.a[1]]),
            ],
        )
        .unwrap();

    assert_eq!(rows(&f.conn, f.day_a), vec![(f.b[1], 1), (f.a[0], 2)]);
    assert_eq!(
        rows(&f.conn, f.day_b),
        vec![(f.a[2], 1), (f.b[0], 2), (f.a[1], 3)]
    );
}

#[test]
fn duplicate_entity_across_groups_changes_nothing() {
    let f = fixture();
    let manager = PositionManager::with_defaults(&f.conn);
    let before_a = rows(&f.conn, f.day_a);
    let before_b = rows(&f.conn, f.day_b);

    let err = manager
        .batch_reorder(
            Collection::Items,
            f.trip,
            vec![
                GroupOrder::new(f.day_a, vec![f.a[0]]),
                GroupOrder::new(f.day_b, vec![f.a[0], f.b[0]]),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, PositionError::DuplicateEntityInRequest(id) if id == f.a[0]));
    assert_eq!(rows(&f.conn, f.day_a), before_a);
    assert_eq!(rows(&f.conn, f.day_b), before_b);
}

#[test]
fn item_from_other_trip_is_out_of_scope() {
    let f = fixture();
    let other_trip = Uuid::new_v4();
    let other_day = Uuid::new_v4();
    let stray = Uuid::new_v4();
    f.conn
        .execute_batch(&format!(
            "INSERT INTO trips (trip_uuid, title, start_date) VALUES ('{other_trip}', 'Other', '2026-01-01');
             INSERT INTO trip_days (day_uuid, trip_uuid, day_no) VALUES ('{other_day}', '{other_trip}', 1);
             INSERT INTO schedule_items (item_uuid, day_uuid, seq_no) VALUES ('{stray}', '{other_day}', 1);"
        ))
        .unwrap();
    let manager = PositionManager::with_defaults(&f.conn);

    let err = manager
        .batch_reorder(
            Collection::Items,
            f.trip,
            vec![GroupOrder::new(f.day_a, vec![stray, f.a[0]])],
        )
        .unwrap_err();
    assert!(matches!(err, PositionError::EntityNotInScope { entity, .. } if entity == stray));
    assert_eq!(rows(&f.conn, other_day), vec![(stray, 1)]);

    let err = manager
        .batch_reorder(
            Collection::Items,
            f.trip,
            vec![GroupOrder::new(other_day, vec![f.a[0]])],
        )
        .unwrap_err();
    assert!(matches!(err, PositionError::GroupNotInScope { .. }));
}

#[test]
fn empty_request_is_rejected() {
    let f = fixture();
    let manager = PositionManager::with_defaults(&f.conn);
    assert!(matches!(
        manager.batch_reorder(Collection::Items, f.trip, vec![]),
        Err(PositionError::EmptyGroupOperation)
    ));
    assert!(matches!(
        manager.batch_reorder(
            Collection::Items,
            f.trip,
            vec![GroupOrder::new(f.day_a, vec![])]
        ),
        Err(PositionError::EmptyGroupOperation)
    ));
}

#[test]
fn failure_during_apply_rolls_back_every_group() {
    let f = fixture();
    let before_a = rows(&f.conn, f.day_a);
    let before_b = rows(&f.conn, f.day_b);
    f.conn
        .execute_batch(
            "CREATE TRIGGER fail_item_move
             BEFORE UPDATE OF seq_no ON schedule_items
             WHEN NEW.seq_no = 3 AND OLD.seq_no > 1000
             BEGIN
               SELECT RAISE(ABORT, 'forced reorder failure');
             END;",
        )
        .unwrap();
    let manager = PositionManager::with_defaults(&f.conn);

    let err = manager
        .batch_reorder(
            Collection::Items,
            f.trip,
            vec![GroupOrder::new(f.day_b, vec![f.a[1], f.b[0], f.b[1]])],
        )
        .unwrap_err();
    assert!(matches!(err, PositionError::Db(_)));
    assert_eq!(rows(&f.conn, f.day_a), before_a);
    assert_eq!(rows(&f.conn, f.day_b), before_b);
}
