use chrono::NaiveDate;
use itinerary_core::db::open_db_in_memory;
use itinerary_core::{
    DayService, InsertAt, NewTrip, PositionError, PositionManager, ServiceError,
    SqliteTripRepository, TripDay, TripRepository, TripService,
};
use rusqlite::Connection;
use uuid::Uuid;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn create_trip(conn: &Connection, start: (i32, u32, u32), days: u64) -> Uuid {
    let start_date = NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap();
    let service = TripService::new(
        SqliteTripRepository::try_new(conn).unwrap(),
        PositionManager::with_defaults(conn),
    );
    service
        .create_trip(&NewTrip {
            title: "Coast road".to_string(),
            start_date,
            end_date: start_date + chrono::Days::new(days - 1),
        })
        .unwrap()
        .trip_uuid
}

fn day_service(conn: &Connection) -> DayService<'_, SqliteTripRepository<'_>> {
    DayService::new(
        SqliteTripRepository::try_new(conn).unwrap(),
        PositionManager::with_defaults(conn),
    )
}

fn ids(days: &[TripDay]) -> Vec<Uuid> {
    days.iter().map(|day| day.day_uuid).collect()
}

fn day_nos(days: &[TripDay]) -> Vec<i64> {
    days.iter().map(|day| day.day_no).collect()
}

#[test]
fn trip_creation_numbers_days_densely() {
    let conn = setup();
    let trip = create_trip(&conn, (2026, 6, 1), 5);
    let days = day_service(&conn).list_days(trip).unwrap();
    assert_eq!(day_nos(&days), vec![1, 2, 3, 4, 5]);
    assert_eq!(days[4].date, NaiveDate::from_ymd_opt(2026, 6, 5));
}

#[test]
fn inserting_day_in_middle_shifts_later_days_and_dates() {
    let conn = setup();
    let trip = create_trip(&conn, (2026, 6, 1), 3);
    let service = day_service(&conn);
    let before = service.list_days(trip).unwrap();

    let added = service
        .add_day(trip, InsertAt::At(2), Some("rest day"))
        .unwrap();
    assert_eq!(added.day_no, 2);
    assert_eq!(added.date, NaiveDate::from_ymd_opt(2026, 6, 2));

    let after = service.list_days(trip).unwrap();
    assert_eq!(
        ids(&after),
        vec![
            before[0].day_uuid,
            added.day_uuid,
            before[1].day_uuid,
            before[2].day_uuid
        ]
    );
    assert_eq!(day_nos(&after), vec![1, 2, 3, 4]);
    assert_eq!(after[3].date, NaiveDate::from_ymd_opt(2026, 6, 4));
}

#[test]
fn appending_and_out_of_range_insert() {
    let conn = setup();
    let trip = create_trip(&conn, (2026, 6, 1), 2);
    let service = day_service(&conn);

    let appended = service.add_day(trip, InsertAt::Append, None).unwrap();
    assert_eq!(appended.day_no, 3);

    let err = service.add_day(trip, InsertAt::At(5), None).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Position(PositionError::OrdinalOutOfRange { ordinal: 5, max: 4 })
    ));
    assert_eq!(day_nos(&service.list_days(trip).unwrap()), vec![1, 2, 3]);
}

#[test]
fn deleting_day_compacts_and_drops_its_items() {
    let conn = setup();
    let trip = create_trip(&conn, (2026, 6, 1), 4);
    let service = day_service(&conn);
    let before = service.list_days(trip).unwrap();
    conn.execute(
        "INSERT INTO schedule_items (item_uuid, day_uuid, seq_no) VALUES (?1, ?2, 1);",
        [Uuid::new_v4().to_string(), before[1].day_uuid.to_string()],
    )
    .unwrap();

    let remaining = service.delete_day(trip, before[1].day_uuid).unwrap();
    assert_eq!(
        ids(&remaining),
        vec![before[0].day_uuid, before[2].day_uuid, before[3].day_uuid]
    );
    assert_eq!(day_nos(&remaining), vec![1, 2, 3]);

    let orphaned: i64 = conn
        .query_row("SELECT COUNT(*) FROM schedule_items;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(orphaned, 0);
}

#[test]
fn relocate_clamps_target_into_range() {
    let conn = setup();
    let trip = create_trip(&conn, (2026, 6, 1), 3);
    let service = day_service(&conn);
    let before = service.list_days(trip).unwrap();

    let after = service.relocate_day(trip, before[0].day_uuid, 42).unwrap();
    assert_eq!(
        ids(&after),
        vec![before[1].day_uuid, before[2].day_uuid, before[0].day_uuid]
    );

    let after = service.relocate_day(trip, before[0].day_uuid, 0).unwrap();
    assert_eq!(ids(&after), ids(&before));
}

#[test]
fn full_reorder_is_idempotent() {
    let conn = setup();
    let trip = create_trip(&conn, (2026, 6, 1), 3);
    let service = day_service(&conn);
    let before = service.list_days(trip).unwrap();
    let target = vec![before[2].day_uuid, before[0].day_uuid, before[1].day_uuid];

    let once = service.reorder_days(trip, &target).unwrap();
    let twice = service.reorder_days(trip, &target).unwrap();
    assert_eq!(ids(&once), target);
    assert_eq!(ids(&twice), target);
    assert_eq!(day_nos(&twice), vec![1, 2, 3]);
}

#[test]
fn reorder_with_day_of_other_trip_is_rejected_without_changes() {
    let conn = setup();
    let trip_a = create_trip(&conn, (2026, 6, 1), 2);
    let trip_b = create_trip(&conn, (2026, 7, 1), 1);
    let service = day_service(&conn);
    let days_a = service.list_days(trip_a).unwrap();
    let days_b = service.list_days(trip_b).unwrap();

    let err = service
        .reorder_days(trip_a, &[days_a[1].day_uuid, days_b[0].day_uuid])
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Position(PositionError::EntityNotInScope { .. })
    ));
    assert_eq!(ids(&service.list_days(trip_a).unwrap()), ids(&days_a));
    assert_eq!(ids(&service.list_days(trip_b).unwrap()), ids(&days_b));
}

#[test]
fn partial_day_reorder_is_incomplete() {
    let conn = setup();
    let trip = create_trip(&conn, (2026, 6, 1), 3);
    let service = day_service(&conn);
    let days = service.list_days(trip).unwrap();

    let err = service
        .reorder_days(trip, &[days[2].day_uuid, days[0].day_uuid])
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Position(PositionError::IncompleteOrdering {
            expected: 3,
            actual: 2,
            ..
        })
    ));
}

#[test]
fn unknown_trip_and_day_map_to_not_found() {
    let conn = setup();
    let trip = create_trip(&conn, (2026, 6, 1), 1);
    let service = day_service(&conn);

    let missing_trip = Uuid::new_v4();
    assert!(matches!(
        service.add_day(missing_trip, InsertAt::Append, None),
        Err(ServiceError::TripNotFound(id)) if id == missing_trip
    ));
    let missing_day = Uuid::new_v4();
    assert!(matches!(
        service.delete_day(trip, missing_day),
        Err(ServiceError::DayNotFound(id)) if id == missing_day
    ));
}

#[test]
fn failed_compaction_rolls_back_delete() {
    let conn = setup();
    let trip = create_trip(&conn, (2026, 6, 1), 3);
    let service = day_service(&conn);
    let before = service.list_days(trip).unwrap();

    conn.execute_batch(
        "CREATE TRIGGER fail_day_shift
         BEFORE UPDATE OF day_no ON trip_days
         WHEN NEW.day_no = 2
         BEGIN
           SELECT RAISE(ABORT, 'forced shift failure');
         END;",
    )
    .unwrap();

    let err = service.delete_day(trip, before[0].day_uuid).unwrap_err();
    assert!(matches!(err, ServiceError::Position(PositionError::Db(_))));

    let after = SqliteTripRepository::try_new(&conn)
        .unwrap()
        .list_days(trip)
        .unwrap();
    assert_eq!(ids(&after), ids(&before));
    assert_eq!(day_nos(&after), vec![1, 2, 3]);
}
