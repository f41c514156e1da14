use itinerary_core::db::open_db_in_memory;
use itinerary_core::position::audit::audit_all;
use itinerary_core::position::GroupOrder;
use itinerary_core::repo::schedule_item_repo::insert_item_row;
use itinerary_core::{Collection, InsertAt, NewScheduleItem, PositionError, PositionManager};
use proptest::prelude::*;
use rusqlite::{params, Connection};
use uuid::Uuid;

const DAYS: usize = 3;

#[derive(Debug, Clone)]
enum Op {
    Insert { day: usize, at: Option<usize> },
    Delete { day: usize, index: usize },
    Relocate { day: usize, index: usize, target: i64 },
    Reorder { day: usize, rotate: usize },
    Move { from: usize, index: usize, to: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..DAYS, prop::option::of(0..8_usize)).prop_map(|(day, at)| Op::Insert { day, at }),
        1 => (0..DAYS, 0..8_usize).prop_map(|(day, index)| Op::Delete { day, index }),
        1 => (0..DAYS, 0..8_usize, -2..12_i64)
            .prop_map(|(day, index, target)| Op::Relocate { day, index, target }),
        1 => (0..DAYS, 0..8_usize).prop_map(|(day, rotate)| Op::Reorder { day, rotate }),
        1 => (0..DAYS, 0..8_usize, 0..DAYS).prop_map(|(from, index, to)| Op::Move { from, index, to }),
    ]
}

struct World {
    conn: Connection,
    trip: Uuid,
    days: Vec<Uuid>,
}

fn world() -> World {
    let conn = open_db_in_memory().unwrap();
    let trip = Uuid::new_v4();
    conn.execute(
        "INSERT INTO trips (trip_uuid, title, start_date) VALUES (?1, 'Prop', '2026-04-01');",
        [trip.to_string()],
    )
    .unwrap();
    let days = (1..=DAYS as i64)
        .map(|day_no| {
            let day = Uuid::new_v4();
            conn.execute(
                "INSERT INTO trip_days (day_uuid, trip_uuid, day_no) VALUES (?1, ?2, ?3);",
                params![day.to_string(), trip.to_string(), day_no],
            )
            .unwrap();
            day
        })
        .collect();
    World { conn, trip, days }
}

fn apply(world: &World, model: &mut [Vec<Uuid>], op: &Op) {
    let manager = PositionManager::with_defaults(&world.conn);
    match *op {
        Op::Insert { day, at } => {
            let len = model[day].len();
            let index = at.map(|value| value % (len + 1));
            let item = Uuid::new_v4();
            let payload = NewScheduleItem::default().validate().unwrap();
            let target = InsertAt::from(index.map(|value| value as i64 + 1));
            manager
                .insert_entity(
                    Collection::Items,
                    world.trip,
                    world.days[day],
                    target,
                    |conn, seq_no| {
                        insert_item_row(conn, item, world.days[day], seq_no, &payload)
                            .map_err(PositionError::from)
                    },
                )
                .unwrap();
            model[day].insert(index.unwrap_or(len), item);
        }
        Op::Delete { day, index } => {
            let len = model[day].len();
            if len == 0 {
                return;
            }
            let item = model[day].remove(index % len);
            manager
                .delete_entity(Collection::Items, world.trip, item)
                .unwrap();
        }
        Op::Relocate { day, index, target } => {
            let len = model[day].len();
            if len == 0 {
                return;
            }
            let item = model[day].remove(index % len);
            manager
                .relocate_entity(Collection::Items, world.trip, item, target)
                .unwrap();
            let slot = target.clamp(1, len as i64) as usize - 1;
            model[day].insert(slot, item);
        }
        Op::Reorder { day, rotate } => {
            let len = model[day].len();
            if len == 0 {
                return;
            }
            model[day].rotate_left(rotate % len);
            manager
                .reorder_group(Collection::Items, world.trip, world.days[day], &model[day])
                .unwrap();
        }
        Op::Move { from, index, to } => {
            let len = model[from].len();
            if len == 0 {
                return;
            }
            let item = model[from].remove(index % len);
            model[to].insert(0, item);
            manager
                .batch_reorder(
                    Collection::Items,
                    world.trip,
                    vec![GroupOrder::new(world.days[to], vec![item])],
                )
                .unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ordinals_stay_dense_and_match_model(ops in prop::collection::vec(arb_op(), 1..40)) {
        let world = world();
        let mut model = vec![Vec::new(); DAYS];
        for op in &ops {
            apply(&world, &mut model, op);
            prop_assert!(audit_all(&world.conn).unwrap().is_empty(), "not dense after {:?}", op);
        }

        let manager = PositionManager::with_defaults(&world.conn);
        for (day, expected) in world.days.iter().zip(&model) {
            let slots = manager.read_group(Collection::Items, *day).unwrap();
            let ordinals = slots.iter().map(|slot| slot.ordinal).collect::<Vec<_>>();
            prop_assert_eq!(ordinals, (1..=expected.len() as i64).collect::<Vec<_>>());
            let entities = slots.iter().map(|slot| slot.entity).collect::<Vec<_>>();
            prop_assert_eq!(&entities, expected);
        }
    }
}
