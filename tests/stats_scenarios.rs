//! Stats computed from chains and links loaded through the store.

use tempfile::TempDir;

use chains::calendar::{Calendar, DayId, FixedCalendar};
use chains::store::catalog::NewChain;
use chains::store::codec::{ChainKind, Color};
use chains::store::Store;

fn store_at(dir: &TempDir, today: &str) -> Store<FixedCalendar> {
    let day: DayId = today.parse().unwrap();
    let cal = FixedCalendar::new(2 * 3600, 0).unwrap();
    let now = cal.midnight(day) + 9 * 3600;
    Store::open(dir.path(), cal.with_now(now)).unwrap()
}

fn track(store: &Store<FixedCalendar>, kind: ChainKind, days: &[&str]) -> u16 {
    let id = {
        let mut chains = store.materialize_chains().unwrap();
        let id = chains
            .add(NewChain {
                name: "habit".into(),
                kind,
                color: Color::DEFAULT,
                created: 0,
            })
            .unwrap();
        chains.persist().unwrap();
        id
    };

    let mut links = store.materialize_links(days.len()).unwrap();
    for day in days {
        let ts = store.calendar().midnight(day.parse().unwrap());
        links.add(id, ts, 0).unwrap();
    }
    links.persist().unwrap();
    id
}

#[test]
fn daily_chain_with_a_week_long_gap() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir, "2024-01-11");
    let id = track(
        &store,
        ChainKind::Daily,
        &["2024-01-10", "2024-01-01", "2024-01-03", "2024-01-02"],
    );

    let chains = store.materialize_chains().unwrap();
    let links = store.materialize_links(0).unwrap();
    let stats = store.stats(chains.get(id).unwrap(), &links.chain_view(id, None));

    assert_eq!(stats.longest_streak, 3);
    assert_eq!(stats.longest_gap, 6);
    assert!(stats.times_broken >= 1);
}

#[test]
fn stats_from_a_later_start_day() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir, "2024-01-11");
    let id = track(
        &store,
        ChainKind::Daily,
        &["2024-01-01", "2024-01-02", "2024-01-03", "2024-01-10"],
    );

    let chains = store.materialize_chains().unwrap();
    let links = store.materialize_links(0).unwrap();
    let recent = links.chain_view(id, Some("2024-01-03".parse().unwrap()));
    assert_eq!(recent.len(), 2);

    let stats = store.stats(chains.get(id).unwrap(), &recent);
    assert_eq!(stats.longest_streak, 1);
    assert_eq!(stats.longest_gap, 6);
    assert_eq!(stats.periods_total, 8);
}

#[test]
fn weekly_chain_across_new_year() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir, "2025-02-01");
    let id = track(
        &store,
        ChainKind::Weekly { min_days: 2 },
        &[
            "2024-12-16",
            "2024-12-18",
            // week of 2024-12-23 missed
            "2024-12-31",
            "2025-01-03",
            "2025-01-06",
            "2025-01-12",
        ],
    );

    let chains = store.materialize_chains().unwrap();
    let links = store.materialize_links(0).unwrap();
    let stats = store.stats(chains.get(id).unwrap(), &links.chain_view(id, None));

    assert_eq!(stats.periods_total, 4);
    assert_eq!(stats.periods_linked, 3);
    assert_eq!(stats.longest_streak, 2);
    assert_eq!(stats.longest_gap, 1);
    assert_eq!(stats.times_broken, 1);
    assert!((stats.fulfillment - 75.0).abs() < 1e-9);
}
