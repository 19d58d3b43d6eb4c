use crate::cache::{StrategyCache, StrategyProvider};
use crate::model::*;
use crate::uptime::{in_alarm_time, range_contains, UptimeReason};
use chrono::{TimeZone, Utc};
use siren_common::error::Result;
use siren_common::types::Severity;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

fn range(start: &str, end: &str) -> TimeRange {
    TimeRange {
        start: start.to_string(),
        end: end.to_string(),
    }
}

fn at(hhmm: &str) -> chrono::DateTime<Utc> {
    let (h, m) = hhmm.split_once(':').unwrap();
    Utc.with_ymd_and_hms(2026, 3, 2, h.parse().unwrap(), m.parse().unwrap(), 0)
        .unwrap()
}

pub(crate) fn make_strategy(id: i64, update_time: i64) -> Strategy {
    Strategy {
        id,
        biz_id: 2,
        name: format!("strategy-{id}"),
        scenario: "host".to_string(),
        priority: 0,
        priority_group_key: String::new(),
        update_time,
        items: vec![Item {
            id: 1,
            name: "cpu idle".to_string(),
            query_configs: vec![QueryConfig {
                data_source: "metric".to_string(),
                table: "system.cpu_summary".to_string(),
                metric: "idle".to_string(),
                agg_dimensions: vec!["bk_target_ip".to_string()],
                conditions: vec![],
                agg_interval: 60,
            }],
            algorithms: vec![AlgorithmConfig {
                algorithm: "threshold".to_string(),
                level: Severity::Minor,
                config: serde_json::json!({"rules": [[{"method": "gte", "threshold": 51.0}]]}),
            }],
            target: TargetScope::All,
        }],
        detects: vec![DetectConfig {
            level: Severity::Minor,
            trigger_config: TriggerConfig {
                check_window: 5,
                count: 1,
                uptime: None,
            },
            recovery_config: RecoveryConfig {
                check_window: 5,
                status_setter: StatusSetter::Recovery,
            },
            connector: Connector::And,
        }],
        notice: NoticeConfig::default(),
        actions: vec![],
        labels: vec![],
        no_data_config: None,
        uptime: None,
        is_enabled: true,
    }
}

#[test]
fn interval_is_minimum_agg_interval() {
    let mut s = make_strategy(1, 100);
    s.items[0].query_configs.push(QueryConfig {
        data_source: "metric".to_string(),
        table: "t".to_string(),
        metric: "m".to_string(),
        agg_dimensions: vec![],
        conditions: vec![],
        agg_interval: 30,
    });
    assert_eq!(s.interval(), 30);
}

#[test]
fn decode_rejects_strategy_without_items() {
    let mut s = make_strategy(1, 100);
    s.items.clear();
    let payload = serde_json::to_string(&s).unwrap();
    assert!(Strategy::decode(&payload).is_err());
}

#[test]
fn decode_roundtrips_a_full_strategy() {
    let s = make_strategy(9, 1700000000);
    let payload = serde_json::to_string(&s).unwrap();
    let decoded = Strategy::decode(&payload).unwrap();
    assert_eq!(decoded.id, 9);
    assert_eq!(decoded.interval(), 60);
    assert_eq!(decoded.snapshot_key(), s.snapshot_key());
}

#[test]
fn cross_midnight_range_wraps() {
    let r = range("23:00", "04:00");
    assert!(range_contains(&r, at("23:30")));
    assert!(range_contains(&r, at("01:00")));
    assert!(!range_contains(&r, at("12:00")));
}

#[test]
fn range_boundaries_are_inclusive() {
    let r = range("09:00", "18:00");
    assert!(range_contains(&r, at("09:00")));
    assert!(range_contains(&r, at("18:00")));
    assert!(!range_contains(&r, at("18:01")));
}

#[test]
fn uptime_multi_range_schedule() {
    // 06:00-10:00, 18:00-21:00, 23:00-04:00
    let uptime = UptimeConfig {
        time_ranges: vec![
            range("06:00", "10:00"),
            range("18:00", "21:00"),
            range("23:00", "04:00"),
        ],
        calendar_ids: vec![],
    };

    for hhmm in ["01:00", "07:00", "19:00", "23:30"] {
        let (ok, _) = in_alarm_time(Some(&uptime), &[], at(hhmm));
        assert!(ok, "expected in force at {hhmm}");
    }
    for hhmm in ["05:00", "12:00", "22:00"] {
        let (ok, reason) = in_alarm_time(Some(&uptime), &[], at(hhmm));
        assert!(!ok, "expected out of force at {hhmm}");
        assert_eq!(reason, UptimeReason::OutsideTimeRanges);
    }
}

#[test]
fn active_calendar_beats_rest_calendar() {
    let now = at("07:00");
    let covering = CalendarItem {
        start_time: now.timestamp() - 600,
        end_time: now.timestamp() + 600,
    };
    let uptime = UptimeConfig {
        time_ranges: vec![range("06:00", "10:00")],
        calendar_ids: vec![1, 2],
    };
    let rest_only = vec![Calendar {
        id: 1,
        kind: CalendarKind::Rest,
        items: vec![covering.clone()],
    }];
    let (ok, reason) = in_alarm_time(Some(&uptime), &rest_only, now);
    assert!(!ok);
    assert_eq!(reason, UptimeReason::RestCalendar(1));

    let both = vec![
        Calendar {
            id: 1,
            kind: CalendarKind::Rest,
            items: vec![covering.clone()],
        },
        Calendar {
            id: 2,
            kind: CalendarKind::Active,
            items: vec![covering],
        },
    ];
    let (ok, reason) = in_alarm_time(Some(&uptime), &both, now);
    assert!(ok);
    assert_eq!(reason, UptimeReason::ActiveCalendar(2));
}

struct MapProvider {
    strategies: Mutex<HashMap<i64, Strategy>>,
    loads: Mutex<u32>,
}

impl MapProvider {
    fn new(strategies: Vec<Strategy>) -> Self {
        Self {
            strategies: Mutex::new(strategies.into_iter().map(|s| (s.id, s)).collect()),
            loads: Mutex::new(0),
        }
    }

    fn bump_update_time(&self, id: i64, t: i64) {
        let mut map = self.strategies.lock().unwrap();
        if let Some(s) = map.get_mut(&id) {
            s.update_time = t;
        }
    }
}

impl StrategyProvider for MapProvider {
    fn load(&self, id: i64) -> Result<Option<Strategy>> {
        *self.loads.lock().unwrap() += 1;
        Ok(self.strategies.lock().unwrap().get(&id).cloned())
    }

    fn update_time(&self, id: i64) -> Result<Option<i64>> {
        Ok(self.strategies.lock().unwrap().get(&id).map(|s| s.update_time))
    }

    fn list_ids(&self) -> Result<Vec<i64>> {
        let mut ids: Vec<i64> = self.strategies.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[test]
fn cache_reads_through_once() {
    let provider = Arc::new(MapProvider::new(vec![make_strategy(1, 100)]));
    let cache = StrategyCache::new(provider.clone());

    assert!(cache.get(1).unwrap().is_some());
    assert!(cache.get(1).unwrap().is_some());
    assert_eq!(*provider.loads.lock().unwrap(), 1);
    assert!(cache.get(99).unwrap().is_none());
}

#[test]
fn refresh_replaces_entries_on_update_time_change() {
    let provider = Arc::new(MapProvider::new(vec![make_strategy(1, 100)]));
    let cache = StrategyCache::new(provider.clone());

    let before = cache.get(1).unwrap().unwrap();
    assert_eq!(before.update_time, 100);

    provider.bump_update_time(1, 200);
    let replaced = cache.refresh().unwrap();
    assert_eq!(replaced, 1);

    let after = cache.get(1).unwrap().unwrap();
    assert_eq!(after.update_time, 200);
}

#[test]
fn group_key_lookup_sorts_by_priority() {
    let mut a = make_strategy(1, 100);
    a.priority = 5;
    a.priority_group_key = "g".to_string();
    let mut b = make_strategy(2, 100);
    b.priority = 10;
    b.priority_group_key = "g".to_string();

    let cache = StrategyCache::new(Arc::new(MapProvider::new(vec![a, b])));
    let got = cache.get_by_group_key("g").unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].id, 2);
}
