use crate::config::{ActionSeedFile, AssignSeedFile};
use chrono::Datelike;
use siren_storage::config_store::{ActionConfigRow, AssignGroupRow, CalendarRow, ConfigStore};
use siren_strategy::model::CalendarItem;

/// Upserts assignment groups from a JSON seed file. Existing ids are
/// overwritten; the engine's cache picks changes up within its TTL.
pub fn init_assign_groups(config: &ConfigStore, seed_path: &str) -> anyhow::Result<u32> {
    let content = std::fs::read_to_string(seed_path)
        .map_err(|e| anyhow::anyhow!("failed to read seed file '{seed_path}': {e}"))?;
    let seed: AssignSeedFile = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse seed file '{seed_path}': {e}"))?;

    let mut written = 0u32;
    for group in &seed.groups {
        config.upsert_assign_group(&AssignGroupRow {
            id: group.id,
            biz_id: group.biz_id,
            priority: group.priority,
            name: group.name.clone(),
            source: group.source.clone(),
            rules_json: group.rules.to_string(),
        })?;
        tracing::info!(group_id = group.id, name = %group.name, "assign group seeded");
        written += 1;
    }
    Ok(written)
}

/// Upserts action configs from a JSON seed file.
pub fn init_action_configs(config: &ConfigStore, seed_path: &str) -> anyhow::Result<u32> {
    let content = std::fs::read_to_string(seed_path)
        .map_err(|e| anyhow::anyhow!("failed to read seed file '{seed_path}': {e}"))?;
    let seed: ActionSeedFile = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse seed file '{seed_path}': {e}"))?;

    let mut written = 0u32;
    for cfg in &seed.configs {
        config.upsert_action_config(&ActionConfigRow {
            id: cfg.id,
            plugin_id: cfg.plugin_id.clone(),
            name: cfg.name.clone(),
            biz_id: cfg.biz_id,
            timeout_secs: cfg.timeout_secs,
            template_detail: cfg.template_detail.to_string(),
        })?;
        tracing::info!(config_id = cfg.id, plugin = %cfg.plugin_id, "action config seeded");
        written += 1;
    }
    Ok(written)
}

/// Writes the default rest/active calendar pair for one year: weekend
/// days become rest occurrences, weekdays active ones.
pub fn sync_year_calendars(
    config: &ConfigStore,
    year: i32,
    holiday_calendar_id: i64,
    working_calendar_id: i64,
) -> anyhow::Result<(usize, usize)> {
    let mut rest_items = Vec::new();
    let mut active_items = Vec::new();
    let mut day = chrono::NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| anyhow::anyhow!("invalid year {year}"))?;
    while day.year() == year {
        let start = day
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow::anyhow!("invalid day {day}"))?
            .and_utc()
            .timestamp();
        let item = CalendarItem {
            start_time: start,
            end_time: start + 86_399,
        };
        if matches!(
            day.weekday(),
            chrono::Weekday::Sat | chrono::Weekday::Sun
        ) {
            rest_items.push(item);
        } else {
            active_items.push(item);
        }
        day = day
            .succ_opt()
            .ok_or_else(|| anyhow::anyhow!("calendar overflow after {day}"))?;
    }

    config.upsert_calendar(&CalendarRow {
        id: holiday_calendar_id,
        kind: "rest".to_string(),
        items_json: serde_json::to_string(&rest_items)?,
    })?;
    config.upsert_calendar(&CalendarRow {
        id: working_calendar_id,
        kind: "active".to_string(),
        items_json: serde_json::to_string(&active_items)?,
    })?;
    Ok((rest_items.len(), active_items.len()))
}
