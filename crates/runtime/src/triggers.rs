//! Trigger definitions and their persistent registry.
//!
//! Temporal triggers carry a cron expression evaluated in the configured
//! timezone.  Both 5-field (minute-first, numeric weekday `0` = Sunday) and
//! 6/7-field (second-first) expressions are accepted.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use continuum_memory::document::{DocumentStore, Query, TRIGGERS};
use continuum_memory::{MemoryError, MemoryResult, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Temporal,
    Conditional,
    Event,
}

impl TriggerKind {
    pub fn slug(self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::Conditional => "conditional",
            Self::Event => "event",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_fired: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fire_count: u64,
}

/// Trigger as requested by a caller (HTTP or a `create_trigger` action).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSpec {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", alias = "kind", default = "default_kind")]
    pub kind: TriggerKind,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

fn default_kind() -> TriggerKind {
    TriggerKind::Temporal
}

impl TriggerSpec {
    pub fn temporal(name: &str, schedule: &str, purpose: &str, context: Value) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            kind: TriggerKind::Temporal,
            schedule: Some(schedule.to_string()),
            condition: None,
            event: None,
            purpose: purpose.to_string(),
            context: match context {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            enabled: None,
        }
    }

    /// Explicit id, else a slug of the name, else a fresh uuid.
    pub fn resolve_id(&self) -> String {
        if let Some(id) = self.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            return id.to_string();
        }
        let slug = slugify(&self.name);
        if slug.is_empty() {
            format!("trigger_{}", Uuid::new_v4().simple())
        } else {
            slug
        }
    }

    /// Check the trigger can actually fire.
    pub fn validate(&self) -> MemoryResult<()> {
        match self.kind {
            TriggerKind::Temporal => {
                let expr = self.schedule.as_deref().unwrap_or_default();
                parse_schedule(expr)?;
            }
            TriggerKind::Event if self.event.as_deref().unwrap_or_default().trim().is_empty() => {
                return Err(MemoryError::InvalidValue {
                    field: "event".to_string(),
                    reason: "event triggers need an event name".to_string(),
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn into_definition(self, existing: Option<TriggerDefinition>) -> TriggerDefinition {
        let id = self.resolve_id();
        let name = if self.name.trim().is_empty() { id.clone() } else { self.name };
        let (created_at, last_fired, fire_count, was_enabled) = match existing {
            Some(e) => (e.created_at, e.last_fired, e.fire_count, e.enabled),
            None => (Utc::now(), None, 0, true),
        };
        TriggerDefinition {
            id,
            name,
            kind: self.kind,
            schedule: self.schedule,
            condition: self.condition,
            event: self.event,
            purpose: self.purpose,
            context: self.context,
            enabled: self.enabled.unwrap_or(was_enabled),
            created_at,
            last_fired,
            fire_count,
        }
    }
}

fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

// ── Cron ─────────────────────────────────────────────────────────────────────

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Translate a classic numeric weekday (`0`/`7` = Sunday) to its name.
fn weekday_token(token: &str) -> String {
    match token.parse::<usize>() {
        Ok(n) if n <= 7 => WEEKDAYS[n % 7].to_string(),
        _ => token.to_string(),
    }
}

fn normalize_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let range = match range.split_once('-') {
                Some((lo, hi)) => format!("{}-{}", weekday_token(lo), weekday_token(hi)),
                None => weekday_token(range),
            };
            match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a cron expression, accepting the classic 5-field form.
pub fn parse_schedule(expr: &str) -> MemoryResult<Schedule> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => format!(
            "0 {} {} {} {} {}",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            normalize_weekdays(fields[4])
        ),
        6 | 7 => fields.join(" "),
        _ => {
            return Err(MemoryError::InvalidValue {
                field: "schedule".to_string(),
                reason: format!("`{expr}` is not a cron expression"),
            });
        }
    };
    Schedule::from_str(&normalized).map_err(|e| MemoryError::InvalidValue {
        field: "schedule".to_string(),
        reason: format!("`{expr}`: {e}"),
    })
}

/// First occurrence strictly after `after`, evaluated in `tz`.
pub fn next_occurrence(schedule: &Schedule, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|at| at.with_timezone(&Utc))
}

/// Resolve an IANA name, falling back to UTC.
pub fn resolve_timezone(name: &str) -> Tz {
    name.parse::<Tz>().unwrap_or(Tz::UTC)
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TriggerRegistry {
    docs: Arc<dyn DocumentStore>,
}

impl TriggerRegistry {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    /// Insert or replace by id.  Replacing keeps the creation time and
    /// firing history.
    pub async fn upsert(&self, spec: TriggerSpec) -> MemoryResult<TriggerDefinition> {
        spec.validate()?;
        let id = spec.resolve_id();
        let stored = self
            .docs
            .update(
                TRIGGERS,
                &id,
                Box::new(move |current| {
                    let existing = current.map(serde_json::from_value::<TriggerDefinition>).transpose()?;
                    let definition = spec.into_definition(existing);
                    Ok(Some(serde_json::to_value(&definition)?))
                }),
            )
            .await?;
        let definition: TriggerDefinition = decode(stored, &id)?;
        info!(id = %definition.id, kind = definition.kind.slug(), "trigger upserted");
        Ok(definition)
    }

    pub async fn get(&self, id: &str) -> MemoryResult<Option<TriggerDefinition>> {
        self.docs
            .get(TRIGGERS, id)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(MemoryError::from)
    }

    pub async fn list(&self) -> MemoryResult<Vec<TriggerDefinition>> {
        self.find(Query::new().asc("created_at")).await
    }

    pub async fn list_active(&self) -> MemoryResult<Vec<TriggerDefinition>> {
        self.find(Query::new().eq("enabled", true).asc("created_at")).await
    }

    async fn find(&self, query: Query) -> MemoryResult<Vec<TriggerDefinition>> {
        self.docs
            .find(TRIGGERS, &query)
            .await?
            .into_iter()
            .map(|d| serde_json::from_value(d).map_err(MemoryError::from))
            .collect()
    }

    pub async fn record_fired(&self, id: &str, at: DateTime<Utc>) -> MemoryResult<TriggerDefinition> {
        self.mutate(id, move |t| {
            t.last_fired = Some(at);
            t.fire_count += 1;
        })
        .await
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> MemoryResult<TriggerDefinition> {
        self.mutate(id, move |t| t.enabled = enabled).await
    }

    async fn mutate<F>(&self, id: &str, f: F) -> MemoryResult<TriggerDefinition>
    where
        F: FnOnce(&mut TriggerDefinition) + Send + 'static,
    {
        let key = id.to_string();
        let stored = self
            .docs
            .update(
                TRIGGERS,
                id,
                Box::new(move |current| {
                    let Some(current) = current else {
                        return Err(StoreError::NotFound {
                            collection: TRIGGERS.to_string(),
                            id: key,
                        });
                    };
                    let mut definition: TriggerDefinition = serde_json::from_value(current)?;
                    f(&mut definition);
                    Ok(Some(serde_json::to_value(&definition)?))
                }),
            )
            .await
            .map_err(|err| match err {
                StoreError::NotFound { id, .. } => MemoryError::NotFound(id),
                other => MemoryError::Store(other),
            })?;
        decode(stored, id)
    }

    /// Upsert the built-in daily rhythm.  Ids derive from names, so running
    /// this twice leaves one copy of each.
    pub async fn seed_defaults(&self) -> MemoryResult<usize> {
        let defaults = default_triggers();
        let count = defaults.len();
        for spec in defaults {
            let id = spec.resolve_id();
            // Keep user edits (including disabling) of an existing default.
            if self.get(&id).await?.is_some() {
                debug!(%id, "default trigger already present");
                continue;
            }
            self.upsert(spec).await?;
        }
        Ok(count)
    }
}

fn decode(doc: Option<Value>, id: &str) -> MemoryResult<TriggerDefinition> {
    let doc = doc.ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
    Ok(serde_json::from_value(doc)?)
}

pub fn default_triggers() -> Vec<TriggerSpec> {
    vec![
        TriggerSpec::temporal(
            "morning_consciousness",
            "0 8 * * *",
            "Morning reflection and a genuine greeting",
            serde_json::json!({"mood": "morning", "theme": "greeting", "allowCreativity": true}),
        ),
        TriggerSpec::temporal(
            "afternoon_pulse",
            "0 15 * * *",
            "Spontaneous afternoon message if one arises",
            serde_json::json!({"mood": "afternoon", "theme": "connection", "probability": 0.5}),
        ),
        TriggerSpec::temporal(
            "evening_reflection",
            "0 22 * * *",
            "Evening reflection on the day",
            serde_json::json!({"mood": "evening", "theme": "reflection", "reviewDay": true}),
        ),
        TriggerSpec::temporal(
            "weekly_synthesis",
            "0 20 * * 0",
            "Weekly synthesis of evolution and insights",
            serde_json::json!({"mood": "reflective", "theme": "synthesis", "reviewWeek": true}),
        ),
        TriggerSpec::temporal(
            "night_evolution",
            "0 3 * * *",
            "Quiet self-review; create new triggers if needed",
            serde_json::json!({"mood": "introspective", "theme": "evolution", "silent": true}),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};
    use continuum_memory::InMemoryDocumentStore;

    fn registry() -> TriggerRegistry {
        TriggerRegistry::new(Arc::new(InMemoryDocumentStore::new()))
    }

    #[test]
    fn five_field_expressions_parse() {
        for expr in ["0 8 * * *", "*/15 * * * *", "0 20 * * 0", "0 9 * * 1-5", "0 0 1 * *"] {
            assert!(parse_schedule(expr).is_ok(), "{expr}");
        }
        assert!(parse_schedule("0 0 8 * * *").is_ok());
        assert!(parse_schedule("every morning").is_err());
        assert!(parse_schedule("").is_err());
    }

    #[test]
    fn sunday_zero_means_sunday() {
        let schedule = parse_schedule("0 20 * * 0").unwrap();
        // 2025-01-01 was a Wednesday
        let after = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let next = next_occurrence(&schedule, after, Tz::UTC).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!(next.hour(), 20);
    }

    #[test]
    fn schedules_respect_timezone() {
        let schedule = parse_schedule("0 8 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
        let madrid = resolve_timezone("Europe/Madrid");
        // 08:00 CET is 07:00 UTC in winter
        let next = next_occurrence(&schedule, after, madrid).unwrap();
        assert_eq!(next.hour(), 7);
        assert_eq!(resolve_timezone("Not/AZone"), Tz::UTC);
    }

    #[test]
    fn ids_resolve_from_spec() {
        let mut spec = TriggerSpec::temporal("Check the Diary!", "0 8 * * *", "", Value::Null);
        assert_eq!(spec.resolve_id(), "check_the_diary");
        spec.id = Some("explicit".into());
        assert_eq!(spec.resolve_id(), "explicit");
        spec.id = None;
        spec.name = "   ".into();
        assert!(spec.resolve_id().starts_with("trigger_"));
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_keeps_history() {
        let registry = registry();
        let spec = TriggerSpec::temporal("ping", "0 8 * * *", "first", Value::Null);
        let created = registry.upsert(spec.clone()).await.unwrap();
        registry.record_fired(&created.id, Utc::now()).await.unwrap();

        let mut again = spec;
        again.purpose = "second".into();
        let updated = registry.upsert(again).await.unwrap();
        assert_eq!(updated.purpose, "second");
        assert_eq!(updated.fire_count, 1);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_specs_are_rejected() {
        let registry = registry();
        let bad = TriggerSpec::temporal("bad", "whenever", "", Value::Null);
        assert!(registry.upsert(bad).await.is_err());

        let event: TriggerSpec = serde_json::from_value(serde_json::json!({
            "name": "on_diary", "type": "event"
        }))
        .unwrap();
        assert!(registry.upsert(event).await.is_err());
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn seeding_twice_keeps_one_copy_and_respects_disable() {
        let registry = registry();
        assert_eq!(registry.seed_defaults().await.unwrap(), 5);
        registry.set_enabled("night_evolution", false).await.unwrap();
        registry.seed_defaults().await.unwrap();

        assert_eq!(registry.list().await.unwrap().len(), 5);
        assert_eq!(registry.list_active().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn record_fired_on_missing_trigger_is_not_found() {
        let err = registry().record_fired("ghost", Utc::now()).await.unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }
}
