//! Snapshots of documents and the append-only activity stream
//!
//! Every successful mutation is summarised by a single [`Activity`]: the
//! document as it looks afterwards plus a per-field `{before, after}` diff.
use crate::compare::{Comparator, FieldKind, Schema};
use crate::entity::{Entity, EntityKind};
use crate::error::EngineError;
use crate::types::{Id, TimeStamp};
use crate::user::User;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Flat field map of a document.
pub type Record = Map<String, Value>;

/// Per-field difference between two records.
pub type Change = BTreeMap<String, FieldChange>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub before: Value,
    pub after: Value,
}

impl FieldChange {
    pub fn inverted(&self) -> Self {
        Self {
            before: self.after.clone(),
            after: self.before.clone(),
        }
    }
}

/// Serialize every scalar field; relations-to-many become sorted id lists,
/// one-to-one relations are flattened into `relation.field` keys and
/// embedded sub-records into `collection.{id}.field` keys.
pub fn capture<E: Entity>(entity: &E) -> Result<Record, EngineError> {
    let Value::Object(fields) = serde_json::to_value(entity)? else {
        return Err(EngineError::Internal(format!(
            "{} does not serialize to an object",
            E::KIND
        )));
    };

    Ok(flatten(E::schema(), fields))
}

fn flatten(schema: &Schema, fields: Record) -> Record {
    let mut record = Record::new();

    for (name, value) in fields {
        match schema.kind(&name) {
            FieldKind::ToMany => {
                record.insert(name, related_ids(&value));
            }
            FieldKind::Embedded => {
                record.insert(name.clone(), related_ids(&value));
                for (id, inner) in sub_records(&value) {
                    for (sub, v) in inner {
                        if sub != "id" {
                            record.insert(format!("{name}.{id}.{sub}"), v.clone());
                        }
                    }
                }
            }
            FieldKind::OneToOne => match value {
                Value::Object(inner) => {
                    for (sub, v) in inner {
                        record.insert(format!("{name}.{sub}"), v);
                    }
                }
                other => {
                    record.insert(name, other);
                }
            },
            _ => {
                record.insert(name, value);
            }
        }
    }

    record
}

fn sub_records(value: &Value) -> Vec<(String, &Record)> {
    let Value::Array(items) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(obj) => match obj.get("id") {
                Some(Value::String(id)) => Some((id.clone(), obj)),
                Some(other) => Some((other.to_string(), obj)),
                None => None,
            },
            _ => None,
        })
        .collect()
}

fn related_ids(value: &Value) -> Value {
    let Value::Array(items) = value else {
        return Value::Array(Vec::new());
    };

    let mut ids: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj.get("id").map(|id| match id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            _ => None,
        })
        .collect();
    ids.sort();

    Value::Array(ids.into_iter().map(Value::String).collect())
}

/// Fields present in either record whose values the comparator considers
/// different. A key missing on one side reads as null.
pub fn diff(comparator: &Comparator<'_>, before: &Record, after: &Record) -> Change {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

    keys.into_iter()
        .filter_map(|key| {
            let b = before.get(key).unwrap_or(&Value::Null);
            let a = after.get(key).unwrap_or(&Value::Null);
            if comparator.equal(key, b, a) {
                None
            } else {
                Some((
                    key.clone(),
                    FieldChange {
                        before: b.clone(),
                        after: a.clone(),
                    },
                ))
            }
        })
        .collect()
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    #[n(0)]
    Create,
    #[n(1)]
    Update,
    #[n(2)]
    Delete,
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActivityAction::Create => "create",
            ActivityAction::Update => "update",
            ActivityAction::Delete => "delete",
        })
    }
}

/// Immutable record of one mutation. `data` and `change` hold JSON text so
/// the row keeps its shape even after the target is gone.
#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Activity {
    #[n(0)]
    pub id: Id,
    #[n(1)]
    pub target_content_type: String,
    #[n(2)]
    pub target_id: Id,
    #[n(3)]
    pub action: ActivityAction,
    #[n(4)]
    pub by_user: Id,
    #[n(5)]
    data: String,
    #[n(6)]
    change: String,
    #[n(7)]
    pub created: TimeStamp<Utc>,
}

impl Activity {
    pub fn data(&self) -> Result<Record, EngineError> {
        Ok(serde_json::from_str(&self.data)?)
    }
    pub fn change(&self) -> Result<Change, EngineError> {
        Ok(serde_json::from_str(&self.change)?)
    }
    pub fn kind(&self) -> Option<EntityKind> {
        EntityKind::from_tag(&self.target_content_type)
    }
    /// Digest and CBOR encoding of the row, the digest is what the store
    /// keeps to detect tampering.
    pub fn build(&self) -> Result<(String, Vec<u8>), EngineError> {
        let cbor = minicbor::to_vec(self).map_err(EngineError::encode)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

/// Build the activity row for a mutation.
///
/// `Create` carries an empty change, `Update` the diff and `Delete` keeps the
/// last known snapshot as its data.
pub fn record(
    kind: EntityKind,
    target_id: &Id,
    action: ActivityAction,
    by_user: Option<&User>,
    before: Option<&Record>,
    after: Option<&Record>,
    comparator: &Comparator<'_>,
) -> Result<Activity, EngineError> {
    let user = by_user.ok_or(EngineError::Anonymous)?;
    let empty = Record::new();

    let (data, change) = match action {
        ActivityAction::Create => (after.unwrap_or(&empty), Change::new()),
        ActivityAction::Update => (
            after.unwrap_or(&empty),
            diff(comparator, before.unwrap_or(&empty), after.unwrap_or(&empty)),
        ),
        ActivityAction::Delete => (before.unwrap_or(&empty), Change::new()),
    };

    Ok(Activity {
        id: Id::new("act")?,
        target_content_type: kind.tag().to_string(),
        target_id: target_id.clone(),
        action,
        by_user: user.id.clone(),
        data: serde_json::to_string(data)?,
        change: serde_json::to_string(&change)?,
        created: TimeStamp::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new()
            .with(FieldKind::ToMany, &["frs", "focal_points"])
            .with(FieldKind::OneToOne, &["planned_budget"])
            .with(FieldKind::Money, &["planned_budget.unicef_cash"])
    }

    fn as_record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => Record::new(),
        }
    }

    #[test]
    fn flatten_sorts_relations_and_expands_one_to_one() {
        let schema = schema();
        let record = flatten(
            &schema,
            as_record(json!({
                "title": "Water",
                "frs": [{"id": "fr2"}, {"id": "fr1"}],
                "focal_points": ["u3", "u1"],
                "planned_budget": {"unicef_cash": "10.00", "currency": "USD"}
            })),
        );

        assert_eq!(record["frs"], json!(["fr1", "fr2"]));
        assert_eq!(record["focal_points"], json!(["u1", "u3"]));
        assert_eq!(record["planned_budget.unicef_cash"], json!("10.00"));
        assert!(!record.contains_key("planned_budget"));
    }

    #[test]
    fn embedded_records_expose_their_fields() {
        let schema = Schema::new().with(FieldKind::Embedded, &["frs"]);
        let cmp = Comparator::new(&schema, 2);
        let before = flatten(
            &schema,
            as_record(json!({"frs": [{"id": "fr1", "actual_amt": "90.00", "outstanding_amt": "10.00"}]})),
        );
        let after = flatten(
            &schema,
            as_record(json!({"frs": [{"id": "fr1", "actual_amt": "100.00", "outstanding_amt": "0.001"}]})),
        );

        assert_eq!(before["frs"], json!(["fr1"]));
        assert!(!before.contains_key("frs.fr1.id"));

        let change = diff(&cmp, &before, &after);

        assert_eq!(
            change.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["frs.fr1.actual_amt", "frs.fr1.outstanding_amt"]
        );
        assert_eq!(change["frs.fr1.actual_amt"].after, json!("100.00"));
    }

    #[test]
    fn diff_reports_changed_and_missing_fields() {
        let schema = schema();
        let cmp = Comparator::new(&schema, 2);
        let before = as_record(json!({"title": "a", "planned_budget.unicef_cash": "10", "frs": ["x"]}));
        let after = as_record(json!({"title": "b", "planned_budget.unicef_cash": "10.00", "frs": ["x", "y"], "extra": 1}));

        let change = diff(&cmp, &before, &after);

        assert_eq!(
            change.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["extra", "frs", "title"]
        );
        assert_eq!(change["frs"].after, json!(["x", "y"]));
        assert_eq!(change["extra"].before, Value::Null);
    }

    #[test]
    fn record_requires_a_user() {
        let schema = schema();
        let cmp = Comparator::new(&schema, 2);
        let result = record(
            EntityKind::Agreement,
            &Id::from("agr1"),
            ActivityAction::Create,
            None,
            None,
            Some(&Record::new()),
            &cmp,
        );

        assert!(matches!(result, Err(EngineError::Anonymous)));
    }

    #[test]
    fn delete_keeps_last_snapshot() {
        let schema = schema();
        let cmp = Comparator::new(&schema, 2);
        let user = User::unicef(Id::from("user1"), "Focal Point");
        let before = as_record(json!({"title": "kept"}));

        let activity = record(
            EntityKind::Intervention,
            &Id::from("pd1"),
            ActivityAction::Delete,
            Some(&user),
            Some(&before),
            None,
            &cmp,
        )
        .unwrap();

        assert_eq!(activity.data().unwrap()["title"], json!("kept"));
        assert!(activity.change().unwrap().is_empty());
        assert_eq!(activity.target_content_type, "partners.intervention");
    }

    #[test]
    fn activity_digest_is_stable() {
        let schema = schema();
        let cmp = Comparator::new(&schema, 2);
        let user = User::unicef(Id::from("user1"), "Focal Point");
        let activity = record(
            EntityKind::Agreement,
            &Id::from("agr1"),
            ActivityAction::Create,
            Some(&user),
            None,
            Some(&Record::new()),
            &cmp,
        )
        .unwrap();

        let (first, cbor) = activity.build().unwrap();
        let (second, _) = activity.build().unwrap();
        let decoded: Activity = minicbor::decode(&cbor).unwrap();

        assert_eq!(first, second);
        assert_eq!(decoded, activity);
    }
}
