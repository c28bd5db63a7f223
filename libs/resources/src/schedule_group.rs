//! Scheduler schedule group resource kind.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use provis_reconcile::{
    AttrMap, AttrValue, Attributes, ConvergenceStatus, FieldMapper, FieldSchema, ResourceKind,
};
use serde::{Deserialize, Serialize};

/// Maximum length of a schedule group name.
pub const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateScheduleGroupInput {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleGroupState {
    Active,
    Deleting,
}

/// A schedule group as returned by the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScheduleGroupOutput {
    pub arn: String,
    pub name: String,
    pub state: ScheduleGroupState,
    pub creation_date: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl ScheduleGroupOutput {
    pub fn new(arn: impl Into<String>, input: &CreateScheduleGroupInput) -> Self {
        Self {
            arn: arn.into(),
            name: input.name.clone(),
            state: ScheduleGroupState::Active,
            creation_date: Utc::now(),
            tags: input.tags.clone(),
        }
    }
}

/// Tag and untag calls needed to move the remote tags to the desired set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TagChanges {
    pub tag: Vec<Tag>,
    pub untag: Vec<String>,
}

impl TagChanges {
    pub fn is_empty(&self) -> bool {
        self.tag.is_empty() && self.untag.is_empty()
    }

    pub fn apply_to(&self, tags: &mut Vec<Tag>) {
        tags.retain(|t| !self.untag.contains(&t.key) && !self.tag.iter().any(|n| n.key == t.key));
        tags.extend(self.tag.iter().cloned());
        tags.sort();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleGroupSpec {
    pub name: String,
    pub tags: BTreeMap<String, String>,
}

impl ScheduleGroupSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

impl Attributes for ScheduleGroupSpec {
    fn to_attrs(&self) -> AttrMap {
        let mut attrs = AttrMap::new();
        attrs.insert("name".to_string(), self.name.as_str().into());
        if !self.tags.is_empty() {
            attrs.insert(
                "tags".to_string(),
                AttrValue::Map(
                    self.tags
                        .iter()
                        .map(|(k, v)| (k.clone(), AttrValue::from(v.as_str())))
                        .collect(),
                ),
            );
        }
        attrs
    }
}

fn tags_to_wire(tags: &BTreeMap<String, String>) -> Vec<Tag> {
    tags.iter()
        .map(|(key, value)| Tag {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}

/// The schedule group resource kind.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleGroup;

const SCHEMA: &[FieldSchema] = &[
    FieldSchema::immutable("name"),
    FieldSchema::mutable("tags"),
];

impl FieldMapper for ScheduleGroup {
    type Spec = ScheduleGroupSpec;
    type Request = CreateScheduleGroupInput;
    type Object = ScheduleGroupOutput;

    fn to_wire(spec: &ScheduleGroupSpec) -> CreateScheduleGroupInput {
        CreateScheduleGroupInput {
            name: spec.name.clone(),
            tags: tags_to_wire(&spec.tags),
        }
    }

    fn from_wire(object: &ScheduleGroupOutput) -> ScheduleGroupSpec {
        ScheduleGroupSpec {
            name: object.name.clone(),
            tags: object
                .tags
                .iter()
                .map(|t| (t.key.clone(), t.value.clone()))
                .collect(),
        }
    }
}

impl ResourceKind for ScheduleGroup {
    type Patch = TagChanges;

    const NAME: &'static str = "scheduler_schedule_group";

    fn schema() -> &'static [FieldSchema] {
        SCHEMA
    }

    fn to_patch(
        desired: &ScheduleGroupSpec,
        current: &ScheduleGroupOutput,
        changed: &BTreeSet<String>,
    ) -> TagChanges {
        if !changed.contains("tags") {
            return TagChanges::default();
        }

        let tag = desired
            .tags
            .iter()
            .filter(|(k, v)| !current.tags.iter().any(|t| &t.key == *k && &t.value == *v))
            .map(|(k, v)| Tag {
                key: k.clone(),
                value: v.clone(),
            })
            .collect();
        let untag = current
            .tags
            .iter()
            .filter(|t| !desired.tags.contains_key(&t.key))
            .map(|t| t.key.clone())
            .collect();
        TagChanges { tag, untag }
    }

    fn validate(spec: &ScheduleGroupSpec) -> Result<(), String> {
        if spec.name.is_empty() || spec.name.len() > MAX_NAME_LEN {
            return Err(format!("name must be 1 to {MAX_NAME_LEN} characters"));
        }
        if !spec
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(format!("name '{}' contains invalid characters", spec.name));
        }
        Ok(())
    }

    fn create_status(object: &ScheduleGroupOutput) -> ConvergenceStatus {
        match object.state {
            ScheduleGroupState::Active => ConvergenceStatus::Converged,
            ScheduleGroupState::Deleting => {
                ConvergenceStatus::Diverged("schedule group is being deleted".to_string())
            }
        }
    }

    fn is_deleted(object: &ScheduleGroupOutput) -> bool {
        object.state == ScheduleGroupState::Deleting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provis_reconcile::diff_attrs;

    fn output(spec: &ScheduleGroupSpec) -> ScheduleGroupOutput {
        ScheduleGroupOutput::new(
            format!("arn:aws:scheduler:us-east-1:123456789012:schedule-group/{}", spec.name),
            &ScheduleGroup::to_wire(spec),
        )
    }

    #[test]
    fn test_round_trip() {
        let spec = ScheduleGroupSpec::new("nightly")
            .with_tag("env", "prod")
            .with_tag("team", "ops");
        assert_eq!(ScheduleGroup::from_wire(&output(&spec)), spec);
    }

    #[test]
    fn test_wire_shape() {
        let spec = ScheduleGroupSpec::new("nightly").with_tag("env", "prod");
        let json = serde_json::to_value(output(&spec)).unwrap();

        assert_eq!(json["Name"], "nightly");
        assert_eq!(json["State"], "ACTIVE");
        assert_eq!(json["Tags"][0]["Key"], "env");
    }

    #[test]
    fn test_tag_order_is_irrelevant() {
        let spec = ScheduleGroupSpec::new("nightly")
            .with_tag("a", "1")
            .with_tag("b", "2");
        let mut remote = output(&spec);
        remote.tags.reverse();

        let diff = diff_attrs(
            SCHEMA,
            &ScheduleGroup::from_wire(&remote).to_attrs(),
            &spec.to_attrs(),
        );
        assert!(diff.is_empty());
    }

    #[test]
    fn test_rename_is_immutable() {
        let current = ScheduleGroupSpec::new("nightly");
        let desired = ScheduleGroupSpec::new("weekly");

        let diff = diff_attrs(SCHEMA, &current.to_attrs(), &desired.to_attrs());
        assert!(diff.has_immutable());
    }

    #[test]
    fn test_to_patch_tag_changes() {
        let current = output(
            &ScheduleGroupSpec::new("nightly")
                .with_tag("env", "dev")
                .with_tag("owner", "alice"),
        );
        let desired = ScheduleGroupSpec::new("nightly")
            .with_tag("env", "prod")
            .with_tag("team", "ops");
        let changed = BTreeSet::from(["tags".to_string()]);

        let patch = ScheduleGroup::to_patch(&desired, &current, &changed);

        assert_eq!(patch.untag, vec!["owner".to_string()]);
        assert_eq!(patch.tag.len(), 2);

        let mut tags = current.tags.clone();
        patch.apply_to(&mut tags);
        let applied = ScheduleGroup::from_wire(&ScheduleGroupOutput { tags, ..current });
        assert_eq!(applied.tags, desired.tags);
    }

    #[test]
    fn test_removing_all_tags() {
        let current = output(&ScheduleGroupSpec::new("nightly").with_tag("env", "dev"));
        let desired = ScheduleGroupSpec::new("nightly");

        let diff = diff_attrs(SCHEMA, &ScheduleGroup::from_wire(&current).to_attrs(), &desired.to_attrs());
        assert!(diff.mutable.contains("tags"));

        let patch = ScheduleGroup::to_patch(&desired, &current, &diff.mutable);
        assert_eq!(patch.untag, vec!["env".to_string()]);
        assert!(patch.tag.is_empty());
    }

    #[test]
    fn test_validate_name() {
        assert!(ScheduleGroup::validate(&ScheduleGroupSpec::new("nightly-jobs_1.0")).is_ok());
        assert!(ScheduleGroup::validate(&ScheduleGroupSpec::new("")).is_err());
        assert!(ScheduleGroup::validate(&ScheduleGroupSpec::new("has space")).is_err());
        assert!(ScheduleGroup::validate(&ScheduleGroupSpec::new("x".repeat(65))).is_err());
    }

    #[test]
    fn test_deleting_state() {
        let mut remote = output(&ScheduleGroupSpec::new("nightly"));
        assert!(ScheduleGroup::create_status(&remote).is_converged());

        remote.state = ScheduleGroupState::Deleting;
        assert!(ScheduleGroup::is_deleted(&remote));
        assert!(matches!(
            ScheduleGroup::create_status(&remote),
            ConvergenceStatus::Diverged(_)
        ));
    }
}
