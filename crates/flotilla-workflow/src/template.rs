//! Workflow templates.
//!
//! A template maps stage numbers (small, sparse, non-negative) to the
//! capability invocations a component runs in that stage. Workflow
//! builders append entries declaratively; nested sub-workflows are
//! expanded into the parent's stage sequence when the template is
//! flattened, before execution begins.

use std::collections::BTreeMap;

use semver::Version;

use crate::error::{WorkflowError, WorkflowResult};
use flotilla_core::{ComponentName, Server};

/// Keyword arguments handed to builders and invocations.
pub type Kwargs = BTreeMap<String, serde_yaml::Value>;

/// One direct capability invocation.
#[derive(Debug, Clone)]
pub struct StageEntry {
    pub capability: String,
    pub kwargs: Kwargs,
    /// When set, the component's server list is narrowed to these
    /// servers for the duration of the call.
    pub target_servers: Option<Vec<Server>>,
}

#[derive(Debug, Clone)]
enum TemplateEntry {
    Call(StageEntry),
    Sub(WorkflowTemplate),
}

/// A template under construction by a workflow builder.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    component: ComponentName,
    version: Version,
    stages: BTreeMap<u32, Vec<TemplateEntry>>,
}

impl WorkflowTemplate {
    pub fn new(component: impl Into<ComponentName>, version: Version) -> Self {
        Self {
            component: component.into(),
            version,
            stages: BTreeMap::new(),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Append a capability call to a stage.
    pub fn add_call(&mut self, stage: u32, capability: impl Into<String>, kwargs: Kwargs) {
        self.stages
            .entry(stage)
            .or_default()
            .push(TemplateEntry::Call(StageEntry {
                capability: capability.into(),
                kwargs,
                target_servers: None,
            }));
    }

    /// Append a capability call narrowed to specific servers.
    pub fn add_call_targeting(
        &mut self,
        stage: u32,
        capability: impl Into<String>,
        kwargs: Kwargs,
        targets: Vec<Server>,
    ) {
        self.stages
            .entry(stage)
            .or_default()
            .push(TemplateEntry::Call(StageEntry {
                capability: capability.into(),
                kwargs,
                target_servers: Some(targets),
            }));
    }

    /// Nest another template at a stage.
    pub fn add_sub(&mut self, stage: u32, sub: WorkflowTemplate) {
        self.stages.entry(stage).or_default().push(TemplateEntry::Sub(sub));
    }

    /// Expand sub-workflows and validate stage composition.
    pub fn flatten(self) -> WorkflowResult<FlatTemplate> {
        let mut flat: BTreeMap<u32, Vec<StageEntry>> = BTreeMap::new();
        for (stage, entries) in self.stages {
            let has_sub = entries.iter().any(|e| matches!(e, TemplateEntry::Sub(_)));
            let has_call = entries.iter().any(|e| matches!(e, TemplateEntry::Call(_)));
            if has_sub && has_call {
                return Err(WorkflowError::MixedStage {
                    component: self.component,
                    stage,
                });
            }
            let slot = flat.entry(stage).or_default();
            for entry in entries {
                match entry {
                    TemplateEntry::Call(call) => slot.push(call),
                    TemplateEntry::Sub(sub) => {
                        // Sub entries run in the sub's own stage order,
                        // merged into this single parent stage.
                        let expanded = sub.flatten()?;
                        for (_, mut calls) in expanded.stages {
                            slot.append(&mut calls);
                        }
                    }
                }
            }
        }
        Ok(FlatTemplate {
            component: self.component,
            version: self.version,
            stages: flat,
        })
    }
}

/// A fully expanded, execution-ready template.
#[derive(Debug, Clone)]
pub struct FlatTemplate {
    pub component: ComponentName,
    pub version: Version,
    pub stages: BTreeMap<u32, Vec<StageEntry>>,
}

impl FlatTemplate {
    pub fn stage_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.stages.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> WorkflowTemplate {
        WorkflowTemplate::new("tidepool", Version::new(1, 0, 0))
    }

    #[test]
    fn stages_keep_declared_entry_order() {
        let mut t = template();
        t.add_call(2, "start", Kwargs::new());
        t.add_call(0, "check", Kwargs::new());
        t.add_call(2, "probe", Kwargs::new());

        let flat = t.flatten().unwrap();
        let stages: Vec<u32> = flat.stage_numbers().collect();
        assert_eq!(stages, vec![0, 2]);
        let caps: Vec<&str> = flat.stages[&2].iter().map(|e| e.capability.as_str()).collect();
        assert_eq!(caps, vec!["start", "probe"]);
    }

    #[test]
    fn sub_workflow_expands_into_parent_stage() {
        let mut sub = template();
        sub.add_call(0, "prepare", Kwargs::new());
        sub.add_call(1, "apply", Kwargs::new());

        let mut parent = template();
        parent.add_call(0, "check", Kwargs::new());
        parent.add_sub(3, sub);

        let flat = parent.flatten().unwrap();
        let caps: Vec<&str> = flat.stages[&3].iter().map(|e| e.capability.as_str()).collect();
        assert_eq!(caps, vec!["prepare", "apply"]);
    }

    #[test]
    fn mixed_stage_rejected_at_flatten_time() {
        let mut sub = template();
        sub.add_call(0, "prepare", Kwargs::new());

        let mut parent = template();
        parent.add_call(1, "check", Kwargs::new());
        parent.add_sub(1, sub);

        let err = parent.flatten().unwrap_err();
        assert!(matches!(err, WorkflowError::MixedStage { stage: 1, .. }));
    }
}
