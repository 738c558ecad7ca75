//! Generated module tree and the descriptors it is built from.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::instruction::Instruction;
use crate::trace::{ModuleId, ValueId};

/// Static description of a traced module instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Fully-qualified class path, e.g. `nn.linear.Linear`.
    pub class_path: String,
}

impl ModuleInfo {
    pub fn new(class_path: impl Into<String>) -> Self {
        ModuleInfo {
            class_path: class_path.into(),
        }
    }
}

/// One node of the generated module tree.
///
/// Intermediate nodes created while walking a name path start as empty
/// placeholders; attaching a module at an existing placeholder fills its
/// `module` slot without disturbing children already hanging below it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleNode {
    module: Option<ModuleId>,
    children: BTreeMap<String, ModuleNode>,
}

impl ModuleNode {
    /// Walks `prefixes` from this node, creating placeholder containers as
    /// needed, then attaches `module` under `name` at the final position.
    pub fn attach(&mut self, prefixes: &[String], name: &str, module: ModuleId) {
        let mut node = self;
        for prefix in prefixes {
            node = node.children.entry(prefix.clone()).or_default();
        }
        node.children.entry(name.to_string()).or_default().module = Some(module);
    }

    /// Module attached at this node, if any.
    pub fn module(&self) -> Option<ModuleId> {
        self.module
    }

    /// Resolves a dotted path to a descendant node.
    pub fn submodule(&self, path: &str) -> Option<&ModuleNode> {
        let mut node = self;
        for segment in path.split('.') {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &ModuleNode)> {
        self.children.iter().map(|(name, node)| (name.as_str(), node))
    }

    /// Dotted names of every attached module, in tree order.
    pub fn named_modules(&self) -> Vec<(String, ModuleId)> {
        let mut out = Vec::new();
        self.collect_named("", &mut out);
        out
    }

    fn collect_named(&self, prefix: &str, out: &mut Vec<(String, ModuleId)>) {
        for (name, child) in &self.children {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            if let Some(module) = child.module {
                out.push((path.clone(), module));
            }
            child.collect_named(&path, out);
        }
    }
}

/// Artifact of one generation pass: the populated module tree, the resolved
/// instruction schedule, and the top-level model boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedModel {
    pub root: ModuleNode,
    pub schedule: Vec<Instruction>,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
}

impl GeneratedModel {
    /// Renders the schedule one instruction per line, for diagnostics.
    pub fn render_schedule(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GeneratedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in &self.schedule {
            writeln!(f, "{inst}")?;
        }
        Ok(())
    }
}
