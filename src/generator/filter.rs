//! Allow/block list classification of traced modules.

use serde::{Deserialize, Serialize};

use crate::module::ModuleInfo;
use crate::trace::{ModuleCtx, Trace, TraceElem};

/// One configured allow/block list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListEntry {
    /// Matches every module whose class path starts with the prefix.
    Prefix(String),
    /// Matches modules of exactly this class path.
    Class(String),
}

impl ListEntry {
    fn matches(&self, info: &ModuleInfo) -> bool {
        match self {
            ListEntry::Prefix(prefix) => info.class_path.starts_with(prefix.as_str()),
            ListEntry::Class(class_path) => info.class_path == *class_path,
        }
    }
}

/// Default allowlist: the library namespaces whose modules are preserved
/// as-is.
pub fn default_allowlist() -> Vec<ListEntry> {
    vec![
        ListEntry::Prefix("nn.".to_string()),
        ListEntry::Prefix("qnn.".to_string()),
    ]
}

/// Default blocklist: pure container modules that are always decomposed.
pub fn default_blocklist() -> Vec<ListEntry> {
    vec![
        ListEntry::Class("nn.container.Sequential".to_string()),
        ListEntry::Class("nn.container.ModuleList".to_string()),
        ListEntry::Class("nn.container.ModuleDict".to_string()),
    ]
}

/// Predicates over the configured allow/block lists.
#[derive(Debug, Clone)]
pub(crate) struct ModuleFilter {
    allowlist: Vec<ListEntry>,
    blocklist: Vec<ListEntry>,
}

impl ModuleFilter {
    pub(crate) fn new(allowlist: Vec<ListEntry>, blocklist: Vec<ListEntry>) -> Self {
        ModuleFilter {
            allowlist,
            blocklist,
        }
    }

    fn in_allowlist(&self, info: &ModuleInfo) -> bool {
        self.allowlist.iter().any(|entry| entry.matches(info))
    }

    fn in_blocklist(&self, info: &ModuleInfo) -> bool {
        self.blocklist.iter().any(|entry| entry.matches(info))
    }

    /// Eligible for as-is preservation: allow-listed and not block-listed.
    /// The blocklist takes precedence.
    pub(crate) fn preserve_as_is(&self, info: &ModuleInfo) -> bool {
        self.in_allowlist(info) && !self.in_blocklist(info)
    }

    /// Scans the element's proper ancestors from innermost to outermost and
    /// returns the outermost eligible one. The accumulator is overwritten on
    /// every match so a later, more outward match wins; no short-circuiting.
    pub(crate) fn eligible_ancestor<'e>(
        &self,
        trace: &Trace,
        elem: &'e TraceElem,
    ) -> Option<&'e ModuleCtx> {
        let mut found = None;
        for ctx in elem.ancestors().iter().rev() {
            if let Some(info) = trace.module(ctx.module) {
                if self.preserve_as_is(info) {
                    found = Some(ctx);
                }
            }
        }
        found
    }
}
