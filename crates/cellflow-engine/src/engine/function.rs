//! User-authored functions.
//!
//! A [`Function`] owns its canonical script text and everything derived from
//! it: the extracted dependencies, a content fingerprint, and the compiled
//! callable. Editing the script re-extracts immediately and drops the
//! compiled form; compilation happens lazily on the next run, and only once
//! extraction has settled on the current text.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{AssertUnwindSafe, catch_unwind};

use super::Dynamic;
use super::collection_ref::CollectionReference;
use super::deps::{CollectionAccess, extract_dependencies};
use super::eval::{Compiled, Invocation, ScriptHost};
use super::location::{Location, LocationReference};
use super::rewrite::{canonicalize_script, symbolize_script};
use crate::error::RunError;

/// What the caller expects a function to produce. Informational only; the
/// host does not coerce results.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ReturnType {
    #[default]
    Any,
    Text,
    Number,
    Bool,
    SortKey,
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum FunctionState {
    /// Script changed; dependencies not yet extracted.
    Stale,
    Extracting,
    ExtractedOnly,
    Compiled,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CompileOutcome {
    Pending,
    Succeeded,
    Failed(String),
}

/// Content hash of a script's text.
pub fn fingerprint(script: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    script.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug)]
pub struct Function {
    namespace: String,
    name: String,
    script: String,
    return_type: ReturnType,
    state: FunctionState,
    compiled: Option<Compiled>,
    outcome: CompileOutcome,
    locations: Vec<LocationReference>,
    collections: Vec<CollectionReference>,
    fingerprint: u64,
    extracted_fingerprint: Option<u64>,
}

impl Function {
    /// Create a function from canonical script text and extract its dependencies.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        script: impl Into<String>,
    ) -> Function {
        let script = script.into();
        let mut function = Function {
            namespace: namespace.into(),
            name: name.into(),
            fingerprint: fingerprint(&script),
            script,
            return_type: ReturnType::Any,
            state: FunctionState::Stale,
            compiled: None,
            outcome: CompileOutcome::Pending,
            locations: Vec::new(),
            collections: Vec::new(),
            extracted_fingerprint: None,
        };
        function.extract();
        function
    }

    pub fn with_return_type(mut self, return_type: ReturnType) -> Function {
        self.return_type = return_type;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }

    pub fn state(&self) -> FunctionState {
        self.state
    }

    pub fn compile_outcome(&self) -> &CompileOutcome {
        &self.outcome
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn location_dependencies(&self) -> &[LocationReference] {
        &self.locations
    }

    pub fn collection_dependencies(&self) -> &[CollectionReference] {
        &self.collections
    }

    pub fn collection_dependencies_mut(&mut self) -> &mut [CollectionReference] {
        &mut self.collections
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_return_type(&mut self, return_type: ReturnType) {
        self.return_type = return_type;
    }

    /// Replace the canonical script. Returns true when the extracted
    /// dependency set changed.
    pub fn set_script(&mut self, script: impl Into<String>) -> bool {
        let script = script.into();
        if script == self.script && self.extracted_fingerprint == Some(self.fingerprint) {
            return false;
        }
        self.script = script;
        self.fingerprint = fingerprint(&self.script);
        self.compiled = None;
        self.outcome = CompileOutcome::Pending;
        self.state = FunctionState::Stale;
        self.extract()
    }

    /// Replace the script from text authored relative to `anchor`.
    pub fn set_script_from_symbolic(&mut self, text: &str, anchor: &Location) -> bool {
        self.set_script(canonicalize_script(text, anchor))
    }

    /// The script as it reads from `anchor`.
    pub fn symbolic_script(&self, anchor: &Location) -> String {
        symbolize_script(&self.script, anchor)
    }

    /// Re-extract if the stamped fingerprint no longer matches the text.
    pub fn refresh_dependencies(&mut self) -> bool {
        if self.extracted_fingerprint == Some(self.fingerprint) {
            return false;
        }
        self.extract()
    }

    fn collection_accesses(&self) -> Vec<CollectionAccess> {
        self.collections.iter().map(CollectionReference::access).collect()
    }

    /// Update collection references in place, position by position, so
    /// their invalidation subscribers stay attached.
    fn retarget_collections(&mut self, accesses: &[CollectionAccess]) {
        self.collections.truncate(accesses.len());
        for (index, access) in accesses.iter().enumerate() {
            match self.collections.get_mut(index) {
                Some(reference) => {
                    if !reference.retarget(access) {
                        *reference = CollectionReference::from_access(access);
                    }
                }
                None => self.collections.push(CollectionReference::from_access(access)),
            }
        }
    }

    fn extract(&mut self) -> bool {
        self.state = FunctionState::Extracting;
        let stamped = self.fingerprint;
        let deps = extract_dependencies(&self.script);

        let changed =
            deps.locations != self.locations || deps.collections != self.collection_accesses();
        if changed {
            self.locations = deps.locations;
            self.retarget_collections(&deps.collections);
        }

        self.extracted_fingerprint = Some(stamped);
        self.state = FunctionState::ExtractedOnly;
        changed
    }

    /// Compile now. Deferred (outcome left `Pending`) while extraction
    /// has not caught up with the current text.
    pub fn compile(&mut self, host: &dyn ScriptHost) -> &CompileOutcome {
        if self.extracted_fingerprint != Some(self.fingerprint) {
            log::debug!("deferring compile of {}::{}", self.namespace, self.name);
            return &self.outcome;
        }
        match host.compile(&self.script) {
            Ok(compiled) => {
                self.compiled = Some(compiled);
                self.outcome = CompileOutcome::Succeeded;
                self.state = FunctionState::Compiled;
            }
            Err(message) => {
                self.compiled = None;
                self.outcome = CompileOutcome::Failed(message);
                self.state = FunctionState::ExtractedOnly;
            }
        }
        &self.outcome
    }

    fn ensure_compiled(&mut self, host: &dyn ScriptHost) {
        if self.compiled.is_none() && self.outcome == CompileOutcome::Pending {
            self.refresh_dependencies();
            self.compile(host);
        }
    }

    /// Run with the cell-bound convention.
    pub fn run_for_cell(
        &mut self,
        host: &dyn ScriptHost,
        anchor: &Location,
    ) -> Result<Dynamic, RunError> {
        self.run(host, &Invocation::Cell { anchor })
    }

    /// Run with the sort/filter convention.
    pub fn run_indexed(
        &mut self,
        host: &dyn ScriptHost,
        items: &rhai::Array,
        index: usize,
    ) -> Result<Dynamic, RunError> {
        self.run(host, &Invocation::Indexed { items, index })
    }

    fn run(&mut self, host: &dyn ScriptHost, invocation: &Invocation<'_>) -> Result<Dynamic, RunError> {
        self.ensure_compiled(host);
        if let CompileOutcome::Failed(message) = &self.outcome {
            return Err(RunError::Compile(message.clone()));
        }
        let Some(compiled) = &self.compiled else {
            return Err(RunError::Compile(format!(
                "{}::{} is not compiled",
                self.namespace, self.name
            )));
        };

        match catch_unwind(AssertUnwindSafe(|| host.invoke(compiled, invocation))) {
            Ok(result) => result.map_err(RunError::Fault),
            Err(payload) => Err(RunError::Fault(panic_message(payload.as_ref()))),
        }
    }

    /// Location dependencies resolved against `anchor`. References larger
    /// than `max_cells` are skipped.
    pub fn resolved_locations(&self, anchor: &Location, max_cells: usize) -> Vec<Location> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for reference in &self.locations {
            match reference.resolve_limited(anchor, max_cells) {
                Some(locations) => {
                    for location in locations {
                        if seen.insert(location.clone()) {
                            out.push(location);
                        }
                    }
                }
                None => log::warn!(
                    "{}::{}: reference spans more than {} cells, not subscribing",
                    self.namespace,
                    self.name,
                    max_cells
                ),
            }
        }
        out
    }

    /// Names of the collections this function reads when run from `anchor`.
    /// Dynamic names that evaluate to `""` are dropped.
    pub fn collection_names(&mut self, host: &dyn ScriptHost, anchor: &Location) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for reference in self.collections.iter_mut() {
            let name = reference.collection_name(host, anchor);
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "script host panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::eval::RhaiHost;
    use crate::engine::location::{Axis, SheetRef};

    #[test]
    fn test_new_function_extracts_dependencies() {
        let f = Function::new("cells", "f", "CELL(ANCHOR_SHEET, ANCHOR_ROW + 1, ANCHOR_COL + 0).Text");
        assert_eq!(f.state(), FunctionState::ExtractedOnly);
        assert_eq!(
            f.location_dependencies(),
            &[LocationReference::cell(SheetRef::Anchor, Axis::Relative(1), Axis::Relative(0))]
        );
        assert_eq!(f.compile_outcome(), &CompileOutcome::Pending);
    }

    #[test]
    fn test_set_script_reports_dependency_changes() {
        let mut f = Function::new("cells", "f", "1 + 1");
        assert!(!f.set_script("1 + 1"));
        assert!(!f.set_script("2 + 2"));
        assert!(f.set_script("CELL(ANCHOR_SHEET, 1, 1).Value"));
        assert!(!f.set_script("CELL(ANCHOR_SHEET, 1, 1).Value + 1"));
        assert!(f.set_script("COLLECTION(\"Tasks\").len()"));
    }

    #[test]
    fn test_lazy_compile_and_run() {
        let host = RhaiHost::new();
        host.set_cell_text(&Location::new("S", 2, 1), "World");
        let mut f = Function::new("cells", "f", "");
        f.set_script_from_symbolic("return \"Hello\" + A2.Text;", &Location::new("S", 1, 1));
        assert_eq!(f.state(), FunctionState::ExtractedOnly);

        let value = f.run_for_cell(&host, &Location::new("S", 1, 1)).unwrap();
        assert_eq!(value.into_string().unwrap(), "HelloWorld");
        assert_eq!(f.state(), FunctionState::Compiled);
        assert_eq!(f.compile_outcome(), &CompileOutcome::Succeeded);
    }

    #[test]
    fn test_compile_failure_is_cached() {
        let host = RhaiHost::new();
        let mut f = Function::new("cells", "broken", "let = ;");
        let anchor = Location::new("S", 1, 1);
        assert!(matches!(f.run_for_cell(&host, &anchor), Err(RunError::Compile(_))));
        assert!(matches!(f.compile_outcome(), CompileOutcome::Failed(_)));
        assert!(matches!(f.run_for_cell(&host, &anchor), Err(RunError::Compile(_))));

        f.set_script("40 + 2");
        assert_eq!(f.run_for_cell(&host, &anchor).unwrap().as_int().unwrap(), 42);
    }

    #[test]
    fn test_runtime_fault() {
        let host = RhaiHost::new();
        let mut f = Function::new("cells", "f", "throw \"boom\"");
        let result = f.run_for_cell(&host, &Location::new("S", 1, 1));
        assert!(matches!(result, Err(RunError::Fault(message)) if message.contains("boom")));
    }

    #[test]
    fn test_panicking_host_becomes_fault() {
        struct PanicHost;
        impl ScriptHost for PanicHost {
            fn compile(&self, _source: &str) -> Result<Compiled, String> {
                Ok(Compiled::new(rhai::AST::empty()))
            }
            fn invoke(&self, _: &Compiled, _: &Invocation<'_>) -> Result<Dynamic, String> {
                panic!("host exploded");
            }
        }

        let mut f = Function::new("cells", "f", "1");
        let result = f.run_for_cell(&PanicHost, &Location::new("S", 1, 1));
        assert!(matches!(result, Err(RunError::Fault(message)) if message == "host exploded"));
    }

    #[test]
    fn test_run_indexed() {
        let host = RhaiHost::new();
        let mut f = Function::new("collections", "key", "-ITEM").with_return_type(ReturnType::SortKey);
        let items: rhai::Array = vec![Dynamic::from(3_i64), Dynamic::from(5_i64)];
        assert_eq!(f.run_indexed(&host, &items, 1).unwrap().as_int().unwrap(), -5);
    }

    #[test]
    fn test_symbolic_script_follows_anchor() {
        let f = Function::new("cells", "f", "CELL(ANCHOR_SHEET, ANCHOR_ROW + 1, ANCHOR_COL + 0).Text");
        assert_eq!(f.symbolic_script(&Location::new("S", 1, 1)), "A2.Text");
        assert_eq!(f.symbolic_script(&Location::new("S", 4, 2)), "B5.Text");
    }

    #[test]
    fn test_resolved_locations() {
        let f = Function::new("cells", "f", "SUM(RANGE(ANCHOR_SHEET, 1, 1, 2, 1))");
        assert_eq!(
            f.resolved_locations(&Location::new("S", 5, 5), 100),
            vec![Location::new("S", 1, 1), Location::new("S", 2, 1)]
        );
        assert!(f.resolved_locations(&Location::new("S", 5, 5), 1).is_empty());
    }

    #[test]
    fn test_script_change_keeps_dynamic_reference_subscribers() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut f = Function::new(
            "cells",
            "f",
            "COLLECTION(CELL(ANCHOR_SHEET, 1, 1).Text).len()",
        );
        let fired = Rc::new(RefCell::new(Vec::new()));
        let sink = fired.clone();
        let id = f.collection_dependencies_mut()[0]
            .on_invalidated(move |e| sink.borrow_mut().push(e.locations.clone()))
            .unwrap();

        assert!(f.set_script("COLLECTION(CELL(ANCHOR_SHEET, 2, 1).Text).len()"));
        assert_eq!(fired.borrow().len(), 1);
        assert_eq!(
            fired.borrow()[0],
            vec![LocationReference::cell(
                SheetRef::Anchor,
                Axis::Absolute(2),
                Axis::Absolute(1)
            )]
        );

        f.set_script("COLLECTION(CELL(ANCHOR_SHEET, 2, 1).Text).len() + 1");
        assert_eq!(fired.borrow().len(), 1);
        assert!(f.collection_dependencies_mut()[0].unsubscribe(id));

        f.set_script("COLLECTION(\"Tasks\").len()");
        assert!(!f.collection_dependencies()[0].is_dynamic());
    }

    #[test]
    fn test_resolved_locations_drop_non_adjacent_repeats() {
        let f = Function::new(
            "cells",
            "f",
            "SUM(RANGE(ANCHOR_SHEET, 1, 1, 2, 1)) + CELL(ANCHOR_SHEET, 3, 1).Value + CELL(ANCHOR_SHEET, 1, 1).Value",
        );
        assert_eq!(
            f.resolved_locations(&Location::new("S", 5, 5), 100),
            vec![
                Location::new("S", 1, 1),
                Location::new("S", 2, 1),
                Location::new("S", 3, 1)
            ]
        );
    }
}
