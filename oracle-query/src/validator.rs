// Copyright 2025 Smoke Test Oracle Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Orchestrates a checkpoint's full validation pass: DOM, then
//! console, then visual, then any registered custom rules.

use crate::assertion::{
    AssertionEngine, AssertionResult, ConsoleValidationSpec, DomValidationSpec,
};
use crate::manager::StorageManager;
use oracle_core::{OracleError, Result, StorageRef};
use serde_json::Value;

/// A baseline for visual validation: either a resolved ref (compared
/// directly) or a bare name (never resolved — see the crate's design
/// notes on this known limitation).
#[derive(Debug, Clone)]
pub enum VisualBaseline {
    Ref(StorageRef),
    Name(String),
}

#[derive(Debug, Clone, Default)]
pub struct VisualValidationSpec {
    pub baseline: Option<VisualBaseline>,
    pub threshold: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationSpec {
    pub dom: Option<DomValidationSpec>,
    pub console: Option<ConsoleValidationSpec>,
    pub visual: Option<VisualValidationSpec>,
    pub custom: Vec<CustomRule>,
}

#[derive(Debug, Clone)]
pub struct CustomRule {
    pub name: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Default)]
pub struct CheckpointRefs {
    pub html: Option<StorageRef>,
    pub console: Option<StorageRef>,
    pub screenshot: Option<StorageRef>,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub passed: bool,
    pub results: Vec<AssertionResult>,
}

/// Host-supplied evaluator for `custom` rules. Unknown rule names are
/// rejected with `UnsupportedValidation` rather than silently skipped.
pub trait CustomValidator {
    fn evaluate(&self, rule: &CustomRule, refs: &CheckpointRefs) -> Result<AssertionResult>;
    fn supports(&self, rule_name: &str) -> bool;
}

pub struct CheckpointValidator<'a> {
    manager: &'a StorageManager,
    custom_validator: Option<&'a dyn CustomValidator>,
}

impl<'a> CheckpointValidator<'a> {
    pub fn new(manager: &'a StorageManager) -> Self {
        Self {
            manager,
            custom_validator: None,
        }
    }

    pub fn with_custom_validator(mut self, validator: &'a dyn CustomValidator) -> Self {
        self.custom_validator = Some(validator);
        self
    }

    pub fn validate(&self, def: &ValidationSpec, refs: &CheckpointRefs) -> Result<ValidationReport> {
        let engine = AssertionEngine::new(self.manager);
        let mut results = Vec::new();

        if let Some(dom_spec) = &def.dom {
            results.extend(engine.evaluate_dom_validations(dom_spec, refs.html.as_ref()));
        }

        if let Some(console_spec) = &def.console {
            results.extend(engine.evaluate_console_validations(console_spec, refs.console.as_ref()));
        }

        if let Some(visual_spec) = &def.visual {
            results.push(self.evaluate_visual(visual_spec, refs));
        }

        for rule in &def.custom {
            results.push(self.evaluate_custom(rule, refs));
        }

        let passed = results.iter().all(|r| r.passed);
        Ok(ValidationReport { passed, results })
    }

    /// Evaluates the visual rule. A comparison failure (mismatched
    /// dimensions, missing baseline, store errors) never aborts the
    /// caller's validation pass — it is reported as a failed assertion.
    fn evaluate_visual(&self, spec: &VisualValidationSpec, refs: &CheckpointRefs) -> AssertionResult {
        let Some(current) = &refs.screenshot else {
            return assertion_result("visual", false, "No screenshot reference provided");
        };

        match &spec.baseline {
            None => assertion_result("visual", false, "No baseline provided"),
            Some(VisualBaseline::Name(_)) => {
                assertion_result("visual", false, "Baseline screenshot not found")
            }
            Some(VisualBaseline::Ref(baseline)) => {
                match self.manager.compare_screenshots(
                    current,
                    baseline,
                    &oracle_storage::screenshot_store::CompareOptions {
                        threshold: Some(spec.threshold),
                        include_aa: true,
                        include_diff_image: false,
                    },
                ) {
                    Ok(summary) => {
                        let passed = summary.diff_percentage <= spec.threshold * 100.0;
                        if passed {
                            assertion_result("visual", true, format!("diff {:.2}% within threshold", summary.diff_percentage))
                        } else {
                            assertion_result("visual", false, format!("diff {:.2}% exceeds threshold", summary.diff_percentage))
                        }
                    }
                    Err(err) => assertion_result("visual", false, format!("comparison failed: {err}")),
                }
            }
        }
    }

    /// Evaluates a custom rule. An unregistered rule name or a failing
    /// evaluator is reported as a failed assertion rather than aborting
    /// the rest of the validation pass.
    fn evaluate_custom(&self, rule: &CustomRule, refs: &CheckpointRefs) -> AssertionResult {
        match self.custom_validator {
            Some(validator) if validator.supports(&rule.name) => {
                match validator.evaluate(rule, refs) {
                    Ok(result) => result,
                    Err(err) => assertion_result(&rule.name, false, format!("custom rule failed: {err}")),
                }
            }
            _ => assertion_result(
                &rule.name,
                false,
                OracleError::UnsupportedValidation(rule.name.clone()).to_string(),
            ),
        }
    }
}

fn assertion_result(rule: &str, passed: bool, message: impl Into<String>) -> AssertionResult {
    AssertionResult {
        rule: rule.to_string(),
        passed,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::ConsoleValidationSpec;
    use oracle_core::OracleConfig;
    use oracle_storage::console_store::{ConsoleEntry, Level};

    fn manager() -> (tempfile::TempDir, StorageManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = StorageManager::new(&OracleConfig::new(dir.path())).unwrap();
        manager.initialize().unwrap();
        (dir, manager)
    }

    #[test]
    fn max_errors_violation_reports_a_failed_named_assertion() {
        let (_dir, manager) = manager();
        let console_ref = manager
            .store_console(vec![
                ConsoleEntry { timestamp: 1, level: Level::Error, message: "a".into(), source: None, stack_trace: None },
                ConsoleEntry { timestamp: 2, level: Level::Error, message: "b".into(), source: None, stack_trace: None },
                ConsoleEntry { timestamp: 3, level: Level::Error, message: "c".into(), source: None, stack_trace: None },
            ])
            .unwrap();

        let validator = CheckpointValidator::new(&manager);
        let spec = ValidationSpec {
            console: Some(ConsoleValidationSpec {
                max_errors: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let refs = CheckpointRefs {
            console: Some(console_ref),
            ..Default::default()
        };
        let report = validator.validate(&spec, &refs).unwrap();
        assert!(!report.passed);
        assert!(report.results.iter().any(|r| r.rule == "max_errors" && !r.passed));
    }

    #[test]
    fn unregistered_custom_rule_is_rejected_not_skipped() {
        let (_dir, manager) = manager();
        let validator = CheckpointValidator::new(&manager);
        let spec = ValidationSpec {
            custom: vec![CustomRule {
                name: "unknown".to_string(),
                payload: Value::Null,
            }],
            ..Default::default()
        };
        let report = validator.validate(&spec, &CheckpointRefs::default()).unwrap();
        assert!(!report.passed);
        assert_eq!(report.results.len(), 1);
        assert!(!report.results[0].passed);
        assert_eq!(report.results[0].rule, "unknown");
    }

    #[test]
    fn visual_validation_failure_does_not_abort_other_results() {
        let (_dir, manager) = manager();
        let console_ref = manager
            .store_console(vec![ConsoleEntry {
                timestamp: 1,
                level: Level::Error,
                message: "boom".into(),
                source: None,
                stack_trace: None,
            }])
            .unwrap();

        let validator = CheckpointValidator::new(&manager);
        let spec = ValidationSpec {
            console: Some(ConsoleValidationSpec {
                max_errors: Some(0),
                ..Default::default()
            }),
            visual: Some(VisualValidationSpec {
                baseline: Some(VisualBaseline::Name("missing".to_string())),
                threshold: 0.01,
            }),
            ..Default::default()
        };
        let refs = CheckpointRefs {
            console: Some(console_ref),
            ..Default::default()
        };
        let report = validator.validate(&spec, &refs).unwrap();
        assert!(!report.passed);
        assert!(report.results.iter().any(|r| r.rule == "max_errors" && !r.passed));
        assert!(report.results.iter().any(|r| r.rule == "visual" && !r.passed));
    }
}
