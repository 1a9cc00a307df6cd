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

//! DOM and console rule evaluation. A bad rule (invalid selector or
//! regex) fails only that rule's [`AssertionResult`]; it never aborts
//! the rest of the pass.

use crate::manager::StorageManager;
use oracle_core::StorageRef;
use oracle_storage::console_store::Level;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Exact,
    #[default]
    Contains,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CountOp {
    #[default]
    Equal,
    Gt,
    Lt,
    Gte,
    Lte,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextContentRule {
    pub selector: String,
    pub text: String,
    #[serde(default)]
    pub r#match: MatchMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeRule {
    pub selector: String,
    pub attribute: String,
    pub value: String,
    #[serde(default)]
    pub r#match: MatchMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountRule {
    pub selector: String,
    pub count: usize,
    #[serde(default)]
    pub operator: CountOp,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DomValidationSpec {
    #[serde(default)]
    pub exists: Vec<String>,
    #[serde(default)]
    pub not_exists: Vec<String>,
    #[serde(default)]
    pub visible: Vec<String>,
    #[serde(default)]
    pub hidden: Vec<String>,
    #[serde(default)]
    pub text_content: Vec<TextContentRule>,
    #[serde(default)]
    pub attributes: Vec<AttributeRule>,
    #[serde(default)]
    pub count: Vec<CountRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedMessageRule {
    pub level: Level,
    pub text: String,
    #[serde(default)]
    pub r#match: MatchMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForbiddenMessageRule {
    pub level: Option<Level>,
    pub text: String,
    #[serde(default)]
    pub r#match: MatchMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConsoleValidationSpec {
    pub max_errors: Option<usize>,
    pub max_warnings: Option<usize>,
    #[serde(default)]
    pub expected_messages: Vec<ExpectedMessageRule>,
    #[serde(default)]
    pub forbidden_messages: Vec<ForbiddenMessageRule>,
}

#[derive(Debug, Clone)]
pub struct AssertionResult {
    pub rule: String,
    pub passed: bool,
    pub message: String,
}

impl AssertionResult {
    fn pass(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            passed: true,
            message: message.into(),
        }
    }

    fn fail(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            passed: false,
            message: message.into(),
        }
    }
}

pub struct AssertionEngine<'a> {
    manager: &'a StorageManager,
}

impl<'a> AssertionEngine<'a> {
    pub fn new(manager: &'a StorageManager) -> Self {
        Self { manager }
    }

    pub fn evaluate_dom_validations(
        &self,
        spec: &DomValidationSpec,
        html_ref: Option<&StorageRef>,
    ) -> Vec<AssertionResult> {
        let Some(html_ref) = html_ref else {
            return vec![AssertionResult::fail("dom", "No html reference provided")];
        };
        let Ok(html) = self.manager.retrieve_dom(html_ref) else {
            return vec![AssertionResult::fail("dom", "No html reference provided")];
        };
        let document = Html::parse_document(&html);

        let mut results = Vec::new();

        for selector in &spec.exists {
            results.push(eval_exists(&document, selector, true));
        }
        for selector in &spec.not_exists {
            results.push(eval_exists(&document, selector, false));
        }
        for selector in &spec.visible {
            results.push(eval_visibility(&document, selector, true));
        }
        for selector in &spec.hidden {
            results.push(eval_visibility(&document, selector, false));
        }
        for rule in &spec.text_content {
            results.push(eval_text_content(&document, rule));
        }
        for rule in &spec.attributes {
            results.push(eval_attribute(&document, rule));
        }
        for rule in &spec.count {
            results.push(eval_count(&document, rule));
        }

        results
    }

    pub fn evaluate_console_validations(
        &self,
        spec: &ConsoleValidationSpec,
        console_ref: Option<&StorageRef>,
    ) -> Vec<AssertionResult> {
        let Some(console_ref) = console_ref else {
            return vec![AssertionResult::fail("console", "No console reference provided")];
        };
        let Ok(entries) = self.manager.retrieve_console(console_ref) else {
            return vec![AssertionResult::fail("console", "No console reference provided")];
        };

        let mut results = Vec::new();
        let error_count = entries.iter().filter(|e| e.level == Level::Error).count();
        let warning_count = entries.iter().filter(|e| e.level == Level::Warn).count();

        if let Some(max) = spec.max_errors {
            results.push(if error_count <= max {
                AssertionResult::pass("max_errors", format!("{error_count} errors <= {max}"))
            } else {
                AssertionResult::fail("max_errors", format!("{error_count} errors exceeds max {max}"))
            });
        }
        if let Some(max) = spec.max_warnings {
            results.push(if warning_count <= max {
                AssertionResult::pass("max_warnings", format!("{warning_count} warnings <= {max}"))
            } else {
                AssertionResult::fail("max_warnings", format!("{warning_count} warnings exceeds max {max}"))
            });
        }

        for rule in &spec.expected_messages {
            let found = entries
                .iter()
                .filter(|e| e.level == rule.level)
                .any(|e| text_matches(&e.message, &rule.text, rule.r#match));
            results.push(if found {
                AssertionResult::pass("expected_messages", format!("found message matching {:?}", rule.text))
            } else {
                AssertionResult::fail("expected_messages", format!("no message matched {:?}", rule.text))
            });
        }

        for rule in &spec.forbidden_messages {
            let hit = entries
                .iter()
                .filter(|e| rule.level.map(|l| l == e.level).unwrap_or(true))
                .find(|e| text_matches(&e.message, &rule.text, rule.r#match));
            results.push(match hit {
                None => AssertionResult::pass("forbidden_messages", format!("no message matched {:?}", rule.text)),
                Some(e) => AssertionResult::fail(
                    "forbidden_messages",
                    format!("forbidden message found: {:?}", e.message),
                ),
            });
        }

        results
    }
}

fn parse_selector(selector: &str) -> std::result::Result<Selector, String> {
    Selector::parse(selector).map_err(|e| format!("{e:?}"))
}

fn eval_exists(document: &Html, selector: &str, want_present: bool) -> AssertionResult {
    let rule_name = if want_present { "exists" } else { "not_exists" };
    let sel = match parse_selector(selector) {
        Ok(s) => s,
        Err(reason) => return AssertionResult::fail(rule_name, format!("invalid selector {selector:?}: {reason}")),
    };
    let count = document.select(&sel).count();
    let passed = if want_present { count > 0 } else { count == 0 };
    if passed {
        AssertionResult::pass(rule_name, format!("{selector:?} matched {count} element(s)"))
    } else {
        AssertionResult::fail(rule_name, format!("{selector:?} matched {count} element(s)"))
    }
}

fn eval_visibility(document: &Html, selector: &str, want_visible: bool) -> AssertionResult {
    let rule_name = if want_visible { "visible" } else { "hidden" };
    let sel = match parse_selector(selector) {
        Ok(s) => s,
        Err(reason) => return AssertionResult::fail(rule_name, format!("invalid selector {selector:?}: {reason}")),
    };
    let Some(el) = document.select(&sel).next() else {
        return AssertionResult::fail(rule_name, format!("{selector:?} matched no elements"));
    };
    let style = el.value().attr("style").unwrap_or("").to_lowercase().replace(' ', "");
    let is_hidden = style.contains("display:none") || style.contains("visibility:hidden");
    let passed = if want_visible { !is_hidden } else { is_hidden };
    if passed {
        AssertionResult::pass(rule_name, format!("{selector:?} is {}", if want_visible { "visible" } else { "hidden" }))
    } else {
        AssertionResult::fail(rule_name, format!("{selector:?} is not {}", if want_visible { "visible" } else { "hidden" }))
    }
}

fn eval_text_content(document: &Html, rule: &TextContentRule) -> AssertionResult {
    let sel = match parse_selector(&rule.selector) {
        Ok(s) => s,
        Err(reason) => return AssertionResult::fail("text_content", format!("invalid selector {:?}: {reason}", rule.selector)),
    };
    let Some(el) = document.select(&sel).next() else {
        return AssertionResult::fail("text_content", format!("{:?} matched no elements", rule.selector));
    };
    let text = el.text().collect::<String>();
    match text_matches_checked(&text, &rule.text, rule.r#match) {
        Ok(true) => AssertionResult::pass("text_content", format!("{:?} text matched", rule.selector)),
        Ok(false) => AssertionResult::fail("text_content", format!("{:?} text {text:?} did not match {:?}", rule.selector, rule.text)),
        Err(reason) => AssertionResult::fail("text_content", reason),
    }
}

fn eval_attribute(document: &Html, rule: &AttributeRule) -> AssertionResult {
    let sel = match parse_selector(&rule.selector) {
        Ok(s) => s,
        Err(reason) => return AssertionResult::fail("attributes", format!("invalid selector {:?}: {reason}", rule.selector)),
    };
    let Some(el) = document.select(&sel).next() else {
        return AssertionResult::fail("attributes", format!("{:?} matched no elements", rule.selector));
    };
    let Some(actual) = el.value().attr(&rule.attribute) else {
        return AssertionResult::fail("attributes", format!("missing attribute {:?}", rule.attribute));
    };
    match text_matches_checked(actual, &rule.value, rule.r#match) {
        Ok(true) => AssertionResult::pass("attributes", format!("attribute {:?} matched", rule.attribute)),
        Ok(false) => AssertionResult::fail("attributes", format!("attribute {:?} = {actual:?} did not match {:?}", rule.attribute, rule.value)),
        Err(reason) => AssertionResult::fail("attributes", reason),
    }
}

fn eval_count(document: &Html, rule: &CountRule) -> AssertionResult {
    let sel = match parse_selector(&rule.selector) {
        Ok(s) => s,
        Err(reason) => return AssertionResult::fail("count", format!("invalid selector {:?}: {reason}", rule.selector)),
    };
    let actual = document.select(&sel).count();
    let passed = match rule.operator {
        CountOp::Equal => actual == rule.count,
        CountOp::Gt => actual > rule.count,
        CountOp::Lt => actual < rule.count,
        CountOp::Gte => actual >= rule.count,
        CountOp::Lte => actual <= rule.count,
    };
    if passed {
        AssertionResult::pass("count", format!("{:?} matched {actual} element(s)", rule.selector))
    } else {
        AssertionResult::fail("count", format!("{:?} matched {actual} element(s), expected {:?} {}", rule.selector, rule.operator, rule.count))
    }
}

fn text_matches(haystack: &str, needle: &str, mode: MatchMode) -> bool {
    text_matches_checked(haystack, needle, mode).unwrap_or(false)
}

fn text_matches_checked(haystack: &str, needle: &str, mode: MatchMode) -> std::result::Result<bool, String> {
    match mode {
        MatchMode::Exact => Ok(haystack == needle),
        MatchMode::Contains => Ok(haystack.contains(needle)),
        MatchMode::Regex => {
            let re = Regex::new(needle).map_err(|e| format!("invalid regex {needle:?}: {e}"))?;
            Ok(re.is_match(haystack))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_core::OracleConfig;

    fn manager_with_html(html: &str) -> (tempfile::TempDir, StorageManager, StorageRef) {
        let dir = tempfile::tempdir().unwrap();
        let manager = StorageManager::new(&OracleConfig::new(dir.path())).unwrap();
        manager.initialize().unwrap();
        let ref_ = manager.store_dom(html).unwrap();
        (dir, manager, ref_)
    }

    #[test]
    fn exists_and_count_rules_evaluate_against_stored_dom() {
        let (_dir, manager, ref_) =
            manager_with_html("<html><body><p>A</p><p>B</p></body></html>");
        let engine = AssertionEngine::new(&manager);
        let spec = DomValidationSpec {
            exists: vec!["p".to_string()],
            count: vec![CountRule {
                selector: "p".to_string(),
                count: 2,
                operator: CountOp::Equal,
            }],
            ..Default::default()
        };
        let results = engine.evaluate_dom_validations(&spec, Some(&ref_));
        assert!(results.iter().all(|r| r.passed));
    }

    #[test]
    fn missing_html_ref_yields_single_explicit_failure() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StorageManager::new(&OracleConfig::new(dir.path())).unwrap();
        manager.initialize().unwrap();
        let engine = AssertionEngine::new(&manager);
        let results = engine.evaluate_dom_validations(&DomValidationSpec::default(), None);
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
    }

    #[test]
    fn invalid_regex_fails_only_that_rule() {
        let (_dir, manager, ref_) = manager_with_html("<html><body><p>A</p></body></html>");
        let engine = AssertionEngine::new(&manager);
        let spec = DomValidationSpec {
            exists: vec!["p".to_string()],
            text_content: vec![TextContentRule {
                selector: "p".to_string(),
                text: "(".to_string(),
                r#match: MatchMode::Regex,
            }],
            ..Default::default()
        };
        let results = engine.evaluate_dom_validations(&spec, Some(&ref_));
        assert!(results[0].passed);
        assert!(!results[1].passed);
    }
}
