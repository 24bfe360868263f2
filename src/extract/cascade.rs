//! Ordered pattern cascades
//!
//! A cascade is a list of independent strategies tried in declaration
//! order. The first strategy whose pattern matches *and* whose converter
//! accepts the capture wins; later strategies are never evaluated.

use regex::Regex;

use crate::error::{Error, Result};

/// Turns a captured string into a field value. `None` means "no match".
pub type Converter<T> = fn(&str) -> Option<T>;

/// One matcher in a cascade
pub struct Strategy<T> {
    name: &'static str,
    pattern: Regex,
    convert: Converter<T>,
}

impl<T> Strategy<T> {
    pub fn new(name: &'static str, pattern: &str, convert: Converter<T>) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::InvalidRegex(format!("{}: {}", name, e)))?;
        Ok(Self {
            name,
            pattern,
            convert,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Try this strategy alone. Uses the first capture group when the
    /// pattern has one, otherwise the whole match.
    pub fn try_match(&self, text: &str) -> Option<T> {
        let caps = self.pattern.captures(text)?;
        let captured = caps.get(1).or_else(|| caps.get(0))?;
        (self.convert)(captured.as_str())
    }
}

/// Value produced by a cascade together with the strategy that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeMatch<T> {
    pub value: T,
    pub strategy: &'static str,
}

/// Ordered list of strategies for one field
pub struct Cascade<T> {
    field: &'static str,
    strategies: Vec<Strategy<T>>,
}

impl<T> Cascade<T> {
    pub fn new(field: &'static str) -> Self {
        Self {
            field,
            strategies: Vec::new(),
        }
    }

    /// Append a strategy at the lowest precedence
    pub fn with(mut self, name: &'static str, pattern: &str, convert: Converter<T>) -> Result<Self> {
        let field = self.field;
        let strategy = Strategy::new(name, pattern, convert).map_err(|e| match e {
            Error::InvalidRegex(msg) => Error::InvalidRegex(format!("{}.{}", field, msg)),
            other => other,
        })?;
        self.strategies.push(strategy);
        Ok(self)
    }

    /// Strategy names in precedence order
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// First matching strategy wins
    pub fn first_match(&self, text: &str) -> Option<CascadeMatch<T>> {
        self.strategies.iter().find_map(|strategy| {
            strategy.try_match(text).map(|value| CascadeMatch {
                value,
                strategy: strategy.name(),
            })
        })
    }

    /// First match or the field's neutral value
    pub fn value_or(&self, text: &str, default: T) -> T {
        self.first_match(text).map(|m| m.value).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(s: &str) -> Option<u64> {
        s.parse().ok()
    }

    fn text(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_first_strategy_wins() {
        let cascade = Cascade::new("value")
            .with("labeled", r"value:\s*(\d+)", number)
            .unwrap()
            .with("any_number", r"(\d+)", number)
            .unwrap();

        let m = cascade.first_match("7 apples, value: 42").unwrap();
        assert_eq!(m.value, 42);
        assert_eq!(m.strategy, "labeled");

        let m = cascade.first_match("7 apples").unwrap();
        assert_eq!(m.value, 7);
        assert_eq!(m.strategy, "any_number");
    }

    #[test]
    fn test_converter_rejection_falls_through() {
        let cascade = Cascade::new("value")
            .with("labeled", r"value:\s*(\d+)", number)
            .unwrap()
            .with("word", r"word:\s*(\d+)", number)
            .unwrap();

        // Overflows u64, so the labeled strategy does not match
        let m = cascade
            .first_match("value: 99999999999999999999999 word: 5")
            .unwrap();
        assert_eq!(m.value, 5);
        assert_eq!(m.strategy, "word");
    }

    #[test]
    fn test_exhausted_cascade_uses_default() {
        let cascade = Cascade::new("value")
            .with("labeled", r"value:\s*(\d+)", number)
            .unwrap();

        assert!(cascade.first_match("nothing here").is_none());
        assert_eq!(cascade.value_or("nothing here", 0), 0);
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let result = Cascade::new("value").with("broken", r"(unclosed", number);
        assert!(matches!(result, Err(Error::InvalidRegex(msg)) if msg.starts_with("value.broken:")));
    }

    #[test]
    fn test_whole_match_without_group() {
        let cascade = Cascade::new("word").with("bare", r"[a-z]+", text).unwrap();
        assert_eq!(cascade.value_or("123 abc", String::new()), "abc");
        assert_eq!(cascade.strategy_names(), vec!["bare"]);
    }
}
