//! Kernel mapping resolution
//!
//! Picks the first [`KernelMapping`] of a Target that accepts a kernel
//! version. Resolution is pure: no I/O, same answer for the same input.

use regex::Regex;
use thiserror::Error;

use crate::cluster::KernelMapping;

/// Errors from resolving or validating kernel mappings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelMappingError {
    #[error("No kernel mapping matches kernel '{0}'")]
    NoMatchingMapping(String),

    #[error("Kernel mapping {index} has an invalid regexp '{pattern}': {reason}")]
    InvalidPattern {
        index: usize,
        pattern: String,
        reason: String,
    },

    #[error("Kernel mapping {index} must set exactly one of literal or regexp")]
    InvalidMapping { index: usize },
}

/// How one mapping decides whether it accepts a kernel
enum Matcher<'a> {
    Literal(&'a str),
    Pattern(Regex),
}

impl Matcher<'_> {
    fn matches(&self, kernel: &str) -> bool {
        match self {
            Matcher::Literal(literal) => *literal == kernel,
            Matcher::Pattern(re) => re.is_match(kernel),
        }
    }
}

fn matcher(index: usize, mapping: &KernelMapping) -> Result<Matcher<'_>, KernelMappingError> {
    match (mapping.literal.as_deref(), mapping.regexp.as_deref()) {
        (Some(literal), None) => Ok(Matcher::Literal(literal)),
        (None, Some(pattern)) => {
            // Anchored so the pattern has to cover the whole kernel string
            Regex::new(&format!("^(?:{})$", pattern))
                .map(Matcher::Pattern)
                .map_err(|e| KernelMappingError::InvalidPattern {
                    index,
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })
        }
        _ => Err(KernelMappingError::InvalidMapping { index }),
    }
}

/// Return the first mapping, in declared order, that accepts `kernel`.
///
/// Mappings are checked lazily: a malformed mapping is only reported once
/// resolution reaches it.
pub fn resolve<'a>(
    mappings: &'a [KernelMapping],
    kernel: &str,
) -> Result<&'a KernelMapping, KernelMappingError> {
    for (index, mapping) in mappings.iter().enumerate() {
        if matcher(index, mapping)?.matches(kernel) {
            return Ok(mapping);
        }
    }
    Err(KernelMappingError::NoMatchingMapping(kernel.to_string()))
}

/// Check every mapping for a well-formed literal or regexp
pub fn validate(mappings: &[KernelMapping]) -> Result<(), KernelMappingError> {
    mappings
        .iter()
        .enumerate()
        .try_for_each(|(index, mapping)| matcher(index, mapping).map(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_wins() {
        let mappings = vec![
            KernelMapping::literal("5.10.0").with_image("literal"),
            KernelMapping::regexp(r"5\..*").with_image("pattern"),
        ];

        let mapping = resolve(&mappings, "5.10.0").unwrap();
        assert_eq!(mapping.image(), Some("literal"));

        let mapping = resolve(&mappings, "5.14.0").unwrap();
        assert_eq!(mapping.image(), Some("pattern"));
    }

    #[test]
    fn test_no_match() {
        let mappings = vec![KernelMapping::literal("5.10.0")];
        assert_eq!(
            resolve(&mappings, "6.0.0"),
            Err(KernelMappingError::NoMatchingMapping("6.0.0".to_string()))
        );
    }

    #[test]
    fn test_empty_mappings() {
        assert!(matches!(
            resolve(&[], "5.14.0"),
            Err(KernelMappingError::NoMatchingMapping(_))
        ));
    }

    #[test]
    fn test_regexp_matches_whole_string() {
        let mappings = vec![KernelMapping::regexp(r"5\.14")];
        assert!(resolve(&mappings, "5.14.0-70.el9").is_err());

        let mappings = vec![KernelMapping::regexp(r"5\.14.*")];
        assert!(resolve(&mappings, "5.14.0-70.el9").is_ok());
    }

    #[test]
    fn test_alternation_is_anchored() {
        let mappings = vec![KernelMapping::regexp("5.10.0|6.1.0")];
        assert!(resolve(&mappings, "6.1.0").is_ok());
        assert!(resolve(&mappings, "6.1.0-extra").is_err());
    }

    #[test]
    fn test_literal_is_not_a_pattern() {
        let mappings = vec![KernelMapping::literal("5.1.0")];
        assert!(resolve(&mappings, "5x1x0").is_err());
    }

    #[test]
    fn test_invalid_pattern() {
        let mappings = vec![KernelMapping::regexp("5.(")];
        assert!(matches!(
            resolve(&mappings, "5.14.0"),
            Err(KernelMappingError::InvalidPattern { index: 0, .. })
        ));
    }

    #[test]
    fn test_literal_and_regexp_both_set() {
        let mut mapping = KernelMapping::literal("5.14.0");
        mapping.regexp = Some(".*".to_string());

        assert_eq!(
            validate(&[mapping]),
            Err(KernelMappingError::InvalidMapping { index: 0 })
        );
    }

    #[test]
    fn test_neither_set() {
        let mappings = vec![KernelMapping::literal("5.14.0"), KernelMapping::default()];
        assert_eq!(
            validate(&mappings),
            Err(KernelMappingError::InvalidMapping { index: 1 })
        );
        // The malformed entry is never reached for the first kernel
        assert!(resolve(&mappings, "5.14.0").is_ok());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let mappings = vec![
            KernelMapping::regexp(r".*\.el9").with_image("el9"),
            KernelMapping::regexp(r".*").with_image("any"),
        ];
        for _ in 0..3 {
            assert_eq!(
                resolve(&mappings, "5.14.0-70.el9").unwrap().image(),
                Some("el9")
            );
        }
    }
}
