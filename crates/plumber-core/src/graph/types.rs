//! Type inference's convertibility relation (spec.md §4.4 step 2, §9 Open
//! Question (c)).
//!
//! "Generalisation" in the type-inference relation is project-defined; the
//! core delegates to this trait rather than re-implementing subtype rules,
//! matching the external protocol-descriptor collaborator spec.md §6
//! describes.

/// Decides whether a source pipe's declared type may flow into a
/// destination pipe's declared type across an edge.
pub trait TypeResolver {
    fn convertible(&self, source: &str, destination: &str) -> bool;
}

/// The core's own minimal resolver: exact string match, plus type
/// variables (names starting with `$`, spec.md §4.4) treated as wildcards
/// on either side. A full convertibility-closure procedure over a type
/// lattice is exactly the "generalisation relation" §9 says is
/// project-defined — callers with a richer type system supply their own
/// [`TypeResolver`] instead of this one.
pub struct ExactMatchResolver;

impl TypeResolver for ExactMatchResolver {
    fn convertible(&self, source: &str, destination: &str) -> bool {
        source == destination || source.starts_with('$') || destination.starts_with('$')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_requires_equal_names() {
        assert!(ExactMatchResolver.convertible("http.request", "http.request"));
        assert!(!ExactMatchResolver.convertible("http.request", "http.response"));
    }

    #[test]
    fn type_variables_match_anything() {
        assert!(ExactMatchResolver.convertible("$t", "http.response"));
        assert!(ExactMatchResolver.convertible("http.request", "$t"));
    }
}
