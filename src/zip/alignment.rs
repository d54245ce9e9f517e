//! Alignment rules for stored entries.

use std::fmt;
use std::sync::Arc;

/// Alignment value meaning "no alignment".
pub const NO_ALIGNMENT: u64 = 1;

/// Maps an entry name to the boundary its data must start on.
///
/// A rule answers [`NO_ALIGNMENT`] when it has no opinion. Rules only apply
/// to uncompressed, non-directory entries.
///
/// # Example
///
/// ```rust
/// use apkzip::zip::AlignmentRule;
///
/// let rule = AlignmentRule::compose(vec![
///     AlignmentRule::constant_for_suffix(".so", 4096),
///     AlignmentRule::constant(4),
/// ]);
/// assert_eq!(rule.alignment("lib/arm64/libfoo.so"), 4096);
/// assert_eq!(rule.alignment("res/raw/data.bin"), 4);
/// assert_eq!(AlignmentRule::none().alignment("anything"), 1);
/// ```
#[derive(Clone, Default)]
pub enum AlignmentRule {
    /// Never aligns.
    #[default]
    None,
    /// Aligns every entry to the same boundary.
    Constant(u64),
    /// Aligns entries whose name ends with `suffix`.
    Suffix {
        /// Name suffix, compared byte for byte.
        suffix: String,
        /// Boundary for matching names.
        alignment: u64,
    },
    /// The first rule with an opinion wins.
    Compose(Vec<AlignmentRule>),
    /// Arbitrary logic.
    Custom(Arc<dyn Fn(&str) -> u64 + Send + Sync>),
}

impl AlignmentRule {
    /// A rule that never aligns.
    pub fn none() -> Self {
        AlignmentRule::None
    }

    /// Aligns every entry to `alignment` bytes. Zero behaves like one.
    pub fn constant(alignment: u64) -> Self {
        AlignmentRule::Constant(alignment.max(NO_ALIGNMENT))
    }

    /// Aligns entries ending in `suffix` to `alignment` bytes.
    pub fn constant_for_suffix(suffix: impl Into<String>, alignment: u64) -> Self {
        AlignmentRule::Suffix {
            suffix: suffix.into(),
            alignment: alignment.max(NO_ALIGNMENT),
        }
    }

    /// Tries `rules` in order and answers with the first value other than
    /// [`NO_ALIGNMENT`].
    pub fn compose(rules: Vec<AlignmentRule>) -> Self {
        AlignmentRule::Compose(rules)
    }

    /// Wraps a closure.
    pub fn custom(rule: impl Fn(&str) -> u64 + Send + Sync + 'static) -> Self {
        AlignmentRule::Custom(Arc::new(rule))
    }

    /// The alignment for `name`, at least 1.
    pub fn alignment(&self, name: &str) -> u64 {
        match self {
            AlignmentRule::None => NO_ALIGNMENT,
            AlignmentRule::Constant(alignment) => *alignment,
            AlignmentRule::Suffix { suffix, alignment } => {
                if name.ends_with(suffix.as_str()) {
                    *alignment
                } else {
                    NO_ALIGNMENT
                }
            }
            AlignmentRule::Compose(rules) => rules
                .iter()
                .map(|rule| rule.alignment(name))
                .find(|a| *a != NO_ALIGNMENT)
                .unwrap_or(NO_ALIGNMENT),
            AlignmentRule::Custom(rule) => rule(name).max(NO_ALIGNMENT),
        }
    }
}

impl fmt::Debug for AlignmentRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignmentRule::None => write!(f, "None"),
            AlignmentRule::Constant(a) => f.debug_tuple("Constant").field(a).finish(),
            AlignmentRule::Suffix { suffix, alignment } => f
                .debug_struct("Suffix")
                .field("suffix", suffix)
                .field("alignment", alignment)
                .finish(),
            AlignmentRule::Compose(rules) => f.debug_tuple("Compose").field(rules).finish(),
            AlignmentRule::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
