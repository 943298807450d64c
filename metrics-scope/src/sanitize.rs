//! Character sanitization for metric names and tags.
use std::{borrow::Cow, ops::RangeInclusive};

/// Replacement character used by [`SanitizeOptions::alphanumeric`].
pub const DEFAULT_REPLACEMENT_CHARACTER: char = '_';

/// ASCII letters and digits.
pub const ALPHANUMERIC_RANGE: [RangeInclusive<char>; 3] = ['a'..='z', 'A'..='Z', '0'..='9'];

/// Underscore only.
pub const UNDERSCORE_CHARACTERS: [char; 1] = ['_'];

/// Underscore and dash.
pub const UNDERSCORE_DASH_CHARACTERS: [char; 2] = ['-', '_'];

/// Underscore, dash and dot.
pub const UNDERSCORE_DASH_DOT_CHARACTERS: [char; 3] = ['.', '-', '_'];

/// A set of allowed characters, expressed as ranges plus individual characters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidCharacters {
    /// Inclusive ranges of allowed characters.
    pub ranges: Vec<RangeInclusive<char>>,

    /// Individually allowed characters.
    pub characters: Vec<char>,
}

impl ValidCharacters {
    /// Creates a new `ValidCharacters` from the given ranges and characters.
    pub fn new<R, C>(ranges: R, characters: C) -> Self
    where
        R: IntoIterator<Item = RangeInclusive<char>>,
        C: IntoIterator<Item = char>,
    {
        Self { ranges: ranges.into_iter().collect(), characters: characters.into_iter().collect() }
    }

    /// Returns `true` if `c` is allowed.
    pub fn contains(&self, c: char) -> bool {
        self.ranges.iter().any(|range| range.contains(&c)) || self.characters.contains(&c)
    }
}

/// Sanitization configuration.
///
/// Names, tag keys and tag values each get their own allow-list. Characters outside of the
/// relevant allow-list are replaced with `replacement_character`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizeOptions {
    /// Characters allowed in metric names and scope prefixes.
    pub name_characters: ValidCharacters,

    /// Characters allowed in tag keys.
    pub key_characters: ValidCharacters,

    /// Characters allowed in tag values.
    pub value_characters: ValidCharacters,

    /// Character substituted for any disallowed character.
    pub replacement_character: char,
}

impl SanitizeOptions {
    /// Options allowing ASCII alphanumerics, underscores and dashes everywhere.
    pub fn alphanumeric() -> Self {
        let valid = ValidCharacters::new(ALPHANUMERIC_RANGE, UNDERSCORE_DASH_CHARACTERS);
        Self {
            name_characters: valid.clone(),
            key_characters: valid.clone(),
            value_characters: valid,
            replacement_character: DEFAULT_REPLACEMENT_CHARACTER,
        }
    }
}

/// Sanitizes names, tag keys and tag values.
///
/// A sanitizer built without options passes every input through untouched.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    options: Option<SanitizeOptions>,
}

impl Sanitizer {
    /// Creates a new `Sanitizer` from the given options.
    pub fn new(options: SanitizeOptions) -> Self {
        Self { options: Some(options) }
    }

    /// Creates a `Sanitizer` which does not modify its input.
    pub fn noop() -> Self {
        Self { options: None }
    }

    /// Sanitizes a metric name or scope prefix.
    pub fn name<'a>(&self, name: &'a str) -> Cow<'a, str> {
        match &self.options {
            Some(options) => {
                sanitize(name, &options.name_characters, options.replacement_character)
            }
            None => Cow::Borrowed(name),
        }
    }

    /// Sanitizes a tag key.
    pub fn key<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match &self.options {
            Some(options) => sanitize(key, &options.key_characters, options.replacement_character),
            None => Cow::Borrowed(key),
        }
    }

    /// Sanitizes a tag value.
    pub fn value<'a>(&self, value: &'a str) -> Cow<'a, str> {
        match &self.options {
            Some(options) => {
                sanitize(value, &options.value_characters, options.replacement_character)
            }
            None => Cow::Borrowed(value),
        }
    }
}

fn sanitize<'a>(input: &'a str, valid: &ValidCharacters, replacement: char) -> Cow<'a, str> {
    // Most inputs are already clean, so only allocate once we hit the first bad character.
    match input.char_indices().find(|(_, c)| !valid.contains(*c)) {
        None => Cow::Borrowed(input),
        Some((first_invalid, _)) => {
            let mut output = String::with_capacity(input.len());
            output.push_str(&input[..first_invalid]);
            output.extend(
                input[first_invalid..]
                    .chars()
                    .map(|c| if valid.contains(c) { c } else { replacement }),
            );
            Cow::Owned(output)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    #[test]
    fn test_sanitize_alphanumeric() {
        let sanitizer = Sanitizer::new(SanitizeOptions::alphanumeric());

        let test_cases = vec![
            ("how?", "how_"),
            ("does!", "does_"),
            ("work1!?", "work1__"),
            ("test.service", "test_service"),
            ("test:env", "test_env"),
            ("already-fine_99", "already-fine_99"),
            ("ünïcode", "_n_code"),
            ("", ""),
        ];

        for (input, expected) in test_cases {
            assert_eq!(sanitizer.name(input), expected);
            assert_eq!(sanitizer.key(input), expected);
            assert_eq!(sanitizer.value(input), expected);
        }
    }

    #[test]
    fn test_sanitize_borrows_clean_input() {
        let sanitizer = Sanitizer::new(SanitizeOptions::alphanumeric());
        assert!(matches!(sanitizer.name("clean_name"), Cow::Borrowed(_)));
        assert!(matches!(sanitizer.name("dirty name"), Cow::Owned(_)));
    }

    #[test]
    fn test_noop_sanitizer() {
        let sanitizer = Sanitizer::noop();
        assert_eq!(sanitizer.name("how?"), "how?");
        assert_eq!(sanitizer.key("a:b"), "a:b");
        assert_eq!(sanitizer.value("c d"), "c d");
    }

    #[test]
    fn test_independent_allow_lists() {
        let sanitizer = Sanitizer::new(SanitizeOptions {
            name_characters: ValidCharacters::new(
                ALPHANUMERIC_RANGE,
                UNDERSCORE_DASH_DOT_CHARACTERS,
            ),
            key_characters: ValidCharacters::new(ALPHANUMERIC_RANGE, UNDERSCORE_CHARACTERS),
            value_characters: ValidCharacters::new(['a'..='z'], std::iter::empty()),
            replacement_character: '-',
        });

        assert_eq!(sanitizer.name("http.requests-total"), "http.requests-total");
        assert_eq!(sanitizer.key("http.status-code"), "http-status-code");
        assert_eq!(sanitizer.value("GET200"), "------");
        assert_eq!(sanitizer.value("get"), "get");
    }
}
